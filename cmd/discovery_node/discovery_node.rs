use devp2p_core::NodeId;
use devp2p_discovery::bootnode::BootNode;
use devp2p_discovery::config::DiscoveryConfig;
use devp2p_discovery::controller::DiscoveryService;
use k256::ecdsa::SigningKey;
use local_ip_address::local_ip;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

const DEFAULT_DATADIR: &str = "discovery_node";

#[tokio::main]
async fn main() {
    let matches = cli::cli().get_matches();

    let log_level = matches
        .get_one::<String>("log-level")
        .expect("log-level has a default value");
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from_str(log_level).expect("unsupported log level"))
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder().with_env_filter(log_filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let discovery_addr = matches
        .get_one::<String>("discovery.addr")
        .expect("discovery.addr has a default value");
    let discovery_port: u16 = matches
        .get_one::<String>("discovery.port")
        .expect("discovery.port has a default value")
        .parse()
        .expect("discovery.port must be a valid u16");
    let p2p_port: u16 = matches
        .get_one::<String>("p2p.port")
        .expect("p2p.port has a default value")
        .parse()
        .expect("p2p.port must be a valid u16");

    let node_ip = if discovery_addr.parse::<Ipv4Addr>() == Ok(Ipv4Addr::new(0, 0, 0, 0)) {
        local_ip().expect("failed to determine local ip")
    } else {
        discovery_addr.parse().expect("invalid discovery.addr")
    };

    let bootnodes: Vec<BootNode> = matches
        .get_many("bootnodes")
        .map(Iterator::copied)
        .map(Iterator::collect)
        .unwrap_or_default();
    if bootnodes.is_empty() {
        warn!("no bootnodes configured; this node will only be reachable by inbound PING");
    }

    let is_bootnode = matches.get_flag("bootnode");
    let private_key = matches.get_one::<String>("private-key").map(|hex_key| {
        let bytes = hex::decode(hex_key).expect("private-key must be hex-encoded");
        SigningKey::from_slice(&bytes).expect("private-key is not a valid secp256k1 scalar")
    });
    if is_bootnode && private_key.is_none() {
        panic!("--bootnode requires --private-key");
    }

    let datadir = match matches.get_one::<String>("datadir") {
        Some(datadir) => PathBuf::from(datadir),
        None => default_datadir(),
    };

    let config = DiscoveryConfig {
        is_bootnode,
        private_key,
        node_ip,
        discovery_port,
        libp2p_port: p2p_port,
        bootnodes,
        datadir,
    };

    let handle = DiscoveryService::start(config)
        .await
        .expect("failed to start discovery service");
    log_node_id(handle.local_node_id());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    handle.stop().await.expect("failed to stop discovery service cleanly");
    info!("discovery node stopped");
}

fn log_node_id(node_id: NodeId) {
    info!(node_id = %node_id, "discovery node started");
}

fn default_datadir() -> PathBuf {
    let project_dir = directories::ProjectDirs::from("", "", DEFAULT_DATADIR)
        .expect("couldn't find home directory");
    project_dir.data_local_dir().to_owned()
}
