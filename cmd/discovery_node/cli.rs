use clap::{Arg, ArgAction, Command};
use devp2p_discovery::bootnode::BootNode;
use tracing::Level;

pub fn cli() -> Command {
    Command::new("discovery_node")
        .about("Standalone devp2p peer discovery node")
        .arg(
            Arg::new("discovery.addr")
                .long("discovery.addr")
                .default_value("0.0.0.0")
                .value_name("ADDRESS")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("discovery.port")
                .long("discovery.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("p2p.port")
                .long("p2p.port")
                .default_value("30303")
                .value_name("PORT")
                .action(ArgAction::Set)
                .help("TCP port advertised for the application layer; this node never opens it"),
        )
        .arg(
            Arg::new("bootnodes")
                .long("bootnodes")
                .value_name("BOOTNODE_LIST")
                .value_parser(clap::value_parser!(BootNode))
                .value_delimiter(',')
                .num_args(1..)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("bootnode")
                .long("bootnode")
                .action(ArgAction::SetTrue)
                .help("Run as a bootnode: use --private-key verbatim and skip initial bonding"),
        )
        .arg(
            Arg::new("private-key")
                .long("private-key")
                .value_name("HEX_SECP256K1_KEY")
                .action(ArgAction::Set)
                .help("Required with --bootnode; a fresh key is generated otherwise"),
        )
        .arg(
            Arg::new("datadir")
                .long("datadir")
                .value_name("DATA_DIRECTORY")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .default_value(Level::INFO.as_str())
                .value_name("LOG_LEVEL")
                .action(ArgAction::Set),
        )
}
