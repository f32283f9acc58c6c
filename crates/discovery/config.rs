use crate::bootnode::BootNode;
use k256::ecdsa::SigningKey;
use std::net::IpAddr;
use std::path::PathBuf;

/// Startup configuration for the discovery service. Assembling one of these from
/// the process environment (CLI flags, env vars, a config file) is out of scope
/// for this crate; `cmd/discovery_node` shows one way to do it.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// `true` ⇒ use `private_key` verbatim and skip bootstrap peer bonding on start.
    pub is_bootnode: bool,
    /// Required when `is_bootnode`; a freshly generated key is used otherwise.
    pub private_key: Option<SigningKey>,
    pub node_ip: IpAddr,
    pub discovery_port: u16,
    pub libp2p_port: u16,
    pub bootnodes: Vec<BootNode>,
    /// Not used for any persisted state today (the table is rebuilt from
    /// bootstrap on every run); reserved for future on-disk state.
    pub datadir: PathBuf,
}
