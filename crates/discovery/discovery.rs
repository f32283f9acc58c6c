pub mod bootnode;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod interaction;
pub mod kademlia;
pub mod message;
pub mod peer;
pub mod types;

pub use controller::{DiscoveryHandle, DiscoveryService};
pub use error::DiscoveryError;
