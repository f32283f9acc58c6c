//! Shared fixed-size types used across the discovery stack.
//!
//! Node identities and packet hashes are just the `ethereum-types` fixed-size hashes;
//! re-exporting them here keeps every crate in the workspace pointed at one copy.
pub use ethereum_types::*;

/// A node's public-key-derived identity: the uncompressed SECP256K1 public key with
/// its leading `0x04` prefix byte stripped.
pub type NodeId = H512;

/// Digest of a signed packet's `signature || type_tag || body` bytes.
pub type PacketHash = H256;
