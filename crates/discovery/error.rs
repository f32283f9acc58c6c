use devp2p_rlp::error::{RLPDecodeError, RLPEncodeError};
use std::io;
use thiserror::Error;

/// Errors surfaced by the discovery crate's public API. Internal per-packet failures
/// (decode errors, unmatched replies, self-referencing packets) are logged and dropped
/// at the point they occur rather than propagated — see the inbound dispatch loop in
/// [`crate::controller`].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to decode packet: {0}")]
    Decode(#[from] RLPDecodeError),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] RLPEncodeError),
    #[error("datagram of {0} bytes exceeds the {1} byte MTU")]
    PacketTooLarge(usize, usize),
    #[error("signature recovery failed: {0}")]
    InvalidSignature(String),
    #[error("failed to bind discovery socket on {0}: {1}")]
    BindFailure(std::net::SocketAddr, io::Error),
    #[error("failed to send datagram to {0}: {1}")]
    SendFailure(std::net::SocketAddr, io::Error),
}
