use crate::error::DiscoveryError;
use crate::types::Endpoint;
use devp2p_core::{NodeId, PacketHash};
use devp2p_rlp::decode::RLPDecode;
use devp2p_rlp::encode::RLPEncode;
use devp2p_rlp::structs::{Decoder, Encoder};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::PublicKey;
use sha3::{Digest, Keccak256};

/// Datagrams above this size are dropped unread rather than decoded.
pub const MAX_PACKET_SIZE: usize = 1600;

const HASH_LEN: usize = 32;
const SIGNATURE_LEN: usize = 65;
const HEADER_LEN: usize = HASH_LEN + SIGNATURE_LEN;

const PING_ID: u8 = 0x01;
const PONG_ID: u8 = 0x02;
const FIND_NEIGHBORS_ID: u8 = 0x03;
const NEIGHBORS_ID: u8 = 0x04;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub version: u8,
    pub from: Endpoint,
    pub to: Endpoint,
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    pub to: Endpoint,
    pub ping_hash: PacketHash,
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindNeighborsMessage {
    pub target: NodeId,
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborNode {
    pub endpoint: Endpoint,
    pub node_id: NodeId,
}

/// No expiration field: the wire layout for NEIGHBORS omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborsMessage {
    pub nodes: Vec<NeighborNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping(PingMessage),
    Pong(PongMessage),
    FindNeighbors(FindNeighborsMessage),
    Neighbors(NeighborsMessage),
}

impl Message {
    fn packet_type(&self) -> u8 {
        match self {
            Message::Ping(_) => PING_ID,
            Message::Pong(_) => PONG_ID,
            Message::FindNeighbors(_) => FIND_NEIGHBORS_ID,
            Message::Neighbors(_) => NEIGHBORS_ID,
        }
    }

    fn encode_body(&self, buf: &mut dyn bytes::BufMut) {
        match self {
            Message::Ping(msg) => {
                Encoder::new(buf)
                    .encode_field(&msg.version)
                    .encode_field(&msg.from)
                    .encode_field(&msg.to)
                    .encode_optional_field(&msg.expiration)
                    .finish();
            }
            Message::Pong(msg) => {
                Encoder::new(buf)
                    .encode_field(&msg.to)
                    .encode_field(&msg.ping_hash)
                    .encode_optional_field(&msg.expiration)
                    .finish();
            }
            Message::FindNeighbors(msg) => {
                Encoder::new(buf)
                    .encode_field(&msg.target)
                    .encode_optional_field(&msg.expiration)
                    .finish();
            }
            Message::Neighbors(msg) => {
                let nodes: Vec<(Endpoint, NodeId)> = msg
                    .nodes
                    .iter()
                    .map(|n| (n.endpoint.clone(), n.node_id))
                    .collect();
                Encoder::new(buf).encode_field(&nodes).finish();
            }
        }
    }

    fn decode_body(packet_type: u8, body: &[u8]) -> Result<Message, DiscoveryError> {
        match packet_type {
            PING_ID => {
                let decoder = Decoder::new(body)?;
                let (version, decoder) = decoder.decode_field("version")?;
                let (from, decoder) = decoder.decode_field("from")?;
                let (to, decoder) = decoder.decode_field("to")?;
                let (expiration, decoder) = decoder.decode_optional_field();
                decoder.finish_unchecked();
                Ok(Message::Ping(PingMessage {
                    version,
                    from,
                    to,
                    expiration,
                }))
            }
            PONG_ID => {
                let decoder = Decoder::new(body)?;
                let (to, decoder) = decoder.decode_field("to")?;
                let (ping_hash, decoder) = decoder.decode_field("ping_hash")?;
                let (expiration, decoder) = decoder.decode_optional_field();
                decoder.finish_unchecked();
                Ok(Message::Pong(PongMessage {
                    to,
                    ping_hash,
                    expiration,
                }))
            }
            FIND_NEIGHBORS_ID => {
                let decoder = Decoder::new(body)?;
                let (target, decoder) = decoder.decode_field("target")?;
                let (expiration, decoder) = decoder.decode_optional_field();
                decoder.finish_unchecked();
                Ok(Message::FindNeighbors(FindNeighborsMessage {
                    target,
                    expiration,
                }))
            }
            NEIGHBORS_ID => {
                let decoder = Decoder::new(body)?;
                let (nodes, decoder): (Vec<(Endpoint, NodeId)>, _) =
                    decoder.decode_field("nodes")?;
                decoder.finish_unchecked();
                Ok(Message::Neighbors(NeighborsMessage {
                    nodes: nodes
                        .into_iter()
                        .map(|(endpoint, node_id)| NeighborNode { endpoint, node_id })
                        .collect(),
                }))
            }
            other => Err(DiscoveryError::InvalidSignature(format!(
                "unknown packet type {other}"
            ))),
        }
    }
}

/// A decoded, signature-verified datagram together with the identity recovered
/// from its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub hash: PacketHash,
    pub sender_node_id: NodeId,
    pub message: Message,
}

/// A node's identity is its uncompressed public key with the leading `0x04`
/// prefix byte stripped.
pub fn node_id_from_verifying_key(key: &VerifyingKey) -> NodeId {
    let encoded = PublicKey::from(key).to_encoded_point(false);
    NodeId::from_slice(&encoded.as_bytes()[1..])
}

pub fn node_id_from_signing_key(signer: &SigningKey) -> NodeId {
    node_id_from_verifying_key(signer.verifying_key())
}

/// Signs and frames `message` as `hash(32) || signature(65) || type(1) || rlp_body`.
pub fn encode_with_header(
    message: &Message,
    signer: &SigningKey,
) -> Result<(PacketHash, bytes::BytesMut), DiscoveryError> {
    let mut signed_payload = bytes::BytesMut::new();
    signed_payload.extend_from_slice(&[message.packet_type()]);
    message.encode_body(&mut signed_payload);

    let digest = Keccak256::digest(&signed_payload);
    let (signature, recovery_id): (Signature, RecoveryId) = signer
        .sign_prehash_recoverable(&digest)
        .map_err(|e| DiscoveryError::InvalidSignature(e.to_string()))?;

    let mut signature_bytes = [0u8; SIGNATURE_LEN];
    signature_bytes[..64].copy_from_slice(&signature.to_bytes());
    signature_bytes[64] = recovery_id.to_byte();

    let mut hash_input = Vec::with_capacity(SIGNATURE_LEN + signed_payload.len());
    hash_input.extend_from_slice(&signature_bytes);
    hash_input.extend_from_slice(&signed_payload);
    let hash = PacketHash::from_slice(&Keccak256::digest(&hash_input));

    let mut packet = bytes::BytesMut::with_capacity(HEADER_LEN + signed_payload.len());
    packet.extend_from_slice(hash.as_bytes());
    packet.extend_from_slice(&signature_bytes);
    packet.extend_from_slice(&signed_payload);

    if packet.len() > MAX_PACKET_SIZE {
        return Err(DiscoveryError::PacketTooLarge(packet.len(), MAX_PACKET_SIZE));
    }

    Ok((hash, packet))
}

/// Verifies the header, recovers the sender's identity, and decodes the body.
pub fn decode(datagram: &[u8]) -> Result<Packet, DiscoveryError> {
    if datagram.len() > MAX_PACKET_SIZE {
        return Err(DiscoveryError::PacketTooLarge(
            datagram.len(),
            MAX_PACKET_SIZE,
        ));
    }
    if datagram.len() < HEADER_LEN + 1 {
        return Err(DiscoveryError::InvalidSignature(
            "datagram shorter than the packet header".into(),
        ));
    }

    let claimed_hash = &datagram[..HASH_LEN];
    let signature_bytes = &datagram[HASH_LEN..HEADER_LEN];
    let rest = &datagram[HEADER_LEN..];

    let mut hash_input = Vec::with_capacity(SIGNATURE_LEN + rest.len());
    hash_input.extend_from_slice(signature_bytes);
    hash_input.extend_from_slice(rest);
    let computed_hash = Keccak256::digest(&hash_input);
    if claimed_hash != computed_hash.as_slice() {
        return Err(DiscoveryError::InvalidSignature(
            "packet hash does not match its signed contents".into(),
        ));
    }

    let signature = Signature::from_slice(&signature_bytes[..64])
        .map_err(|e| DiscoveryError::InvalidSignature(e.to_string()))?;
    let recovery_id = RecoveryId::from_byte(signature_bytes[64])
        .ok_or_else(|| DiscoveryError::InvalidSignature("invalid recovery id".into()))?;

    let digest = Keccak256::digest(rest);
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| DiscoveryError::InvalidSignature(e.to_string()))?;
    let sender_node_id = node_id_from_verifying_key(&verifying_key);

    let packet_type = rest[0];
    let message = Message::decode_body(packet_type, &rest[1..])?;

    Ok(Packet {
        hash: PacketHash::from_slice(&computed_hash),
        sender_node_id,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_endpoint() -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
        }
    }

    #[test]
    fn ping_round_trips_through_signing_and_decoding() {
        let signer = SigningKey::random(&mut OsRng);
        let message = Message::Ping(PingMessage {
            version: 4,
            from: sample_endpoint(),
            to: sample_endpoint(),
            expiration: Some(1_700_000_000),
        });

        let (hash, packet) = encode_with_header(&message, &signer).unwrap();
        let decoded = decode(&packet).unwrap();

        assert_eq!(decoded.hash, hash);
        assert_eq!(decoded.message, message);
        let expected_node_id = node_id_from_verifying_key(signer.verifying_key());
        assert_eq!(decoded.sender_node_id, expected_node_id);
    }

    #[test]
    fn pong_carries_the_ping_hash_for_correlation() {
        let signer = SigningKey::random(&mut OsRng);
        let ping_hash = PacketHash::from_low_u64_be(0xdead_beef);
        let message = Message::Pong(PongMessage {
            to: sample_endpoint(),
            ping_hash,
            expiration: Some(1_700_000_000),
        });

        let (_, packet) = encode_with_header(&message, &signer).unwrap();
        let decoded = decode(&packet).unwrap();
        match decoded.message {
            Message::Pong(pong) => assert_eq!(pong.ping_hash, ping_hash),
            other => panic!("expected Pong, got {other:?}"),
        }
    }

    #[test]
    fn neighbors_round_trips_a_node_list() {
        let signer = SigningKey::random(&mut OsRng);
        let nodes = vec![
            NeighborNode {
                endpoint: sample_endpoint(),
                node_id: NodeId::from_low_u64_be(1),
            },
            NeighborNode {
                endpoint: sample_endpoint(),
                node_id: NodeId::from_low_u64_be(2),
            },
        ];
        let message = Message::Neighbors(NeighborsMessage {
            nodes: nodes.clone(),
        });

        let (_, packet) = encode_with_header(&message, &signer).unwrap();
        let decoded = decode(&packet).unwrap();
        match decoded.message {
            Message::Neighbors(neighbors) => assert_eq!(neighbors.nodes, nodes),
            other => panic!("expected Neighbors, got {other:?}"),
        }
    }

    #[test]
    fn tampered_body_fails_hash_check() {
        let signer = SigningKey::random(&mut OsRng);
        let message = Message::FindNeighbors(FindNeighborsMessage {
            target: NodeId::from_low_u64_be(7),
            expiration: Some(1_700_000_000),
        });
        let (_, mut packet) = encode_with_header(&message, &signer).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;

        assert!(decode(&packet).is_err());
    }

    #[test]
    fn ping_without_expiration_decodes_to_none() {
        let signer = SigningKey::random(&mut OsRng);
        let message = Message::Ping(PingMessage {
            version: 4,
            from: sample_endpoint(),
            to: sample_endpoint(),
            expiration: None,
        });

        let (_, packet) = encode_with_header(&message, &signer).unwrap();
        let decoded = decode(&packet).unwrap();
        match decoded.message {
            Message::Ping(ping) => assert_eq!(ping.expiration, None),
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[test]
    fn oversized_datagram_is_rejected_before_decoding() {
        let oversized = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            decode(&oversized),
            Err(DiscoveryError::PacketTooLarge(_, _))
        ));
    }
}
