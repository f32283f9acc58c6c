use devp2p_core::NodeId;
use std::{net::SocketAddr, num::ParseIntError, str::FromStr};

/// A preconfigured seed peer used to join the overlay on first start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootNode {
    pub node_id: NodeId,
    pub socket_address: SocketAddr,
}

impl FromStr for BootNode {
    type Err = ParseIntError;

    /// Parses a str of the form "enode://nodeID@IPaddress:port" into a [`BootNode`].
    fn from_str(input: &str) -> Result<BootNode, ParseIntError> {
        // TODO: error handling
        let node_id = NodeId::from_str(&input[8..136]).expect("Failed to parse node id");
        let socket_address: SocketAddr = input[137..]
            .parse()
            .expect("Failed to parse bootnode address and port");
        Ok(BootNode {
            node_id,
            socket_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bootnode_from_string() {
        let input = "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@18.138.108.67:30303";
        let bootnode = BootNode::from_str(input).unwrap();
        let node_id = NodeId::from_str(
            "d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666")
            .unwrap();
        let socket_address = SocketAddr::from_str("18.138.108.67:30303").unwrap();
        let expected_bootnode = BootNode {
            node_id,
            socket_address,
        };
        assert_eq!(bootnode, expected_bootnode);
    }

    #[test]
    fn parse_bootnode_with_ipv6_address() {
        let input = "enode://d860a01f9722d78051619d1e2351aba3f43f943f6f00718d1b9baa4101932a1f5011f16bb2b1bb35db20d6fe28fa0bf09636d26a87d31de9ec6203eeedb1f666@[::1]:30303";
        let bootnode = BootNode::from_str(input).unwrap();
        assert_eq!(bootnode.socket_address.port(), 30303);
    }
}
