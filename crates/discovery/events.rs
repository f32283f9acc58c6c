use crate::peer::DiscoveryPeer;
use tokio::sync::broadcast;

/// Backlog kept for slow subscribers before they start missing events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Emitted the moment a peer's status transitions to `BONDED`.
#[derive(Debug, Clone)]
pub struct PeerBondedEvent {
    pub peer: DiscoveryPeer,
    pub timestamp_ms: u64,
}

/// Fan-out point for `PeerBonded` events. The controller holds the sending half;
/// observers get a receiver via [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PeerBondedEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerBondedEvent> {
        self.tx.subscribe()
    }

    /// Enqueues the event for delivery. Returns without waiting for any subscriber
    /// to process it — the event loop that calls this must never block on a
    /// subscriber's handling of an event.
    pub fn publish(&self, event: PeerBondedEvent) {
        // An Err here just means nobody is currently subscribed; that's not a failure.
        let _ = self.tx.send(event);
    }

    /// Registers a callback on a dedicated task so it runs off the event loop, as
    /// required by the worker-pool dispatch model: the callback may be slow or
    /// blocking without affecting packet handling.
    pub fn subscribe_worker<F>(&self, mut callback: F)
    where
        F: FnMut(PeerBondedEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{DiscoveryPeer, PeerStatus};
    use crate::types::Endpoint;
    use devp2p_core::NodeId;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_peer() -> DiscoveryPeer {
        DiscoveryPeer::new(
            NodeId::zero(),
            Endpoint {
                ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                udp_port: 30303,
                tcp_port: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let mut peer = sample_peer();
        peer.status = PeerStatus::Bonded;
        bus.publish(PeerBondedEvent {
            peer: peer.clone(),
            timestamp_ms: 42,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.peer.node_id, peer.node_id);
        assert_eq!(received.timestamp_ms, 42);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(PeerBondedEvent {
            peer: sample_peer(),
            timestamp_ms: 1,
        });
    }
}
