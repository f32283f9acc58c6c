use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::events::{EventBus, PeerBondedEvent};
use crate::interaction::{retry_delay, Action, ExpectedReply, InteractionRegistry, InteractionState};
use crate::kademlia::{AddOutcome, PeerTable, BUCKET_SIZE};
use crate::message::{
    self, FindNeighborsMessage, Message, NeighborNode, NeighborsMessage, PingMessage, PongMessage,
};
use crate::peer::{DiscoveryPeer, PeerStatus};
use crate::types::Endpoint;
use devp2p_core::{NodeId, PacketHash};
use k256::ecdsa::SigningKey;
use rand::{rngs::OsRng, RngCore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the refresh loop wakes up to check whether a table refresh is due.
const REFRESH_CHECK: Duration = Duration::from_secs(30);
/// Minimum time between table refreshes.
const TABLE_REFRESH: Duration = Duration::from_secs(30);
/// How far in the future an outbound packet's `expiration` field is set.
const EXPIRATION_WINDOW: Duration = Duration::from_secs(20);

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn expiration_timestamp() -> u64 {
    (SystemTime::now() + EXPIRATION_WINDOW)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct Shared {
    table: PeerTable,
    interactions: InteractionRegistry,
    last_refresh: Instant,
}

/// The discovery protocol state machine: owns the UDP socket, the routing
/// table, and the interaction registry, and drives the bond/find operations
/// described in the wire protocol.
pub struct DiscoveryService {
    local_node_id: NodeId,
    local_endpoint: Endpoint,
    signer: SigningKey,
    socket: UdpSocket,
    shared: Mutex<Shared>,
    events: EventBus,
}

impl DiscoveryService {
    /// Binds the UDP socket, seeds the routing table with any configured
    /// bootnodes, and starts the inbound-dispatch and refresh tasks.
    pub async fn start(config: DiscoveryConfig) -> Result<DiscoveryHandle, DiscoveryError> {
        let signer = config.private_key.clone().unwrap_or_else(|| SigningKey::random(&mut OsRng));
        let local_node_id = message::node_id_from_signing_key(&signer);
        let local_endpoint = Endpoint {
            ip: config.node_ip,
            udp_port: config.discovery_port,
            tcp_port: config.libp2p_port,
        };

        let bind_addr = SocketAddr::new(config.node_ip, config.discovery_port);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| DiscoveryError::BindFailure(bind_addr, source))?;
        info!(%bind_addr, node_id = %local_node_id, "discovery socket bound");

        let shared = Shared {
            table: PeerTable::new(local_node_id),
            interactions: InteractionRegistry::new(),
            last_refresh: Instant::now(),
        };

        let service = Arc::new(DiscoveryService {
            local_node_id,
            local_endpoint,
            signer,
            socket,
            shared: Mutex::new(shared),
            events: EventBus::new(),
        });

        if !config.is_bootnode {
            for bootnode in &config.bootnodes {
                let peer = DiscoveryPeer::new(bootnode.node_id, Endpoint::from(bootnode.socket_address));
                let outcome = {
                    let mut shared = service.shared.lock().await;
                    shared.table.try_add(peer.clone()).outcome
                };
                if outcome == AddOutcome::Added {
                    info!(peer = %peer.node_id, "bonding with configured bootstrap peer");
                    Arc::clone(&service)
                        .bond(peer.node_id, peer.endpoint, true)
                        .await;
                }
            }
        }

        let inbound_task = tokio::spawn(Arc::clone(&service).inbound_loop());
        let refresh_task = tokio::spawn(Arc::clone(&service).refresh_loop());

        Ok(DiscoveryHandle {
            service,
            inbound_task,
            refresh_task,
        })
    }

    async fn inbound_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; message::MAX_PACKET_SIZE + 1];
        loop {
            let (len, source) = match self.socket.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "failed to read from discovery socket");
                    continue;
                }
            };
            match message::decode(&buf[..len]) {
                Ok(packet) => {
                    Arc::clone(&self).on_message(packet.sender_node_id, packet.hash, packet.message, source).await;
                }
                Err(err) => debug!(%source, %err, "dropping undecodable datagram"),
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(REFRESH_CHECK);
        loop {
            ticker.tick().await;

            let due = {
                let shared = self.shared.lock().await;
                shared.last_refresh.elapsed() >= TABLE_REFRESH
            };
            if !due {
                continue;
            }

            let mut target_bytes = [0u8; 64];
            OsRng.fill_bytes(&mut target_bytes);
            let target = NodeId(target_bytes);

            let nearest = {
                let mut shared = self.shared.lock().await;
                shared.last_refresh = Instant::now();
                shared.table.nearest_peers(&target, BUCKET_SIZE)
            };
            debug!(count = nearest.len(), "starting table refresh round");
            for peer in nearest {
                Arc::clone(&self)
                    .find_nodes(peer.node_id, peer.endpoint, target)
                    .await;
            }
        }
    }

    async fn bond(self: Arc<Self>, peer_id: NodeId, endpoint: Endpoint, bootstrap: bool) {
        {
            let mut shared = self.shared.lock().await;
            if let Some(existing) = shared.table.get_mut(&peer_id) {
                if existing.first_discovered_ts == 0 {
                    existing.first_discovered_ts = now_ms();
                }
                existing.status = PeerStatus::Bonding;
            }
        }
        self.dispatch(peer_id, endpoint, Action::Ping, ExpectedReply::Pong, bootstrap)
            .await;
    }

    async fn find_nodes(self: Arc<Self>, peer_id: NodeId, endpoint: Endpoint, target: NodeId) {
        self.dispatch(
            peer_id,
            endpoint,
            Action::FindNeighbors { target },
            ExpectedReply::Neighbors,
            false,
        )
        .await;
    }

    /// Inserts the interaction, cancelling any prior one for `peer_id`, then
    /// hands it to a single retry-loop task that performs the first send at
    /// `lastTimeout = 0` and keeps re-sending until it's matched, cancelled,
    /// or no longer retryable.
    ///
    /// The retry loop lives entirely inside one spawned task rather than as a
    /// chain of self-spawning `execute` calls: an `async fn` that schedules
    /// another call to itself makes its own opaque return type recursive,
    /// which the compiler rejects, so the loop has to be the thing that's
    /// spawned, not the thing doing the spawning.
    async fn dispatch(
        self: Arc<Self>,
        peer_id: NodeId,
        endpoint: Endpoint,
        action: Action,
        expected: ExpectedReply,
        bootstrap: bool,
    ) {
        let mut state = InteractionState::new(peer_id, action.clone(), expected);
        state.bootstrap = bootstrap;
        {
            let mut shared = self.shared.lock().await;
            shared.interactions.insert(state);
        }

        let service = Arc::clone(&self);
        let handle = tokio::spawn(async move { service.retry_loop(peer_id, endpoint, action).await });

        let mut shared = self.shared.lock().await;
        match shared.interactions.get_mut(&peer_id) {
            Some(existing) => existing.retry_handle = Some(handle),
            // Already matched or replaced in the gap between insert and here.
            None => handle.abort(),
        }
    }

    /// Sends `action` at `lastTimeout = 0`, then keeps re-sending at
    /// `retry_delay(lastTimeout)` for as long as the interaction stays
    /// registered and retryable.
    async fn retry_loop(self: Arc<Self>, peer_id: NodeId, endpoint: Endpoint, action: Action) {
        let mut last_timeout = 0u64;
        loop {
            if !self.send_once(peer_id, endpoint, &action).await {
                return;
            }

            let delay = retry_delay(last_timeout);
            last_timeout = delay;
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let mut shared = self.shared.lock().await;
            match shared.interactions.get_mut(&peer_id) {
                Some(existing) if existing.retryable => existing.last_timeout_ms = delay,
                _ => return,
            }
        }
    }

    /// Performs one send attempt and reports whether the interaction is still
    /// registered and retryable afterward.
    async fn send_once(&self, peer_id: NodeId, endpoint: Endpoint, action: &Action) -> bool {
        let send_result = self.perform_action(action, endpoint).await;
        match send_result {
            Ok(maybe_hash) => {
                let mut shared = self.shared.lock().await;
                shared
                    .interactions
                    .get_mut(&peer_id)
                    .map(|existing| {
                        if existing.ping_hash.is_none() {
                            if let Some(hash) = maybe_hash {
                                existing.ping_hash = Some(hash);
                            }
                        }
                        existing.retryable
                    })
                    .unwrap_or(false)
            }
            Err(err) => {
                warn!(peer = %peer_id, %err, "send failed; retry timer will re-send");
                let shared = self.shared.lock().await;
                shared
                    .interactions
                    .get(&peer_id)
                    .map(|existing| existing.retryable)
                    .unwrap_or(false)
            }
        }
    }

    async fn perform_action(&self, action: &Action, endpoint: Endpoint) -> Result<Option<PacketHash>, DiscoveryError> {
        match action {
            Action::Ping => {
                let message = Message::Ping(PingMessage {
                    version: 4,
                    from: self.local_endpoint,
                    to: endpoint,
                    expiration: Some(expiration_timestamp()),
                });
                let (hash, packet) = message::encode_with_header(&message, &self.signer)?;
                self.send(endpoint.udp_address(), &packet).await?;
                Ok(Some(hash))
            }
            Action::FindNeighbors { target } => {
                let message = Message::FindNeighbors(FindNeighborsMessage {
                    target: *target,
                    expiration: Some(expiration_timestamp()),
                });
                let (_, packet) = message::encode_with_header(&message, &self.signer)?;
                self.send(endpoint.udp_address(), &packet).await?;
                Ok(None)
            }
        }
    }

    async fn send(&self, destination: SocketAddr, packet: &[u8]) -> Result<(), DiscoveryError> {
        self.socket
            .send_to(packet, destination)
            .await
            .map(|_| ())
            .map_err(|source| DiscoveryError::SendFailure(destination, source))
    }

    async fn on_message(
        self: Arc<Self>,
        sender_id: NodeId,
        packet_hash: PacketHash,
        message: Message,
        source: SocketAddr,
    ) {
        if sender_id == self.local_node_id {
            debug!(%source, "dropping self-addressed packet");
            return;
        }
        let sender_endpoint = Endpoint::from(source);

        match message {
            Message::Ping(ping) => {
                self.handle_ping(packet_hash, sender_id, sender_endpoint, ping).await;
            }
            Message::Pong(pong) => {
                let matched = {
                    let mut shared = self.shared.lock().await;
                    shared
                        .interactions
                        .take_matching(&sender_id, &Message::Pong(pong))
                };
                match matched {
                    Some(state) => {
                        self.handle_matched_pong(sender_id, sender_endpoint, state).await;
                    }
                    None => debug!(peer = %sender_id, "unmatched PONG ignored"),
                }
            }
            Message::Neighbors(neighbors) => {
                let matched = {
                    let mut shared = self.shared.lock().await;
                    shared
                        .interactions
                        .take_matching(&sender_id, &Message::Neighbors(neighbors.clone()))
                };
                match matched {
                    Some(_) => self.handle_matched_neighbors(neighbors).await,
                    None => debug!(peer = %sender_id, "unmatched NEIGHBORS ignored"),
                }
            }
            Message::FindNeighbors(find) => {
                self.handle_find_neighbors(sender_id, sender_endpoint, find).await;
            }
        }
    }

    async fn handle_ping(&self, ping_hash: PacketHash, sender_id: NodeId, sender_endpoint: Endpoint, ping: PingMessage) {
        let peer = DiscoveryPeer::new(sender_id, sender_endpoint);
        let added = self.add_to_table(peer).await;
        if !added {
            return;
        }
        let pong = Message::Pong(PongMessage {
            to: ping.from,
            ping_hash,
            expiration: Some(expiration_timestamp()),
        });
        match message::encode_with_header(&pong, &self.signer) {
            Ok((_, packet)) => {
                if let Err(err) = self.send(sender_endpoint.udp_address(), &packet).await {
                    warn!(peer = %sender_id, %err, "failed to send PONG");
                }
            }
            Err(err) => warn!(peer = %sender_id, %err, "failed to encode PONG"),
        }
    }

    async fn handle_matched_pong(
        self: Arc<Self>,
        sender_id: NodeId,
        sender_endpoint: Endpoint,
        state: InteractionState,
    ) {
        let peer = DiscoveryPeer::new(sender_id, sender_endpoint);
        self.add_to_table(peer).await;
        if state.bootstrap {
            info!(peer = %sender_id, "bootstrap PONG matched; chaining into find_nodes");
            let local_node_id = self.local_node_id;
            self.find_nodes(sender_id, sender_endpoint, local_node_id).await;
        }
    }

    async fn handle_matched_neighbors(self: &Arc<Self>, neighbors: NeighborsMessage) {
        for NeighborNode { endpoint, node_id } in neighbors.nodes {
            if node_id == self.local_node_id {
                continue;
            }
            let already_known = {
                let shared = self.shared.lock().await;
                shared.table.get(&node_id).is_some()
            };
            if !already_known {
                Arc::clone(self).bond(node_id, endpoint, false).await;
            }
        }
    }

    async fn handle_find_neighbors(&self, sender_id: NodeId, sender_endpoint: Endpoint, find: FindNeighborsMessage) {
        let nodes = {
            let shared = self.shared.lock().await;
            shared
                .table
                .nearest_peers(&find.target, BUCKET_SIZE)
                .into_iter()
                .map(|peer| NeighborNode {
                    endpoint: peer.endpoint,
                    node_id: peer.node_id,
                })
                .collect()
        };
        let neighbors = Message::Neighbors(NeighborsMessage { nodes });
        match message::encode_with_header(&neighbors, &self.signer) {
            Ok((_, packet)) => {
                if let Err(err) = self.send(sender_endpoint.udp_address(), &packet).await {
                    warn!(peer = %sender_id, %err, "failed to send NEIGHBORS");
                }
            }
            Err(err) => warn!(peer = %sender_id, %err, "failed to encode NEIGHBORS"),
        }
    }

    /// `try_add`, bumping/evicting per the table's optimistic-replacement
    /// policy, and marks the peer BONDED, emitting `PeerBonded` on first
    /// transition. Returns `false` only when `peer.id == local_id`.
    async fn add_to_table(&self, peer: DiscoveryPeer) -> bool {
        let mut shared = self.shared.lock().await;

        let result = shared.table.try_add(peer.clone());
        match result.outcome {
            AddOutcome::SelfReference => return false,
            AddOutcome::AlreadyExisted => {
                shared.table.evict(&peer.node_id);
                shared.table.try_add(peer.clone());
            }
            AddOutcome::BucketFull => {
                if let Some(candidate) = result.eviction_candidate {
                    shared.table.evict(&candidate.node_id);
                    shared.table.try_add(peer.clone());
                }
            }
            AddOutcome::Added => {}
        }

        let now = now_ms();
        let mut bonded_event = None;
        if let Some(stored) = shared.table.get_mut(&peer.node_id) {
            if stored.first_discovered_ts == 0 {
                stored.first_discovered_ts = now;
            }
            stored.last_seen_ts = now;
            if stored.status != PeerStatus::Bonded {
                stored.status = PeerStatus::Bonded;
                bonded_event = Some(PeerBondedEvent {
                    peer: stored.clone(),
                    timestamp_ms: now,
                });
            }
        }
        drop(shared);
        if let Some(event) = bonded_event {
            self.events.publish(event);
        }
        true
    }
}

/// Handle to a running [`DiscoveryService`]. Dropping it does not stop the
/// service; call [`DiscoveryHandle::stop`] explicitly.
pub struct DiscoveryHandle {
    service: Arc<DiscoveryService>,
    inbound_task: JoinHandle<()>,
    refresh_task: JoinHandle<()>,
}

impl DiscoveryHandle {
    pub fn local_node_id(&self) -> NodeId {
        self.service.local_node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerBondedEvent> {
        self.service.events.subscribe()
    }

    /// Cancels the inbound-dispatch and refresh tasks, then every in-flight
    /// interaction's retry timer. The socket is closed implicitly when the
    /// last `Arc<DiscoveryService>` referencing it is dropped.
    pub async fn stop(self) -> Result<(), DiscoveryError> {
        self.inbound_task.abort();
        self.refresh_task.abort();

        let mut shared = self.service.shared.lock().await;
        shared.interactions.cancel_all();
        drop(shared);
        info!(node_id = %self.service.local_node_id, "discovery service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootnode::BootNode;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::timeout;

    fn sample_endpoint() -> Endpoint {
        Endpoint {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
        }
    }

    fn loopback_config(port: u16, bootnodes: Vec<BootNode>) -> DiscoveryConfig {
        DiscoveryConfig {
            is_bootnode: false,
            private_key: None,
            node_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            discovery_port: port,
            libp2p_port: 0,
            bootnodes,
            datadir: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn add_to_table_emits_bonded_event_once_per_peer() {
        let handle = DiscoveryService::start(loopback_config(0, vec![])).await.unwrap();
        let mut events = handle.subscribe();
        let peer = DiscoveryPeer::new(NodeId::from_low_u64_be(99), sample_endpoint());

        assert!(handle.service.add_to_table(peer.clone()).await);
        let event = timeout(Duration::from_millis(200), events.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert_eq!(event.peer.node_id, peer.node_id);

        // Re-adding the same, already-bonded peer must not fire a second event.
        assert!(handle.service.add_to_table(peer.clone()).await);
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn add_to_table_rejects_the_local_node_id() {
        let handle = DiscoveryService::start(loopback_config(0, vec![])).await.unwrap();
        let local_id = handle.local_node_id();
        let peer = DiscoveryPeer::new(local_id, sample_endpoint());

        assert!(!handle.service.add_to_table(peer).await);
        handle.stop().await.unwrap();
    }

    /// `b` is started with `a` as its only bootnode: `b` pings `a`, `a` adds
    /// `b` and replies, `b` matches the PONG and adds `a`, and because that
    /// interaction was a bootstrap one `b` chains into a FIND_NEIGHBORS
    /// against `a`. Both sides should end up BONDED with each other without
    /// either being told about the other a second time.
    #[tokio::test]
    async fn bootstrap_bond_completes_in_both_directions() {
        let a = DiscoveryService::start(loopback_config(32100, vec![])).await.unwrap();
        let a_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 32100);
        let a_bootnode = BootNode {
            node_id: a.local_node_id(),
            socket_address: a_addr,
        };

        let mut a_events = a.subscribe();
        let b = DiscoveryService::start(loopback_config(32101, vec![a_bootnode])).await.unwrap();
        let mut b_events = b.subscribe();

        let a_bonded = timeout(Duration::from_secs(5), a_events.recv())
            .await
            .expect("a should observe b bonding")
            .unwrap();
        assert_eq!(a_bonded.peer.node_id, b.local_node_id());

        let b_bonded = timeout(Duration::from_secs(5), b_events.recv())
            .await
            .expect("b should observe a bonding")
            .unwrap();
        assert_eq!(b_bonded.peer.node_id, a.local_node_id());

        a.stop().await.unwrap();
        b.stop().await.unwrap();
    }

    /// A bootnode entry pointing back at the local node itself must never be
    /// bonded with: `try_add` reports `SelfReference` during table seeding,
    /// so `start` never dispatches a PING for it.
    #[tokio::test]
    async fn self_as_bootnode_is_never_bonded() {
        let signer = SigningKey::random(&mut rand::rngs::OsRng);
        let node_id = message::node_id_from_signing_key(&signer);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 32102);

        let mut config = loopback_config(32102, vec![BootNode { node_id, socket_address: addr }]);
        config.private_key = Some(signer);

        let handle = DiscoveryService::start(config).await.unwrap();
        let mut events = handle.subscribe();
        assert!(timeout(Duration::from_millis(300), events.recv()).await.is_err());

        handle.stop().await.unwrap();
    }

    /// `b` joins through `a`; `c` is already bonded with `a` by the time `b`
    /// arrives. The NEIGHBORS reply `a` sends back for `b`'s bootstrap
    /// FIND_NEIGHBORS should include `c`, and `b` should then bond with `c`
    /// directly without ever being told about it by the caller.
    #[tokio::test]
    async fn neighbors_reply_chains_into_bonding_with_introduced_peers() {
        let a = DiscoveryService::start(loopback_config(32110, vec![])).await.unwrap();
        let a_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 32110);
        let a_bootnode = BootNode {
            node_id: a.local_node_id(),
            socket_address: a_addr,
        };

        let c = DiscoveryService::start(loopback_config(32111, vec![a_bootnode.clone()])).await.unwrap();
        let mut c_events = c.subscribe();
        timeout(Duration::from_secs(5), c_events.recv())
            .await
            .expect("c should bond with a")
            .unwrap();

        let b = DiscoveryService::start(loopback_config(32112, vec![a_bootnode])).await.unwrap();
        let mut b_events = b.subscribe();

        let mut saw_c = false;
        for _ in 0..4 {
            let Ok(Ok(event)) = timeout(Duration::from_secs(5), b_events.recv()).await else {
                break;
            };
            if event.peer.node_id == c.local_node_id() {
                saw_c = true;
                break;
            }
        }
        assert!(saw_c, "b should have bonded with c after learning about it via NEIGHBORS");

        a.stop().await.unwrap();
        b.stop().await.unwrap();
        c.stop().await.unwrap();
    }
}
