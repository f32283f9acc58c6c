use crate::message::Message;
use devp2p_core::{NodeId, PacketHash};
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// First retry fires after this long.
pub const INITIAL_RETRY_MS: u64 = 2000;
/// Retries never back off further than this.
pub const MAX_RETRY_MS: u64 = 60_000;
const RETRY_FACTOR: f64 = 1.5;

/// `retry_delay(0) = 2000`; `retry_delay(prev) = min(60000, prev * 1.5)`.
pub fn retry_delay(previous_ms: u64) -> u64 {
    if previous_ms == 0 {
        INITIAL_RETRY_MS
    } else {
        let next = (previous_ms as f64 * RETRY_FACTOR) as u64;
        next.min(MAX_RETRY_MS)
    }
}

/// The reply type that would satisfy an outstanding interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedReply {
    Pong,
    Neighbors,
}

/// What the interaction's retry timer re-sends on every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Ping,
    FindNeighbors { target: NodeId },
}

/// One outstanding request to a peer: what was sent, what would satisfy it, and
/// the retry timer driving resends. Only one of these may exist per peer id at
/// a time — inserting a new one for the same peer cancels the old timer.
pub struct InteractionState {
    pub peer_id: NodeId,
    pub action: Action,
    pub expected: ExpectedReply,
    /// Pinned to the hash of the *first* PING sent for a bond interaction, per
    /// the source's behavior of ignoring later retries' echoes until that one
    /// is acked.
    pub ping_hash: Option<PacketHash>,
    pub retryable: bool,
    pub bootstrap: bool,
    pub last_timeout_ms: u64,
    pub retry_handle: Option<JoinHandle<()>>,
}

impl InteractionState {
    pub fn new(peer_id: NodeId, action: Action, expected: ExpectedReply) -> Self {
        Self {
            peer_id,
            action,
            expected,
            ping_hash: None,
            retryable: true,
            bootstrap: false,
            last_timeout_ms: 0,
            retry_handle: None,
        }
    }

    /// Whether `message` both carries the expected reply type and passes this
    /// interaction's correlation filter.
    pub fn matches(&self, message: &Message) -> bool {
        match (&self.expected, message) {
            (ExpectedReply::Pong, Message::Pong(pong)) => match self.ping_hash {
                Some(expected_hash) => pong.ping_hash == expected_hash,
                None => false,
            },
            // Open question preserved from the source: any NEIGHBORS reply from
            // this peer satisfies an outstanding FIND_NEIGHBORS, regardless of
            // which target it was for.
            (ExpectedReply::Neighbors, Message::Neighbors(_)) => true,
            _ => false,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.retry_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for InteractionState {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// Tracks at most one outstanding interaction per peer id.
#[derive(Default)]
pub struct InteractionRegistry {
    states: HashMap<NodeId, InteractionState>,
}

impl InteractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `state`, cancelling and dropping any prior interaction for the
    /// same peer.
    pub fn insert(&mut self, state: InteractionState) {
        self.states.insert(state.peer_id, state);
    }

    /// If an interaction is registered for `sender` and `message` matches it,
    /// removes and returns it (cancelling its timer). Otherwise leaves the
    /// registry untouched.
    pub fn take_matching(&mut self, sender: &NodeId, message: &Message) -> Option<InteractionState> {
        let matched = self
            .states
            .get(sender)
            .is_some_and(|state| state.matches(message));
        if matched {
            self.states.remove(sender)
        } else {
            None
        }
    }

    /// Removes and cancels any interaction registered for `peer_id`.
    pub fn cancel(&mut self, peer_id: &NodeId) -> Option<InteractionState> {
        self.states.remove(peer_id)
    }

    /// Removes and cancels every outstanding interaction.
    pub fn cancel_all(&mut self) {
        self.states.clear();
    }

    pub fn get(&self, peer_id: &NodeId) -> Option<&InteractionState> {
        self.states.get(peer_id)
    }

    pub fn get_mut(&mut self, peer_id: &NodeId) -> Option<&mut InteractionState> {
        self.states.get_mut(peer_id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
