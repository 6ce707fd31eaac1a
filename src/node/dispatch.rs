//! Delivery of envelopes to a node's dispatch table, dropping repeated
//! `no_repeat` envelopes.

use crate::node::Outbox;
use crate::protocol::{Envelope, NodeId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Number of recent `no_repeat` envelopes remembered per node
pub const DEDUP_WINDOW: usize = 4096;

/// Dispatch table installed on a node at startup.
///
/// Implementations match the closed [`crate::protocol::Message`] enum and must
/// return quickly: they run on the bus's delivery threads.
pub trait Listens: Send + Sync {
    fn on_message(&self, envelope: &Envelope, outbox: &dyn Outbox);
}

/// Hands delivered envelopes to a [`Listens`] table, dropping retransmitted
/// copies of envelopes flagged `no_repeat`.
pub struct Dispatcher {
    listens: Arc<dyn Listens>,
    seen: Mutex<SeenWindow>,
}

#[derive(Default)]
struct SeenWindow {
    keys: HashSet<(NodeId, u64)>,
    order: VecDeque<(NodeId, u64)>,
}

impl SeenWindow {
    /// Returns false if the key was already present
    fn insert(&mut self, key: (NodeId, u64)) -> bool {
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }
}

impl Dispatcher {
    pub fn new(listens: Arc<dyn Listens>) -> Self {
        Self {
            listens,
            seen: Mutex::new(SeenWindow::default()),
        }
    }

    /// Invoke the handler for `envelope`; returns false if it was suppressed
    pub fn deliver(&self, envelope: &Envelope, outbox: &dyn Outbox) -> bool {
        if envelope.flags.no_repeat
            && !self
                .seen
                .lock()
                .insert((envelope.sender.clone(), envelope.id))
        {
            debug!(
                id = envelope.id,
                sender = %envelope.sender,
                key = %envelope.message.key(),
                "Suppressed repeated delivery"
            );
            return false;
        }

        self.listens.on_message(envelope, outbox);
        true
    }
}
