//! In-process bus: every node gets a mailbox on a shared hub and a delivery
//! thread that forwards multi-hop envelopes or dispatches them locally.

use crate::node::dispatch::{Dispatcher, Listens};
use crate::node::error::{NodeError, Result};
use crate::node::{Connector, NetNode, NodeConfig, Outbox};
use crate::protocol::{DeliveryFlags, Envelope, Message, NodeId, Route};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Shared registry of node mailboxes
#[derive(Clone, Default)]
pub struct LocalHub {
    mailboxes: Arc<Mutex<HashMap<NodeId, Sender<Envelope>>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` on the hub and start its delivery thread
    pub fn join(&self, id: impl Into<NodeId>, listens: Arc<dyn Listens>) -> Result<LocalNode> {
        let id = id.into();
        let (tx, rx) = channel::unbounded();
        if self.mailboxes.lock().insert(id.clone(), tx).is_some() {
            warn!(node = %id, "Replaced existing node with the same id");
        }

        let outbox = LocalOutbox {
            id: id.clone(),
            hub: self.clone(),
            next_id: Arc::new(AtomicU64::new(0)),
            released: Arc::new(AtomicBool::new(false)),
        };
        let dispatcher = Dispatcher::new(listens);
        let worker_outbox = outbox.clone();
        let worker = thread::Builder::new()
            .name(format!("bus-{}", id))
            .spawn(move || deliver_loop(rx, dispatcher, worker_outbox))?;

        debug!(node = %id, "Joined local hub");
        Ok(LocalNode {
            outbox,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Put an envelope in the mailbox of its route's first hop, unchanged.
    ///
    /// Nodes use this for their own sends; tests use it to replay a
    /// retransmitted copy.
    pub fn post(&self, envelope: Envelope) -> Result<()> {
        let first = envelope.route.first().to_string();
        let tx = self
            .mailboxes
            .lock()
            .get(&first)
            .cloned()
            .ok_or_else(|| NodeError::UnknownPeer(first.clone()))?;
        tx.send(envelope).map_err(|_| NodeError::UnknownPeer(first))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.mailboxes.lock().contains_key(id)
    }

    fn leave(&self, id: &str) {
        self.mailboxes.lock().remove(id);
    }
}

fn deliver_loop(rx: Receiver<Envelope>, dispatcher: Dispatcher, outbox: LocalOutbox) {
    for envelope in rx.iter() {
        match envelope.route.advance() {
            Some(rest) => {
                debug!(node = %outbox.id, route = %rest, "Forwarding envelope");
                if let Err(e) = outbox.hub.post(envelope.forwarded(rest)) {
                    warn!(node = %outbox.id, error = %e, "Failed to forward envelope");
                }
            }
            None => {
                dispatcher.deliver(&envelope, &outbox);
            }
        }
    }
    debug!(node = %outbox.id, "Delivery thread stopped");
}

#[derive(Clone)]
struct LocalOutbox {
    id: NodeId,
    hub: LocalHub,
    next_id: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
}

impl Outbox for LocalOutbox {
    fn send(&self, route: Route, message: Message, flags: DeliveryFlags) -> Result<()> {
        if self.released.load(Ordering::Acquire) {
            return Err(NodeError::Released(self.id.clone()));
        }
        let envelope = Envelope {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sender: self.id.clone(),
            route,
            message,
            flags,
        };
        debug!(
            node = %self.id,
            route = %envelope.route,
            key = %envelope.message.key(),
            "Sending envelope"
        );
        self.hub.post(envelope)
    }
}

/// Node attached to a [`LocalHub`]
pub struct LocalNode {
    outbox: LocalOutbox,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Outbox for LocalNode {
    fn send(&self, route: Route, message: Message, flags: DeliveryFlags) -> Result<()> {
        self.outbox.send(route, message, flags)
    }
}

impl NetNode for LocalNode {
    fn id(&self) -> NodeId {
        self.outbox.id.clone()
    }

    fn release(&self) {
        if self.outbox.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbox.hub.leave(&self.outbox.id);
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(node = %self.outbox.id, "Delivery thread panicked");
            }
        }
        debug!(node = %self.outbox.id, "Released local node");
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        self.release();
    }
}

/// [`Connector`] placing every node on one shared [`LocalHub`]
#[derive(Clone, Default)]
pub struct LocalConnector {
    pub hub: LocalHub,
}

impl LocalConnector {
    pub fn new(hub: LocalHub) -> Self {
        Self { hub }
    }
}

impl Connector for LocalConnector {
    type Node = LocalNode;

    fn connect(&self, config: &NodeConfig, listens: Arc<dyn Listens>) -> Result<LocalNode> {
        self.hub.join(config.id.clone(), listens)
    }
}
