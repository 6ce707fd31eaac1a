//! TCP bus: newline-delimited JSON envelopes.
//!
//! A node dials its upstream (if any) and announces itself with `INIT`. A node
//! with a router port accepts inbound peers and registers each under the id
//! from its `INIT`. Outgoing envelopes go to the registered peer matching the
//! route's first hop, otherwise to the upstream. Envelopes whose first hop is
//! this node are either forwarded (more hops remain) or dispatched.

use crate::node::dispatch::{Dispatcher, Listens};
use crate::node::error::{NodeError, Result};
use crate::node::{Connector, NetNode, NodeConfig, Outbox};
use crate::protocol::{DeliveryFlags, Envelope, Message, NodeId, Route};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

struct UpstreamLink {
    id: NodeId,
    stream: Mutex<TcpStream>,
}

struct Shared {
    id: NodeId,
    upstream: Option<UpstreamLink>,
    peers: Mutex<HashMap<NodeId, TcpStream>>,
    /// Accepted connections by peer address, until their reader exits
    inbound: Mutex<HashMap<SocketAddr, TcpStream>>,
    next_id: AtomicU64,
    released: AtomicBool,
    dispatcher: Dispatcher,
}

impl Shared {
    fn write_envelope(&self, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        let first = envelope.route.first();

        if let Some(mut stream) = self.peers.lock().get(first) {
            stream.write_all(&frame)?;
            return Ok(());
        }

        match &self.upstream {
            Some(upstream) => {
                upstream.stream.lock().write_all(&frame)?;
                Ok(())
            }
            None => Err(NodeError::UnknownPeer(first.to_string())),
        }
    }

    fn handle_inbound(&self, envelope: Envelope) {
        if envelope.route.first() != self.id {
            debug!(node = %self.id, route = %envelope.route, "Passing envelope through");
            if let Err(e) = self.write_envelope(&envelope) {
                warn!(node = %self.id, route = %envelope.route, error = %e, "Dropped envelope");
            }
            return;
        }

        match envelope.route.advance() {
            Some(rest) => {
                debug!(node = %self.id, route = %rest, "Forwarding envelope");
                if let Err(e) = self.write_envelope(&envelope.forwarded(rest)) {
                    warn!(node = %self.id, error = %e, "Failed to forward envelope");
                }
            }
            None => {
                self.dispatcher.deliver(&envelope, self);
            }
        }
    }

    fn register_peer(&self, id: NodeId, stream: &TcpStream) {
        match stream.try_clone() {
            Ok(writer) => {
                info!(node = %self.id, peer = %id, addr = ?stream.peer_addr().ok(), "Peer registered");
                self.peers.lock().insert(id, writer);
            }
            Err(e) => warn!(node = %self.id, peer = %id, error = %e, "Failed to register peer"),
        }
    }

    fn forget_peer(&self, id: &str, addr: Option<SocketAddr>) {
        let mut peers = self.peers.lock();
        let same_connection = peers
            .get(id)
            .map(|stream| stream.peer_addr().ok() == addr)
            .unwrap_or(false);
        if same_connection {
            peers.remove(id);
            debug!(node = %self.id, peer = %id, "Peer disconnected");
        }
    }
}

impl Outbox for Shared {
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
        self.write_envelope(&envelope)
    }
}

fn read_frames(shared: Arc<Shared>, stream: TcpStream, inbound: bool) {
    let addr = stream.peer_addr().ok();
    let reader = match stream.try_clone() {
        Ok(clone) => BufReader::new(clone),
        Err(e) => {
            warn!(node = %shared.id, error = %e, "Failed to clone stream for reading");
            return;
        }
    };

    let mut registered: Option<NodeId> = None;
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                if !shared.released.load(Ordering::Acquire) {
                    debug!(node = %shared.id, addr = ?addr, error = %e, "Connection read failed");
                }
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match Envelope::decode(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(node = %shared.id, addr = ?addr, error = %e, "Discarding malformed frame");
                continue;
            }
        };

        if let Message::Init { id } = &envelope.message {
            if inbound {
                shared.register_peer(id.clone(), &stream);
                registered = Some(id.clone());
            }
            continue;
        }

        shared.handle_inbound(envelope);
    }

    if let Some(id) = registered {
        shared.forget_peer(&id, addr);
    }
    if inbound {
        if let Some(addr) = addr {
            shared.inbound.lock().remove(&addr);
        }
    }
}

fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    loop {
        let accepted = listener.accept();
        if shared.released.load(Ordering::Acquire) {
            break;
        }
        match accepted {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                match stream.try_clone() {
                    Ok(handle) => {
                        shared.inbound.lock().insert(addr, handle);
                    }
                    Err(e) => warn!(error = %e, "Failed to track inbound connection"),
                }
                let shared = Arc::clone(&shared);
                thread::spawn(move || read_frames(shared, stream, true));
            }
            Err(e) => warn!(node = %shared.id, error = %e, "Failed to accept connection"),
        }
    }
    debug!(node = %shared.id, "Router stopped");
}

/// Bus node over TCP
pub struct TcpNode {
    shared: Arc<Shared>,
    router_port: Option<u16>,
}

impl TcpNode {
    /// Bind the router (if configured), dial the upstream (if configured) and
    /// announce this node with `INIT`.
    pub fn connect(config: &NodeConfig, listens: Arc<dyn Listens>) -> Result<Self> {
        let listener = match config.router_port {
            Some(port) => {
                let listener = TcpListener::bind(("0.0.0.0", port))
                    .map_err(|source| NodeError::Bind { port, source })?;
                Some(listener)
            }
            None => None,
        };
        let router_port = match &listener {
            Some(listener) => Some(listener.local_addr()?.port()),
            None => None,
        };

        let mut upstream_reader = None;
        let upstream = match &config.upstream {
            Some(up) => {
                let address = up.address();
                let stream = TcpStream::connect(&address).map_err(|source| NodeError::Connect {
                    address: address.clone(),
                    source,
                })?;
                stream.set_nodelay(true)?;
                upstream_reader = Some(stream.try_clone()?);
                Some(UpstreamLink {
                    id: up.id.clone(),
                    stream: Mutex::new(stream),
                })
            }
            None => None,
        };

        let shared = Arc::new(Shared {
            id: config.id.clone(),
            upstream,
            peers: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            released: AtomicBool::new(false),
            dispatcher: Dispatcher::new(listens),
        });

        if let Some(upstream) = &shared.upstream {
            shared.send(
                Route::to(upstream.id.clone()),
                Message::Init {
                    id: shared.id.clone(),
                },
                DeliveryFlags::NONE,
            )?;
        }
        if let Some(reader) = upstream_reader {
            let shared = Arc::clone(&shared);
            thread::spawn(move || read_frames(shared, reader, false));
        }
        if let Some(listener) = listener {
            let shared = Arc::clone(&shared);
            thread::spawn(move || accept_loop(shared, listener));
        }

        info!(
            node = %config.id,
            upstream = ?config.upstream.as_ref().map(|up| up.address()),
            router_port = ?router_port,
            "Node connected"
        );
        Ok(Self {
            shared,
            router_port,
        })
    }

    /// Whether a peer has announced itself on this node's router under `id`
    pub fn has_peer(&self, id: &str) -> bool {
        self.shared.peers.lock().contains_key(id)
    }
}

impl Outbox for TcpNode {
    fn send(&self, route: Route, message: Message, flags: DeliveryFlags) -> Result<()> {
        self.shared.send(route, message, flags)
    }
}

impl NetNode for TcpNode {
    fn id(&self) -> NodeId {
        self.shared.id.clone()
    }

    fn router_port(&self) -> Option<u16> {
        self.router_port
    }

    fn release(&self) {
        if self.shared.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(upstream) = &self.shared.upstream {
            let _ = upstream.stream.lock().shutdown(Shutdown::Both);
        }
        for (_, stream) in self.shared.inbound.lock().drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.shared.peers.lock().clear();
        if let Some(port) = self.router_port {
            // Wake the accept loop so it observes the released flag
            let _ = TcpStream::connect(("127.0.0.1", port));
        }
        info!(node = %self.shared.id, "Node released");
    }
}

impl Drop for TcpNode {
    fn drop(&mut self) {
        self.release();
    }
}

/// [`Connector`] for [`TcpNode`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Node = TcpNode;

    fn connect(&self, config: &NodeConfig, listens: Arc<dyn Listens>) -> Result<TcpNode> {
        TcpNode::connect(config, listens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Upstream;
    use crossbeam::channel::{self, Sender};
    use std::time::{Duration, Instant};

    struct Recorder(Sender<Envelope>);

    impl Listens for Recorder {
        fn on_message(&self, envelope: &Envelope, _outbox: &dyn Outbox) {
            let _ = self.0.send(envelope.clone());
        }
    }

    struct Echo;

    impl Listens for Echo {
        fn on_message(&self, envelope: &Envelope, outbox: &dyn Outbox) {
            if let Message::Call { message_number } = envelope.message {
                let _ = outbox.send(
                    Route::to(envelope.sender.clone()),
                    Message::Call { message_number },
                    DeliveryFlags::NONE,
                );
            }
        }
    }

    fn wait_for_peer(node: &TcpNode, id: &str) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !node.has_peer(id) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn router(id: &str, listens: Arc<dyn Listens>) -> Result<TcpNode> {
        TcpNode::connect(
            &NodeConfig {
                id: id.into(),
                upstream: None,
                router_port: Some(0),
            },
            listens,
        )
    }

    fn dial(id: &str, upstream_id: &str, port: u16, listens: Arc<dyn Listens>) -> Result<TcpNode> {
        TcpNode::connect(
            &NodeConfig {
                id: id.into(),
                upstream: Some(Upstream {
                    id: upstream_id.into(),
                    ip: "127.0.0.1".into(),
                    port,
                }),
                router_port: None,
            },
            listens,
        )
    }

    #[test]
    fn test_upstream_and_reply_over_router() -> Result<()> {
        let hub = router("hub", Arc::new(Echo))?;
        let port = hub.router_port().unwrap();

        let (tx, rx) = channel::unbounded();
        let client = dial("client", "hub", port, Arc::new(Recorder(tx)))?;
        wait_for_peer(&hub, "client");

        client.send(
            Route::to("hub"),
            Message::Call { message_number: 9 },
            DeliveryFlags::NONE,
        )?;
        let reply = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(reply.sender, "hub");
        assert_eq!(reply.message, Message::Call { message_number: 9 });

        client.release();
        hub.release();
        Ok(())
    }

    #[test]
    fn test_relay_forwards_multi_hop() -> Result<()> {
        let relay = router("T", Arc::new(Echo))?;
        let port = relay.router_port().unwrap();

        let (tx, rx) = channel::unbounded();
        let _pilot = dial("pilot", "T", port, Arc::new(Recorder(tx)))?;
        let (leader_tx, _leader_rx) = channel::unbounded();
        let leader = dial("leader", "T", port, Arc::new(Recorder(leader_tx)))?;
        wait_for_peer(&relay, "pilot");

        leader.send(
            Route::through(["T", "pilot"])?,
            Message::Ready,
            DeliveryFlags::NO_REPEAT,
        )?;
        let got = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got.sender, "leader");
        assert_eq!(got.route, Route::to("pilot"));
        assert!(got.flags.no_repeat);
        Ok(())
    }

    #[test]
    fn test_closed_connections_are_forgotten() -> Result<()> {
        let hub = router("hub", Arc::new(Echo))?;
        let port = hub.router_port().unwrap();

        for _ in 0..50 {
            let client = dial("client", "hub", port, Arc::new(Echo))?;
            wait_for_peer(&hub, "client");
            client.release();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while (!hub.shared.inbound.lock().is_empty() || hub.has_peer("client"))
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(hub.shared.inbound.lock().is_empty());
        assert!(!hub.has_peer("client"));

        hub.release();
        Ok(())
    }

    #[test]
    fn test_connect_refused() {
        let unused = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let result = dial("client", "hub", port, Arc::new(Echo));
        assert!(matches!(result, Err(NodeError::Connect { .. })));
    }

    #[test]
    fn test_send_after_release() -> Result<()> {
        let hub = router("hub", Arc::new(Echo))?;
        hub.release();
        assert!(matches!(
            hub.send(Route::to("x"), Message::Stop, DeliveryFlags::NONE),
            Err(NodeError::Released(_))
        ));
        Ok(())
    }
}
