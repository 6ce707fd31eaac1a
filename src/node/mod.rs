//! Message bus the latency protocol runs on
//!
//! A node has an id, an optional upstream it dials, and an optional router
//! port other nodes dial into. Handlers are installed once, at connect time,
//! as a [`Listens`] implementation and run on the bus's own threads.

pub mod dispatch;
pub mod error;
pub mod local;
pub mod tcp;

pub use dispatch::{Dispatcher, Listens};
pub use error::{NodeError, Result};
pub use local::{LocalConnector, LocalHub, LocalNode};
pub use tcp::{TcpConnector, TcpNode};

use crate::protocol::{DeliveryFlags, Message, NodeId, Route};
use std::sync::Arc;

/// Sending half of a node, also handed to handlers so they can reply
#[cfg_attr(test, mockall::automock)]
pub trait Outbox: Send + Sync {
    fn send(&self, route: Route, message: Message, flags: DeliveryFlags) -> Result<()>;
}

/// A connected bus node
pub trait NetNode: Outbox {
    fn id(&self) -> NodeId;

    /// Port actually bound for inbound peers, when the node has a router
    fn router_port(&self) -> Option<u16> {
        None
    }

    /// Free sockets and threads; sending afterwards fails with [`NodeError::Released`]
    fn release(&self);
}

/// Where a node dials out to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub id: NodeId,
    pub ip: String,
    pub port: u16,
}

impl Upstream {
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Construction parameters for a bus node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: NodeId,
    pub upstream: Option<Upstream>,
    pub router_port: Option<u16>,
}

/// Builds nodes on a particular bus implementation
pub trait Connector {
    type Node: NetNode + 'static;

    fn connect(&self, config: &NodeConfig, listens: Arc<dyn Listens>) -> Result<Self::Node>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_address() {
        let upstream = Upstream {
            id: "T".into(),
            ip: "10.0.0.2".into(),
            port: 5560,
        };
        assert_eq!(upstream.address(), "10.0.0.2:5560");
    }
}
