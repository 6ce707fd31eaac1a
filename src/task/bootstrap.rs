//! Role bootstrapping: turn task parameters into a connected node with the
//! volley dispatch table installed.

use crate::node::{Connector, NetNode, NodeConfig, Upstream};
use crate::protocol::{DeliveryFlags, Message, NodeId, Route, StartRequest, TASK_NAME};
use crate::task::config::{AmbientConfig, Role, TaskParams};
use crate::task::constants::{FOLLOWER_ID, LEADER_ID};
use crate::task::error::{Result, TaskError};
use crate::task::handoff::Handoff;
use crate::task::volley::VolleyListens;
use std::sync::Arc;
use tracing::{debug, info};

/// Addressing of one task node, fixed for the task's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub role: Role,
    pub id: NodeId,
    pub upstream: NodeId,
    pub upstream_ip: String,
    pub upstream_port: u16,
    /// Leader only: port the follower dials
    pub router_port: Option<u16>,
    /// Follower only: the leader's address
    pub peer_ip: Option<String>,
}

impl NodeIdentity {
    /// Resolve addressing for the role, failing fast when a required peer
    /// address is missing.
    pub fn for_role(params: &TaskParams, ambient: &AmbientConfig) -> Result<Self> {
        match params.role {
            Role::Leader => {
                if params.follower_id.as_deref().map_or(true, str::is_empty) {
                    return Err(TaskError::Config(
                        "a leader needs the follower's id (follower_id)".into(),
                    ));
                }
                Ok(Self {
                    role: Role::Leader,
                    id: LEADER_ID.to_string(),
                    upstream: ambient.relay_id.clone(),
                    upstream_ip: ambient.relay_ip.clone(),
                    upstream_port: ambient.relay_port,
                    router_port: Some(params.router_port),
                    peer_ip: None,
                })
            }
            Role::Follower => {
                let leader_ip = params
                    .leader_ip
                    .clone()
                    .filter(|ip| !ip.is_empty())
                    .ok_or_else(|| {
                        TaskError::Config("a follower needs the leader's address (leader_ip)".into())
                    })?;
                Ok(Self {
                    role: Role::Follower,
                    id: FOLLOWER_ID.to_string(),
                    upstream: LEADER_ID.to_string(),
                    upstream_ip: leader_ip.clone(),
                    upstream_port: params.leader_port,
                    router_port: None,
                    peer_ip: Some(leader_ip),
                })
            }
        }
    }

    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            id: self.id.clone(),
            upstream: Some(Upstream {
                id: self.upstream.clone(),
                ip: self.upstream_ip.clone(),
                port: self.upstream_port,
            }),
            router_port: self.router_port,
        }
    }
}

/// The network latency task: a connected node plus the state its stage and
/// handlers share.
pub struct NetworkLatency<N: NetNode> {
    pub(crate) identity: NodeIdentity,
    pub(crate) params: TaskParams,
    pub(crate) ambient: AmbientConfig,
    pub(crate) handoff: Arc<Handoff>,
    pub(crate) node: N,
}

impl<N: NetNode + 'static> NetworkLatency<N> {
    /// Build and connect the node for `params.role`.
    ///
    /// A leader asks the follower host, through the relay, to start the
    /// follower side; a follower dials the leader and reports `READY`.
    pub fn bootstrap<C>(params: TaskParams, ambient: AmbientConfig, connector: &C) -> Result<Self>
    where
        C: Connector<Node = N>,
    {
        let identity = NodeIdentity::for_role(&params, &ambient)?;
        let handoff = Arc::new(Handoff::new());
        let listens = Arc::new(VolleyListens::new(identity.role, Arc::clone(&handoff)));

        debug!(role = %identity.role, id = %identity.id, "Bootstrapping node");
        let node = connector.connect(&identity.node_config(), listens)?;
        let task = Self {
            identity,
            params,
            ambient,
            handoff,
            node,
        };

        match task.identity.role {
            Role::Leader => task.request_follower()?,
            Role::Follower => {
                task.handoff.ready.set();
                task.node.send(
                    Route::to(task.identity.upstream.clone()),
                    Message::Ready,
                    DeliveryFlags::NONE,
                )?;
                info!(leader = ?task.identity.peer_ip, "Follower connected, READY sent");
            }
        }
        Ok(task)
    }

    fn request_follower(&self) -> Result<()> {
        let follower_id = self
            .params
            .follower_id
            .clone()
            .ok_or_else(|| TaskError::Config("follower_id missing".into()))?;
        let leader_port = self
            .node
            .router_port()
            .or(self.identity.router_port)
            .ok_or_else(|| TaskError::Config("leader has no router port".into()))?;

        let request = StartRequest {
            task: TASK_NAME.to_string(),
            leader_ip: self.ambient.host_ip.clone(),
            leader_port,
            n_messages: self.params.n_messages,
            iti_ms: self.params.iti.as_secs_f64() * 1000.0,
            subject: Some(self.ambient.subject.clone()),
            params: self.params.params.clone(),
        };
        let route = Route::through([self.identity.upstream.clone(), follower_id.clone()])?;
        self.node
            .send(route, Message::Start(request), DeliveryFlags::NO_REPEAT)?;

        info!(
            follower = %follower_id,
            relay = %self.identity.upstream,
            leader_port = leader_port,
            n_messages = self.params.n_messages,
            "Requested follower start"
        );
        Ok(())
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    /// Shared primitives, e.g. to set `quitting` from outside the stage
    pub fn handoff(&self) -> &Arc<Handoff> {
        &self.handoff
    }
}
