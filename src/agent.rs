//! Follower host: stays attached to the relay under its own name and turns
//! each remote-start instruction into a follower session.

use crate::node::{Connector, Listens, NetNode, NodeConfig, Outbox, Upstream};
use crate::protocol::{Envelope, Message, StartRequest, VolleyRecord, TASK_NAME};
use crate::task::{
    AmbientConfig, NetworkLatency, Result, TaskParams, Timeout, VolleyOutcome,
};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct AgentListens {
    starts: Sender<StartRequest>,
}

impl Listens for AgentListens {
    fn on_message(&self, envelope: &Envelope, _outbox: &dyn Outbox) {
        match &envelope.message {
            Message::Start(request) if request.task == TASK_NAME => {
                match self.starts.try_send(request.clone()) {
                    Ok(()) => info!(
                        sender = %envelope.sender,
                        leader = %request.leader_ip,
                        n_messages = request.n_messages,
                        "Start request received"
                    ),
                    Err(TrySendError::Full(_)) => {
                        warn!(sender = %envelope.sender, "Session already pending, ignoring start")
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("Agent stopped, ignoring start")
                    }
                }
            }
            Message::Start(request) => {
                warn!(task = %request.task, "Start request for an unknown task");
            }
            Message::Ready
            | Message::Stop
            | Message::Call { .. }
            | Message::Response(_)
            | Message::Init { .. }
            | Message::Data(_) => {
                debug!(key = %envelope.message.key(), "Agent ignoring message");
            }
        }
    }
}

/// Follower host attached to the relay
pub struct Agent<N: NetNode> {
    node: N,
    starts: Receiver<StartRequest>,
    ambient: AmbientConfig,
}

impl<N: NetNode + 'static> Agent<N> {
    /// Attach to the relay as `ambient.name`
    pub fn connect<C>(connector: &C, ambient: AmbientConfig) -> Result<Self>
    where
        C: Connector<Node = N>,
    {
        let (tx, rx) = channel::bounded(1);
        let config = NodeConfig {
            id: ambient.name.clone(),
            upstream: Some(Upstream {
                id: ambient.relay_id.clone(),
                ip: ambient.relay_ip.clone(),
                port: ambient.relay_port,
            }),
            router_port: None,
        };
        let node = connector.connect(&config, Arc::new(AgentListens { starts: tx }))?;
        info!(name = %ambient.name, relay = %ambient.relay_id, "Agent attached to relay");

        Ok(Self {
            node,
            starts: rx,
            ambient,
        })
    }

    /// Wait for the next start request
    pub fn next_start(&self, timeout: Timeout) -> Option<StartRequest> {
        match timeout {
            Timeout::Infinite => self.starts.recv().ok(),
            Timeout::Duration(d) => self.starts.recv_timeout(d).ok(),
        }
    }

    /// Run one follower session for `request` until the leader stops it
    pub fn run_session<C: Connector>(
        &self,
        connector: &C,
        request: &StartRequest,
    ) -> Result<VolleyOutcome> {
        let params = TaskParams::from_start(request)?;
        let mut ambient = self.ambient.clone();
        if let Some(subject) = &request.subject {
            ambient.subject = subject.clone();
        }

        let task = NetworkLatency::bootstrap(params, ambient, connector)?;
        let mut records: Vec<VolleyRecord> = Vec::new();
        let outcome = task.volley(&mut records);
        task.end();
        info!(name = %self.ambient.name, "Follower session finished");
        outcome
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn release(&self) {
        self.node.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MockOutbox;
    use crate::protocol::{DeliveryFlags, Route};
    use std::collections::BTreeMap;

    fn start(task: &str) -> Envelope {
        Envelope {
            id: 0,
            sender: "leader".into(),
            route: Route::to("pilot_1"),
            message: Message::Start(StartRequest {
                task: task.to_string(),
                leader_ip: "127.0.0.1".into(),
                leader_port: 5580,
                n_messages: 3,
                iti_ms: 0.0,
                subject: None,
                params: BTreeMap::new(),
            }),
            flags: DeliveryFlags::NO_REPEAT,
        }
    }

    #[test]
    fn test_agent_queues_one_start() {
        let (tx, rx) = channel::bounded(1);
        let listens = AgentListens { starts: tx };
        let outbox = MockOutbox::new();

        listens.on_message(&start(TASK_NAME), &outbox);
        listens.on_message(&start(TASK_NAME), &outbox);
        listens.on_message(&start("other_task"), &outbox);

        assert_eq!(rx.len(), 1);
        assert_eq!(rx.recv().unwrap().n_messages, 3);
    }
}
