use crate::protocol::error::Result;
use crate::protocol::route::{NodeId, Route};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Task name carried by remote-start instructions for this protocol
pub const TASK_NAME: &str = "network_latency";

/// Message keys understood on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Ready,
    Stop,
    Call,
    Response,
    Init,
    Start,
    Data,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            MessageKey::Ready => "READY",
            MessageKey::Stop => "STOP",
            MessageKey::Call => "CALL",
            MessageKey::Response => "RESPONSE",
            MessageKey::Init => "INIT",
            MessageKey::Start => "START",
            MessageKey::Data => "DATA",
        };
        f.write_str(key)
    }
}

/// Follower's answer to a `CALL`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub message_number: u64,
    pub recv_time: DateTime<Utc>,
}

/// Instruction, relayed through the relay, telling a follower host to
/// instantiate the protocol in the follower role and dial the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub task: String,
    pub leader_ip: String,
    pub leader_port: u16,
    pub n_messages: u64,
    pub iti_ms: f64,
    #[serde(default)]
    pub subject: Option<String>,
    /// Parameters of the leader's originating call, forwarded untouched
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// One completed volley
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolleyRecord {
    pub send_time: DateTime<Utc>,
    pub recv_time: DateTime<Utc>,
    pub latency_ms: f64,
    pub trial_num: u64,
    pub subject: String,
    pub pilot: String,
    #[serde(rename = "TRIAL_END")]
    pub trial_end: bool,
}

impl VolleyRecord {
    /// Build a terminal-trial record, deriving latency from the two timestamps
    pub fn new(
        trial_num: u64,
        send_time: DateTime<Utc>,
        recv_time: DateTime<Utc>,
        subject: &str,
        pilot: &str,
    ) -> Self {
        Self {
            send_time,
            recv_time,
            latency_ms: latency_ms(send_time, recv_time),
            trial_num,
            subject: subject.to_string(),
            pilot: pilot.to_string(),
            trial_end: true,
        }
    }
}

/// `recv - send` in fractional milliseconds
pub fn latency_ms(send: DateTime<Utc>, recv: DateTime<Utc>) -> f64 {
    let delta = recv - send;
    match delta.num_nanoseconds() {
        Some(ns) => ns as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64,
    }
}

/// Everything that can travel over the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "key", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Ready,
    Stop,
    Call { message_number: u64 },
    Response(CallResponse),
    /// Presence announcement sent when a node dials its upstream or a router
    Init { id: NodeId },
    Start(StartRequest),
    Data(VolleyRecord),
}

impl Message {
    pub fn key(&self) -> MessageKey {
        match self {
            Message::Ready => MessageKey::Ready,
            Message::Stop => MessageKey::Stop,
            Message::Call { .. } => MessageKey::Call,
            Message::Response(_) => MessageKey::Response,
            Message::Init { .. } => MessageKey::Init,
            Message::Start(_) => MessageKey::Start,
            Message::Data(_) => MessageKey::Data,
        }
    }
}

/// Per-message delivery hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFlags {
    /// A retransmitted copy of this envelope must not reach the handler again
    #[serde(default)]
    pub no_repeat: bool,
}

impl DeliveryFlags {
    pub const NONE: DeliveryFlags = DeliveryFlags { no_repeat: false };
    pub const NO_REPEAT: DeliveryFlags = DeliveryFlags { no_repeat: true };
}

/// A message in flight, with its addressing and delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Monotonic per sender; together with `sender` identifies retransmissions
    pub id: u64,
    pub sender: NodeId,
    pub route: Route,
    pub message: Message,
    #[serde(default)]
    pub flags: DeliveryFlags,
}

impl Envelope {
    /// Encode as a single newline-terminated JSON frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }

    /// Decode one frame (trailing newline optional)
    pub fn decode(frame: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame.trim_end())?;
        debug!(
            id = envelope.id,
            sender = %envelope.sender,
            key = %envelope.message.key(),
            "Envelope decoded"
        );
        Ok(envelope)
    }

    /// Same envelope handed on to the next hop
    pub fn forwarded(&self, route: Route) -> Self {
        Self {
            route,
            ..self.clone()
        }
    }
}
