//! Protocol module: messages, routes and envelope framing

pub mod error;
pub mod message;
pub mod route;

pub use error::{ProtocolError, Result as ProtocolResult};
pub use message::{
    latency_ms, CallResponse, DeliveryFlags, Envelope, Message, MessageKey, StartRequest,
    VolleyRecord, TASK_NAME,
};
pub use route::{NodeId, Route};
