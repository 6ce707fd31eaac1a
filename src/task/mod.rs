//! Network latency task: leader/follower volleys over the bus

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod handoff;
pub mod progress;
pub mod reporter;
pub mod sink;
pub mod statistics;
pub mod volley;

pub use bootstrap::{NetworkLatency, NodeIdentity};
pub use config::{AmbientConfig, NodeCli, Role, RoleCommand, TaskParams};
pub use constants::*;
pub use error::{Result, TaskError};
pub use handoff::{Handoff, ResponseSlot, Signal, Timeout};
pub use progress::ProgressSink;
pub use reporter::Reporter;
pub use sink::{CollectorSink, RecordSink};
pub use statistics::Statistics;
pub use volley::{VolleyListens, VolleyOutcome};
