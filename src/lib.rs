//! Volley - leader/follower round-trip latency measurement
//!
//! A leader sends timestamped `CALL`s to a follower over a message bus; the
//! follower answers each with the time it received it, and the leader turns
//! every exchange into a latency record. A central relay connects the nodes,
//! forwards the remote-start instruction to the follower's host, and collects
//! the records.

pub mod agent;
pub mod logging;
pub mod node;
pub mod protocol;
pub mod relay;
pub mod task;
