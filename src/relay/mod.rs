//! Relay: the central hop nodes attach to, and the collector of volley records

pub mod collector;
pub mod config;
pub mod monitor;

pub use collector::Collector;
pub use config::RelayConfig;
pub use monitor::{RelayCounters, RelayMonitor, RelayStats};
