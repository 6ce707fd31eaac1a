//! Constants used by the latency task

/// Bus id of the node driving the volleys
pub const LEADER_ID: &str = "leader";

/// Bus id of the node answering the volleys
pub const FOLLOWER_ID: &str = "follower";

/// Router port a leader binds for its follower
pub const LEADER_PORT: u16 = 5580;

/// Bus id of the central relay
pub const DEFAULT_RELAY_ID: &str = "T";

/// Port the relay accepts node connections on
pub const DEFAULT_RELAY_PORT: u16 = 5560;

/// Inter-trial interval in milliseconds
pub const DEFAULT_ITI_MS: f64 = 100.0;

/// Histogram lower bound in microseconds
pub const HISTOGRAM_LOW_BOUND_US: u64 = 1;

/// Histogram upper bound in microseconds (one minute)
pub const HISTOGRAM_HIGH_BOUND_US: u64 = 60_000_000;

/// Histogram significant digits for precision
pub const HISTOGRAM_SIGNIFICANT_DIGITS: u8 = 3;

/// Progress bar tick interval in milliseconds
pub const PROGRESS_TICK_INTERVAL_MS: u64 = 100;

/// Live statistics refresh interval in milliseconds
pub const LIVE_STATS_UPDATE_INTERVAL_MS: u64 = 500;

/// Latency below this is shown green
pub const GOOD_LATENCY_MS: f64 = 2.0;

/// Latency below this is shown yellow, above it red
pub const ACCEPTABLE_LATENCY_MS: f64 = 10.0;
