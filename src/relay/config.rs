//! Relay configuration module
//!
//! Provides CLI argument parsing and validation for the relay.

use crate::task::constants::{DEFAULT_RELAY_ID, DEFAULT_RELAY_PORT};
use clap::Parser;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug, Clone)]
#[command(name = "volley-relay")]
#[command(about = "Relay and record collector for leader/follower latency sessions")]
pub struct RelayConfig {
    /// Bus id nodes address the relay by
    #[arg(long, default_value = DEFAULT_RELAY_ID)]
    pub id: String,

    /// Port nodes connect to
    #[arg(long, default_value_t = DEFAULT_RELAY_PORT)]
    pub port: u16,

    /// Append collected records to this file, one JSON object per line
    #[arg(long)]
    pub records: Option<PathBuf>,

    /// Monitor update interval in milliseconds
    #[arg(long, default_value_t = 100)]
    pub update_interval: u64,

    /// Disable terminal UI (useful for Docker/systemd/non-interactive environments)
    #[arg(long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub log_format: String,
}

impl RelayConfig {
    /// Validates the configuration values
    pub fn validate(&self) -> Result<(), String> {
        debug!("Validating relay configuration");

        if self.port == 0 {
            return Err("port must be > 0".into());
        }
        if self.id.is_empty() {
            return Err("id must not be empty".into());
        }
        if self.update_interval == 0 {
            return Err("update_interval must be > 0".into());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            ));
        }

        debug!("Relay configuration validated successfully");
        Ok(())
    }

    /// Returns true if JSON format logging is enabled
    pub fn is_json_format(&self) -> bool {
        self.log_format.to_lowercase() == "json"
    }
}
