use crate::protocol::StartRequest;
use crate::task::constants::*;
use crate::task::error::{Result, TaskError};
use crate::task::handoff::Timeout;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Which side of the volley this node plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => f.write_str("leader"),
            Role::Follower => f.write_str("follower"),
        }
    }
}

/// Deployment facts the task reads but never changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientConfig {
    pub relay_id: String,
    pub relay_ip: String,
    pub relay_port: u16,
    /// This node's name on the relay (pilot name)
    pub name: String,
    /// Address peers should dial to reach this host
    pub host_ip: String,
    pub subject: String,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            relay_id: DEFAULT_RELAY_ID.to_string(),
            relay_ip: "127.0.0.1".to_string(),
            relay_port: DEFAULT_RELAY_PORT,
            name: "pilot".to_string(),
            host_ip: "127.0.0.1".to_string(),
            subject: "unknown".to_string(),
        }
    }
}

/// Parameters of one latency task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskParams {
    pub role: Role,
    pub n_messages: u64,
    pub iti: Duration,
    /// Leader address, required for a follower
    pub leader_ip: Option<String>,
    pub leader_port: u16,
    /// Relay name of the follower host, required for a leader
    pub follower_id: Option<String>,
    pub router_port: u16,
    pub response_timeout: Timeout,
    pub ready_timeout: Timeout,
    /// Extra parameters of the originating call, relayed in `START`
    pub params: BTreeMap<String, String>,
}

impl TaskParams {
    pub fn leader(n_messages: u64, follower_id: impl Into<String>) -> Self {
        Self {
            follower_id: Some(follower_id.into()),
            ..Self::base(Role::Leader, n_messages)
        }
    }

    pub fn follower(n_messages: u64, leader_ip: impl Into<String>) -> Self {
        Self {
            leader_ip: Some(leader_ip.into()),
            ..Self::base(Role::Follower, n_messages)
        }
    }

    fn base(role: Role, n_messages: u64) -> Self {
        Self {
            role,
            n_messages,
            iti: Duration::from_nanos((DEFAULT_ITI_MS * 1_000_000.0) as u64),
            leader_ip: None,
            leader_port: LEADER_PORT,
            follower_id: None,
            router_port: LEADER_PORT,
            response_timeout: Timeout::Infinite,
            ready_timeout: Timeout::Infinite,
            params: BTreeMap::new(),
        }
    }

    /// Follower parameters from a relayed remote-start instruction
    pub fn from_start(request: &StartRequest) -> Result<Self> {
        Ok(Self {
            leader_port: request.leader_port,
            iti: iti_from_ms(request.iti_ms)?,
            params: request.params.clone(),
            ..Self::follower(request.n_messages, request.leader_ip.clone())
        })
    }

    pub fn with_iti(mut self, iti: Duration) -> Self {
        self.iti = iti;
        self
    }

    pub fn with_router_port(mut self, port: u16) -> Self {
        self.router_port = port;
        self
    }

    pub fn with_leader_port(mut self, port: u16) -> Self {
        self.leader_port = port;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Timeout) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Timeout) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// Inter-trial interval from fractional milliseconds
pub fn iti_from_ms(ms: f64) -> Result<Duration> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(TaskError::Config(format!(
            "iti must be a non-negative number, got {}",
            ms
        )));
    }
    Ok(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[derive(Parser, Debug, Clone)]
#[command(name = "volley-node")]
#[command(about = "Leader/follower round-trip latency measurement over a relay bus")]
pub struct NodeCli {
    #[command(subcommand)]
    pub command: RoleCommand,

    #[command(flatten)]
    pub ambient: AmbientArgs,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, default_value = "text", value_parser = ["text", "json"], global = true)]
    pub log_format: String,
}

#[derive(Args, Debug, Clone)]
pub struct AmbientArgs {
    /// Relay address
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub relay_ip: String,

    /// Relay port
    #[arg(long, default_value_t = DEFAULT_RELAY_PORT, global = true)]
    pub relay_port: u16,

    /// Relay bus id
    #[arg(long, default_value = DEFAULT_RELAY_ID, global = true)]
    pub relay_id: String,

    /// This host's name on the relay
    #[arg(long, default_value = "pilot", global = true)]
    pub name: String,

    /// Address peers use to reach this host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host_ip: String,

    /// Subject identifier stamped on every record
    #[arg(long, default_value = "unknown", global = true)]
    pub subject: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RoleCommand {
    /// Drive the volleys against a follower host reached through the relay
    Leader {
        /// Number of messages to send back and forth
        #[arg(long)]
        n_messages: u64,

        /// Inter-trial interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_ITI_MS)]
        iti_ms: f64,

        /// Relay name of the follower host
        #[arg(long)]
        follower_id: Option<String>,

        /// Port the follower dials back on
        #[arg(long, default_value_t = LEADER_PORT)]
        router_port: u16,

        /// Give up on a RESPONSE after this many milliseconds (default: wait forever)
        #[arg(long)]
        response_timeout_ms: Option<u64>,

        /// Give up on READY after this many milliseconds (default: wait forever)
        #[arg(long)]
        ready_timeout_ms: Option<u64>,

        /// Extra start parameter relayed to the follower, as key=value
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Disable the progress bar and summary
        #[arg(long)]
        quiet: bool,
    },

    /// Answer volleys from a leader, dialing it directly
    Follower {
        /// Leader address
        #[arg(long)]
        leader_ip: Option<String>,

        /// Leader router port
        #[arg(long, default_value_t = LEADER_PORT)]
        leader_port: u16,

        /// Number of messages the leader will send
        #[arg(long, default_value_t = 0)]
        n_messages: u64,
    },

    /// Wait on the relay for remote-start instructions and run as follower
    Agent,
}

impl NodeCli {
    pub fn ambient(&self) -> AmbientConfig {
        AmbientConfig {
            relay_id: self.ambient.relay_id.clone(),
            relay_ip: self.ambient.relay_ip.clone(),
            relay_port: self.ambient.relay_port,
            name: self.ambient.name.clone(),
            host_ip: self.ambient.host_ip.clone(),
            subject: self.ambient.subject.clone(),
        }
    }

    /// Task parameters for the leader/follower commands, `None` for the agent
    pub fn params(&self) -> Result<Option<TaskParams>> {
        let params = match &self.command {
            RoleCommand::Leader {
                n_messages,
                iti_ms,
                follower_id,
                router_port,
                response_timeout_ms,
                ready_timeout_ms,
                params,
                ..
            } => TaskParams {
                follower_id: follower_id.clone(),
                iti: iti_from_ms(*iti_ms)?,
                router_port: *router_port,
                response_timeout: Timeout::from_millis(*response_timeout_ms),
                ready_timeout: Timeout::from_millis(*ready_timeout_ms),
                params: params.iter().cloned().collect(),
                ..TaskParams::base(Role::Leader, *n_messages)
            },
            RoleCommand::Follower {
                leader_ip,
                leader_port,
                n_messages,
            } => TaskParams {
                leader_ip: leader_ip.clone(),
                leader_port: *leader_port,
                ..TaskParams::base(Role::Follower, *n_messages)
            },
            RoleCommand::Agent => return Ok(None),
        };
        Ok(Some(params))
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.command, RoleCommand::Leader { quiet: true, .. })
    }

    pub fn is_json_format(&self) -> bool {
        self.log_format.to_lowercase() == "json"
    }

    /// Validates the configuration values
    pub fn validate(&self) -> Result<()> {
        debug!("Validating node configuration");

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(TaskError::Config(format!(
                "log_level must be one of: {}",
                valid_levels.join(", ")
            )));
        }
        if self.ambient.relay_port == 0 {
            return Err(TaskError::Config("relay_port must be > 0".into()));
        }
        if let RoleCommand::Leader { iti_ms, .. } = &self.command {
            iti_from_ms(*iti_ms)?;
        }

        debug!("Node configuration validated successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_cli() {
        let cli = NodeCli::try_parse_from([
            "volley-node",
            "--subject",
            "mouse_7",
            "leader",
            "--n-messages",
            "50",
            "--follower-id",
            "pilot_2",
            "--iti-ms",
            "5",
            "--response-timeout-ms",
            "1000",
            "--param",
            "session=3",
        ])
        .unwrap();
        assert!(cli.validate().is_ok());
        assert_eq!(cli.ambient().subject, "mouse_7");

        let params = cli.params().unwrap().unwrap();
        assert_eq!(params.role, Role::Leader);
        assert_eq!(params.n_messages, 50);
        assert_eq!(params.follower_id.as_deref(), Some("pilot_2"));
        assert_eq!(params.iti, Duration::from_millis(5));
        assert_eq!(
            params.response_timeout,
            Timeout::Duration(Duration::from_secs(1))
        );
        assert_eq!(params.ready_timeout, Timeout::Infinite);
        assert_eq!(params.params.get("session").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_follower_and_agent_cli() {
        let cli = NodeCli::try_parse_from(["volley-node", "follower", "--leader-ip", "10.0.0.5"])
            .unwrap();
        let params = cli.params().unwrap().unwrap();
        assert_eq!(params.role, Role::Follower);
        assert_eq!(params.leader_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(params.leader_port, LEADER_PORT);

        let cli = NodeCli::try_parse_from(["volley-node", "agent", "--name", "pilot_2"]).unwrap();
        assert!(cli.params().unwrap().is_none());
        assert_eq!(cli.ambient().name, "pilot_2");
    }

    #[test]
    fn test_invalid_values() {
        let cli = NodeCli::try_parse_from([
            "volley-node",
            "leader",
            "--n-messages",
            "3",
            "--iti-ms=-1",
        ])
        .unwrap();
        assert!(matches!(cli.validate(), Err(TaskError::Config(_))));

        let cli = NodeCli::try_parse_from(["volley-node", "agent", "--log-level", "loud"]).unwrap();
        assert!(cli.validate().is_err());

        assert!(NodeCli::try_parse_from(["volley-node", "leader", "--param", "novalue"]).is_err());
    }

    #[test]
    fn test_params_from_start() {
        let request = StartRequest {
            task: crate::protocol::TASK_NAME.to_string(),
            leader_ip: "10.0.0.1".into(),
            leader_port: 6000,
            n_messages: 12,
            iti_ms: 2.5,
            subject: None,
            params: BTreeMap::from([("k".to_string(), "v".to_string())]),
        };
        let params = TaskParams::from_start(&request).unwrap();
        assert_eq!(params.role, Role::Follower);
        assert_eq!(params.leader_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(params.leader_port, 6000);
        assert_eq!(params.n_messages, 12);
        assert_eq!(params.iti, Duration::from_micros(2500));
        assert_eq!(params.params.len(), 1);

        let bad = StartRequest {
            iti_ms: f64::NAN,
            ..request
        };
        assert!(TaskParams::from_start(&bad).is_err());
    }
}
