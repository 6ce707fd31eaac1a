use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use volley::logging::init_logging_with_config;
use volley::node::{NetNode, NodeConfig, NodeError, TcpNode};
use volley::relay::{Collector, RelayConfig, RelayMonitor};

fn main() {
    // Parse CLI arguments
    let config = RelayConfig::parse();

    init_logging_with_config(&config.log_level, config.is_json_format());

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config) {
        error!(error = %e, "Relay failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config: RelayConfig) -> Result<()> {
    let monitor = RelayMonitor::new(config.update_interval);
    let collector = match &config.records {
        Some(path) => Collector::with_output(monitor.counters(), path)
            .with_context(|| format!("Failed to open records file {}", path.display()))?,
        None => Collector::new(monitor.counters()),
    };

    let node_config = NodeConfig {
        id: config.id.clone(),
        upstream: None,
        router_port: Some(config.port),
    };
    let node = TcpNode::connect(&node_config, Arc::new(collector)).map_err(|e| match e {
        NodeError::Bind { port, source } if source.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::anyhow!(
                "Failed to bind to port {}: Address already in use. Try a different port or ensure no other process is using it.",
                port
            )
        }
        other => anyhow::Error::new(other).context("Failed to start relay node"),
    })?;

    info!(
        id = %node.id(),
        port = ?node.router_port(),
        update_interval_ms = config.update_interval,
        quiet_mode = config.quiet,
        "Relay listening"
    );

    if !config.quiet {
        monitor.start_display();
    } else {
        info!("Running in quiet mode (terminal UI disabled)");
    }

    info!("Ready to route messages and collect records...");

    // bus threads do the work; keep the node alive
    loop {
        thread::park();
    }
}
