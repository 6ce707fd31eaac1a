use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::time::Instant;
use tracing::{error, info, warn};
use volley::agent::Agent;
use volley::logging::init_logging_with_config;
use volley::node::TcpConnector;
use volley::protocol::{Route, VolleyRecord};
use volley::task::{
    AmbientConfig, CollectorSink, NetworkLatency, NodeCli, ProgressSink, Reporter, Role,
    Statistics, TaskParams, Timeout, VolleyOutcome,
};

fn main() {
    // Parse CLI arguments
    let cli = NodeCli::parse();

    init_logging_with_config(&cli.log_level, cli.is_json_format());

    if let Err(e) = cli.validate() {
        error!(error = %e, "Invalid configuration");
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&cli) {
        error!(error = %e, "Node failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &NodeCli) -> Result<()> {
    let ambient = cli.ambient();
    match cli.params()? {
        Some(params) if params.role == Role::Leader => run_leader(params, ambient, cli.is_quiet()),
        Some(params) => run_follower(params, ambient),
        None => run_agent(ambient),
    }
}

fn run_leader(params: TaskParams, ambient: AmbientConfig, quiet: bool) -> Result<()> {
    let requested = params.n_messages;
    let collector = Route::to(ambient.relay_id.clone());

    if !quiet {
        println!("{}", "Volley Latency Session".bold());
        println!(
            "Relay: {}:{}  Follower: {}\n",
            ambient.relay_ip,
            ambient.relay_port,
            params.follower_id.as_deref().unwrap_or("?")
        );
    }

    let task = NetworkLatency::bootstrap(params, ambient, &TcpConnector)
        .context("Failed to bootstrap leader")?;

    let start = Instant::now();
    let (outcome, records) = if quiet {
        let mut sink = CollectorSink::new(task.node(), collector);
        let outcome = task.volley(&mut sink);
        report_undelivered(sink.undelivered());
        (outcome, sink.into_records())
    } else {
        let mut sink = ProgressSink::new(CollectorSink::new(task.node(), collector), requested)?;
        let outcome = task.volley(&mut sink);
        let sink = sink.finish();
        report_undelivered(sink.undelivered());
        (outcome, sink.into_records())
    };
    let elapsed = start.elapsed();
    task.end();

    let outcome = outcome?;
    if quiet {
        info!(
            completed = outcome.completed,
            mismatches = outcome.mismatches,
            elapsed_ms = elapsed.as_millis() as u64,
            "Session finished"
        );
        return Ok(());
    }
    print_summary(&outcome, requested, elapsed, &records)
}

fn print_summary(
    outcome: &VolleyOutcome,
    requested: u64,
    elapsed: std::time::Duration,
    records: &[VolleyRecord],
) -> Result<()> {
    let stats = Statistics::from_records(records)?;
    Reporter.print_results(&stats, outcome, requested, elapsed, records)?;
    Ok(())
}

fn report_undelivered(undelivered: usize) {
    if undelivered > 0 {
        warn!(undelivered = undelivered, "Some records never reached the relay");
    }
}

fn run_follower(params: TaskParams, ambient: AmbientConfig) -> Result<()> {
    let task = NetworkLatency::bootstrap(params, ambient, &TcpConnector)
        .context("Failed to bootstrap follower")?;
    let mut records: Vec<VolleyRecord> = Vec::new();
    let outcome = task.volley(&mut records);
    task.end();
    outcome?;
    Ok(())
}

fn run_agent(ambient: AmbientConfig) -> Result<()> {
    let name = ambient.name.clone();
    let agent = Agent::connect(&TcpConnector, ambient).context("Failed to attach to relay")?;
    info!(name = %name, "Waiting for start requests");

    while let Some(request) = agent.next_start(Timeout::Infinite) {
        if let Err(e) = agent.run_session(&TcpConnector, &request) {
            warn!(error = %e, leader = %request.leader_ip, "Follower session failed");
        }
    }

    agent.release();
    Ok(())
}

