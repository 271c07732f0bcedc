// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topology Planner
//!
//! Builds the topology described by `TOPOLOGY_*` environment variables (or a
//! JSON file named by `TOPOLOGY_CONFIG`) and prints the resource graph for an
//! external reconciler, followed by the application outputs.
//!
//! Run with: cargo run --bin topology-plan
//!
//! Nothing is created; a failed build exits non-zero with the reason.

use anyhow::{Context, Result};
use cim_topology::{TopologyBuilder, TopologyConfig};
use tracing::info;

fn load_config() -> Result<TopologyConfig> {
    match std::env::var("TOPOLOGY_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path))?;
            TopologyConfig::from_json(&raw).with_context(|| format!("Invalid configuration in {}", path))
        }
        Err(_) => TopologyConfig::from_env().context("Invalid TOPOLOGY_* environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = load_config()?;
    info!("Configuration loaded:");
    info!("  - Environment: {}", config.environment);
    info!("  - Region: {}", config.region);
    info!("  - Network: {} across {} zones", config.cidr, config.az_count);
    info!("  - Instances: {} x {}", config.instance_count, config.instance_class);

    let topology = TopologyBuilder::new(config)
        .build()
        .context("Failed to build topology")?;

    let graph = serde_json::to_string_pretty(&topology.to_graph())?;
    println!("{}", graph);

    let outputs = topology.outputs();
    info!("Proxy endpoint: {}", outputs.proxy_endpoint);
    info!("Admin secret: {}", outputs.credential);
    for (key, value) in outputs.environment_variables() {
        info!("  {}={}", key, value);
    }
    info!("Retrieve credentials on the bastion with:");
    info!("  {}", topology.bastion().retrieval_command());
    info!(
        "Teardown order: {}",
        topology
            .teardown_order()
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
