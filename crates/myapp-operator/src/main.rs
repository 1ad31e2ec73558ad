//! MyApp operator entry point.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use myapp_operator::config::OperatorConfig;
use myapp_operator::leader_election::{self, LeaderStatus};
use myapp_operator::metrics::{self, PrometheusMetrics};
use myapp_operator::{controller, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();
    config.validate()?;
    telemetry::init(&config.log_level, config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting MyApp operator");

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let metrics = Arc::new(PrometheusMetrics::new().context("failed to register metrics")?);
    {
        let metrics = metrics.clone();
        let addr = config.metrics_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, metrics).await {
                error!("Metrics server error: {e}");
            }
        });
    }

    let shutdown = CancellationToken::new();
    let leader = LeaderStatus::new();
    let election = config.leader_election_config();

    if config.leader_election {
        info!(
            holder = %election.holder_id,
            lease = %election.lease_name,
            namespace = %election.namespace,
            "Leader election enabled"
        );
        tokio::spawn(leader_election::run(
            client.clone(),
            election.clone(),
            leader.clone(),
            shutdown.clone(),
        ));
    } else {
        info!("Leader election disabled, running as leader");
        leader.force_leader();
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {e}"),
            }
        });
    }

    controller::run(client.clone(), metrics, leader, shutdown.clone()).await;

    shutdown.cancel();
    if config.leader_election {
        leader_election::step_down(&client, &election).await;
    }

    info!("MyApp operator stopped");
    Ok(())
}
