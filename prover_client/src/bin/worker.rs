use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use prover_client::agent::ProvingAgent;
use prover_client::env::load_dotenvy_vars_if_present;
use prover_client::remote::RemoteProvingQueue;
use prover_client::retry::RetryPolicy;
use prover_client::simulated::SimulatedCircuitProver;
use tracing::info;
use url::Url;

/// Proving worker that takes jobs from a leader's queue over HTTP.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Base URL of the leader's proving queue.
    #[arg(long, env = "PROVER_QUEUE_URL")]
    queue_url: Url,
    /// How long each take request waits for a job.
    #[arg(long, env = "PROVER_POLL_TIMEOUT_MS", default_value_t = 1000)]
    poll_timeout_ms: u64,
    /// Backoff in milliseconds between retries of a failed queue request.
    #[arg(long, env = "PROVER_BACKOFF_MS", default_value_t = 500)]
    backoff_ms: u64,
    /// Maximum number of retries for a failed queue request.
    #[arg(long, env = "PROVER_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenvy_vars_if_present();
    prover_client::tracing::init();

    let args = Cli::parse();
    let retry = RetryPolicy::new(Duration::from_millis(args.backoff_ms), args.max_retries);
    let queue = Arc::new(RemoteProvingQueue::new(args.queue_url)?.with_retry(retry));
    info!("Taking jobs from {}", queue.base_url());

    let mut agent = ProvingAgent::new(
        Arc::new(SimulatedCircuitProver::new()),
        Duration::from_millis(args.poll_timeout_ms),
    );
    agent.start(queue);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, finishing the current job first");
    agent.stop().await
}
