use std::sync::Arc;

use anyhow::{ensure, Result};
use clap::Parser;
use prover_client::agent::ProvingAgent;
use prover_client::circuit_prover::CircuitProver;
use prover_client::env::load_dotenvy_vars_if_present;
use prover_client::orchestrator::ProvingOrchestrator;
use prover_client::prover::ProverConfig;
use prover_client::queue::{MemoryProvingQueue, ProvingQueueConsumer};
use prover_client::remote::{self, RemoteProvingQueue};
use prover_client::simulated::SimulatedCircuitProver;
use prover_client::world_state::MemoryMerkleTrees;
use tracing::{error, info};

use self::leader::*;
mod leader {
    pub mod cli;
    pub mod stdio;
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenvy_vars_if_present();
    prover_client::tracing::init();

    let args = cli::Cli::parse();
    let prover_config: ProverConfig = args.prover_config.into();
    ensure!(
        prover_config.local_agents > 0 || args.queue_port.is_some() || args.queue_url.is_some(),
        "no local agents and no queue to share: nothing would ever prove"
    );

    match args.queue_url {
        Some(url) => {
            info!("Submitting proofs to the queue at {url}");
            let queue = RemoteProvingQueue::new(url)?.with_retry(prover_config.retry.clone());
            run(Arc::new(queue), args.command, &prover_config).await
        }
        None => {
            let queue = Arc::new(MemoryProvingQueue::new());
            if let Some(port) = args.queue_port {
                let queue = queue.clone();
                tokio::spawn(async move {
                    if let Err(e) = remote::serve(queue, port).await {
                        error!("Proving queue server failed: {e:#}");
                    }
                });
            }
            let outcome = run(queue.clone(), args.command, &prover_config).await;
            queue.cancel_all();
            outcome
        }
    }
}

/// Proves with `local_agents` agents serving `queue`, and the orchestrator
/// submitting to it.
async fn run<Q>(queue: Arc<Q>, command: cli::Command, prover_config: &ProverConfig) -> Result<()>
where
    Q: ProvingQueueConsumer + CircuitProver + 'static,
{
    let mut agents = (0..prover_config.local_agents)
        .map(|_| {
            ProvingAgent::new(
                Arc::new(SimulatedCircuitProver::new()),
                prover_config.poll_timeout,
            )
        })
        .collect::<Vec<_>>();
    for agent in &mut agents {
        agent.start(queue.clone());
    }
    info!("Started {} local proving agents", agents.len());

    let orchestrator = ProvingOrchestrator::new(MemoryMerkleTrees::new(), queue);

    let outcome = match command {
        cli::Command::Stdio => stdio::stdio_main(orchestrator, prover_config).await,
    };

    for agent in &mut agents {
        agent.stop().await?;
    }
    outcome
}
