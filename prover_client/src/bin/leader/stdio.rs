use std::io::Read;

use anyhow::{anyhow, Result};
use prover_client::circuit_prover::CircuitProver;
use prover_client::orchestrator::ProvingOrchestrator;
use prover_client::prover::{self, BlockProverInput, ProverConfig};
use prover_client::world_state::MerkleTreeOperations;
use tokio::sync::mpsc;
use tracing::info;

/// The main function for the stdio mode.
pub(crate) async fn stdio_main<D, P>(
    orchestrator: ProvingOrchestrator<D, P>,
    prover_config: &ProverConfig,
) -> Result<()>
where
    D: MerkleTreeOperations,
    P: CircuitProver + 'static,
{
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer)?;

    let des = &mut serde_json::Deserializer::from_str(&buffer);
    let block_prover_inputs = serde_path_to_error::deserialize::<_, Vec<BlockProverInput>>(des)?;

    let (block_tx, block_rx) = mpsc::channel(prover_client::BLOCK_CHANNEL_SIZE);
    let proving = prover::prove(block_rx, orchestrator, prover_config);

    let feeding = async move {
        for block_prover_input in block_prover_inputs {
            block_tx
                .send(block_prover_input)
                .await
                .map_err(|e| anyhow!("Failed to send block prover input through the channel: {e}"))?;
        }
        Ok::<(), anyhow::Error>(())
    };

    let (proven, ()) = tokio::try_join!(proving, feeding)?;
    info!("All {} proofs have been generated successfully.", proven.len());
    Ok(())
}
