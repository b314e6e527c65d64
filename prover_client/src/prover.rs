pub mod cli;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use rollup_common::Fr;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;
use tracing::{error, info};

use crate::circuit_prover::CircuitProver;
use crate::circuits::GlobalVariables;
use crate::fs::write_proof_to_dir;
use crate::orchestrator::ProvingOrchestrator;
use crate::proof_types::BlockResult;
use crate::proving_state::ProvingOutcome;
use crate::retry::RetryPolicy;
use crate::tx::ProcessedTx;
use crate::world_state::MerkleTreeOperations;

#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Number of in-process agents serving the proving queue.
    pub local_agents: usize,
    pub poll_timeout: Duration,
    pub proof_output_dir: PathBuf,
    /// Applied to requests sent to a remote proving queue.
    pub retry: RetryPolicy,
}

/// Everything needed to build and prove one block.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlockProverInput {
    pub global_variables: GlobalVariables,
    #[serde(default)]
    pub l1_to_l2_messages: Vec<Fr>,
    pub txs: Vec<ProcessedTx>,
    /// Number of leaves to prove. Derived from `txs` when absent.
    #[serde(default)]
    pub num_txs: Option<usize>,
}

impl BlockProverInput {
    pub fn get_block_number(&self) -> u64 {
        self.global_variables.block_number
    }

    /// The smallest valid block size holding every transaction, unless one
    /// was requested explicitly.
    pub fn block_size(&self) -> usize {
        self.num_txs
            .unwrap_or_else(|| self.txs.len().max(2).next_power_of_two())
    }

    pub async fn prove<D, P>(
        self,
        orchestrator: &mut ProvingOrchestrator<D, P>,
    ) -> Result<BlockResult>
    where
        D: MerkleTreeOperations,
        P: CircuitProver + 'static,
    {
        let block_number = self.get_block_number();
        let ticket = orchestrator
            .start_block(
                self.block_size(),
                self.global_variables,
                self.l1_to_l2_messages,
                ProcessedTx::empty(),
            )
            .await
            .with_context(|| format!("failed to start block {block_number}"))?;

        for tx in self.txs {
            let hash = tx.hash;
            if let Err(e) = orchestrator.add_transaction(tx).await {
                orchestrator.cancel_block();
                return Err(e).with_context(|| {
                    format!("failed to add transaction {hash} to block {block_number}")
                });
            }
        }
        orchestrator.complete_block().await?;

        match ticket.await {
            ProvingOutcome::Success => {}
            ProvingOutcome::Failure { reason } => {
                bail!("failed to prove block {block_number}: {reason}")
            }
        }

        let result = orchestrator.finalize_block().await?;
        info!("Successfully proved block {block_number}");
        Ok(result)
    }
}

/// Proves the received blocks one after another, writing each proof to the
/// configured output directory. Returns the numbers of the proven blocks.
pub async fn prove<D, P>(
    mut block_receiver: Receiver<BlockProverInput>,
    mut orchestrator: ProvingOrchestrator<D, P>,
    prover_config: &ProverConfig,
) -> Result<Vec<u64>>
where
    D: MerkleTreeOperations,
    P: CircuitProver + 'static,
{
    let mut proven = Vec::new();
    while let Some(block) = block_receiver.recv().await {
        let block_number = block.get_block_number();
        info!("Proving block {block_number}");
        let result = block
            .prove(&mut orchestrator)
            .await
            .inspect_err(|e| error!("failed to generate proof for block {block_number}: {e:#}"))?;
        write_proof_to_dir(&prover_config.proof_output_dir, &result).await?;
        proven.push(block_number);
    }
    Ok(proven)
}
