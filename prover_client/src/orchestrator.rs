//! Drives the proving of one block at a time.
//!
//! Public operations do their bookkeeping and world-state updates inline,
//! then hand proof requests to a scheduler, which runs each of them as its
//! own task and reacts to the result by filling session slots
//! and dispatching whatever became ready.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt as _;
use rollup_common::{Fr, NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP, NUM_BASE_PARITY_PER_ROOT_PARITY};
use tracing::{debug, error, info, info_span, Instrument as _};

use crate::block_building::{
    self, build_base_rollup_input, create_merge_rollup_inputs, get_root_rollup_input,
    validate_partial_state, validate_root_output, BaseOrMergeOutput,
};
use crate::circuit_prover::{AbortSignal, CircuitProver};
use crate::circuits::{
    BaseParityInputs, BaseRollupInputs, GlobalVariables, MergeRollupInputs, PartialStateReference,
    RootParityInput, RootParityInputs, RootRollupPublicInputs,
};
use crate::error::{panic_message, OrchestratorError, Result};
use crate::proof_types::{BlockResult, PublicInputsAndProof};
use crate::proving_state::{ProvingState, ProvingStatus, ProvingTicket, RootRollupParts};
use crate::tx::{Body, L2Block, ProcessedTx};
use crate::world_state::{MerkleTreeId, MerkleTreeOperations};

pub struct ProvingOrchestrator<D, P> {
    db: D,
    scheduler: ProvingScheduler<P>,
    proving_state: Option<Arc<ProvingState>>,
}

impl<D, P> ProvingOrchestrator<D, P>
where
    D: MerkleTreeOperations,
    P: CircuitProver + 'static,
{
    pub fn new(db: D, prover: P) -> Self {
        Self {
            db,
            scheduler: ProvingScheduler {
                prover: Arc::new(prover),
            },
            proving_state: None,
        }
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    pub fn prover(&self) -> &Arc<P> {
        &self.scheduler.prover
    }

    /// The session of the most recently started block, if any.
    pub fn proving_state(&self) -> Option<&Arc<ProvingState>> {
        self.proving_state.as_ref()
    }

    pub fn status(&self) -> Option<ProvingStatus> {
        self.proving_state.as_ref().map(|state| state.status())
    }

    /// Starts proving a new block of `num_txs` transactions, superseding any
    /// block still in progress.
    ///
    /// The messages are padded and inserted into the message tree right
    /// away, and the parity circuits are dispatched before any transaction
    /// arrives.
    pub async fn start_block(
        &mut self,
        num_txs: usize,
        global_variables: GlobalVariables,
        l1_to_l2_messages: Vec<Fr>,
        padding_tx: ProcessedTx,
    ) -> Result<ProvingTicket> {
        if num_txs < 2 || !num_txs.is_power_of_two() {
            return Err(OrchestratorError::InvalidBlockSize(num_txs));
        }
        if l1_to_l2_messages.len() > NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP {
            return Err(OrchestratorError::TooManyMessages {
                got: l1_to_l2_messages.len(),
                max: NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP,
            });
        }
        if !padding_tx.is_empty() {
            return Err(OrchestratorError::InvalidPaddingTransaction);
        }

        self.cancel_block();

        let mut messages = [Fr::ZERO; NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP];
        messages[..l1_to_l2_messages.len()].copy_from_slice(&l1_to_l2_messages);

        let message_tree = self
            .db
            .get_tree_info(MerkleTreeId::L1ToL2MessageTree)
            .await?;
        self.db
            .append_leaves(MerkleTreeId::L1ToL2MessageTree, &messages)
            .await?;
        let archive = self.db.get_tree_info(MerkleTreeId::Archive).await?;

        let (state, ticket) = ProvingState::new(
            num_txs,
            global_variables,
            messages.to_vec(),
            message_tree,
            archive,
            padding_tx,
        );
        let state = Arc::new(state);
        self.proving_state = Some(state.clone());

        info!(
            "Starting block {} with {num_txs} transactions and {} messages",
            global_variables.block_number,
            l1_to_l2_messages.len()
        );

        for i in 0..NUM_BASE_PARITY_PER_ROOT_PARITY {
            self.scheduler
                .run_base_parity(&state, i, BaseParityInputs::from_slice(&messages, i));
        }
        Ok(ticket)
    }

    /// Adds the next transaction to the block and dispatches its base rollup.
    pub async fn add_transaction(&mut self, tx: ProcessedTx) -> Result<()> {
        let state = self.active_state()?;
        state.ensure_accepting()?;
        block_building::validate_tx(&tx)?;
        self.prepare_base_rollup(&state, tx).await
    }

    /// Fills the remaining leaves of the block with the padding transaction.
    ///
    /// No transaction can be added afterwards.
    pub async fn complete_block(&mut self) -> Result<()> {
        let state = self.active_state()?;
        state.mark_completing();

        let padding = state.total_leaves() - state.num_leaves();
        if padding > 0 {
            debug!("Padding block with {padding} empty transactions");
        }
        for _ in 0..padding {
            self.prepare_base_rollup(&state, state.padding_tx().clone())
                .await?;
        }
        Ok(())
    }

    /// Cancels the current block. Proofs already dispatched keep running but
    /// their results are dropped. A finalised block is left untouched.
    pub fn cancel_block(&self) {
        if let Some(state) = &self.proving_state {
            if state.block().is_some() {
                return;
            }
            if !state.is_cancelled() {
                info!(
                    "Cancelling block {}",
                    state.global_variables().block_number
                );
            }
            state.cancel();
        }
    }

    /// Inserts the proven header into the archive and assembles the block.
    pub async fn finalize_block(&mut self) -> Result<BlockResult> {
        let state = self.active_state()?;
        if state.block().is_some() {
            return Err(OrchestratorError::AlreadyFinalised);
        }
        let root = state.root_output().ok_or(OrchestratorError::NotProven)?;
        let header = root.inputs.header;

        self.db.update_archive(&header).await?;
        validate_root_output(&root.inputs, &self.db)
            .await
            .map_err(|e| OrchestratorError::Consistency(format!("{e:#}")))?;

        let body = Body::new(state.non_empty_effects());
        let txs_effects_hash = body.txs_effects_hash();
        if txs_effects_hash != header.content_commitment.txs_effects_hash {
            return Err(OrchestratorError::Consistency(format!(
                "txs effects hash mismatch: body {txs_effects_hash}, header {}",
                header.content_commitment.txs_effects_hash
            )));
        }

        let block = L2Block {
            archive: root.inputs.archive,
            header,
            body,
        };
        state.set_block(block.clone())?;
        info!(
            "Finalised block {} with {} transactions",
            block.number(),
            block.body.tx_effects.len()
        );
        Ok(BlockResult {
            proof: root.proof,
            block,
        })
    }

    fn active_state(&self) -> Result<Arc<ProvingState>> {
        let state = self
            .proving_state
            .clone()
            .ok_or(OrchestratorError::NoActiveBlock)?;
        if state.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        Ok(state)
    }

    async fn prepare_base_rollup(
        &self,
        state: &Arc<ProvingState>,
        tx: ProcessedTx,
    ) -> Result<()> {
        let (inputs, expected_end) =
            build_base_rollup_input(&tx, state.global_variables(), &self.db).await?;
        let hash = tx.hash;
        let index = state.add_leaf(tx, inputs.clone())?;
        debug!("Assigned tx {hash} to leaf {index}");
        self.scheduler
            .run_base_rollup(state, index, inputs, expected_end);
        Ok(())
    }
}

/// Spawns proof jobs for a session and wires their results back into it.
pub(crate) struct ProvingScheduler<P> {
    prover: Arc<P>,
}

impl<P> Clone for ProvingScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            prover: self.prover.clone(),
        }
    }
}

/// Logs how long a proof job took when dropped.
struct ProofJobTimer {
    job: String,
    start: Instant,
}

impl ProofJobTimer {
    fn new(job: String) -> Self {
        Self {
            job,
            start: Instant::now(),
        }
    }
}

impl Drop for ProofJobTimer {
    fn drop(&mut self) {
        debug!("{} took {:?}", self.job, self.start.elapsed());
    }
}

impl<P: CircuitProver + 'static> ProvingScheduler<P> {
    /// Runs `request` on its own task.
    ///
    /// Nothing starts once the session was cancelled or failed, and late
    /// results are dropped. Any error or panic, from
    /// the backend or from `on_result`, rejects the session.
    fn deferred_proving<T, Fut>(
        &self,
        state: &Arc<ProvingState>,
        job: String,
        request: impl FnOnce(Arc<P>, AbortSignal) -> Fut + Send + 'static,
        on_result: impl FnOnce(T) -> anyhow::Result<()> + Send + 'static,
    ) where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let state = state.clone();
        let prover = self.prover.clone();
        let span = info_span!("proof", block = state.global_variables().block_number, job = %job);

        tokio::spawn(
            async move {
                if !state.verify_state() {
                    debug!("Session no longer active, not starting {job}");
                    return;
                }

                let timer = ProofJobTimer::new(job);
                let result = AssertUnwindSafe(request(prover, state.signal()))
                    .catch_unwind()
                    .await;
                drop(timer);

                let output = match result {
                    Ok(Ok(output)) => output,
                    Ok(Err(e)) => {
                        if state.verify_state() {
                            error!("Proof failed: {e:#}");
                            state.reject(format!("{e:#}"));
                        }
                        return;
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Proof panicked: {message}");
                        state.reject(message);
                        return;
                    }
                };

                if !state.verify_state() {
                    debug!("Session no longer active, discarding result");
                    return;
                }
                match std::panic::catch_unwind(AssertUnwindSafe(|| on_result(output))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Failed to handle proof: {e:#}");
                        state.reject(format!("{e:#}"));
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!("Proof handler panicked: {message}");
                        state.reject(message);
                    }
                }
            }
            .instrument(span),
        );
    }

    fn run_base_parity(&self, state: &Arc<ProvingState>, index: usize, inputs: BaseParityInputs) {
        let (scheduler, session) = (self.clone(), state.clone());
        self.deferred_proving(
            state,
            format!("base parity {index}"),
            move |prover, signal| async move {
                prover.get_base_parity_proof(inputs, Some(signal)).await
            },
            move |output: RootParityInput| {
                if let Some(children) = session.store_base_parity(index, output) {
                    scheduler.run_root_parity(&session, RootParityInputs { children });
                }
                Ok(())
            },
        );
    }

    fn run_root_parity(&self, state: &Arc<ProvingState>, inputs: RootParityInputs) {
        let (scheduler, session) = (self.clone(), state.clone());
        self.deferred_proving(
            state,
            "root parity".to_string(),
            move |prover, signal| async move {
                prover.get_root_parity_proof(inputs, Some(signal)).await
            },
            move |output: RootParityInput| {
                if let Some(parts) = session.store_root_parity(output) {
                    scheduler.run_root_rollup(&session, parts);
                }
                Ok(())
            },
        );
    }

    fn run_base_rollup(
        &self,
        state: &Arc<ProvingState>,
        index: usize,
        inputs: BaseRollupInputs,
        expected_end: PartialStateReference,
    ) {
        let (scheduler, session) = (self.clone(), state.clone());
        self.deferred_proving(
            state,
            format!("base rollup {index}"),
            move |prover, signal| async move {
                prover.get_base_rollup_proof(inputs, Some(signal)).await
            },
            move |output: BaseOrMergeOutput| {
                validate_partial_state(&output.inputs.end, &expected_end)?;
                session.store_base_rollup_output(index, output.clone());
                scheduler.store_and_execute_next_merge_level(
                    &session,
                    session.base_level(),
                    index,
                    output,
                );
                Ok(())
            },
        );
    }

    fn run_merge_rollup(
        &self,
        state: &Arc<ProvingState>,
        level: u32,
        position: usize,
        inputs: MergeRollupInputs,
    ) {
        let (scheduler, session) = (self.clone(), state.clone());
        self.deferred_proving(
            state,
            format!("merge rollup {level}.{position}"),
            move |prover, signal| async move {
                prover.get_merge_rollup_proof(inputs, Some(signal)).await
            },
            move |output: BaseOrMergeOutput| {
                scheduler.store_and_execute_next_merge_level(&session, level, position, output);
                Ok(())
            },
        );
    }

    fn run_root_rollup(&self, state: &Arc<ProvingState>, parts: RootRollupParts) {
        let inputs = get_root_rollup_input(
            parts.children,
            parts.l1_to_l2_roots,
            state.new_l1_to_l2_messages(),
            state.start_l1_to_l2_message_tree_snapshot(),
            state.start_archive_snapshot(),
        );
        let session = state.clone();
        self.deferred_proving(
            state,
            "root rollup".to_string(),
            move |prover, signal| async move {
                prover.get_root_rollup_proof(inputs, Some(signal)).await
            },
            move |output: PublicInputsAndProof<RootRollupPublicInputs>| {
                info!("Block {} proven", output.inputs.header.global_variables.block_number);
                session.set_root_output(output);
                Ok(())
            },
        );
    }

    /// Places a proof from `current_level` into its parent merge node and
    /// dispatches the parent once both its children are known. The node
    /// below the root instead hands its pair to the root rollup.
    fn store_and_execute_next_merge_level(
        &self,
        state: &Arc<ProvingState>,
        current_level: u32,
        index: usize,
        output: BaseOrMergeOutput,
    ) {
        let Some(ready) = state.store_merge_input(current_level, index, output) else {
            return;
        };
        if ready.level == 0 {
            if let Some(parts) = state.store_final_pair(ready.children) {
                self.run_root_rollup(state, parts);
            }
        } else {
            self.run_merge_rollup(
                state,
                ready.level,
                ready.position,
                create_merge_rollup_inputs(ready.children),
            );
        }
    }
}
