//! The contract between the orchestrator and whatever computes proofs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::circuits::{
    BaseOrMergeRollupPublicInputs, BaseParityInputs, BaseRollupInputs, MergeRollupInputs,
    RootParityInput, RootParityInputs, RootRollupInputs, RootRollupPublicInputs,
};
use crate::proof_types::PublicInputsAndProof;

/// A cooperative cancellation flag shared between a proving session and the
/// backend calls it dispatched.
///
/// Once aborted it stays aborted. Backends are free to ignore it.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Generates proofs for the parity and rollup circuits of a block.
///
/// Implementations may prove locally, fan out to a pool of agents or enqueue
/// the request for remote workers; the orchestrator does not distinguish.
pub trait CircuitProver: Send + Sync {
    fn get_base_parity_proof(
        &self,
        inputs: BaseParityInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<RootParityInput>> + Send;

    fn get_root_parity_proof(
        &self,
        inputs: RootParityInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<RootParityInput>> + Send;

    fn get_base_rollup_proof(
        &self,
        inputs: BaseRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>>> + Send;

    fn get_merge_rollup_proof(
        &self,
        inputs: MergeRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>>> + Send;

    fn get_root_rollup_proof(
        &self,
        inputs: RootRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<RootRollupPublicInputs>>> + Send;
}

impl<P: CircuitProver> CircuitProver for Arc<P> {
    fn get_base_parity_proof(
        &self,
        inputs: BaseParityInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<RootParityInput>> + Send {
        (**self).get_base_parity_proof(inputs, signal)
    }

    fn get_root_parity_proof(
        &self,
        inputs: RootParityInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<RootParityInput>> + Send {
        (**self).get_root_parity_proof(inputs, signal)
    }

    fn get_base_rollup_proof(
        &self,
        inputs: BaseRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>>> + Send
    {
        (**self).get_base_rollup_proof(inputs, signal)
    }

    fn get_merge_rollup_proof(
        &self,
        inputs: MergeRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>>> + Send
    {
        (**self).get_merge_rollup_proof(inputs, signal)
    }

    fn get_root_rollup_proof(
        &self,
        inputs: RootRollupInputs,
        signal: Option<AbortSignal>,
    ) -> impl Future<Output = anyhow::Result<PublicInputsAndProof<RootRollupPublicInputs>>> + Send {
        (**self).get_root_rollup_proof(inputs, signal)
    }
}
