#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use prover_client::circuit_prover::{AbortSignal, CircuitProver};
use prover_client::circuits::{
    BaseOrMergeRollupPublicInputs, BaseParityInputs, BaseRollupInputs, GlobalVariables,
    MergeRollupInputs, RootParityInput, RootParityInputs, RootRollupInputs,
    RootRollupPublicInputs,
};
use prover_client::orchestrator::ProvingOrchestrator;
use prover_client::proof_types::PublicInputsAndProof;
use prover_client::simulated::SimulatedCircuitProver;
use prover_client::tx::{ProcessedTx, PublicDataWrite, TxEffect};
use prover_client::world_state::MemoryMerkleTrees;
use rand::Rng as _;
use rollup_common::Fr;

pub type TestOrchestrator = ProvingOrchestrator<MemoryMerkleTrees, CountingProver>;

pub fn make_globals(block_number: u64) -> GlobalVariables {
    GlobalVariables {
        chain_id: Fr::from(31337),
        version: Fr::from(1),
        block_number,
        timestamp: 1_700_000_000 + block_number * 12,
        coinbase: Fr::from(0xc0ffee),
        fee_recipient: Fr::from(0xfee),
    }
}

/// A valid transaction: its hash is `seed` and also its first nullifier.
pub fn make_tx(seed: u64) -> ProcessedTx {
    let hash = Fr::from(seed);
    ProcessedTx {
        hash,
        effect: TxEffect {
            note_hashes: vec![Fr::from(seed * 100 + 1), Fr::from(seed * 100 + 2)],
            nullifiers: vec![hash, Fr::from(seed * 100 + 3)],
            l2_to_l1_msgs: vec![Fr::from(seed * 100 + 4)],
            public_data_writes: vec![PublicDataWrite {
                leaf_slot: Fr::from(seed * 100 + 5),
                value: Fr::from(seed),
            }],
        },
    }
}

pub fn make_txs(count: u64) -> Vec<ProcessedTx> {
    (1..=count).map(make_tx).collect()
}

pub fn make_messages(count: u64) -> Vec<Fr> {
    (1..=count).map(|i| Fr::from(0x1000 + i)).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofKind {
    BaseParity,
    RootParity,
    BaseRollup,
    MergeRollup,
    RootRollup,
}

/// Wraps the simulated backend with random latency, per-kind call counters
/// and optional failure of one proof kind.
#[derive(Default)]
pub struct CountingProver {
    inner: SimulatedCircuitProver,
    min_delay_ms: u64,
    max_delay_ms: u64,
    fail: Option<ProofKind>,
    base_parity: AtomicUsize,
    root_parity: AtomicUsize,
    base_rollup: AtomicUsize,
    merge_rollup: AtomicUsize,
    root_rollup: AtomicUsize,
}

impl CountingProver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for a random time up to `max_delay_ms`, shuffling
    /// completion order.
    pub fn with_random_delays(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Every call sleeps between `min_delay_ms` and `max_delay_ms`.
    pub fn with_delay_range(mut self, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.min_delay_ms = min_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn failing(mut self, kind: ProofKind) -> Self {
        self.fail = Some(kind);
        self
    }

    pub fn calls(&self, kind: ProofKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    fn counter(&self, kind: ProofKind) -> &AtomicUsize {
        match kind {
            ProofKind::BaseParity => &self.base_parity,
            ProofKind::RootParity => &self.root_parity,
            ProofKind::BaseRollup => &self.base_rollup,
            ProofKind::MergeRollup => &self.merge_rollup,
            ProofKind::RootRollup => &self.root_rollup,
        }
    }

    async fn enter(&self, kind: ProofKind) -> anyhow::Result<()> {
        self.counter(kind).fetch_add(1, Ordering::SeqCst);
        if self.max_delay_ms > 0 {
            let delay = rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail == Some(kind) {
            bail!("injected {kind:?} failure");
        }
        Ok(())
    }
}

impl CircuitProver for CountingProver {
    async fn get_base_parity_proof(
        &self,
        inputs: BaseParityInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<RootParityInput> {
        self.enter(ProofKind::BaseParity).await?;
        self.inner.get_base_parity_proof(inputs, signal).await
    }

    async fn get_root_parity_proof(
        &self,
        inputs: RootParityInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<RootParityInput> {
        self.enter(ProofKind::RootParity).await?;
        self.inner.get_root_parity_proof(inputs, signal).await
    }

    async fn get_base_rollup_proof(
        &self,
        inputs: BaseRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        self.enter(ProofKind::BaseRollup).await?;
        self.inner.get_base_rollup_proof(inputs, signal).await
    }

    async fn get_merge_rollup_proof(
        &self,
        inputs: MergeRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        self.enter(ProofKind::MergeRollup).await?;
        self.inner.get_merge_rollup_proof(inputs, signal).await
    }

    async fn get_root_rollup_proof(
        &self,
        inputs: RootRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<RootRollupPublicInputs>> {
        self.enter(ProofKind::RootRollup).await?;
        self.inner.get_root_rollup_proof(inputs, signal).await
    }
}

pub fn orchestrator(prover: CountingProver) -> TestOrchestrator {
    ProvingOrchestrator::new(MemoryMerkleTrees::new(), prover)
}
