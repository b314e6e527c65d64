//! The mutable record of one block's proof tree while it is being built.
//!
//! Merge nodes are addressed by level, with level 0 holding the single node
//! whose output pair feeds the root rollup. The node at `level`, `position`
//! lives at the flat index `2^level - 1 + position`. A proof at `level + 1`
//! (or a base rollup at the base level), `index`, lands in slot `index & 1` of
//! the node at `level`, `index >> 1`.
//!
//! Every slot is filled at most once, under a single lock per session, so a
//! node becomes ready exactly once however its children race.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use rollup_common::{Fr, NUM_BASE_PARITY_PER_ROOT_PARITY};
use tokio::sync::oneshot;
use tracing::warn;

use crate::block_building::BaseOrMergeOutput;
use crate::circuit_prover::AbortSignal;
use crate::circuits::{
    AppendOnlyTreeSnapshot, BaseRollupInputs, GlobalVariables, RootParityInput,
    RootRollupPublicInputs,
};
use crate::error::OrchestratorError;
use crate::proof_types::PublicInputsAndProof;
use crate::tx::{L2Block, ProcessedTx, TxEffect};

/// Failure reason reported by a session that was cancelled or superseded.
pub const CANCELLED_REASON: &str = "Proving cancelled";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProvingOutcome {
    Success,
    Failure { reason: String },
}

impl ProvingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failure { reason } if reason == CANCELLED_REASON)
    }
}

/// Handle returned by `start_block`, resolving once the block has been proven
/// or has failed.
#[derive(Debug)]
pub struct ProvingTicket {
    outcome: oneshot::Receiver<ProvingOutcome>,
}

impl Future for ProvingTicket {
    type Output = ProvingOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome).poll(cx).map(|res| {
            res.unwrap_or_else(|_| ProvingOutcome::Failure {
                reason: "proving session dropped without an outcome".to_string(),
            })
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvingStatus {
    /// Accepting transactions.
    Building,
    /// Padding transactions are being added.
    Completing,
    /// Every leaf is assigned and proofs are outstanding.
    Proving,
    Proven,
    Finalized,
    Cancelled,
    /// A proof failed; the ticket carries the reason.
    Failed,
}

pub fn merge_node_index(level: u32, position: usize) -> usize {
    (1usize << level) - 1 + position
}

/// A merge node whose two children are both known.
#[derive(Debug)]
pub struct ReadyMerge {
    pub level: u32,
    pub position: usize,
    pub children: [BaseOrMergeOutput; 2],
}

/// Everything the root rollup needs besides the session constants.
#[derive(Debug)]
pub struct RootRollupParts {
    pub children: [BaseOrMergeOutput; 2],
    pub l1_to_l2_roots: RootParityInput,
}

struct LeafState {
    tx: ProcessedTx,
    inputs: BaseRollupInputs,
    output: Option<BaseOrMergeOutput>,
}

#[derive(Default)]
struct ProvingSlots {
    leaves: Vec<LeafState>,
    completing: bool,
    merges: Vec<[Option<BaseOrMergeOutput>; 2]>,
    base_parity: Vec<Option<RootParityInput>>,
    root_parity: Option<RootParityInput>,
    final_pair: Option<[BaseOrMergeOutput; 2]>,
    root_rollup_started: bool,
    root_output: Option<PublicInputsAndProof<RootRollupPublicInputs>>,
    block: Option<L2Block>,
    failure: Option<String>,
}

impl ProvingSlots {
    fn take_root_parts(&mut self) -> Option<RootRollupParts> {
        if self.root_rollup_started {
            return None;
        }
        let (Some(children), Some(parity)) = (&self.final_pair, &self.root_parity) else {
            return None;
        };
        let parts = RootRollupParts {
            children: children.clone(),
            l1_to_l2_roots: parity.clone(),
        };
        self.root_rollup_started = true;
        Some(parts)
    }
}

pub struct ProvingState {
    total_leaves: usize,
    global_variables: GlobalVariables,
    new_l1_to_l2_messages: Vec<Fr>,
    start_l1_to_l2_message_tree_snapshot: AppendOnlyTreeSnapshot,
    start_archive_snapshot: AppendOnlyTreeSnapshot,
    padding_tx: ProcessedTx,
    signal: AbortSignal,
    slots: Mutex<ProvingSlots>,
    outcome: Mutex<Option<oneshot::Sender<ProvingOutcome>>>,
}

impl ProvingState {
    /// `total_leaves` must be a power of two of at least 2.
    pub fn new(
        total_leaves: usize,
        global_variables: GlobalVariables,
        new_l1_to_l2_messages: Vec<Fr>,
        start_l1_to_l2_message_tree_snapshot: AppendOnlyTreeSnapshot,
        start_archive_snapshot: AppendOnlyTreeSnapshot,
        padding_tx: ProcessedTx,
    ) -> (Self, ProvingTicket) {
        debug_assert!(total_leaves >= 2 && total_leaves.is_power_of_two());
        let (tx, rx) = oneshot::channel();
        let slots = ProvingSlots {
            merges: (0..total_leaves - 1).map(|_| [None, None]).collect(),
            base_parity: vec![None; NUM_BASE_PARITY_PER_ROOT_PARITY],
            ..Default::default()
        };
        let state = Self {
            total_leaves,
            global_variables,
            new_l1_to_l2_messages,
            start_l1_to_l2_message_tree_snapshot,
            start_archive_snapshot,
            padding_tx,
            signal: AbortSignal::new(),
            slots: Mutex::new(slots),
            outcome: Mutex::new(Some(tx)),
        };
        (state, ProvingTicket { outcome: rx })
    }

    pub fn total_leaves(&self) -> usize {
        self.total_leaves
    }

    pub fn global_variables(&self) -> &GlobalVariables {
        &self.global_variables
    }

    pub fn new_l1_to_l2_messages(&self) -> &[Fr] {
        &self.new_l1_to_l2_messages
    }

    pub fn start_l1_to_l2_message_tree_snapshot(&self) -> AppendOnlyTreeSnapshot {
        self.start_l1_to_l2_message_tree_snapshot
    }

    pub fn start_archive_snapshot(&self) -> AppendOnlyTreeSnapshot {
        self.start_archive_snapshot
    }

    pub fn padding_tx(&self) -> &ProcessedTx {
        &self.padding_tx
    }

    /// The session's cancellation flag, handed to every backend call.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_aborted()
    }

    /// Whether work for this session may still mutate it. False once the
    /// session was cancelled or a proof failed.
    pub fn verify_state(&self) -> bool {
        !self.is_cancelled() && self.slots.lock().failure.is_none()
    }

    pub fn num_merge_levels(&self) -> u32 {
        self.total_leaves.ilog2() - 1
    }

    /// Level base rollup outputs are stored from.
    pub fn base_level(&self) -> u32 {
        self.num_merge_levels() + 1
    }

    pub fn num_leaves(&self) -> usize {
        self.slots.lock().leaves.len()
    }

    pub fn status(&self) -> ProvingStatus {
        let slots = self.slots.lock();
        if slots.block.is_some() {
            ProvingStatus::Finalized
        } else if self.is_cancelled() {
            ProvingStatus::Cancelled
        } else if slots.failure.is_some() {
            ProvingStatus::Failed
        } else if slots.root_output.is_some() {
            ProvingStatus::Proven
        } else if slots.leaves.len() < self.total_leaves {
            if slots.completing {
                ProvingStatus::Completing
            } else {
                ProvingStatus::Building
            }
        } else {
            ProvingStatus::Proving
        }
    }

    pub(crate) fn ensure_accepting(&self) -> Result<(), OrchestratorError> {
        if self.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let slots = self.slots.lock();
        if slots.completing || slots.leaves.len() >= self.total_leaves {
            return Err(OrchestratorError::NotAcceptingTransactions);
        }
        Ok(())
    }

    pub(crate) fn mark_completing(&self) {
        self.slots.lock().completing = true;
    }

    /// Assigns the next leaf index to `tx`.
    pub(crate) fn add_leaf(
        &self,
        tx: ProcessedTx,
        inputs: BaseRollupInputs,
    ) -> Result<usize, OrchestratorError> {
        let mut slots = self.slots.lock();
        if slots.leaves.len() >= self.total_leaves {
            return Err(OrchestratorError::NotAcceptingTransactions);
        }
        slots.leaves.push(LeafState {
            tx,
            inputs,
            output: None,
        });
        Ok(slots.leaves.len() - 1)
    }

    pub fn leaf_inputs(&self, index: usize) -> Option<BaseRollupInputs> {
        self.slots
            .lock()
            .leaves
            .get(index)
            .map(|leaf| leaf.inputs.clone())
    }

    pub fn leaf_output(&self, index: usize) -> Option<BaseOrMergeOutput> {
        self.slots
            .lock()
            .leaves
            .get(index)
            .and_then(|leaf| leaf.output.clone())
    }

    pub(crate) fn store_base_rollup_output(&self, index: usize, output: BaseOrMergeOutput) {
        let mut slots = self.slots.lock();
        match slots.leaves.get_mut(index) {
            Some(leaf) if leaf.output.is_none() => leaf.output = Some(output),
            Some(_) => warn!("base rollup output {index} stored twice, discarding"),
            None => warn!("no leaf at index {index}"),
        }
    }

    /// Stores a proof produced at `current_level`, `index` into its parent
    /// merge node, returning the node if this filled its second slot.
    pub(crate) fn store_merge_input(
        &self,
        current_level: u32,
        index: usize,
        output: BaseOrMergeOutput,
    ) -> Option<ReadyMerge> {
        let Some(level) = current_level.checked_sub(1) else {
            warn!("proof at level 0 has no parent merge node");
            return None;
        };
        let position = index >> 1;
        let node = merge_node_index(level, position);
        let slot = index & 1;

        let mut slots = self.slots.lock();
        let Some(merge) = slots.merges.get_mut(node) else {
            warn!("merge node {node} out of range");
            return None;
        };
        if merge[slot].is_some() {
            warn!("slot {slot} of merge node {node} already filled, discarding");
            return None;
        }
        merge[slot] = Some(output);
        match merge {
            [Some(left), Some(right)] => Some(ReadyMerge {
                level,
                position,
                children: [left.clone(), right.clone()],
            }),
            _ => None,
        }
    }

    /// Records the topmost merge pair, returning the root rollup parts if
    /// the parity root is already known.
    pub(crate) fn store_final_pair(
        &self,
        children: [BaseOrMergeOutput; 2],
    ) -> Option<RootRollupParts> {
        let mut slots = self.slots.lock();
        if slots.final_pair.is_some() {
            warn!("final merge pair stored twice, discarding");
            return None;
        }
        slots.final_pair = Some(children);
        slots.take_root_parts()
    }

    /// Returns every parity leaf once the last one arrives.
    pub(crate) fn store_base_parity(
        &self,
        index: usize,
        output: RootParityInput,
    ) -> Option<[RootParityInput; NUM_BASE_PARITY_PER_ROOT_PARITY]> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.base_parity.get_mut(index) else {
            warn!("base parity index {index} out of range");
            return None;
        };
        if slot.is_some() {
            warn!("base parity {index} stored twice, discarding");
            return None;
        }
        *slot = Some(output);
        if !slots.base_parity.iter().all(Option::is_some) {
            return None;
        }
        slots
            .base_parity
            .iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .try_into()
            .ok()
    }

    pub(crate) fn store_root_parity(&self, output: RootParityInput) -> Option<RootRollupParts> {
        let mut slots = self.slots.lock();
        if slots.root_parity.is_some() {
            warn!("root parity stored twice, discarding");
            return None;
        }
        slots.root_parity = Some(output);
        slots.take_root_parts()
    }

    /// Stores the root rollup output and resolves the ticket with success.
    pub(crate) fn set_root_output(&self, output: PublicInputsAndProof<RootRollupPublicInputs>) {
        self.slots.lock().root_output = Some(output);
        self.resolve(ProvingOutcome::Success);
    }

    pub fn root_output(&self) -> Option<PublicInputsAndProof<RootRollupPublicInputs>> {
        self.slots.lock().root_output.clone()
    }

    pub fn block(&self) -> Option<L2Block> {
        self.slots.lock().block.clone()
    }

    pub(crate) fn set_block(&self, block: L2Block) -> Result<(), OrchestratorError> {
        let mut slots = self.slots.lock();
        if slots.block.is_some() {
            return Err(OrchestratorError::AlreadyFinalised);
        }
        slots.block = Some(block);
        Ok(())
    }

    /// Effects of the accepted transactions, padding excluded, in leaf order.
    pub fn non_empty_effects(&self) -> Vec<TxEffect> {
        self.slots
            .lock()
            .leaves
            .iter()
            .filter(|leaf| !leaf.tx.effect.is_empty())
            .map(|leaf| leaf.tx.effect.clone())
            .collect()
    }

    pub(crate) fn cancel(&self) {
        self.signal.abort();
        self.resolve(ProvingOutcome::Failure {
            reason: CANCELLED_REASON.to_string(),
        });
    }

    pub(crate) fn reject(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.slots.lock().failure.get_or_insert_with(|| reason.clone());
        self.resolve(ProvingOutcome::Failure { reason });
    }

    /// Resolves the ticket unless it already was.
    fn resolve(&self, outcome: ProvingOutcome) -> bool {
        match self.outcome.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}
