//! Typed inputs and public outputs of the five circuits that make up a block
//! proof.
//!
//! These are plain data: the circuits themselves live behind
//! [`CircuitProver`](crate::circuit_prover::CircuitProver). Every type here is
//! serde-serializable since it also travels over the remote proving queue.

use rollup_common::{
    sha256, Fr, NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP, NUM_BASE_PARITY_PER_ROOT_PARITY,
    NUM_MSGS_PER_BASE_PARITY,
};
use serde::{Deserialize, Serialize};

use crate::proof_types::Proof;
use crate::tx::TxEffect;

/// Snapshot of an append-only tree.
///
/// The root is an accumulator over every leaf ever appended, so any party
/// holding a snapshot and the leaves appended after it can recompute the
/// resulting snapshot without access to the tree itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOnlyTreeSnapshot {
    pub root: Fr,
    pub next_available_leaf_index: u64,
}

impl AppendOnlyTreeSnapshot {
    pub fn append<'a>(&self, leaves: impl IntoIterator<Item = &'a Fr>) -> Self {
        let mut next = *self;
        for leaf in leaves {
            next.root = Fr::hash_pair(&next.root, leaf);
            next.next_available_leaf_index += 1;
        }
        next
    }
}

/// State of the trees touched by transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialStateReference {
    pub note_hash_tree: AppendOnlyTreeSnapshot,
    pub nullifier_tree: AppendOnlyTreeSnapshot,
    pub public_data_tree: AppendOnlyTreeSnapshot,
}

impl PartialStateReference {
    /// The state reached after inserting the fixed-width leaves of `effect`.
    pub fn apply(&self, effect: &TxEffect) -> Self {
        Self {
            note_hash_tree: self.note_hash_tree.append(&effect.note_hash_leaves()),
            nullifier_tree: self.nullifier_tree.append(&effect.nullifier_leaves()),
            public_data_tree: self.public_data_tree.append(&effect.public_data_leaves()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReference {
    pub l1_to_l2_message_tree: AppendOnlyTreeSnapshot,
    pub partial: PartialStateReference,
}

/// Block metadata shared by every circuit of a block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariables {
    pub chain_id: Fr,
    pub version: Fr,
    pub block_number: u64,
    pub timestamp: u64,
    pub coinbase: Fr,
    pub fee_recipient: Fr,
}

impl GlobalVariables {
    pub fn hash(&self) -> Fr {
        sha256([
            self.chain_id.as_bytes().as_slice(),
            self.version.as_bytes().as_slice(),
            self.block_number.to_be_bytes().as_slice(),
            self.timestamp.to_be_bytes().as_slice(),
            self.coinbase.as_bytes().as_slice(),
            self.fee_recipient.as_bytes().as_slice(),
        ])
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCommitment {
    /// Commitment to the effects of every transaction in the block.
    pub txs_effects_hash: Fr,
    /// SHA root of the messages consumed by the block.
    pub in_hash: Fr,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub last_archive: AppendOnlyTreeSnapshot,
    pub content_commitment: ContentCommitment,
    pub state: StateReference,
    pub global_variables: GlobalVariables,
}

impl Header {
    pub fn hash(&self) -> Fr {
        let snapshot = |s: &AppendOnlyTreeSnapshot| {
            let mut bytes = s.root.0.to_vec();
            bytes.extend_from_slice(&s.next_available_leaf_index.to_be_bytes());
            bytes
        };
        sha256([
            snapshot(&self.last_archive).as_slice(),
            self.content_commitment.txs_effects_hash.as_bytes().as_slice(),
            self.content_commitment.in_hash.as_bytes().as_slice(),
            snapshot(&self.state.l1_to_l2_message_tree).as_slice(),
            snapshot(&self.state.partial.note_hash_tree).as_slice(),
            snapshot(&self.state.partial.nullifier_tree).as_slice(),
            snapshot(&self.state.partial.public_data_tree).as_slice(),
            self.global_variables.hash().as_bytes().as_slice(),
        ])
    }
}

/// Data every base and merge circuit of a block agrees on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantRollupData {
    pub last_archive: AppendOnlyTreeSnapshot,
    pub global_variables: GlobalVariables,
}

// --- parity ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseParityInputs {
    pub msgs: [Fr; NUM_MSGS_PER_BASE_PARITY],
}

impl BaseParityInputs {
    /// Takes the `index`-th chunk of a padded message batch.
    pub fn from_slice(messages: &[Fr; NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP], index: usize) -> Self {
        let start = index * NUM_MSGS_PER_BASE_PARITY;
        let mut msgs = [Fr::ZERO; NUM_MSGS_PER_BASE_PARITY];
        msgs.copy_from_slice(&messages[start..start + NUM_MSGS_PER_BASE_PARITY]);
        Self { msgs }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityPublicInputs {
    pub sha_root: Fr,
    pub converted_root: Fr,
}

/// A parity proof together with its public inputs, as consumed by the next
/// parity or rollup circuit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootParityInput {
    pub proof: Proof,
    pub public_inputs: ParityPublicInputs,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootParityInputs {
    pub children: [RootParityInput; NUM_BASE_PARITY_PER_ROOT_PARITY],
}

// --- rollup ---

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRollupInputs {
    pub tx_effect: TxEffect,
    pub start: PartialStateReference,
    pub constants: ConstantRollupData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollupType {
    Base,
    Merge,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseOrMergeRollupPublicInputs {
    pub rollup_type: RollupType,
    pub constants: ConstantRollupData,
    pub start: PartialStateReference,
    pub end: PartialStateReference,
    pub txs_effects_hash: Fr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousRollupData {
    pub public_inputs: BaseOrMergeRollupPublicInputs,
    pub proof: Proof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRollupInputs {
    /// Left child first; the order is fixed by tree position.
    pub previous_rollup_data: [PreviousRollupData; 2],
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRollupInputs {
    pub previous_rollup_data: [PreviousRollupData; 2],
    pub l1_to_l2_roots: RootParityInput,
    pub new_l1_to_l2_messages: Vec<Fr>,
    pub start_l1_to_l2_message_tree_snapshot: AppendOnlyTreeSnapshot,
    pub start_archive_snapshot: AppendOnlyTreeSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRollupPublicInputs {
    /// The archive after the new block header has been inserted.
    pub archive: AppendOnlyTreeSnapshot,
    pub header: Header,
}
