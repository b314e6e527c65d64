//! Transactions as handed to the orchestrator, and the blocks assembled from
//! them.

use itertools::Itertools as _;
use rollup_common::{
    sha256, Fr, MAX_NEW_L2_TO_L1_MSGS_PER_TX, MAX_NEW_NOTE_HASHES_PER_TX,
    MAX_NEW_NULLIFIERS_PER_TX, MAX_PUBLIC_DATA_UPDATE_REQUESTS_PER_TX,
};
use serde::{Deserialize, Serialize};

use crate::circuits::{AppendOnlyTreeSnapshot, Header};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicDataWrite {
    pub leaf_slot: Fr,
    pub value: Fr,
}

impl PublicDataWrite {
    pub fn is_empty(&self) -> bool {
        self.leaf_slot.is_zero() && self.value.is_zero()
    }

    /// Leaf inserted into the public data tree; empty writes insert zero.
    pub fn leaf(&self) -> Fr {
        if self.is_empty() {
            Fr::ZERO
        } else {
            Fr::hash_pair(&self.leaf_slot, &self.value)
        }
    }
}

/// Side effects of a single transaction, as committed to by the block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEffect {
    pub note_hashes: Vec<Fr>,
    pub nullifiers: Vec<Fr>,
    pub l2_to_l1_msgs: Vec<Fr>,
    pub public_data_writes: Vec<PublicDataWrite>,
}

fn padded<const N: usize>(values: impl IntoIterator<Item = Fr>) -> Vec<Fr> {
    values
        .into_iter()
        .chain(std::iter::repeat(Fr::ZERO))
        .take(N)
        .collect()
}

impl TxEffect {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.note_hashes.iter().all(Fr::is_zero)
            && self.nullifiers.iter().all(Fr::is_zero)
            && self.l2_to_l1_msgs.iter().all(Fr::is_zero)
            && self.public_data_writes.iter().all(PublicDataWrite::is_empty)
    }

    /// Note hash leaves appended by this transaction, always
    /// [`MAX_NEW_NOTE_HASHES_PER_TX`] of them.
    pub fn note_hash_leaves(&self) -> Vec<Fr> {
        padded::<MAX_NEW_NOTE_HASHES_PER_TX>(self.note_hashes.iter().copied())
    }

    pub fn nullifier_leaves(&self) -> Vec<Fr> {
        padded::<MAX_NEW_NULLIFIERS_PER_TX>(self.nullifiers.iter().copied())
    }

    pub fn public_data_leaves(&self) -> Vec<Fr> {
        padded::<MAX_PUBLIC_DATA_UPDATE_REQUESTS_PER_TX>(
            self.public_data_writes.iter().map(PublicDataWrite::leaf),
        )
    }

    /// Hash of the effect. Empty effects hash to [`Fr::ZERO`], which
    /// [`merge_effects_hashes`] treats as padding.
    pub fn hash(&self) -> Fr {
        if self.is_empty() {
            return Fr::ZERO;
        }
        let fields = self
            .note_hash_leaves()
            .into_iter()
            .chain(self.nullifier_leaves())
            .chain(padded::<MAX_NEW_L2_TO_L1_MSGS_PER_TX>(
                self.l2_to_l1_msgs.iter().copied(),
            ))
            .chain(self.public_data_leaves())
            .collect_vec();
        sha256(fields.iter().map(|f| f.as_bytes().as_slice()))
    }
}

/// Combines the effects hashes of two sibling subtrees.
///
/// An empty right subtree passes the left hash through, so the result does
/// not depend on how much trailing padding a block carries.
pub fn merge_effects_hashes(left: &Fr, right: &Fr) -> Fr {
    if right.is_zero() {
        *left
    } else {
        Fr::hash_pair(left, right)
    }
}

/// A transaction that has been executed and is ready to be proven.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedTx {
    pub hash: Fr,
    pub effect: TxEffect,
}

impl ProcessedTx {
    /// A padding transaction without any effects.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hash.is_zero() && self.effect.is_empty()
    }
}

/// The transaction effects included in a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub tx_effects: Vec<TxEffect>,
}

impl Body {
    pub fn new(tx_effects: Vec<TxEffect>) -> Self {
        Self { tx_effects }
    }

    /// Recomputes the commitment the root rollup circuit exposes as
    /// `txs_effects_hash`.
    pub fn txs_effects_hash(&self) -> Fr {
        let width = self.tx_effects.len().max(2).next_power_of_two();
        let mut layer = self
            .tx_effects
            .iter()
            .map(TxEffect::hash)
            .chain(std::iter::repeat(Fr::ZERO))
            .take(width)
            .collect_vec();
        while layer.len() > 1 {
            layer = layer
                .chunks_exact(2)
                .map(|pair| merge_effects_hashes(&pair[0], &pair[1]))
                .collect();
        }
        layer[0]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Block {
    /// Archive snapshot after this block was inserted.
    pub archive: AppendOnlyTreeSnapshot,
    pub header: Header,
    pub body: Body,
}

impl L2Block {
    pub fn number(&self) -> u64 {
        self.header.global_variables.block_number
    }
}
