//! This module defines the proof types handed between the proving backend,
//! the orchestrator and the caller.

use serde::{Deserialize, Serialize};

use crate::tx::L2Block;

/// An opaque proof produced by a proving backend.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(with = "rollup_common::hex")]
    pub buffer: Vec<u8>,
}

impl Proof {
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl std::fmt::Debug for Proof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Proof({} bytes)", self.buffer.len())
    }
}

/// Public inputs of a circuit along with the proof attesting to them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputsAndProof<T> {
    pub inputs: T,
    pub proof: Proof,
}

impl<T> PublicInputsAndProof<T> {
    pub fn new(inputs: T, proof: Proof) -> Self {
        Self { inputs, proof }
    }
}

/// A fully proven block, as returned once a block has been finalised.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResult {
    /// Proof of the root rollup circuit.
    pub proof: Proof,
    /// The assembled block.
    pub block: L2Block,
}

impl BlockResult {
    pub fn block_number(&self) -> u64 {
        self.block.number()
    }
}
