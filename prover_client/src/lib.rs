//! Block proving orchestration for a rollup.
//!
//! A [`ProvingOrchestrator`](orchestrator::ProvingOrchestrator) turns the
//! transactions of a block into a tree of circuit proofs, dispatching each
//! one to a [`CircuitProver`](circuit_prover::CircuitProver) as soon as its
//! inputs exist. Provers can run in process, behind a
//! [`MemoryProvingQueue`](queue::MemoryProvingQueue) served by local agents,
//! or in separate worker processes over HTTP.

pub mod agent;
pub mod block_building;
pub mod circuit_prover;
pub mod circuits;
pub mod env;
pub mod error;
pub mod fs;
pub mod orchestrator;
pub mod proof_types;
pub mod prover;
pub mod proving_state;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod simulated;
pub mod tracing;
pub mod tx;
pub mod world_state;

/// Size of the channel feeding blocks to the prover.
pub const BLOCK_CHANNEL_SIZE: usize = 16;
