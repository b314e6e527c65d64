//! A deterministic [`CircuitProver`] that computes the public outputs of each
//! circuit without proving anything.
//!
//! Proofs are SHA-256 digests of the serialized public inputs, which is
//! enough for the orchestrator, the queue and tests to tell them apart.

use anyhow::{bail, ensure, Context as _};
use rollup_common::{sha256, sha256_merkle_root, NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP};
use serde::Serialize;

use crate::circuit_prover::{AbortSignal, CircuitProver};
use crate::circuits::{
    AppendOnlyTreeSnapshot, BaseOrMergeRollupPublicInputs, BaseParityInputs, BaseRollupInputs,
    ContentCommitment, Header, MergeRollupInputs, ParityPublicInputs, PreviousRollupData,
    RollupType, RootParityInput, RootParityInputs, RootRollupInputs, RootRollupPublicInputs,
    StateReference,
};
use crate::proof_types::{Proof, PublicInputsAndProof};
use crate::tx::merge_effects_hashes;

#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedCircuitProver;

impl SimulatedCircuitProver {
    pub fn new() -> Self {
        Self
    }
}

fn check_signal(signal: &Option<AbortSignal>) -> anyhow::Result<()> {
    if signal.as_ref().is_some_and(AbortSignal::is_aborted) {
        bail!("proving aborted");
    }
    Ok(())
}

fn digest<T: Serialize>(circuit: &str, public_inputs: &T) -> anyhow::Result<Proof> {
    let bytes = serde_json::to_vec(public_inputs)
        .with_context(|| format!("failed to serialize {circuit} public inputs"))?;
    Ok(Proof::new(
        sha256([circuit.as_bytes(), bytes.as_slice()]).0.to_vec(),
    ))
}

fn with_proof<T: Serialize>(circuit: &str, inputs: T) -> anyhow::Result<PublicInputsAndProof<T>> {
    let proof = digest(circuit, &inputs)?;
    Ok(PublicInputsAndProof::new(inputs, proof))
}

/// Checks that two sibling rollups can be combined, left first.
fn check_siblings([left, right]: &[PreviousRollupData; 2]) -> anyhow::Result<()> {
    let (left, right) = (&left.public_inputs, &right.public_inputs);
    ensure!(
        left.constants == right.constants,
        "sibling rollups disagree on constants"
    );
    ensure!(
        left.end == right.start,
        "sibling rollups do not chain: left end {:?}, right start {:?}",
        left.end,
        right.start
    );
    Ok(())
}

impl CircuitProver for SimulatedCircuitProver {
    async fn get_base_parity_proof(
        &self,
        inputs: BaseParityInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<RootParityInput> {
        check_signal(&signal)?;
        let public_inputs = ParityPublicInputs {
            sha_root: sha256_merkle_root(&inputs.msgs),
            converted_root: AppendOnlyTreeSnapshot::default()
                .append(&inputs.msgs)
                .root,
        };
        Ok(RootParityInput {
            proof: digest("base_parity", &public_inputs)?,
            public_inputs,
        })
    }

    async fn get_root_parity_proof(
        &self,
        inputs: RootParityInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<RootParityInput> {
        check_signal(&signal)?;
        let sha_roots = inputs
            .children
            .iter()
            .map(|c| c.public_inputs.sha_root)
            .collect::<Vec<_>>();
        let converted_roots = inputs
            .children
            .iter()
            .map(|c| c.public_inputs.converted_root)
            .collect::<Vec<_>>();
        let public_inputs = ParityPublicInputs {
            sha_root: sha256_merkle_root(&sha_roots),
            converted_root: sha256_merkle_root(&converted_roots),
        };
        Ok(RootParityInput {
            proof: digest("root_parity", &public_inputs)?,
            public_inputs,
        })
    }

    async fn get_base_rollup_proof(
        &self,
        inputs: BaseRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        check_signal(&signal)?;
        with_proof(
            "base_rollup",
            BaseOrMergeRollupPublicInputs {
                rollup_type: RollupType::Base,
                constants: inputs.constants,
                start: inputs.start,
                end: inputs.start.apply(&inputs.tx_effect),
                txs_effects_hash: inputs.tx_effect.hash(),
            },
        )
    }

    async fn get_merge_rollup_proof(
        &self,
        inputs: MergeRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<BaseOrMergeRollupPublicInputs>> {
        check_signal(&signal)?;
        check_siblings(&inputs.previous_rollup_data)?;
        let [left, right] = &inputs.previous_rollup_data;
        let (left, right) = (&left.public_inputs, &right.public_inputs);
        with_proof(
            "merge_rollup",
            BaseOrMergeRollupPublicInputs {
                rollup_type: RollupType::Merge,
                constants: left.constants,
                start: left.start,
                end: right.end,
                txs_effects_hash: merge_effects_hashes(
                    &left.txs_effects_hash,
                    &right.txs_effects_hash,
                ),
            },
        )
    }

    async fn get_root_rollup_proof(
        &self,
        inputs: RootRollupInputs,
        signal: Option<AbortSignal>,
    ) -> anyhow::Result<PublicInputsAndProof<RootRollupPublicInputs>> {
        check_signal(&signal)?;
        check_siblings(&inputs.previous_rollup_data)?;
        ensure!(
            inputs.new_l1_to_l2_messages.len() == NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP,
            "expected {NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP} messages, got {}",
            inputs.new_l1_to_l2_messages.len()
        );
        let parity = &inputs.l1_to_l2_roots.public_inputs;
        ensure!(
            sha256_merkle_root(&inputs.new_l1_to_l2_messages) == parity.sha_root,
            "messages do not match the parity sha root"
        );

        let [left, right] = &inputs.previous_rollup_data;
        let (left, right) = (&left.public_inputs, &right.public_inputs);
        let header = Header {
            last_archive: inputs.start_archive_snapshot,
            content_commitment: ContentCommitment {
                txs_effects_hash: merge_effects_hashes(
                    &left.txs_effects_hash,
                    &right.txs_effects_hash,
                ),
                in_hash: parity.sha_root,
            },
            state: StateReference {
                l1_to_l2_message_tree: inputs
                    .start_l1_to_l2_message_tree_snapshot
                    .append(&inputs.new_l1_to_l2_messages),
                partial: right.end,
            },
            global_variables: left.constants.global_variables,
        };
        with_proof(
            "root_rollup",
            RootRollupPublicInputs {
                archive: inputs.start_archive_snapshot.append(&[header.hash()]),
                header,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use rollup_common::Fr;

    use super::*;
    use crate::circuits::{ConstantRollupData, PartialStateReference};
    use crate::tx::TxEffect;

    fn base(seed: u64, start: PartialStateReference) -> BaseRollupInputs {
        BaseRollupInputs {
            tx_effect: TxEffect {
                nullifiers: vec![Fr::from(seed)],
                ..Default::default()
            },
            start,
            constants: ConstantRollupData::default(),
        }
    }

    fn previous(output: PublicInputsAndProof<BaseOrMergeRollupPublicInputs>) -> PreviousRollupData {
        PreviousRollupData {
            public_inputs: output.inputs,
            proof: output.proof,
        }
    }

    #[tokio::test]
    async fn merge_requires_chained_states() {
        let prover = SimulatedCircuitProver::new();
        let left = prover
            .get_base_rollup_proof(base(1, PartialStateReference::default()), None)
            .await
            .unwrap();
        let right = prover
            .get_base_rollup_proof(base(2, left.inputs.end), None)
            .await
            .unwrap();

        let merged = prover
            .get_merge_rollup_proof(
                MergeRollupInputs {
                    previous_rollup_data: [previous(left.clone()), previous(right.clone())],
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(merged.inputs.start, left.inputs.start);
        assert_eq!(merged.inputs.end, right.inputs.end);
        assert_eq!(merged.inputs.rollup_type, RollupType::Merge);

        let swapped = prover
            .get_merge_rollup_proof(
                MergeRollupInputs {
                    previous_rollup_data: [previous(right), previous(left)],
                },
                None,
            )
            .await;
        assert!(swapped.is_err());
    }

    #[tokio::test]
    async fn aborted_signal_fails_fast() {
        let signal = AbortSignal::new();
        signal.abort();
        let err = SimulatedCircuitProver
            .get_base_parity_proof(
                BaseParityInputs {
                    msgs: [Fr::ZERO; 4],
                },
                Some(signal),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aborted"));
    }

    #[tokio::test]
    async fn proofs_are_deterministic() {
        let inputs = BaseParityInputs {
            msgs: [Fr::from(1), Fr::from(2), Fr::ZERO, Fr::ZERO],
        };
        let a = SimulatedCircuitProver
            .get_base_parity_proof(inputs.clone(), None)
            .await
            .unwrap();
        let b = SimulatedCircuitProver
            .get_base_parity_proof(inputs, None)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert!(!a.proof.is_empty());
    }
}
