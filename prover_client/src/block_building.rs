//! Helpers turning transactions and proof outputs into circuit inputs, and
//! checking claimed states against the world state.

use anyhow::{bail, ensure};
use rollup_common::{
    Fr, MAX_NEW_L2_TO_L1_MSGS_PER_TX, MAX_NEW_NOTE_HASHES_PER_TX, MAX_NEW_NULLIFIERS_PER_TX,
    MAX_PUBLIC_DATA_UPDATE_REQUESTS_PER_TX,
};

use crate::circuits::{
    AppendOnlyTreeSnapshot, BaseOrMergeRollupPublicInputs, BaseRollupInputs, ConstantRollupData,
    GlobalVariables, MergeRollupInputs, PartialStateReference, PreviousRollupData,
    RootParityInput, RootRollupInputs, RootRollupPublicInputs,
};
use crate::error::OrchestratorError;
use crate::proof_types::PublicInputsAndProof;
use crate::tx::ProcessedTx;
use crate::world_state::{get_partial_state, MerkleTreeId, MerkleTreeOperations};

pub type BaseOrMergeOutput = PublicInputsAndProof<BaseOrMergeRollupPublicInputs>;

/// Rejects transactions the base rollup circuit could not accept.
pub fn validate_tx(tx: &ProcessedTx) -> Result<(), OrchestratorError> {
    let effect = &tx.effect;
    let check = |what: &str, len: usize, max: usize| {
        if len > max {
            Err(OrchestratorError::InvalidTransaction(format!(
                "tx {} has {len} {what}, max {max}",
                tx.hash
            )))
        } else {
            Ok(())
        }
    };
    check("note hashes", effect.note_hashes.len(), MAX_NEW_NOTE_HASHES_PER_TX)?;
    check("nullifiers", effect.nullifiers.len(), MAX_NEW_NULLIFIERS_PER_TX)?;
    check("l2 to l1 messages", effect.l2_to_l1_msgs.len(), MAX_NEW_L2_TO_L1_MSGS_PER_TX)?;
    check(
        "public data writes",
        effect.public_data_writes.len(),
        MAX_PUBLIC_DATA_UPDATE_REQUESTS_PER_TX,
    )?;

    // Every transaction nullifies its own hash first.
    if tx.hash.is_zero() || effect.nullifiers.first() != Some(&tx.hash) {
        return Err(OrchestratorError::InvalidTransaction(format!(
            "tx {} must emit its own hash as first nullifier",
            tx.hash
        )));
    }
    Ok(())
}

/// Builds the base rollup input for `tx` and inserts its effects into the
/// world state.
///
/// Returns the input along with the partial state the store reached, which
/// the proof's claimed end state is later checked against.
pub async fn build_base_rollup_input<D: MerkleTreeOperations>(
    tx: &ProcessedTx,
    global_variables: &GlobalVariables,
    db: &D,
) -> anyhow::Result<(BaseRollupInputs, PartialStateReference)> {
    let start = get_partial_state(db).await?;
    let last_archive = db.get_tree_info(MerkleTreeId::Archive).await?;

    db.append_leaves(MerkleTreeId::NoteHashTree, &tx.effect.note_hash_leaves())
        .await?;
    db.append_leaves(MerkleTreeId::NullifierTree, &tx.effect.nullifier_leaves())
        .await?;
    db.append_leaves(
        MerkleTreeId::PublicDataTree,
        &tx.effect.public_data_leaves(),
    )
    .await?;

    let end = get_partial_state(db).await?;
    let inputs = BaseRollupInputs {
        tx_effect: tx.effect.clone(),
        start,
        constants: ConstantRollupData {
            last_archive,
            global_variables: *global_variables,
        },
    };
    Ok((inputs, end))
}

pub fn validate_partial_state(
    claimed: &PartialStateReference,
    expected: &PartialStateReference,
) -> anyhow::Result<()> {
    let trees = [
        ("note hash", &claimed.note_hash_tree, &expected.note_hash_tree),
        ("nullifier", &claimed.nullifier_tree, &expected.nullifier_tree),
        (
            "public data",
            &claimed.public_data_tree,
            &expected.public_data_tree,
        ),
    ];
    for (name, claimed, expected) in trees {
        ensure!(
            claimed == expected,
            "{name} tree mismatch: claimed {claimed:?}, expected {expected:?}"
        );
    }
    Ok(())
}

fn previous_rollup_data(output: BaseOrMergeOutput) -> PreviousRollupData {
    PreviousRollupData {
        public_inputs: output.inputs,
        proof: output.proof,
    }
}

/// Pairs two sibling outputs, left child first.
pub fn create_merge_rollup_inputs(
    [left, right]: [BaseOrMergeOutput; 2],
) -> MergeRollupInputs {
    MergeRollupInputs {
        previous_rollup_data: [previous_rollup_data(left), previous_rollup_data(right)],
    }
}

pub fn get_root_rollup_input(
    [left, right]: [BaseOrMergeOutput; 2],
    l1_to_l2_roots: RootParityInput,
    new_l1_to_l2_messages: &[Fr],
    start_l1_to_l2_message_tree_snapshot: AppendOnlyTreeSnapshot,
    start_archive_snapshot: AppendOnlyTreeSnapshot,
) -> RootRollupInputs {
    RootRollupInputs {
        previous_rollup_data: [previous_rollup_data(left), previous_rollup_data(right)],
        l1_to_l2_roots,
        new_l1_to_l2_messages: new_l1_to_l2_messages.to_vec(),
        start_l1_to_l2_message_tree_snapshot,
        start_archive_snapshot,
    }
}

/// Checks the root rollup output against the world state, once its header
/// has been inserted into the archive.
pub async fn validate_root_output<D: MerkleTreeOperations>(
    output: &RootRollupPublicInputs,
    db: &D,
) -> anyhow::Result<()> {
    validate_partial_state(&output.header.state.partial, &get_partial_state(db).await?)?;

    let messages = db.get_tree_info(MerkleTreeId::L1ToL2MessageTree).await?;
    if output.header.state.l1_to_l2_message_tree != messages {
        bail!(
            "message tree mismatch: claimed {:?}, expected {messages:?}",
            output.header.state.l1_to_l2_message_tree
        );
    }

    let archive = db.get_tree_info(MerkleTreeId::Archive).await?;
    if output.archive != archive {
        bail!(
            "archive mismatch: claimed {:?}, expected {archive:?}",
            output.archive
        );
    }
    Ok(())
}
