mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{make_globals, make_messages, make_tx, make_txs, orchestrator, CountingProver, ProofKind};
use prover_client::agent::{AgentPool, ProvingAgent};
use prover_client::error::OrchestratorError;
use prover_client::fs::{read_block_result, write_proof_to_dir};
use prover_client::orchestrator::ProvingOrchestrator;
use prover_client::prover::BlockProverInput;
use prover_client::proving_state::{ProvingOutcome, ProvingStatus, CANCELLED_REASON};
use prover_client::queue::{MemoryProvingQueue, ProvingQueueConsumer as _, QUEUE_CANCELLED_REASON};
use prover_client::simulated::SimulatedCircuitProver;
use prover_client::tx::ProcessedTx;
use prover_client::world_state::{MemoryMerkleTrees, MerkleTreeId, MerkleTreeOperations as _};
use rollup_common::{sha256_merkle_root, Fr, NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP};

#[tokio::test(flavor = "multi_thread")]
async fn two_transaction_block_is_proven_and_finalised() {
    let mut orch = orchestrator(CountingProver::new());
    let globals = make_globals(1);

    let ticket = orch
        .start_block(2, globals, vec![], ProcessedTx::empty())
        .await
        .unwrap();
    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.add_transaction(make_tx(2)).await.unwrap();

    assert_eq!(ticket.await, ProvingOutcome::Success);
    assert_eq!(orch.status(), Some(ProvingStatus::Proven));

    let result = orch.finalize_block().await.unwrap();
    assert_eq!(result.block.body.tx_effects.len(), 2);
    assert_eq!(result.block.header.global_variables, globals);
    assert!(!result.proof.is_empty());
    assert_eq!(orch.status(), Some(ProvingStatus::Finalized));

    let archive = orch.db().get_tree_info(MerkleTreeId::Archive).await.unwrap();
    assert_eq!(archive, result.block.archive);

    let state = orch.proving_state().cloned().unwrap();
    assert_eq!(state.leaf_inputs(0).unwrap().tx_effect, make_tx(1).effect);
    assert_eq!(state.leaf_inputs(1).unwrap().tx_effect, make_tx(2).effect);
    let left = state.leaf_output(0).unwrap();
    let right = state.leaf_output(1).unwrap();
    assert_eq!(left.inputs.end, right.inputs.start);
    assert!(state.leaf_output(2).is_none());

    let err = orch.finalize_block().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyFinalised));
    assert!(err.is_state());

    let finalised = state;
    orch.start_block(2, make_globals(2), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    assert_eq!(finalised.status(), ProvingStatus::Finalized);
    assert!(!finalised.signal().is_aborted());
    assert!(finalised.block().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn complete_block_pads_remaining_leaves() {
    let mut orch = orchestrator(CountingProver::new());

    let ticket = orch
        .start_block(4, make_globals(7), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.add_transaction(make_tx(2)).await.unwrap();
    orch.complete_block().await.unwrap();

    let err = orch.add_transaction(make_tx(3)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotAcceptingTransactions));

    assert!(ticket.await.is_success());
    let result = orch.finalize_block().await.unwrap();
    assert_eq!(
        result.block.body.tx_effects,
        vec![make_tx(1).effect, make_tx(2).effect]
    );
    assert_eq!(orch.prover().calls(ProofKind::BaseRollup), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_start_leaves_no_trace() {
    let mut orch = orchestrator(CountingProver::new());

    let err = orch
        .start_block(3, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidBlockSize(3)));
    assert!(err.is_validation());
    assert!(orch.proving_state().is_none());
    let messages = orch
        .db()
        .get_tree_info(MerkleTreeId::L1ToL2MessageTree)
        .await
        .unwrap();
    assert_eq!(messages.next_available_leaf_index, 0);

    let ticket = orch
        .start_block(2, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.add_transaction(make_tx(2)).await.unwrap();
    assert!(ticket.await.is_success());
    orch.finalize_block().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_a_block_supersedes_the_previous_one() {
    let mut orch = orchestrator(CountingProver::new().with_random_delays(5));

    let first = orch
        .start_block(2, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    let second = orch
        .start_block(2, make_globals(2), make_messages(3), ProcessedTx::empty())
        .await
        .unwrap();

    let outcome = first.await;
    assert!(outcome.is_cancelled(), "{outcome:?}");

    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.complete_block().await.unwrap();
    assert!(second.await.is_success());

    let result = orch.finalize_block().await.unwrap();
    assert_eq!(result.block_number(), 2);
    assert_eq!(result.block.header.global_variables, make_globals(2));
    assert_eq!(result.block.body.tx_effects.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_block_cannot_be_finalised() {
    let mut orch = orchestrator(CountingProver::new());

    let ticket = orch
        .start_block(2, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.cancel_block();

    assert_eq!(
        ticket.await,
        ProvingOutcome::Failure {
            reason: CANCELLED_REASON.to_string()
        }
    );
    assert_eq!(orch.status(), Some(ProvingStatus::Cancelled));

    let err = orch.finalize_block().await.unwrap_err();
    assert!(err.is_state(), "{err}");
    let err = orch.add_transaction(make_tx(2)).await.unwrap_err();
    assert!(err.is_state(), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_during_base_rollups_stops_the_tree() {
    let mut orch = orchestrator(CountingProver::new().with_delay_range(100, 150));

    let ticket = orch
        .start_block(4, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    for tx in make_txs(4) {
        orch.add_transaction(tx).await.unwrap();
    }
    orch.cancel_block();

    assert!(ticket.await.is_cancelled());
    // Let every dispatched base rollup come back.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let prover = orch.prover();
    assert_eq!(prover.calls(ProofKind::BaseRollup), 4);
    assert_eq!(prover.calls(ProofKind::MergeRollup), 0);
    assert_eq!(prover.calls(ProofKind::RootRollup), 0);
    assert_eq!(prover.calls(ProofKind::RootParity), 0);

    let state = orch.proving_state().unwrap();
    assert!(state.root_output().is_none());
    assert!((0..4).all(|i| state.leaf_output(i).is_none()));
    assert_eq!(state.status(), ProvingStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn full_blocks_prove_without_completion() {
    for k in 1..=3 {
        let total = 1usize << k;
        let mut orch = orchestrator(CountingProver::new());
        let ticket = orch
            .start_block(total, make_globals(k), vec![], ProcessedTx::empty())
            .await
            .unwrap();
        for tx in make_txs(total as u64) {
            orch.add_transaction(tx).await.unwrap();
        }

        assert!(ticket.await.is_success(), "block of {total}");
        let result = orch.finalize_block().await.unwrap();
        assert_eq!(result.block.body.tx_effects.len(), total);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn every_node_dispatches_once_under_random_completion_order() {
    for total in [2usize, 4, 8, 16] {
        for round in 0..3 {
            let mut orch = orchestrator(CountingProver::new().with_random_delays(10));
            let ticket = orch
                .start_block(total, make_globals(round), make_messages(5), ProcessedTx::empty())
                .await
                .unwrap();
            for tx in make_txs(total as u64 - 1) {
                orch.add_transaction(tx).await.unwrap();
            }
            orch.complete_block().await.unwrap();
            assert!(ticket.await.is_success(), "block of {total}");

            let prover = orch.prover();
            assert_eq!(prover.calls(ProofKind::BaseParity), 4);
            assert_eq!(prover.calls(ProofKind::RootParity), 1);
            assert_eq!(prover.calls(ProofKind::BaseRollup), total);
            assert_eq!(prover.calls(ProofKind::MergeRollup), total - 2);
            assert_eq!(prover.calls(ProofKind::RootRollup), 1);

            orch.finalize_block().await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn backend_failure_reaches_the_ticket() {
    for kind in [
        ProofKind::BaseParity,
        ProofKind::RootParity,
        ProofKind::BaseRollup,
        ProofKind::MergeRollup,
        ProofKind::RootRollup,
    ] {
        let mut orch = orchestrator(CountingProver::new().failing(kind));
        let ticket = orch
            .start_block(4, make_globals(1), vec![], ProcessedTx::empty())
            .await
            .unwrap();
        for tx in make_txs(4) {
            orch.add_transaction(tx).await.unwrap();
        }

        match ticket.await {
            ProvingOutcome::Failure { reason } => {
                assert!(reason.contains("injected"), "{kind:?}: {reason}")
            }
            ProvingOutcome::Success => panic!("{kind:?} failure was swallowed"),
        }
        assert_eq!(orch.status(), Some(ProvingStatus::Failed));
        let err = orch.finalize_block().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotProven), "{err}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_is_dispatched_after_a_failure() {
    let mut orch = orchestrator(CountingProver::new().failing(ProofKind::BaseParity));
    let ticket = orch
        .start_block(4, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    assert!(!ticket.await.is_success());
    assert_eq!(orch.status(), Some(ProvingStatus::Failed));

    for tx in make_txs(4) {
        if orch.add_transaction(tx).await.is_err() {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let prover = orch.prover();
    assert_eq!(prover.calls(ProofKind::RootParity), 0);
    assert_eq!(prover.calls(ProofKind::BaseRollup), 0);
    assert_eq!(prover.calls(ProofKind::MergeRollup), 0);
    assert_eq!(prover.calls(ProofKind::RootRollup), 0);
    assert_eq!(orch.status(), Some(ProvingStatus::Failed));
}

#[tokio::test]
async fn call_order_is_validated() {
    let mut orch = orchestrator(CountingProver::new());
    let err = orch.add_transaction(make_tx(1)).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NoActiveBlock));
    assert!(orch.complete_block().await.unwrap_err().is_state());
    assert!(orch.finalize_block().await.unwrap_err().is_state());

    let err = orch
        .start_block(
            2,
            make_globals(1),
            make_messages(NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP as u64 + 1),
            ProcessedTx::empty(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::TooManyMessages { got: 17, max: 16 }));

    let err = orch
        .start_block(2, make_globals(1), vec![], make_tx(9))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidPaddingTransaction));

    let _ticket = orch
        .start_block(2, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    let mut invalid = make_tx(1);
    invalid.effect.nullifiers.clear();
    assert!(orch.add_transaction(invalid).await.unwrap_err().is_validation());
    assert_eq!(orch.proving_state().unwrap().num_leaves(), 0);

    orch.add_transaction(make_tx(1)).await.unwrap();
    let err = orch.finalize_block().await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotProven));
    orch.cancel_block();
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_are_committed_in_the_header() {
    let mut orch = orchestrator(CountingProver::new());
    let messages = make_messages(3);

    let ticket = orch
        .start_block(2, make_globals(1), messages.clone(), ProcessedTx::empty())
        .await
        .unwrap();
    orch.add_transaction(make_tx(1)).await.unwrap();
    orch.complete_block().await.unwrap();
    assert!(ticket.await.is_success());
    let result = orch.finalize_block().await.unwrap();

    let mut padded = messages;
    padded.resize(NUMBER_OF_L1_L2_MESSAGES_PER_ROLLUP, Fr::ZERO);
    assert_eq!(
        result.block.header.content_commitment.in_hash,
        sha256_merkle_root(&padded)
    );
    let message_tree = orch
        .db()
        .get_tree_info(MerkleTreeId::L1ToL2MessageTree)
        .await
        .unwrap();
    assert_eq!(result.block.header.state.l1_to_l2_message_tree, message_tree);
}

#[tokio::test(flavor = "multi_thread")]
async fn consecutive_blocks_chain_their_archive() {
    let mut orch = orchestrator(CountingProver::new());

    let mut previous = None;
    for number in 1..=3 {
        let input = BlockProverInput {
            global_variables: make_globals(number),
            l1_to_l2_messages: make_messages(number),
            txs: vec![make_tx(number * 10), make_tx(number * 10 + 1)],
            num_txs: None,
        };
        let result = input.prove(&mut orch).await.unwrap();
        if let Some(archive) = previous {
            assert_eq!(result.block.header.last_archive, archive);
        }
        previous = Some(result.block.archive);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn queue_with_local_agents_proves_blocks() {
    let queue = Arc::new(MemoryProvingQueue::new());
    let mut agents = (0..3)
        .map(|_| {
            ProvingAgent::new(
                Arc::new(SimulatedCircuitProver::new()),
                Duration::from_millis(20),
            )
        })
        .collect::<Vec<_>>();
    for agent in &mut agents {
        agent.start(queue.clone());
    }

    let mut orch = ProvingOrchestrator::new(MemoryMerkleTrees::new(), queue.clone());
    let input = BlockProverInput {
        global_variables: make_globals(5),
        l1_to_l2_messages: make_messages(2),
        txs: make_txs(3),
        num_txs: None,
    };
    assert_eq!(input.block_size(), 4);
    let result = input.prove(&mut orch).await.unwrap();
    assert_eq!(result.block.body.tx_effects.len(), 3);

    for agent in &mut agents {
        agent.stop().await.unwrap();
    }
    assert!(queue.is_empty());
    assert_eq!(queue.num_pending(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn superseded_jobs_are_not_handed_out() {
    let queue = Arc::new(MemoryProvingQueue::new());
    let mut orch = ProvingOrchestrator::new(MemoryMerkleTrees::new(), queue.clone());

    orch.start_block(2, make_globals(1), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    wait_for_queue_len(&queue, 4).await;
    let second = orch
        .start_block(2, make_globals(2), vec![], ProcessedTx::empty())
        .await
        .unwrap();
    wait_for_queue_len(&queue, 8).await;

    let mut taken = vec![];
    while let Some(job) = queue.take(Duration::from_millis(50)).await.unwrap() {
        taken.push(job);
    }
    assert_eq!(taken.len(), 4);
    assert!(queue.is_empty());
    assert_eq!(queue.num_pending(), 4);

    queue.cancel_all();
    assert_eq!(queue.num_pending(), 0);
    match second.await {
        ProvingOutcome::Failure { reason } => {
            assert!(reason.contains(QUEUE_CANCELLED_REASON), "{reason}")
        }
        ProvingOutcome::Success => panic!("block proven without any agent"),
    }
}

async fn wait_for_queue_len(queue: &MemoryProvingQueue, len: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_pool_proves_blocks() {
    let pool = AgentPool::new([
        SimulatedCircuitProver::new(),
        SimulatedCircuitProver::new(),
    ])
    .unwrap();
    let mut orch = ProvingOrchestrator::new(MemoryMerkleTrees::new(), pool);

    let input = BlockProverInput {
        global_variables: make_globals(9),
        l1_to_l2_messages: vec![],
        txs: make_txs(5),
        num_txs: Some(16),
    };
    let result = input.prove(&mut orch).await.unwrap();
    assert_eq!(result.block.body.tx_effects.len(), 5);
    assert!(orch.prover().agents().iter().all(|agent| agent.in_flight() == 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_transaction_cancels_the_block() {
    let mut orch = orchestrator(CountingProver::new());
    let mut invalid = make_tx(2);
    invalid.effect.nullifiers[0] = Fr::from(99);

    let input = BlockProverInput {
        global_variables: make_globals(1),
        l1_to_l2_messages: vec![],
        txs: vec![make_tx(1), invalid],
        num_txs: None,
    };
    let err = input.prove(&mut orch).await.unwrap_err();
    assert!(format!("{err:#}").contains("first nullifier"), "{err:#}");
    assert_eq!(orch.status(), Some(ProvingStatus::Cancelled));
}

#[test]
fn block_input_defaults_optional_fields() {
    let input = BlockProverInput {
        global_variables: make_globals(3),
        l1_to_l2_messages: make_messages(1),
        txs: make_txs(3),
        num_txs: Some(8),
    };
    let mut json = serde_json::to_value(&input).unwrap();
    let object = json.as_object_mut().unwrap();
    object.remove("l1_to_l2_messages");
    object.remove("num_txs");
    let text = serde_json::to_string(&[json]).unwrap();

    let des = &mut serde_json::Deserializer::from_str(&text);
    let parsed: Vec<BlockProverInput> = serde_path_to_error::deserialize(des).unwrap();
    assert_eq!(parsed.len(), 1);
    assert!(parsed[0].l1_to_l2_messages.is_empty());
    assert_eq!(parsed[0].block_size(), 4);
    assert_eq!(parsed[0].get_block_number(), 3);

    let des = &mut serde_json::Deserializer::from_str(r#"[{"global_variables": {}}]"#);
    let err = serde_path_to_error::deserialize::<_, Vec<BlockProverInput>>(des).unwrap_err();
    assert!(err.path().to_string().starts_with("[0]"), "{}", err.path());
}

#[tokio::test(flavor = "multi_thread")]
async fn proofs_are_written_to_disk() {
    let mut orch = orchestrator(CountingProver::new());
    let input = BlockProverInput {
        global_variables: make_globals(42),
        l1_to_l2_messages: vec![],
        txs: make_txs(2),
        num_txs: None,
    };
    let result = input.prove(&mut orch).await.unwrap();

    let dir = std::env::temp_dir().join(format!("prover-client-test-{}", rand::random::<u64>()));
    let path = write_proof_to_dir(&dir, &result).await.unwrap();
    assert_eq!(path.file_name().unwrap(), "b42.zkproof");
    assert_eq!(read_block_result(&path).unwrap(), result);

    std::fs::remove_dir_all(&dir).unwrap();
}
