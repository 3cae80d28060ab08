mod common;

use std::sync::Arc;

use indexmap::IndexMap;
use kestrel_common::time::ManualClock;
use kestrel_daemon::core::db::Store;
use kestrel_daemon::core::error::ChainError;
use kestrel_daemon::core::proofprovider::TaskHandler;
use kestrel_daemon::core::storage::{TaskResultStorage, TaskStorage};
use kestrel_daemon::core::types::{
    Task, TaskEntry, TaskExecutorId, TaskId, TaskResult, TaskType, CIRCUIT_AMOUNT,
};
use tempdir::TempDir;

use common::{open_store, BatchChainBuilder};

struct Fixture {
    _dir: TempDir,
    task_storage: Arc<TaskStorage>,
    result_storage: Arc<TaskResultStorage>,
    handler: TaskHandler,
}

fn fixture(skip_rate: usize) -> Fixture {
    let (_dir, store): (TempDir, Arc<Store>) = open_store();
    let clock = Arc::new(ManualClock::at(1_000));
    let task_storage = Arc::new(TaskStorage::new(store.clone(), clock.clone()));
    let result_storage = Arc::new(TaskResultStorage::new(store));
    let handler = TaskHandler::new(
        task_storage.clone(),
        result_storage.clone(),
        skip_rate,
        clock,
    );
    Fixture {
        _dir,
        task_storage,
        result_storage,
        handler,
    }
}

fn provider_task(task_type: TaskType) -> Task {
    let mut chain = BatchChainBuilder::new(1);
    let batch = chain.next_batch();
    let entry = match task_type {
        TaskType::AggregateProofs => {
            TaskEntry::new_aggregate_proofs(batch.id, &batch.main_block, 1_000)
        }
        _ => {
            let mut entry = TaskEntry::new_block_proof(batch.id, &batch.child_blocks[0], 1_000);
            entry.task.task_type = task_type;
            entry
        }
    };
    entry.task
}

/// Pulls one task, asserting its type, or asserts that nothing is
/// runnable.
async fn request_task(
    storage: &TaskStorage,
    executor: TaskExecutorId,
    expected: Option<TaskType>,
) -> Option<Task> {
    let task = storage.request_task_to_execute(executor).await.unwrap();
    match expected {
        Some(task_type) => {
            let task = task.expect("a task should be runnable");
            assert_eq!(task.task_type, task_type);
            Some(task)
        }
        None => {
            assert!(task.is_none(), "no task should be runnable");
            None
        }
    }
}

async fn complete_task(storage: &TaskStorage, executor: TaskExecutorId, id: TaskId) {
    let result = TaskResult::success(id, executor, IndexMap::new(), vec![]);
    storage.process_task_result(&result).await.unwrap();
}

#[tokio::test]
async fn test_unsupported_task_types_are_rejected() {
    let fixture = fixture(0);
    let executor = TaskExecutorId::new(1);

    for task_type in [
        TaskType::PartialProve,
        TaskType::AggregatedChallenge,
        TaskType::CombinedQ,
        TaskType::AggregatedFri,
        TaskType::FriConsistencyChecks,
        TaskType::MergeProof,
    ] {
        let task = provider_task(task_type);
        let err = fixture.handler.handle(executor, &task).await;
        assert!(
            matches!(err, Err(ChainError::NotSupportedTaskType(t)) if t == task_type),
            "{} should be rejected",
            task_type
        );
    }

    // nothing was written
    request_task(&fixture.task_storage, executor, None).await;
}

#[tokio::test]
async fn test_aggregate_proofs_pass_through() {
    let fixture = fixture(0);
    let executor = TaskExecutorId::new(1);

    let provider = provider_task(TaskType::AggregateProofs);
    fixture.handler.handle(executor, &provider).await.unwrap();

    let requested = request_task(
        &fixture.task_storage,
        TaskExecutorId::new(2),
        Some(TaskType::AggregateProofs),
    )
    .await
    .unwrap();

    assert_ne!(requested.id, provider.id);
    assert_eq!(requested.parent_task_id, Some(provider.id));
    assert_eq!(requested.batch_id, provider.batch_id);
    assert_eq!(requested.shard_id, provider.shard_id);
    assert_eq!(requested.block_num, provider.block_num);
    assert_eq!(requested.block_hash, provider.block_hash);

    // exactly one task was emitted
    request_task(&fixture.task_storage, executor, None).await;
}

#[tokio::test]
async fn test_proof_block_dag_levels() {
    let fixture = fixture(0);
    let executor = TaskExecutorId::new(7);
    let storage = &fixture.task_storage;

    let provider = provider_task(TaskType::ProofBlock);
    fixture.handler.handle(executor, &provider).await.unwrap();

    // Level 0: every partial prove is immediately runnable
    let mut ids = Vec::with_capacity(CIRCUIT_AMOUNT);
    for _ in 0..CIRCUIT_AMOUNT {
        let task = request_task(storage, executor, Some(TaskType::PartialProve))
            .await
            .unwrap();
        assert_eq!(task.parent_task_id, Some(provider.id));
        ids.push(task.id);
    }
    request_task(storage, executor, None).await;

    for id in ids.drain(..) {
        complete_task(storage, executor, id).await;
    }

    // Level 1: one aggregated challenge
    let challenge = request_task(storage, executor, Some(TaskType::AggregatedChallenge))
        .await
        .unwrap();
    request_task(storage, executor, None).await;
    complete_task(storage, executor, challenge.id).await;

    // Level 2: combined Q per circuit
    for _ in 0..CIRCUIT_AMOUNT {
        let task = request_task(storage, executor, Some(TaskType::CombinedQ))
            .await
            .unwrap();
        ids.push(task.id);
    }
    request_task(storage, executor, None).await;
    for id in ids.drain(..) {
        complete_task(storage, executor, id).await;
    }

    // Level 3a: one aggregated FRI
    let fri = request_task(storage, executor, Some(TaskType::AggregatedFri))
        .await
        .unwrap();
    request_task(storage, executor, None).await;
    complete_task(storage, executor, fri.id).await;

    // Level 3b: consistency checks per circuit
    for _ in 0..CIRCUIT_AMOUNT {
        let task = request_task(storage, executor, Some(TaskType::FriConsistencyChecks))
            .await
            .unwrap();
        ids.push(task.id);
    }
    request_task(storage, executor, None).await;
    for id in ids.drain(..) {
        complete_task(storage, executor, id).await;
    }

    // Level 4: the merge proof closes the DAG
    let merge = request_task(storage, executor, Some(TaskType::MergeProof))
        .await
        .unwrap();
    complete_task(storage, executor, merge.id).await;

    request_task(storage, executor, None).await;
}

#[tokio::test]
async fn test_skip_rate_short_circuits_tasks() {
    let fixture = fixture(10);
    let executor = TaskExecutorId::new(3);

    let provider = provider_task(TaskType::ProofBlock);
    fixture.handler.handle(executor, &provider).await.unwrap();

    // no DAG was planned
    request_task(&fixture.task_storage, executor, None).await;

    // a synthetic success result was queued instead
    let result = fixture.result_storage.try_pop_pending().await.unwrap().unwrap();
    assert_eq!(result.task_id, provider.id);
    assert!(result.is_success);
    assert!(result.artifacts.is_empty());
    assert_eq!(result.data, provider.block_hash.as_bytes().to_vec());

    assert!(fixture.result_storage.try_pop_pending().await.unwrap().is_none());
}

#[tokio::test]
async fn test_skip_rate_applies_to_first_of_every_ten() {
    let fixture = fixture(2);
    let executor = TaskExecutorId::new(4);

    // first two tasks are skipped, the third is planned
    for _ in 0..2 {
        let provider = provider_task(TaskType::AggregateProofs);
        fixture.handler.handle(executor, &provider).await.unwrap();
        request_task(&fixture.task_storage, executor, None).await;
    }

    let provider = provider_task(TaskType::AggregateProofs);
    fixture.handler.handle(executor, &provider).await.unwrap();
    request_task(
        &fixture.task_storage,
        executor,
        Some(TaskType::AggregateProofs),
    )
    .await;
}

#[tokio::test]
async fn test_failed_result_requeues_task() {
    let fixture = fixture(0);
    let executor = TaskExecutorId::new(5);

    let provider = provider_task(TaskType::AggregateProofs);
    fixture.handler.handle(executor, &provider).await.unwrap();

    let task = request_task(
        &fixture.task_storage,
        executor,
        Some(TaskType::AggregateProofs),
    )
    .await
    .unwrap();

    // while running, the task is not handed out again
    request_task(&fixture.task_storage, executor, None).await;

    let failure = TaskResult::failure(task.id, executor, "prover crashed");
    fixture.task_storage.process_task_result(&failure).await.unwrap();

    let retried = request_task(
        &fixture.task_storage,
        TaskExecutorId::new(6),
        Some(TaskType::AggregateProofs),
    )
    .await
    .unwrap();
    assert_eq!(retried.id, task.id);
}

#[tokio::test]
async fn test_result_for_unknown_task_is_ignored() {
    let fixture = fixture(0);
    let result = TaskResult::success(
        TaskId::new(),
        TaskExecutorId::new(1),
        IndexMap::new(),
        vec![],
    );
    fixture.task_storage.process_task_result(&result).await.unwrap();
}

#[tokio::test]
async fn test_batch_seeds_block_proof_tasks() {
    let fixture = fixture(0);
    let executor = TaskExecutorId::new(8);

    let mut chain = BatchChainBuilder::new(2);
    let batch = chain.next_batch();
    let entries = batch.create_proof_tasks(1_000);
    fixture.task_storage.add_task_entries(&entries).await.unwrap();

    // both block proofs are runnable, the aggregate is gated on them
    let first = request_task(&fixture.task_storage, executor, Some(TaskType::ProofBlock))
        .await
        .unwrap();
    let second = request_task(&fixture.task_storage, executor, Some(TaskType::ProofBlock))
        .await
        .unwrap();
    request_task(&fixture.task_storage, executor, None).await;

    complete_task(&fixture.task_storage, executor, first.id).await;
    complete_task(&fixture.task_storage, executor, second.id).await;

    let aggregate = request_task(
        &fixture.task_storage,
        executor,
        Some(TaskType::AggregateProofs),
    )
    .await
    .unwrap();
    assert_eq!(aggregate.batch_id, batch.id);
}
