use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use kestrel_common::time::Clock;
use log::{debug, error, info};

use crate::core::error::ChainError;
use crate::core::storage::{TaskResultStorage, TaskStorage};
use crate::core::types::{
    CircuitType, Task, TaskEntry, TaskExecutorId, TaskResult, TaskType, CIRCUIT_AMOUNT,
};

pub const SKIP_RATE_MAX: usize = 10;

/// Expands provider tasks into the per-block proof DAG.
///
/// A `ProofBlock` task becomes five levels of circuit-stratified work; an
/// `AggregateProofs` task is re-issued as a single child entry. Any other
/// type is rejected. A configurable skip rate short-circuits the first
/// `skip_rate` out of every 10 tasks with a synthetic success result.
pub struct TaskHandler {
    task_storage: Arc<TaskStorage>,
    result_saver: Arc<TaskResultStorage>,
    skip_rate: usize,
    task_num: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl TaskHandler {
    pub fn new(
        task_storage: Arc<TaskStorage>,
        result_saver: Arc<TaskResultStorage>,
        skip_rate: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TaskHandler {
            task_storage,
            result_saver,
            skip_rate: skip_rate.min(SKIP_RATE_MAX),
            task_num: AtomicUsize::new(0),
            clock,
        }
    }

    pub async fn handle(&self, executor: TaskExecutorId, task: &Task) -> Result<(), ChainError> {
        if task.task_type != TaskType::ProofBlock && task.task_type != TaskType::AggregateProofs {
            return Err(ChainError::NotSupportedTaskType(task.task_type));
        }

        let task_idx = self.task_num.fetch_add(1, Ordering::Relaxed) % 10;
        if task_idx < self.skip_rate {
            debug!("skipping task {}", task.id);
            let skipped = TaskResult::success(
                task.id,
                executor,
                IndexMap::new(),
                task.block_hash.as_bytes().to_vec(),
            );
            if let Err(err) = self.result_saver.put(&skipped).await {
                error!(
                    "failed to save skipped result for task {}: {}",
                    task.id, err
                );
            }
            return Ok(());
        }

        info!(
            "creating proof tasks for block {} (batch {})",
            task.block_hash, task.batch_id
        );

        let entries = match task.task_type {
            TaskType::ProofBlock => self.prepare_tasks_for_block(task),
            _ => vec![task.as_new_child_entry(self.clock.now())],
        };

        match self.task_storage.add_task_entries(&entries).await {
            Ok(()) => {
                debug!("created {} proof tasks for task {}", entries.len(), task.id);
                Ok(())
            }
            Err(err) => {
                error!("failed to create proof tasks for task {}: {}", task.id, err);
                Err(err)
            }
        }
    }

    fn prepare_tasks_for_block(&self, provider: &Task) -> Vec<TaskEntry> {
        let now = self.clock.now();

        // Final task, depends on partial proofs, aggregated FRI and the
        // consistency checks
        let mut merge = TaskEntry::new_merge_proof(provider, now);

        // Third level of circuit-dependent tasks
        let mut consistency_checks: IndexMap<CircuitType, TaskEntry> = IndexMap::new();
        for circuit in CircuitType::all() {
            let check = TaskEntry::new_fri_consistency_check(provider, circuit, now);
            merge.add_dependency(&check);
            consistency_checks.insert(circuit, check);
        }

        // Aggregated FRI feeds the merge task and every consistency check
        let mut agg_fri = TaskEntry::new_aggregated_fri(provider, now);
        merge.add_dependency(&agg_fri);
        for check in consistency_checks.values_mut() {
            check.add_dependency(&agg_fri);
        }

        // Second level of circuit-dependent tasks
        let mut combined_q: IndexMap<CircuitType, TaskEntry> = IndexMap::new();
        for circuit in CircuitType::all() {
            combined_q.insert(circuit, TaskEntry::new_combined_q(provider, circuit, now));
        }
        for (circuit, combined) in &combined_q {
            agg_fri.add_dependency(combined);
            if let Some(check) = consistency_checks.get_mut(circuit) {
                check.add_dependency(combined);
            }
        }

        // The aggregated challenge gates every combined Q and the FRI pass
        let mut agg_challenge = TaskEntry::new_aggregated_challenge(provider, now);
        for combined in combined_q.values_mut() {
            combined.add_dependency(&agg_challenge);
        }
        agg_fri.add_dependency(&agg_challenge);

        // Partial proofs form the bottom level and feed everything above
        let mut partials = Vec::with_capacity(CIRCUIT_AMOUNT);
        for circuit in CircuitType::all() {
            let partial = TaskEntry::new_partial_prove(provider, circuit, now);
            agg_challenge.add_dependency(&partial);
            if let Some(combined) = combined_q.get_mut(&circuit) {
                combined.add_dependency(&partial);
            }
            agg_fri.add_dependency(&partial);
            if let Some(check) = consistency_checks.get_mut(&circuit) {
                check.add_dependency(&partial);
            }
            merge.add_dependency(&partial);
            partials.push(partial);
        }

        let mut entries = Vec::with_capacity(3 + 3 * CIRCUIT_AMOUNT);
        entries.push(merge);
        entries.extend(consistency_checks.into_values());
        entries.push(agg_fri);
        entries.extend(combined_q.into_values());
        entries.push(agg_challenge);
        entries.extend(partials);
        entries
    }
}
