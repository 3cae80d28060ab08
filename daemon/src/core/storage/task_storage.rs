use std::sync::Arc;

use kestrel_common::time::Clock;
use log::{debug, trace};

use crate::core::db::{Column, KvRead, RwTx, Store};
use crate::core::error::ChainError;
use crate::core::types::{Task, TaskEntry, TaskExecutorId, TaskResult, TaskStatus};

use super::retry::with_retries;

/// Persistence of the proof-task DAG. A task is runnable once every
/// dependency has reported a successful result; entries store their
/// predecessors upward and shed them as results arrive.
pub struct TaskStorage {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl TaskStorage {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        TaskStorage { store, clock }
    }

    /// Inserts a set of task entries atomically.
    pub async fn add_task_entries(&self, entries: &[TaskEntry]) -> Result<(), ChainError> {
        with_retries(|| async {
            let mut tx = self.store.rw_tx();
            for entry in entries {
                put_entry(&mut tx, entry)?;
            }
            tx.commit()
        })
        .await
    }

    /// Hands out one runnable task and marks it running for the executor.
    /// Returns `None` when every remaining task still waits on input.
    pub async fn request_task_to_execute(
        &self,
        executor: TaskExecutorId,
    ) -> Result<Option<Task>, ChainError> {
        with_retries(|| async {
            let mut tx = self.store.rw_tx();
            for (key, value) in tx.range(Column::Tasks, None, None)? {
                let mut entry = decode_entry(&key, &value)?;
                if entry.status != TaskStatus::WaitingForExecutor {
                    continue;
                }

                entry.status = TaskStatus::Running;
                entry.owner = Some(executor);
                entry.started_at = Some(self.clock.now());
                put_entry(&mut tx, &entry)?;
                tx.commit()?;

                trace!("task {} handed to executor {}", entry.task.id, executor);
                return Ok(Some(entry.task));
            }
            Ok(None)
        })
        .await
    }

    /// Applies an executor's result: on success the finished entry is
    /// retired and every dependent sheds the dependency; on failure the
    /// task is re-queued. Everything happens in one transaction.
    pub async fn process_task_result(&self, result: &TaskResult) -> Result<(), ChainError> {
        with_retries(|| async {
            let mut tx = self.store.rw_tx();
            let key = result.task_id.to_key_bytes();

            let Some(value) = tx.get(Column::Tasks, &key)? else {
                debug!("task {} is not found, result is ignored", result.task_id);
                return Ok(());
            };
            let mut entry = decode_entry(&key, &value)?;

            if !result.is_success {
                debug!(
                    "task {} failed on executor {}: {}",
                    result.task_id,
                    result.sender,
                    result.error_text.as_deref().unwrap_or("unknown error")
                );
                entry.status = TaskStatus::WaitingForExecutor;
                entry.owner = None;
                entry.started_at = None;
                put_entry(&mut tx, &entry)?;
                return tx.commit();
            }

            tx.put(
                Column::TaskResults,
                key.to_vec(),
                serde_json::to_vec(result)?,
            );
            tx.delete(Column::Tasks, key.to_vec());

            // Unblock dependents of the finished task.
            for (dep_key, dep_value) in tx.range(Column::Tasks, None, None)? {
                let mut dependent = decode_entry(&dep_key, &dep_value)?;
                if !dependent.pending_dependencies.remove(&result.task_id) {
                    continue;
                }
                if dependent.pending_dependencies.is_empty()
                    && dependent.status == TaskStatus::WaitingForInput
                {
                    dependent.status = TaskStatus::WaitingForExecutor;
                }
                put_entry(&mut tx, &dependent)?;
            }

            tx.commit()
        })
        .await
    }
}

fn put_entry(tx: &mut RwTx<'_>, entry: &TaskEntry) -> Result<(), ChainError> {
    tx.put(
        Column::Tasks,
        entry.task.id.to_key_bytes().to_vec(),
        serde_json::to_vec(entry)?,
    );
    Ok(())
}

fn decode_entry(key: &[u8], value: &[u8]) -> Result<TaskEntry, ChainError> {
    serde_json::from_slice(value).map_err(|err| {
        ChainError::SerializationFailed(format!(
            "failed to decode task entry {}: {}",
            hex::encode(key),
            err
        ))
    })
}
