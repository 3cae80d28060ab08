use std::sync::Arc;

use log::trace;

use crate::core::db::{Column, KvRead, Store};
use crate::core::error::ChainError;
use crate::core::types::TaskResult;

/// Queue of provider task results awaiting submission to the scheduler.
pub struct TaskResultStorage {
    store: Arc<Store>,
}

impl TaskResultStorage {
    pub fn new(store: Arc<Store>) -> Self {
        TaskResultStorage { store }
    }

    pub async fn put(&self, result: &TaskResult) -> Result<(), ChainError> {
        trace!("store result for task {}", result.task_id);
        let mut tx = self.store.rw_tx();
        tx.put(
            Column::TaskResults,
            result.task_id.to_key_bytes().to_vec(),
            serde_json::to_vec(result)?,
        );
        tx.commit()
    }

    /// Removes and returns one pending result, if any.
    pub async fn try_pop_pending(&self) -> Result<Option<TaskResult>, ChainError> {
        let mut tx = self.store.rw_tx();
        let Some((key, value)) = tx.range(Column::TaskResults, None, None)?.into_iter().next()
        else {
            return Ok(None);
        };
        let result = serde_json::from_slice(&value)?;
        tx.delete(Column::TaskResults, key);
        tx.commit()?;
        Ok(Some(result))
    }
}
