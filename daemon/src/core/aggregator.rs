// Sync committee aggregator: polls the main shard for new blocks, fetches
// their execution shard children, folds everything into parent-linked
// batches, commits each batch's encoded blob and seeds the proof task DAG.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use kestrel_common::rpc::{BlockReference, RpcBlock, RpcClient};
use kestrel_common::shard::ShardId;
use kestrel_common::time::Clock;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;

use crate::config::RPC_BATCH_SIZE;
use crate::core::batches::BatchCommitter;
use crate::core::error::ChainError;
use crate::core::storage::{BlockStorage, TaskStorage};
use crate::core::types::{
    child_block_ids, fetching_range, BlockBatch, BlocksRange, MainBlockRef, PrunedBatch,
};
use crate::core::workers::{Action, ShutdownSignal, Suspendable};
use crate::metrics;

pub struct Aggregator {
    inner: Arc<AggregatorInner>,
    worker: Suspendable,
}

struct AggregatorInner {
    client: Arc<dyn RpcClient>,
    block_storage: Arc<BlockStorage>,
    task_storage: Arc<TaskStorage>,
    committer: Arc<BatchCommitter>,
    clock: Arc<dyn Clock>,
}

impl Aggregator {
    pub const NAME: &'static str = "aggregator";

    pub fn new(
        client: Arc<dyn RpcClient>,
        block_storage: Arc<BlockStorage>,
        task_storage: Arc<TaskStorage>,
        committer: Arc<BatchCommitter>,
        clock: Arc<dyn Clock>,
        polling_delay: Duration,
    ) -> Self {
        let inner = Arc::new(AggregatorInner {
            client,
            block_storage,
            task_storage,
            committer,
            clock,
        });

        let action: Action = {
            let inner = inner.clone();
            Arc::new(move || {
                let inner = inner.clone();
                async move { inner.run_iteration().await }.boxed()
            })
        };

        Aggregator {
            inner,
            worker: Suspendable::new(action, polling_delay),
        }
    }

    /// Runs the polling loop until shutdown. Cancellation is returned
    /// unwrapped so the supervisor can treat it as a clean stop.
    pub async fn run(
        &self,
        shutdown: &ShutdownSignal,
        started: Option<oneshot::Sender<()>>,
    ) -> Result<(), ChainError> {
        info!("starting blocks fetching");

        let result = self.worker.run(shutdown, started).await;
        match &result {
            Ok(()) | Err(ChainError::Cancelled) => info!("blocks fetching stopped"),
            Err(err) => error!("error running aggregator, stopped: {}", err),
        }
        result
    }

    pub async fn pause(&self) -> Result<(), ChainError> {
        if self.worker.pause().await? {
            info!("blocks fetching paused");
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), ChainError> {
        if self.worker.resume().await? {
            info!("blocks fetching resumed");
        }
        Ok(())
    }

    /// Executes exactly one polling iteration, swallowing errors the same
    /// way the periodic loop does.
    pub async fn run_single_iteration(&self) {
        self.inner.run_iteration().await;
    }
}

impl AggregatorInner {
    async fn run_iteration(&self) {
        match self.process_new_blocks().await {
            Ok(()) => {}
            Err(ChainError::BatchNotReady) => {
                warn!("received unready block batch, skipping");
            }
            Err(ChainError::Cancelled) => {}
            Err(err) => {
                error!("error during processing new blocks: {}", err);
                metrics::record_error(Aggregator::NAME);
            }
        }
    }

    async fn process_new_blocks(&self) -> Result<(), ChainError> {
        let latest = self.fetch_latest_block_ref().await?;
        self.process_shard_blocks(latest).await
    }

    async fn fetch_latest_block_ref(&self) -> Result<MainBlockRef, ChainError> {
        let block = self
            .client
            .get_block(ShardId::MAIN, BlockReference::Latest, false)
            .await?;
        MainBlockRef::from_block(&block)
    }

    async fn process_shard_blocks(&self, actual_latest: MainBlockRef) -> Result<(), ChainError> {
        let latest_fetched = self.block_storage.try_get_latest_fetched().await?;

        match fetching_range(latest_fetched.as_ref(), &actual_latest)? {
            None => {
                debug!("no new blocks to fetch at {}", actual_latest.number);
                Ok(())
            }
            Some(range) => self.fetch_and_process_blocks(range).await,
        }
    }

    async fn fetch_and_process_blocks(&self, range: BlocksRange) -> Result<(), ChainError> {
        let blocks = self
            .client
            .get_blocks_range(ShardId::MAIN, range.start, range.end + 1, true, RPC_BATCH_SIZE)
            .await?;
        let fetched = blocks.len() as u64;

        for main_block in blocks {
            let batch = self.create_block_batch(main_block).await?;
            self.handle_block_batch(batch).await?;
        }

        debug!("fetched {} main shard blocks", fetched);
        metrics::record_block_batch_size(fetched);
        Ok(())
    }

    async fn create_block_batch(&self, main_block: RpcBlock) -> Result<BlockBatch, ChainError> {
        let child_ids = child_block_ids(&main_block)?;
        let mut children = Vec::with_capacity(child_ids.len());
        for child_id in child_ids {
            let child = self
                .client
                .get_block(child_id.shard, BlockReference::Hash(child_id.hash.clone()), true)
                .await?;
            children.push(child);
        }

        let latest_batch_id = self.block_storage.try_get_latest_batch_id().await?;
        BlockBatch::new(latest_batch_id, main_block, children)
    }

    async fn handle_block_batch(&self, batch: BlockBatch) -> Result<(), ChainError> {
        let latest_fetched = self.block_storage.try_get_latest_fetched().await?;
        MainBlockRef::validate_next(latest_fetched.as_ref(), &batch.main_block)?;

        let pruned = PrunedBatch::from_batch(&batch);
        self.committer.commit(&pruned).await?;

        self.create_proof_tasks(&batch).await?;
        self.block_storage.set_block_batch(&batch).await?;

        metrics::record_main_block_fetched();
        Ok(())
    }

    async fn create_proof_tasks(&self, batch: &BlockBatch) -> Result<(), ChainError> {
        let tasks = batch.create_proof_tasks(self.clock.now());
        self.task_storage.add_task_entries(&tasks).await?;
        debug!("created {} proof tasks for batch {}", tasks.len(), batch.id);
        Ok(())
    }
}
