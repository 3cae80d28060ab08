#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use kestrel_common::crypto::{hash, Hash};
use kestrel_common::rpc::{
    BlockReference, RpcBlock, RpcClient, RpcError, RpcResult, RpcTransaction,
};
use kestrel_common::shard::ShardId;
use kestrel_daemon::core::batches::CommitmentStore;
use kestrel_daemon::core::db::Store;
use kestrel_daemon::core::error::ChainError;
use kestrel_daemon::core::types::{BatchId, BlockBatch};
use tempdir::TempDir;

pub fn open_store() -> (TempDir, Arc<Store>) {
    let dir = TempDir::new("kestrel-test").unwrap();
    let store = Store::open(dir.path()).unwrap();
    (dir, Arc::new(store))
}

pub fn seeded_hash(seed: u64) -> Hash {
    hash(&seed.to_le_bytes())
}

/// Produces sequential, correctly parent-linked block batches with a fixed
/// number of execution shard children per main block.
pub struct BatchChainBuilder {
    next_number: u64,
    prev_main_hash: Hash,
    prev_batch_id: Option<BatchId>,
    n_children: usize,
    seed: u64,
}

impl BatchChainBuilder {
    pub fn new(n_children: usize) -> Self {
        BatchChainBuilder {
            next_number: 1,
            prev_main_hash: seeded_hash(0xfeed),
            prev_batch_id: None,
            n_children,
            seed: 0,
        }
    }

    fn fresh_hash(&mut self) -> Hash {
        self.seed += 1;
        seeded_hash(self.seed.wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    pub fn next_batch(&mut self) -> BlockBatch {
        let number = self.next_number;

        let mut children = Vec::with_capacity(self.n_children);
        for shard in 1..=self.n_children as u32 {
            let child_hash = self.fresh_hash();
            let parent_hash = self.fresh_hash();
            let tx_hash = self.fresh_hash();
            children.push(RpcBlock {
                shard_id: ShardId::new(shard),
                number,
                hash: child_hash,
                parent_hash,
                main_chain_hash: Hash::zero(),
                child_blocks: vec![],
                child_blocks_root_hash: Hash::zero(),
                transactions: vec![RpcTransaction {
                    hash: tx_hash,
                    payload: vec![shard as u8],
                }],
            });
        }

        let main_hash = self.fresh_hash();
        let root_hash = self.fresh_hash();
        let tx_hash = self.fresh_hash();
        let main = RpcBlock {
            shard_id: ShardId::MAIN,
            number,
            hash: main_hash,
            parent_hash: self.prev_main_hash.clone(),
            main_chain_hash: Hash::zero(),
            child_blocks: children.iter().map(|c| c.hash.clone()).collect(),
            child_blocks_root_hash: root_hash,
            transactions: vec![RpcTransaction {
                hash: tx_hash,
                payload: vec![0],
            }],
        };

        let batch = BlockBatch::new(self.prev_batch_id, main, children).unwrap();
        self.prev_batch_id = Some(batch.id);
        self.prev_main_hash = batch.main_block.hash.clone();
        self.next_number += 1;
        batch
    }
}

/// RPC endpoint fake backed by an in-memory chain that tests extend batch
/// by batch.
#[derive(Default)]
pub struct MockRpcClient {
    main_blocks: StdMutex<Vec<RpcBlock>>,
    children: StdMutex<HashMap<(ShardId, Hash), RpcBlock>>,
}

impl MockRpcClient {
    pub fn push_batch(&self, batch: &BlockBatch) {
        self.main_blocks
            .lock()
            .unwrap()
            .push(batch.main_block.clone());
        let mut children = self.children.lock().unwrap();
        for child in &batch.child_blocks {
            children.insert((child.shard_id, child.hash.clone()), child.clone());
        }
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    async fn get_block(
        &self,
        shard: ShardId,
        reference: BlockReference,
        _full_txs: bool,
    ) -> RpcResult<RpcBlock> {
        let found = match &reference {
            BlockReference::Latest => self.main_blocks.lock().unwrap().last().cloned(),
            BlockReference::Number(number) => self
                .main_blocks
                .lock()
                .unwrap()
                .iter()
                .find(|b| b.number == *number)
                .cloned(),
            BlockReference::Hash(hash) => {
                if shard.is_main() {
                    self.main_blocks
                        .lock()
                        .unwrap()
                        .iter()
                        .find(|b| b.hash == *hash)
                        .cloned()
                } else {
                    self.children
                        .lock()
                        .unwrap()
                        .get(&(shard, hash.clone()))
                        .cloned()
                }
            }
        };
        found.ok_or_else(|| RpcError::BlockNotFound(format!("{}/{}", shard, reference)))
    }

    async fn get_blocks_range(
        &self,
        _shard: ShardId,
        from: u64,
        to_exclusive: u64,
        _full_txs: bool,
        _batch_hint: usize,
    ) -> RpcResult<Vec<RpcBlock>> {
        Ok(self
            .main_blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.number >= from && b.number < to_exclusive)
            .cloned()
            .collect())
    }
}

/// Commitment store fake that records every commit.
#[derive(Default)]
pub struct MemoryCommitmentStore {
    commits: StdMutex<Vec<(BatchId, usize)>>,
}

impl MemoryCommitmentStore {
    pub fn commits(&self) -> Vec<(BatchId, usize)> {
        self.commits.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitmentStore for MemoryCommitmentStore {
    async fn store_blobs(&self, batch_id: BatchId, blobs: Vec<Vec<u8>>) -> Result<(), ChainError> {
        self.commits.lock().unwrap().push((batch_id, blobs.len()));
        Ok(())
    }
}

/// Commitment store fake whose upstream is never ready.
pub struct UnreadyCommitmentStore;

#[async_trait]
impl CommitmentStore for UnreadyCommitmentStore {
    async fn store_blobs(
        &self,
        _batch_id: BatchId,
        _blobs: Vec<Vec<u8>>,
    ) -> Result<(), ChainError> {
        Err(ChainError::BatchNotReady)
    }
}
