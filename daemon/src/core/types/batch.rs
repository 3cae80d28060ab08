use kestrel_common::crypto::Hash;
use kestrel_common::rpc::{RpcBlock, RpcTransaction};
use kestrel_common::shard::{BlockNumber, ShardId};
use kestrel_common::time::TimestampMillis;
use serde::{Deserialize, Serialize};

use crate::core::error::ChainError;

use super::{BatchId, BlockId, TaskEntry};

/// Ids of the execution shard children listed in a main shard block.
/// Shard `s` publishes its hash at index `s - 1`; a zero hash marks a
/// round where the shard sealed no block.
pub fn child_block_ids(main_block: &RpcBlock) -> Result<Vec<BlockId>, ChainError> {
    if !main_block.shard_id.is_main() {
        return Err(ChainError::BlockMismatch(format!(
            "block {} is not from the main shard",
            main_block.hash
        )));
    }
    let mut ids = Vec::with_capacity(main_block.child_blocks.len());
    for (index, hash) in main_block.child_blocks.iter().enumerate() {
        if hash.is_zero() {
            continue;
        }
        let shard = ShardId::new(index as u32 + 1);
        ids.push(BlockId::new(shard, hash.clone()));
    }
    Ok(ids)
}

/// A main shard block joined with its direct execution shard children
/// under one id. Batches are parent-linked: each records the id of the
/// previous batch, the head of the chain has none.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBatch {
    pub id: BatchId,
    pub parent_id: Option<BatchId>,
    pub main_block: RpcBlock,
    pub child_blocks: Vec<RpcBlock>,
}

impl BlockBatch {
    /// Assembles a batch, checking that `child_blocks` are exactly the
    /// children the main block lists, in the same order.
    pub fn new(
        parent_id: Option<BatchId>,
        main_block: RpcBlock,
        child_blocks: Vec<RpcBlock>,
    ) -> Result<Self, ChainError> {
        let child_ids = child_block_ids(&main_block)?;
        if child_ids.len() != child_blocks.len() {
            return Err(ChainError::BlockMismatch(format!(
                "main block {} lists {} children, got {}",
                main_block.hash,
                child_ids.len(),
                child_blocks.len()
            )));
        }
        for (id, child) in child_ids.iter().zip(&child_blocks) {
            if id.shard != child.shard_id || id.hash != child.hash {
                return Err(ChainError::BlockMismatch(format!(
                    "child block {} does not match the id {} listed by main block {}",
                    child.hash, id, main_block.hash
                )));
            }
        }
        Ok(BlockBatch {
            id: BatchId::new(),
            parent_id,
            main_block,
            child_blocks,
        })
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = &RpcBlock> {
        std::iter::once(&self.main_block).chain(self.child_blocks.iter())
    }

    /// Top-level proof tasks seeded for this batch: one `AggregateProofs`
    /// for the main block, gated on one `ProofBlock` per child.
    pub fn create_proof_tasks(&self, now: TimestampMillis) -> Vec<TaskEntry> {
        let mut aggregate = TaskEntry::new_aggregate_proofs(self.id, &self.main_block, now);
        let mut proofs = Vec::with_capacity(self.child_blocks.len());
        for child in &self.child_blocks {
            let proof = TaskEntry::new_block_proof(self.id, child, now);
            aggregate.add_dependency(&proof);
            proofs.push(proof);
        }

        let mut entries = Vec::with_capacity(proofs.len() + 1);
        entries.push(aggregate);
        entries.extend(proofs);
        entries
    }
}

/// Transaction-hash projection of a block handed to the committer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedBlock {
    pub shard_id: ShardId,
    pub number: BlockNumber,
    pub hash: Hash,
    pub transactions: Vec<Hash>,
}

/// Batch view committed to the data availability layer: block identities
/// and transaction hashes, without payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrunedBatch {
    pub batch_id: BatchId,
    pub blocks: Vec<PrunedBlock>,
}

impl PrunedBatch {
    pub fn from_batch(batch: &BlockBatch) -> Self {
        let blocks = batch
            .all_blocks()
            .map(|block| PrunedBlock {
                shard_id: block.shard_id,
                number: block.number,
                hash: block.hash.clone(),
                transactions: block.transactions.iter().map(|tx| tx.hash.clone()).collect(),
            })
            .collect();
        PrunedBatch {
            batch_id: batch.id,
            blocks,
        }
    }
}

/// Persisted form of a fetched block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub block: RpcBlock,
    pub is_proved: bool,
    pub batch_id: BatchId,
    pub parent_batch_id: Option<BatchId>,
    pub fetched_at: TimestampMillis,
}

impl BlockEntry {
    pub fn new(batch: &BlockBatch, block: RpcBlock, fetched_at: TimestampMillis) -> Self {
        BlockEntry {
            block,
            is_proved: false,
            batch_id: batch.id,
            parent_batch_id: batch.parent_id,
            fetched_at,
        }
    }

    pub fn id(&self) -> BlockId {
        BlockId::from_block(&self.block)
    }

    pub fn parent_id(&self) -> BlockId {
        BlockId::parent_of(&self.block)
    }
}

/// Everything the proposer needs to submit the next proved batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalData {
    pub main_block_hash: Hash,
    pub transactions: Vec<RpcTransaction>,
    pub old_proved_state_root: Hash,
    pub new_proved_state_root: Hash,
    pub main_block_fetched_at: TimestampMillis,
}
