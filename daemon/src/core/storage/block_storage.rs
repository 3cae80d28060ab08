// Persistence of fetched block batches and the proposal state machine.
//
// All operations are transactional: readers run on a snapshot, writers
// stage into an overlay committed atomically. A main block moves
// Fetched -> Proved -> proposed-and-deleted, with `reset_progress`
// rewinding any suffix of the chain.

use std::sync::Arc;

use kestrel_common::crypto::Hash;
use kestrel_common::rpc::RpcBlock;
use kestrel_common::shard::ShardId;
use kestrel_common::time::Clock;
use log::{debug, info, trace};

use crate::core::db::{Column, KvRead, RwTx, Store};
use crate::core::error::ChainError;
use crate::core::types::{
    child_block_ids, BatchId, BlockBatch, BlockEntry, BlockId, MainBlockRef, ProposalData,
};
use crate::metrics;

use super::retry::with_retries;

const MAIN_SHARD_KEY: [u8; 4] = ShardId::MAIN.to_key_bytes();

pub struct BlockStorage {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl BlockStorage {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        BlockStorage { store, clock }
    }

    pub async fn try_get_proved_state_root(&self) -> Result<Option<Hash>, ChainError> {
        let tx = self.store.ro_tx();
        get_proved_state_root(&tx)
    }

    pub async fn set_proved_state_root(&self, state_root: Hash) -> Result<(), ChainError> {
        if state_root.is_zero() {
            return Err(ChainError::InvalidArgument(
                "state root cannot be empty".to_string(),
            ));
        }

        let mut tx = self.store.rw_tx();
        tx.put(
            Column::StateRoot,
            MAIN_SHARD_KEY.to_vec(),
            state_root.as_bytes().to_vec(),
        );
        tx.commit()
    }

    /// Id of the latest created batch, or `None` if no batches exist yet
    /// or a full reset rewound past the first one.
    pub async fn try_get_latest_batch_id(&self) -> Result<Option<BatchId>, ChainError> {
        let tx = self.store.ro_tx();
        get_latest_batch_id(&tx)
    }

    pub async fn try_get_latest_fetched(&self) -> Result<Option<MainBlockRef>, ChainError> {
        let tx = self.store.ro_tx();
        get_latest_fetched(&tx)
    }

    pub async fn try_get_block(&self, id: &BlockId) -> Result<Option<RpcBlock>, ChainError> {
        let tx = self.store.ro_tx();
        Ok(try_get_entry(&tx, &id.to_key_bytes())?.map(|entry| entry.block))
    }

    /// Persists a batch and all of its blocks, enforcing both parent-chain
    /// invariants. Transient failures are retried; mismatches surface.
    pub async fn set_block_batch(&self, batch: &BlockBatch) -> Result<(), ChainError> {
        with_retries(|| self.set_block_batch_impl(batch)).await
    }

    async fn set_block_batch_impl(&self, batch: &BlockBatch) -> Result<(), ChainError> {
        let mut tx = self.store.rw_tx();

        self.put_block(&mut tx, batch, &batch.main_block)?;
        for child in &batch.child_blocks {
            self.put_block(&mut tx, batch, child)?;
        }

        seed_propose_parent_hash(&mut tx, &batch.main_block)?;
        update_latest_fetched(&mut tx, &batch.main_block)?;

        let latest_batch_id = get_latest_batch_id(&tx)?;
        validate_latest_batch_id(batch, latest_batch_id.as_ref())?;
        put_latest_batch_id(&mut tx, Some(&batch.id));

        tx.commit()
    }

    fn put_block(
        &self,
        tx: &mut RwTx<'_>,
        batch: &BlockBatch,
        block: &RpcBlock,
    ) -> Result<(), ChainError> {
        let entry = BlockEntry::new(batch, block.clone(), self.clock.now());
        let id = entry.id();
        let value = encode_entry(&entry)?;
        tx.put(Column::Blocks, id.to_key_bytes().to_vec(), value);
        tx.put(
            Column::BlocksParentHashIdx,
            entry.parent_id().to_key_bytes().to_vec(),
            id.to_key_bytes().to_vec(),
        );
        Ok(())
    }

    /// Marks a main block as proved. Idempotent; returns whether the
    /// transition happened.
    pub async fn set_block_as_proved(&self, id: &BlockId) -> Result<bool, ChainError> {
        let mut tx = self.store.rw_tx();

        let mut entry = get_entry(&tx, &id.to_key_bytes())?;
        if entry.is_proved {
            debug!("block {} is already marked as proved", id);
            return Ok(false);
        }

        entry.is_proved = true;
        tx.put(Column::Blocks, id.to_key_bytes().to_vec(), encode_entry(&entry)?);
        tx.commit()?;

        metrics::record_main_block_proved();
        Ok(true)
    }

    /// Selects the next proposal candidate without mutating state.
    pub async fn try_get_next_proposal_data(&self) -> Result<Option<ProposalData>, ChainError> {
        let tx = self.store.ro_tx();

        let state_root = get_proved_state_root(&tx)?.ok_or_else(|| {
            ChainError::InvalidArgument("proved state root is not initialized".to_string())
        })?;

        let Some(parent_hash) = get_propose_parent_hash(&tx)? else {
            debug!("next to propose parent hash is not set");
            return Ok(None);
        };

        let mut candidate = None;
        for (key, value) in tx.range(Column::Blocks, None, None)? {
            let entry = decode_entry(&key, &value)?;
            if is_valid_proposal_candidate(&entry, &parent_hash) {
                candidate = Some(entry);
                break;
            }
        }
        let Some(main_entry) = candidate else {
            debug!("no proved main shard block with parent {}", parent_hash);
            return Ok(None);
        };

        let mut transactions = main_entry.block.transactions.clone();
        for child_id in child_block_ids(&main_entry.block)? {
            let child = get_entry(&tx, &child_id.to_key_bytes())?;
            if !child.is_proved {
                return Err(ChainError::BlockNotFound(format!(
                    "child block {} is not proved",
                    child_id
                )));
            }
            transactions.extend(child.block.transactions.iter().cloned());
        }

        Ok(Some(ProposalData {
            main_block_hash: main_entry.block.hash.clone(),
            transactions,
            old_proved_state_root: state_root,
            new_proved_state_root: main_entry.block.child_blocks_root_hash.clone(),
            main_block_fetched_at: main_entry.fetched_at,
        }))
    }

    /// Advances the proved state root to the block's children root and
    /// removes the proposed batch from storage.
    pub async fn set_block_as_proposed(&self, id: &BlockId) -> Result<(), ChainError> {
        with_retries(|| self.set_block_as_proposed_impl(id)).await
    }

    async fn set_block_as_proposed_impl(&self, id: &BlockId) -> Result<(), ChainError> {
        let mut tx = self.store.rw_tx();

        let main_entry = get_entry(&tx, &id.to_key_bytes())?;
        validate_main_entry(&tx, id, &main_entry)?;

        delete_main_block_with_children(&mut tx, &main_entry)?;

        tx.put(
            Column::StateRoot,
            MAIN_SHARD_KEY.to_vec(),
            main_entry.block.child_blocks_root_hash.as_bytes().to_vec(),
        );
        put_propose_parent_hash(&mut tx, &main_entry.block.hash);

        tx.commit()
    }

    /// Rewinds storage to the parent of the given main block and deletes
    /// the chain segment rooted at it together with every child.
    pub async fn reset_progress(&self, first_main_hash_to_purge: Hash) -> Result<(), ChainError> {
        with_retries(|| self.reset_progress_impl(first_main_hash_to_purge.clone())).await
    }

    async fn reset_progress_impl(&self, first_main_hash_to_purge: Hash) -> Result<(), ChainError> {
        let mut tx = self.store.rw_tx();

        let starting_id = BlockId::new(ShardId::MAIN, first_main_hash_to_purge);
        let starting_entry = get_entry(&tx, &starting_id.to_key_bytes())?;

        reset_to_parent(&mut tx, &starting_entry)?;

        // Walk forward through the parent index; the walk ends when no
        // block links back to the current one.
        let mut current = starting_entry;
        loop {
            let current_id = current.id();
            delete_main_block_with_children(&mut tx, &current)?;

            let Some(next_id_bytes) =
                tx.get(Column::BlocksParentHashIdx, &current_id.to_key_bytes())?
            else {
                break;
            };
            current = get_entry(&tx, &next_id_bytes)?;
        }

        tx.commit()
    }
}

fn get_proved_state_root(tx: &impl KvRead) -> Result<Option<Hash>, ChainError> {
    let Some(bytes) = tx.get(Column::StateRoot, &MAIN_SHARD_KEY)? else {
        return Ok(None);
    };
    Hash::from_bytes(&bytes)
        .map(Some)
        .ok_or_else(|| ChainError::SerializationFailed("invalid state root".to_string()))
}

fn get_propose_parent_hash(tx: &impl KvRead) -> Result<Option<Hash>, ChainError> {
    let Some(bytes) = tx.get(Column::NextToProposeParentHash, &MAIN_SHARD_KEY)? else {
        return Ok(None);
    };
    Hash::from_bytes(&bytes).map(Some).ok_or_else(|| {
        ChainError::SerializationFailed("invalid next to propose parent hash".to_string())
    })
}

fn put_propose_parent_hash(tx: &mut RwTx<'_>, hash: &Hash) {
    tx.put(
        Column::NextToProposeParentHash,
        MAIN_SHARD_KEY.to_vec(),
        hash.as_bytes().to_vec(),
    );
}

fn get_latest_batch_id(tx: &impl KvRead) -> Result<Option<BatchId>, ChainError> {
    let Some(bytes) = tx.get(Column::LatestBatchId, &MAIN_SHARD_KEY)? else {
        return Ok(None);
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(&bytes)
        .map_err(|err| ChainError::SerializationFailed(err.to_string()))?;
    text.parse()
        .map(Some)
        .map_err(|err: uuid::Error| ChainError::SerializationFailed(err.to_string()))
}

// An explicit empty value marks "no batch" after a full reset; it is
// distinct from the key never having been written.
fn put_latest_batch_id(tx: &mut RwTx<'_>, batch_id: Option<&BatchId>) {
    let bytes = batch_id
        .map(|id| id.to_text().into_bytes())
        .unwrap_or_default();
    tx.put(Column::LatestBatchId, MAIN_SHARD_KEY.to_vec(), bytes);
}

fn get_latest_fetched(tx: &impl KvRead) -> Result<Option<MainBlockRef>, ChainError> {
    let Some(bytes) = tx.get(Column::LatestFetched, &MAIN_SHARD_KEY)? else {
        return Ok(None);
    };
    let block_ref: Option<MainBlockRef> = serde_json::from_slice(&bytes)?;
    Ok(block_ref)
}

fn put_latest_fetched(
    tx: &mut RwTx<'_>,
    block_ref: Option<&MainBlockRef>,
) -> Result<(), ChainError> {
    let bytes = serde_json::to_vec(&block_ref)?;
    tx.put(Column::LatestFetched, MAIN_SHARD_KEY.to_vec(), bytes);
    Ok(())
}

fn update_latest_fetched(tx: &mut RwTx<'_>, block: &RpcBlock) -> Result<(), ChainError> {
    if !block.shard_id.is_main() {
        return Ok(());
    }

    let latest = get_latest_fetched(tx)?;
    if latest.as_ref().is_some_and(|l| l.refers_to(block)) {
        return Ok(());
    }

    MainBlockRef::validate_next(latest.as_ref(), block)?;
    let new_latest = MainBlockRef::from_block(block)?;
    put_latest_fetched(tx, Some(&new_latest))
}

fn seed_propose_parent_hash(tx: &mut RwTx<'_>, block: &RpcBlock) -> Result<(), ChainError> {
    if !block.shard_id.is_main() {
        return Ok(());
    }
    if get_propose_parent_hash(tx)?.is_some() {
        return Ok(());
    }

    if block.number > 0 && block.parent_hash.is_zero() {
        return Err(ChainError::BlockMismatch(format!(
            "block {} has empty parent hash",
            block.hash
        )));
    }

    info!(
        "block parent hash is not set, seeding it: block={} parent={}",
        block.hash, block.parent_hash
    );
    put_propose_parent_hash(tx, &block.parent_hash);
    Ok(())
}

fn validate_latest_batch_id(
    batch: &BlockBatch,
    latest_batch_id: Option<&BatchId>,
) -> Result<(), ChainError> {
    let is_valid = match (latest_batch_id, batch.parent_id.as_ref()) {
        (None, None) => true,
        (None, Some(_)) | (Some(_), None) => false,
        (Some(latest), Some(parent)) => latest == parent,
    };

    if is_valid {
        return Ok(());
    }

    Err(ChainError::BatchMismatch(format!(
        "got batch with parent id {:?}, latest batch id is {:?}",
        batch.parent_id, latest_batch_id
    )))
}

fn is_valid_proposal_candidate(entry: &BlockEntry, parent_hash: &Hash) -> bool {
    entry.block.shard_id.is_main() && entry.is_proved && entry.block.parent_hash == *parent_hash
}

fn validate_main_entry(
    tx: &impl KvRead,
    id: &BlockId,
    entry: &BlockEntry,
) -> Result<(), ChainError> {
    if !entry.block.shard_id.is_main() {
        return Err(ChainError::InvalidArgument(format!(
            "block {} is not from the main shard",
            id
        )));
    }
    if !entry.is_proved {
        return Err(ChainError::InvalidArgument(format!(
            "block {} is not proved",
            id
        )));
    }

    let parent_hash = get_propose_parent_hash(tx)?.ok_or_else(|| {
        ChainError::InvalidArgument("next to propose parent hash is not set".to_string())
    })?;
    if parent_hash != entry.block.parent_hash {
        return Err(ChainError::BlockMismatch(format!(
            "parent hash {} is not equal to the stored value {}",
            entry.block.parent_hash, parent_hash
        )));
    }
    Ok(())
}

fn reset_to_parent(tx: &mut RwTx<'_>, entry: &BlockEntry) -> Result<(), ChainError> {
    let ref_to_parent = MainBlockRef::parent_of(&entry.block)?;
    put_latest_fetched(tx, ref_to_parent.as_ref())?;
    put_latest_batch_id(tx, entry.parent_batch_id.as_ref());
    Ok(())
}

fn delete_main_block_with_children(
    tx: &mut RwTx<'_>,
    main_entry: &BlockEntry,
) -> Result<(), ChainError> {
    for child_id in child_block_ids(&main_entry.block)? {
        let child = get_entry(tx, &child_id.to_key_bytes())?;
        delete_block(tx, &child);
    }
    delete_block(tx, main_entry);
    Ok(())
}

fn delete_block(tx: &mut RwTx<'_>, entry: &BlockEntry) {
    trace!("delete block {}", entry.id());
    tx.delete(
        Column::BlocksParentHashIdx,
        entry.parent_id().to_key_bytes().to_vec(),
    );
    tx.delete(Column::Blocks, entry.id().to_key_bytes().to_vec());
}

fn try_get_entry(tx: &impl KvRead, id_bytes: &[u8]) -> Result<Option<BlockEntry>, ChainError> {
    let Some(value) = tx.get(Column::Blocks, id_bytes)? else {
        return Ok(None);
    };
    Ok(Some(decode_entry(id_bytes, &value)?))
}

fn get_entry(tx: &impl KvRead, id_bytes: &[u8]) -> Result<BlockEntry, ChainError> {
    try_get_entry(tx, id_bytes)?.ok_or_else(|| {
        ChainError::BlockNotFound(format!("id={}", hex::encode(id_bytes)))
    })
}

fn encode_entry(entry: &BlockEntry) -> Result<Vec<u8>, ChainError> {
    serde_json::to_vec(entry).map_err(|err| {
        ChainError::SerializationFailed(format!(
            "failed to encode block {}: {}",
            entry.block.hash, err
        ))
    })
}

fn decode_entry(key: &[u8], value: &[u8]) -> Result<BlockEntry, ChainError> {
    // Reject entries stored under foreign shard keys before decoding.
    BlockId::from_key_bytes(key)?;
    serde_json::from_slice(value).map_err(|err| {
        ChainError::SerializationFailed(format!(
            "failed to decode block entry {}: {}",
            hex::encode(key),
            err
        ))
    })
}
