use kestrel_common::block::Block;
use kestrel_common::crypto::Hash;
use kestrel_common::shard::{BlockNumber, ShardId, SHARD_KEY_SIZE};

use crate::core::db::{Column, KvRead, RoTx, RwTx};
use crate::core::error::ChainError;

use super::params::{ConfigParam, ParamValue};

fn chain_block_key(shard: ShardId, number: BlockNumber) -> [u8; SHARD_KEY_SIZE + 8] {
    let mut key = [0u8; SHARD_KEY_SIZE + 8];
    key[..SHARD_KEY_SIZE].copy_from_slice(&shard.to_key_bytes());
    // big-endian so ranged scans walk numbers in order
    key[SHARD_KEY_SIZE..].copy_from_slice(&number.to_be_bytes());
    key
}

fn param_key(main_chain_hash: &Hash, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + name.len());
    key.extend_from_slice(main_chain_hash.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn read_chain_block(
    tx: &impl KvRead,
    shard: ShardId,
    number: BlockNumber,
) -> Result<Option<Block>, ChainError> {
    let Some(data) = tx.get(Column::ChainBlocks, &chain_block_key(shard, number))? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&data)?))
}

pub fn write_chain_block(tx: &mut RwTx<'_>, block: &Block) -> Result<(), ChainError> {
    let key = chain_block_key(block.shard, block.number);
    tx.put(Column::ChainBlocks, key.to_vec(), serde_json::to_vec(block)?);
    Ok(())
}

/// Writes one parameter under the given configuration snapshot.
pub fn set_param<P: ConfigParam>(
    tx: &mut RwTx<'_>,
    main_chain_hash: &Hash,
    param: &P,
) -> Result<(), ChainError> {
    tx.put(
        Column::ConfigParams,
        param_key(main_chain_hash, P::NAME),
        param.marshal()?,
    );
    Ok(())
}

/// Writes every parameter of a snapshot at once; used by genesis setup and
/// test fixtures.
pub fn init_params(
    tx: &mut RwTx<'_>,
    main_chain_hash: &Hash,
    params: &[ParamValue],
) -> Result<(), ChainError> {
    for param in params {
        tx.put(
            Column::ConfigParams,
            param_key(main_chain_hash, param.name()),
            param.marshal()?,
        );
    }
    Ok(())
}

/// Reads named parameters out of the configuration snapshot identified by
/// a main chain block hash.
pub struct ConfigAccessor<'a, 'db> {
    tx: &'a RoTx<'db>,
    main_chain_hash: Hash,
}

impl<'a, 'db> ConfigAccessor<'a, 'db> {
    /// Resolves the snapshot a block is configured by. Execution shard
    /// blocks carry the anchor in `main_chain_hash`; main shard blocks use
    /// their previous block, and the first block uses itself.
    pub fn from_block(tx: &'a RoTx<'db>, block: &Block, shard: ShardId) -> Self {
        let main_chain_hash = if shard.is_main() {
            if block.prev_block.is_zero() {
                block.hash.clone()
            } else {
                block.prev_block.clone()
            }
        } else {
            block.main_chain_hash.clone()
        };
        ConfigAccessor {
            tx,
            main_chain_hash,
        }
    }

    /// Accessor for the configuration governing `(shard, height)`, located
    /// through the block preceding that height.
    pub fn for_shard(
        tx: &'a RoTx<'db>,
        shard: ShardId,
        height: BlockNumber,
    ) -> Result<Self, ChainError> {
        let number = height.checked_sub(1).ok_or_else(|| {
            ChainError::BlockNotFound("no block precedes height 0".to_string())
        })?;
        let block = read_chain_block(tx, shard, number)?.ok_or_else(|| {
            ChainError::BlockNotFound(format!(
                "chain block {}/{} is not available",
                shard, number
            ))
        })?;
        Ok(Self::from_block(tx, &block, shard))
    }

    pub fn main_chain_hash(&self) -> &Hash {
        &self.main_chain_hash
    }

    pub fn get_param<P: ConfigParam>(&self) -> Result<P, ChainError> {
        let key = param_key(&self.main_chain_hash, P::NAME);
        let data = self.tx.get(Column::ConfigParams, &key)?.ok_or_else(|| {
            ChainError::BlockNotFound(format!(
                "config param {} is not available for snapshot {}",
                P::NAME,
                self.main_chain_hash
            ))
        })?;
        P::unmarshal(&data)
    }
}
