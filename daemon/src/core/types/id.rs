use std::fmt::{Display, Formatter};
use std::str::FromStr;

use kestrel_common::crypto::{Hash, HASH_SIZE};
use kestrel_common::rpc::RpcBlock;
use kestrel_common::shard::{ShardId, SHARD_KEY_SIZE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MAX_SHARDS;
use crate::core::error::ChainError;

/// Identifier of a block batch. The text form is stable and round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        BatchId(Uuid::new_v4())
    }

    pub fn to_text(&self) -> String {
        self.0.to_string()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::from_str(s).map(BatchId)
    }
}

/// Identifier of a proof task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }

    /// Canonical key form used by the task tables.
    pub fn to_key_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a task executor registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskExecutorId(u32);

impl TaskExecutorId {
    pub const fn new(id: u32) -> Self {
        TaskExecutorId(id)
    }
}

impl Display for TaskExecutorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const BLOCK_ID_SIZE: usize = SHARD_KEY_SIZE + HASH_SIZE;

/// Identity of a fetched block: its shard and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub shard: ShardId,
    pub hash: Hash,
}

impl BlockId {
    pub fn new(shard: ShardId, hash: Hash) -> Self {
        BlockId { shard, hash }
    }

    pub fn from_block(block: &RpcBlock) -> Self {
        BlockId::new(block.shard_id, block.hash.clone())
    }

    /// Id of the block's parent within the same shard.
    pub fn parent_of(block: &RpcBlock) -> Self {
        BlockId::new(block.shard_id, block.parent_hash.clone())
    }

    /// Canonical key form: 4-byte little-endian shard id followed by the
    /// block hash.
    pub fn to_key_bytes(&self) -> [u8; BLOCK_ID_SIZE] {
        let mut out = [0u8; BLOCK_ID_SIZE];
        out[..SHARD_KEY_SIZE].copy_from_slice(&self.shard.to_key_bytes());
        out[SHARD_KEY_SIZE..].copy_from_slice(self.hash.as_bytes());
        out
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        if bytes.len() != BLOCK_ID_SIZE {
            return Err(ChainError::SerializationFailed(format!(
                "invalid block id key length: {}",
                bytes.len()
            )));
        }
        let shard = ShardId::from_key_bytes(&bytes[..SHARD_KEY_SIZE]).ok_or_else(|| {
            ChainError::SerializationFailed("invalid shard key".to_string())
        })?;
        if shard.as_u32() >= MAX_SHARDS {
            return Err(ChainError::SerializationFailed(format!(
                "unknown shard id in block id key: {}",
                shard
            )));
        }
        let hash = Hash::from_bytes(&bytes[SHARD_KEY_SIZE..]).ok_or_else(|| {
            ChainError::SerializationFailed("invalid block hash".to_string())
        })?;
        Ok(BlockId { shard, hash })
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.shard, self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::crypto::hash;

    #[test]
    fn test_batch_id_text_round_trip() {
        let id = BatchId::new();
        let text = id.to_text();
        assert_eq!(BatchId::from_str(&text).unwrap(), id);
    }

    #[test]
    fn test_block_id_key_round_trip() {
        let id = BlockId::new(ShardId::new(7), hash(b"block"));
        let key = id.to_key_bytes();
        assert_eq!(BlockId::from_key_bytes(&key).unwrap(), id);
    }

    #[test]
    fn test_block_id_key_rejects_unknown_shard() {
        let id = BlockId::new(ShardId::new(MAX_SHARDS + 1), hash(b"block"));
        let key = id.to_key_bytes();
        assert!(BlockId::from_key_bytes(&key).is_err());
    }

    #[test]
    fn test_block_id_key_rejects_bad_length() {
        assert!(BlockId::from_key_bytes(&[0u8; 8]).is_err());
    }
}
