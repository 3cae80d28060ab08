// Data model and client contract of the shard RPC endpoint the sync
// committee reads from. The transport itself is out of scope; the node
// core only depends on this trait.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Hash;
use crate::shard::{BlockNumber, ShardId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: Hash,
    #[serde(with = "hex", default)]
    pub payload: Vec<u8>,
}

/// Block as served by the RPC endpoint.
///
/// `child_blocks` is only populated on main shard blocks: index `s - 1`
/// holds the hash sealed by execution shard `s` in this round, zero when
/// the shard sealed nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub shard_id: ShardId,
    pub number: BlockNumber,
    pub hash: Hash,
    pub parent_hash: Hash,
    #[serde(default)]
    pub main_chain_hash: Hash,
    #[serde(default)]
    pub child_blocks: Vec<Hash>,
    #[serde(default)]
    pub child_blocks_root_hash: Hash,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

/// How a single block is addressed in a `get_block` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReference {
    Latest,
    Number(BlockNumber),
    Hash(Hash),
}

impl Display for BlockReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReference::Latest => write!(f, "latest"),
            BlockReference::Number(number) => write!(f, "{}", number),
            BlockReference::Hash(hash) => write!(f, "{}", hash),
        }
    }
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Client side of the shard RPC. `get_blocks_range` returns blocks in
/// ascending `number` order; `batch_hint` bounds the page size used by the
/// transport.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn get_block(
        &self,
        shard: ShardId,
        reference: BlockReference,
        full_txs: bool,
    ) -> RpcResult<RpcBlock>;

    async fn get_blocks_range(
        &self,
        shard: ShardId,
        from: BlockNumber,
        to_exclusive: BlockNumber,
        full_txs: bool,
        batch_hint: usize,
    ) -> RpcResult<Vec<RpcBlock>>;
}
