use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::shard::{BlockNumber, ShardId};

/// Block as sealed by a shard's consensus. This is the node-local shape
/// used by the config accessor and the signature verifier; the richer RPC
/// projection lives in [`crate::rpc::RpcBlock`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub shard: ShardId,
    pub number: BlockNumber,
    pub hash: Hash,
    /// Hash of the previous block in the same shard; zero for the first block.
    pub prev_block: Hash,
    /// Main shard block this block is anchored to; zero on the main shard.
    pub main_chain_hash: Hash,
    pub child_blocks_root_hash: Hash,
    /// Aggregated validator signature bytes; empty until the block is sealed.
    #[serde(with = "hex", default)]
    pub signature: Vec<u8>,
}

impl Block {
    /// Bytes covered by the consensus signature.
    pub fn signing_payload(&self) -> &[u8] {
        self.hash.as_bytes()
    }
}
