use kestrel_common::crypto::Hash;
use kestrel_common::rpc::RpcBlock;
use kestrel_common::shard::BlockNumber;
use serde::{Deserialize, Serialize};

use crate::core::error::ChainError;

/// Reference to a fetched main shard block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainBlockRef {
    pub number: BlockNumber,
    pub hash: Hash,
}

impl MainBlockRef {
    pub fn from_block(block: &RpcBlock) -> Result<Self, ChainError> {
        if !block.shard_id.is_main() {
            return Err(ChainError::BlockMismatch(format!(
                "block {} is not from the main shard",
                block.hash
            )));
        }
        Ok(MainBlockRef {
            number: block.number,
            hash: block.hash.clone(),
        })
    }

    /// Reference to the parent of a main shard block; `None` for the first
    /// block of the chain.
    pub fn parent_of(block: &RpcBlock) -> Result<Option<Self>, ChainError> {
        if !block.shard_id.is_main() {
            return Err(ChainError::BlockMismatch(format!(
                "block {} is not from the main shard",
                block.hash
            )));
        }
        if block.number == 0 {
            return Ok(None);
        }
        Ok(Some(MainBlockRef {
            number: block.number - 1,
            hash: block.parent_hash.clone(),
        }))
    }

    pub fn refers_to(&self, block: &RpcBlock) -> bool {
        self.number == block.number && self.hash == block.hash
    }

    /// Checks that `child` directly extends this reference.
    pub fn validate_child(&self, child: &RpcBlock) -> Result<(), ChainError> {
        if !child.shard_id.is_main() {
            return Err(ChainError::BlockMismatch(format!(
                "block {} is not from the main shard",
                child.hash
            )));
        }
        if child.number != self.number + 1 {
            return Err(ChainError::BlockMismatch(format!(
                "expected block number {}, got {} (hash={})",
                self.number + 1,
                child.number,
                child.hash
            )));
        }
        if child.parent_hash != self.hash {
            return Err(ChainError::BlockMismatch(format!(
                "expected parent hash {}, got {} (number={})",
                self.hash, child.parent_hash, child.number
            )));
        }
        Ok(())
    }

    /// `validate_child` that also accepts the genesis continuation when
    /// nothing was fetched yet.
    pub fn validate_next(prev: Option<&MainBlockRef>, child: &RpcBlock) -> Result<(), ChainError> {
        match prev {
            Some(prev) => prev.validate_child(child),
            None => Ok(()),
        }
    }
}

/// Inclusive range of main shard block numbers to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocksRange {
    pub start: BlockNumber,
    pub end: BlockNumber,
}

/// Next range to fetch given the latest stored and the actual chain head.
/// `None` means the node is caught up.
pub fn fetching_range(
    latest_fetched: Option<&MainBlockRef>,
    actual_latest: &MainBlockRef,
) -> Result<Option<BlocksRange>, ChainError> {
    let Some(latest_fetched) = latest_fetched else {
        return Ok(Some(BlocksRange {
            start: actual_latest.number,
            end: actual_latest.number,
        }));
    };

    if latest_fetched.number < actual_latest.number {
        return Ok(Some(BlocksRange {
            start: latest_fetched.number + 1,
            end: actual_latest.number,
        }));
    }

    if latest_fetched.number == actual_latest.number {
        if latest_fetched.hash != actual_latest.hash {
            return Err(ChainError::BlockMismatch(format!(
                "chain head diverged at {}: stored {}, actual {}",
                latest_fetched.number, latest_fetched.hash, actual_latest.hash
            )));
        }
        return Ok(None);
    }

    Err(ChainError::BlockMismatch(format!(
        "latest fetched block {} is ahead of the chain head {}",
        latest_fetched.number, actual_latest.number
    )))
}
