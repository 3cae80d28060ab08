use std::sync::Arc;

use kestrel_common::block::Block;
use kestrel_common::crypto::bls;
use kestrel_common::shard::ShardId;
use log::trace;

use crate::core::config::ConfigCache;
use crate::core::error::ChainError;

/// Verifies sealed block signatures against the cached validator set of
/// the block's height.
pub struct BlockVerifier {
    shard: ShardId,
    cache: Arc<ConfigCache>,
}

impl BlockVerifier {
    pub fn new(shard: ShardId, cache: Arc<ConfigCache>) -> Self {
        BlockVerifier { shard, cache }
    }

    pub async fn verify(&self, block: &Block) -> Result<(), ChainError> {
        trace!("verify block {} at height {}", block.hash, block.number);

        let params = self
            .cache
            .get_params(self.shard, block.number)
            .await
            .map_err(|err| ChainError::BlockVerifyFailed(Box::new(err)))?;

        let signature = bls::Signature::from_bytes(&block.signature)
            .map_err(|err| ChainError::BlockVerifyFailed(Box::new(err.into())))?;

        bls::verify(
            params.public_keys.keys(),
            block.signing_payload(),
            &signature,
            self.shard,
        )
        .map_err(|err| ChainError::BlockVerifyFailed(Box::new(err.into())))?;

        Ok(())
    }
}
