use std::sync::Arc;

use kestrel_common::shard::ShardId;
use log::{debug, warn};
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};

use crate::config::CONFIG_CACHE_SIZE_NONZERO;
use crate::core::db::Store;
use crate::core::error::ChainError;

use super::accessor::ConfigAccessor;
use super::params::{
    validators_for_shard, ParamGasPrice, ParamL1BlockInfo, ParamValidators, PublicKeyMap,
    ValidatorInfo,
};

/// Materialised consensus configuration for one (shard, height).
/// Immutable once built; shared behind an `Arc` by every reader.
#[derive(Debug)]
pub struct ConfigParams {
    pub validators: Vec<ValidatorInfo>,
    pub public_keys: PublicKeyMap,
    pub gas_price: ParamGasPrice,
    pub l1_block_info: ParamL1BlockInfo,
}

impl ConfigParams {
    /// Round-robin proposer for a consensus round.
    pub fn proposer_at(&self, height: u64, round: u64) -> Option<&ValidatorInfo> {
        if self.validators.is_empty() {
            return None;
        }
        let index = (height.wrapping_add(round)) % self.validators.len() as u64;
        self.validators.get(index as usize)
    }
}

struct CacheSlot {
    shard: ShardId,
    height: u64,
    cell: OnceCell<Result<Arc<ConfigParams>, ChainError>>,
}

type ShardCache = Mutex<LruCache<u64, Arc<CacheSlot>>>;

/// Per-shard LRU of consensus configurations, each slot built at most once
/// under concurrency. One instance is shared across every shard worker and
/// verifier in the process.
pub struct ConfigCache {
    shards: Vec<ShardCache>,
    store: Arc<Store>,
}

impl ConfigCache {
    pub fn new(n_shards: u32, store: Arc<Store>) -> Self {
        let shards = (0..n_shards)
            .map(|_| Mutex::new(LruCache::new(CONFIG_CACHE_SIZE_NONZERO)))
            .collect();
        ConfigCache { shards, store }
    }

    /// Returns the configuration for `(shard, height)`, building it if this
    /// is the first request. Concurrent callers for the same pair coalesce
    /// onto a single build; failed builds are not cached.
    pub async fn get_params(
        &self,
        shard: ShardId,
        height: u64,
    ) -> Result<Arc<ConfigParams>, ChainError> {
        let Some(cache) = self.shards.get(shard.as_usize()) else {
            return Err(ChainError::ShardIdTooBig);
        };

        let slot = {
            let mut cache = cache.lock().await;
            cache
                .get_or_insert(height, || {
                    Arc::new(CacheSlot {
                        shard,
                        height,
                        cell: OnceCell::new(),
                    })
                })
                .clone()
        };

        let result = slot
            .cell
            .get_or_init(|| build_params(self.store.clone(), shard, height))
            .await
            .clone();

        if let Err(err) = &result {
            // The height may simply not be materialised yet; drop the slot
            // so later callers can retry the build.
            debug!(
                "config build failed for shard {} height {}: {}",
                slot.shard, slot.height, err
            );
            let mut cache = cache.lock().await;
            if let Some(current) = cache.peek(&height) {
                if Arc::ptr_eq(current, &slot) {
                    cache.pop(&height);
                }
            }
        }

        result
    }
}

async fn build_params(
    store: Arc<Store>,
    shard: ShardId,
    height: u64,
) -> Result<Arc<ConfigParams>, ChainError> {
    let tx = store.ro_tx();
    let accessor = ConfigAccessor::for_shard(&tx, shard, height)?;

    let validators_param: ParamValidators = accessor.get_param()?;
    let validators = validators_for_shard(&validators_param, shard)?;
    let public_keys = PublicKeyMap::from_validators(&validators)?;
    let gas_price: ParamGasPrice = accessor.get_param()?;
    let l1_block_info: ParamL1BlockInfo = accessor.get_param()?;

    // The gas price list covers every shard including the main one, the
    // validators list only execution shards.
    if gas_price.n_shards() as usize != validators_param.validators.len() + 1 {
        warn!(
            "config snapshot {} has {} gas price entries but {} validator lists",
            accessor.main_chain_hash(),
            gas_price.n_shards(),
            validators_param.validators.len()
        );
    }

    Ok(Arc::new(ConfigParams {
        validators,
        public_keys,
        gas_price,
        l1_block_info,
    }))
}
