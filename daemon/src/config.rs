use std::num::NonZeroUsize;
use std::time::Duration;

/// Per-shard capacity of the consensus config cache.
pub const CONFIG_CACHE_SIZE: usize = 16;

pub const CONFIG_CACHE_SIZE_NONZERO: NonZeroUsize = match NonZeroUsize::new(CONFIG_CACHE_SIZE) {
    Some(size) => size,
    None => panic!("config cache size must be non-zero"),
};

/// Upper bound on shard ids accepted when decoding persisted keys.
pub const MAX_SHARDS: u32 = 1024;

/// Delay between aggregator polling iterations.
pub const DEFAULT_POLLING_DELAY: Duration = Duration::from_millis(500);

/// Page size hint passed to ranged block requests.
pub const RPC_BATCH_SIZE: usize = 20;

/// Payload capacity of a single commitment blob: 4096 field elements of
/// 31 usable bytes each.
pub const MAX_BLOB_SIZE: usize = 4096 * 31;

/// Attempts made by the storage retry runner before surfacing a transient
/// error.
pub const STORAGE_RETRY_ATTEMPTS: usize = 5;

/// Initial backoff between storage retries; doubles on every attempt.
pub const STORAGE_RETRY_BACKOFF: Duration = Duration::from_millis(50);
