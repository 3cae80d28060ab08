use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Height of a block within its shard chain.
pub type BlockNumber = u64;

pub const SHARD_KEY_SIZE: usize = 4;

/// Identifier of a shard. Shard 0 is the main shard, execution shards
/// are numbered from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardId(u32);

impl ShardId {
    pub const MAIN: ShardId = ShardId(0);

    pub const fn new(id: u32) -> Self {
        ShardId(id)
    }

    pub const fn is_main(self) -> bool {
        self.0 == 0
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    // 4-byte little-endian form used as the KV key of per-shard singletons
    pub const fn to_key_bytes(self) -> [u8; SHARD_KEY_SIZE] {
        self.0.to_le_bytes()
    }

    pub fn from_key_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; SHARD_KEY_SIZE] = bytes.try_into().ok()?;
        Some(ShardId(u32::from_le_bytes(bytes)))
    }
}

impl From<u32> for ShardId {
    fn from(id: u32) -> Self {
        ShardId(id)
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
