use kestrel_common::crypto::bls::BlsError;
use kestrel_common::rpc::RpcError;
use thiserror::Error;

use crate::core::types::TaskType;

/// Failure taxonomy of the node core. The enum is `Clone` so the config
/// cache can hand the same terminal error to every coalesced caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("shard id is too big")]
    ShardIdTooBig,

    #[error("block is not found: {0}")]
    BlockNotFound(String),

    #[error("block mismatch: {0}")]
    BlockMismatch(String),

    #[error("batch mismatch: {0}")]
    BatchMismatch(String),

    #[error("batch is not ready")]
    BatchNotReady,

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("failed to verify block: {0}")]
    BlockVerifyFailed(#[source] Box<ChainError>),

    #[error("task type is not supported: {0}")]
    NotSupportedTaskType(TaskType),

    #[error("cannot cast param to {expected}")]
    ParamCastFailed { expected: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(String),

    #[error("bls error: {0}")]
    Bls(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Deterministic failures surface to the caller instead of being
    /// retried by the storage retry runner.
    pub fn is_deterministic(&self) -> bool {
        matches!(
            self,
            ChainError::BlockMismatch(_)
                | ChainError::BlockNotFound(_)
                | ChainError::BatchMismatch(_)
                | ChainError::InvalidArgument(_)
        )
    }
}

impl From<rocksdb::Error> for ChainError {
    fn from(err: rocksdb::Error) -> Self {
        ChainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationFailed(err.to_string())
    }
}

impl From<BlsError> for ChainError {
    fn from(err: BlsError) -> Self {
        ChainError::Bls(err.to_string())
    }
}

impl From<RpcError> for ChainError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Cancelled => ChainError::Cancelled,
            other => ChainError::Rpc(other.to_string()),
        }
    }
}
