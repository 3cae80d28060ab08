mod blob;
mod encode;

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::MAX_BLOB_SIZE;
use crate::core::error::ChainError;
use crate::core::types::{BatchId, PrunedBatch};

pub use blob::BlobBuilder;
pub use encode::{BatchEncoder, V1Encoder};

/// Destination for committed batch blobs. There is no default target: the
/// committer requires one at construction.
#[async_trait]
pub trait CommitmentStore: Send + Sync {
    async fn store_blobs(&self, batch_id: BatchId, blobs: Vec<Vec<u8>>) -> Result<(), ChainError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CommitOptions {
    pub max_blob_size: usize,
}

impl Default for CommitOptions {
    fn default() -> Self {
        CommitOptions {
            max_blob_size: MAX_BLOB_SIZE,
        }
    }
}

/// Encodes a pruned batch and hands the resulting blobs to the commitment
/// store.
pub struct BatchCommitter {
    encoder: Box<dyn BatchEncoder>,
    builder: BlobBuilder,
    store: Arc<dyn CommitmentStore>,
    options: CommitOptions,
}

impl BatchCommitter {
    pub fn new(
        encoder: Box<dyn BatchEncoder>,
        builder: BlobBuilder,
        store: Arc<dyn CommitmentStore>,
        options: CommitOptions,
    ) -> Self {
        BatchCommitter {
            encoder,
            builder,
            store,
            options,
        }
    }

    pub async fn commit(&self, batch: &PrunedBatch) -> Result<(), ChainError> {
        let encoded = self.encoder.encode(batch)?;
        let blobs = self.builder.build(&encoded, self.options.max_blob_size)?;
        debug!(
            "committing batch {}: {} bytes in {} blobs",
            batch.batch_id,
            encoded.len(),
            blobs.len()
        );
        self.store.store_blobs(batch.batch_id, blobs).await
    }
}
