use crate::core::error::ChainError;

/// Splits an encoded batch into blobs of at most `max_blob_size` bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlobBuilder;

impl BlobBuilder {
    pub fn build(&self, data: &[u8], max_blob_size: usize) -> Result<Vec<Vec<u8>>, ChainError> {
        if max_blob_size == 0 {
            return Err(ChainError::InvalidArgument(
                "blob size must be non-zero".to_string(),
            ));
        }
        Ok(data.chunks(max_blob_size).map(<[u8]>::to_vec).collect())
    }
}
