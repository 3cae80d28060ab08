use kestrel_common::crypto::hash;

use crate::core::error::ChainError;
use crate::core::types::PrunedBatch;

/// Batch wire encoding. Versioned; everything downstream of the encoder
/// treats the payload as opaque bytes.
pub trait BatchEncoder: Send + Sync {
    fn encode(&self, batch: &PrunedBatch) -> Result<Vec<u8>, ChainError>;
}

const ENCODING_VERSION: u8 = 1;

/// Version 1 framing: version byte, little-endian payload length, JSON
/// payload, blake3 checksum trailer.
#[derive(Debug, Default, Clone, Copy)]
pub struct V1Encoder;

impl BatchEncoder for V1Encoder {
    fn encode(&self, batch: &PrunedBatch) -> Result<Vec<u8>, ChainError> {
        let payload = serde_json::to_vec(batch)?;
        let checksum = hash(&payload);

        let mut out = Vec::with_capacity(1 + 4 + payload.len() + 32);
        out.push(ENCODING_VERSION);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out.extend_from_slice(checksum.as_bytes());
        Ok(out)
    }
}
