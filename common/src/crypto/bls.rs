// BLS signatures over BN254.
//
// Public keys live in G2 (128-byte uncompressed wire form), signatures in
// G1 (64 bytes). Aggregate verification reduces to a single multi-pairing
// check against the sum of the participating public keys.

use ark_bn254::{Bn254, Fq, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup};
use ark_ff::{PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::UniformRand;
use thiserror::Error;

use crate::shard::ShardId;

pub const PUBLIC_KEY_SIZE: usize = 128;
pub const SIGNATURE_SIZE: usize = 64;

const DOMAIN_TAG: &[u8] = b"kestrel-bls-v1";

#[derive(Debug, Error)]
pub enum BlsError {
    #[error("invalid public key encoding: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("empty public key set")]
    EmptyKeySet,
}

/// Parsed, curve-checked validator public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(G2Affine);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(BlsError::InvalidPublicKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )));
        }
        let point = G2Affine::deserialize_uncompressed(bytes)
            .map_err(|e| BlsError::InvalidPublicKey(format!("{:?}", e)))?;
        Ok(PublicKey(point))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        // Writing a valid point into a correctly sized buffer cannot fail.
        self.0
            .serialize_uncompressed(&mut out[..])
            .expect("fixed-size public key serialization");
        out
    }
}

/// Aggregate (or single) signature in G1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(G1Affine);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(BlsError::InvalidSignature(format!(
                "expected {} bytes, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            )));
        }
        let point = G1Affine::deserialize_uncompressed(bytes)
            .map_err(|e| BlsError::InvalidSignature(format!("{:?}", e)))?;
        Ok(Signature(point))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut out = [0u8; SIGNATURE_SIZE];
        // Writing a valid point into a correctly sized buffer cannot fail.
        self.0
            .serialize_uncompressed(&mut out[..])
            .expect("fixed-size signature serialization");
        out
    }

    /// Sums partial signatures over the same message into one aggregate.
    pub fn aggregate<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Signature {
        let sum: G1Projective = signatures.into_iter().map(|s| s.0.into_group()).sum();
        Signature(sum.into_affine())
    }
}

/// Signing key used by validators; the node core only needs it in tests
/// and tooling.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: Fr,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate<R: rand::RngCore + ?Sized>(rng: &mut R) -> Self {
        let secret = Fr::rand(rng);
        let public = PublicKey((G2Affine::generator() * secret).into_affine());
        KeyPair { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn sign(&self, msg: &[u8], shard: ShardId) -> Signature {
        let hm = hash_to_point(msg, shard);
        Signature((hm * self.secret).into_affine())
    }
}

/// Verifies an aggregate signature produced by every key in `keys` over
/// `msg`, domain-separated by the shard id.
pub fn verify(
    keys: &[PublicKey],
    msg: &[u8],
    signature: &Signature,
    shard: ShardId,
) -> Result<(), BlsError> {
    if keys.is_empty() {
        return Err(BlsError::EmptyKeySet);
    }

    let aggregated: G2Projective = keys.iter().map(|k| k.0.into_group()).sum();
    let hm = hash_to_point(msg, shard);

    // e(sig, g2) == e(H(m), agg) <=> e(sig, g2) * e(-H(m), agg) == 1
    let check = Bn254::multi_pairing(
        [signature.0, -hm],
        [G2Affine::generator(), aggregated.into_affine()],
    );
    if check.is_zero() {
        Ok(())
    } else {
        Err(BlsError::VerificationFailed)
    }
}

// Try-and-increment mapping to G1. BN254's G1 cofactor is one, so every
// curve point is already in the prime-order subgroup.
fn hash_to_point(msg: &[u8], shard: ShardId) -> G1Affine {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN_TAG);
    hasher.update(&shard.to_key_bytes());
    hasher.update(msg);
    let seed = hasher.finalize();

    let mut counter: u32 = 0;
    loop {
        let mut attempt = blake3::Hasher::new();
        attempt.update(seed.as_bytes());
        attempt.update(&counter.to_le_bytes());
        let digest = attempt.finalize();
        let bytes = digest.as_bytes();

        let x = Fq::from_le_bytes_mod_order(bytes);
        let greatest = (bytes[31] & 1) == 1;
        if let Some(point) = G1Affine::get_point_from_x_unchecked(x, greatest) {
            return point;
        }
        counter += 1;
    }
}
