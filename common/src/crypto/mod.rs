pub mod bls;

mod address;
mod hash;

pub use address::{Address, ADDRESS_SIZE};
pub use hash::{hash, Hash, HASH_SIZE};
