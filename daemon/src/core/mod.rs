pub mod aggregator;
pub mod batches;
pub mod config;
pub mod db;
pub mod error;
pub mod proofprovider;
pub mod storage;
pub mod types;
pub mod verifier;
pub mod workers;
