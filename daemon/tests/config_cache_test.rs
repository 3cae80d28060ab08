mod common;

use std::sync::Arc;

use kestrel_common::block::Block;
use kestrel_common::crypto::{bls, Address, Hash};
use kestrel_common::shard::ShardId;
use kestrel_daemon::core::config::{
    init_params, write_chain_block, ConfigCache, ParamGasPrice, ParamL1BlockInfo,
    ParamValidators, ParamValue, Pubkey, ValidatorInfo, ValidatorList,
};
use kestrel_daemon::core::db::Store;
use kestrel_daemon::core::error::ChainError;
use kestrel_daemon::core::verifier::BlockVerifier;
use tempdir::TempDir;

use common::{open_store, seeded_hash};

const N_SHARDS: u32 = 4; // main + 3 execution shards

struct Fixture {
    _dir: TempDir,
    store: Arc<Store>,
    cache: Arc<ConfigCache>,
    keypairs: Vec<bls::KeyPair>,
    validators: ParamValidators,
}

fn validator(pair: &bls::KeyPair, seed: u8) -> ValidatorInfo {
    ValidatorInfo {
        public_key: Pubkey::from(pair.public_key()),
        withdrawal_address: Address::new([seed; 20]),
    }
}

fn fixture() -> Fixture {
    let (_dir, store) = open_store();
    let cache = Arc::new(ConfigCache::new(N_SHARDS, store.clone()));

    // one validator per execution shard
    let keypairs: Vec<bls::KeyPair> = (0..3)
        .map(|_| bls::KeyPair::generate(&mut rand::thread_rng()))
        .collect();
    let validators = ParamValidators {
        validators: keypairs
            .iter()
            .enumerate()
            .map(|(i, pair)| ValidatorList {
                list: vec![validator(pair, i as u8 + 1)],
            })
            .collect(),
    };

    Fixture {
        _dir,
        store,
        cache,
        keypairs,
        validators,
    }
}

fn gas_price() -> ParamGasPrice {
    ParamGasPrice {
        shards: vec![10, 20, 30, 40],
    }
}

fn l1_block() -> ParamL1BlockInfo {
    ParamL1BlockInfo {
        number: 19_000_000,
        timestamp: 1_700_000_000,
        base_fee: 7,
        blob_base_fee: 1,
        hash: seeded_hash(0x11),
    }
}

/// Writes the chain block preceding `height` on `shard` together with the
/// configuration snapshot it points at.
fn write_snapshot(fixture: &Fixture, shard: ShardId, height: u64, validators: &ParamValidators) {
    let snapshot_hash = seeded_hash(0x5000 + height);
    let block_hash = seeded_hash(0x6000 + height + shard.as_u32() as u64 * 1_000);

    let block = if shard.is_main() {
        Block {
            shard,
            number: height - 1,
            hash: block_hash,
            prev_block: snapshot_hash.clone(),
            main_chain_hash: Hash::zero(),
            child_blocks_root_hash: Hash::zero(),
            signature: vec![],
        }
    } else {
        Block {
            shard,
            number: height - 1,
            hash: block_hash,
            prev_block: Hash::zero(),
            main_chain_hash: snapshot_hash.clone(),
            child_blocks_root_hash: Hash::zero(),
            signature: vec![],
        }
    };

    let mut tx = fixture.store.rw_tx();
    write_chain_block(&mut tx, &block).unwrap();
    init_params(
        &mut tx,
        &snapshot_hash,
        &[
            ParamValue::Validators(validators.clone()),
            ParamValue::GasPrice(gas_price()),
            ParamValue::L1BlockInfo(l1_block()),
        ],
    )
    .unwrap();
    tx.commit().unwrap();
}

#[tokio::test]
async fn test_builds_params_for_execution_shard() {
    let fixture = fixture();
    let shard = ShardId::new(2);
    write_snapshot(&fixture, shard, 42, &fixture.validators);

    let params = fixture.cache.get_params(shard, 42).await.unwrap();

    // shard 2 reads the list at index 1
    assert_eq!(params.validators, fixture.validators.validators[1].list);
    assert_eq!(params.public_keys.len(), 1);
    assert_eq!(params.gas_price, gas_price());
    assert_eq!(params.l1_block_info, l1_block());

    let expected_key = &fixture.validators.validators[1].list[0].public_key;
    assert_eq!(params.public_keys.find(expected_key), Some(0));
}

#[tokio::test]
async fn test_main_shard_merges_validators_first_seen_wins() {
    let fixture = fixture();

    // shard 1's validator also appears in shard 3's list
    let mut validators = fixture.validators.clone();
    let duplicated = validators.validators[0].list[0].clone();
    validators.validators[2].list.insert(0, duplicated);

    write_snapshot(&fixture, ShardId::MAIN, 10, &validators);

    let params = fixture.cache.get_params(ShardId::MAIN, 10).await.unwrap();
    assert_eq!(params.validators.len(), 3);
    assert_eq!(params.public_keys.len(), 3);
    // first occurrence kept its withdrawal address
    assert_eq!(params.validators[0], fixture.validators.validators[0].list[0]);
}

#[tokio::test]
async fn test_shard_id_too_big() {
    let fixture = fixture();
    let err = fixture.cache.get_params(ShardId::new(N_SHARDS), 1).await;
    assert!(matches!(err, Err(ChainError::ShardIdTooBig)));
}

#[tokio::test]
async fn test_height_zero_has_no_config() {
    let fixture = fixture();
    let err = fixture.cache.get_params(ShardId::new(1), 0).await;
    assert!(matches!(err, Err(ChainError::BlockNotFound(_))));
}

#[tokio::test]
async fn test_failed_build_is_not_cached() {
    let fixture = fixture();
    let shard = ShardId::new(1);

    // the target height is not materialised yet
    let err = fixture.cache.get_params(shard, 50).await;
    assert!(matches!(err, Err(ChainError::BlockNotFound(_))));

    // once it lands, the same height builds fine
    write_snapshot(&fixture, shard, 50, &fixture.validators);
    let params = fixture.cache.get_params(shard, 50).await.unwrap();
    assert_eq!(params.validators, fixture.validators.validators[0].list);
}

#[tokio::test]
async fn test_first_main_block_uses_its_own_config() {
    let fixture = fixture();

    let block_hash = seeded_hash(0x42);
    let genesis = Block {
        shard: ShardId::MAIN,
        number: 0,
        hash: block_hash.clone(),
        prev_block: Hash::zero(),
        main_chain_hash: Hash::zero(),
        child_blocks_root_hash: Hash::zero(),
        signature: vec![],
    };

    let mut tx = fixture.store.rw_tx();
    write_chain_block(&mut tx, &genesis).unwrap();
    // the params live under the genesis block's own hash
    init_params(
        &mut tx,
        &block_hash,
        &[
            ParamValue::Validators(fixture.validators.clone()),
            ParamValue::GasPrice(gas_price()),
            ParamValue::L1BlockInfo(l1_block()),
        ],
    )
    .unwrap();
    tx.commit().unwrap();

    let params = fixture.cache.get_params(ShardId::MAIN, 1).await.unwrap();
    assert_eq!(params.validators.len(), 3);
}

#[tokio::test]
async fn test_concurrent_calls_coalesce_to_one_build() {
    let fixture = fixture();
    let shard = ShardId::new(3);
    write_snapshot(&fixture, shard, 42, &fixture.validators);

    let mut handles = Vec::with_capacity(100);
    for _ in 0..100 {
        let cache = fixture.cache.clone();
        handles.push(tokio::spawn(
            async move { cache.get_params(shard, 42).await },
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    // every caller observes the same built instance
    let first = &results[0];
    for other in &results[1..] {
        assert!(Arc::ptr_eq(first, other));
    }
}

#[tokio::test]
async fn test_verifier_accepts_sealed_block() {
    let fixture = fixture();
    let shard = ShardId::new(1);
    write_snapshot(&fixture, shard, 42, &fixture.validators);

    let mut block = Block {
        shard,
        number: 42,
        hash: seeded_hash(0x77),
        prev_block: seeded_hash(0x76),
        main_chain_hash: seeded_hash(0x10),
        child_blocks_root_hash: Hash::zero(),
        signature: vec![],
    };
    // shard 1 is validated by the keypair behind list index 0
    let signature = fixture.keypairs[0].sign(block.signing_payload(), shard);
    block.signature = signature.to_bytes().to_vec();

    let verifier = BlockVerifier::new(shard, fixture.cache.clone());
    verifier.verify(&block).await.unwrap();
}

#[tokio::test]
async fn test_verifier_rejects_bad_signature() {
    let fixture = fixture();
    let shard = ShardId::new(1);
    write_snapshot(&fixture, shard, 42, &fixture.validators);

    let mut block = Block {
        shard,
        number: 42,
        hash: seeded_hash(0x78),
        prev_block: seeded_hash(0x77),
        main_chain_hash: seeded_hash(0x10),
        child_blocks_root_hash: Hash::zero(),
        signature: vec![],
    };
    // signed by a validator of a different shard
    let signature = fixture.keypairs[1].sign(block.signing_payload(), shard);
    block.signature = signature.to_bytes().to_vec();

    let verifier = BlockVerifier::new(shard, fixture.cache.clone());
    let err = verifier.verify(&block).await;
    assert!(matches!(err, Err(ChainError::BlockVerifyFailed(_))));
}

#[tokio::test]
async fn test_verifier_wraps_cache_misses() {
    let fixture = fixture();
    let shard = ShardId::new(1);

    let block = Block {
        shard,
        number: 99, // no snapshot at this height
        hash: seeded_hash(0x79),
        prev_block: seeded_hash(0x78),
        main_chain_hash: seeded_hash(0x10),
        child_blocks_root_hash: Hash::zero(),
        signature: vec![],
    };

    let verifier = BlockVerifier::new(shard, fixture.cache.clone());
    let err = verifier.verify(&block).await;
    assert!(matches!(err, Err(ChainError::BlockVerifyFailed(_))));
}
