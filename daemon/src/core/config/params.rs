use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use kestrel_common::crypto::{bls, Address, Hash};
use kestrel_common::shard::ShardId;
use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::ChainError;

pub const VALIDATOR_PUBKEY_SIZE: usize = 128;

pub const NAME_VALIDATORS: &str = "curr_validators";
pub const NAME_GAS_PRICE: &str = "gas_price";
pub const NAME_L1_BLOCK: &str = "l1block";

/// Validator public key in its 128-byte wire form. Parsing into a usable
/// BLS key happens in [`PublicKeyMap`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Pubkey([u8; VALIDATOR_PUBKEY_SIZE]);

impl Pubkey {
    pub const fn new(bytes: [u8; VALIDATOR_PUBKEY_SIZE]) -> Self {
        Pubkey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VALIDATOR_PUBKEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<&bls::PublicKey> for Pubkey {
    fn from(key: &bls::PublicKey) -> Self {
        Pubkey(key.to_bytes())
    }
}

impl Debug for Pubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pubkey({})", self.to_hex())
    }
}

impl Display for Pubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Pubkey {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; VALIDATOR_PUBKEY_SIZE] =
            bytes.try_into().map_err(|_| "Invalid public key")?;
        Ok(Pubkey(bytes))
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Pubkey::from_str(&hex).map_err(SerdeError::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorInfo {
    pub public_key: Pubkey,
    pub withdrawal_address: Address,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorList {
    pub list: Vec<ValidatorInfo>,
}

/// One validator list per execution shard; shard `s` reads index `s - 1`,
/// the main shard merges all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamValidators {
    pub validators: Vec<ValidatorList>,
}

/// Gas price per shard, including the main shard at index 0. The list
/// length doubles as the configured shard count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamGasPrice {
    pub shards: Vec<u128>,
}

impl ParamGasPrice {
    pub fn n_shards(&self) -> u32 {
        self.shards.len() as u32
    }
}

/// Snapshot of the L1 anchor observed by consensus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamL1BlockInfo {
    pub number: u64,
    pub timestamp: u64,
    pub base_fee: u128,
    pub blob_base_fee: u128,
    pub hash: Hash,
}

/// A named consensus parameter with a stable text encoding. The set of
/// implementors is closed; see [`ParamValue`].
pub trait ConfigParam: Sized {
    const NAME: &'static str;

    fn marshal(&self) -> Result<Vec<u8>, ChainError>;
    fn unmarshal(data: &[u8]) -> Result<Self, ChainError>;

    fn into_value(self) -> ParamValue;
    fn from_value(value: ParamValue) -> Result<Self, ChainError>;
}

macro_rules! impl_config_param {
    ($param:ty, $name:expr, $variant:ident) => {
        impl ConfigParam for $param {
            const NAME: &'static str = $name;

            fn marshal(&self) -> Result<Vec<u8>, ChainError> {
                Ok(serde_json::to_vec(self)?)
            }

            fn unmarshal(data: &[u8]) -> Result<Self, ChainError> {
                Ok(serde_json::from_slice(data)?)
            }

            fn into_value(self) -> ParamValue {
                ParamValue::$variant(self)
            }

            fn from_value(value: ParamValue) -> Result<Self, ChainError> {
                match value {
                    ParamValue::$variant(param) => Ok(param),
                    _ => Err(ChainError::ParamCastFailed {
                        expected: Self::NAME,
                    }),
                }
            }
        }
    };
}

impl_config_param!(ParamValidators, NAME_VALIDATORS, Validators);
impl_config_param!(ParamGasPrice, NAME_GAS_PRICE, GasPrice);
impl_config_param!(ParamL1BlockInfo, NAME_L1_BLOCK, L1BlockInfo);

/// Tagged union over the closed parameter set, used wherever params are
/// handled generically (bootstrap, dumps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Validators(ParamValidators),
    GasPrice(ParamGasPrice),
    L1BlockInfo(ParamL1BlockInfo),
}

impl ParamValue {
    pub fn name(&self) -> &'static str {
        match self {
            ParamValue::Validators(_) => NAME_VALIDATORS,
            ParamValue::GasPrice(_) => NAME_GAS_PRICE,
            ParamValue::L1BlockInfo(_) => NAME_L1_BLOCK,
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>, ChainError> {
        match self {
            ParamValue::Validators(param) => param.marshal(),
            ParamValue::GasPrice(param) => param.marshal(),
            ParamValue::L1BlockInfo(param) => param.marshal(),
        }
    }

    pub fn unmarshal(name: &str, data: &[u8]) -> Result<ParamValue, ChainError> {
        match name {
            NAME_VALIDATORS => Ok(ParamValue::Validators(ParamValidators::unmarshal(data)?)),
            NAME_GAS_PRICE => Ok(ParamValue::GasPrice(ParamGasPrice::unmarshal(data)?)),
            NAME_L1_BLOCK => Ok(ParamValue::L1BlockInfo(ParamL1BlockInfo::unmarshal(data)?)),
            other => Err(ChainError::SerializationFailed(format!(
                "unknown config param: {}",
                other
            ))),
        }
    }

    pub fn all_names() -> [&'static str; 3] {
        [NAME_VALIDATORS, NAME_GAS_PRICE, NAME_L1_BLOCK]
    }
}

/// Merged validator set used by the main shard: first occurrence of a
/// public key wins, order follows the shard lists.
pub fn merge_validators(lists: &[ValidatorList]) -> Vec<ValidatorInfo> {
    let mut visited = HashSet::new();
    let mut merged = Vec::new();
    for shard_list in lists {
        for validator in &shard_list.list {
            if visited.insert(validator.public_key.clone()) {
                merged.push(validator.clone());
            }
        }
    }
    merged
}

/// Validator list for one shard per the indexing rule above.
pub fn validators_for_shard(
    params: &ParamValidators,
    shard: ShardId,
) -> Result<Vec<ValidatorInfo>, ChainError> {
    if shard.is_main() {
        return Ok(merge_validators(&params.validators));
    }
    params
        .validators
        .get(shard.as_usize() - 1)
        .map(|list| list.list.clone())
        .ok_or(ChainError::ShardIdTooBig)
}

/// Dense index over validator public keys: wire key to position, plus a
/// parallel vector of parsed BLS keys in insertion order.
#[derive(Debug, Default)]
pub struct PublicKeyMap {
    index: HashMap<Pubkey, u32>,
    keys: Vec<bls::PublicKey>,
}

impl PublicKeyMap {
    pub fn from_validators(validators: &[ValidatorInfo]) -> Result<Self, ChainError> {
        let mut map = PublicKeyMap::default();
        for validator in validators {
            map.add(&validator.public_key)?;
        }
        Ok(map)
    }

    fn add(&mut self, key: &Pubkey) -> Result<(), ChainError> {
        let parsed = bls::PublicKey::from_bytes(key.as_bytes())?;
        let position = self.keys.len() as u32;
        self.index.insert(key.clone(), position);
        self.keys.push(parsed);
        debug_assert_eq!(self.index.len(), self.keys.len());
        Ok(())
    }

    /// Parsed keys in insertion order.
    pub fn keys(&self) -> &[bls::PublicKey] {
        &self.keys
    }

    pub fn find(&self, key: &Pubkey) -> Option<u32> {
        self.index.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
