mod accessor;
mod cache;
mod params;

pub use accessor::{
    init_params, read_chain_block, set_param, write_chain_block, ConfigAccessor,
};
pub use cache::{ConfigCache, ConfigParams};
pub use params::{
    merge_validators, validators_for_shard, ConfigParam, ParamGasPrice, ParamL1BlockInfo,
    ParamValidators, ParamValue, Pubkey, PublicKeyMap, ValidatorInfo, ValidatorList,
    NAME_GAS_PRICE, NAME_L1_BLOCK, NAME_VALIDATORS, VALIDATOR_PUBKEY_SIZE,
};
