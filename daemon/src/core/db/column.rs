use strum::{AsRefStr, Display, EnumIter};

/// Column families of the node database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    // Blocks fetched by the sync committee
    // {block_id} => {block entry}
    Blocks,
    // Parent linkage index over fetched blocks
    // {parent_block_id} => {block_id}
    BlocksParentHashIdx,
    // Reference to the latest fetched main shard block
    // {shard_key} => {main block ref}
    LatestFetched,
    // Identifier of the latest stored batch
    // {shard_key} => {batch id text}
    LatestBatchId,
    // Latest proved state root
    // {shard_key} => {hash}
    StateRoot,
    // Parent hash of the next block to propose
    // {shard_key} => {hash}
    NextToProposeParentHash,
    // Proof task DAG entries
    // {task_id} => {task entry}
    Tasks,
    // Results produced for provider tasks, pending submission
    // {task_id} => {task result}
    TaskResults,
    // Locally executed chain blocks, read by the config accessor
    // {shard_key}{block_number} => {block}
    ChainBlocks,
    // Consensus configuration parameters per snapshot
    // {main_block_hash}{param_name} => {param}
    ConfigParams,
}
