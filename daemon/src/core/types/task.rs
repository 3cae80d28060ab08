use std::collections::BTreeSet;

use indexmap::IndexMap;
use kestrel_common::crypto::Hash;
use kestrel_common::rpc::RpcBlock;
use kestrel_common::shard::{BlockNumber, ShardId};
use kestrel_common::time::TimestampMillis;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

use super::{BatchId, TaskExecutorId, TaskId};

/// Kinds of proof tasks. The set is closed; the planner only accepts
/// `ProofBlock` and `AggregateProofs` as providers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ProofBlock,
    PartialProve,
    AggregatedChallenge,
    CombinedQ,
    AggregatedFri,
    FriConsistencyChecks,
    MergeProof,
    AggregateProofs,
}

pub const CIRCUIT_AMOUNT: usize = 4;

/// Circuits the proof of a block is stratified over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CircuitType {
    Bytecode,
    ReadWrite,
    Zkevm,
    Copy,
}

impl CircuitType {
    pub fn all() -> impl Iterator<Item = CircuitType> {
        Self::iter()
    }
}

/// A schedulable unit of proving work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_type: Option<CircuitType>,
    pub batch_id: BatchId,
    pub shard_id: ShardId,
    pub block_num: BlockNumber,
    pub block_hash: Hash,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    /// Ids of every predecessor whose result this task consumes.
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    pub created_at: TimestampMillis,
}

impl Task {
    /// Re-issues this task as its own child, used when an aggregate task
    /// is handed back to the planner for another round.
    pub fn as_new_child_entry(&self, now: TimestampMillis) -> TaskEntry {
        TaskEntry {
            task: Task {
                id: TaskId::new(),
                task_type: self.task_type,
                circuit_type: self.circuit_type,
                batch_id: self.batch_id,
                shard_id: self.shard_id,
                block_num: self.block_num,
                block_hash: self.block_hash.clone(),
                parent_task_id: Some(self.id),
                dependencies: BTreeSet::new(),
                created_at: now,
            },
            pending_dependencies: BTreeSet::new(),
            status: TaskStatus::WaitingForExecutor,
            owner: None,
            started_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Blocked on at least one unfinished dependency.
    WaitingForInput,
    /// Runnable, not yet handed to an executor.
    WaitingForExecutor,
    Running,
}

/// Persisted task plus its scheduling state. Dependencies are stored
/// upward: each entry records its predecessors, and `pending_dependencies`
/// shrinks as their results arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub task: Task,
    #[serde(default)]
    pub pending_dependencies: BTreeSet<TaskId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub owner: Option<TaskExecutorId>,
    #[serde(default)]
    pub started_at: Option<TimestampMillis>,
}

impl TaskEntry {
    fn derived(
        task_type: TaskType,
        circuit_type: Option<CircuitType>,
        provider: &Task,
        now: TimestampMillis,
    ) -> Self {
        TaskEntry {
            task: Task {
                id: TaskId::new(),
                task_type,
                circuit_type,
                batch_id: provider.batch_id,
                shard_id: provider.shard_id,
                block_num: provider.block_num,
                block_hash: provider.block_hash.clone(),
                parent_task_id: Some(provider.id),
                dependencies: BTreeSet::new(),
                created_at: now,
            },
            pending_dependencies: BTreeSet::new(),
            status: TaskStatus::WaitingForExecutor,
            owner: None,
            started_at: None,
        }
    }

    fn top_level(
        task_type: TaskType,
        batch_id: BatchId,
        block: &RpcBlock,
        now: TimestampMillis,
    ) -> Self {
        TaskEntry {
            task: Task {
                id: TaskId::new(),
                task_type,
                circuit_type: None,
                batch_id,
                shard_id: block.shard_id,
                block_num: block.number,
                block_hash: block.hash.clone(),
                parent_task_id: None,
                dependencies: BTreeSet::new(),
                created_at: now,
            },
            pending_dependencies: BTreeSet::new(),
            status: TaskStatus::WaitingForExecutor,
            owner: None,
            started_at: None,
        }
    }

    pub fn new_aggregate_proofs(batch_id: BatchId, block: &RpcBlock, now: TimestampMillis) -> Self {
        Self::top_level(TaskType::AggregateProofs, batch_id, block, now)
    }

    pub fn new_block_proof(batch_id: BatchId, block: &RpcBlock, now: TimestampMillis) -> Self {
        Self::top_level(TaskType::ProofBlock, batch_id, block, now)
    }

    pub fn new_partial_prove(provider: &Task, circuit: CircuitType, now: TimestampMillis) -> Self {
        Self::derived(TaskType::PartialProve, Some(circuit), provider, now)
    }

    pub fn new_aggregated_challenge(provider: &Task, now: TimestampMillis) -> Self {
        Self::derived(TaskType::AggregatedChallenge, None, provider, now)
    }

    pub fn new_combined_q(provider: &Task, circuit: CircuitType, now: TimestampMillis) -> Self {
        Self::derived(TaskType::CombinedQ, Some(circuit), provider, now)
    }

    pub fn new_aggregated_fri(provider: &Task, now: TimestampMillis) -> Self {
        Self::derived(TaskType::AggregatedFri, None, provider, now)
    }

    pub fn new_fri_consistency_check(
        provider: &Task,
        circuit: CircuitType,
        now: TimestampMillis,
    ) -> Self {
        Self::derived(TaskType::FriConsistencyChecks, Some(circuit), provider, now)
    }

    pub fn new_merge_proof(provider: &Task, now: TimestampMillis) -> Self {
        Self::derived(TaskType::MergeProof, None, provider, now)
    }

    /// Records `dependency` as a predecessor of this entry and blocks it
    /// until the dependency's result arrives.
    pub fn add_dependency(&mut self, dependency: &TaskEntry) {
        self.task.dependencies.insert(dependency.task.id);
        self.pending_dependencies.insert(dependency.task.id);
        self.status = TaskStatus::WaitingForInput;
    }
}

/// Outcome reported by an executor for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub sender: TaskExecutorId,
    pub is_success: bool,
    #[serde(default)]
    pub error_text: Option<String>,
    /// Named artifact references produced by the executor.
    #[serde(default)]
    pub artifacts: IndexMap<String, String>,
    #[serde(with = "hex", default)]
    pub data: Vec<u8>,
}

impl TaskResult {
    pub fn success(
        task_id: TaskId,
        sender: TaskExecutorId,
        artifacts: IndexMap<String, String>,
        data: Vec<u8>,
    ) -> Self {
        TaskResult {
            task_id,
            sender,
            is_success: true,
            error_text: None,
            artifacts,
            data,
        }
    }

    pub fn failure(task_id: TaskId, sender: TaskExecutorId, error: impl Into<String>) -> Self {
        TaskResult {
            task_id,
            sender,
            is_success: false,
            error_text: Some(error.into()),
            artifacts: IndexMap::new(),
            data: Vec::new(),
        }
    }
}
