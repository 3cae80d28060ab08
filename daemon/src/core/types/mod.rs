mod batch;
mod block_ref;
mod id;
mod task;

pub use batch::{child_block_ids, BlockBatch, BlockEntry, ProposalData, PrunedBatch, PrunedBlock};
pub use block_ref::{fetching_range, BlocksRange, MainBlockRef};
pub use id::{BatchId, BlockId, TaskExecutorId, TaskId, BLOCK_ID_SIZE};
pub use task::{
    CircuitType, Task, TaskEntry, TaskResult, TaskStatus, TaskType, CIRCUIT_AMOUNT,
};
