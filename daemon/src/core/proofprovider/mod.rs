mod task_handler;

pub use task_handler::{TaskHandler, SKIP_RATE_MAX};
