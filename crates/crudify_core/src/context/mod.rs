//! Execution context store and per-operation worker pools.
//!
//! # Responsibility
//! - Give every logical operation its own context and worker pool.
//! - Pass the context explicitly to work running on that pool.
//!
//! # Invariants
//! - Contexts are never shared across concurrent operations.
//! - Teardown cannot remove another operation's context.

pub mod pool;
pub mod store;

pub use pool::WorkerPool;
pub use store::{ContextStore, ExecutionContext, Operation, OperationId};
