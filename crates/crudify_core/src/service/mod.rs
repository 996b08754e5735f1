//! Core use-case services.
//!
//! # Responsibility
//! - Run mutations inside transactions with lifecycle hooks.
//! - Expose operation-scoped entry points to outer layers.

pub mod crud_service;
pub mod hooks;
pub mod mutation;

pub use crud_service::CrudService;
pub use hooks::{HookContext, LifecycleHook, Phase};
pub use mutation::{EntityManager, TransactionState};
