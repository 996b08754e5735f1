//! Metadata-driven query building and execution.
//!
//! # Responsibility
//! - Parse caller criteria (scope, search, filters, sort, pagination).
//! - Build scoped, parameterized plans and run them through a provider.
//!
//! # Invariants
//! - ACTIVE never yields archived rows, ARCHIVED never yields active rows.
//! - Query building fails before any storage access on malformed input.

pub mod builder;
pub mod criteria;
pub mod executor;

pub use builder::{build_plan, resolve_sort, Predicate, QueryPlan, SortColumn};
pub use criteria::{FilterExpr, Operator, QueryCriteria, Scope, SortSpec, DEFAULT_PAGE_SIZE};
pub use executor::{count, count_pages, find_by_id, find_by_ids, get_by_id, query, QueryPage};
