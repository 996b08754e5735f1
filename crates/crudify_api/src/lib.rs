//! Request facade over `crudify_core` for an outer transport layer.

pub mod api;
pub mod params;

pub use api::{core_version, init_logging, ping, ApiResponse, CrudApi};
pub use params::RequestParams;
