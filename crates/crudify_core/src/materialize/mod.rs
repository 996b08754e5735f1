//! Record materializer and projector.
//!
//! # Responsibility
//! - Build typed records from flat input maps through per-field transform
//!   pipelines.
//! - Project records into allow-list filtered, cycle-safe nested JSON.

pub mod input;
pub mod output;

pub use input::{from_input, InputMode};
pub use output::{to_list_output, to_output, to_page_output, Projection};
