//! Utility functions and helpers.

pub mod query_text;

// Re-export commonly used helpers
pub use query_text::{build_effective_query, parse_limit, DEFAULT_PAGE_SIZE, SELECT_ALL};
