//! Dashboard operations
//!
//! Thin wrappers over the store and the orchestrator. The HTTP API calls
//! these; so could any other front end.
//!
//! - `queries`: read-only views of the store and live components
//! - `actions`: refresh, retrain and weight updates

pub mod actions;
pub mod queries;

pub use actions::*;
pub use queries::*;
