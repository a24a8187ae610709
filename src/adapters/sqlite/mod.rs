pub mod pool;
pub mod schema;
pub mod classifications;
pub mod training;
pub mod reclassifications;
pub mod folder_mappings;
pub mod weights;
pub mod model_metadata;
pub mod training_status;
pub mod stats;

// Re-export the pool type so callers can do `use crate::adapters::sqlite::DbPool`
pub use pool::DbPool;
