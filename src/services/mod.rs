pub mod categorizer;
pub mod logger;
pub mod message;
pub mod relay;
pub mod training;
pub mod watcher;
