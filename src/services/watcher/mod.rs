//! Push-based change detection on mapped folders.
//!
//! Each (account, folder) pair gets its own IDLE connection. A change ends the
//! current IDLE, raises a [`ChangeEvent`] on the manager's channel and IDLE is
//! re-entered. Dropped connections are retried with exponential backoff.

pub mod backoff;
pub mod folder;
pub mod manager;

pub use backoff::Backoff;
pub use folder::{ChangeEvent, FolderStatus, FolderWatcher, WatcherSettings};
pub use manager::WatcherManager;
