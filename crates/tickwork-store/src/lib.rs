//! # Tickwork Store
//!
//! [`JobStore`](tickwork_protocols::JobStore) backends.
//!
//! - [`MemoryJobStore`] - process-local, for tests and single-instance use
//! - [`FileJobStore`] - one JSON file per job
//! - [`SqliteJobStore`] - SQLite via `tokio-rusqlite`, safe to share between
//!   processes

mod common;
mod file;
mod memory;
mod schema;
mod sqlite;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
