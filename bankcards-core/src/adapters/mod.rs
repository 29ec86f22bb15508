//! Adapter implementations
//!
//! Adapters implement the port traits with concrete storage:
//! - DuckDB for persistent cards and owners
//! - An in-process store with row-level locks for tests and embedding

use std::time::Duration;

pub mod duckdb;
pub mod memory;

/// How long a transaction waits for a row lock before giving up
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
