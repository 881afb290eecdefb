//! # sql-replay
//!
//! Replay SQL statements harvested from JSON log captures against a live
//! PostgreSQL database, all at once, through a bounded connection pool.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use sql_replay::prelude::*;
//! use std::sync::Arc;
//!
//! let entries = sql_replay::extract("capture.json")?;
//! let pool = Arc::new(ReplayPool::open(&connection, &PoolConfig::default())?);
//! let outcome = replay(entries, pool).await;
//! println!("{} successful requests out of {}", outcome.reported_success_count(), outcome.total);
//! ```
//!
//! ## Pipeline
//!
//! | Stage     | Module      | Produces                    |
//! |-----------|-------------|-----------------------------|
//! | Extract   | `extractor` | ordered `LogEntry` values   |
//! | Pool      | `pool`      | shared lazy `ReplayPool`    |
//! | Replay    | `engine`    | `ReplayOutcome`             |

pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod pool;

pub mod prelude {
    pub use crate::config::{ConfigLayer, ConnectionSettings, Settings};
    pub use crate::engine::{QueryFailure, ReplayOutcome, StatementTarget, replay};
    pub use crate::error::*;
    pub use crate::extractor::{LogEntry, extract_statement};
    pub use crate::pool::{PoolConfig, ReplayPool};
}

/// Read a capture file and extract one statement per record.
///
/// # Example
///
/// ```
/// let entries = sql_replay::extractor::parse_capture(
///     r#"[{"jsonPayload":{"message":"slow: SELECT 1"}}]"#,
/// ).unwrap();
/// assert_eq!(entries[0].statement, "SELECT 1");
/// ```
pub fn extract(
    path: impl AsRef<std::path::Path>,
) -> Result<Vec<extractor::LogEntry>, error::ReplayError> {
    extractor::extract(path)
}
