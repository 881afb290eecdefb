//! Concurrent replay engine.
//!
//! Every statement runs in its own tokio task. Tasks share nothing but an
//! atomic success counter and the sending half of a failure channel; real
//! database parallelism is bounded by the pool behind the
//! [`StatementTarget`], not by the engine.

use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use colored::*;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{ReplayError, ReplayResult};
use crate::extractor::LogEntry;

/// Something a statement can be executed against.
///
/// [`ReplayPool`](crate::pool::ReplayPool) implements this over a sqlx
/// Postgres pool. Implementations must be safe to call from many tasks
/// at once.
pub trait StatementTarget: Send + Sync + 'static {
    /// Execute one statement, discarding any rows it returns.
    fn execute(&self, statement: &str) -> impl Future<Output = ReplayResult<()>> + Send;
}

/// A statement that did not execute successfully.
#[derive(Debug)]
pub struct QueryFailure {
    pub statement: String,
    pub error: ReplayError,
    pub elapsed: Duration,
}

impl QueryFailure {
    /// Print the diagnostic block for this failure to stdout.
    ///
    /// The block is written under one stdout lock so blocks from
    /// concurrent failures never interleave.
    pub fn print(&self) {
        let mut out = io::stdout().lock();
        if let Err(e) = self.write_to(&mut out) {
            tracing::warn!(error = %e, "could not print failure diagnostic");
        }
    }

    /// Write the diagnostic block for this failure.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let rule = "-".repeat(56);
        writeln!(out, "{}", rule.dimmed())?;
        writeln!(out, "{} {}", "Query error:".red().bold(), self.statement)?;
        writeln!(out, "{}", self.error)?;
        writeln!(
            out,
            "The total time taken before failing is {} milliseconds.",
            self.elapsed.as_millis()
        )?;
        writeln!(out, "{}", rule.dimmed())?;
        out.flush()
    }
}

/// Aggregate result of one replay run.
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Statements attempted.
    pub total: usize,
    /// Statements that executed without error.
    pub succeeded: usize,
    /// Failures in the order they were recorded.
    pub failures: Vec<QueryFailure>,
}

impl ReplayOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first recorded failure, if any.
    pub fn first_error(&self) -> Option<&ReplayError> {
        self.failures.first().map(|f| &f.error)
    }

    /// The all-or-nothing count: zero as soon as any statement failed.
    pub fn reported_success_count(&self) -> usize {
        if self.is_success() { self.succeeded } else { 0 }
    }

    /// `Ok(succeeded)` when every statement ran, else the first error.
    pub fn into_result(self) -> ReplayResult<usize> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(failure.error),
            None => Ok(self.succeeded),
        }
    }
}

/// Execute every entry's statement concurrently and wait for all of them.
///
/// One task is spawned per entry; each owns its statement. Failures are
/// printed as they happen and collected once every task has finished.
///
/// # Example
///
/// ```rust,ignore
/// let entries = sql_replay::extract("capture.json")?;
/// let pool = Arc::new(ReplayPool::open(&connection, &PoolConfig::default())?);
/// let outcome = replay(entries, pool).await;
/// println!("{} of {}", outcome.reported_success_count(), outcome.total);
/// ```
pub async fn replay<T: StatementTarget>(entries: Vec<LogEntry>, target: Arc<T>) -> ReplayOutcome {
    let total = entries.len();
    let succeeded = Arc::new(AtomicUsize::new(0));
    let (failure_tx, mut failure_rx) = mpsc::channel::<QueryFailure>(total.max(1));

    tracing::info!(units = total, "starting replay");

    let mut units = JoinSet::new();
    for (index, entry) in entries.into_iter().enumerate() {
        let target = Arc::clone(&target);
        let succeeded = Arc::clone(&succeeded);
        let failure_tx = failure_tx.clone();
        let statement = entry.statement;

        units.spawn(async move {
            let started = Instant::now();
            let result = target.execute(&statement).await;
            match result {
                Ok(()) => {
                    succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        unit = index,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "statement succeeded"
                    );
                }
                Err(error) => {
                    let failure = QueryFailure {
                        statement,
                        error,
                        elapsed: started.elapsed(),
                    };
                    tracing::warn!(
                        unit = index,
                        elapsed_ms = failure.elapsed.as_millis() as u64,
                        error = %failure.error,
                        "statement failed"
                    );
                    failure.print();
                    // Capacity covers every unit, so the channel is never full.
                    if let Err(e) = failure_tx.try_send(failure) {
                        tracing::error!(unit = index, error = %e, "failure not recorded");
                    }
                }
            }
        });
    }
    drop(failure_tx);

    let mut panicked = Vec::new();
    while let Some(joined) = units.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "replay unit did not complete");
            panicked.push(QueryFailure {
                statement: String::new(),
                error: ReplayError::Join(e.to_string()),
                elapsed: Duration::ZERO,
            });
        }
    }

    let mut failures = Vec::new();
    while let Some(failure) = failure_rx.recv().await {
        failures.push(failure);
    }
    failures.extend(panicked);

    let outcome = ReplayOutcome {
        total,
        succeeded: succeeded.load(Ordering::Relaxed),
        failures,
    };

    tracing::info!(
        total = outcome.total,
        succeeded = outcome.succeeded,
        failed = outcome.failures.len(),
        "replay finished"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Fails any statement containing "boom".
    struct Scripted;

    impl StatementTarget for Scripted {
        async fn execute(&self, statement: &str) -> ReplayResult<()> {
            tokio::task::yield_now().await;
            if statement.is_empty() || statement.contains("boom") {
                Err(ReplayError::Query(format!("syntax error in '{statement}'")))
            } else {
                Ok(())
            }
        }
    }

    fn entries(messages: &[&str]) -> Vec<LogEntry> {
        messages.iter().map(|m| LogEntry::from_message(*m)).collect()
    }

    #[tokio::test]
    async fn test_all_succeed() {
        let outcome = replay(entries(&["SELECT 1", "SELECT 2", "SELECT 3"]), Arc::new(Scripted)).await;
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.succeeded, 3);
        assert_eq!(outcome.reported_success_count(), 3);
        assert!(outcome.first_error().is_none());
        assert_eq!(outcome.into_result().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_one_failure_reports_zero() {
        let outcome = replay(
            entries(&["SELECT 1", "SELECT boom", "SELECT 3"]),
            Arc::new(Scripted),
        )
        .await;

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].statement, "SELECT boom");
        assert_eq!(outcome.reported_success_count(), 0);
        assert!(outcome.into_result().unwrap_err().is_query_error());
    }

    #[tokio::test]
    async fn test_unmatched_message_fails_like_any_statement() {
        let outcome = replay(entries(&["no sql here"]), Arc::new(Scripted)).await;
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].statement, "");
        assert_eq!(outcome.reported_success_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_run() {
        let outcome = replay(Vec::new(), Arc::new(Scripted)).await;
        assert_eq!(outcome.total, 0);
        assert!(outcome.is_success());
        assert_eq!(outcome.into_result().unwrap(), 0);
    }

    #[test]
    fn test_diagnostic_block_is_one_write() {
        let failure = QueryFailure {
            statement: "SELEC 1".into(),
            error: ReplayError::Query("syntax error at or near \"SELEC\"".into()),
            elapsed: Duration::from_millis(42),
        };

        let mut out = Vec::new();
        failure.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].ends_with(" SELEC 1"));
        assert_eq!(lines[2], "Query error: syntax error at or near \"SELEC\"");
        assert_eq!(
            lines[3],
            "The total time taken before failing is 42 milliseconds."
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_concurrent_failure_is_recorded() {
        let messages: Vec<String> = (0..64).map(|i| format!("SELECT boom {i}")).collect();
        let entries = messages.iter().map(|m| LogEntry::from_message(m.as_str())).collect();

        let outcome = replay(entries, Arc::new(Scripted)).await;
        assert_eq!(outcome.failures.len(), 64);
        assert_eq!(outcome.succeeded, 0);
    }

    #[test]
    fn test_first_error_is_first_recorded() {
        let outcome = ReplayOutcome {
            total: 3,
            succeeded: 1,
            failures: vec![
                QueryFailure {
                    statement: "SELECT a".into(),
                    error: ReplayError::Query("first".into()),
                    elapsed: Duration::from_millis(3),
                },
                QueryFailure {
                    statement: "SELECT b".into(),
                    error: ReplayError::Query("second".into()),
                    elapsed: Duration::from_millis(5),
                },
            ],
        };
        assert_eq!(outcome.first_error().unwrap().to_string(), "Query error: first");
        assert_eq!(outcome.reported_success_count(), 0);
    }
}
