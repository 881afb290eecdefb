//! sql-replay — replay logged SQL against PostgreSQL
//!
//! # Usage
//!
//! ```bash
//! # Replay a capture
//! sql-replay --user app --password secret --dbname app --sql-file capture.json
//!
//! # Show what would be replayed
//! sql-replay --sql-file capture.json --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use colored::*;
use sql_replay::config::{PoolLayer, PostgresLayer};
use sql_replay::prelude::*;

#[derive(Parser)]
#[command(name = "sql-replay")]
#[command(version)]
#[command(about = "Replay SQL statements from a JSON log capture against PostgreSQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    sql-replay --user app --password secret --dbname app --sql-file capture.json
    sql-replay --host db.internal --sslmode require --sql-file capture.json --max-open-connections 20
    sql-replay --sql-file capture.json --dry-run")]
struct Cli {
    /// Database host name [default: localhost]
    #[arg(long, env = "PGHOST")]
    host: Option<String>,

    /// Database port [default: 5432]
    #[arg(long, env = "PGPORT")]
    port: Option<u16>,

    /// Database user name
    #[arg(long, env = "PGUSER")]
    user: Option<String>,

    /// Database password
    #[arg(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Database name
    #[arg(long, env = "PGDATABASE")]
    dbname: Option<String>,

    /// SSL mode: disable, allow, prefer, require, verify-ca, verify-full [default: disable]
    #[arg(long, env = "PGSSLMODE")]
    sslmode: Option<String>,

    /// JSON log capture holding the statements to replay
    #[arg(long = "sql-file", alias = "sql_file", value_name = "PATH")]
    sql_file: Option<PathBuf>,

    /// Config file (defaults to ./sql-replay.toml if present)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Maximum open connections [default: 70]
    #[arg(long, value_name = "N")]
    max_open_connections: Option<u32>,

    /// Maximum idle connections [default: 8]
    #[arg(long, value_name = "N")]
    max_idle_connections: Option<u32>,

    /// Connection max lifetime in seconds [default: 30]
    #[arg(long, value_name = "SECS")]
    conn_max_lifetime: Option<u64>,

    /// Connection max idle time in seconds [default: 15]
    #[arg(long, value_name = "SECS")]
    conn_max_idle_time: Option<u64>,

    /// Seconds a statement may wait for a free connection [default: one year]
    #[arg(long, value_name = "SECS")]
    acquire_timeout: Option<u64>,

    /// Don't execute, just show the extracted statements
    #[arg(long)]
    dry_run: bool,

    /// Report how many statements actually succeeded even when some failed
    #[arg(long)]
    report_partial: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// The command line as the highest-priority config layer.
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            postgres: PostgresLayer {
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
                password: self.password.clone(),
                dbname: self.dbname.clone(),
                sslmode: self.sslmode.clone(),
                sql_file: self.sql_file.clone(),
            },
            pool: PoolLayer {
                max_open_connections: self.max_open_connections,
                max_idle_connections: self.max_idle_connections,
                max_lifetime_secs: self.conn_max_lifetime,
                max_idle_time_secs: self.conn_max_idle_time,
                acquire_timeout_secs: self.acquire_timeout,
            },
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    sql_replay::logging::init(cli.verbose);

    if let Err(e) = run(&cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = ConfigLayer::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(cli.layer().or(file_layer));

    if cli.dry_run {
        let entries = sql_replay::extract(settings.sql_file()?)?;
        show_statements(&entries);
        return Ok(());
    }

    settings.validate()?;
    let entries = sql_replay::extract(settings.sql_file()?)?;

    let started = Instant::now();
    let pool = ReplayPool::open(&settings.connection, &settings.pool)?;
    pool.ping().await?;

    let pool = Arc::new(pool);
    let outcome = replay(entries, Arc::clone(&pool)).await;
    tracing::debug!(open = pool.size(), idle = pool.num_idle(), "pool state after replay");
    pool.close().await;

    print_summary(&outcome, started.elapsed(), cli.report_partial);

    outcome.into_result()?;
    Ok(())
}

fn print_summary(outcome: &ReplayOutcome, elapsed: Duration, report_partial: bool) {
    let succeeded = if report_partial {
        outcome.succeeded
    } else {
        outcome.reported_success_count()
    };
    let count = if outcome.is_success() {
        succeeded.to_string().green()
    } else {
        succeeded.to_string().red()
    };
    let stars = "*".repeat(40);

    println!("{}", stars.cyan());
    println!(
        "{} successful requests out of {} requests.",
        count,
        outcome.total.to_string().cyan()
    );
    println!("{}", stars.cyan());
    println!("Total time: {} milliseconds", elapsed.as_millis());
}

fn show_statements(entries: &[LogEntry]) {
    println!("{}", "Extracted statements:".green().bold());
    for (i, entry) in entries.iter().enumerate() {
        println!();
        println!("{}{}:", "Statement ".dimmed(), (i + 1).to_string().cyan());
        if entry.has_statement() {
            println!("  {}", entry.statement.white());
        } else {
            println!("  {}", "(no statement found)".yellow());
        }
    }

    let matched = entries.iter().filter(|e| e.has_statement()).count();
    println!();
    println!(
        "{} of {} entries hold a statement. No queries executed.",
        matched.to_string().cyan(),
        entries.len()
    );
}
