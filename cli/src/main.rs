//! Command line tool to recover Spanner data from before a bad write.
//!
//! `query` finds the latest instant at which a check query still returned `true`, `export-query`
//! writes the result of a query as of an instant to a CSV file, and `search-logs` lists the commits
//! matching principals made to the database in a time range.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use pitr_kernel::audit::{commit_log_filter, AuditLogClient};
use pitr_kernel::export::QueryExporter;
use pitr_kernel::search::{TimeWindow, TimelineSearch, TransientErrorPolicy};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod connection;
mod time;

use connection::ConnectionArgs;
use time::{parse_duration, parse_instant};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Could not connect to Spanner: {0}")]
    Connect(#[source] Box<pitr_kernel::Error>),

    #[error(transparent)]
    Kernel(#[from] pitr_kernel::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the latest time at which QUERY (returning a single boolean) was still true
    Query {
        query: String,

        /// Required accuracy of the result, as an ISO-8601 duration
        #[arg(long, default_value = "PT0.5S", value_parser = parse_duration)]
        accuracy: Duration,

        /// Start of the search window (RFC 3339), default one hour ago
        #[arg(long, value_parser = parse_instant)]
        start: Option<DateTime<Utc>>,

        /// End of the search window (RFC 3339), default now
        #[arg(long, value_parser = parse_instant)]
        end: Option<DateTime<Utc>>,

        /// Stop at the first failing query instead of searching earlier
        #[arg(long)]
        abort_on_query_error: bool,
    },
    /// Export the result of QUERY as of an instant to a CSV file, gzipped if it ends in `.gz`
    ExportQuery {
        query: String,

        /// Instant to read the data at (RFC 3339), default now
        #[arg(short, long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,

        /// Destination file, default a new temporary `.csv.gz` file
        #[arg(short, long)]
        output_file: Option<PathBuf>,
    },
    /// List commit audit log entries for the database by matching accounts
    SearchLogs {
        /// Start of the time range (RFC 3339), default one hour ago
        #[arg(long, value_parser = parse_instant)]
        start: Option<DateTime<Utc>>,

        /// End of the time range (RFC 3339), default now
        #[arg(long, value_parser = parse_instant)]
        end: Option<DateTime<Utc>>,

        /// Regular expression matched against account emails
        #[arg(long, default_value = ".*")]
        account_expression: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// The window ending at `end` (default now) and starting at `start` (default an hour earlier).
fn time_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = start.unwrap_or(now - TimeDelta::hours(1));
    (start, end.unwrap_or(now))
}

fn default_output_file() -> Result<PathBuf, CliError> {
    let file = tempfile::Builder::new()
        .prefix("spanner-pitr-query")
        .suffix(".csv.gz")
        .tempfile()?;
    file.into_temp_path()
        .keep()
        .map_err(|e| CliError::Io(e.error))
}

fn try_main(cli: Cli) -> Result<(), CliError> {
    let now = Utc::now();
    match cli.command {
        Commands::Query {
            query,
            accuracy,
            start,
            end,
            abort_on_query_error,
        } => {
            let (start, end) = time_range(start, end, now);
            let window = TimeWindow::try_new(start, end)?;
            let policy = if abort_on_query_error {
                TransientErrorPolicy::Abort
            } else {
                TransientErrorPolicy::SearchEarlier
            };
            let engine = cli.connection.connect()?;
            let found = TimelineSearch::new(query, window, accuracy)
                .with_transient_error_policy(policy)
                .find_closest_time(&engine)?;
            info!("Found closest timestamp: {found}");
            println!("{}", found.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true));
        }
        Commands::ExportQuery {
            query,
            at,
            output_file,
        } => {
            let at = at.unwrap_or(now);
            let output_file = match output_file {
                Some(path) => path,
                None => default_output_file()?,
            };
            info!("Exporting query to {} at timestamp {at}...", output_file.display());
            let engine = cli.connection.connect()?;
            let summary = QueryExporter::new(query, at, &output_file).export_records(&engine)?;
            info!("Completed query export.");
            println!("{}", summary.destination.display());
        }
        Commands::SearchLogs {
            start,
            end,
            account_expression,
        } => {
            let (start, end) = time_range(start, end, now);
            let config = cli.connection.client_config()?;
            let filter = commit_log_filter(&config.database, &account_expression, start, end);
            info!(
                "Finding Spanner commit log entries between {start} and {end} for users matching regex '{account_expression}'"
            );
            info!("{filter}");
            let entries = AuditLogClient::try_new(&config)?
                .list_entries(&config.database.project, &filter)?;
            for entry in &entries {
                info!("{entry}");
            }
            info!("Found {} commit log entries.", entries.len());
        }
    }
    Ok(())
}
