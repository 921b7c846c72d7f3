//! Point-in-time recovery kernel.
//!
//! Databases that support time-travel reads can answer a query "as of" any recent timestamp. When
//! something bad happens to such a database (a table is dropped, rows are deleted or overwritten),
//! this crate finds the last moment at which the data still looked right, and exports the data as
//! of that moment.
//!
//! The two entry points are:
//!
//! - [`search::TimelineSearch`], which bisects a time window to find the latest instant at which a
//!   predicate query (a query whose first column of its first row is a boolean) was still `true`;
//! - [`export::QueryExporter`], which streams the result of a query at one fixed timestamp into a
//!   quoted CSV file, gzip-compressed when the destination ends in `.gz`.
//!
//! Both only talk to the database through the [`TimeTravelClient`] trait. This crate ships a
//! client for Cloud Spanner's REST API ([`engine::spanner::SpannerEngine`]) and an in-memory
//! client for tests and demos ([`engine::memory::InMemoryEngine`]).
//!
//! # Example
//!
//! ```
//! # use std::time::Duration;
//! # use chrono::{TimeDelta, TimeZone, Utc};
//! use pitr_kernel::engine::memory::InMemoryEngine;
//! use pitr_kernel::search::{TimeWindow, TimelineSearch};
//!
//! # fn main() -> pitr_kernel::PitrResult<()> {
//! let t0 = Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap();
//! let engine = InMemoryEngine::new();
//! engine.register_predicate("SELECT COUNT(*) > 0 FROM orders", [(t0, true), (t0 + TimeDelta::minutes(30), false)]);
//!
//! let window = TimeWindow::try_new(t0, t0 + TimeDelta::hours(1))?;
//! let found = TimelineSearch::new("SELECT COUNT(*) > 0 FROM orders", window, Duration::from_millis(500))
//!     .find_closest_time(&engine)?;
//! assert!(found < t0 + TimeDelta::minutes(30));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};

pub mod audit;
pub mod engine;
pub mod error;
pub mod export;
pub mod metrics;
pub mod row;
pub mod scalars;
pub mod schema;
pub mod search;

pub(crate) mod utils;

pub use error::{Error, PitrResult};
pub use row::{Row, RowCursor};
pub use scalars::Scalar;

/// Which version of the data a read observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampBound {
    /// Read the latest committed data.
    Strong,
    /// Read the data exactly this long ago.
    ExactStaleness(Duration),
    /// Read data that is at most this stale, letting the database choose.
    MaxStaleness(Duration),
    /// Read the data as it was at this instant.
    ReadTimestamp(DateTime<Utc>),
}

/// A read-only client of a database that supports time-travel reads.
///
/// Each call opens one query and hands back a [`RowCursor`] that owns it; dropping the cursor
/// releases the query. Implementations never write.
///
/// Errors should be classified so that [`Error::is_unreachable`] holds when the target database
/// itself cannot be found or accessed, since callers abort on those and keep going on others.
pub trait TimeTravelClient: Send + Sync {
    /// Run `query` with the given timestamp bound.
    fn execute(&self, query: &str, bound: TimestampBound) -> PitrResult<RowCursor>;

    /// Run `query` against the data as it was at `at`.
    fn execute_as_of(&self, query: &str, at: DateTime<Utc>) -> PitrResult<RowCursor> {
        self.execute(query, TimestampBound::ReadTimestamp(at))
    }

    /// Run `query` against current data, or data exactly `staleness` old when given.
    fn execute_now(&self, query: &str, staleness: Option<Duration>) -> PitrResult<RowCursor> {
        let bound = match staleness {
            Some(staleness) => TimestampBound::ExactStaleness(staleness),
            None => TimestampBound::Strong,
        };
        self.execute(query, bound)
    }
}
