//! An in-memory [`TimeTravelClient`] whose answers are scripted as a function of time.
//!
//! Each registered query has a history: a list of `(from, response)` entries. A read at instant
//! `t` is answered by the latest entry with `from <= t`. Reads before the first entry fail the way
//! a database fails for a table that did not exist yet, and so do reads of unregistered queries.
//!
//! The engine also counts open cursors so tests can check that callers release them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::vec;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::row::{Row, RowCursor};
use crate::scalars::Scalar;
use crate::schema::{Column, DataType, Schema, SchemaRef};
use crate::{Error, PitrResult, TimeTravelClient, TimestampBound};

/// The scripted answer to a query from some instant on.
#[derive(Debug, Clone)]
pub enum QueryResponse {
    /// The query returns these rows.
    Rows {
        schema: SchemaRef,
        rows: Vec<Vec<Scalar>>,
    },
    /// The query returns these rows and then fails while being read.
    Truncated {
        schema: SchemaRef,
        rows: Vec<Vec<Scalar>>,
        message: String,
    },
    /// The query fails to execute, e.g. because a table is missing.
    QueryError { status: String, message: String },
    /// The target database cannot be found.
    NotFound(String),
}

impl QueryResponse {
    pub fn rows(schema: SchemaRef, rows: Vec<Vec<Scalar>>) -> Self {
        Self::Rows { schema, rows }
    }

    /// A single row with a single `BOOL` column.
    pub fn predicate(value: bool) -> Self {
        Self::Rows {
            schema: predicate_schema(),
            rows: vec![vec![Scalar::Boolean(value)]],
        }
    }

    /// A result set with a `BOOL` column but no rows.
    pub fn empty() -> Self {
        Self::Rows {
            schema: predicate_schema(),
            rows: vec![],
        }
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::QueryError {
            status: "INVALID_ARGUMENT".to_string(),
            message: format!("Table not found: {table}"),
        }
    }
}

fn predicate_schema() -> SchemaRef {
    Arc::new(Schema::new([Column::new("", DataType::Boolean)]))
}

#[derive(Debug, Default)]
struct State {
    histories: HashMap<String, Vec<(DateTime<Utc>, QueryResponse)>>,
    unreachable: Option<String>,
    now: Option<DateTime<Utc>>,
    reads: Vec<(String, TimestampBound)>,
}

/// See the [module documentation](self).
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<State>,
    open_cursors: Arc<AtomicUsize>,
    max_open_cursors: Arc<AtomicUsize>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script the answers to `query`. Entries may be given in any order.
    pub fn register(
        &self,
        query: impl Into<String>,
        history: impl IntoIterator<Item = (DateTime<Utc>, QueryResponse)>,
    ) {
        let mut history: Vec<_> = history.into_iter().collect();
        history.sort_by_key(|(from, _)| *from);
        self.state().histories.insert(query.into(), history);
    }

    /// Script a predicate query that returns a single boolean which changes at the given instants.
    pub fn register_predicate(
        &self,
        query: impl Into<String>,
        history: impl IntoIterator<Item = (DateTime<Utc>, bool)>,
    ) {
        self.register(
            query,
            history
                .into_iter()
                .map(|(from, value)| (from, QueryResponse::predicate(value))),
        );
    }

    /// Make every subsequent read fail with [`Error::TargetNotFound`].
    pub fn set_unreachable(&self, message: impl Into<String>) {
        self.state().unreachable = Some(message.into());
    }

    /// Pin the instant that strong and stale reads resolve against.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state().now = Some(now);
    }

    /// Every read issued so far, in order.
    pub fn reads(&self) -> Vec<(String, TimestampBound)> {
        self.state().reads.clone()
    }

    pub fn read_count(&self) -> usize {
        self.state().reads.len()
    }

    /// Cursors handed out and not yet dropped.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// The largest number of cursors that were open at the same time.
    pub fn max_open_cursors(&self) -> usize {
        self.max_open_cursors.load(Ordering::SeqCst)
    }

    fn resolve(bound: TimestampBound, now: DateTime<Utc>) -> PitrResult<DateTime<Utc>> {
        let stale = |staleness| {
            chrono::TimeDelta::from_std(staleness)
                .map(|delta| now - delta)
                .map_err(|e| Error::generic(format!("Invalid staleness {staleness:?}: {e}")))
        };
        match bound {
            TimestampBound::Strong | TimestampBound::MaxStaleness(_) => Ok(now),
            TimestampBound::ExactStaleness(staleness) => stale(staleness),
            TimestampBound::ReadTimestamp(at) => Ok(at),
        }
    }

    fn open(&self, schema: SchemaRef, rows: Vec<Vec<Scalar>>, failure: Option<String>) -> RowCursor {
        let open = self.open_cursors.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open_cursors.fetch_max(open, Ordering::SeqCst);
        debug!("Opened cursor ({open} open)");
        let rows = ScriptedRows {
            schema: schema.clone(),
            rows: rows.into_iter(),
            failure,
            open_cursors: self.open_cursors.clone(),
        };
        RowCursor::new(schema, rows)
    }
}

impl TimeTravelClient for InMemoryEngine {
    fn execute(&self, query: &str, bound: TimestampBound) -> PitrResult<RowCursor> {
        let response = {
            let mut state = self.state();
            state.reads.push((query.to_string(), bound));
            if let Some(message) = &state.unreachable {
                return Err(Error::target_not_found(message));
            }
            let at = Self::resolve(bound, state.now.unwrap_or_else(Utc::now))?;
            state
                .histories
                .get(query)
                .and_then(|history| history.iter().rev().find(|(from, _)| *from <= at))
                .map(|(_, response)| response.clone())
        };

        match response {
            Some(QueryResponse::Rows { schema, rows }) => Ok(self.open(schema, rows, None)),
            Some(QueryResponse::Truncated {
                schema,
                rows,
                message,
            }) => Ok(self.open(schema, rows, Some(message))),
            Some(QueryResponse::QueryError { status, message }) => {
                Err(Error::query(status, message))
            }
            Some(QueryResponse::NotFound(message)) => Err(Error::target_not_found(message)),
            None => Err(Error::query(
                "INVALID_ARGUMENT",
                format!("Table not found for query: {query}"),
            )),
        }
    }
}

struct ScriptedRows {
    schema: SchemaRef,
    rows: vec::IntoIter<Vec<Scalar>>,
    failure: Option<String>,
    open_cursors: Arc<AtomicUsize>,
}

impl Iterator for ScriptedRows {
    type Item = PitrResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.next() {
            Some(values) => Some(Row::try_new(self.schema.clone(), values)),
            None => self
                .failure
                .take()
                .map(|message| Err(Error::query("ABORTED", message))),
        }
    }
}

impl Drop for ScriptedRows {
    fn drop(&mut self) {
        let open = self.open_cursors.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!("Closed cursor ({open} open)");
    }
}
