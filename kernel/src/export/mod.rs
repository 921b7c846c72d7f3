//! Export the result of a query, as of one instant, to a quoted CSV file.
//!
//! Records are streamed straight from the query cursor to the file, one at a time. The header row
//! comes from the first record, so an empty result set produces an empty file (no header). A
//! destination path ending in `.gz` is gzip-compressed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::metrics::{MetricEvent, MetricId, MetricsReporter, NullReporter, Timer};
use crate::row::{Row, RowCursor};
use crate::schema::SchemaRef;
use crate::{PitrResult, TimeTravelClient};

mod csv;
mod destination;

pub use destination::is_gzip_path;
use destination::Destination;

/// A row rendered for export: each column's value in text form, or `None` for the null marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    schema: SchemaRef,
    fields: Vec<Option<String>>,
}

impl ExportRecord {
    pub fn from_row(row: &Row) -> Self {
        let fields = row
            .schema()
            .columns()
            .iter()
            .zip(row.values())
            .map(|(column, value)| value.render(column.data_type()))
            .collect();
        Self {
            schema: row.schema().clone(),
            fields,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.schema.column_names()
    }

    pub fn fields(&self) -> &[Option<String>] {
        &self.fields
    }

    /// The text of `column`: `None` if there is no such column, `Some(None)` for the null marker.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.schema
            .index_of(column)
            .map(|i| self.fields[i].as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.column_names()
            .zip(self.fields.iter().map(Option::as_deref))
    }
}

/// The records of one open query, in order. Single pass: once consumed (or dropped) the
/// underlying cursor is closed and the records cannot be read again.
#[derive(Debug)]
pub struct RecordStream {
    cursor: RowCursor,
}

impl Iterator for RecordStream {
    type Item = PitrResult<ExportRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor
            .next()
            .map(|row| row.map(|row| ExportRecord::from_row(&row)))
    }
}

/// Open `query` as of `at`. Errors opening the query are returned here, before any record.
pub fn stream_records(
    query: &str,
    at: DateTime<Utc>,
    client: &dyn TimeTravelClient,
) -> PitrResult<RecordStream> {
    let cursor = client.execute_as_of(query, at)?;
    Ok(RecordStream { cursor })
}

/// Write `records` as quoted CSV, with a header taken from the first record. Returns the number
/// of data rows written. Nothing at all is written for an empty sequence.
pub fn write_records<W: Write + ?Sized>(
    records: impl IntoIterator<Item = PitrResult<ExportRecord>>,
    writer: &mut W,
) -> PitrResult<u64> {
    let mut num_rows = 0;
    for record in records {
        let record = record?;
        if num_rows == 0 {
            csv::write_row(writer, record.column_names().map(Some))?;
        }
        csv::write_row(writer, record.fields().iter().map(Option::as_deref))?;
        num_rows += 1;
    }
    Ok(num_rows)
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub destination: PathBuf,
    pub num_rows: u64,
    pub compressed: bool,
}

/// An export of one query as of one instant into one file.
#[derive(Debug, Clone)]
pub struct QueryExporter {
    query: String,
    at: DateTime<Utc>,
    destination: PathBuf,
    reporter: Arc<dyn MetricsReporter>,
}

impl QueryExporter {
    pub fn new(query: impl Into<String>, at: DateTime<Utc>, destination: impl Into<PathBuf>) -> Self {
        Self {
            query: query.into(),
            at,
            destination: destination.into(),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_metrics_reporter(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn stream_records(&self, client: &dyn TimeTravelClient) -> PitrResult<RecordStream> {
        stream_records(&self.query, self.at, client)
    }

    /// Run the query and write its records to the destination file.
    ///
    /// The query is opened before the file is created, so a query that cannot run leaves the
    /// destination untouched. If reading a record fails part way, the cursor and the file are
    /// still closed and the partially written file is left in place.
    pub fn export_records(&self, client: &dyn TimeTravelClient) -> PitrResult<ExportSummary> {
        let operation_id = MetricId::new();
        let timer = Timer::new();
        self.reporter.report(MetricEvent::ExportStarted {
            operation_id,
            at: self.at,
            destination: self.destination.display().to_string(),
        });

        let result = self.try_export(client);
        match &result {
            Ok(summary) => {
                info!(
                    "Exported {} rows to {}",
                    summary.num_rows,
                    summary.destination.display()
                );
                self.reporter.report(MetricEvent::ExportCompleted {
                    operation_id,
                    num_rows: summary.num_rows,
                    total_duration: timer.elapsed(),
                });
            }
            Err(e) => {
                warn!("Export to {} failed: {e}", self.destination.display());
                self.reporter
                    .report(MetricEvent::ExportFailed { operation_id });
            }
        }
        result
    }

    fn try_export(&self, client: &dyn TimeTravelClient) -> PitrResult<ExportSummary> {
        let records = self.stream_records(client)?;
        let mut destination = Destination::create(&self.destination)?;
        let num_rows = write_records(records, &mut destination)?;
        destination.finish()?;
        Ok(ExportSummary {
            destination: self.destination.clone(),
            num_rows,
            compressed: is_gzip_path(&self.destination),
        })
    }
}

/// Export the result of `query` as of `at` to `destination`.
pub fn export_records(
    query: &str,
    at: DateTime<Utc>,
    destination: impl Into<PathBuf>,
    client: &dyn TimeTravelClient,
) -> PitrResult<ExportSummary> {
    QueryExporter::new(query, at, destination).export_records(client)
}
