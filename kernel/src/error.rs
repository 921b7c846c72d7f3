//! Definitions of errors that the kernel can encounter

use std::num::ParseIntError;

use chrono::{DateTime, Utc};

/// A [`std::result::Result`] that has the kernel [`Error`] as the error variant
pub type PitrResult<T, E = Error> = std::result::Result<T, E>;

/// All the types of errors that the kernel can run into
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target instance, database or session does not exist (or is not visible to us). This
    /// aborts any search or export in progress.
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    /// The credentials were rejected by the database service.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The database rejected or failed to execute a query, e.g. because a table did not exist at
    /// the requested read timestamp.
    #[error("Query failed ({status}): {message}")]
    Query { status: String, message: String },

    /// A request could not be sent or its response could not be read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A column value did not have the type the caller needed.
    #[error("Unexpected type for column {column}: expected {expected}, got {actual}")]
    UnexpectedType {
        column: String,
        expected: String,
        actual: String,
    },

    /// A value returned by the database could not be decoded.
    #[error("Could not decode value: {0}")]
    Decode(String),

    /// The predicate did not hold at the start of the search window.
    #[error("Check query did not return true at start timestamp {0}")]
    PredicateFalseAtStart(DateTime<Utc>),

    /// The predicate still held at the end of the search window.
    #[error("Check query returned true at end timestamp {0}")]
    PredicateTrueAtEnd(DateTime<Utc>),

    /// The search bracket collapsed before the requested accuracy was reached.
    #[error("Maximum accuracy reached without finding a result between {min} and {max}")]
    MaxAccuracyReached {
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    },

    /// A query error aborted the search because the caller asked not to absorb them.
    #[error("Search aborted at {at}: {source}")]
    SearchAborted {
        at: DateTime<Utc>,
        #[source]
        source: Box<Error>,
    },

    /// The search window is empty, inverted or not representable.
    #[error("Invalid time window: {0}")]
    InvalidTimeWindow(String),

    /// The requested accuracy is not a strictly positive duration.
    #[error("Invalid accuracy: {0}")]
    InvalidAccuracy(String),

    /// Configuration of an engine or client was invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An error performing operations on the local filesystem
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// An error parsing or encoding JSON
    #[error(transparent)]
    MalformedJson(#[from] serde_json::Error),

    /// Invalid url
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// An error parsing an integer
    #[error(transparent)]
    ParseIntError(#[from] ParseIntError),

    /// An error that doesn't fit any of the other variants
    #[error("Generic pitr error: {0}")]
    Generic(String),
}

impl Error {
    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    pub fn query(status: impl ToString, message: impl ToString) -> Self {
        Self::Query {
            status: status.to_string(),
            message: message.to_string(),
        }
    }

    pub fn target_not_found(msg: impl ToString) -> Self {
        Self::TargetNotFound(msg.to_string())
    }

    pub fn decode(msg: impl ToString) -> Self {
        Self::Decode(msg.to_string())
    }

    pub fn invalid_configuration(msg: impl ToString) -> Self {
        Self::InvalidConfiguration(msg.to_string())
    }

    /// True if the target database cannot be reached at all. Such errors end any operation: there
    /// is no point probing other timestamps of a database that does not exist.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::TargetNotFound(_) | Self::AuthenticationFailed(_) | Self::InvalidConfiguration(_)
        )
    }

    /// True if a search may absorb this error and keep narrowing.
    pub fn is_transient(&self) -> bool {
        !self.is_unreachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::target_not_found("Database not found: db").is_unreachable());
        assert!(Error::AuthenticationFailed("401".into()).is_unreachable());
        assert!(Error::query("INVALID_ARGUMENT", "Table not found: t").is_transient());
        assert!(Error::decode("bad int").is_transient());
        assert!(Error::generic("boom").is_transient());
    }

    #[test]
    fn test_query_message() {
        let err = Error::query("INVALID_ARGUMENT", "Table not found: orders");
        assert_eq!(
            err.to_string(),
            "Query failed (INVALID_ARGUMENT): Table not found: orders"
        );
    }
}
