//! Evaluating a predicate query at one instant.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{PitrResult, TimeTravelClient};

/// The result of probing a predicate at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOutcome {
    True,
    False,
    /// The query failed with an error the search absorbs. Treated like `False`.
    Indeterminate,
}

impl PredicateOutcome {
    /// Whether the search should keep looking later in time.
    pub fn holds(self) -> bool {
        matches!(self, Self::True)
    }
}

impl From<bool> for PredicateOutcome {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl Display for PredicateOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Run `query` as of `at` and read the first column of the first row as a boolean. A result set
/// without rows is `false`.
///
/// The cursor is dropped before this returns, so a caller never holds more than one open query.
pub(crate) fn evaluate(
    client: &dyn TimeTravelClient,
    query: &str,
    at: DateTime<Utc>,
) -> PitrResult<bool> {
    let mut cursor = client.execute_as_of(query, at)?;
    match cursor.next() {
        Some(row) => row?.first_boolean(),
        None => {
            debug!("No rows in result set at {at}");
            Ok(false)
        }
    }
}
