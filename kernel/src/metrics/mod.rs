//! Metrics collection for searches and exports.
//!
//! Each operation (a timeline search or a query export) is assigned a unique operation ID
//! ([`MetricId`]) when it starts, and all subsequent events for that operation reference this ID.
//! This allows reporters to correlate events and track operation lifecycles.
//!
//! # Example: Implementing a Custom MetricsReporter
//!
//! ```
//! use pitr_kernel::metrics::{MetricEvent, MetricsReporter};
//!
//! #[derive(Debug)]
//! struct StepCounter;
//!
//! impl MetricsReporter for StepCounter {
//!     fn report(&self, event: MetricEvent) {
//!         if let MetricEvent::SearchStepCompleted { step, probe, outcome, .. } = event {
//!             println!("step {step}: {probe} -> {outcome}");
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::search::PredicateOutcome;

mod reporter;

pub use reporter::{MetricsReporter, NullReporter};

/// Unique identifier for a metrics operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(Uuid);

impl MetricId {
    /// Generate a new unique MetricId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MetricId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metric events emitted during searches and exports.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A timeline search passed its precondition checks and started bisecting.
    SearchStarted {
        operation_id: MetricId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        accuracy: Duration,
        expected_iterations: u32,
    },

    /// One bisection step probed the predicate.
    SearchStepCompleted {
        operation_id: MetricId,
        step: u32,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
        probe: DateTime<Utc>,
        outcome: PredicateOutcome,
        duration: Duration,
    },

    /// The search converged.
    SearchCompleted {
        operation_id: MetricId,
        found: DateTime<Utc>,
        steps: u32,
        total_duration: Duration,
    },

    /// The search ended without a result.
    SearchFailed { operation_id: MetricId, steps: u32 },

    /// A point-in-time export opened its query.
    ExportStarted {
        operation_id: MetricId,
        at: DateTime<Utc>,
        destination: String,
    },

    /// An export wrote all of its rows.
    ExportCompleted {
        operation_id: MetricId,
        num_rows: u64,
        total_duration: Duration,
    },

    /// An export failed.
    ExportFailed { operation_id: MetricId },
}

impl fmt::Display for MetricEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricEvent::SearchStarted {
                operation_id,
                start,
                end,
                accuracy,
                expected_iterations,
            } => write!(
                f,
                "SearchStarted(id={operation_id}, start={start}, end={end}, accuracy={accuracy:?}, expected_iterations={expected_iterations})"
            ),
            MetricEvent::SearchStepCompleted {
                operation_id,
                step,
                min,
                max,
                probe,
                outcome,
                duration,
            } => write!(
                f,
                "SearchStepCompleted(id={operation_id}, step={step}, min={min}, max={max}, probe={probe}, outcome={outcome}, duration={duration:?})"
            ),
            MetricEvent::SearchCompleted {
                operation_id,
                found,
                steps,
                total_duration,
            } => write!(
                f,
                "SearchCompleted(id={operation_id}, found={found}, steps={steps}, duration={total_duration:?})"
            ),
            MetricEvent::SearchFailed {
                operation_id,
                steps,
            } => write!(f, "SearchFailed(id={operation_id}, steps={steps})"),
            MetricEvent::ExportStarted {
                operation_id,
                at,
                destination,
            } => write!(
                f,
                "ExportStarted(id={operation_id}, at={at}, destination={destination})"
            ),
            MetricEvent::ExportCompleted {
                operation_id,
                num_rows,
                total_duration,
            } => write!(
                f,
                "ExportCompleted(id={operation_id}, rows={num_rows}, duration={total_duration:?})"
            ),
            MetricEvent::ExportFailed { operation_id } => {
                write!(f, "ExportFailed(id={operation_id})")
            }
        }
    }
}

/// A simple timer for tracking operation durations.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer that starts immediately.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed time as a Duration since this timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
