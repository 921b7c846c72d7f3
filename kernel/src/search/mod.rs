//! Find the latest instant at which a predicate query still held.
//!
//! The search assumes the predicate is `true` at the start of the window, `false` at its end, and
//! flips from `true` to `false` exactly once in between. It checks the two endpoints and then
//! bisects: a probe that returns `true` moves the lower bound up, anything else moves the upper
//! bound down. The result is the last probed instant that returned `true`, within `accuracy` of
//! the transition.
//!
//! The monotonic shape of the predicate is a caller contract and is not verified. For a predicate
//! that flips more than once, the result is *a* `true` instant followed within `accuracy` by a
//! `false` (or failed) probe, not necessarily the latest one.
//!
//! Queries should be as cheap as possible since one runs per step, for example:
//! - `SELECT true FROM mytable LIMIT 1`
//! - `SELECT true FROM mytable WHERE column = 'old_value' LIMIT 1`
//! - `SELECT COUNT(*) > 30 FROM mytable`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::metrics::{MetricEvent, MetricId, MetricsReporter, NullReporter, Timer};
use crate::utils::{duration_nanos, from_timestamp_nanos, require, timestamp_nanos};
use crate::{Error, PitrResult, TimeTravelClient};

mod predicate;

pub use predicate::PredicateOutcome;

/// The bracket a search runs in. `start` is always strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> PitrResult<Self> {
        require!(
            start < end,
            Error::InvalidTimeWindow(format!("start {start} is not before end {end}"))
        );
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// What a search does with a query error that does not mean the database is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransientErrorPolicy {
    /// Treat the probe as `false` and keep looking earlier. Errors like a missing table are
    /// expected when the window spans the creation or deletion of an object, and objects exist
    /// further in the past.
    #[default]
    SearchEarlier,
    /// Stop the search and report the error. Applies to bisection probes only: an error at either
    /// end of the window still counts as `false`, since a dropped table at the end is the usual
    /// reason to search at all.
    Abort,
}

/// Number of halvings needed to shrink a window of `width` nanoseconds to `accuracy` nanoseconds,
/// i.e. `ceil(log2(width / accuracy))`, and zero when the window is already narrow enough.
pub(crate) fn expected_iterations(width: i64, accuracy: i64) -> u32 {
    let width = i128::from(width);
    let mut covered = i128::from(accuracy.max(1));
    let mut iterations = 0;
    while covered < width {
        covered *= 2;
        iterations += 1;
    }
    iterations
}

/// One step's view of the bracket. `min` is known (or assumed) `true`, `max` is known or assumed
/// `false`.
#[derive(Debug, Clone, Copy)]
struct SearchState {
    min: i64,
    max: i64,
    remaining_budget: u32,
}

impl SearchState {
    fn width(&self) -> i64 {
        self.max - self.min
    }

    /// Midpoint, rounded toward `min`.
    fn medium(&self) -> i64 {
        self.min + self.width() / 2
    }
}

/// A search for the latest instant in a window at which a predicate query returned `true`.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use chrono::{TimeDelta, Utc};
/// # use pitr_kernel::{TimeTravelClient, PitrResult};
/// # use pitr_kernel::search::{TimeWindow, TimelineSearch};
/// # fn example(client: &dyn TimeTravelClient) -> PitrResult<()> {
/// let now = Utc::now();
/// let window = TimeWindow::try_new(now - TimeDelta::hours(1), now)?;
/// let found = TimelineSearch::new("SELECT COUNT(*) > 0 FROM orders", window, Duration::from_millis(500))
///     .find_closest_time(client)?;
/// println!("Data was intact at {found}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TimelineSearch {
    query: String,
    window: TimeWindow,
    accuracy: Duration,
    policy: TransientErrorPolicy,
    reporter: Arc<dyn MetricsReporter>,
}

impl TimelineSearch {
    pub fn new(query: impl Into<String>, window: TimeWindow, accuracy: Duration) -> Self {
        Self {
            query: query.into(),
            window,
            accuracy,
            policy: TransientErrorPolicy::default(),
            reporter: Arc::new(NullReporter),
        }
    }

    pub fn with_transient_error_policy(mut self, policy: TransientErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics_reporter(mut self, reporter: Arc<dyn MetricsReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    pub fn accuracy(&self) -> Duration {
        self.accuracy
    }

    /// The number of probes a search should take, used as the step budget.
    pub fn expected_iterations(&self) -> PitrResult<u32> {
        let (state, accuracy) = self.initial_state()?;
        Ok(expected_iterations(state.width(), accuracy))
    }

    fn initial_state(&self) -> PitrResult<(SearchState, i64)> {
        require!(
            !self.accuracy.is_zero(),
            Error::InvalidAccuracy("accuracy must be a positive duration".to_string())
        );
        let min = timestamp_nanos(self.window.start)?;
        let max = timestamp_nanos(self.window.end)?;
        let width = max.checked_sub(min).ok_or_else(|| {
            Error::InvalidTimeWindow(format!(
                "window from {} to {} is too wide",
                self.window.start, self.window.end
            ))
        })?;
        let accuracy = duration_nanos(self.accuracy);
        let state = SearchState {
            min,
            max,
            remaining_budget: expected_iterations(width, accuracy),
        };
        Ok((state, accuracy))
    }

    /// Check the predicate at the window's endpoints, then bisect until the latest `true` instant
    /// is known to within the accuracy.
    ///
    /// Fails without bisecting if the predicate is not `true` at the start or is still `true` at
    /// the end. Fails immediately if the database cannot be found. Other query errors are
    /// handled according to the [`TransientErrorPolicy`].
    pub fn find_closest_time(&self, client: &dyn TimeTravelClient) -> PitrResult<DateTime<Utc>> {
        let (state, accuracy) = self.initial_state()?;

        if !self.check_endpoint(client, self.window.start)? {
            return Err(Error::PredicateFalseAtStart(self.window.start));
        }
        if self.check_endpoint(client, self.window.end)? {
            return Err(Error::PredicateTrueAtEnd(self.window.end));
        }

        info!(
            "Searching between {} and {} with target accuracy of {:?}.",
            self.window.start, self.window.end, self.accuracy
        );
        info!("Using query '{}'.", self.query);
        info!("Expected iterations: {}.", state.remaining_budget);

        let operation_id = MetricId::new();
        let timer = Timer::new();
        self.reporter.report(MetricEvent::SearchStarted {
            operation_id,
            start: self.window.start,
            end: self.window.end,
            accuracy: self.accuracy,
            expected_iterations: state.remaining_budget,
        });

        let mut bisection = Bisection {
            search: self,
            client,
            operation_id,
            accuracy,
            steps: 0,
        };
        let result = bisection.run(state);
        match &result {
            Ok(found) => self.reporter.report(MetricEvent::SearchCompleted {
                operation_id,
                found: *found,
                steps: bisection.steps,
                total_duration: timer.elapsed(),
            }),
            Err(_) => self.reporter.report(MetricEvent::SearchFailed {
                operation_id,
                steps: bisection.steps,
            }),
        }
        result
    }

    /// Evaluate the predicate at a window endpoint. Query errors count as `false`; an unreachable
    /// database is an error.
    fn check_endpoint(&self, client: &dyn TimeTravelClient, at: DateTime<Utc>) -> PitrResult<bool> {
        match predicate::evaluate(client, &self.query, at) {
            Ok(value) => Ok(value),
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => {
                warn!("Check query failed at {at}: {e}");
                Ok(false)
            }
        }
    }
}

struct Bisection<'a> {
    search: &'a TimelineSearch,
    client: &'a dyn TimeTravelClient,
    operation_id: MetricId,
    accuracy: i64,
    steps: u32,
}

impl Bisection<'_> {
    fn run(&mut self, mut state: SearchState) -> PitrResult<DateTime<Utc>> {
        loop {
            let (min, max) = (from_timestamp_nanos(state.min), from_timestamp_nanos(state.max));
            if state.width() == 0 {
                return Err(Error::MaxAccuracyReached { min, max });
            }
            if state.remaining_budget == 0 {
                warn!("Exceeded the expected number of iterations; bracket is {min} - {max}");
            }

            let medium_nanos = state.medium();
            let medium = from_timestamp_nanos(medium_nanos);
            info!("{min} -({medium})- {max}: {}", TimeDelta::nanoseconds(state.width()));

            let timer = Timer::new();
            let outcome = self.probe(medium)?;
            self.steps += 1;
            self.search
                .reporter
                .report(MetricEvent::SearchStepCompleted {
                    operation_id: self.operation_id,
                    step: self.steps,
                    min,
                    max,
                    probe: medium,
                    outcome,
                    duration: timer.elapsed(),
                });

            if outcome.holds() {
                if state.max - medium_nanos < self.accuracy {
                    return Ok(medium);
                }
                if medium_nanos == state.min {
                    // a one nanosecond bracket cannot be split any further
                    return Err(Error::MaxAccuracyReached { min, max });
                }
                info!("Query succeeded. Searching later...");
                state.min = medium_nanos;
            } else {
                if outcome == PredicateOutcome::False {
                    info!("Query failed. Searching earlier...");
                }
                state.max = medium_nanos;
            }
            state.remaining_budget = state.remaining_budget.saturating_sub(1);
        }
    }

    fn probe(&self, at: DateTime<Utc>) -> PitrResult<PredicateOutcome> {
        match predicate::evaluate(self.client, &self.search.query, at) {
            Ok(value) => Ok(value.into()),
            Err(e) if e.is_unreachable() => Err(e),
            Err(e) => match self.search.policy {
                TransientErrorPolicy::SearchEarlier => {
                    error!("Query failed: {e}. Searching earlier...");
                    Ok(PredicateOutcome::Indeterminate)
                }
                TransientErrorPolicy::Abort => Err(Error::SearchAborted {
                    at,
                    source: Box::new(e),
                }),
            },
        }
    }
}

/// Find the latest instant in `[start, end]` at which `query` returned `true`, to within
/// `accuracy`, using the default transient error policy.
pub fn find_closest_time(
    query: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    accuracy: Duration,
    client: &dyn TimeTravelClient,
) -> PitrResult<DateTime<Utc>> {
    let window = TimeWindow::try_new(start, end)?;
    TimelineSearch::new(query, window, accuracy).find_closest_time(client)
}
