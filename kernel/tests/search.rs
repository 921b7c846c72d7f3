//! End-to-end timeline searches against the in-memory engine.

use std::time::Duration;

use chrono::TimeDelta;
use pitr_kernel::engine::memory::{InMemoryEngine, QueryResponse};
use pitr_kernel::metrics::MetricEvent;
use pitr_kernel::search::{find_closest_time, TimeWindow, TimelineSearch, TransientErrorPolicy};
use pitr_kernel::Error;
use test_utils::{t0, t0_plus, LoggingTest, RecordingReporter};

const QUERY: &str = "SELECT COUNT(*) > 0 FROM orders";

fn hour_window() -> TimeWindow {
    TimeWindow::try_new(t0(), t0_plus(3600)).unwrap()
}

fn engine_true_until(secs: i64) -> InMemoryEngine {
    let engine = InMemoryEngine::new();
    engine.register_predicate(QUERY, [(t0(), true), (t0_plus(secs), false)]);
    engine
}

#[test_log::test]
fn finds_last_true_instant_within_accuracy() {
    let engine = engine_true_until(1800);
    let reporter = RecordingReporter::new();
    let search = TimelineSearch::new(QUERY, hour_window(), Duration::from_millis(500))
        .with_metrics_reporter(reporter.clone());

    let found = search.find_closest_time(&engine).unwrap();

    // the first probe lands exactly on the transition, every later one is true
    assert_eq!(found, t0_plus(1800) - TimeDelta::nanoseconds(439_453_125));
    assert!(found >= t0_plus(1800) - TimeDelta::milliseconds(500));
    assert_eq!(reporter.search_steps(), 13);
    assert_eq!(search.expected_iterations().unwrap(), 13);
    assert_eq!(engine.read_count(), 2 + 13);
    assert_eq!(engine.max_open_cursors(), 1);
    assert_eq!(engine.open_cursors(), 0);
    assert_eq!(
        reporter.count(|e| matches!(e, MetricEvent::SearchCompleted { steps: 13, .. })),
        1
    );
}

#[test]
fn repeated_searches_agree() {
    let engine = engine_true_until(1234);
    let first = find_closest_time(QUERY, t0(), t0_plus(3600), Duration::from_secs(1), &engine);
    let second = find_closest_time(QUERY, t0(), t0_plus(3600), Duration::from_secs(1), &engine);
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first, second);
    assert!(first < t0_plus(1234));
    assert!(first >= t0_plus(1233));
}

#[test]
fn false_at_start_does_not_bisect() {
    let engine = InMemoryEngine::new();
    engine.register_predicate(QUERY, [(t0(), false)]);
    let reporter = RecordingReporter::new();

    let err = TimelineSearch::new(QUERY, hour_window(), Duration::from_millis(500))
        .with_metrics_reporter(reporter.clone())
        .find_closest_time(&engine)
        .unwrap_err();

    assert!(matches!(err, Error::PredicateFalseAtStart(at) if at == t0()));
    assert_eq!(engine.read_count(), 1);
    assert!(reporter.events().is_empty());
}

#[test]
fn true_at_end_does_not_bisect() {
    let engine = engine_true_until(7200);
    let reporter = RecordingReporter::new();

    let err = TimelineSearch::new(QUERY, hour_window(), Duration::from_millis(500))
        .with_metrics_reporter(reporter.clone())
        .find_closest_time(&engine)
        .unwrap_err();

    assert!(matches!(err, Error::PredicateTrueAtEnd(at) if at == t0_plus(3600)));
    assert_eq!(engine.read_count(), 2);
    assert_eq!(reporter.search_steps(), 0);
}

#[test]
fn dropped_table_is_searched_around() {
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [
            (t0(), QueryResponse::predicate(true)),
            (t0_plus(1800), QueryResponse::table_not_found("orders")),
        ],
    );
    let logs = LoggingTest::new();

    let found =
        find_closest_time(QUERY, t0(), t0_plus(3600), Duration::from_millis(500), &engine).unwrap();

    assert!(found < t0_plus(1800));
    assert!(found >= t0_plus(1800) - TimeDelta::milliseconds(500));
    assert!(!logs.lines_containing("Searching earlier").is_empty());
    assert!(!logs.lines_containing("Table not found: orders").is_empty());
}

#[test]
fn abort_policy_stops_at_first_query_error() {
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [
            (t0(), QueryResponse::predicate(true)),
            (t0_plus(1800), QueryResponse::table_not_found("orders")),
        ],
    );

    let err = TimelineSearch::new(QUERY, hour_window(), Duration::from_millis(500))
        .with_transient_error_policy(TransientErrorPolicy::Abort)
        .find_closest_time(&engine)
        .unwrap_err();

    assert!(matches!(err, Error::SearchAborted { at, .. } if at == t0_plus(1800)));
}

#[test]
fn unreachable_database_fails_fast() {
    let engine = engine_true_until(1800);
    engine.set_unreachable("Database not found: projects/p/instances/i/databases/d");

    let err = find_closest_time(QUERY, t0(), t0_plus(3600), Duration::from_millis(500), &engine)
        .unwrap_err();

    assert!(err.is_unreachable());
    assert_eq!(engine.read_count(), 1);
}

#[test]
fn empty_result_counts_as_false() {
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [
            (t0(), QueryResponse::predicate(true)),
            (t0_plus(600), QueryResponse::empty()),
        ],
    );

    let found =
        find_closest_time(QUERY, t0(), t0_plus(3600), Duration::from_secs(1), &engine).unwrap();
    assert!(found < t0_plus(600));
    assert!(found >= t0_plus(599));
}
