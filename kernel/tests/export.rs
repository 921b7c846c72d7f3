//! Exports to real files, plain and gzip-compressed.

use std::sync::Arc;

use pitr_kernel::engine::memory::{InMemoryEngine, QueryResponse};
use pitr_kernel::export::{export_records, stream_records, QueryExporter};
use pitr_kernel::metrics::MetricEvent;
use pitr_kernel::schema::{Column, DataType, Schema};
use pitr_kernel::{Error, Scalar};
use rstest::rstest;
use tempfile::tempdir;
use test_utils::{
    read_gz_to_string, read_to_string, string_rows, string_schema, t0, t0_plus, RecordingReporter,
};

const QUERY: &str = "SELECT id, value FROM kv ORDER BY id";
const EXPECTED: &str = "\"id\",\"value\"\n\"a\",\"x\"\n\"b\",\"y\"\n";

fn two_row_engine() -> InMemoryEngine {
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [(
            t0(),
            QueryResponse::rows(
                string_schema(&["id", "value"]),
                string_rows(&[&["a", "x"], &["b", "y"]]),
            ),
        )],
    );
    engine
}

#[rstest]
#[case::plain("out.csv", false)]
#[case::gzip("out.csv.gz", true)]
fn exports_quoted_csv(#[case] file_name: &str, #[case] compressed: bool) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(file_name);
    let engine = two_row_engine();

    let summary = export_records(QUERY, t0_plus(60), &path, &engine).unwrap();

    assert_eq!(summary.num_rows, 2);
    assert_eq!(summary.compressed, compressed);
    let content = if compressed {
        read_gz_to_string(&path)
    } else {
        read_to_string(&path)
    };
    assert_eq!(content, EXPECTED);
    assert_eq!(engine.open_cursors(), 0);
}

#[rstest]
#[case::plain("empty.csv")]
#[case::gzip("empty.csv.gz")]
fn empty_result_writes_no_header(#[case] file_name: &str) {
    let dir = tempdir().unwrap();
    let path = dir.path().join(file_name);
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [(t0(), QueryResponse::rows(string_schema(&["id", "value"]), vec![]))],
    );

    let summary = export_records(QUERY, t0(), &path, &engine).unwrap();

    assert_eq!(summary.num_rows, 0);
    assert!(path.exists());
    if summary.compressed {
        assert_eq!(read_gz_to_string(&path), "");
    } else {
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}

#[test]
fn one_line_per_record_plus_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("many.csv");
    let ids: Vec<String> = (0..250).map(|i| format!("id-{i:03}")).collect();
    let rows = ids
        .iter()
        .map(|id| vec![Scalar::from(id.as_str()), Scalar::Null])
        .collect();
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [(t0(), QueryResponse::rows(string_schema(&["id", "value"]), rows))],
    );

    let summary = export_records(QUERY, t0(), &path, &engine).unwrap();

    let content = read_to_string(&path);
    assert_eq!(summary.num_rows, 250);
    assert_eq!(content.lines().count(), 251);
    assert_eq!(content.lines().nth(1), Some("\"id-000\","));
}

#[test]
fn export_reads_the_requested_instant() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("before.csv");
    let engine = InMemoryEngine::new();
    let schema = string_schema(&["id", "value"]);
    engine.register(
        QUERY,
        [
            (
                t0(),
                QueryResponse::rows(schema.clone(), string_rows(&[&["a", "x"], &["b", "y"]])),
            ),
            (
                t0_plus(1800),
                QueryResponse::rows(schema, string_rows(&[&["a", "overwritten"]])),
            ),
        ],
    );

    export_records(QUERY, t0_plus(1799), &path, &engine).unwrap();
    assert_eq!(read_to_string(&path), EXPECTED);
}

#[test]
fn failed_open_leaves_no_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("never.csv");
    let engine = InMemoryEngine::new();

    let err = export_records(QUERY, t0(), &path, &engine).unwrap_err();

    assert!(matches!(err, Error::Query { .. }));
    assert!(!path.exists());
}

#[test]
fn mid_stream_failure_closes_cursor() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.csv");
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [(
            t0(),
            QueryResponse::Truncated {
                schema: string_schema(&["id", "value"]),
                rows: string_rows(&[&["a", "x"]]),
                message: "Transaction was aborted".to_string(),
            },
        )],
    );
    let reporter = RecordingReporter::new();

    let err = QueryExporter::new(QUERY, t0(), &path)
        .with_metrics_reporter(reporter.clone())
        .export_records(&engine)
        .unwrap_err();

    assert!(matches!(err, Error::Query { ref status, .. } if status == "ABORTED"));
    assert_eq!(engine.open_cursors(), 0);
    assert_eq!(
        reporter.count(|e| matches!(e, MetricEvent::ExportFailed { .. })),
        1
    );
    // whatever was written before the failure stays on disk
    assert!(read_to_string(&path).starts_with("\"id\",\"value\"\n"));
}

#[test]
fn typed_columns_render_as_text() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("typed.csv");
    let schema = Arc::new(Schema::new([
        Column::new("n", DataType::Long),
        Column::new("ok", DataType::Boolean),
        Column::new("price", DataType::Numeric),
        Column::new("at", DataType::Timestamp),
    ]));
    let engine = InMemoryEngine::new();
    engine.register(
        QUERY,
        [(
            t0(),
            QueryResponse::rows(
                schema,
                vec![vec![
                    Scalar::Long(-3),
                    Scalar::Boolean(true),
                    Scalar::Numeric("1.25".into()),
                    Scalar::Timestamp(t0_plus(90)),
                ]],
            ),
        )],
    );

    export_records(QUERY, t0(), &path, &engine).unwrap();

    assert_eq!(
        read_to_string(&path),
        "\"n\",\"ok\",\"price\",\"at\"\n\"-3\",\"true\",\"1.25\",\"2020-06-01T00:01:30Z\"\n"
    );
}

#[test]
fn records_stream_lazily() {
    let engine = two_row_engine();
    let mut records = stream_records(QUERY, t0(), &engine).unwrap();
    assert_eq!(engine.open_cursors(), 1);

    let first = records.next().unwrap().unwrap();
    assert_eq!(first.get("value"), Some(Some("x")));
    drop(records);
    assert_eq!(engine.open_cursors(), 0);
}

#[test]
fn reporter_sees_completed_export() {
    let dir = tempdir().unwrap();
    let reporter = RecordingReporter::new();
    let engine = two_row_engine();

    QueryExporter::new(QUERY, t0(), dir.path().join("ok.csv"))
        .with_metrics_reporter(reporter.clone())
        .export_records(&engine)
        .unwrap();

    let events = reporter.events();
    assert!(matches!(events[0], MetricEvent::ExportStarted { .. }));
    assert!(matches!(
        events[1],
        MetricEvent::ExportCompleted { num_rows: 2, .. }
    ));
}
