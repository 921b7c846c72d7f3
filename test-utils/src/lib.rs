//! A number of utilities useful for testing that we want to use in multiple crates

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use flate2::read::GzDecoder;
use pitr_kernel::metrics::{MetricEvent, MetricsReporter};
use pitr_kernel::schema::{Column, DataType, Schema, SchemaRef};
use pitr_kernel::Scalar;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

/// The instant most tests anchor their timelines on.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
}

/// `t0()` plus `secs` seconds.
pub fn t0_plus(secs: i64) -> DateTime<Utc> {
    t0() + TimeDelta::seconds(secs)
}

/// A schema of `STRING` columns with the given names.
pub fn string_schema(names: &[&str]) -> SchemaRef {
    Arc::new(Schema::new(
        names.iter().map(|name| Column::new(*name, DataType::String)),
    ))
}

/// Rows of non-null strings, for use with [`string_schema`].
pub fn string_rows(rows: &[&[&str]]) -> Vec<Vec<Scalar>> {
    rows.iter()
        .map(|row| row.iter().map(|value| Scalar::from(*value)).collect())
        .collect()
}

pub fn read_to_string(path: impl AsRef<Path>) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Decompress a gzip file and return its content as text.
pub fn read_gz_to_string(path: impl AsRef<Path>) -> String {
    let mut content = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut content)
        .unwrap();
    content
}

/// A [`MetricsReporter`] that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&MetricEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub fn search_steps(&self) -> usize {
        self.count(|e| matches!(e, MetricEvent::SearchStepCompleted { .. }))
    }
}

impl MetricsReporter for RecordingReporter {
    fn report(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// Writer that captures log output into a shared buffer for test assertions
pub struct LogWriter(pub Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

// Captures everything logged on the current thread while it is alive
pub struct LoggingTest {
    logs: Arc<Mutex<Vec<u8>>>,
    _guard: DefaultGuard,
}

impl Default for LoggingTest {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingTest {
    pub fn new() -> Self {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let writer_logs = logs.clone();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(move || LogWriter(writer_logs.clone()))
                    .with_ansi(false),
            ),
        );
        Self { logs, _guard }
    }

    pub fn logs(&self) -> String {
        String::from_utf8(self.logs.lock().unwrap().clone()).unwrap()
    }

    /// Logged lines containing `needle`.
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.logs()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

/// One request received by a [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// An HTTP server on a local port that answers requests with canned `(status, json body)`
/// responses, in order, closing the connection after each. It stops accepting once the responses
/// run out, so clients see connection errors after that.
pub struct StubServer {
    url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub fn start<S: Into<String>>(responses: impl IntoIterator<Item = (u16, S)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(vec![]));
        let recorded = requests.clone();
        let responses: Vec<(u16, String)> = responses
            .into_iter()
            .map(|(status, body)| (status, body.into()))
            .collect();
        thread::spawn(move || {
            for (status, body) in responses {
                let Ok((stream, _)) = listener.accept() else {
                    return;
                };
                let Some(request) = read_request(&stream) else {
                    return;
                };
                recorded.lock().unwrap().push(request);
                let _ = write!(
                    &stream,
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
            }
        });
        Self { url, requests }
    }

    /// Base URL of the server, e.g. `http://127.0.0.1:43121`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The requests received so far.
    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// `"METHOD /path"` of each request received so far.
    pub fn request_lines(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| format!("{} {}", request.method, request.path))
            .collect()
    }
}

fn read_request(stream: &TcpStream) -> Option<StubRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 || header == "\r\n" {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).ok()?;
    Some(StubRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
