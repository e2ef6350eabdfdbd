//! Append-only traffic log for routed requests.
//!
//! One JSON object per line:
//!
//! ```text
//! {"ts":"...","request_id":"1718000000000-k3j9x0a1b","kind":"request","data":{...}}
//! {"ts":"...","request_id":"1718000000000-k3j9x0a1b","kind":"stream_start"}
//! {"ts":"...","request_id":"1718000000000-k3j9x0a1b","kind":"chunk","data":"event: ..."}
//! {"ts":"...","request_id":"1718000000000-k3j9x0a1b","kind":"stream_end"}
//! ```
//!
//! Events are handed to a single writer thread over a channel. The request
//! path never waits on the disk, and events keep the order they were
//! emitted in. Write failures are logged with `tracing` and dropped.
//!
//! The thread exits once every [`Auditor`] clone is gone and the queue is
//! empty. [`AuditWriter::finish`] waits for that so a shutting-down service
//! does not lose queued records.

use actix_web::web::Bytes;
use chrono::Utc;
use futures::Stream;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Request,
    Response,
    StreamStart,
    Chunk,
    StreamEnd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: String,
    pub request_id: String,
    pub kind: AuditKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Destination of audit events.
pub trait AuditSink: Send + 'static {
    fn append(&mut self, event: &AuditEvent) -> io::Result<()>;
}

/// JSON Lines file, opened on first write.
pub struct JsonlSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "audit log not open"))
    }
}

impl AuditSink for JsonlSink {
    fn append(&mut self, event: &AuditEvent) -> io::Result<()> {
        let line = serde_json::to_string(event)?;
        let result = writeln!(self.file()?, "{}", line);
        if result.is_err() {
            // Reopen on the next event.
            self.file = None;
        }
        result
    }
}

#[derive(Clone)]
pub struct Auditor {
    tx: Option<UnboundedSender<AuditEvent>>,
}

/// Handle on the writer thread behind an [`Auditor`].
pub struct AuditWriter {
    handle: Option<JoinHandle<()>>,
}

impl AuditWriter {
    /// Wait up to `timeout` for the writer to drain and exit. Drop every
    /// `Auditor` first, otherwise this only returns at the deadline.
    /// Returns `false` if records may still be pending.
    pub fn finish(mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(?timeout, "audit writer still busy, pending records may be lost");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        if handle.join().is_err() {
            tracing::warn!("audit writer panicked");
            return false;
        }
        true
    }
}

impl Auditor {
    /// Start the writer thread for `sink`. If the thread can't be started
    /// the auditor is disabled rather than failing the service.
    pub fn spawn(mut sink: impl AuditSink) -> (Self, AuditWriter) {
        let (tx, mut rx) = unbounded_channel::<AuditEvent>();

        let spawned = std::thread::Builder::new()
            .name("hodos-audit".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    if let Err(e) = sink.append(&event) {
                        tracing::warn!(
                            error = %e,
                            request_id = %event.request_id,
                            "failed to write audit record"
                        );
                    }
                }
            });

        match spawned {
            Ok(handle) => (
                Self { tx: Some(tx) },
                AuditWriter {
                    handle: Some(handle),
                },
            ),
            Err(e) => {
                tracing::warn!(error = %e, "audit writer unavailable, traffic will not be recorded");
                (Self::disabled(), AuditWriter { handle: None })
            }
        }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record_request(&self, request_id: &str, snapshot: Value) {
        self.emit(request_id, AuditKind::Request, snapshot);
    }

    /// Record a complete, non-streamed response.
    pub fn record_response(&self, request_id: &str, status: u16, headers: Value, body: &[u8]) {
        let body = serde_json::from_slice::<Value>(body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
        self.emit(
            request_id,
            AuditKind::Response,
            json!({ "status": status, "headers": headers, "body": body }),
        );
    }

    /// Wrap a response body stream. The start marker is written now; every
    /// chunk is recorded as it passes through; the end marker is written
    /// when the stream finishes or is dropped early.
    pub fn audit_stream<S>(&self, request_id: impl Into<String>, inner: S) -> AuditedStream<S> {
        let request_id = request_id.into();
        self.emit(&request_id, AuditKind::StreamStart, Value::Null);
        AuditedStream {
            inner,
            auditor: self.clone(),
            request_id,
            finished: false,
        }
    }

    fn emit(&self, request_id: &str, kind: AuditKind, data: Value) {
        let Some(tx) = &self.tx else {
            return;
        };

        let event = AuditEvent {
            ts: Utc::now().to_rfc3339(),
            request_id: request_id.to_string(),
            kind,
            data,
        };
        if tx.send(event).is_err() {
            tracing::warn!(request_id, "audit writer stopped, dropping record");
        }
    }
}

/// Response stream that copies every chunk into the audit log and forwards
/// the original bytes unchanged.
pub struct AuditedStream<S> {
    inner: S,
    auditor: Auditor,
    request_id: String,
    finished: bool,
}

impl<S> AuditedStream<S> {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.auditor
                .emit(&self.request_id, AuditKind::StreamEnd, Value::Null);
        }
    }
}

impl<S, E> Stream for AuditedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.auditor.emit(
                    &this.request_id,
                    AuditKind::Chunk,
                    Value::String(String::from_utf8_lossy(&chunk).into_owned()),
                );
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<S> Drop for AuditedStream<S> {
    fn drop(&mut self) {
        // Client went away mid-stream.
        self.finish();
    }
}

/// `<unix millis>-<9 base36 chars>`. Unique enough to correlate log lines;
/// not a security token.
pub fn new_request_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();

    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Headers safe to write to the audit log.
pub fn redact_headers<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Value {
    const SECRET_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie", "proxy-authorization"];

    let map = headers
        .into_iter()
        .map(|(name, value)| {
            let value = if SECRET_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_string()
            };
            (name.to_string(), Value::String(value))
        })
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySink;
    use futures::{stream, StreamExt};
    use std::convert::Infallible;
    use tempfile::TempDir;

    #[test]
    fn test_request_id_shape() {
        let id = new_request_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(new_request_id(), new_request_id());
    }

    #[test]
    fn test_redact_headers() {
        let redacted = redact_headers(vec![
            ("Authorization", "Bearer sk-secret"),
            ("x-api-key", "sk-secret"),
            ("anthropic-version", "2023-06-01"),
        ]);
        assert_eq!(redacted["Authorization"], "[REDACTED]");
        assert_eq!(redacted["x-api-key"], "[REDACTED]");
        assert_eq!(redacted["anthropic-version"], "2023-06-01");
    }

    #[test]
    fn test_disabled_auditor_records_nothing() {
        let auditor = Auditor::disabled();
        assert!(!auditor.is_enabled());
        auditor.record_request("id", json!({}));
    }

    #[test]
    fn test_non_json_response_body_kept_as_text() {
        let sink = MemorySink::new();
        let (auditor, _writer) = Auditor::spawn(sink.clone());

        auditor.record_response("r1", 502, json!({}), b"upstream exploded");

        let events = sink.wait_for(1);
        assert_eq!(events[0].kind, AuditKind::Response);
        assert_eq!(events[0].data["status"], 502);
        assert_eq!(events[0].data["body"], "upstream exploded");
    }

    #[tokio::test]
    async fn test_stream_records_chunks_in_order() {
        let sink = MemorySink::new();
        let (auditor, _writer) = Auditor::spawn(sink.clone());
        let chunks = vec!["event: a\n\n", "event: b\n\n", "event: c\n\n"];
        let inner = stream::iter(
            chunks
                .clone()
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from(c))),
        );

        let forwarded: Vec<Bytes> = auditor
            .audit_stream("r1", inner)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(
            forwarded,
            chunks.iter().map(|c| Bytes::from(*c)).collect::<Vec<_>>()
        );

        let events = sink.wait_for(5);
        let kinds: Vec<AuditKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AuditKind::StreamStart,
                AuditKind::Chunk,
                AuditKind::Chunk,
                AuditKind::Chunk,
                AuditKind::StreamEnd
            ]
        );
        assert_eq!(events[2].data, "event: b\n\n");
        assert!(events.iter().all(|e| e.request_id == "r1"));
    }

    #[tokio::test]
    async fn test_dropped_stream_still_ends() {
        let sink = MemorySink::new();
        let (auditor, _writer) = Auditor::spawn(sink.clone());
        let inner = stream::iter(
            vec!["one", "two", "three"]
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from(c))),
        );

        let mut audited = auditor.audit_stream("r2", inner);
        assert_eq!(audited.next().await.unwrap().unwrap(), Bytes::from("one"));
        drop(audited);

        let events = sink.wait_for(3);
        let kinds: Vec<AuditKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![AuditKind::StreamStart, AuditKind::Chunk, AuditKind::StreamEnd]
        );
    }

    #[test]
    fn test_finish_flushes_every_queued_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traffic.jsonl");
        let (auditor, writer) = Auditor::spawn(JsonlSink::new(&path));

        for i in 0..2000 {
            auditor.record_request(&format!("r{}", i), json!({ "n": i }));
        }
        let stream = auditor.audit_stream(
            "late",
            stream::iter(vec![Ok::<_, Infallible>(Bytes::from("x"))]),
        );
        drop(auditor);
        drop(stream);

        assert!(writer.finish(Duration::from_secs(10)));

        let content = fs::read_to_string(&path).unwrap();
        let events: Vec<AuditEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2002);
        assert_eq!(events[1999].request_id, "r1999");
        assert_eq!(events[2001].kind, AuditKind::StreamEnd);
    }

    #[test]
    fn test_finish_times_out_while_auditor_alive() {
        let (auditor, writer) = Auditor::spawn(MemorySink::new());
        assert!(!writer.finish(Duration::from_millis(50)));
        drop(auditor);
    }

    #[test]
    fn test_disabled_writer_finishes_immediately() {
        let writer = AuditWriter { handle: None };
        assert!(writer.finish(Duration::ZERO));
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("traffic.jsonl");
        let mut sink = JsonlSink::new(&path);

        for kind in [AuditKind::StreamStart, AuditKind::StreamEnd] {
            sink.append(&AuditEvent {
                ts: Utc::now().to_rfc3339(),
                request_id: "r3".to_string(),
                kind,
                data: Value::Null,
            })
            .unwrap();
        }

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<AuditEvent> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, AuditKind::StreamStart);
        assert!(!content.contains("\"data\""));
    }

    #[test]
    fn test_jsonl_sink_reports_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let mut sink = JsonlSink::new(blocker.join("traffic.jsonl"));

        let event = AuditEvent {
            ts: Utc::now().to_rfc3339(),
            request_id: "r4".to_string(),
            kind: AuditKind::Request,
            data: json!({}),
        };
        assert!(sink.append(&event).is_err());
    }
}
