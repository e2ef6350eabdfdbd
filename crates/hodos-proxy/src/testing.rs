//! Test doubles for the backend and the audit sink.

use crate::audit::{AuditEvent, AuditSink};
use crate::backend::{Backend, BackendBody, BackendError, BackendResponse, ForwardHeaders};
use crate::types::RoutableRequest;
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collects audit events in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    /// Block until at least `count` events arrived or two seconds passed,
    /// then return what was recorded.
    pub fn wait_for(&self, count: usize) -> Vec<AuditEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let events = self.events();
            if events.len() >= count || Instant::now() >= deadline {
                return events;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl AuditSink for MemorySink {
    fn append(&mut self, event: &AuditEvent) -> io::Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

enum Reply {
    Json(u16, Value),
    Chunks(Vec<String>),
    UnknownProvider(String),
}

/// Backend that records what it was sent and answers with a canned reply.
pub struct StubBackend {
    reply: Reply,
    requests: Mutex<Vec<(RoutableRequest, ForwardHeaders)>>,
}

impl StubBackend {
    pub fn json(status: u16, body: Value) -> Self {
        Self::with_reply(Reply::Json(status, body))
    }

    /// Reply with a `text/event-stream` body made of `chunks`.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_reply(Reply::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    pub fn unknown_provider(name: &str) -> Self {
        Self::with_reply(Reply::UnknownProvider(name.to_string()))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RoutableRequest> {
        lock(&self.requests).iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn headers(&self) -> Vec<ForwardHeaders> {
        lock(&self.requests).iter().map(|(_, h)| h.clone()).collect()
    }
}

#[async_trait]
impl Backend for StubBackend {
    async fn forward(
        &self,
        request: RoutableRequest,
        headers: &ForwardHeaders,
    ) -> Result<BackendResponse, BackendError> {
        lock(&self.requests).push((request, headers.clone()));

        match &self.reply {
            Reply::Json(status, body) => Ok(BackendResponse {
                status: *status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body: BackendBody::Full(Bytes::from(body.to_string())),
            }),
            Reply::Chunks(chunks) => {
                let items: Vec<Result<Bytes, BackendError>> =
                    chunks.iter().map(|c| Ok(Bytes::from(c.clone()))).collect();
                Ok(BackendResponse {
                    status: 200,
                    headers: vec![("content-type".to_string(), "text/event-stream".to_string())],
                    body: BackendBody::Stream(stream::iter(items).boxed()),
                })
            }
            Reply::UnknownProvider(name) => Err(BackendError::UnknownProvider(name.clone())),
        }
    }
}
