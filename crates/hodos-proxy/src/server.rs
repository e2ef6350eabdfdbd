//! Actix Web HTTP server.
//!
//! Endpoints:
//! - `GET /` and `GET /health`: liveness, no auth
//! - `POST /v1/messages`: routed, audited, forwarded to the backend

use crate::{
    audit::{new_request_id, redact_headers, AuditWriter, Auditor, JsonlSink},
    auth,
    backend::{Backend, BackendBody, BackendResponse, ForwardHeaders, HttpBackend},
    router::Router,
    types::RoutableRequest,
};
use actix_web::{http::StatusCode, web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use futures::StreamExt;
use hodos_config::{HodosConfig, HodosPaths};
use hodos_service::{MarkerGuard, ProcessRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub router: Router,
    pub auditor: Auditor,
    pub backend: Arc<dyn Backend>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(router: Router, auditor: Auditor, backend: Arc<dyn Backend>) -> Self {
        Self {
            router,
            auditor,
            backend,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn from_config(config: &HodosConfig, auditor: Auditor) -> Result<Self> {
        let backend = HttpBackend::new(
            config.providers.clone(),
            Duration::from_millis(config.code.api_timeout_ms),
        )
        .context("failed to build backend client")?;

        Ok(Self {
            router: Router::new(config.routing()),
            auditor,
            backend: Arc::new(backend),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

/// The traffic auditor described by `config`, or a disabled one.
pub fn auditor_from_config(
    config: &HodosConfig,
    paths: &HodosPaths,
) -> (Auditor, Option<AuditWriter>) {
    if !config.audit.enabled {
        return (Auditor::disabled(), None);
    }

    let path = config
        .audit
        .path
        .clone()
        .unwrap_or_else(|| paths.audit_log_file());
    info!(path = %path.display(), "recording traffic");
    let (auditor, writer) = Auditor::spawn(JsonlSink::new(path));
    (auditor, Some(writer))
}

/// Routes and limits shared by the server and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_BODY_BYTES))
        .route("/", web::get().to(index))
        .route("/health", web::get().to(health_check))
        .route("/v1/messages", web::post().to(handle_messages));
}

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    /// Marker to claim once the listener is bound. `None` runs without one.
    pub registry: Option<ProcessRegistry>,
}

/// Bind, claim the marker, then serve until SIGINT/SIGTERM.
///
/// A second instance racing this one fails at bind and never touches the
/// marker. The marker is released on the way out only if it still names
/// this process. Queued audit records are written out before returning.
pub async fn serve(config: &HodosConfig, paths: &HodosPaths, options: ServeOptions) -> Result<()> {
    let (auditor, writer) = auditor_from_config(config, paths);
    let state = web::Data::new(AppState::from_config(config, auditor)?);
    let addr = (options.host.clone(), options.port);

    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind(addr)
        .with_context(|| format!("failed to bind {}:{}", options.host, options.port))?;

    let _marker = options
        .registry
        .map(|registry| MarkerGuard::acquire(registry, std::process::id()))
        .transpose()
        .context("failed to write pid marker")?;

    info!(host = %options.host, port = options.port, pid = std::process::id(), "hodos listening");

    // The server owns every `Auditor` clone; once it has stopped the
    // writer can drain.
    let result = server.run().await.context("server error");

    if let Some(writer) = writer {
        match tokio::task::spawn_blocking(move || writer.finish(AUDIT_DRAIN_TIMEOUT)).await {
            Ok(true) => debug!("audit log flushed"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "audit writer join failed"),
        }
    }

    result?;
    info!("hodos stopped");
    Ok(())
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "name": "hodos",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

fn error_body(kind: &str, message: &str) -> Value {
    json!({
        "type": "error",
        "error": { "type": kind, "message": message }
    })
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

async fn handle_messages(
    state: web::Data<AppState>,
    req_http: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(rejection) = auth::authorize(&req_http, state.api_key.as_deref()) {
        return rejection;
    }

    let mut request: RoutableRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "rejecting unparsable request body");
            return HttpResponse::BadRequest()
                .json(error_body("invalid_request_error", &e.to_string()));
        }
    };

    let request_id = new_request_id();
    let report = state.router.route(&mut request);
    debug!(
        request_id = %request_id,
        original_model = %report.original_model,
        model = %report.model,
        system_prompt_injected = report.system_prompt_injected,
        reminder_appended = report.reminder_appended,
        stream = request.is_streaming(),
        "routing decision"
    );

    if state.auditor.is_enabled() {
        let headers = redact_headers(
            req_http
                .headers()
                .iter()
                .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
        );
        state.auditor.record_request(
            &request_id,
            json!({
                "method": req_http.method().as_str(),
                "path": req_http.path(),
                "query": req_http.query_string(),
                "headers": headers,
                "body": &request,
            }),
        );
    }

    let forward_headers = ForwardHeaders::from_request(&req_http);
    match state.backend.forward(request, &forward_headers).await {
        Ok(upstream) => respond(&state.auditor, request_id, upstream),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "backend request failed");
            let status = e.status_code();
            let body = error_body("api_error", &e.to_string());
            state.auditor.record_response(
                &request_id,
                status,
                json!({}),
                body.to_string().as_bytes(),
            );
            HttpResponse::build(status_code(status))
                .insert_header((REQUEST_ID_HEADER, request_id))
                .json(body)
        }
    }
}

fn respond(auditor: &Auditor, request_id: String, upstream: BackendResponse) -> HttpResponse {
    let mut builder = HttpResponse::build(status_code(upstream.status));
    for (name, value) in &upstream.headers {
        builder.insert_header((name.as_str(), value.as_str()));
    }
    builder.insert_header((REQUEST_ID_HEADER, request_id.as_str()));

    match upstream.body {
        BackendBody::Stream(stream) => {
            let audited = auditor.audit_stream(request_id, stream).map(|chunk| {
                chunk.map_err(|e| actix_web::error::ErrorBadGateway(e.to_string()))
            });
            builder.insert_header(("cache-control", "no-cache"));
            builder.streaming(audited)
        }
        BackendBody::Full(bytes) => {
            let headers = redact_headers(
                upstream
                    .headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str())),
            );
            auditor.record_response(&request_id, upstream.status, headers, &bytes);
            builder.body(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_auditor_from_config_writes_default_log() {
        let dir = TempDir::new().unwrap();
        let paths = HodosPaths::new(dir.path());

        let (auditor, writer) = auditor_from_config(&HodosConfig::default(), &paths);
        auditor.record_request("r1", json!({ "path": "/v1/messages" }));
        drop(auditor);
        assert!(writer.unwrap().finish(Duration::from_secs(5)));

        let content = std::fs::read_to_string(paths.audit_log_file()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"request_id\":\"r1\""));
    }

    #[test]
    fn test_auditor_from_config_disabled() {
        let dir = TempDir::new().unwrap();
        let mut config = HodosConfig::default();
        config.audit.enabled = false;

        let (auditor, writer) = auditor_from_config(&config, &HodosPaths::new(dir.path()));
        assert!(!auditor.is_enabled());
        assert!(writer.is_none());
    }
}
