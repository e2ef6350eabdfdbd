//! The LLM-serving backend a routed request is forwarded to.

use crate::types::RoutableRequest;
use actix_web::{web::Bytes, HttpRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use hodos_config::ProviderConfig;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no provider named '{0}' is configured")]
    UnknownProvider(String),

    #[error("no providers configured")]
    NoProviders,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl BackendError {
    /// Status returned to the client when forwarding fails.
    pub fn status_code(&self) -> u16 {
        match self {
            BackendError::Upstream(_) => 502,
            BackendError::UnknownProvider(_) | BackendError::NoProviders => 500,
        }
    }
}

pub enum BackendBody {
    Full(Bytes),
    Stream(ByteStream),
}

pub struct BackendResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BackendBody,
}

impl BackendResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_stream_content_type(&self) -> bool {
        self.content_type().is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("text/event-stream") || ct.starts_with("application/x-ndjson")
        })
    }
}

/// Client headers passed through to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardHeaders {
    pub anthropic_version: Option<String>,
    pub anthropic_beta: Option<String>,
}

impl ForwardHeaders {
    pub fn from_request(req: &HttpRequest) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            anthropic_version: header("anthropic-version"),
            anthropic_beta: header("anthropic-beta"),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn forward(
        &self,
        request: RoutableRequest,
        headers: &ForwardHeaders,
    ) -> Result<BackendResponse, BackendError>;
}

/// Forwards to a configured provider over HTTP, Anthropic wire format.
pub struct HttpBackend {
    client: reqwest::Client,
    providers: Vec<ProviderConfig>,
}

impl HttpBackend {
    pub fn new(providers: Vec<ProviderConfig>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, providers })
    }

    /// Split `provider,model`. A bare model goes to the first provider.
    pub fn resolve<'m>(&self, model: &'m str) -> Result<(&ProviderConfig, &'m str), BackendError> {
        match model.split_once(',') {
            Some((name, model)) => {
                let name = name.trim();
                let provider = self
                    .providers
                    .iter()
                    .find(|p| p.name == name)
                    .ok_or_else(|| BackendError::UnknownProvider(name.to_string()))?;
                Ok((provider, model.trim()))
            }
            None => {
                let provider = self.providers.first().ok_or(BackendError::NoProviders)?;
                Ok((provider, model))
            }
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn forward(
        &self,
        mut request: RoutableRequest,
        headers: &ForwardHeaders,
    ) -> Result<BackendResponse, BackendError> {
        let (provider, model) = self.resolve(&request.model)?;
        let model = model.to_string();
        let url = format!("{}/v1/messages", provider.api_base_url.trim_end_matches('/'));
        let provider_key = provider.api_key.clone();
        request.model = model;

        tracing::debug!(provider = %provider.name, model = %request.model, url = %url, "forwarding request");

        let mut builder = self
            .client
            .post(&url)
            .header(
                "anthropic-version",
                headers
                    .anthropic_version
                    .as_deref()
                    .unwrap_or(DEFAULT_ANTHROPIC_VERSION),
            )
            .header("content-type", "application/json");
        if let Some(key) = provider_key.as_deref() {
            builder = builder
                .header("x-api-key", key)
                .header("authorization", format!("Bearer {}", key));
        }
        if let Some(beta) = headers.anthropic_beta.as_deref() {
            builder = builder.header("anthropic-beta", beta);
        }

        let upstream = builder.json(&request).send().await?;

        let status = upstream.status().as_u16();
        let response_headers: Vec<(String, String)> = upstream
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_header(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut response = BackendResponse {
            status,
            headers: response_headers,
            body: BackendBody::Full(Bytes::new()),
        };

        if response.is_stream_content_type() {
            let stream = upstream
                .bytes_stream()
                .map(|chunk| chunk.map_err(BackendError::from))
                .boxed();
            response.body = BackendBody::Stream(stream);
        } else {
            response.body = BackendBody::Full(upstream.bytes().await?);
        }

        Ok(response)
    }
}

fn is_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "content-length" | "transfer-encoding" | "connection"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            api_base_url: format!("http://{}.invalid", name),
            api_key: None,
            models: Vec::new(),
        }
    }

    fn backend(providers: Vec<ProviderConfig>) -> HttpBackend {
        HttpBackend::new(providers, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_resolve_provider_and_model() {
        let backend = backend(vec![provider("openrouter"), provider("local")]);

        let (p, model) = backend.resolve("local,qwen3-coder").unwrap();
        assert_eq!(p.name, "local");
        assert_eq!(model, "qwen3-coder");

        let (p, model) = backend.resolve("claude-sonnet-4").unwrap();
        assert_eq!(p.name, "openrouter");
        assert_eq!(model, "claude-sonnet-4");
    }

    #[test]
    fn test_resolve_errors() {
        let backend = backend(vec![provider("openrouter")]);
        let err = backend.resolve("missing,m1").unwrap_err();
        assert!(matches!(err, BackendError::UnknownProvider(ref n) if n == "missing"));
        assert_eq!(err.status_code(), 500);

        let empty = HttpBackend::new(Vec::new(), Duration::from_secs(5)).unwrap();
        assert!(matches!(empty.resolve("m1"), Err(BackendError::NoProviders)));
    }

    #[test]
    fn test_stream_content_type_detection() {
        let response = |ct: &str| BackendResponse {
            status: 200,
            headers: vec![("Content-Type".to_string(), ct.to_string())],
            body: BackendBody::Full(Bytes::new()),
        };

        assert!(response("text/event-stream; charset=utf-8").is_stream_content_type());
        assert!(response("application/x-ndjson").is_stream_content_type());
        assert!(!response("application/json").is_stream_content_type());
    }

    #[test]
    fn test_hop_headers_are_dropped() {
        assert!(is_hop_header("Content-Length"));
        assert!(is_hop_header("transfer-encoding"));
        assert!(!is_hop_header("content-type"));
    }
}
