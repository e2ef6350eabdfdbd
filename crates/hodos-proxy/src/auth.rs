use actix_web::{HttpRequest, HttpResponse};
use serde_json::json;

/// Check the client's key against the configured one. Without a configured
/// key every request is accepted.
pub fn authorize(req: &HttpRequest, api_key: Option<&str>) -> Result<(), HttpResponse> {
    let Some(expected) = api_key.filter(|k| !k.is_empty()) else {
        return Ok(());
    };

    let headers = req.headers();
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    if presented.map(str::trim) == Some(expected) {
        return Ok(());
    }

    tracing::debug!(path = %req.path(), "rejected request with missing or invalid api key");
    Err(HttpResponse::Unauthorized().json(json!({
        "type": "error",
        "error": {
            "type": "authentication_error",
            "message": "invalid or missing api key"
        }
    })))
}
