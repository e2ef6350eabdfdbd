//! Messages API request body as the router sees it.
//!
//! Only the fields routing touches are typed. Everything else is kept in
//! `extra` and serialized back unchanged, so the backend receives the body
//! the client sent plus the router's edits.

use crate::router::RouteError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    /// A string or an array of content blocks; not interpreted here.
    pub content: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn user_text(text: &str) -> Self {
        Self {
            role: Role::User,
            content: json!([text_block(text)]),
            extra: Map::new(),
        }
    }
}

/// Request body for `/v1/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutableRequest {
    #[serde(default)]
    pub model: String,

    pub messages: Vec<Message>,

    /// System prompt: absent, a string, or an array of system blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoutableRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// System entries in array form. A string system prompt counts as one
    /// text block.
    pub fn system_entries(&self) -> Result<Vec<Value>, RouteError> {
        match &self.system {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) if s.is_empty() => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![text_block(s)]),
            Some(Value::Array(entries)) => Ok(entries.clone()),
            Some(other) => Err(RouteError::MalformedSystem(json_kind(other))),
        }
    }

    /// Put `entry` first in the system sequence, keeping existing entries
    /// after it in their order.
    pub fn prepend_system_entry(&mut self, entry: Value) -> Result<(), RouteError> {
        let mut entries = self.system_entries()?;
        entries.insert(0, entry);
        self.system = Some(Value::Array(entries));
        Ok(())
    }
}

pub fn text_block(text: &str) -> Value {
    json!({ "type": "text", "text": text })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let body = json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi", "cache_control": {"type": "ephemeral"}}],
            "max_tokens": 1024,
            "metadata": {"user_id": "u1"},
            "thinking": {"type": "enabled", "budget_tokens": 2048}
        });

        let request: RoutableRequest = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(request.extra["metadata"]["user_id"], "u1");
        assert_eq!(request.messages[0].extra["cache_control"]["type"], "ephemeral");
        assert_eq!(serde_json::to_value(&request).unwrap(), body);
    }

    #[test]
    fn test_string_system_becomes_block() {
        let mut request: RoutableRequest = serde_json::from_value(json!({
            "messages": [],
            "system": "existing"
        }))
        .unwrap();

        request.prepend_system_entry(text_block("first")).unwrap();
        assert_eq!(
            request.system,
            Some(json!([
                {"type": "text", "text": "first"},
                {"type": "text", "text": "existing"}
            ]))
        );
    }

    #[test]
    fn test_malformed_system_is_left_untouched() {
        let mut request: RoutableRequest = serde_json::from_value(json!({
            "messages": [],
            "system": 42
        }))
        .unwrap();

        assert_eq!(
            request.prepend_system_entry(text_block("S")),
            Err(RouteError::MalformedSystem("number"))
        );
        assert_eq!(request.system, Some(json!(42)));
    }

    #[test]
    fn test_user_text_message_shape() {
        let message = serde_json::to_value(Message::user_text("remember")).unwrap();
        assert_eq!(
            message,
            json!({"role": "user", "content": [{"type": "text", "text": "remember"}]})
        );
    }
}
