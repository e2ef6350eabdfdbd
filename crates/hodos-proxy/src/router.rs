//! Config-driven rewriting of a request before it reaches the backend.
//!
//! Steps, always in this order:
//! 1. prepend the configured system prompt to the system sequence;
//! 2. append the configured reminder as a trailing user turn;
//! 3. replace the model with the configured default;
//! 4. overwrite `max_tokens` and `temperature` with configured values.
//!
//! Steps 1-2 may fail on a malformed body. The failure is logged and steps
//! 3-4 still run: a request is never rejected because augmentation failed.
//! Steps 3-4 discard whatever the client asked for. Routing is decided by
//! configuration only; message content is never inspected.

use crate::types::{text_block, Message, RoutableRequest};
use hodos_config::RoutingConfig;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("system prompt must be a string or an array, got {0}")]
    MalformedSystem(&'static str),
}

/// What routing did to one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteReport {
    pub system_prompt_injected: bool,
    pub reminder_appended: bool,
    pub original_model: String,
    pub model: String,
    pub error: Option<RouteError>,
}

#[derive(Debug, Clone)]
pub struct Router {
    config: RoutingConfig,
}

impl Router {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn route(&self, request: &mut RoutableRequest) -> RouteReport {
        let mut report = RouteReport::default();

        if let Err(e) = self.augment(request, &mut report) {
            tracing::warn!(error = %e, "request augmentation failed, forwarding with overrides only");
            report.error = Some(e);
        }

        report.original_model =
            std::mem::replace(&mut request.model, self.config.default_model.clone());
        report.model = request.model.clone();

        if let Some(max_tokens) = self.config.max_tokens {
            request.max_tokens = Some(max_tokens);
        }
        if let Some(temperature) = self.config.temperature {
            request.temperature = Some(temperature);
        }

        report
    }

    fn augment(
        &self,
        request: &mut RoutableRequest,
        report: &mut RouteReport,
    ) -> Result<(), RouteError> {
        if let Some(prompt) = self.config.system_prompt.as_deref() {
            request.prepend_system_entry(text_block(prompt))?;
            report.system_prompt_injected = true;
        }

        if let Some(reminder) = self.config.reminder.as_deref() {
            request.messages.push(Message::user_text(reminder));
            report.reminder_appended = true;
        }

        Ok(())
    }
}
