//! The hodos service: a local proxy in front of an LLM-serving backend.
//!
//! Every `POST /v1/messages` request goes through two stages before and
//! after the backend:
//! - [`router::Router`] rewrites the request body from configuration
//!   (system prompt, trailing reminder, model, generation parameters);
//! - [`audit::Auditor`] records the routed request and the response, chunk
//!   by chunk for streams, under one correlation id.
//!
//! The backend itself sits behind the [`backend::Backend`] trait.

pub mod audit;
pub mod auth;
pub mod backend;
pub mod router;
pub mod server;
pub mod testing;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditWriter, Auditor, JsonlSink};
pub use backend::{
    Backend, BackendBody, BackendError, BackendResponse, ForwardHeaders, HttpBackend,
};
pub use router::{RouteError, RouteReport, Router};
pub use server::{configure, serve, AppState, ServeOptions};
pub use types::{Message, Role, RoutableRequest};
