//! Logging setup shared by the CLI and the background service.

mod subscriber;

pub use subscriber::{init_file_subscriber, init_subscriber, TelemetryConfig};
