//! Configuration for the hodos routing proxy.
//!
//! Everything hodos persists lives under one state directory (see
//! [`HodosPaths`]): the config file, the service marker, the session
//! reference count and the log files.

pub mod error;
pub mod loader;
pub mod paths;
pub mod schema;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_file, ConfigFormat, ResolvedConfig};
pub use paths::HodosPaths;
pub use schema::{
    AuditSettings, BindHost, CodeSettings, HodosConfig, LogSettings, ProviderConfig,
    RouterSettings, RoutingConfig, ServiceSettings, DEFAULT_PORT, LOOPBACK_HOST,
};
