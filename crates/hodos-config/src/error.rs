use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration file found in {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unknown config format for: {0}")]
    UnknownFormat(PathBuf),

    #[error("Router.default is not set; a default model is required for routing")]
    MissingDefaultModel,

    #[error("Could not determine the home directory; set HODOS_HOME")]
    NoHomeDir,
}
