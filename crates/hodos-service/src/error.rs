use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to write {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch service process {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Service did not become ready within {0:?}")]
    StartTimeout(Duration),

    #[error("Could not locate the service executable: {0}")]
    Executable(#[source] std::io::Error),
}
