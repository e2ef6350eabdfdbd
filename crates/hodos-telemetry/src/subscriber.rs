use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_output: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

fn report_init(result: Result<(), tracing_subscriber::util::TryInitError>) {
    // Tests and embedders may already have a subscriber; that one keeps logging.
    if let Err(e) = result {
        tracing::debug!(error = %e, "global subscriber already installed");
    }
}

/// Log to stderr. `RUST_LOG` overrides the configured level.
pub fn init_subscriber(config: &TelemetryConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = if config.json_output {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(io::stderr))
            .try_init()
    };
    report_init(result);
}

/// Log to `path` through a background writer. Used by the detached
/// service, which has no terminal attached.
///
/// Lines are buffered until written out; keep the returned guard alive for
/// as long as the service runs and drop it last.
pub fn init_file_subscriber(config: &TelemetryConfig, path: &Path) -> io::Result<WorkerGuard> {
    let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
    let registry = tracing_subscriber::registry().with(env_filter(config));

    let result = if config.json_output {
        registry
            .with(fmt::layer().json().with_ansi(false).with_writer(writer))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .try_init()
    };
    report_init(result);

    Ok(guard)
}

/// Append-only appender for exactly `path`; never rotated.
fn file_appender(path: &Path) -> io::Result<RollingFileAppender> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid log file path: {}", path.display()),
            )
        })?;

    fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(dir)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json_output);
    }

    #[test]
    fn test_file_appender_creates_parent_and_keeps_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("service.log");

        let mut appender = file_appender(&path).unwrap();
        appender.write_all(b"first line\n").unwrap();
        appender.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first line\n");
    }

    #[test]
    fn test_file_appender_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        fs::write(&path, "earlier\n").unwrap();

        let mut appender = file_appender(&path).unwrap();
        appender.write_all(b"later\n").unwrap();
        appender.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn test_file_appender_rejects_bare_root() {
        assert!(file_appender(Path::new("/")).is_err());
    }
}
