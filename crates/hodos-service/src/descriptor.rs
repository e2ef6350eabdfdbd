//! Startup settings handed from a client invocation to the service it spawns.
//!
//! The descriptor travels in the child's environment, never in argv, so it
//! stays out of process listings.

use hodos_config::paths::HOME_ENV;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

pub const PORT_ENV: &str = "HODOS_SERVICE_PORT";
pub const HOST_ENV: &str = "HODOS_SERVICE_HOST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupDescriptor {
    pub host: Option<String>,
    pub port: u16,
    /// State directory the service must use, so it registers where the
    /// spawning client looks.
    pub state_dir: PathBuf,
}

impl StartupDescriptor {
    pub fn new(port: u16, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: None,
            port,
            state_dir: state_dir.into(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn env_pairs(&self) -> Vec<(&'static str, OsString)> {
        let mut pairs = vec![
            (PORT_ENV, OsString::from(self.port.to_string())),
            (HOME_ENV, self.state_dir.clone().into_os_string()),
        ];
        if let Some(host) = &self.host {
            pairs.push((HOST_ENV, OsString::from(host)));
        }
        pairs
    }

    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in self.env_pairs() {
            cmd.env(key, value);
        }
    }

    /// Port requested by the spawning client, read inside the service.
    pub fn port_override() -> Option<u16> {
        env::var(PORT_ENV).ok()?.trim().parse().ok()
    }

    /// Host requested by the spawning client, read inside the service.
    pub fn host_override() -> Option<String> {
        env::var(HOST_ENV).ok().filter(|h| !h.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_pairs_carry_port_and_state_dir() {
        let descriptor = StartupDescriptor::new(4567, "/tmp/hodos");
        let pairs = descriptor.env_pairs();

        assert!(pairs.contains(&(PORT_ENV, OsString::from("4567"))));
        assert!(pairs.contains(&(HOME_ENV, OsString::from("/tmp/hodos"))));
        assert!(!pairs.iter().any(|(k, _)| *k == HOST_ENV));
    }

    #[test]
    fn test_env_pairs_include_host_when_set() {
        let descriptor = StartupDescriptor::new(4567, "/tmp/hodos").with_host("0.0.0.0");
        assert!(descriptor
            .env_pairs()
            .contains(&(HOST_ENV, OsString::from("0.0.0.0"))));
    }
}
