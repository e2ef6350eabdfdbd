//! Configuration schema.
//!
//! Keys are snake_case; the upper-case spellings used by older config files
//! (`HOST`, `PORT`, `APIKEY`, `Providers`, `Router`, ...) are accepted as
//! aliases.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 3456;
pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_TIMEOUT_MS: u64 = 600_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HodosConfig {
    #[serde(default, alias = "HOST")]
    pub host: Option<String>,

    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,

    /// When set, the service requires this key on every routed request.
    #[serde(default, alias = "APIKEY")]
    pub api_key: Option<String>,

    #[serde(default, alias = "Providers")]
    pub providers: Vec<ProviderConfig>,

    #[serde(default, alias = "Router")]
    pub router: RouterSettings,

    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub code: CodeSettings,

    #[serde(default)]
    pub audit: AuditSettings,

    #[serde(default)]
    pub log: LogSettings,

    // Top-level keys from older configs, folded into their sections by `normalize`.
    #[serde(default, rename = "SYSTEM_PROMPT", skip_serializing)]
    legacy_system_prompt: Option<String>,
    #[serde(default, rename = "NODE_PATH", skip_serializing)]
    legacy_executable: Option<PathBuf>,
    #[serde(default, rename = "API_TIMEOUT_MS", skip_serializing)]
    legacy_api_timeout_ms: Option<u64>,
    #[serde(default, rename = "ANTHROPIC_SMALL_FAST_MODEL", skip_serializing)]
    legacy_small_fast_model: Option<String>,
}

impl Default for HodosConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            api_key: None,
            providers: Vec::new(),
            router: RouterSettings::default(),
            service: ServiceSettings::default(),
            code: CodeSettings::default(),
            audit: AuditSettings::default(),
            log: LogSettings::default(),
            legacy_system_prompt: None,
            legacy_executable: None,
            legacy_api_timeout_ms: None,
            legacy_small_fast_model: None,
        }
    }
}

/// An upstream serving endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Model every routed request is sent to, as `provider,model`.
    #[serde(default)]
    pub default: String,

    #[serde(default, alias = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// Trailing user turn appended after the conversation.
    #[serde(default)]
    pub reminder: Option<String>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Executable launched for the background service. Defaults to the
    /// running `hodos` binary.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Stop the service once the last `code` session ends.
    #[serde(default = "default_true")]
    pub stop_when_idle: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            executable: None,
            stop_when_idle: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSettings {
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,

    #[serde(default)]
    pub small_fast_model: Option<String>,
}

impl Default for CodeSettings {
    fn default() -> Self {
        Self {
            command: None,
            api_timeout_ms: DEFAULT_API_TIMEOUT_MS,
            small_fast_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub json_output: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_output: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_api_timeout_ms() -> u64 {
    DEFAULT_API_TIMEOUT_MS
}

fn default_level() -> String {
    "info".to_string()
}

/// The slice of configuration the request router reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingConfig {
    pub default_model: String,
    pub system_prompt: Option<String>,
    pub reminder: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl RoutingConfig {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            system_prompt: None,
            reminder: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Listening address decided from `host` and `api_key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindHost {
    pub host: String,
    /// A configured host was refused because no API key is set.
    pub forced_loopback: bool,
}

impl HodosConfig {
    /// Fold legacy top-level keys into their sections. Section values win.
    pub fn normalize(mut self) -> Self {
        if self.router.system_prompt.is_none() {
            self.router.system_prompt = self.legacy_system_prompt.take();
        }
        if self.service.executable.is_none() {
            self.service.executable = self.legacy_executable.take();
        }
        if let Some(timeout) = self.legacy_api_timeout_ms.take() {
            if self.code.api_timeout_ms == DEFAULT_API_TIMEOUT_MS {
                self.code.api_timeout_ms = timeout;
            }
        }
        if self.code.small_fast_model.is_none() {
            self.code.small_fast_model = self.legacy_small_fast_model.take();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.default.trim().is_empty() {
            return Err(ConfigError::MissingDefaultModel);
        }
        Ok(())
    }

    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            default_model: self.router.default.clone(),
            system_prompt: self.router.system_prompt.clone(),
            reminder: self.router.reminder.clone(),
            max_tokens: self.router.max_tokens,
            temperature: self.router.temperature,
        }
    }

    /// Binding beyond loopback requires an API key.
    pub fn bind_host(&self) -> BindHost {
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.is_empty());
        match self.host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) if has_key => BindHost {
                host: host.to_string(),
                forced_loopback: false,
            },
            Some(host) => BindHost {
                host: LOOPBACK_HOST.to_string(),
                forced_loopback: host != LOOPBACK_HOST,
            },
            None => BindHost {
                host: LOOPBACK_HOST.to_string(),
                forced_loopback: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_host_requires_api_key() {
        let mut config = HodosConfig {
            host: Some("0.0.0.0".to_string()),
            ..Default::default()
        };
        let bind = config.bind_host();
        assert_eq!(bind.host, LOOPBACK_HOST);
        assert!(bind.forced_loopback);

        config.api_key = Some("secret".to_string());
        let bind = config.bind_host();
        assert_eq!(bind.host, "0.0.0.0");
        assert!(!bind.forced_loopback);
    }

    #[test]
    fn test_bind_host_defaults_to_loopback() {
        let config = HodosConfig::default();
        assert_eq!(
            config.bind_host(),
            BindHost {
                host: LOOPBACK_HOST.to_string(),
                forced_loopback: false
            }
        );
    }

    #[test]
    fn test_legacy_keys_are_folded() {
        let json = r#"{
            "PORT": 4000,
            "APIKEY": "k",
            "SYSTEM_PROMPT": "be brief",
            "NODE_PATH": "/opt/hodos/bin/hodos",
            "API_TIMEOUT_MS": 1000,
            "Router": { "default": "openrouter,anthropic/claude-sonnet-4" }
        }"#;
        let config: HodosConfig = serde_json::from_str::<HodosConfig>(json).unwrap().normalize();

        assert_eq!(config.port, 4000);
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.router.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(
            config.service.executable,
            Some(PathBuf::from("/opt/hodos/bin/hodos"))
        );
        assert_eq!(config.code.api_timeout_ms, 1000);
        assert_eq!(config.router.default, "openrouter,anthropic/claude-sonnet-4");
    }

    #[test]
    fn test_validate_rejects_missing_default_model() {
        let config = HodosConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingDefaultModel)
        ));
    }

    #[test]
    fn test_routing_projection() {
        let mut config = HodosConfig::default();
        config.router.default = "p,m1".to_string();
        config.router.max_tokens = Some(8192);

        let routing = config.routing();
        assert_eq!(routing.default_model, "p,m1");
        assert_eq!(routing.max_tokens, Some(8192));
        assert!(routing.system_prompt.is_none());
    }
}
