use crate::error::ConfigError;
use crate::paths::HodosPaths;
use crate::schema::HodosConfig;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Jsonc,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;

        match ext {
            "json" => Some(Self::Json),
            "jsonc" => Some(Self::Jsonc),
            "yml" | "yaml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: HodosConfig,
    pub path: PathBuf,
    pub format: ConfigFormat,
}

/// Load and validate the config file found in the state directory.
pub fn load_config(paths: &HodosPaths) -> Result<ResolvedConfig, ConfigError> {
    let path = paths
        .find_config_file()
        .ok_or_else(|| ConfigError::NotFound(paths.home().to_path_buf()))?;

    load_config_from_file(&path)
}

pub fn load_config_from_file(path: &Path) -> Result<ResolvedConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnknownFormat(path.to_path_buf()))?;

    let config = parse_config_content(&content, format).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;

    let config = expand_env_vars(config.normalize());
    config.validate()?;

    tracing::debug!(path = %path.display(), ?format, "loaded config");

    Ok(ResolvedConfig {
        config,
        path: path.to_path_buf(),
        format,
    })
}

// JSON files go through json5 as well: comments and trailing commas are common
// in hand-edited configs.
fn parse_config_content(content: &str, format: ConfigFormat) -> Result<HodosConfig, String> {
    match format {
        ConfigFormat::Json | ConfigFormat::Jsonc => {
            json5::from_str(content).map_err(|e| e.to_string())
        }
        ConfigFormat::Yaml => serde_yaml_ng::from_str(content).map_err(|e| e.to_string()),
    }
}

fn expand_env_vars(mut config: HodosConfig) -> HodosConfig {
    config.host = config.host.map(|h| expand_env_string(&h));
    config.api_key = config.api_key.map(|k| expand_env_string(&k));
    for provider in config.providers.iter_mut() {
        provider.api_base_url = expand_env_string(&provider.api_base_url);
        provider.api_key = provider.api_key.as_deref().map(expand_env_string);
    }
    config
}

/// Expand `${VAR}` and `$VAR`. Unknown variables are left as written.
fn expand_env_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            match env::var(&name) {
                Ok(value) if closed => result.push_str(&value),
                _ => {
                    // Unterminated references are kept verbatim.
                    result.push_str("${");
                    result.push_str(&name);
                    if closed {
                        result.push('}');
                    }
                }
            }
            continue;
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        match env::var(&name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => {
                result.push('$');
                result.push_str(&name);
            }
        }
    }

    result
}
