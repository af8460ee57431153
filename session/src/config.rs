use crate::errors::{SessionError, SessionResult};
use std::path::{Path, PathBuf};

const ENV_CACHE_PROVIDER: &str = "WEB3_SESSION_CACHE_PROVIDER";
const ENV_CACHE_DIR: &str = "WEB3_SESSION_CACHE_DIR";
const ENV_RPC_URL: &str = "WEB3_SESSION_RPC_URL";

const DEFAULT_CACHE_DIR: &str = ".web3-session";
const CACHE_FILE_NAME: &str = "selected-provider.json";

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Remember the chosen provider so `reconnect` can restore it silently.
    pub cache_provider: bool,
    pub cache_dir: PathBuf,
    /// Node endpoint handed to provider options that need one (e.g. a bridge).
    pub rpc_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_provider: true,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            rpc_url: None,
        }
    }
}

impl SessionConfig {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load defaults, then apply overrides from environment variables.
    pub fn from_env() -> SessionResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn with_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.rpc_url = Some(rpc_url.into());
        self
    }

    pub fn with_cache_provider(mut self, enabled: bool) -> Self {
        self.cache_provider = enabled;
        self
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join(CACHE_FILE_NAME)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> SessionResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in [ENV_CACHE_PROVIDER, ENV_CACHE_DIR, ENV_RPC_URL] {
            let Some(value) = lookup(key) else {
                continue;
            };

            if value.trim().is_empty() {
                log::warn!("Environment variable {} is empty", key);
                continue;
            }

            // No newlines or control characters
            if value.chars().any(|c| c.is_control()) {
                log::warn!(
                    "Environment variable {} contains control characters, ignoring",
                    key
                );
                continue;
            }

            match key {
                ENV_CACHE_PROVIDER => self.cache_provider = parse_bool_flag(&value, key)?,
                ENV_CACHE_DIR => self.cache_dir = PathBuf::from(value.trim()),
                ENV_RPC_URL => self.rpc_url = Some(value.trim().to_string()),
                _ => unreachable!("unmapped configuration key"),
            }
            log::debug!("Loaded configuration from environment variable {}", key);
        }

        Ok(())
    }
}

fn parse_bool_flag(value: &str, key: &str) -> SessionResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SessionError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}
