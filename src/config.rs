//! Environment configuration
//!
//! A `.env` file in the working directory is honoured for development.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use reqwest::Url;

use crate::error::ConfigError;
use crate::store::default_backup_dir;
use crate::types::RoomId;

/// Default chat API location
pub const DEFAULT_API_URL: &str = "https://api.hipchat.com";

/// Default command-surface address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: Url,
    pub auth_tokens: Vec<String>,
    pub default_room: Option<RoomId>,
    pub backup_dir: PathBuf,
    pub listen_addr: String,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_vars(env::vars().collect())
    }

    /// Build configuration from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let tokens = get("HIPCHAT_TOKENS").ok_or(ConfigError::Missing("HIPCHAT_TOKENS"))?;
        let auth_tokens: Vec<String> = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if auth_tokens.is_empty() {
            return Err(ConfigError::Invalid {
                key: "HIPCHAT_TOKENS",
                reason: "no token given".to_string(),
            });
        }

        let api_url = get("HIPCHAT_API_URL").unwrap_or(DEFAULT_API_URL);
        let api_url = Url::parse(api_url).map_err(|e| ConfigError::Invalid {
            key: "HIPCHAT_API_URL",
            reason: e.to_string(),
        })?;
        if api_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: "HIPCHAT_API_URL",
                reason: "not a base URL".to_string(),
            });
        }

        Ok(Self {
            api_url,
            auth_tokens,
            default_room: get("DEFAULT_JOIN_ROOM").map(RoomId::from),
            backup_dir: get("BKP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_backup_dir),
            listen_addr: get("LISTEN_ADDR")
                .unwrap_or(DEFAULT_LISTEN_ADDR)
                .to_string(),
        })
    }
}
