//! Application configuration management.
//!
//! Holds the identity provider connection settings: base URL, realm, client
//! credentials, and the session refresh cadence.
//!
//! Configuration is stored at `~/.config/mantix-auth/config.json` and every
//! field can be overridden through `MANTIX_*` environment variables. The
//! client secret is deliberately never compiled in - it must come from the
//! config file or the environment.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "mantix-auth";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Seconds between proactive refresh attempts.
/// 60s matches the provider's token lifetime comfortably (tokens live ~5 minutes).
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// HTTP request timeout in seconds.
/// Token exchanges are small round trips; 10s fails fast on an unreachable provider.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_realm() -> String {
    "mantix".to_string()
}

fn default_client_id() -> String {
    "mantix-app".to_string()
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_realm")]
    pub realm: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            realm: default_realm(),
            client_id: default_client_id(),
            client_secret: String::new(),
            refresh_interval_secs: default_refresh_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load config from disk, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("MANTIX_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("MANTIX_REALM") {
            self.realm = v;
        }
        if let Ok(v) = std::env::var("MANTIX_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("MANTIX_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Ok(v) = std::env::var("MANTIX_REFRESH_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.refresh_interval_secs = secs;
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Default location for the persisted token pair.
    pub fn token_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join("tokens.json"))
    }

    fn realm_base(&self) -> String {
        format!("{}/realms/{}", self.base_url.trim_end_matches('/'), self.realm)
    }

    /// OpenID Connect token endpoint for all three grant types.
    pub fn token_url(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.realm_base())
    }

    /// OpenID Connect logout endpoint (refresh token revocation).
    pub fn logout_url(&self) -> String {
        format!("{}/protocol/openid-connect/logout", self.realm_base())
    }

    /// Admin REST base for directory operations.
    pub fn admin_base_url(&self) -> String {
        format!(
            "{}/admin/realms/{}",
            self.base_url.trim_end_matches('/'),
            self.realm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_helpers() {
        let config = Config {
            base_url: "https://id.example.com/".to_string(),
            realm: "mantix".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.token_url(),
            "https://id.example.com/realms/mantix/protocol/openid-connect/token"
        );
        assert_eq!(
            config.logout_url(),
            "https://id.example.com/realms/mantix/protocol/openid-connect/logout"
        );
        assert_eq!(
            config.admin_base_url(),
            "https://id.example.com/admin/realms/mantix"
        );
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: Config = serde_json::from_str(r#"{"client_secret": "s3cret"}"#)
            .expect("partial config should parse");
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.realm, "mantix");
        assert_eq!(config.client_id, "mantix-app");
        assert_eq!(config.client_secret, "s3cret");
        assert_eq!(config.refresh_interval_secs, 60);
    }
}
