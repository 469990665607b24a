//! Configuration: TOML file plus command-line overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProxyError, ProxyResult};

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3128
}

fn default_socks_port() -> u16 {
    8010
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_dial_timeout_secs() -> u64 {
    30
}

fn default_adblock_hosts_url() -> String {
    crate::adblock::DEFAULT_HOSTS_URL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_socks_port")]
    pub socks_port: u16,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
    pub pac: PacConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub adblock: AdblockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacConfig {
    /// URL the PAC script is fetched from, required.
    pub url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdblockConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_adblock_hosts_url")]
    pub hosts_url: String,
}

impl Default for AdblockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts_url: default_adblock_hosts_url(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ProxyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            ProxyError::config(format!("failed to parse config file {}: {e}", path.display()))
        })?;
        config.validate()?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Minimal configuration built from command-line arguments alone.
    pub fn from_pac_url(url: impl Into<String>) -> Self {
        Self {
            listen_host: default_listen_host(),
            http_port: default_http_port(),
            socks_port: default_socks_port(),
            dial_timeout_secs: default_dial_timeout_secs(),
            pac: PacConfig {
                url: url.into(),
                cache_ttl_secs: default_cache_ttl_secs(),
            },
            auth: AuthConfig::default(),
            adblock: AdblockConfig::default(),
        }
    }

    pub fn validate(&self) -> ProxyResult<()> {
        if self.pac.url.is_empty() {
            return Err(ProxyError::config("pac.url must be set"));
        }
        if self.pac.cache_ttl_secs == 0 {
            return Err(ProxyError::config("pac.cache_ttl_secs must be positive"));
        }
        if self.dial_timeout_secs == 0 {
            return Err(ProxyError::config("dial_timeout_secs must be positive"));
        }
        if self.http_port == self.socks_port {
            return Err(ProxyError::config(
                "http_port and socks_port must be distinct",
            ));
        }
        if self.auth.username.is_empty() != self.auth.password.is_empty() {
            return Err(ProxyError::config(
                "auth.username and auth.password must be set together",
            ));
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.http_port)
    }

    pub fn socks_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.socks_port)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pac.cache_ttl_secs)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn auth_credentials(&self) -> Option<(&str, &str)> {
        if self.auth.username.is_empty() {
            None
        } else {
            Some((&self.auth.username, &self.auth.password))
        }
    }
}
