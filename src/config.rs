use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc, time::Duration};

use crate::auth::{Authenticator, BasicAuth, NoAuth};
use crate::relay::CONN_MAX_DURATION;
use crate::server::DEFAULT_SHUTDOWN_GRACE;

pub const DEFAULT_LISTEN_IP: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 3000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen: ListenConfig,
    pub auth: Option<AuthConfig>,
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub max_connections: Option<usize>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ip: DEFAULT_LISTEN_IP.to_string(),
            port: DEFAULT_LISTEN_PORT,
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_duration_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: CONN_MAX_DURATION.as_secs(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config as valid TOML")
    }

    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen.ip, self.listen.port)
    }

    /// Basic auth when a username or password is set, pass-through otherwise.
    #[must_use]
    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        match &self.auth {
            Some(auth) if !auth.username.is_empty() || !auth.password.is_empty() => {
                Arc::new(BasicAuth::new(&auth.username, &auth.password))
            }
            _ => Arc::new(NoAuth),
        }
    }

    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        self.auth
            .as_ref()
            .is_some_and(|a| !a.username.is_empty() || !a.password.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    Config::from_toml(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}
