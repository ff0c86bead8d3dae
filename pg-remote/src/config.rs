//! Connection configuration
//!
//! Read from a YAML file named by `PG_REMOTE_CONFIG`, or from environment variables.

use anyhow::{Context, Result};
use common::ConfigExt;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SUPERUSER: &str = "postgres";
pub const DEFAULT_SUPERUSER_HOME: &str = "/var/lib/postgresql";
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Configuration for reaching the database server
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Login user; falls back to `$USER`, then `root`.
    pub user: Option<String>,
    pub identity_file: Option<String>,
    pub identity_passphrase: Option<SecretString>,
    pub password: Option<SecretString>,
    /// Trust hosts missing from `~/.ssh/known_hosts`. A changed key is always rejected.
    pub accept_unknown_hosts: bool,
    pub superuser: String,
    pub superuser_home: String,
    /// Seconds ssh waits for the TCP connection.
    pub connect_timeout: u64,
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            user: None,
            identity_file: None,
            identity_passphrase: None,
            password: None,
            accept_unknown_hosts: false,
            superuser: DEFAULT_SUPERUSER.to_string(),
            superuser_home: DEFAULT_SUPERUSER_HOME.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load from `PG_REMOTE_CONFIG` if set, otherwise from the environment.
    pub fn load() -> Result<Self> {
        match String::env_opt("PG_REMOTE_CONFIG") {
            Some(path) => Self::from_file(&path),
            None => Self::from_env(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let host = String::env_required("PG_REMOTE_HOST")?;

        Ok(Self {
            host,
            port: u16::env_parse("PG_REMOTE_PORT", DEFAULT_SSH_PORT),
            user: String::env_opt("PG_REMOTE_USER"),
            identity_file: String::env_opt("PG_REMOTE_IDENTITY"),
            identity_passphrase: String::env_opt("PG_REMOTE_IDENTITY_PASSPHRASE")
                .map(SecretString::new),
            password: String::env_opt("PG_REMOTE_SSH_PASSWORD").map(SecretString::new),
            accept_unknown_hosts: bool::env_bool("PG_REMOTE_ACCEPT_UNKNOWN_HOSTS", false),
            superuser: String::env_or("PG_REMOTE_SUPERUSER", DEFAULT_SUPERUSER),
            superuser_home: String::env_or("PG_REMOTE_SUPERUSER_HOME", DEFAULT_SUPERUSER_HOME),
            connect_timeout: u64::env_parse("PG_REMOTE_CONNECT_TIMEOUT", DEFAULT_CONNECT_TIMEOUT),
            dry_run: bool::env_bool("PG_REMOTE_DRY_RUN", false),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).context(format!("Failed to parse config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context("Invalid YAML")?;
        if config.host.is_empty() {
            anyhow::bail!("host must be set");
        }
        Ok(config)
    }

    /// SSH login user.
    pub fn login_user(&self) -> String {
        self.user
            .clone()
            .or_else(|| String::env_opt("USER"))
            .unwrap_or_else(|| "root".to_string())
    }
}
