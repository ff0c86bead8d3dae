//! Environment variable parsing helpers
//!
//! Provides ergonomic helpers for reading configuration from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Extension trait for parsing environment variables.
///
/// Provides convenient methods for reading env vars with defaults, required values,
/// and type parsing.
pub trait ConfigExt {
    /// Get an environment variable with a default value.
    ///
    /// # Example
    /// ```ignore
    /// let superuser = String::env_or("PG_REMOTE_SUPERUSER", "postgres");
    /// ```
    fn env_or(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    /// Get a required environment variable, returning an error if not set.
    ///
    /// # Example
    /// ```ignore
    /// let host = String::env_required("PG_REMOTE_HOST")?;
    /// ```
    fn env_required(name: &str) -> Result<String> {
        env::var(name).context(format!("{} must be set", name))
    }

    /// Get an optional environment variable. Empty values count as unset.
    fn env_opt(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }

    /// Get an environment variable as a boolean.
    ///
    /// Returns `true` for "true" or "1" (case-insensitive), `false` for any other
    /// value, and `default` when unset.
    fn env_bool(name: &str, default: bool) -> bool {
        env::var(name)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
            .unwrap_or(default)
    }

    /// Get an environment variable parsed as a specific type.
    ///
    /// Returns `default` if the variable is not set or fails to parse.
    ///
    /// # Example
    /// ```ignore
    /// let port: u16 = u16::env_parse("PG_REMOTE_PORT", 22);
    /// ```
    fn env_parse<T: FromStr>(name: &str, default: T) -> T {
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

// Blanket implementation for all types
impl<T> ConfigExt for T {}
