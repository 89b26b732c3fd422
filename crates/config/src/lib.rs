#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `dtail_config` is the server and client's configuration object: per-user
//! path permissions, the `cats`/`tails` slot-limiter capacities, special-user
//! credentials, and client-side discovery defaults. It is loaded once at
//! startup and treated as immutable thereafter (spec.md §9's global mutable
//! state inventory, item (c)).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use dtail_protocol::error::DtailError;

/// Credentials for one of the special non-interactive users (spec §4.6):
/// `HealthUser`, `ScheduleUser`, `ContinuousUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialUser {
    pub password: String,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Per-user path permission set: a record matches if the requested path
/// matches at least one of `path_regexes` (spec §4.6 step 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserPermissions {
    pub path_regexes: Vec<String>,
}

/// Server- and client-side configuration (spec's ambient configuration
/// mechanism; spec.md §1 excludes config-file *parsing* from the
/// distilled core, but the mechanism itself is ambient scaffolding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SSH bind address, e.g. `"0.0.0.0"`.
    pub bind_address: String,
    /// SSH bind port.
    pub bind_port: u16,
    /// Path to the server's trusted host key(s), if running over SSH.
    pub host_key_path: Option<PathBuf>,
    /// Per-user path permission sets, keyed by username.
    pub permissions: HashMap<String, UserPermissions>,
    /// Special non-interactive users and their credentials.
    pub special_users: HashMap<String, SpecialUser>,
    /// Capacity of the `cats` slot limiter (cat/grep/map+cat).
    pub max_concurrent_cats: usize,
    /// Capacity of the `tails` slot limiter (tail/map+tail).
    pub max_concurrent_tails: usize,
    /// Client-side discovery: global throttle capacity per CPU.
    pub connections_per_cpu: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: dtail_protocol::server_addr::DEFAULT_PORT,
            host_key_path: None,
            permissions: HashMap::new(),
            special_users: HashMap::new(),
            max_concurrent_cats: 10,
            max_concurrent_tails: 10,
            connections_per_cpu: 2,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or returns [`Config::default`] when
    /// `path` is `None` (the `--cfg none` CLI flag, spec §6).
    pub fn load(path: Option<&Path>) -> Result<Self, DtailError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| DtailError::Config(format!("reading '{}': {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| DtailError::Config(format!("parsing '{}': {e}", path.display())))
    }

    /// Returns the permission regex set for `user`, if any is configured.
    #[must_use]
    pub fn permissions_for(&self, user: &str) -> Option<&UserPermissions> {
        self.permissions.get(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_path_returns_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dtail.toml");
        std::fs::write(
            &path,
            r#"
            bind_port = 3322
            max_concurrent_cats = 5

            [permissions.alice]
            path_regexes = ["^/var/log/.*"]
            "#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bind_port, 3322);
        assert_eq!(config.max_concurrent_cats, 5);
        assert_eq!(
            config.permissions_for("alice").unwrap().path_regexes,
            vec!["^/var/log/.*".to_string()]
        );
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::load(Some(Path::new("/nonexistent/dtail.toml"))).unwrap_err();
        assert!(matches!(err, DtailError::Config(_)));
    }
}
