//! Loads monokit's YAML configuration files by logical name from a fixed
//! search path, expanding `${VAR}`-style environment references before
//! parsing.
//!
//! Logical names used across the agent: `global`, `daemon`, `client`,
//! `os`, `db`, `k8s`, plus one per component. Each resolves to
//! `<search-dir>/<name>.yml` or `<name>.yaml`, first match wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_DIR: &str = "/etc/mono";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config '{0}' not found under {1}")]
    NotFound(String, String),

    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("failed to parse YAML in {0}: {1}")]
    Parse(PathBuf, serde_yaml::Error),
}

/// Where to look for `<name>.yml`/`<name>.yaml` files.
///
/// Overridable via `MONOKIT_CONFIG_DIR` so tests and packaging don't need
/// to touch `/etc`.
pub fn search_dir() -> PathBuf {
    std::env::var("MONOKIT_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn candidate_paths(dir: &Path, logical_name: &str) -> [PathBuf; 2] {
    [
        dir.join(format!("{logical_name}.yml")),
        dir.join(format!("{logical_name}.yaml")),
    ]
}

/// True iff a config file for `logical_name` exists in the search path.
///
/// Selection (spec §4.3) branches on whether the `daemon` config exists at
/// all, independent of whether it parses - so this is a plain existence
/// check, not a load-and-validate.
pub fn exists(logical_name: &str) -> bool {
    candidate_paths(&search_dir(), logical_name)
        .iter()
        .any(|p| p.is_file())
}

/// Loads and deserializes the config named `logical_name`, or returns
/// `T::default()` if no file exists for that name.
///
/// `${VAR}` references in the raw file are expanded against the process
/// environment before YAML parsing.
pub fn load_or_default<T>(logical_name: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let dir = search_dir();
    for path in candidate_paths(&dir, logical_name) {
        if path.is_file() {
            return load_path(&path);
        }
    }
    debug!(logical_name, "no config file found, using defaults");
    Ok(T::default())
}

/// Like [`load_or_default`], but a missing file is a hard error. Use for
/// required configs (e.g. `client` when remote reporting is enabled).
pub fn load_required<T>(logical_name: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    let dir = search_dir();
    for path in candidate_paths(&dir, logical_name) {
        if path.is_file() {
            return load_path_required(&path);
        }
    }
    Err(ConfigError::NotFound(
        logical_name.to_string(),
        dir.display().to_string(),
    ))
}

fn load_path<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T, ConfigError> {
    load_path_required(path)
}

fn load_path_required<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let expanded = shellexpand::env(&raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "env expansion failed, using raw text");
            raw
        });
    serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

// --- Well-known logical configs ---

/// `global.yml` — settings shared across every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub identifier: Option<String>,
    pub log_level: String,
    /// Webhook URLs the alarm engine fans out to (spec.md §4.1).
    pub alarm_webhooks: Vec<String>,
    /// Directory plugin executables are discovered in and installed to.
    pub plugin_dir: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            identifier: None,
            log_level: "info".to_string(),
            alarm_webhooks: Vec::new(),
            plugin_dir: "/var/lib/monokit/plugins".to_string(),
        }
    }
}

/// `client.yml` — remote reporting endpoint and credentials paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: Option<String>,
    pub identifier: Option<String>,
    /// Root under which `api/hostkey/<identifier>` is stored.
    pub state_dir: String,
    /// Ticket API base URL and key, when issue tracking is enabled.
    pub redmine_url: Option<String>,
    pub redmine_api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            identifier: None,
            state_dir: "/var/lib/mono".to_string(),
            redmine_url: None,
            redmine_api_key: None,
        }
    }
}

impl ClientConfig {
    /// A fully configured client: URL and identifier both present.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.identifier.is_some()
    }
}

/// `daemon.yml` — per-component enable/disable overrides and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub frequency_seconds: u64,
    pub components: HashMap<String, ComponentOverride>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            frequency_seconds: 60,
            components: HashMap::new(),
        }
    }
}

impl DaemonConfig {
    pub fn is_disabled(&self, name: &str) -> bool {
        self.components
            .get(name)
            .map(|c| c.enabled == Some(false))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ComponentOverride {
    pub enabled: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_config_dir<F: FnOnce(&Path)>(f: F) {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("MONOKIT_CONFIG_DIR", dir.path());
        f(dir.path());
        std::env::remove_var("MONOKIT_CONFIG_DIR");
    }

    #[test]
    fn missing_daemon_config_is_not_an_error() {
        with_config_dir(|_dir| {
            assert!(!exists("daemon"));
            let cfg: DaemonConfig = load_or_default("daemon").unwrap();
            assert_eq!(cfg.frequency_seconds, 60);
        });
    }

    #[test]
    fn env_vars_expand_before_parsing() {
        with_config_dir(|dir| {
            std::env::set_var("MONOKIT_TEST_IDENTIFIER", "host-1");
            let mut f = std::fs::File::create(dir.join("global.yml")).unwrap();
            writeln!(f, "identifier: \"${{MONOKIT_TEST_IDENTIFIER}}\"").unwrap();
            writeln!(f, "log_level: debug").unwrap();
            let cfg: GlobalConfig = load_or_default("global").unwrap();
            assert_eq!(cfg.identifier.as_deref(), Some("host-1"));
            assert_eq!(cfg.log_level, "debug");
            std::env::remove_var("MONOKIT_TEST_IDENTIFIER");
        });
    }

    #[test]
    fn required_config_missing_is_an_error() {
        with_config_dir(|_dir| {
            let res: Result<ClientConfig, _> = load_required("client");
            assert!(matches!(res, Err(ConfigError::NotFound(_, _))));
        });
    }

    #[test]
    fn daemon_disabled_lookup() {
        let mut cfg = DaemonConfig::default();
        cfg.components.insert(
            "k8sHealth".to_string(),
            ComponentOverride { enabled: Some(false) },
        );
        assert!(cfg.is_disabled("k8sHealth"));
        assert!(!cfg.is_disabled("osHealth"));
    }
}
