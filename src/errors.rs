use std::path::PathBuf;

use thiserror::Error;

/// Public error taxonomy from spec.md §7. Internal call chains use
/// `anyhow::Result` with `.context(...)`; this type is only constructed
/// at public API boundaries (library-to-orchestrator, library-to-CLI).
#[derive(Debug, Error)]
pub enum MonokitError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote request failed: {0}")]
    Remote(String),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, String),

    #[error("{0}")]
    Policy(String),

    #[error("resource unavailable: {0}")]
    Resource(String),
}

impl From<monokit_config::ConfigError> for MonokitError {
    fn from(e: monokit_config::ConfigError) -> Self {
        MonokitError::Configuration(e.to_string())
    }
}

impl From<monokit_process_guard::GuardError> for MonokitError {
    fn from(e: monokit_process_guard::GuardError) -> Self {
        match e {
            monokit_process_guard::GuardError::AlreadyRunning(pid) => {
                MonokitError::Resource(format!("another daemon is already running (pid {pid})"))
            }
            other => MonokitError::Resource(other.to_string()),
        }
    }
}

impl From<monokit_kv::KvError> for MonokitError {
    fn from(e: monokit_kv::KvError) -> Self {
        MonokitError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl From<monokit_alarm::AlarmError> for MonokitError {
    fn from(e: monokit_alarm::AlarmError) -> Self {
        MonokitError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl From<monokit_issue::IssueError> for MonokitError {
    fn from(e: monokit_issue::IssueError) -> Self {
        MonokitError::Remote(e.to_string())
    }
}

impl From<monokit_remote::RemoteError> for MonokitError {
    fn from(e: monokit_remote::RemoteError) -> Self {
        MonokitError::Remote(e.to_string())
    }
}

impl From<monokit_updater::UpdaterError> for MonokitError {
    fn from(e: monokit_updater::UpdaterError) -> Self {
        match e {
            monokit_updater::UpdaterError::CrossMajorVersionRequiresForce { current, target } => {
                MonokitError::Policy(format!(
                    "refusing to update from {current} to {target} without --force"
                ))
            }
            other => MonokitError::Remote(other.to_string()),
        }
    }
}

impl From<monokit_plugin::PluginError> for MonokitError {
    fn from(e: monokit_plugin::PluginError) -> Self {
        MonokitError::Resource(e.to_string())
    }
}
