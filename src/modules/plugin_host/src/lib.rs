//! Discovers plugin executables and bridges them into the component
//! registry as proxy components.

use std::path::{Path, PathBuf};

use monokit_registry::{ComponentDescriptor, EntryPoint, Platform, Registry};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to spawn plugin {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("plugin {0} exited with status {1}: {2}")]
    NonZeroExit(String, i32, String),

    #[error("plugin {0} produced non-UTF-8 output")]
    InvalidOutput(String),
}

#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub install_path: PathBuf,
    pub release_url: String,
}

impl PluginDescriptor {
    /// Installed iff the path exists, is a regular file, has any
    /// executable bit, and does not end in `.bak`/`.tmp` (spec.md §3).
    pub fn is_installed(&self) -> bool {
        let name_ok = !has_extension(&self.install_path, "bak") && !has_extension(&self.install_path, "tmp");
        if !name_ok {
            return false;
        }
        let Ok(metadata) = std::fs::metadata(&self.install_path) else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        {
            true
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Resolves the given descriptors against `plugin_dir`, then scans the
/// directory itself for any further installed executables `known`
/// didn't name, and returns everything that is actually installed.
pub fn discover(plugin_dir: &Path, known: &[PluginDescriptor]) -> Vec<PluginDescriptor> {
    let mut found: Vec<PluginDescriptor> = known
        .iter()
        .cloned()
        .map(|mut d| {
            if d.install_path.as_os_str().is_empty() {
                d.install_path = plugin_dir.join(&d.name);
            }
            d
        })
        .collect();

    if let Ok(entries) = std::fs::read_dir(plugin_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if found.iter().any(|d| d.name == name) {
                continue;
            }
            found.push(PluginDescriptor {
                name: name.to_string(),
                version: String::new(),
                install_path: path,
                release_url: String::new(),
            });
        }
    }

    found.into_iter().filter(|d| d.is_installed()).collect()
}

/// Calls `Collect(hostname)` across the process boundary: launches the
/// plugin binary with `collect <hostname>`, captures stdout as the
/// pre-rendered UI string. Non-zero exit or invalid output is an error,
/// never a panic (spec.md §4.4).
pub async fn collect(plugin: &PluginDescriptor, hostname: &str) -> Result<String, PluginError> {
    let output = tokio::process::Command::new(&plugin.install_path)
        .arg("collect")
        .arg(hostname)
        .output()
        .await
        .map_err(|e| PluginError::Spawn(plugin.name.clone(), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code().unwrap_or(-1);
        error!(plugin = %plugin.name, code, "plugin collect failed");
        return Err(PluginError::NonZeroExit(plugin.name.clone(), code, stderr));
    }

    String::from_utf8(output.stdout).map_err(|_| PluginError::InvalidOutput(plugin.name.clone()))
}

/// Registers one bridge [`ComponentDescriptor`] per discovered plugin so
/// the CLI layer can auto-register it as `<plugin-name>`, distinguished
/// from in-process providers by `is_plugin = true`.
pub fn bridge_into_registry(registry: &Registry, plugins: &[PluginDescriptor]) {
    for plugin in plugins {
        registry.register(ComponentDescriptor {
            name: plugin.name.clone(),
            entry: EntryPoint {
                command: plugin.install_path.to_string_lossy().into_owned(),
                args: vec!["collect".to_string()],
            },
            platform: Platform::Any,
            auto_detect: None,
            run_as_user: None,
            is_plugin: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_executable_file_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myplugin");
        std::fs::write(&path, b"not executable").unwrap();
        let descriptor = PluginDescriptor {
            name: "myplugin".into(),
            version: "1.0.0".into(),
            install_path: path,
            release_url: String::new(),
        };
        assert!(!descriptor.is_installed());
    }

    #[test]
    fn executable_file_is_installed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myplugin");
        std::fs::write(&path, b"binary").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let descriptor = PluginDescriptor {
            name: "myplugin".into(),
            version: "1.0.0".into(),
            install_path: path,
            release_url: String::new(),
        };
        #[cfg(unix)]
        assert!(descriptor.is_installed());
    }

    #[test]
    fn bak_suffixed_file_is_never_installed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("myplugin.bak");
        std::fs::write(&path, b"binary").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let descriptor = PluginDescriptor {
            name: "myplugin".into(),
            version: "1.0.0".into(),
            install_path: path,
            release_url: String::new(),
        };
        assert!(!descriptor.is_installed());
    }

    #[test]
    fn discover_picks_up_executables_not_in_the_known_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auto-found");
        std::fs::write(&path, b"binary").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let plugins = discover(dir.path(), &[]);
        #[cfg(unix)]
        assert!(plugins.iter().any(|p| p.name == "auto-found"));
    }

    #[test]
    fn discover_skips_non_executable_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not a plugin").unwrap();
        let plugins = discover(dir.path(), &[]);
        assert!(plugins.is_empty());
    }

    #[tokio::test]
    async fn collect_on_nonexistent_binary_is_an_error_not_a_panic() {
        let descriptor = PluginDescriptor {
            name: "ghost".into(),
            version: "1.0.0".into(),
            install_path: PathBuf::from("/nonexistent/monokit-plugin-ghost"),
            release_url: String::new(),
        };
        let result = collect(&descriptor, "host1").await;
        assert!(result.is_err());
    }
}
