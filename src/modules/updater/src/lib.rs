//! Self-update and plugin-set update: release discovery, asset
//! selection, download/extract, and atomic binary swap with backup.

use std::path::{Path, PathBuf};

use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("release lookup failed: {0}")]
    Api(String),

    #[error("no release asset matches os={0} arch={1}")]
    NoMatchingAsset(String, String),

    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("extraction failed: {0}")]
    Extract(String),

    #[error(
        "update from {current} to {target} crosses a major version; pass force=true to proceed"
    )]
    CrossMajorVersionRequiresForce { current: String, target: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// Fetches the latest release, or the release tagged `version` if given.
pub async fn fetch_release(
    client: &reqwest::Client,
    releases_api_base: &str,
    version: Option<&str>,
) -> Result<Release, UpdaterError> {
    let url = match version {
        Some(tag) => format!("{releases_api_base}/tags/{tag}"),
        None => format!("{releases_api_base}/latest"),
    };
    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| UpdaterError::Api(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(UpdaterError::Api(format!("HTTP {} for {url}", resp.status())));
    }
    resp.json()
        .await
        .map_err(|e| UpdaterError::Api(e.to_string()))
}

/// Picks the asset whose name contains both `os` and `arch`.
pub fn pick_asset<'a>(assets: &'a [ReleaseAsset], os: &str, arch: &str) -> Option<&'a ReleaseAsset> {
    assets
        .iter()
        .find(|a| a.name.contains(os) && a.name.contains(arch))
}

fn major_version(v: &str) -> Option<u64> {
    v.trim_start_matches('v').split('.').next()?.parse().ok()
}

/// Aborts cross-major-version updates unless `force` is set (spec.md §4.7).
pub fn guard_cross_major(current: &str, target: &str, force: bool) -> Result<(), UpdaterError> {
    let (Some(cur_major), Some(tgt_major)) = (major_version(current), major_version(target)) else {
        return Ok(());
    };
    if cur_major != tgt_major && !force {
        return Err(UpdaterError::CrossMajorVersionRequiresForce {
            current: current.to_string(),
            target: target.to_string(),
        });
    }
    Ok(())
}

/// Downloads `url`, gunzips+untars it into `dest_dir`, and returns the
/// path to the single extracted file (the teacher's release assets are
/// one-binary-per-archive tarballs).
pub async fn download_and_extract(
    client: &reqwest::Client,
    url: &str,
    dest_dir: &Path,
) -> Result<PathBuf, UpdaterError> {
    let bytes = client
        .get(url)
        .send()
        .await
        .map_err(|e| UpdaterError::Api(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| UpdaterError::Api(e.to_string()))?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| UpdaterError::Io(dest_dir.to_path_buf(), e))?;

    let dest_dir = dest_dir.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || extract_tar_gz(&bytes, &dest_dir))
        .await
        .map_err(|e| UpdaterError::Extract(e.to_string()))?
}

fn extract_tar_gz(bytes: &[u8], dest_dir: &Path) -> Result<PathBuf, UpdaterError> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    let mut extracted = None;
    for entry in archive.entries().map_err(|e| UpdaterError::Extract(e.to_string()))? {
        let mut entry = entry.map_err(|e| UpdaterError::Extract(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| UpdaterError::Extract(e.to_string()))?
            .to_path_buf();
        let out_path = dest_dir.join(&path);
        entry
            .unpack(&out_path)
            .map_err(|e| UpdaterError::Extract(e.to_string()))?;
        if entry.header().entry_type().is_file() {
            extracted = Some(out_path);
        }
    }
    extracted.ok_or_else(|| UpdaterError::Extract("archive contained no file entries".into()))
}

/// Backup -> rename-into-place -> chmod sequence from spec.md §4.7.
/// Restores the backup on failure so the on-disk executable is never
/// left truncated or missing.
pub async fn atomic_swap(current_exe: &Path, new_binary: &Path) -> Result<(), UpdaterError> {
    let backup = current_exe.with_extension("bak");

    tokio::fs::rename(current_exe, &backup)
        .await
        .map_err(|e| UpdaterError::Io(current_exe.to_path_buf(), e))?;

    if let Err(e) = tokio::fs::rename(new_binary, current_exe).await {
        warn!(error = %e, "swap failed, restoring backup");
        tokio::fs::rename(&backup, current_exe)
            .await
            .map_err(|e2| UpdaterError::Io(current_exe.to_path_buf(), e2))?;
        return Err(UpdaterError::Io(current_exe.to_path_buf(), e));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        std::fs::set_permissions(current_exe, perms)
            .map_err(|e| UpdaterError::Io(current_exe.to_path_buf(), e))?;
    }

    let _ = tokio::fs::remove_file(&backup).await;
    info!(path = %current_exe.display(), "binary updated");
    Ok(())
}

/// Downloads and swaps every plugin in `names` whose asset is found,
/// running all downloads concurrently. Each plugin follows the same
/// tmp -> backup -> swap -> cleanup dance as the main binary.
pub async fn update_plugins(
    client: &reqwest::Client,
    assets: &[ReleaseAsset],
    names: &[String],
    version: &str,
    os: &str,
    arch: &str,
    plugin_dir: &Path,
) -> Vec<(String, Result<(), UpdaterError>)> {
    let tasks = names.iter().map(|name| {
        let expected = format!("monokit_{name}_{version}_{os}_{arch}.tar.gz");
        let asset = assets.iter().find(|a| a.name == expected).cloned();
        let client = client.clone();
        let plugin_dir = plugin_dir.to_path_buf();
        let name = name.clone();
        async move {
            let Some(asset) = asset else {
                return (name.clone(), Err(UpdaterError::NoMatchingAsset(os.to_string(), arch.to_string())));
            };
            let result = update_one_plugin(&client, &asset, &plugin_dir, &name).await;
            (name, result)
        }
    });
    join_all(tasks).await
}

async fn update_one_plugin(
    client: &reqwest::Client,
    asset: &ReleaseAsset,
    plugin_dir: &Path,
    name: &str,
) -> Result<(), UpdaterError> {
    let tmp = tempfile::tempdir().map_err(|e| UpdaterError::Io(plugin_dir.to_path_buf(), e))?;
    let extracted = download_and_extract(client, &asset.browser_download_url, tmp.path()).await?;
    let dest = plugin_dir.join(name);
    atomic_swap(&dest, &extracted).await
}
