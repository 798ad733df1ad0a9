//! Prevents two `monokit daemon` processes from running concurrently.
//!
//! On start: if `<tmpdir>/monokit.lock` exists and names a PID that is
//! still alive and whose command line starts with `monokit daemon`, the
//! guard refuses to start. Otherwise the (possibly stale) lockfile is
//! replaced and held for the life of the process.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sysinfo::{Pid, System};
use thiserror::Error;
use tracing::{info, warn};

pub const LOCK_FILE_NAME: &str = "monokit.lock";

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("another monokit daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("failed to acquire lock on {0}: {1}")]
    Lock(PathBuf, std::io::Error),

    #[error("I/O error on lockfile {0}: {1}")]
    Io(PathBuf, std::io::Error),
}

/// Default runtime state directory: `/tmp/mono/<scriptname>`.
pub fn default_tmp_dir(script_name: &str) -> PathBuf {
    std::env::temp_dir().join("mono").join(script_name)
}

pub struct ProcessGuard {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessGuard {
    /// Acquires the lock at `dir/monokit.lock`, creating `dir` if needed.
    ///
    /// Returns `GuardError::AlreadyRunning` if a live `monokit daemon`
    /// process already holds it.
    pub fn acquire(dir: &Path) -> Result<Self, GuardError> {
        fs::create_dir_all(dir).map_err(|e| GuardError::Io(dir.to_path_buf(), e))?;
        let path = dir.join(LOCK_FILE_NAME);

        if let Some(pid) = read_stale_pid(&path) {
            if is_daemon_alive(pid) {
                return Err(GuardError::AlreadyRunning(pid));
            }
            warn!(pid, path = %path.display(), "removing stale lockfile");
            let _ = fs::remove_file(&path);
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| GuardError::Io(path.clone(), e))?;
        file.try_lock_exclusive()
            .map_err(|e| GuardError::Lock(path.clone(), e))?;

        let pid = std::process::id();
        let mut f = &file;
        let _ = write!(f, "{pid}\nmonokit daemon\n");

        info!(pid, path = %path.display(), "process lock acquired");
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_stale_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.lines().next()?.trim().parse().ok()
}

fn is_daemon_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes();
    match system.process(Pid::from_u32(pid)) {
        Some(process) => {
            let name_matches = process.name().contains("monokit");
            let cmd = process.cmd().join(" ");
            name_matches && cmd.contains("monokit daemon")
        }
        None => false,
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        // Release the advisory lock explicitly before removing the file so
        // a concurrent starter never observes an unlocked-but-present file.
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove lockfile on exit");
            }
        }
    }
}
