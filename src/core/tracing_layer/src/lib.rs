//! Structured JSON logging, size+age rotation, and an optional
//! asynchronous remote submission hook.
//!
//! Built on `tracing-subscriber`'s `Registry`: a JSON file layer and a
//! human-readable console layer always run; a `RemoteSubmitLayer` is
//! added only when client config, host identifier and host key are all
//! present, so no runtime branching is needed downstream.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use monokit_remote::{LogEvent, RemoteClient};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("failed to create log directory {0}: {1}")]
    CreateDir(PathBuf, io::Error),

    #[error("failed to open log file {0}: {1}")]
    OpenFile(PathBuf, io::Error),

    #[error("logging already initialized for this process")]
    AlreadyInitialized,
}

/// Pinned fields attached to every event (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct PinnedFields {
    pub component: String,
    pub version: String,
    pub pid: u32,
    pub hostname: String,
    pub environment: Option<String>,
}

/// Config read from `MONOKIT_LOG_*` environment variables, with the
/// spec's defaults (100 MB / 7 backups / 20 days / compress=true).
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub retention_days: u32,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { max_size_mb: 100, max_backups: 7, retention_days: 20, compress: true }
    }
}

impl RotationConfig {
    pub fn from_env() -> Self {
        let env_u64 = |name: &str, default: u64| {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let defaults = Self::default();
        Self {
            max_size_mb: env_u64("MONOKIT_LOG_MAX_SIZE_MB", defaults.max_size_mb),
            max_backups: env_u64("MONOKIT_LOG_MAX_BACKUPS", defaults.max_backups as u64) as usize,
            retention_days: env_u64("MONOKIT_LOG_RETENTION_DAYS", defaults.retention_days as u64) as u32,
            compress: std::env::var("MONOKIT_LOG_COMPRESS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.compress),
        }
    }
}

/// Remote submission hook wiring. Only constructed when client config +
/// host identifier + host key are all present (spec.md §4.6).
pub struct RemoteSubmitConfig {
    pub client: Arc<RemoteClient>,
}

/// Holds the background submitter task so callers can shut it down.
pub struct LoggerHandle {
    sender: Option<mpsc::UnboundedSender<LogEvent>>,
    submitter: Option<tokio::task::JoinHandle<()>>,
}

impl LoggerHandle {
    /// Cancels in-flight retries and returns promptly (spec.md §5).
    pub async fn close(mut self) {
        self.sender.take();
        if let Some(handle) = self.submitter.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }
}

/// Initializes the global `tracing` subscriber. Must be called at most
/// once per process.
pub fn init(
    log_dir: &Path,
    fields: PinnedFields,
    rotation: RotationConfig,
    remote: Option<RemoteSubmitConfig>,
) -> Result<LoggerHandle, LoggerError> {
    fs::create_dir_all(log_dir).map_err(|e| LoggerError::CreateDir(log_dir.to_path_buf(), e))?;

    let filter = std::env::var("MONOKIT_LOGLEVEL")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let file_path = log_dir.join("monokit.log");
    let writer = RotatingWriterHandle::open(&file_path, &rotation).map_err(|e| LoggerError::OpenFile(file_path, e))?;

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_current_span(false);

    let no_color = std::env::var("MONOKIT_NOCOLOR").is_ok();
    let console_layer = tracing_subscriber::fmt::layer()
        .with_ansi(!no_color)
        .with_target(false);

    let (remote_layer, handle) = match remote {
        Some(cfg) => {
            let (tx, rx) = mpsc::unbounded_channel();
            let submitter = tokio::spawn(run_submitter(cfg.client, rx));
            (
                Some(RemoteSubmitLayer { sender: tx.clone(), fields: fields.clone() }),
                LoggerHandle { sender: Some(tx), submitter: Some(submitter) },
            )
        }
        None => (None, LoggerHandle { sender: None, submitter: None }),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(console_layer)
        .with(remote_layer)
        .try_init()
        .map_err(|_| LoggerError::AlreadyInitialized)?;

    Ok(handle)
}

async fn run_submitter(client: Arc<RemoteClient>, mut rx: mpsc::UnboundedReceiver<LogEvent>) {
    while let Some(event) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match client.submit_log(&event).await {
                Ok(()) => break,
                Err(_) if attempt < 3 => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "log submission failed after retries, dropping event");
                    break;
                }
            }
        }
    }
}

/// Layer that forwards events at INFO or above onto a channel drained
/// by [`run_submitter`]. Never logs its own failures through `tracing`
/// to avoid recursing into the subscriber it's attached to.
struct RemoteSubmitLayer {
    sender: mpsc::UnboundedSender<LogEvent>,
    fields: PinnedFields,
}

impl<S> Layer<S> for RemoteSubmitLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let log_event = LogEvent {
            level: event.metadata().level().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            message: visitor.message,
            fields: serde_json::json!({
                "component": self.fields.component,
                "version": self.fields.version,
                "pid": self.fields.pid,
                "hostname": self.fields.hostname,
                "environment": self.fields.environment,
                "target": event.metadata().target(),
            }),
        };
        let _ = self.sender.send(log_event);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// Writer that enforces size-based rotation on top of the active log
/// file, compressing rolled-off backups with `flate2` when configured.
#[derive(Clone)]
struct RotatingWriterHandle(Arc<Mutex<RotatingState>>);

struct RotatingState {
    dir: PathBuf,
    stem: String,
    max_bytes: u64,
    max_backups: usize,
    retention: Duration,
    compress: bool,
    current: File,
    written: u64,
}

impl RotatingWriterHandle {
    fn open(path: &Path, rotation: &RotationConfig) -> io::Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("monokit")
            .to_string();
        let current = OpenOptions::new().create(true).append(true).open(path)?;
        let written = current.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self(Arc::new(Mutex::new(RotatingState {
            dir,
            stem,
            max_bytes: rotation.max_size_mb * 1024 * 1024,
            max_backups: rotation.max_backups,
            retention: Duration::from_secs(u64::from(rotation.retention_days) * 86_400),
            compress: rotation.compress,
            current,
            written,
        }))))
    }
}

impl RotatingState {
    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.stem))
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let suffix = if self.compress { ".gz" } else { "" };
        self.dir.join(format!("{}.{index}.log{suffix}", self.stem))
    }

    fn rotate(&mut self) -> io::Result<()> {
        for i in (1..self.max_backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                fs::rename(&from, self.backup_path(i + 1))?;
            }
        }
        let overflow = self.backup_path(self.max_backups + 1);
        let _ = fs::remove_file(overflow);

        let active = self.active_path();
        let rotated = self.backup_path(1);
        if self.compress {
            let raw = fs::read(&active)?;
            let compressed_path = rotated;
            let file = File::create(&compressed_path)?;
            let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?;
            fs::remove_file(&active)?;
        } else {
            fs::rename(&active, &rotated)?;
        }

        self.current = OpenOptions::new().create(true).append(true).open(active)?;
        self.written = 0;
        self.prune_by_age();
        Ok(())
    }

    /// Deletes rolled-off backups older than the configured retention
    /// window. The active file is never a candidate, regardless of age.
    fn prune_by_age(&self) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let active_name = self.active_path().file_name().map(|n| n.to_os_string());
        let now = std::time::SystemTime::now();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.file_name() == active_name.as_deref() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&format!("{}.", self.stem)) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if now.duration_since(modified).unwrap_or_default() > self.retention {
                let _ = fs::remove_file(&path);
            }
        }
    }

    fn write_rotating(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        self.current.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(buf.len())
    }
}

impl Write for RotatingWriterHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("rotating writer mutex poisoned").write_rotating(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().expect("rotating writer mutex poisoned").current.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriterHandle {
    type Writer = RotatingWriterHandle;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_config_defaults_match_spec() {
        let config = RotationConfig::default();
        assert_eq!(config.max_size_mb, 100);
        assert_eq!(config.max_backups, 7);
        assert_eq!(config.retention_days, 20);
        assert!(config.compress);
    }

    #[test]
    fn writer_rotates_once_size_threshold_is_crossed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monokit.log");
        let rotation = RotationConfig { max_size_mb: 0, max_backups: 2, retention_days: 1, compress: false };
        let mut writer = RotatingWriterHandle::open(&path, &rotation).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        assert!(dir.path().join("monokit.1.log").is_file());
    }

    #[test]
    fn compressed_backup_is_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monokit.log");
        let rotation = RotationConfig { max_size_mb: 0, max_backups: 2, retention_days: 1, compress: true };
        let mut writer = RotatingWriterHandle::open(&path, &rotation).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        assert!(dir.path().join("monokit.1.log.gz").is_file());
    }

    #[test]
    fn stale_backups_beyond_retention_are_pruned_on_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monokit.log");
        // Out of range of the shift/overflow logic below, so only
        // age-based pruning can account for its removal.
        let stale = dir.path().join("monokit.9.log");
        std::fs::write(&stale, b"old\n").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let rotation = RotationConfig { max_size_mb: 0, max_backups: 2, retention_days: 0, compress: false };
        let mut writer = RotatingWriterHandle::open(&path, &rotation).unwrap();
        writer.write_all(b"first line\n").unwrap();

        assert!(!stale.is_file());
    }
}
