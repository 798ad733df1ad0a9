//! Per-service up/down alarm state machine with webhook fan-out.
//!
//! State lives behind the [`AlarmStore`] trait so the filesystem-backed
//! implementation used in production can be swapped for an in-memory one
//! in tests without touching the transition logic in [`AlarmEngine`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse alarm state at {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

/// On-disk / in-memory representation of a service's alarm state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmState {
    /// RFC-3339 timestamp with zone offset, as spec.md §3 requires.
    pub date: DateTime<Utc>,
    pub locked: bool,
}

/// Storage backend for per-service alarm state.
pub trait AlarmStore: Send + Sync {
    fn load(&self, service: &str) -> Result<Option<AlarmState>, AlarmError>;
    fn save(&self, service: &str, state: &AlarmState) -> Result<(), AlarmError>;
    fn remove(&self, service: &str) -> Result<(), AlarmError>;
}

/// Filesystem-backed store: one JSON file per service under a directory,
/// matching spec.md §6's `<service>.log` naming (slashes replaced with
/// dashes so nested service names stay single-segment filenames).
pub struct FileAlarmStore {
    dir: PathBuf,
}

impl FileAlarmStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{}.log", sanitize(service)))
    }
}

fn sanitize(service: &str) -> String {
    service.replace('/', "-")
}

impl AlarmStore for FileAlarmStore {
    fn load(&self, service: &str) -> Result<Option<AlarmState>, AlarmError> {
        let path = self.path_for(service);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| AlarmError::Io(path.clone(), e))?;
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unparsable alarm state");
                Ok(None)
            }
        }
    }

    fn save(&self, service: &str, state: &AlarmState) -> Result<(), AlarmError> {
        fs::create_dir_all(&self.dir).map_err(|e| AlarmError::Io(self.dir.clone(), e))?;
        let path = self.path_for(service);
        let body = serde_json::to_string(state).map_err(|e| AlarmError::Parse(path.clone(), e))?;
        fs::write(&path, body).map_err(|e| AlarmError::Io(path, e))
    }

    fn remove(&self, service: &str) -> Result<(), AlarmError> {
        let path = self.path_for(service);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AlarmError::Io(path, e)),
        }
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryAlarmStore {
    states: Mutex<HashMap<String, AlarmState>>,
}

impl AlarmStore for MemoryAlarmStore {
    fn load(&self, service: &str) -> Result<Option<AlarmState>, AlarmError> {
        Ok(self.states.lock().unwrap().get(service).cloned())
    }

    fn save(&self, service: &str, state: &AlarmState) -> Result<(), AlarmError> {
        self.states
            .lock()
            .unwrap()
            .insert(service.to_string(), state.clone());
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<(), AlarmError> {
        self.states.lock().unwrap().remove(service);
        Ok(())
    }
}

fn transition_down(
    prev: Option<AlarmState>,
    now: DateTime<Utc>,
    interval_minutes: i64,
    no_interval: bool,
) -> (AlarmState, bool) {
    let Some(prev) = prev else {
        return if interval_minutes == 0 || no_interval {
            (AlarmState { date: now, locked: true }, true)
        } else {
            (AlarmState { date: now, locked: false }, false)
        };
    };

    let elapsed = now.signed_duration_since(prev.date);
    let same_day = prev.date.date_naive() == now.date_naive();

    if !prev.locked {
        if elapsed >= chrono::Duration::hours(24) {
            return (AlarmState { date: now, locked: true }, true);
        }
        if same_day && elapsed >= chrono::Duration::minutes(interval_minutes) {
            return (AlarmState { date: now, locked: true }, true);
        }
        if interval_minutes == 0 && !same_day {
            return (AlarmState { date: now, locked: false }, true);
        }
        (prev, false)
    } else {
        // Locked: stays locked unless a new calendar day re-arms a
        // zero-interval alarm (spec.md §8 scenario 3).
        if interval_minutes == 0 && !same_day {
            return (AlarmState { date: now, locked: false }, true);
        }
        (prev, false)
    }
}

/// Owns the per-service up/down state machine and webhook transport.
/// Issue lifecycle and de-duplication live in `issue_engine`; callers
/// cooperate the two per spec.md §4.2.
pub struct AlarmEngine {
    store: Box<dyn AlarmStore>,
    webhooks: Vec<String>,
    script_name: String,
    identifier: String,
    client: reqwest::Client,
}

impl AlarmEngine {
    pub fn new(
        store: Box<dyn AlarmStore>,
        webhooks: Vec<String>,
        script_name: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            store,
            webhooks,
            script_name: script_name.into(),
            identifier: identifier.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Records or advances the down state for `service`; emits a webhook
    /// per the transition table in spec.md §4.1.
    pub async fn alarm_down(
        &self,
        service: &str,
        message: &str,
        no_interval: bool,
        interval_minutes: i64,
        stream: Option<&str>,
        topic: Option<&str>,
    ) -> Result<(), AlarmError> {
        let prev = self.store.load(service)?;
        let now = Utc::now();
        let (new_state, emit) = transition_down(prev, now, interval_minutes, no_interval);
        self.store.save(service, &new_state)?;

        if emit {
            let text = format!(
                "[{} - {}] [:red_circle:] {}",
                self.script_name, self.identifier, message
            );
            self.fan_out(&text, stream, topic, false).await;
        }
        Ok(())
    }

    /// Clears the state for `service`; emits a recovery webhook iff the
    /// prior state was locked. A missing state file is a documented
    /// no-op regardless of `no_interval` (spec.md §9 open question).
    pub async fn alarm_up(&self, service: &str, message: &str, _no_interval: bool) -> Result<(), AlarmError> {
        let Some(prev) = self.store.load(service)? else {
            return Ok(());
        };
        self.store.remove(service)?;

        if prev.locked {
            let text = format!(
                "[{} - {}] [:check:] {}",
                self.script_name, self.identifier, message
            );
            self.fan_out(&text, None, None, false).await;
        }
        Ok(())
    }

    /// Bypasses alarm state entirely and sends `message` to every
    /// configured webhook (or just the first, if `only_first`).
    pub async fn alarm_raw(&self, message: &str, stream: Option<&str>, topic: Option<&str>, only_first: bool) {
        self.fan_out(message, stream, topic, only_first).await;
    }

    async fn fan_out(&self, text: &str, stream: Option<&str>, topic: Option<&str>, only_first: bool) {
        for url in &self.webhooks {
            let target = with_overrides(url, stream, topic);
            match send_webhook(&self.client, &target, text).await {
                Ok(()) => debug!(url = %target, "webhook sent"),
                Err(e) => error!(url = %target, error = %e, "webhook send failed"),
            }
            if only_first {
                break;
            }
        }
    }
}

fn with_overrides(url: &str, stream: Option<&str>, topic: Option<&str>) -> String {
    let mut out = url.to_string();
    if let Some(stream) = stream {
        let sep = if out.contains('?') { '&' } else { '?' };
        out = format!("{out}{sep}stream={stream}");
    }
    if let Some(topic) = topic {
        let sep = if out.contains('?') { '&' } else { '?' };
        out = format!("{out}{sep}topic={topic}");
    }
    out
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct WebhookResponse {
    result: Option<String>,
}

async fn send_webhook(client: &reqwest::Client, url: &str, text: &str) -> Result<(), String> {
    let escaped = text.replace('\n', "\\n");
    let resp = client
        .post(url)
        .json(&WebhookPayload { text: &escaped })
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }
    let body: WebhookResponse = resp.json().await.map_err(|e| e.to_string())?;
    match body.result.as_deref() {
        Some("success") => Ok(()),
        other => Err(format!("webhook reported failure: {other:?}")),
    }
}
