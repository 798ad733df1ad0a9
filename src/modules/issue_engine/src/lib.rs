//! Per-service ticket lifecycle against an HTTP issue-tracking API.
//!
//! Mirrors `alarm_engine`'s state-file discipline but the persisted
//! state is a single open ticket ID instead of a lock/timestamp pair.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("I/O error on {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("ticket API request failed: {0}")]
    Api(String),

    #[error("ticket API returned unexpected response: {0}")]
    Parse(String),
}

/// Storage backend for the single open-ticket-id per service.
pub trait IssueStore: Send + Sync {
    fn load(&self, service: &str) -> Result<Option<u64>, IssueError>;
    fn save(&self, service: &str, id: u64) -> Result<(), IssueError>;
    fn remove(&self, service: &str) -> Result<(), IssueError>;
}

pub struct FileIssueStore {
    dir: PathBuf,
}

impl FileIssueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{}.issue", service.replace('/', "-")))
    }
}

impl IssueStore for FileIssueStore {
    fn load(&self, service: &str) -> Result<Option<u64>, IssueError> {
        let path = self.path_for(service);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| IssueError::Io(path.clone(), e))?;
        match raw.trim().parse() {
            Ok(id) => Ok(Some(id)),
            Err(_) => {
                warn!(path = %path.display(), "skipping unparsable issue state");
                Ok(None)
            }
        }
    }

    fn save(&self, service: &str, id: u64) -> Result<(), IssueError> {
        fs::create_dir_all(&self.dir).map_err(|e| IssueError::Io(self.dir.clone(), e))?;
        let path = self.path_for(service);
        fs::write(&path, id.to_string()).map_err(|e| IssueError::Io(path, e))
    }

    fn remove(&self, service: &str) -> Result<(), IssueError> {
        let path = self.path_for(service);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IssueError::Io(path, e)),
        }
    }
}

#[derive(Default)]
pub struct MemoryIssueStore {
    states: Mutex<HashMap<String, u64>>,
}

impl IssueStore for MemoryIssueStore {
    fn load(&self, service: &str) -> Result<Option<u64>, IssueError> {
        Ok(self.states.lock().unwrap().get(service).copied())
    }

    fn save(&self, service: &str, id: u64) -> Result<(), IssueError> {
        self.states.lock().unwrap().insert(service.to_string(), id);
        Ok(())
    }

    fn remove(&self, service: &str) -> Result<(), IssueError> {
        self.states.lock().unwrap().remove(service);
        Ok(())
    }
}

#[derive(Serialize)]
struct CreateTicketRequest<'a> {
    subject: &'a str,
    description: &'a str,
}

#[derive(Serialize)]
struct UpdateTicketRequest<'a> {
    note: &'a str,
    internal: bool,
}

#[derive(Serialize)]
struct CloseTicketRequest {
    status: &'static str,
}

#[derive(Deserialize)]
struct TicketResponse {
    id: u64,
}

#[derive(Deserialize)]
struct TicketListResponse {
    issues: Vec<TicketSummary>,
}

#[derive(Deserialize)]
struct TicketSummary {
    id: u64,
    subject: String,
    description: String,
}

/// Talks to a Redmine-shaped ticket API; owns the single open-ticket
/// record per service (distinct from the alarm engine's lock state).
pub struct IssueEngine {
    store: Box<dyn IssueStore>,
    base_url: String,
    api_key: String,
    user_agent: String,
    client: reqwest::Client,
}

impl IssueEngine {
    pub fn new(
        store: Box<dyn IssueStore>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        agent_version: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builder should not fail with static config");
        Self {
            store,
            base_url: base_url.into(),
            api_key: api_key.into(),
            user_agent: format!("Monokit/{agent_version}"),
            client,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.api_key)
            .header("X-API-Key", &self.api_key)
            .header("User-Agent", &self.user_agent)
    }

    /// Ensures a ticket is open for `service`; scans existing open
    /// issues by (subject, description) first to avoid duplicates.
    pub async fn issue_down(
        &self,
        service: &str,
        subject: &str,
        description: &str,
    ) -> Result<u64, IssueError> {
        if let Some(id) = self.store.load(service)? {
            return Ok(id);
        }

        if let Some(existing) = self.find_duplicate(subject, description).await? {
            self.store.save(service, existing)?;
            return Ok(existing);
        }

        let resp = self
            .authed(self.client.post(format!("{}/issues", self.base_url)))
            .json(&CreateTicketRequest { subject, description })
            .send()
            .await
            .map_err(|e| IssueError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(IssueError::Api(format!("HTTP {}", resp.status())));
        }
        let body: TicketResponse = resp
            .json()
            .await
            .map_err(|e| IssueError::Parse(e.to_string()))?;
        self.store.save(service, body.id)?;
        debug!(service, id = body.id, "issue created");
        Ok(body.id)
    }

    /// Appends a note to the ticket open for `service`, if any.
    pub async fn issue_update(&self, service: &str, note: &str, internal: bool) -> Result<(), IssueError> {
        let Some(id) = self.store.load(service)? else {
            return Ok(());
        };
        let resp = self
            .authed(self.client.put(format!("{}/issues/{id}", self.base_url)))
            .json(&UpdateTicketRequest { note, internal })
            .send()
            .await
            .map_err(|e| IssueError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            error!(service, id, status = %resp.status(), "issue update failed");
        }
        Ok(())
    }

    /// Closes the ticket open for `service` and removes the local record.
    pub async fn issue_up(&self, service: &str, _note: &str) -> Result<(), IssueError> {
        let Some(id) = self.store.load(service)? else {
            return Ok(());
        };
        let resp = self
            .authed(self.client.put(format!("{}/issues/{id}", self.base_url)))
            .json(&CloseTicketRequest { status: "closed" })
            .send()
            .await
            .map_err(|e| IssueError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            error!(service, id, status = %resp.status(), "issue close failed");
        }
        self.store.remove(service)?;
        Ok(())
    }

    /// Returns the current ticket ID for `service`, or empty string.
    pub fn issue_show(&self, service: &str) -> Result<String, IssueError> {
        Ok(self
            .store
            .load(service)?
            .map(|id| id.to_string())
            .unwrap_or_default())
    }

    /// Posts a project-news item, optionally skipping if a matching
    /// (title, description) item already exists.
    pub async fn news_create(
        &self,
        title: &str,
        description: &str,
        no_duplicate: bool,
    ) -> Result<(), IssueError> {
        if no_duplicate {
            if let Some(_existing) = self.find_duplicate(title, description).await? {
                debug!(title, "skipping duplicate news item");
                return Ok(());
            }
        }
        let resp = self
            .authed(self.client.post(format!("{}/news", self.base_url)))
            .json(&CreateTicketRequest {
                subject: title,
                description,
            })
            .send()
            .await
            .map_err(|e| IssueError::Api(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(IssueError::Api(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn find_duplicate(&self, subject: &str, description: &str) -> Result<Option<u64>, IssueError> {
        let resp = self
            .authed(self.client.get(format!("{}/issues", self.base_url)))
            .query(&[("status", "open")])
            .send()
            .await
            .map_err(|e| IssueError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(IssueError::Api(format!("HTTP {}", resp.status())));
        }
        let body: TicketListResponse = resp
            .json()
            .await
            .map_err(|e| IssueError::Parse(e.to_string()))?;

        Ok(body
            .issues
            .into_iter()
            .find(|t| t.subject == subject && t.description == description)
            .map(|t| t.id))
    }
}
