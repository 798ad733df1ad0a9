//! Authenticated client for the central monitoring server: host
//! registration, status polling, health and log submission.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to {0} failed: {1}")]
    Transport(String, reqwest::Error),

    #[error("server returned {1} for {0}")]
    Status(String, reqwest::StatusCode),
}

#[derive(Debug, Clone, Serialize)]
pub struct HostUpsertRequest {
    pub name: String,
    pub cpu_cores: u32,
    pub ram_mb: u64,
    pub os: String,
    pub version: String,
    pub installed_components: Vec<String>,
    pub disabled_components: Vec<String>,
    pub ip: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStatus {
    pub status: StatusValue,
    #[serde(default)]
    pub wants_update_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub tool: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub level: String,
    pub timestamp: String,
    pub message: String,
    pub fields: serde_json::Value,
}

/// Outcome of [`RemoteClient::check_service_status`]: tells the caller
/// whether to keep running, exit cleanly, or re-run after self-updating.
pub enum StatusDecision {
    Continue,
    Disabled,
    UpdateThen(String),
}

pub struct RemoteClient {
    base_url: String,
    identifier: String,
    host_token: String,
    agent_version: String,
    client: reqwest::Client,
}

impl RemoteClient {
    pub fn new(
        base_url: impl Into<String>,
        identifier: impl Into<String>,
        host_token: impl Into<String>,
        agent_version: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builder should not fail with static config");
        Self {
            base_url: base_url.into(),
            identifier: identifier.into(),
            host_token: host_token.into(),
            agent_version: format!("Monokit/{agent_version}"),
            client,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", &self.host_token)
            .header("User-Agent", &self.agent_version)
    }

    pub async fn upsert_host(&self, req: &HostUpsertRequest) -> Result<(), RemoteError> {
        let url = format!("{}/api/v1/hosts", self.base_url);
        let resp = self
            .authed(self.client.post(&url))
            .json(req)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(url, resp.status()));
        }
        Ok(())
    }

    pub async fn service_status(&self, service: &str) -> Result<ServiceStatus, RemoteError> {
        let url = format!(
            "{}/api/v1/hosts/{}/{}",
            self.base_url, self.identifier, service
        );
        let resp = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RemoteError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(url.clone(), resp.status()));
        }
        resp.json()
            .await
            .map_err(|e| RemoteError::Transport(url, e))
    }

    pub async fn submit_health(&self, snapshot: &HealthSnapshot) -> Result<(), RemoteError> {
        let url = format!("{}/api/v1/host/health/{}", self.base_url, snapshot.tool);
        let resp = self
            .authed(self.client.post(&url))
            .json(&snapshot.payload)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(url, resp.status()));
        }
        Ok(())
    }

    pub async fn submit_log(&self, event: &LogEvent) -> Result<(), RemoteError> {
        let url = format!("{}/api/v1/host/logs", self.base_url);
        let resp = self
            .authed(self.client.post(&url))
            .json(event)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(url.clone(), e))?;
        if !resp.status().is_success() {
            return Err(RemoteError::Status(url, resp.status()));
        }
        Ok(())
    }

    /// Called by every component before it runs (spec.md §4.5). Resolves
    /// to `Disabled` (agent should exit cleanly and drop its lockfile) or
    /// `UpdateThen(version)` (caller should self-update then re-check).
    pub async fn check_service_status(
        &self,
        service: &str,
        current_version: &str,
    ) -> Result<StatusDecision, RemoteError> {
        let status = self.service_status(service).await?;
        if status.status == StatusValue::Disabled {
            debug!(service, "service disabled by server");
            return Ok(StatusDecision::Disabled);
        }
        match status.wants_update_to {
            Some(target) if !target.is_empty() && target != current_version => {
                warn!(service, current_version, target = %target, "server requested update");
                Ok(StatusDecision::UpdateThen(target))
            }
            _ => Ok(StatusDecision::Continue),
        }
    }
}
