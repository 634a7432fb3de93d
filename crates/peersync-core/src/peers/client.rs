use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::types::{ChangeRecord, SnapshotEntry};

/// Body returned by `POST /push_change`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// HTTP client for one peer's replication endpoints.
#[derive(Debug, Clone)]
pub struct PeerClient {
    base_url: String,
    client: Client,
    transfer_timeout: Duration,
}

impl PeerClient {
    pub fn new(base_url: impl Into<String>, transfer_timeout: Duration) -> Self {
        Self::with_client(base_url, Client::new(), transfer_timeout)
    }

    /// Share an existing connection pool.
    pub fn with_client(
        base_url: impl Into<String>,
        client: Client,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            transfer_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the peer's full tree, giving up after `timeout`.
    pub async fn get_full_state(&self, timeout: Duration) -> Result<Vec<SnapshotEntry>> {
        let response = self
            .client
            .get(format!("{}/get_full_state", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            anyhow::bail!("Full state request failed: {}", response.status())
        }
    }

    /// Records the peer journaled after `since`.
    pub async fn get_changes(&self, since: &str) -> Result<Vec<ChangeRecord>> {
        let response = self
            .client
            .get(format!("{}/get_changes", self.base_url))
            .query(&[("since", since)])
            .timeout(self.transfer_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            anyhow::bail!("Change request failed: {}", response.status())
        }
    }

    /// Deliver one record; fails unless the peer answers `{status: "ok"}`.
    pub async fn push_change(&self, record: &ChangeRecord) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/push_change", self.base_url))
            .json(record)
            .timeout(self.transfer_timeout)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        let status = response.status();
        let body: PushResponse = response
            .json()
            .await
            .with_context(|| format!("Unreadable push response ({})", status))?;
        if status.is_success() && body.status == "ok" {
            Ok(())
        } else {
            anyhow::bail!(
                "Push of {} rejected: {}",
                record.describe(),
                body.message.unwrap_or_else(|| status.to_string())
            )
        }
    }
}
