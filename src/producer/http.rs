//! HTTP transport for the remote analysis producers.
//!
//! Each producer is a JSON-over-HTTP endpoint under a shared base URL.

use crate::error::{AnalysisError, Result};
use crate::models::{MergedPullRequest, ProducerKind};
use crate::producer::client::ProducerTransport;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path of the merged pull request store.
pub const ARCHIVE_ENDPOINT: &str = "/ai/vector-db/store";

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Posts producer requests with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    call_timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for producers under `base_url`.
    ///
    /// `call_timeout` bounds each HTTP exchange, independently of the
    /// per-producer deadline applied by the client.
    pub fn new(base_url: impl Into<String>, call_timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        info!("Producer transport targeting {}", base_url);

        Ok(Self {
            http_client,
            base_url,
            call_timeout,
        })
    }

    async fn post(&self, kind: ProducerKind, path: &str, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::ProducerTimeout {
                        kind,
                        after: self.call_timeout,
                    }
                } else if e.is_connect() {
                    AnalysisError::ProducerTransport {
                        kind,
                        message: format!("cannot connect to {}", self.base_url),
                    }
                } else {
                    AnalysisError::ProducerTransport {
                        kind,
                        message: format!("failed to send request: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(AnalysisError::ProducerStatus { kind, status, body });
        }

        Ok(response)
    }

    /// Hand a merged pull request to the producers' long-term store.
    ///
    /// Best effort: failures are logged and swallowed.
    pub async fn archive_merged(&self, pull_request: &MergedPullRequest) {
        debug!("Archiving merged pull request {}", pull_request.id);

        let body = match serde_json::to_value(pull_request) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not encode pull request {}: {}", pull_request.id, e);
                return;
            }
        };

        // The archive shares the summary producer's service.
        match self.post(ProducerKind::Summary, ARCHIVE_ENDPOINT, &body).await {
            Ok(_) => info!("Archived merged pull request {}", pull_request.id),
            Err(e) => warn!(
                "Archiving pull request {} failed, continuing: {}",
                pull_request.id, e
            ),
        }
    }
}

#[async_trait]
impl ProducerTransport for HttpTransport {
    async fn invoke(&self, kind: ProducerKind, body: Value) -> Result<Value> {
        let response = self.post(kind, kind.endpoint(), &body).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| AnalysisError::ProducerParse {
                kind,
                message: e.to_string(),
            })
    }
}
