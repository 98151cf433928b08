//! Resilient asset upload
//!
//! One attempt is: request an upload slot (signed), then PUT the bytes to the
//! slot's destination (unsigned). Transient failures (HTTP 502/503, network
//! timeouts) are retried with exponential backoff and a fresh slot; anything
//! else fails on first occurrence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adprep_core::models::mime_for_path;
use adprep_core::{ApiConfig, PipelineError, PipelineResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::session::AuthenticatedSession;

const UPLOAD_SLOT_PATH: &str = "/creative-assets";
const ASSET_KIND: &str = "CREATIVE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            max_attempts: config.upload_max_attempts,
            base_delay: config.upload_retry_base,
        }
    }

    /// Delay before retry number `retry` (0-based): base, 2x base, 4x base...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Single-use destination for one attempt's bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSlot {
    #[serde(rename = "asset_url")]
    pub asset_reference: String,
    #[serde(rename = "content_upload_url")]
    pub destination_url: String,
}

#[derive(Serialize)]
struct UploadSlotRequest<'a> {
    asset_kind: &'a str,
    mime_type: &'a str,
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub asset_reference: String,
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

/// Anything that turns bytes into a durable asset reference.
#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn upload(&self, bytes: Bytes, mime_type: &str) -> PipelineResult<String>;

    async fn upload_file(&self, path: &Path) -> PipelineResult<String> {
        let bytes = tokio::fs::read(path).await?;
        self.upload(Bytes::from(bytes), mime_for_path(path)).await
    }
}

pub struct ResilientUploader {
    session: Arc<AuthenticatedSession>,
    ad_account_id: String,
    policy: RetryPolicy,
}

impl ResilientUploader {
    pub fn new(
        session: Arc<AuthenticatedSession>,
        ad_account_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            session,
            ad_account_id: ad_account_id.into(),
            policy,
        }
    }

    pub fn session(&self) -> &Arc<AuthenticatedSession> {
        &self.session
    }

    #[tracing::instrument(skip(self, bytes), fields(mime_type = %mime_type, size = bytes.len()))]
    pub async fn upload_with_receipt(&self, bytes: Bytes, mime_type: &str) -> PipelineResult<UploadReceipt> {
        let mut delays = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(bytes.clone(), mime_type).await {
                Ok(asset_reference) => {
                    tracing::info!(attempt, asset_reference = %asset_reference, "Upload completed");
                    return Ok(UploadReceipt {
                        asset_reference,
                        attempts: attempt,
                        delays,
                    });
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt - 1);
                    tracing::warn!(
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Transient upload failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(attempt, error = %e, "Upload retries exhausted");
                    return Err(PipelineError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "Upload failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, bytes: Bytes, mime_type: &str) -> PipelineResult<String> {
        let slot = self.request_slot(mime_type).await?;
        tracing::debug!(asset_reference = %slot.asset_reference, "Upload slot obtained");
        self.session
            .gateway()
            .put_signed(&slot.destination_url, bytes, mime_type)
            .await?;
        Ok(slot.asset_reference)
    }

    async fn request_slot(&self, mime_type: &str) -> PipelineResult<UploadSlot> {
        let slot: UploadSlot = self
            .session
            .post_json(
                UPLOAD_SLOT_PATH,
                &[("ad_account_id", self.ad_account_id.as_str())],
                &UploadSlotRequest {
                    asset_kind: ASSET_KIND,
                    mime_type,
                },
            )
            .await?;
        if slot.destination_url.is_empty() || slot.asset_reference.is_empty() {
            return Err(PipelineError::MalformedResponse(
                "upload slot is missing asset_url or content_upload_url".to_string(),
            ));
        }
        Ok(slot)
    }
}

#[async_trait]
impl AssetUploader for ResilientUploader {
    async fn upload(&self, bytes: Bytes, mime_type: &str) -> PipelineResult<String> {
        self.upload_with_receipt(bytes, mime_type)
            .await
            .map(|receipt| receipt.asset_reference)
    }
}
