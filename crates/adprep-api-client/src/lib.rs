//! Upload client for the ad platform API.
//!
//! Layers, bottom up: an HTTP gateway (TLS handling, status mapping), an
//! authenticated session (bearer token with single-flight refresh), and a
//! resilient uploader (upload slot + signed PUT with retries). The CLI uses
//! `uploader_from_config` to wire all three from a `PipelineConfig`.

pub mod gateway;
pub mod session;
pub mod upload;

use std::sync::Arc;

use adprep_core::{PipelineConfig, PipelineResult};

pub use gateway::{detect_corporate_proxy, resolve_tls_mode, HttpGateway, ProxyIndicator};
pub use session::AuthenticatedSession;
pub use upload::{AssetUploader, ResilientUploader, RetryPolicy, UploadReceipt, UploadSlot};

/// Build a `ResilientUploader` from configuration. Fails with a config error
/// when the API key or ad account is missing.
pub async fn uploader_from_config(config: &PipelineConfig) -> PipelineResult<ResilientUploader> {
    let (api_key, ad_account_id) = config.require_credentials()?;
    let gateway = HttpGateway::from_config(&config.api).await?;
    let session = AuthenticatedSession::from_config(gateway, &config.api, api_key);
    Ok(ResilientUploader::new(
        Arc::new(session),
        ad_account_id,
        RetryPolicy::from_config(&config.api),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uploader_requires_credentials() {
        let mut config = PipelineConfig::default();
        assert!(uploader_from_config(&config).await.is_err());

        config.api.api_key = Some("key".to_string());
        config.api.ad_account_id = Some("acct".to_string());
        config.api.tls_mode = adprep_core::TlsMode::Strict;
        assert!(uploader_from_config(&config).await.is_ok());
    }
}
