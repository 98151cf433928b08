//! HTTP gateway
//!
//! Thin request/response wrapper shared by the session and the uploader.
//! Status codes of 400 and above become `PipelineError::Http` with the
//! response body attached; timeouts become `NetworkTimeout` so the uploader
//! can tell them apart from other transport failures.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adprep_core::{ApiConfig, PipelineError, PipelineResult, TlsMode};
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Build a gateway. `TlsMode::Auto` must be resolved with
    /// `resolve_tls_mode` first; left unresolved it verifies certificates.
    pub fn new(base_url: &str, timeout: Duration, tls_mode: TlsMode) -> PipelineResult<Self> {
        let accept_invalid_certs = tls_mode == TlsMode::Insecure;
        if accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled");
        }

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn from_config(config: &ApiConfig) -> PipelineResult<Self> {
        let tls_mode = resolve_tls_mode(config.tls_mode).await;
        Self::new(&config.base_url, config.http_timeout, tls_mode)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body to an API path and deserialize the JSON response.
    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
        bearer: Option<&str>,
    ) -> PipelineResult<T> {
        let url = self.build_url(path);
        let mut request = self.client.post(&url).json(body);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = send(request).await?;
        let text = response.text().await.map_err(map_transport_error)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// PUT raw bytes to a pre-signed URL.
    ///
    /// Only `Content-Type` is sent: the URL carries its own authorization and
    /// any extra auth header invalidates the signature.
    pub async fn put_signed(&self, url: &str, body: Bytes, content_type: &str) -> PipelineResult<()> {
        let request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        send(request).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> PipelineResult<Response> {
    let response = request.send().await.map_err(map_transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(PipelineError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

fn map_transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::NetworkTimeout(err.to_string())
    } else {
        PipelineError::Network(err.to_string())
    }
}

/// Evidence that a TLS-intercepting corporate proxy (Zscaler and similar)
/// is present. Such proxies re-sign traffic with certificates that strict
/// verification rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyIndicator {
    CertFile(PathBuf),
    AppBundle(PathBuf),
    Process(&'static str),
}

impl fmt::Display for ProxyIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyIndicator::CertFile(path) => write!(f, "certificate file {}", path.display()),
            ProxyIndicator::AppBundle(path) => write!(f, "application {}", path.display()),
            ProxyIndicator::Process(name) => write!(f, "running process {}", name),
        }
    }
}

const PROXY_APP_DIR: &str = "/Applications/Zscaler";
const PROXY_PROCESS: &str = "Zscaler";

/// Turn `TlsMode::Auto` into `Strict` or `Insecure`; other modes pass through.
pub async fn resolve_tls_mode(mode: TlsMode) -> TlsMode {
    if mode != TlsMode::Auto {
        return mode;
    }
    match detect_corporate_proxy().await {
        Some(indicator) => {
            tracing::warn!(
                indicator = %indicator,
                "Corporate TLS proxy detected, disabling certificate verification (set TLS_VERIFY=strict to keep it)"
            );
            TlsMode::Insecure
        }
        None => TlsMode::Strict,
    }
}

pub async fn detect_corporate_proxy() -> Option<ProxyIndicator> {
    detect_corporate_proxy_in(
        std::env::var_os("SSL_CERT_FILE").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
        Path::new(PROXY_APP_DIR),
    )
    .await
}

/// Check, in order: the certificate files, the application directory, then
/// a running proxy process.
pub async fn detect_corporate_proxy_in(
    ssl_cert_file: Option<PathBuf>,
    home: Option<PathBuf>,
    app_dir: &Path,
) -> Option<ProxyIndicator> {
    for path in proxy_cert_candidates(ssl_cert_file, home.as_deref()) {
        if is_file(&path).await {
            return Some(ProxyIndicator::CertFile(path));
        }
    }
    if tokio::fs::metadata(app_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Some(ProxyIndicator::AppBundle(app_dir.to_path_buf()));
    }

    let running = tokio::process::Command::new("pgrep")
        .args(["-x", PROXY_PROCESS])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false);
    running.then_some(ProxyIndicator::Process(PROXY_PROCESS))
}

fn proxy_cert_candidates(ssl_cert_file: Option<PathBuf>, home: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = ssl_cert_file.into_iter().collect();
    if let Some(home) = home {
        candidates.push(home.join("zcert").join("zscaler.pem"));
        candidates.push(home.join(".certs").join("zscaler.pem"));
    }
    candidates
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
