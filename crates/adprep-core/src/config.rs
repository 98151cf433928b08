//! Configuration module
//!
//! Pipeline settings are read from the environment (optionally seeded from a
//! `.env` file). Every setting has a default except the API credentials, which
//! are only required by commands that talk to the remote API.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;

const DEFAULT_API_URL: &str = "https://api.moloco.cloud/cm/v1";
const IMAGE_MAX_KB: u64 = 500;
const NATIVE_VIDEO_MAX_MB: u64 = 10;
const PROBE_TIMEOUT_SECS: u64 = 10;
const IMAGE_TIMEOUT_SECS: u64 = 30;
const VIDEO_TIMEOUT_SECS: u64 = 120;
const UPLOAD_MAX_ATTEMPTS: u32 = 3;
const UPLOAD_RETRY_BASE_MS: u64 = 1000;
const TOKEN_TTL_HOURS: i64 = 16;
const TOKEN_REFRESH_MARGIN_MINUTES: i64 = 5;
const HTTP_TIMEOUT_SECS: u64 = 60;
const MAX_CONCURRENCY: usize = 4;

/// How the HTTP client treats TLS certificate verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Verify certificates unless a corporate TLS-intercepting proxy is detected.
    #[default]
    Auto,
    Strict,
    Insecure,
}

impl FromStr for TlsMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(TlsMode::Auto),
            "strict" | "true" => Ok(TlsMode::Strict),
            "insecure" | "false" => Ok(TlsMode::Insecure),
            other => Err(PipelineError::Config(format!(
                "TLS_VERIFY must be auto, strict or insecure (got '{}')",
                other
            ))),
        }
    }
}

/// Remote API connection settings.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub ad_account_id: Option<String>,
    pub http_timeout: Duration,
    pub tls_mode: TlsMode,
    pub token_ttl: chrono::Duration,
    pub refresh_margin: chrono::Duration,
    pub upload_max_attempts: u32,
    pub upload_retry_base: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            ad_account_id: None,
            http_timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            tls_mode: TlsMode::Auto,
            token_ttl: chrono::Duration::hours(TOKEN_TTL_HOURS),
            refresh_margin: chrono::Duration::minutes(TOKEN_REFRESH_MARGIN_MINUTES),
            upload_max_attempts: UPLOAD_MAX_ATTEMPTS,
            upload_retry_base: Duration::from_millis(UPLOAD_RETRY_BASE_MS),
        }
    }
}

/// Media tooling and budget settings.
#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub image_max_bytes: u64,
    pub native_video_max_bytes: u64,
    pub probe_timeout: Duration,
    pub image_timeout: Duration,
    pub video_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            image_max_bytes: IMAGE_MAX_KB * 1024,
            native_video_max_bytes: NATIVE_VIDEO_MAX_MB * 1024 * 1024,
            probe_timeout: Duration::from_secs(PROBE_TIMEOUT_SECS),
            image_timeout: Duration::from_secs(IMAGE_TIMEOUT_SECS),
            video_timeout: Duration::from_secs(VIDEO_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub media: MediaConfig,
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            media: MediaConfig::default(),
            max_concurrency: MAX_CONCURRENCY,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, PipelineError> {
    parse_setting(key, env_opt(key).as_deref(), default)
}

/// Parse a raw setting, falling back to `default` only when it is unset.
fn parse_setting<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> Result<T, PipelineError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            PipelineError::Config(format!("{} must be a number (got '{}')", key, raw))
        }),
    }
}

fn scaled(key: &str, value: u64, factor: u64) -> Result<u64, PipelineError> {
    value
        .checked_mul(factor)
        .ok_or_else(|| PipelineError::Config(format!("{} is too large ({})", key, value)))
}

fn hours(key: &str, value: i64) -> Result<chrono::Duration, PipelineError> {
    chrono::Duration::try_hours(value)
        .ok_or_else(|| PipelineError::Config(format!("{} is out of range ({})", key, value)))
}

fn minutes(key: &str, value: i64) -> Result<chrono::Duration, PipelineError> {
    chrono::Duration::try_minutes(value)
        .ok_or_else(|| PipelineError::Config(format!("{} is out of range ({})", key, value)))
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();

        let tls_mode = match env_opt("TLS_VERIFY") {
            Some(raw) => raw.parse()?,
            None => TlsMode::Auto,
        };

        let api = ApiConfig {
            base_url: env_opt("ADPREP_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: env_opt("ADPREP_API_KEY"),
            ad_account_id: env_opt("ADPREP_AD_ACCOUNT_ID"),
            http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS)?),
            tls_mode,
            token_ttl: hours(
                "TOKEN_TTL_HOURS",
                env_or("TOKEN_TTL_HOURS", TOKEN_TTL_HOURS)?,
            )?,
            refresh_margin: minutes(
                "TOKEN_REFRESH_MARGIN_MINUTES",
                env_or("TOKEN_REFRESH_MARGIN_MINUTES", TOKEN_REFRESH_MARGIN_MINUTES)?,
            )?,
            upload_max_attempts: env_or("UPLOAD_MAX_ATTEMPTS", UPLOAD_MAX_ATTEMPTS)?,
            upload_retry_base: Duration::from_millis(env_or(
                "UPLOAD_RETRY_BASE_MS",
                UPLOAD_RETRY_BASE_MS,
            )?),
        };

        let media = MediaConfig {
            ffmpeg_path: env_opt("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: env_opt("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
            image_max_bytes: scaled(
                "IMAGE_MAX_KB",
                env_or("IMAGE_MAX_KB", IMAGE_MAX_KB)?,
                1024,
            )?,
            native_video_max_bytes: scaled(
                "NATIVE_VIDEO_MAX_MB",
                env_or("NATIVE_VIDEO_MAX_MB", NATIVE_VIDEO_MAX_MB)?,
                1024 * 1024,
            )?,
            probe_timeout: Duration::from_secs(env_or("PROBE_TIMEOUT_SECS", PROBE_TIMEOUT_SECS)?),
            image_timeout: Duration::from_secs(env_or("IMAGE_TIMEOUT_SECS", IMAGE_TIMEOUT_SECS)?),
            video_timeout: Duration::from_secs(env_or("VIDEO_TIMEOUT_SECS", VIDEO_TIMEOUT_SECS)?),
        };

        let config = Self {
            api,
            media,
            max_concurrency: env_or("MAX_CONCURRENCY", MAX_CONCURRENCY)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(PipelineError::Config(format!(
                "ADPREP_API_URL must be an http(s) URL (got '{}')",
                self.api.base_url
            )));
        }
        if self.api.upload_max_attempts == 0 {
            return Err(PipelineError::Config(
                "UPLOAD_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.api.refresh_margin >= self.api.token_ttl {
            return Err(PipelineError::Config(
                "TOKEN_REFRESH_MARGIN_MINUTES must be shorter than TOKEN_TTL_HOURS".to_string(),
            ));
        }
        if self.media.image_max_bytes == 0 || self.media.native_video_max_bytes == 0 {
            return Err(PipelineError::Config(
                "byte budgets must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Credentials needed by commands that upload.
    pub fn require_credentials(&self) -> Result<(&str, &str), PipelineError> {
        let api_key = self
            .api
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("ADPREP_API_KEY must be set".to_string()))?;
        let ad_account_id = self.api.ad_account_id.as_deref().ok_or_else(|| {
            PipelineError::Config("ADPREP_AD_ACCOUNT_ID must be set".to_string())
        })?;
        Ok((api_key, ad_account_id))
    }
}
