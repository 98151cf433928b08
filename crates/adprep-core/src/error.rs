//! Error types module
//!
//! Every fallible operation in the pipeline reports a `PipelineError`. Variants
//! follow the failure taxonomy of the pipeline: probe, transform, budget, auth,
//! network and validation failures. Each variant self-describes whether it may
//! be retried and whether it must abort the whole batch.

use std::io;
use std::path::PathBuf;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for per-asset failures that do not stop the batch
    Warn,
    /// Error level - for failures that abort the batch
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("{tool} failed: {diagnostic}")]
    Transform { tool: String, diagnostic: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Byte budget unmet for {path}: {size_bytes} bytes exceeds {max_bytes} bytes")]
    BudgetUnmet {
        path: PathBuf,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upload failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("Plan validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub fn transform(tool: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        PipelineError::Transform {
            tool: tool.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Machine-readable error code (e.g., "TRANSFORM_FAILURE")
    pub fn error_code(&self) -> &'static str {
        match self {
            PipelineError::Probe { .. } => "PROBE_FAILURE",
            PipelineError::Transform { .. } => "TRANSFORM_FAILURE",
            PipelineError::Timeout { .. } => "TRANSFORM_TIMEOUT",
            PipelineError::BudgetUnmet { .. } => "BUDGET_UNMET",
            PipelineError::Auth(_) => "AUTH_FAILURE",
            PipelineError::Http { .. } => "HTTP_ERROR",
            PipelineError::NetworkTimeout(_) => "TRANSIENT_NETWORK_FAILURE",
            PipelineError::Network(_) => "NETWORK_ERROR",
            PipelineError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            PipelineError::RetriesExhausted { .. } => "UPLOAD_RETRIES_EXHAUSTED",
            PipelineError::Validation(_) => "VALIDATION_FAILURE",
            PipelineError::Config(_) => "CONFIG_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a failed upload attempt may be retried.
    ///
    /// Only gateway errors (502/503) and network timeouts qualify. Client
    /// errors, malformed session responses and auth failures are fatal on
    /// first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::Http { status, .. } => matches!(status, 502 | 503),
            PipelineError::NetworkTimeout(_) => true,
            _ => false,
        }
    }

    /// Whether this error must abort the whole batch rather than a single asset.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Auth(_) | PipelineError::Validation(_) | PipelineError::Config(_)
        )
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            PipelineError::Probe { .. } => LogLevel::Debug,
            err if err.is_batch_fatal() => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::MalformedResponse(format!("JSON parsing error: {}", err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_errors_are_transient() {
        for status in [502, 503] {
            let err = PipelineError::Http {
                status,
                body: "bad gateway".to_string(),
            };
            assert!(err.is_transient(), "{} should be retried", status);
        }
        assert!(PipelineError::NetworkTimeout("read timed out".to_string()).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        for status in [400, 401, 403, 404, 500, 504] {
            let err = PipelineError::Http {
                status,
                body: String::new(),
            };
            assert!(!err.is_transient(), "{} should not be retried", status);
        }
        assert!(!PipelineError::MalformedResponse("missing asset_url".into()).is_transient());
        assert!(!PipelineError::Auth("HTTP 401".into()).is_transient());
    }

    #[test]
    fn test_batch_fatal_classification() {
        assert!(PipelineError::Auth("rejected".into()).is_batch_fatal());
        assert!(PipelineError::Validation(vec!["bad size".into()]).is_batch_fatal());
        assert!(!PipelineError::transform("ffmpeg", "boom").is_batch_fatal());
        assert!(!PipelineError::RetriesExhausted {
            attempts: 3,
            source: Box::new(PipelineError::NetworkTimeout("t".into())),
        }
        .is_batch_fatal());
    }

    #[test]
    fn test_transform_error_keeps_diagnostic_verbatim() {
        let err = PipelineError::transform("ffmpeg", "Invalid data found when processing input");
        assert_eq!(
            err.to_string(),
            "ffmpeg failed: Invalid data found when processing input"
        );
        assert_eq!(err.error_code(), "TRANSFORM_FAILURE");
    }

    #[test]
    fn test_validation_message_joins_problems() {
        let err = PipelineError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Plan validation failed: a; b");
    }
}
