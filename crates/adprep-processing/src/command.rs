//! External tool invocation (ffmpeg, ffprobe)
//!
//! Tools run through `tokio::process` with a wall-clock timeout. The child is
//! killed when the timeout fires; the timeout itself never retries.

use std::process::{Output, Stdio};
use std::time::Duration;

use adprep_core::{PipelineError, PipelineResult};
use tokio::process::Command;

/// Reject tool paths containing shell metacharacters or traversal sequences.
pub fn validate_tool_path(path: &str) -> PipelineResult<()> {
    let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
    if path.is_empty() || path.chars().any(|c| dangerous_chars.contains(&c)) {
        return Err(PipelineError::Config(format!(
            "Tool path contains dangerous characters: {:?}",
            path
        )));
    }
    if path.contains("..") {
        return Err(PipelineError::Config(format!(
            "Tool path contains directory traversal: {}",
            path
        )));
    }
    Ok(())
}

/// Run `program` with `args`, failing on non-zero exit or timeout.
///
/// The error for a non-zero exit carries the tool's stderr verbatim.
pub async fn run_tool(
    program: &str,
    args: &[String],
    timeout: Duration,
    operation: &str,
) -> PipelineResult<Output> {
    tracing::debug!(program = %program, operation = %operation, args = ?args, "Running external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(PipelineError::transform(
                program,
                format!("failed to execute: {}", e),
            ))
        }
        Err(_) => {
            return Err(PipelineError::Timeout {
                operation: operation.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::transform(program, stderr.trim()));
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_tool_path() {
        assert!(validate_tool_path("ffmpeg").is_ok());
        assert!(validate_tool_path("/usr/local/bin/ffprobe").is_ok());
        assert!(validate_tool_path("ffmpeg; rm -rf /").is_err());
        assert!(validate_tool_path("$(whoami)").is_err());
        assert!(validate_tool_path("../bin/ffmpeg").is_err());
        assert!(validate_tool_path("").is_err());
    }

    #[tokio::test]
    async fn test_missing_tool_is_transform_failure() {
        let err = run_tool(
            "/nonexistent/adprep-tool",
            &[],
            Duration::from_secs(5),
            "probe",
        )
        .await
        .unwrap_err();
        assert_eq!(err.error_code(), "TRANSFORM_FAILURE");
        assert!(err.to_string().contains("failed to execute"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_surfaces_stderr() {
        let args = vec!["-c".to_string(), "echo 'bad input' >&2; exit 3".to_string()];
        let err = run_tool("sh", &args, Duration::from_secs(5), "probe")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "sh failed: bad input");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_fires() {
        let args = vec!["-c".to_string(), "sleep 5".to_string()];
        let err = run_tool("sh", &args, Duration::from_millis(100), "transcode")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }
}
