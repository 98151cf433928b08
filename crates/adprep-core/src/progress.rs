//! Structured progress events
//!
//! Every completed normalization or upload step is reported as a
//! `ProgressEvent`. Events are always logged on the `adprep::progress` target
//! and can additionally be forwarded to a channel owned by the caller.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::catalog::Dimensions;

pub const PROGRESS_TARGET: &str = "adprep::progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Normalize,
    Letterbox,
    Compress,
    ExtractEndcard,
    Transcode,
    Upload,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Normalize => "normalize",
            Operation::Letterbox => "letterbox",
            Operation::Compress => "compress",
            Operation::ExtractEndcard => "extract_endcard",
            Operation::Transcode => "transcode",
            Operation::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Done { dimensions: Option<Dimensions> },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub op: Operation,
    pub source: String,
    pub group: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ProgressEvent {
    pub fn done(
        op: Operation,
        source: impl Into<String>,
        group: Option<&str>,
        dimensions: Option<Dimensions>,
    ) -> Self {
        Self {
            op,
            source: source.into(),
            group: group.map(str::to_string),
            outcome: Outcome::Done { dimensions },
        }
    }

    pub fn failed(
        op: Operation,
        source: impl Into<String>,
        group: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            op,
            source: source.into(),
            group: group.map(str::to_string),
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
        }
    }
}

/// Logs progress events and optionally forwards them to a listener.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    listener: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let group = event.group.as_deref().unwrap_or("-");
        match &event.outcome {
            Outcome::Done { dimensions } => {
                let dimensions = dimensions.map(|d| d.to_string()).unwrap_or_default();
                tracing::info!(
                    target: PROGRESS_TARGET,
                    op = event.op.as_str(),
                    source = %event.source,
                    group = %group,
                    dimensions = %dimensions,
                    "step completed"
                );
            }
            Outcome::Failed { reason } => {
                tracing::warn!(
                    target: PROGRESS_TARGET,
                    op = event.op.as_str(),
                    source = %event.source,
                    group = %group,
                    reason = %reason,
                    "step failed"
                );
            }
        }

        if let Some(listener) = &self.listener {
            // A listener that went away is not an error for the pipeline.
            let _ = listener.send(event);
        }
    }
}
