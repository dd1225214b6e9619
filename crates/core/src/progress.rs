//! Optional progress reporting for callers that stream status to a user.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Structure,
    Parsing,
    Units,
    Summaries,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
}

/// Sends [`ProgressEvent`]s when a channel is attached; otherwise a no-op.
///
/// Reporting never fails or suspends the pipeline. Events that do not fit in
/// the channel, or whose receiver is gone, are logged and dropped.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(sender: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn report(&self, stage: ProgressStage, message: impl Into<String>) {
        self.send(ProgressEvent {
            stage,
            message: message.into(),
            current: None,
            total: None,
        });
    }

    pub fn report_count(
        &self,
        stage: ProgressStage,
        message: impl Into<String>,
        current: usize,
        total: usize,
    ) {
        self.send(ProgressEvent {
            stage,
            message: message.into(),
            current: Some(current),
            total: Some(total),
        });
    }

    fn send(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(stage = ?event.stage, "Progress channel full, event discarded");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(stage = ?event.stage, "Progress receiver dropped, event discarded");
            }
        }
    }
}
