use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Another capture still owns the camera.
    Busy,
    /// Inside the quiet period after the last recognised item.
    Debounce,
    NoActiveSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CaptureOutcome {
    Classified(String),
    Unknown,
    CaptureFailed(String),
    Skipped(SkipReason),
}

/// Ephemeral record of one sensor trigger; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureAttempt {
    pub id: String,
    pub requested_at: NaiveDateTime,
    pub outcome: CaptureOutcome,
    /// True when the outcome produced a ledger line.
    pub applied: bool,
}
