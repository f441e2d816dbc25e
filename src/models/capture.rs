use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Interval,
    Instant,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Interval => "interval",
            CaptureMode::Instant => "instant",
        }
    }
}

/// One unit of capture work. Produced by the scheduler, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureTask {
    pub task_id: String,
    pub triggered_at: DateTime<Utc>,
    pub mode: CaptureMode,
    pub requested_by: Option<String>,
    pub request_id: Option<String>,
}

impl CaptureTask {
    pub fn interval(now: DateTime<Utc>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            triggered_at: now,
            mode: CaptureMode::Interval,
            requested_by: None,
            request_id: None,
        }
    }

    /// The task keeps the request's own timestamp so freshness is judged
    /// against when the request was made, not when it reached us.
    pub fn instant(request: &InstantRequest) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            triggered_at: request.timestamp,
            mode: CaptureMode::Instant,
            requested_by: Some(request.requested_by.clone()),
            request_id: Some(request.request_id.clone()),
        }
    }
}

/// A remote request for an out-of-band capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstantRequest {
    pub request_id: String,
    pub requested_by: String,
    pub timestamp: DateTime<Utc>,
}

impl InstantRequest {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.timestamp)
    }
}

/// Foreground context reported by the desktop shell.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureContext {
    pub app_name: Option<String>,
    pub window_title: Option<String>,
    pub url: Option<String>,
}

/// A normalised screenshot ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}
