//! Failure kinds surfaced by the capture agent.
//!
//! Every component converts its internal failures into one of these at its
//! boundary so the agent loop can decide what the user sees. Only
//! permission problems, auth problems and permanent delivery failures reach
//! the desktop shell; everything else is logged and self-heals.

use chrono::Duration;
use thiserror::Error;

use crate::api::ApiError;
use crate::models::PermanentFailureReason;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("authentication rejected: {0}")]
    AuthFailure(String),

    #[error("instant request {request_id} is stale ({age_secs}s old)")]
    StaleRequest { request_id: String, age_secs: i64 },

    /// A non-upload backend call failed (poll, check-in, instant check).
    /// State is left untouched and the call is retried on its own cadence.
    #[error("backend unavailable: {0}")]
    Backend(String),

    #[error("delivery failed, will retry: {0}")]
    TransientDelivery(String),

    #[error("delivery of {task_id} abandoned: {}", reason.as_str())]
    PermanentDelivery {
        task_id: String,
        reason: PermanentFailureReason,
    },

    #[error("screen capture failed: {reason}")]
    CaptureFailure {
        reason: String,
        needs_permission: bool,
    },

    #[error("local storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl AgentError {
    pub fn stale(request_id: impl Into<String>, age: Duration) -> Self {
        AgentError::StaleRequest {
            request_id: request_id.into(),
            age_secs: age.num_seconds(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, AgentError::AuthFailure(_))
    }

    /// Maps a failed non-upload backend call.
    pub fn from_api(err: ApiError) -> Self {
        if err.is_auth() {
            AgentError::AuthFailure(err.to_string())
        } else {
            AgentError::Backend(err.to_string())
        }
    }
}
