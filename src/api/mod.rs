//! Seam between the agent and the HR backend.

mod http;
mod types;

pub use http::HttpBackend;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ClockSnapshot, InstantRequest, UploadPayload};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ApiError {
    #[error("unauthorized (HTTP {0})")]
    Unauthorized(u16),

    /// The request never got a response: DNS, connect, reset or timeout.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("request rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ApiError::Unauthorized(status),
            408 | 429 => ApiError::Server { status, body },
            500..=599 => ApiError::Server { status, body },
            _ => ApiError::Rejected { status, body },
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Server { .. })
    }
}

/// Calls the agent makes against the HR backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Cheap reachability probe used by the connectivity monitor.
    async fn probe(&self) -> Result<(), ApiError>;

    async fn clock_status(&self, token: &str) -> Result<ClockSnapshot, ApiError>;

    async fn check_in(&self, token: &str) -> Result<ClockSnapshot, ApiError>;

    async fn check_out(&self, token: &str) -> Result<ClockSnapshot, ApiError>;

    /// At most one outstanding instant-capture request for this user.
    async fn pending_instant_request(
        &self,
        token: &str,
    ) -> Result<Option<InstantRequest>, ApiError>;

    async fn upload_capture(&self, token: &str, payload: &UploadPayload) -> Result<(), ApiError>;

    /// Tells the backend whether this desktop session is live, so other
    /// clients know if an instant capture can be requested at all.
    async fn report_presence(&self, token: &str, connected: bool) -> Result<(), ApiError>;
}
