use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ClockSnapshot, InstantRequest};

/// `GET /api/attendance/status` and the check-in/check-out responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockStatusResponse {
    #[serde(default)]
    pub is_clocked_in: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub check_in: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_out: Option<DateTime<Utc>>,
}

impl From<ClockStatusResponse> for ClockSnapshot {
    fn from(response: ClockStatusResponse) -> Self {
        Self {
            is_clocked_in: response.is_clocked_in,
            status: response.status,
            check_in: response.check_in,
            check_out: response.check_out,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantRequestDto {
    pub request_id: String,
    pub requested_by: String,
    pub timestamp: DateTime<Utc>,
}

impl From<InstantRequestDto> for InstantRequest {
    fn from(dto: InstantRequestDto) -> Self {
        Self {
            request_id: dto.request_id,
            requested_by: dto.requested_by,
            timestamp: dto.timestamp,
        }
    }
}

/// `GET /api/screenshots/instant/pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInstantResponse {
    #[serde(default)]
    pub request: Option<InstantRequestDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresenceRequest {
    pub desktop_connected: bool,
}
