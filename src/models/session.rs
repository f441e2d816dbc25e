use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ClockState {
    #[default]
    LoggedOut,
    ClockedOut,
    ClockedIn,
}

impl ClockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockState::LoggedOut => "LoggedOut",
            ClockState::ClockedOut => "ClockedOut",
            ClockState::ClockedIn => "ClockedIn",
        }
    }
}

/// Per-user attendance session held by the desktop agent.
///
/// `is_clocked_in` only ever reflects a backend-confirmed event or an
/// authoritative poll; it is never set optimistically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub is_clocked_in: bool,
    pub check_in_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_clocked_in: false,
            check_in_at: None,
            check_out_at: None,
            last_polled_at: None,
        }
    }
}

/// Today's attendance as reported by the HR backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub is_clocked_in: bool,
    pub status: Option<String>,
    pub check_in: Option<DateTime<Utc>>,
    pub check_out: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}
