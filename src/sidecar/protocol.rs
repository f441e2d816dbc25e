use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One line from the desktop shell.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShellMessage {
    #[serde(rename_all = "camelCase")]
    Login { user_id: String, token: String },
    Logout,
    CheckIn,
    CheckOut,
    /// Relayed from the shell's realtime channel. A missing timestamp means
    /// the request was just received.
    #[serde(rename_all = "camelCase")]
    InstantCapture {
        request_id: String,
        requested_by: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    Context {
        #[serde(default)]
        app_name: Option<String>,
        #[serde(default)]
        window_title: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    /// A single event, or a host-side batch when `count` is present.
    Keystroke {
        #[serde(default)]
        count: Option<u64>,
    },
    Click {
        #[serde(default)]
        count: Option<u64>,
    },
    MouseMove { distance: f64 },
    Status,
    Shutdown,
}

impl ShellMessage {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
