use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::delivery::{DeliveryResult, DrainReport};
use crate::error::AgentError;
use crate::metrics::{CaptureMetrics, MetricsSnapshot};
use crate::models::{
    ActivityBucket, CaptureContext, CaptureTask, ClockState, ConnectivityState,
    InstantRequest,
};

/// Requests from the desktop shell, processed one at a time by the agent.
#[derive(Debug)]
pub enum AgentCommand {
    Login { user_id: String, token: String },
    Logout,
    CheckIn,
    CheckOut,
    /// Pushed over the shell's realtime channel.
    InstantRequest(InstantRequest),
    UpdateContext(CaptureContext),
    Status(oneshot::Sender<AgentStatus>),
    Shutdown,
}

/// Everything the shell is told, one JSON line each.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    SessionChanged {
        state: ClockState,
        user_id: Option<String>,
        check_in_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    CaptureDelivered { task_id: String },
    #[serde(rename_all = "camelCase")]
    CaptureQueued {
        task_id: String,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    CapturePermanentlyFailed { task_id: String, reason: String },
    #[serde(rename_all = "camelCase")]
    CaptureFailed {
        reason: String,
        needs_permission: bool,
    },
    #[serde(rename_all = "camelCase")]
    AuthFailed { message: String },
    #[serde(rename_all = "camelCase")]
    ConnectivityChanged {
        is_online: bool,
        is_channel_connected: bool,
    },
    #[serde(rename_all = "camelCase")]
    CommandFailed { command: String, message: String },
    Status(Box<AgentStatus>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub state: ClockState,
    pub user_id: Option<String>,
    pub check_in_at: Option<DateTime<Utc>>,
    pub auth_suspended: bool,
    pub connectivity: ConnectivityState,
    pub scheduler_armed: bool,
    pub capture_in_flight: Option<String>,
    pub queued_instant_requests: usize,
    pub dropped_ticks: u64,
    pub pending_uploads: u64,
    pub open_activity: ActivityBucket,
    pub metrics: MetricsSnapshot,
}

/// Results of work the agent spawned, fed back into its queue.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    CaptureFinished {
        task: CaptureTask,
        result: Result<CaptureReport, AgentError>,
    },
    DrainFinished(Result<DrainReport, AgentError>),
}

#[derive(Debug)]
pub(crate) struct CaptureReport {
    pub delivery: DeliveryResult,
    pub metrics: CaptureMetrics,
}
