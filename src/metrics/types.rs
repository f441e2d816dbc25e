use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CaptureMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetrics {
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub mode: CaptureMode,
    pub capture_ms: u64,
    pub encode_ms: u64,
    pub deliver_ms: u64,
    pub image_bytes: usize,
    /// `delivered`, `queued` or `failed`.
    pub outcome: String,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_captures: Vec<CaptureMetrics>,
    pub capture_count: u64,
    pub capture_failure_count: u64,
    pub delivered_count: u64,
    pub queued_count: u64,
    pub permanent_failure_count: u64,
}
