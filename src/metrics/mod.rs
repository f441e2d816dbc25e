mod types;

pub use types::{CaptureMetrics, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_CAPTURES: usize = 20;

/// Per-capture timings plus this process's CPU/RAM, reported through the
/// `status` command.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_captures: VecDeque<CaptureMetrics>,
    capture_count: u64,
    capture_failure_count: u64,
    delivered_count: u64,
    queued_count: u64,
    permanent_failure_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsState {
    fn sample(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_captures: VecDeque::with_capacity(MAX_RECENT_CAPTURES),
                capture_count: 0,
                capture_failure_count: 0,
                delivered_count: 0,
                queued_count: 0,
                permanent_failure_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        self.inner.lock().await.sample()
    }

    pub async fn record_capture(&self, metrics: CaptureMetrics) {
        let mut state = self.inner.lock().await;

        state.capture_count += 1;
        match metrics.outcome.as_str() {
            "delivered" => state.delivered_count += 1,
            "queued" => state.queued_count += 1,
            _ => state.permanent_failure_count += 1,
        }

        if state.recent_captures.len() == MAX_RECENT_CAPTURES {
            state.recent_captures.pop_front();
        }
        state.recent_captures.push_back(metrics);
    }

    pub async fn record_capture_failure(&self) {
        self.inner.lock().await.capture_failure_count += 1;
    }

    /// Counts outcomes of background outbox passes.
    pub async fn record_drain(&self, delivered: usize, permanently_failed: usize) {
        let mut state = self.inner.lock().await;
        state.delivered_count += delivered as u64;
        state.permanent_failure_count += permanently_failed as u64;
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.sample();

        MetricsSnapshot {
            system,
            recent_captures: state.recent_captures.iter().cloned().collect(),
            capture_count: state.capture_count,
            capture_failure_count: state.capture_failure_count,
            delivered_count: state.delivered_count,
            queued_count: state.queued_count,
            permanent_failure_count: state.permanent_failure_count,
        }
    }
}
