use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::error::AgentError;
use crate::models::{CaptureTask, InstantRequest};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// How many recently seen instant request ids are remembered for dedup.
const RECENT_REQUEST_IDS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum InstantDecision {
    /// Nothing was in flight; start this task now.
    Start(CaptureTask),
    /// Waiting behind the capture currently in flight.
    Queued,
    /// Already seen this request id.
    Duplicate,
}

/// Decides when captures happen. Owns the repeating timer and enforces that
/// at most one capture is in flight.
pub struct CaptureScheduler {
    period: Duration,
    freshness: chrono::Duration,
    armed: bool,
    timer: Option<Interval>,
    in_flight: Option<CaptureTask>,
    queued: VecDeque<InstantRequest>,
    recent_request_ids: VecDeque<String>,
    dropped_ticks: u64,
}

impl CaptureScheduler {
    pub fn new(period: Duration, freshness: chrono::Duration) -> Self {
        Self {
            period,
            freshness,
            armed: false,
            timer: None,
            in_flight: None,
            queued: VecDeque::new(),
            recent_request_ids: VecDeque::new(),
            dropped_ticks: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn in_flight(&self) -> Option<&CaptureTask> {
        self.in_flight.as_ref()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks
    }

    /// Arms the interval. The first tick lands one full period from now.
    /// Starting an armed scheduler keeps its current cadence.
    pub fn start(&mut self) {
        if self.armed {
            return;
        }
        self.armed = true;
        self.timer = None;
        log_info!("capture scheduler armed ({}s interval)", self.period.as_secs());
    }

    /// Disarms immediately. A capture already in flight is left to finish.
    pub fn stop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        self.timer = None;
        log_info!("capture scheduler disarmed");
    }

    /// Drops instant requests waiting behind the in-flight capture.
    pub fn clear_queue(&mut self) {
        self.queued.clear();
    }

    /// Resolves on the next interval tick; never resolves while disarmed.
    pub async fn tick(&mut self) {
        if !self.armed {
            std::future::pending::<()>().await;
        }
        let period = self.period;
        let timer = self.timer.get_or_insert_with(|| {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        timer.tick().await;
    }

    /// Turns an interval tick into a task, unless disarmed or busy.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Option<CaptureTask> {
        if !self.armed {
            return None;
        }
        if let Some(current) = &self.in_flight {
            self.dropped_ticks += 1;
            log_debug!(
                "interval tick dropped; capture {} still in flight",
                current.task_id
            );
            return None;
        }
        let task = CaptureTask::interval(now);
        self.in_flight = Some(task.clone());
        Some(task)
    }

    pub fn handle_instant_request(
        &mut self,
        request: InstantRequest,
        now: DateTime<Utc>,
    ) -> Result<InstantDecision, AgentError> {
        self.check_fresh(&request, now)?;

        if self.recent_request_ids.contains(&request.request_id)
            || self
                .queued
                .iter()
                .any(|queued| queued.request_id == request.request_id)
        {
            return Ok(InstantDecision::Duplicate);
        }
        self.remember(&request.request_id);

        if self.in_flight.is_some() {
            self.queued.push_back(request);
            return Ok(InstantDecision::Queued);
        }

        let task = CaptureTask::instant(&request);
        self.in_flight = Some(task.clone());
        Ok(InstantDecision::Start(task))
    }

    /// Marks `task_id` finished. Unknown ids are ignored.
    pub fn complete(&mut self, task_id: &str) {
        if self
            .in_flight
            .as_ref()
            .is_some_and(|task| task.task_id == task_id)
        {
            self.in_flight = None;
        }
    }

    /// Pops the next still-fresh queued instant request and marks it in
    /// flight. Requests that went stale while waiting are discarded.
    pub fn next_queued(&mut self, now: DateTime<Utc>) -> Option<CaptureTask> {
        if self.in_flight.is_some() {
            return None;
        }
        while let Some(request) = self.queued.pop_front() {
            if let Err(err) = self.check_fresh(&request, now) {
                log_info!("dropping queued instant request: {err}");
                continue;
            }
            let task = CaptureTask::instant(&request);
            self.in_flight = Some(task.clone());
            return Some(task);
        }
        None
    }

    fn check_fresh(&self, request: &InstantRequest, now: DateTime<Utc>) -> Result<(), AgentError> {
        let age = request.age(now);
        if age > self.freshness {
            return Err(AgentError::stale(request.request_id.clone(), age));
        }
        Ok(())
    }

    fn remember(&mut self, request_id: &str) {
        if self.recent_request_ids.len() == RECENT_REQUEST_IDS {
            self.recent_request_ids.pop_front();
        }
        self.recent_request_ids.push_back(request_id.to_string());
    }
}
