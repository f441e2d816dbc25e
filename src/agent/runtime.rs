use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityAggregator;
use crate::api::Backend;
use crate::capture::{normalize, CaptureScheduler, InstantDecision, ScreenCapturer};
use crate::config::AgentConfig;
use crate::db::Database;
use crate::delivery::{DeliveryPipeline, DrainReport, RetryPolicy};
use crate::error::AgentError;
use crate::metrics::{CaptureMetrics, MetricsCollector};
use crate::models::{
    CaptureContext, CaptureTask, ConnectivityState, DeliveryOutcome, InstantRequest,
    UploadPayload,
};
use crate::session::{SessionController, StateChange};

use super::events::{AgentCommand, AgentStatus, CaptureReport, Notification, WorkerEvent};
use super::handle::AgentHandle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Collaborators the agent is built from.
pub struct AgentParts {
    pub config: AgentConfig,
    pub backend: Arc<dyn Backend>,
    pub capturer: Arc<dyn ScreenCapturer>,
    pub db: Database,
    pub connectivity: watch::Receiver<ConnectivityState>,
    pub metrics: MetricsCollector,
}

/// The single logical actor for a desktop session.
///
/// Commands, timer ticks, connectivity changes and results of spawned work
/// all arrive through one `select!` loop and are handled one at a time.
/// Captures and outbox drains run as spawned jobs so a slow upload never
/// delays a clock-out; the scheduler's in-flight slot keeps captures
/// serialised.
pub struct Agent {
    config: AgentConfig,
    session: SessionController,
    scheduler: CaptureScheduler,
    activity: ActivityAggregator,
    pipeline: DeliveryPipeline,
    backend: Arc<dyn Backend>,
    capturer: Arc<dyn ScreenCapturer>,
    metrics: MetricsCollector,
    connectivity: watch::Receiver<ConnectivityState>,
    last_connectivity: ConnectivityState,
    credentials_tx: watch::Sender<Option<String>>,
    notifications: mpsc::UnboundedSender<Notification>,
    commands: mpsc::Receiver<AgentCommand>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    context: CaptureContext,
    drain_in_flight: bool,
    auth_failure_reported: bool,
}

impl Agent {
    pub fn new(
        parts: AgentParts,
        notifications: mpsc::UnboundedSender<Notification>,
    ) -> (Self, AgentHandle) {
        let AgentParts {
            config,
            backend,
            capturer,
            db,
            connectivity,
            metrics,
        } = parts;

        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (credentials_tx, _) = watch::channel(None);
        let activity = ActivityAggregator::new();
        let pipeline = DeliveryPipeline::new(
            db,
            backend.clone(),
            RetryPolicy::from_config(&config),
            connectivity.clone(),
        );
        let last_connectivity = *connectivity.borrow();

        let agent = Self {
            scheduler: CaptureScheduler::new(config.capture_interval(), config.instant_freshness()),
            session: SessionController::new(backend.clone()),
            activity: activity.clone(),
            pipeline,
            backend,
            capturer,
            metrics,
            connectivity,
            last_connectivity,
            credentials_tx,
            notifications,
            commands,
            worker_tx,
            worker_rx,
            context: CaptureContext::default(),
            drain_in_flight: false,
            auth_failure_reported: false,
            config,
        };
        (agent, AgentHandle::new(command_tx, activity))
    }

    /// Current token for other components, `None` while logged out or
    /// suspended. Written only by the agent.
    pub fn credentials(&self) -> watch::Receiver<Option<String>> {
        self.credentials_tx.subscribe()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut session_poll = tokio::time::interval(self.config.session_poll_interval());
        session_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut instant_poll = tokio::time::interval(self.config.instant_poll_interval());
        instant_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut drain_tick = tokio::time::interval(self.config.drain_interval());
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_open = true;

        log_info!("agent started");
        loop {
            let polling_instant = self.session.is_clocked_in() && self.session.token().is_some();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(event) = self.worker_rx.recv() => {
                    self.on_worker_event(event).await;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                changed = self.connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        log_warn!("connectivity monitor stopped; keeping last known state");
                        connectivity_open = false;
                        continue;
                    }
                    let state = *self.connectivity.borrow_and_update();
                    self.on_connectivity_changed(state).await;
                }
                _ = self.scheduler.tick() => {
                    self.on_interval_tick(Utc::now());
                }
                _ = session_poll.tick() => {
                    self.poll_session(Utc::now()).await;
                }
                _ = instant_poll.tick(), if polling_instant => {
                    self.poll_instant(Utc::now()).await;
                }
                _ = drain_tick.tick() => {
                    self.start_drain();
                }
            }
        }

        self.shutdown().await;
    }

    /// Returns `false` when the agent should stop.
    pub(crate) async fn handle_command(&mut self, command: AgentCommand) -> bool {
        let now = Utc::now();
        match command {
            AgentCommand::Login { user_id, token } => {
                let change = self.session.login(&user_id, &token);
                self.auth_failure_reported = false;
                self.publish_credentials();
                if let Some(change) = change {
                    self.on_session_change(change);
                }
                self.sync_scheduler();
                self.poll_session(now).await;
                self.start_drain();
            }
            AgentCommand::Logout => {
                let change = self.session.logout();
                self.auth_failure_reported = false;
                self.publish_credentials();
                if let Some(change) = change {
                    self.on_session_change(change);
                }
            }
            AgentCommand::CheckIn => match self.session.check_in(now).await {
                Ok(Some(change)) => self.on_session_change(change),
                Ok(None) => {}
                Err(err) => self.on_command_error("checkIn", err),
            },
            AgentCommand::CheckOut => match self.session.check_out(now).await {
                Ok(Some(change)) => self.on_session_change(change),
                Ok(None) => {}
                Err(err) => self.on_command_error("checkOut", err),
            },
            AgentCommand::InstantRequest(request) => self.handle_instant(request, now),
            AgentCommand::UpdateContext(context) => self.context = context,
            AgentCommand::Status(reply) => {
                let status = self.status().await;
                if reply.send(status).is_err() {
                    log_debug!("status requester went away");
                }
            }
            AgentCommand::Shutdown => return false,
        }
        true
    }

    pub(crate) fn on_interval_tick(&mut self, now: DateTime<Utc>) {
        if let Some(task) = self.scheduler.on_tick(now) {
            self.spawn_capture(task);
        }
    }

    pub(crate) async fn poll_session(&mut self, now: DateTime<Utc>) {
        if self.session.token().is_none() {
            return;
        }
        match self.session.poll(now).await {
            Ok(Some(change)) => self.on_session_change(change),
            Ok(None) => {}
            Err(err) if err.is_auth() => self.on_auth_failure(err.to_string()),
            Err(err) => log_warn!("session poll failed, keeping current state: {err}"),
        }
    }

    pub(crate) async fn poll_instant(&mut self, now: DateTime<Utc>) {
        if !self.session.is_clocked_in() {
            return;
        }
        let Some(token) = self.session.token().map(str::to_string) else {
            return;
        };
        match self.backend.pending_instant_request(&token).await {
            Ok(Some(request)) => self.handle_instant(request, now),
            Ok(None) => {}
            Err(err) if err.is_auth() => self.on_auth_failure(err.to_string()),
            Err(err) => log_debug!("instant request check failed: {err}"),
        }
    }

    pub(crate) async fn on_connectivity_changed(&mut self, state: ConnectivityState) {
        let previous = self.last_connectivity;
        if previous == state {
            return;
        }
        self.last_connectivity = state;
        self.notify(Notification::ConnectivityChanged {
            is_online: state.is_online,
            is_channel_connected: state.is_channel_connected,
        });

        if !previous.is_online && state.is_online {
            log_info!("back online; draining queued uploads");
            self.start_drain();
        }
        self.sync_scheduler();
    }

    /// Waits for the next spawned job to report back and handles it.
    pub(crate) async fn process_next_worker_event(&mut self) -> bool {
        match self.worker_rx.recv().await {
            Some(event) => {
                self.on_worker_event(event).await;
                true
            }
            None => false,
        }
    }

    async fn on_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::CaptureFinished { task, result } => {
                self.scheduler.complete(&task.task_id);
                self.on_capture_finished(&task, result).await;
                if self.session.is_clocked_in() {
                    if let Some(next) = self.scheduler.next_queued(Utc::now()) {
                        self.spawn_capture(next);
                    }
                }
            }
            WorkerEvent::DrainFinished(result) => {
                self.drain_in_flight = false;
                match result {
                    Ok(report) => {
                        self.report_backlog(&report).await;
                        if report.auth_failed {
                            self.on_auth_failure("upload rejected the session token".into());
                        }
                    }
                    Err(err) => log_error!("outbox drain failed: {err}"),
                }
            }
        }
    }

    async fn on_capture_finished(
        &mut self,
        task: &CaptureTask,
        result: Result<CaptureReport, AgentError>,
    ) {
        match result {
            Ok(report) => {
                let CaptureReport { delivery, metrics } = report;
                self.metrics.record_capture(metrics).await;
                self.report_backlog(&delivery.backlog).await;
                match delivery.outcome {
                    DeliveryOutcome::Delivered => {
                        log_info!("{} capture {} delivered", task.mode.as_str(), task.task_id);
                        self.notify(Notification::CaptureDelivered {
                            task_id: task.task_id.clone(),
                        });
                    }
                    DeliveryOutcome::Requeued {
                        attempts,
                        next_retry_at,
                    } => self.notify(Notification::CaptureQueued {
                        task_id: task.task_id.clone(),
                        attempts,
                        next_retry_at,
                    }),
                    DeliveryOutcome::PermanentlyFailed { reason } => {
                        self.notify(Notification::CapturePermanentlyFailed {
                            task_id: task.task_id.clone(),
                            reason: reason.as_str().into(),
                        })
                    }
                }
                if delivery.auth_failed {
                    self.on_auth_failure("upload rejected the session token".into());
                }
            }
            Err(AgentError::CaptureFailure {
                reason,
                needs_permission,
            }) => {
                self.metrics.record_capture_failure().await;
                log_warn!("capture {} failed: {reason}", task.task_id);
                self.notify(Notification::CaptureFailed {
                    reason,
                    needs_permission,
                });
            }
            Err(err) => log_error!("capture {} could not be stored: {err}", task.task_id),
        }
    }

    async fn report_backlog(&mut self, report: &DrainReport) {
        if report.is_empty() {
            return;
        }
        self.metrics
            .record_drain(report.delivered.len(), report.permanently_failed.len())
            .await;
        for task_id in &report.delivered {
            self.notify(Notification::CaptureDelivered {
                task_id: task_id.clone(),
            });
        }
        for (task_id, reason) in &report.permanently_failed {
            self.notify(Notification::CapturePermanentlyFailed {
                task_id: task_id.clone(),
                reason: reason.as_str().into(),
            });
        }
    }

    fn handle_instant(&mut self, request: InstantRequest, now: DateTime<Utc>) {
        if !self.session.is_clocked_in() {
            log_info!(
                "ignoring instant request {} while not clocked in",
                request.request_id
            );
            return;
        }
        let request_id = request.request_id.clone();
        match self.scheduler.handle_instant_request(request, now) {
            Ok(InstantDecision::Start(task)) => {
                log_info!("instant capture {request_id} started");
                self.spawn_capture(task);
            }
            Ok(InstantDecision::Queued) => {
                log_info!("instant capture {request_id} queued behind in-flight capture")
            }
            Ok(InstantDecision::Duplicate) => {
                log_debug!("instant request {request_id} already handled")
            }
            Err(err) => log_info!("{err}"),
        }
    }

    fn on_session_change(&mut self, change: StateChange) {
        log_info!(
            "session {} -> {}",
            change.from.as_str(),
            change.to.as_str()
        );
        self.notify(Notification::SessionChanged {
            state: change.to,
            user_id: self.session.credentials().map(|creds| creds.user_id.clone()),
            check_in_at: self.session.session().and_then(|session| session.check_in_at),
        });
        self.sync_scheduler();
    }

    fn on_command_error(&mut self, command: &str, err: AgentError) {
        if err.is_auth() {
            self.on_auth_failure(err.to_string());
        }
        log_warn!("{command} failed: {err}");
        self.notify(Notification::CommandFailed {
            command: command.into(),
            message: err.to_string(),
        });
    }

    /// Reported once per login; further rejections only keep things disarmed.
    fn on_auth_failure(&mut self, message: String) {
        self.session.suspend_auth();
        self.publish_credentials();
        self.sync_scheduler();
        if !self.auth_failure_reported {
            self.auth_failure_reported = true;
            log_error!("authentication failed: {message}");
            self.notify(Notification::AuthFailed { message });
        }
    }

    /// Arms the interval only while clocked in with usable credentials and,
    /// unless offline capture is allowed, while online.
    fn sync_scheduler(&mut self) {
        let clocked_in = self.session.is_clocked_in();
        let online = self.connectivity.borrow().is_online;
        let armed = clocked_in
            && self.session.token().is_some()
            && (online || self.config.capture_while_offline);

        if armed {
            self.scheduler.start();
        } else {
            self.scheduler.stop();
        }
        if !clocked_in {
            self.scheduler.clear_queue();
        }
    }

    fn publish_credentials(&self) {
        let token = self.session.token().map(str::to_string);
        self.credentials_tx.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            log_debug!("notification dropped; no listener");
        }
    }

    fn spawn_capture(&self, task: CaptureTask) {
        let job = CaptureJob {
            capturer: self.capturer.clone(),
            activity: self.activity.clone(),
            pipeline: self.pipeline.clone(),
            metrics: self.metrics.clone(),
            token: self.session.token().map(str::to_string),
            context: self.context.clone(),
            max_width: self.config.image_max_width,
            quality: self.config.jpeg_quality,
        };
        let worker_tx = self.worker_tx.clone();

        tokio::spawn(async move {
            let result = match tokio::spawn(job.run(task.clone())).await {
                Ok(result) => result,
                Err(err) => Err(AgentError::CaptureFailure {
                    reason: format!("capture job aborted: {err}"),
                    needs_permission: false,
                }),
            };
            if worker_tx
                .send(WorkerEvent::CaptureFinished { task, result })
                .is_err()
            {
                log_warn!("agent stopped before capture finished");
            }
        });
    }

    fn start_drain(&mut self) {
        if self.drain_in_flight || !self.connectivity.borrow().is_online {
            return;
        }
        let Some(token) = self.session.token().map(str::to_string) else {
            return;
        };
        self.drain_in_flight = true;
        let pipeline = self.pipeline.clone();
        let worker_tx = self.worker_tx.clone();

        tokio::spawn(async move {
            let result = pipeline.drain(&token, Utc::now()).await;
            if worker_tx.send(WorkerEvent::DrainFinished(result)).is_err() {
                log_debug!("agent stopped before drain finished");
            }
        });
    }

    async fn status(&self) -> AgentStatus {
        let pending_uploads = match self.pipeline.pending_count().await {
            Ok(count) => count,
            Err(err) => {
                log_warn!("failed to count pending uploads: {err}");
                0
            }
        };
        // Copied out so the watch read guard is released before awaiting.
        let connectivity = *self.connectivity.borrow();
        let metrics = self.metrics.get_snapshot().await;

        AgentStatus {
            state: self.session.state(),
            user_id: self.session.credentials().map(|creds| creds.user_id.clone()),
            check_in_at: self.session.session().and_then(|session| session.check_in_at),
            auth_suspended: self.session.is_auth_suspended(),
            connectivity,
            scheduler_armed: self.scheduler.is_armed(),
            capture_in_flight: self.scheduler.in_flight().map(|task| task.task_id.clone()),
            queued_instant_requests: self.scheduler.queued_len(),
            dropped_ticks: self.scheduler.dropped_ticks(),
            pending_uploads,
            open_activity: self.activity.peek(),
            metrics,
        }
    }

    /// Stops future captures and waits for work already started. Anything
    /// not delivered is already durable in the outbox.
    pub(crate) async fn shutdown(&mut self) {
        self.scheduler.stop();
        self.scheduler.clear_queue();
        if self.scheduler.in_flight().is_some() || self.drain_in_flight {
            log_info!("waiting for in-flight work before shutdown");
        }
        while self.scheduler.in_flight().is_some() || self.drain_in_flight {
            if !self.process_next_worker_event().await {
                break;
            }
        }
        log_info!("agent stopped");
    }
}

/// Everything one capture needs, detached from the agent so it can run as
/// its own task.
struct CaptureJob {
    capturer: Arc<dyn ScreenCapturer>,
    activity: ActivityAggregator,
    pipeline: DeliveryPipeline,
    metrics: MetricsCollector,
    token: Option<String>,
    context: CaptureContext,
    max_width: u32,
    quality: u8,
}

impl CaptureJob {
    async fn run(self, task: CaptureTask) -> Result<CaptureReport, AgentError> {
        let capture_start = Instant::now();
        let raw = self.capturer.capture().await?;
        let capture_ms = capture_start.elapsed().as_millis() as u64;

        let encode_start = Instant::now();
        let (max_width, quality) = (self.max_width, self.quality);
        let image = tokio::task::spawn_blocking(move || normalize(&raw, max_width, quality))
            .await
            .map_err(|err| encode_failure(format!("encoder task failed: {err}")))?
            .map_err(|err| encode_failure(format!("{err:#}")))?;
        let encode_ms = encode_start.elapsed().as_millis() as u64;
        let image_bytes = image.bytes.len();

        // The bucket closes only once there is a screenshot to pair it with;
        // activity from a failed capture rolls into the next one.
        let activity = self.activity.snapshot_and_reset();
        let captured_at = activity.window_end;
        let idle = activity.is_idle();
        let payload = UploadPayload::new(task.clone(), activity, self.context, captured_at, image);

        let deliver_start = Instant::now();
        let delivery = self
            .pipeline
            .deliver(self.token.as_deref(), payload, Utc::now())
            .await?;
        let deliver_ms = deliver_start.elapsed().as_millis() as u64;

        let system = self.metrics.sample_system_metrics().await;
        let outcome = match delivery.outcome {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Requeued { .. } => "queued",
            DeliveryOutcome::PermanentlyFailed { .. } => "failed",
        };
        log_debug!(
            "capture {} done (capture {capture_ms}ms, encode {encode_ms}ms, deliver {deliver_ms}ms, {image_bytes} bytes, idle: {idle})",
            task.task_id
        );

        Ok(CaptureReport {
            delivery,
            metrics: CaptureMetrics {
                timestamp: captured_at,
                task_id: task.task_id,
                mode: task.mode,
                capture_ms,
                encode_ms,
                deliver_ms,
                image_bytes,
                outcome: outcome.into(),
                cpu_percent: system.cpu_percent,
                memory_mb: system.memory_mb,
            },
        })
    }
}

fn encode_failure(reason: String) -> AgentError {
    AgentError::CaptureFailure {
        reason,
        needs_permission: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptureMode, ClockState};
    use crate::testing::{FakeBackend, FakeCapturer};
    use chrono::Duration;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        agent: Agent,
        handle: AgentHandle,
        backend: Arc<FakeBackend>,
        capturer: Arc<FakeCapturer>,
        online: watch::Sender<ConnectivityState>,
        notifications: mpsc::UnboundedReceiver<Notification>,
    }

    impl Harness {
        fn new(config: AgentConfig) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let db = Database::new(dir.path().join("punchcam.sqlite3")).unwrap();
            let backend = Arc::new(FakeBackend::new());
            let capturer = Arc::new(FakeCapturer::new());
            let (online, connectivity) = watch::channel(ConnectivityState::online());
            let (tx, notifications) = mpsc::unbounded_channel();
            let (agent, handle) = Agent::new(
                AgentParts {
                    config,
                    backend: backend.clone(),
                    capturer: capturer.clone(),
                    db,
                    connectivity,
                    metrics: MetricsCollector::new(),
                },
                tx,
            );
            Self {
                _dir: dir,
                agent,
                handle,
                backend,
                capturer,
                online,
                notifications,
            }
        }

        async fn clocked_in(config: AgentConfig) -> Self {
            let mut harness = Self::new(config);
            harness.command(AgentCommand::Login {
                user_id: "u1".into(),
                token: "tok".into(),
            })
            .await;
            harness.command(AgentCommand::CheckIn).await;
            assert_eq!(harness.agent.session.state(), ClockState::ClockedIn);
            harness.settle().await;
            harness
        }

        async fn command(&mut self, command: AgentCommand) {
            assert!(self.agent.handle_command(command).await);
        }

        async fn set_connectivity(&mut self, state: ConnectivityState) {
            self.online.send_replace(state);
            self.agent.on_connectivity_changed(state).await;
        }

        /// Handles worker events until no capture or drain is running.
        async fn settle(&mut self) {
            while self.agent.scheduler.in_flight().is_some() || self.agent.drain_in_flight {
                assert!(self.agent.process_next_worker_event().await);
            }
        }

        async fn tick_and_finish(&mut self) {
            self.agent.on_interval_tick(Utc::now());
            assert!(self.agent.scheduler.in_flight().is_some());
            self.settle().await;
        }

        fn notifications(&mut self) -> Vec<Notification> {
            let mut out = Vec::new();
            while let Ok(notification) = self.notifications.try_recv() {
                out.push(notification);
            }
            out
        }
    }

    #[tokio::test]
    async fn three_ticks_upload_three_disjoint_buckets() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        assert!(h.agent.scheduler.is_armed());

        for keystrokes in [3u64, 5, 7] {
            h.handle.activity().record_keystrokes(keystrokes);
            h.tick_and_finish().await;
        }

        let uploads = h.backend.uploads();
        assert_eq!(uploads.len(), 3);
        assert_eq!(
            uploads
                .iter()
                .map(|u| u.activity.keystroke_count)
                .collect::<Vec<_>>(),
            vec![3, 5, 7]
        );
        for pair in uploads.windows(2) {
            assert_eq!(pair[0].activity.window_end, pair[1].activity.window_start);
        }
        assert!(uploads.iter().all(|u| u.task.mode == CaptureMode::Interval));
    }

    #[tokio::test]
    async fn clock_out_mid_capture_lets_it_finish_and_stops_ticks() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;

        h.agent.on_interval_tick(Utc::now());
        h.backend.set_clocked_in(false);
        h.agent.poll_session(Utc::now()).await;
        assert_eq!(h.agent.session.state(), ClockState::ClockedOut);
        assert!(!h.agent.scheduler.is_armed());

        h.settle().await;
        assert_eq!(h.backend.uploads().len(), 1);

        h.agent.on_interval_tick(Utc::now());
        assert_eq!(h.capturer.calls(), 1);
        assert!(h.agent.scheduler.in_flight().is_none());
    }

    #[tokio::test]
    async fn offline_captures_drain_in_order_before_next_tick() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.set_connectivity(ConnectivityState::offline()).await;
        assert!(h.agent.scheduler.is_armed());

        h.tick_and_finish().await;
        h.tick_and_finish().await;
        assert_eq!(h.backend.upload_calls(), 0);
        let queued: Vec<String> = h
            .notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::CaptureQueued { task_id, .. } => Some(task_id),
                _ => None,
            })
            .collect();
        assert_eq!(queued.len(), 2);

        h.set_connectivity(ConnectivityState::online()).await;
        assert!(h.agent.drain_in_flight);
        h.settle().await;
        assert_eq!(h.backend.uploaded_task_ids(), queued);

        h.tick_and_finish().await;
        let uploaded = h.backend.uploaded_task_ids();
        assert_eq!(uploaded.len(), 3);
        assert_eq!(uploaded[..2], queued[..]);
    }

    #[tokio::test]
    async fn strict_online_gate_disarms_while_offline() {
        let config = AgentConfig {
            capture_while_offline: false,
            ..AgentConfig::default()
        };
        let mut h = Harness::clocked_in(config).await;
        h.set_connectivity(ConnectivityState::offline()).await;
        assert!(!h.agent.scheduler.is_armed());
        h.agent.on_interval_tick(Utc::now());
        assert_eq!(h.capturer.calls(), 0);

        h.set_connectivity(ConnectivityState::online()).await;
        assert!(h.agent.scheduler.is_armed());
    }

    #[tokio::test]
    async fn capture_failure_is_surfaced_and_next_tick_still_runs() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.capturer.fail_with("screen recording permission denied", true);
        h.handle.activity().record_keystrokes(4);

        h.tick_and_finish().await;
        let failed = h.notifications().into_iter().any(|n| {
            matches!(
                n,
                Notification::CaptureFailed {
                    needs_permission: true,
                    ..
                }
            )
        });
        assert!(failed);
        assert!(h.agent.scheduler.is_armed());

        h.capturer.succeed();
        h.handle.activity().record_keystrokes(1);
        h.tick_and_finish().await;
        let uploads = h.backend.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].activity.keystroke_count, 5);
    }

    #[tokio::test]
    async fn stale_instant_request_starts_nothing() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.command(AgentCommand::InstantRequest(InstantRequest {
            request_id: "r1".into(),
            requested_by: "manager".into(),
            timestamp: Utc::now() - Duration::minutes(3),
        }))
        .await;
        assert!(h.agent.scheduler.in_flight().is_none());
        assert_eq!(h.capturer.calls(), 0);
    }

    #[tokio::test]
    async fn polled_instant_request_is_captured_once() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.backend.set_pending_instant(Some(InstantRequest {
            request_id: "r1".into(),
            requested_by: "manager".into(),
            timestamp: Utc::now(),
        }));

        h.agent.poll_instant(Utc::now()).await;
        h.settle().await;
        h.agent.poll_instant(Utc::now()).await;
        assert!(h.agent.scheduler.in_flight().is_none());

        let uploads = h.backend.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].task.mode, CaptureMode::Instant);
        assert_eq!(uploads[0].task.requested_by.as_deref(), Some("manager"));
    }

    #[tokio::test]
    async fn instant_request_ignored_while_clocked_out() {
        let mut h = Harness::new(AgentConfig::default());
        h.command(AgentCommand::Login {
            user_id: "u1".into(),
            token: "tok".into(),
        })
        .await;
        h.command(AgentCommand::InstantRequest(InstantRequest {
            request_id: "r1".into(),
            requested_by: "manager".into(),
            timestamp: Utc::now(),
        }))
        .await;
        assert!(h.agent.scheduler.in_flight().is_none());
    }

    #[tokio::test]
    async fn auth_failure_disarms_and_revokes_credentials() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        let credentials = h.agent.credentials();
        assert_eq!(credentials.borrow().as_deref(), Some("tok"));

        h.backend.set_unauthorized(true);
        h.agent.poll_session(Utc::now()).await;

        assert!(!h.agent.scheduler.is_armed());
        assert!(credentials.borrow().is_none());
        assert_eq!(h.agent.session.state(), ClockState::ClockedIn);
        let auth_notices = h
            .notifications()
            .into_iter()
            .filter(|n| matches!(n, Notification::AuthFailed { .. }))
            .count();
        assert_eq!(auth_notices, 1);

        h.backend.set_unauthorized(false);
        h.command(AgentCommand::Login {
            user_id: "u1".into(),
            token: "fresh".into(),
        })
        .await;
        assert!(h.agent.scheduler.is_armed());
    }

    #[tokio::test]
    async fn failed_check_in_keeps_clocked_out_and_reports() {
        let mut h = Harness::new(AgentConfig::default());
        h.command(AgentCommand::Login {
            user_id: "u1".into(),
            token: "tok".into(),
        })
        .await;
        h.backend.fail_next_check_in();
        h.command(AgentCommand::CheckIn).await;

        assert_eq!(h.agent.session.state(), ClockState::ClockedOut);
        assert!(!h.agent.scheduler.is_armed());
        assert!(h
            .notifications()
            .iter()
            .any(|n| matches!(n, Notification::CommandFailed { command, .. } if command == "checkIn")));
    }

    #[tokio::test]
    async fn logout_disarms_and_clears_session() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.command(AgentCommand::Logout).await;
        assert_eq!(h.agent.session.state(), ClockState::LoggedOut);
        assert!(!h.agent.scheduler.is_armed());
        assert!(h.agent.credentials().borrow().is_none());
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_capture() {
        let mut h = Harness::clocked_in(AgentConfig::default()).await;
        h.agent.on_interval_tick(Utc::now());
        h.agent.shutdown().await;
        assert!(h.agent.scheduler.in_flight().is_none());
        assert_eq!(h.backend.uploads().len(), 1);
    }

    #[tokio::test]
    async fn run_loop_serves_commands_until_shutdown() {
        let h = Harness::new(AgentConfig::default());
        let handle = h.handle.clone();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.agent.run(cancel));

        handle.login("u1", "tok").await.unwrap();
        handle.check_in().await.unwrap();
        handle
            .update_context(CaptureContext {
                app_name: Some("Editor".into()),
                ..CaptureContext::default()
            })
            .await
            .unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.state, ClockState::ClockedIn);
        assert_eq!(status.user_id.as_deref(), Some("u1"));
        assert!(status.check_in_at.is_some());
        assert!(status.scheduler_armed);
        assert_eq!(status.pending_uploads, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(h.backend.is_clocked_in());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_tracks_connectivity_from_a_spawned_agent() {
        let h = Harness::new(AgentConfig::default());
        let handle = h.handle.clone();
        let cancel = CancellationToken::new();
        let run = h.agent.run(cancel.clone());
        assert_send(&run);
        let task = tokio::spawn(run);

        let status = handle.status().await.unwrap();
        assert!(status.connectivity.is_online);

        h.online.send_replace(ConnectivityState::offline());
        let status = handle.status().await.unwrap();
        assert!(!status.connectivity.is_online);

        cancel.cancel();
        task.await.unwrap();
    }
}
