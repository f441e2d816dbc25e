use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};

use crate::api::{ApiError, Backend};
use crate::db::Database;
use crate::error::AgentError;
use crate::models::{
    ConnectivityState, DeliveryOutcome, PendingUpload, PermanentFailureReason, UploadPayload,
};

use super::retry::{RetryDecision, RetryPolicy};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// What one pass over the outbox did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub delivered: Vec<String>,
    pub requeued: Vec<String>,
    pub permanently_failed: Vec<(String, PermanentFailureReason)>,
    /// The backend rejected the token; the pass stopped without counting it
    /// as an attempt.
    pub auth_failed: bool,
    /// A transport failure ended the pass early.
    pub interrupted: bool,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.requeued.is_empty() && self.permanently_failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResult {
    pub outcome: DeliveryOutcome,
    /// Older entries drained ahead of this capture.
    pub backlog: DrainReport,
    pub auth_failed: bool,
}

enum Attempt {
    Delivered,
    Requeued { attempts: u32, next_retry_at: DateTime<Utc> },
    Failed(PermanentFailureReason),
    AuthRejected,
}

struct PipelineInner {
    db: Database,
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
    connectivity: watch::Receiver<ConnectivityState>,
    // Serialises passes over the outbox so two drains never upload the
    // same entry.
    queue_lock: Mutex<()>,
}

/// Sends captures to the backend, keeping every one in the SQLite outbox
/// until it is acknowledged or given up on.
#[derive(Clone)]
pub struct DeliveryPipeline {
    inner: Arc<PipelineInner>,
}

impl DeliveryPipeline {
    pub fn new(
        db: Database,
        backend: Arc<dyn Backend>,
        policy: RetryPolicy,
        connectivity: watch::Receiver<ConnectivityState>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                db,
                backend,
                policy,
                connectivity,
                queue_lock: Mutex::new(()),
            }),
        }
    }

    fn is_online(&self) -> bool {
        self.inner.connectivity.borrow().is_online
    }

    pub async fn pending_count(&self) -> Result<u64, AgentError> {
        Ok(self.inner.db.count_pending_uploads().await?)
    }

    /// Hands a finished capture to the pipeline. The capture is stored
    /// before any network call, so it survives a crash mid-upload.
    pub async fn deliver(
        &self,
        token: Option<&str>,
        payload: UploadPayload,
        now: DateTime<Utc>,
    ) -> Result<DeliveryResult, AgentError> {
        let _guard = self.inner.queue_lock.lock().await;

        let entry = self
            .inner
            .db
            .insert_pending_upload(&payload, 0, now, now)
            .await?;

        let queued = DeliveryResult {
            outcome: DeliveryOutcome::Requeued {
                attempts: entry.attempts,
                next_retry_at: entry.next_retry_at,
            },
            backlog: DrainReport::default(),
            auth_failed: false,
        };

        let Some(token) = token else {
            log_info!("capture {} queued: no credentials", entry.task_id);
            return Ok(queued);
        };
        if !self.is_online() {
            log_info!("capture {} queued: offline", entry.task_id);
            return Ok(queued);
        }

        let backlog = self.drain_locked(token, now, Some(entry.id)).await?;
        if backlog.auth_failed || backlog.interrupted {
            let auth_failed = backlog.auth_failed;
            return Ok(DeliveryResult {
                backlog,
                auth_failed,
                ..queued
            });
        }

        let (attempt, _) = self.attempt(&entry, &payload, token, now).await?;
        let (outcome, auth_failed) = match attempt {
            Attempt::Delivered => (DeliveryOutcome::Delivered, false),
            Attempt::Requeued {
                attempts,
                next_retry_at,
            } => (
                DeliveryOutcome::Requeued {
                    attempts,
                    next_retry_at,
                },
                false,
            ),
            Attempt::Failed(reason) => (DeliveryOutcome::PermanentlyFailed { reason }, false),
            Attempt::AuthRejected => (queued.outcome, true),
        };

        Ok(DeliveryResult {
            outcome,
            backlog,
            auth_failed,
        })
    }

    /// Retries every due entry, oldest first.
    pub async fn drain(&self, token: &str, now: DateTime<Utc>) -> Result<DrainReport, AgentError> {
        let _guard = self.inner.queue_lock.lock().await;
        if !self.is_online() {
            return Ok(DrainReport {
                interrupted: true,
                ..DrainReport::default()
            });
        }
        self.drain_locked(token, now, None).await
    }

    async fn drain_locked(
        &self,
        token: &str,
        now: DateTime<Utc>,
        skip: Option<i64>,
    ) -> Result<DrainReport, AgentError> {
        let mut report = DrainReport::default();
        let entries = self.inner.db.list_pending_uploads().await?;

        for entry in entries {
            if Some(entry.id) == skip {
                continue;
            }

            if self.inner.policy.is_expired(entry.created_at, now) {
                self.give_up(&entry, PermanentFailureReason::MaxAge).await?;
                report
                    .permanently_failed
                    .push((entry.task_id, PermanentFailureReason::MaxAge));
                continue;
            }
            if entry.next_retry_at > now {
                continue;
            }

            let payload = match self.inner.db.load_pending_payload(entry.id).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(err) => {
                    // Left in place; the age bound removes it eventually.
                    log_error!("skipping unreadable pending upload {}: {err:#}", entry.id);
                    continue;
                }
            };

            let (attempt, transport) = self.attempt(&entry, &payload, token, now).await?;
            match attempt {
                Attempt::Delivered => report.delivered.push(entry.task_id),
                Attempt::Requeued { .. } => {
                    report.requeued.push(entry.task_id);
                    if transport {
                        report.interrupted = true;
                        break;
                    }
                }
                Attempt::Failed(reason) => report.permanently_failed.push((entry.task_id, reason)),
                Attempt::AuthRejected => {
                    report.auth_failed = true;
                    break;
                }
            }
        }

        if !report.is_empty() {
            log_info!(
                "outbox pass: {} delivered, {} requeued, {} abandoned",
                report.delivered.len(),
                report.requeued.len(),
                report.permanently_failed.len()
            );
        }
        Ok(report)
    }

    /// Uploads one stored entry and records the result in the outbox. The
    /// flag reports whether the failure was at the transport level.
    async fn attempt(
        &self,
        entry: &PendingUpload,
        payload: &UploadPayload,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(Attempt, bool), AgentError> {
        let err = match self.inner.backend.upload_capture(token, payload).await {
            Ok(()) => {
                self.inner.db.delete_pending_upload(entry.id).await?;
                log_debug!("capture {} delivered", entry.task_id);
                return Ok((Attempt::Delivered, false));
            }
            Err(err) => err,
        };

        if err.is_auth() {
            log_warn!("upload of {} rejected: {err}", entry.task_id);
            return Ok((Attempt::AuthRejected, false));
        }

        let transport = err.is_transport();
        let attempt = self.record_failure(entry, &err, now).await?;
        Ok((attempt, transport))
    }

    async fn record_failure(
        &self,
        entry: &PendingUpload,
        err: &ApiError,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AgentError> {
        match self
            .inner
            .policy
            .after_failure(entry.attempts, entry.created_at, now)
        {
            RetryDecision::Retry {
                attempts,
                next_retry_at,
            } => {
                let failure = AgentError::TransientDelivery(format!(
                    "{} (attempt {attempts}): {err}",
                    entry.task_id
                ));
                if err.is_transient() {
                    log_warn!("{failure}; retrying at {next_retry_at}");
                } else {
                    log_warn!("{failure}; payload rejected, retrying at {next_retry_at}");
                }
                self.inner
                    .db
                    .record_upload_failure(entry.id, attempts, next_retry_at, &err.to_string())
                    .await?;
                Ok(Attempt::Requeued {
                    attempts,
                    next_retry_at,
                })
            }
            RetryDecision::GiveUp(reason) => {
                self.give_up(entry, reason).await?;
                Ok(Attempt::Failed(reason))
            }
        }
    }

    async fn give_up(
        &self,
        entry: &PendingUpload,
        reason: PermanentFailureReason,
    ) -> Result<(), AgentError> {
        log_error!(
            "{}",
            AgentError::PermanentDelivery {
                task_id: entry.task_id.clone(),
                reason,
            }
        );
        self.inner.db.delete_pending_upload(entry.id).await?;
        Ok(())
    }
}
