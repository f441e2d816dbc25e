use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::Backend;
use crate::models::ConnectivityState;

use super::debounce::Debouncer;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Sole writer of [`ConnectivityState`]. Probes the backend for
/// reachability and keeps the desktop presence heartbeat alive, which is
/// what the backend treats as this desktop's live channel.
pub struct ConnectivityMonitor {
    backend: Arc<dyn Backend>,
    state_tx: watch::Sender<ConnectivityState>,
    online: Debouncer,
    channel: Debouncer,
    probe_interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(backend: Arc<dyn Backend>, probe_interval: Duration, required_observations: u32) -> Self {
        let (state_tx, _) = watch::channel(ConnectivityState::offline());
        Self {
            backend,
            state_tx,
            online: Debouncer::new(required_observations),
            channel: Debouncer::new(required_observations),
            probe_interval,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state_tx.subscribe()
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectivityState {
        *self.state_tx.borrow()
    }

    /// One probe cycle. Returns the new state if it changed.
    pub async fn observe(&mut self, token: Option<&str>) -> Option<ConnectivityState> {
        let reachable = match self.backend.probe().await {
            Ok(()) => true,
            Err(err) => {
                log_debug!("connectivity probe failed: {err}");
                false
            }
        };
        self.online.observe(reachable);

        let live = match token {
            Some(token) if self.online.value() => {
                match self.backend.report_presence(token, true).await {
                    Ok(()) => true,
                    Err(err) => {
                        log_debug!("presence heartbeat failed: {err}");
                        false
                    }
                }
            }
            _ => false,
        };
        if token.is_some() && self.online.value() {
            self.channel.observe(live);
        } else {
            self.channel.force(false);
        }

        self.publish()
    }

    /// Credentials went away or were rejected; the channel is down at once.
    pub async fn on_credentials_revoked(&mut self, previous_token: Option<&str>) -> Option<ConnectivityState> {
        if let Some(token) = previous_token {
            if self.online.value() {
                if let Err(err) = self.backend.report_presence(token, false).await {
                    log_debug!("failed to clear presence: {err}");
                }
            }
        }
        self.channel.force(false);
        self.publish()
    }

    fn publish(&mut self) -> Option<ConnectivityState> {
        let next = ConnectivityState {
            is_online: self.online.value(),
            is_channel_connected: self.online.value() && self.channel.value(),
        };
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
        if changed {
            log_info!(
                "connectivity changed: online={}, channel={}",
                next.is_online,
                next.is_channel_connected
            );
            return Some(next);
        }
        None
    }

    /// Probes until cancelled. `credentials` carries the current token, or
    /// `None` while logged out or suspended.
    pub async fn run(
        mut self,
        mut credentials: watch::Receiver<Option<String>>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut token = credentials.borrow_and_update().clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if token.is_some() {
                        self.on_credentials_revoked(token.as_deref()).await;
                    }
                    log_info!("connectivity monitor shutting down");
                    break;
                }
                changed = credentials.changed() => {
                    if changed.is_err() {
                        log_warn!("credential channel closed; connectivity monitor exiting");
                        break;
                    }
                    let next = credentials.borrow_and_update().clone();
                    if next.is_none() {
                        self.on_credentials_revoked(token.as_deref()).await;
                    }
                    token = next;
                }
                _ = ticker.tick() => {
                    self.observe(token.as_deref()).await;
                }
            }
        }
    }
}
