use std::sync::Arc;

use chrono::{DateTime, Utc};
use crate::{
    api::Backend,
    error::AgentError,
    models::{ClockState, Credentials, Session},
};

use super::state::{SessionMachine, StateChange};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Single writer of the attendance session. Talks to the backend and only
/// moves the state machine on confirmation.
pub struct SessionController {
    machine: SessionMachine,
    backend: Arc<dyn Backend>,
    credentials: Option<Credentials>,
    auth_suspended: bool,
}

impl SessionController {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            machine: SessionMachine::new(),
            backend,
            credentials: None,
            auth_suspended: false,
        }
    }

    pub fn state(&self) -> ClockState {
        self.machine.state()
    }

    pub fn session(&self) -> Option<&Session> {
        self.machine.session()
    }

    pub fn is_clocked_in(&self) -> bool {
        self.machine.is_clocked_in()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Token usable for backend calls; `None` while logged out or after the
    /// backend rejected it.
    pub fn token(&self) -> Option<&str> {
        if self.auth_suspended {
            return None;
        }
        self.credentials.as_ref().map(|creds| creds.token.as_str())
    }

    pub fn is_auth_suspended(&self) -> bool {
        self.auth_suspended
    }

    /// Called when any backend call (uploads included) rejects the token.
    pub fn suspend_auth(&mut self) {
        if self.credentials.is_some() && !self.auth_suspended {
            log_warn!("Backend rejected credentials; suspending session polling until re-login");
            self.auth_suspended = true;
        }
    }

    pub fn login(&mut self, user_id: &str, token: &str) -> Option<StateChange> {
        self.credentials = Some(Credentials {
            user_id: user_id.to_string(),
            token: token.to_string(),
        });
        self.auth_suspended = false;
        log_info!("User {user_id} logged in");
        self.machine.login(user_id)
    }

    pub fn logout(&mut self) -> Option<StateChange> {
        if let Some(creds) = self.credentials.take() {
            log_info!("User {} logged out", creds.user_id);
        }
        self.auth_suspended = false;
        self.machine.logout()
    }

    pub async fn check_in(&mut self, now: DateTime<Utc>) -> Result<Option<StateChange>, AgentError> {
        let token = self.require_token()?;
        let snapshot = match self.backend.check_in(&token).await {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.on_api_error(err)),
        };
        if !snapshot.is_clocked_in {
            return Err(AgentError::Backend(
                "check-in was not confirmed by the backend".into(),
            ));
        }
        Ok(self
            .machine
            .confirm_check_in(snapshot.check_in.unwrap_or(now)))
    }

    pub async fn check_out(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<StateChange>, AgentError> {
        let token = self.require_token()?;
        let snapshot = match self.backend.check_out(&token).await {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.on_api_error(err)),
        };
        if snapshot.is_clocked_in {
            return Err(AgentError::Backend(
                "check-out was not confirmed by the backend".into(),
            ));
        }
        Ok(self
            .machine
            .confirm_check_out(snapshot.check_out.unwrap_or(now)))
    }

    /// Reconciles with the backend. A failed poll never changes state.
    pub async fn poll(&mut self, now: DateTime<Utc>) -> Result<Option<StateChange>, AgentError> {
        let Some(token) = self.token().map(str::to_string) else {
            return Ok(None);
        };
        match self.backend.clock_status(&token).await {
            Ok(snapshot) => Ok(self.machine.apply_snapshot(&snapshot, now)),
            Err(err) => Err(self.on_api_error(err)),
        }
    }

    fn require_token(&self) -> Result<String, AgentError> {
        self.token()
            .map(str::to_string)
            .ok_or_else(|| AgentError::AuthFailure("not logged in".into()))
    }

    fn on_api_error(&mut self, err: crate::api::ApiError) -> AgentError {
        if err.is_auth() {
            self.suspend_auth();
        }
        AgentError::from_api(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[tokio::test]
    async fn check_in_waits_for_confirmation() {
        let backend = Arc::new(FakeBackend::new());
        let mut controller = SessionController::new(backend.clone());
        controller.login("u1", "tok");

        backend.fail_next_check_in();
        assert!(controller.check_in(Utc::now()).await.is_err());
        assert_eq!(controller.state(), ClockState::ClockedOut);

        let change = controller.check_in(Utc::now()).await.unwrap().unwrap();
        assert_eq!(change.to, ClockState::ClockedIn);
        assert!(backend.is_clocked_in());
    }

    #[tokio::test]
    async fn poll_failure_keeps_state() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_clocked_in(true);
        let mut controller = SessionController::new(backend.clone());
        controller.login("u1", "tok");
        controller.poll(Utc::now()).await.unwrap();
        assert!(controller.is_clocked_in());

        backend.set_reachable(false);
        assert!(controller.poll(Utc::now()).await.is_err());
        assert!(controller.is_clocked_in());
    }

    #[tokio::test]
    async fn auth_failure_suspends_polling_until_login() {
        let backend = Arc::new(FakeBackend::new());
        let mut controller = SessionController::new(backend.clone());
        controller.login("u1", "tok");

        backend.set_unauthorized(true);
        let err = controller.poll(Utc::now()).await.unwrap_err();
        assert!(err.is_auth());
        assert!(controller.is_auth_suspended());
        assert!(controller.token().is_none());

        backend.set_unauthorized(false);
        let calls = backend.status_calls();
        assert!(controller.poll(Utc::now()).await.unwrap().is_none());
        assert_eq!(backend.status_calls(), calls);

        controller.login("u1", "fresh");
        assert!(controller.token().is_some());
    }
}
