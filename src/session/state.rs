use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ClockSnapshot, ClockState, Session};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub from: ClockState,
    pub to: ClockState,
}

/// Pure attendance state machine:
/// `LoggedOut -> ClockedOut <-> ClockedIn`, with logout from anywhere.
///
/// Local state only moves on backend confirmation or an authoritative poll.
/// A poll always wins over whatever the machine believed before.
#[derive(Debug, Default, Clone)]
pub struct SessionMachine {
    session: Option<Session>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ClockState {
        match &self.session {
            None => ClockState::LoggedOut,
            Some(session) if session.is_clocked_in => ClockState::ClockedIn,
            Some(_) => ClockState::ClockedOut,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_clocked_in(&self) -> bool {
        self.state() == ClockState::ClockedIn
    }

    /// Starts a session for `user_id`. Logging in as someone else replaces
    /// the previous session outright.
    pub fn login(&mut self, user_id: &str) -> Option<StateChange> {
        let from = self.state();
        match &self.session {
            Some(session) if session.user_id == user_id => None,
            _ => {
                self.session = Some(Session::new(user_id));
                change(from, self.state())
            }
        }
    }

    pub fn logout(&mut self) -> Option<StateChange> {
        let from = self.state();
        self.session = None;
        change(from, ClockState::LoggedOut)
    }

    pub fn confirm_check_in(&mut self, at: DateTime<Utc>) -> Option<StateChange> {
        let from = self.state();
        let session = self.session.as_mut()?;
        if session.is_clocked_in {
            return None;
        }
        session.is_clocked_in = true;
        session.check_in_at = Some(at);
        session.check_out_at = None;
        change(from, self.state())
    }

    pub fn confirm_check_out(&mut self, at: DateTime<Utc>) -> Option<StateChange> {
        let from = self.state();
        let session = self.session.as_mut()?;
        if !session.is_clocked_in {
            return None;
        }
        session.is_clocked_in = false;
        session.check_out_at = Some(at);
        change(from, self.state())
    }

    /// Reconciles with the backend's view of today. Ignored when logged out.
    pub fn apply_snapshot(
        &mut self,
        snapshot: &ClockSnapshot,
        now: DateTime<Utc>,
    ) -> Option<StateChange> {
        let from = self.state();
        let session = self.session.as_mut()?;
        session.is_clocked_in = snapshot.is_clocked_in;
        session.last_polled_at = Some(now);
        if snapshot.is_clocked_in {
            session.check_in_at = snapshot.check_in.or(session.check_in_at);
            session.check_out_at = None;
        } else {
            session.check_in_at = snapshot.check_in;
            session.check_out_at = snapshot.check_out;
        }
        change(from, self.state())
    }
}

fn change(from: ClockState, to: ClockState) -> Option<StateChange> {
    (from != to).then_some(StateChange { from, to })
}
