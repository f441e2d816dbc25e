use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated input counters for one capture window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBucket {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub keystroke_count: u64,
    pub mouse_click_count: u64,
    pub mouse_distance: f64,
}

impl ActivityBucket {
    #[cfg(test)]
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            window_start: at,
            window_end: at,
            keystroke_count: 0,
            mouse_click_count: 0,
            mouse_distance: 0.0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.keystroke_count == 0 && self.mouse_click_count == 0 && self.mouse_distance == 0.0
    }
}
