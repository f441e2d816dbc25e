use serde::{Deserialize, Serialize};

/// Process-wide connectivity view. Written only by the connectivity monitor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub is_online: bool,
    pub is_channel_connected: bool,
}

impl ConnectivityState {
    #[cfg(test)]
    pub fn online() -> Self {
        Self {
            is_online: true,
            is_channel_connected: true,
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}
