use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

const MIN_PROBE_SECS: u64 = 2;

/// Tuning knobs for the capture agent. Every field has a default so a
/// partial `config.json` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub server_url: String,
    pub capture_interval_secs: u64,
    pub instant_freshness_secs: u64,
    pub session_poll_interval_secs: u64,
    pub instant_poll_interval_secs: u64,
    pub retry_base_secs: u64,
    pub retry_max_backoff_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_max_age_secs: u64,
    pub drain_interval_secs: u64,
    pub capture_while_offline: bool,
    pub connectivity_probe_secs: u64,
    pub connectivity_stable_observations: u32,
    pub request_timeout_secs: u64,
    pub capture_timeout_secs: u64,
    pub capture_command: Vec<String>,
    pub image_max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".into(),
            capture_interval_secs: 60,
            instant_freshness_secs: 120,
            session_poll_interval_secs: 60,
            instant_poll_interval_secs: 10,
            retry_base_secs: 5,
            retry_max_backoff_secs: 300,
            retry_max_attempts: 10,
            retry_max_age_secs: 24 * 60 * 60,
            drain_interval_secs: 30,
            capture_while_offline: true,
            connectivity_probe_secs: 5,
            connectivity_stable_observations: 2,
            request_timeout_secs: 20,
            capture_timeout_secs: 15,
            capture_command: default_capture_command(),
            image_max_width: 1920,
            jpeg_quality: 70,
        }
    }
}

fn default_capture_command() -> Vec<String> {
    let parts: &[&str] = if cfg!(target_os = "macos") {
        &["screencapture", "-x", "-t", "png", "{output}"]
    } else if cfg!(target_os = "windows") {
        &[
            "powershell",
            "-NoProfile",
            "-File",
            "capture-screen.ps1",
            "{output}",
        ]
    } else {
        &["grim", "{output}"]
    };
    parts.iter().map(|part| part.to_string()).collect()
}

impl AgentConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_secs(self.capture_interval_secs.max(1))
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_secs(self.session_poll_interval_secs.max(1))
    }

    pub fn instant_poll_interval(&self) -> Duration {
        Duration::from_secs(self.instant_poll_interval_secs.max(1))
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs.max(1))
    }

    /// Probing faster than a couple of seconds only thrashes the scheduler.
    pub fn connectivity_probe_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_probe_secs.max(MIN_PROBE_SECS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs.max(1))
    }

    pub fn instant_freshness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.instant_freshness_secs as i64)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PUNCHCAM_SERVER_URL") {
            if !url.trim().is_empty() {
                self.server_url = url.trim().trim_end_matches('/').to_string();
            }
        }
    }
}

/// Resolves where the agent keeps its database and config.
pub fn resolve_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("PUNCHCAM_DATA_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }

    dirs::data_dir()
        .map(|dir| dir.join("punchcam"))
        .context("no platform data directory; set PUNCHCAM_DATA_DIR")
}

pub fn debug_enabled() -> bool {
    std::env::var("PUNCHCAM_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<AgentConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Config at {} is invalid ({err}); falling back to defaults",
                    path.display()
                );
                AgentConfig::default()
            })
        } else {
            AgentConfig::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AgentConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: AgentConfig) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    fn persist(&self, data: &AgentConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}
