use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::AgentError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Anything below this is an error page or a blank frame, not a screen.
const MIN_IMAGE_BYTES: usize = 1024;

const PERMISSION_HINTS: &[&str] = &[
    "permission",
    "not authorized",
    "not permitted",
    "access denied",
    "screen recording",
];

/// Grabs the screen as encoded image bytes in any format `image` can read.
#[async_trait]
pub trait ScreenCapturer: Send + Sync {
    async fn capture(&self) -> Result<Vec<u8>, AgentError>;
}

/// Shells out to a platform screenshot tool that writes to a file path.
pub struct CommandCapturer {
    program: String,
    args: Vec<String>,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl CommandCapturer {
    pub fn new(config: &AgentConfig, scratch_dir: PathBuf) -> Result<Self, AgentError> {
        let Some((program, args)) = config.capture_command.split_first() else {
            return Err(AgentError::CaptureFailure {
                reason: "capture command is empty".into(),
                needs_permission: false,
            });
        };
        if !args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
            return Err(AgentError::CaptureFailure {
                reason: format!("capture command has no {OUTPUT_PLACEHOLDER} argument"),
                needs_permission: false,
            });
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            scratch_dir,
            timeout: config.capture_timeout(),
        })
    }

    async fn run(&self, output: &PathBuf) -> Result<Vec<u8>, AgentError> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|err| failure(format!("cannot create {}: {err}", self.scratch_dir.display())))?;

        let output_arg = output.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output_arg))
            .collect();

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| failure(format!("failed to launch {}: {err}", self.program)))?;

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                return Err(failure(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs()
                )))
            }
        };
        let result = result.map_err(|err| failure(format!("{} did not finish: {err}", self.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(AgentError::CaptureFailure {
                needs_permission: mentions_permission(&stderr),
                reason: format!("{} exited with {}: {stderr}", self.program, result.status),
            });
        }

        let bytes = tokio::fs::read(output)
            .await
            .map_err(|err| failure(format!("no screenshot written: {err}")))?;
        if bytes.len() < MIN_IMAGE_BYTES {
            return Err(failure(format!(
                "screenshot suspiciously small ({} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ScreenCapturer for CommandCapturer {
    async fn capture(&self) -> Result<Vec<u8>, AgentError> {
        let output = self.scratch_dir.join(format!("{}.png", Uuid::new_v4()));
        let result = self.run(&output).await;
        if let Err(err) = tokio::fs::remove_file(&output).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                log_warn!("failed to remove scratch screenshot {}: {err}", output.display());
            }
        }
        if let Ok(bytes) = &result {
            log_debug!("captured {} bytes via {}", bytes.len(), self.program);
        }
        result
    }
}

fn failure(reason: String) -> AgentError {
    AgentError::CaptureFailure {
        reason,
        needs_permission: false,
    }
}

fn mentions_permission(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    PERMISSION_HINTS.iter().any(|hint| lowered.contains(hint))
}
