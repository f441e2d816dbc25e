//! JSON-lines bridge to the desktop shell.
//!
//! The shell writes one message per line on our stdin and reads one
//! notification per line from our stdout. Diagnostics go to stderr so the
//! stdout stream stays parseable.

mod protocol;

pub use protocol::ShellMessage;

use anyhow::Result;
use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::agent::{AgentHandle, Notification};
use crate::models::{CaptureContext, InstantRequest};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// How the shell's input stream ended.
enum InputEnd {
    ShutdownRequested,
    Closed,
}

/// Feeds shell messages to the agent until `shutdown` or EOF. However the
/// input ends, read errors included, the agent is asked to stop.
pub async fn read_commands<R>(
    reader: R,
    handle: AgentHandle,
    notifications: mpsc::UnboundedSender<Notification>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    match forward_lines(reader, &handle, &notifications).await {
        Ok(InputEnd::ShutdownRequested) => Ok(()),
        Ok(InputEnd::Closed) => {
            log_info!("stdin closed; shutting down");
            handle.shutdown().await
        }
        Err(err) => {
            log_error!("reading shell input failed, shutting down: {err:#}");
            if let Err(send_err) = handle.shutdown().await {
                log_debug!("shutdown not delivered: {send_err}");
            }
            Err(err)
        }
    }
}

async fn forward_lines<R>(
    mut reader: R,
    handle: &AgentHandle,
    notifications: &mpsc::UnboundedSender<Notification>,
) -> Result<InputEnd>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(InputEnd::Closed);
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(err) => {
                log_warn!("ignoring shell line that is not UTF-8: {err}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let message = match ShellMessage::parse(line) {
            Ok(message) => message,
            Err(err) => {
                log_warn!("ignoring malformed shell message: {err}");
                continue;
            }
        };

        if !dispatch(message, handle, notifications).await? {
            return Ok(InputEnd::ShutdownRequested);
        }
    }
}

/// Returns `false` once the shell asked us to stop.
async fn dispatch(
    message: ShellMessage,
    handle: &AgentHandle,
    notifications: &mpsc::UnboundedSender<Notification>,
) -> Result<bool> {
    match message {
        ShellMessage::Login { user_id, token } => handle.login(user_id, token).await?,
        ShellMessage::Logout => handle.logout().await?,
        ShellMessage::CheckIn => handle.check_in().await?,
        ShellMessage::CheckOut => handle.check_out().await?,
        ShellMessage::InstantCapture {
            request_id,
            requested_by,
            timestamp,
        } => {
            handle
                .instant_request(InstantRequest {
                    request_id,
                    requested_by,
                    timestamp: timestamp.unwrap_or_else(Utc::now),
                })
                .await?
        }
        ShellMessage::Context {
            app_name,
            window_title,
            url,
        } => {
            handle
                .update_context(CaptureContext {
                    app_name,
                    window_title,
                    url,
                })
                .await?
        }
        ShellMessage::Keystroke { count: None } => handle.activity().record_keystroke(),
        ShellMessage::Keystroke { count: Some(count) } => {
            handle.activity().record_keystrokes(count)
        }
        ShellMessage::Click { count: None } => handle.activity().record_click(),
        ShellMessage::Click { count: Some(count) } => handle.activity().record_clicks(count),
        ShellMessage::MouseMove { distance } => handle.activity().record_mouse_move(distance),
        ShellMessage::Status => {
            let status = handle.status().await?;
            if notifications
                .send(Notification::Status(Box::new(status)))
                .is_err()
            {
                log_debug!("status reply dropped; writer stopped");
            }
        }
        ShellMessage::Shutdown => {
            log_info!("shutdown requested by shell");
            handle.shutdown().await?;
            return Ok(false);
        }
    }
    Ok(true)
}

/// Writes notifications as JSON lines until every sender is gone.
pub async fn write_notifications<W>(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    mut out: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(notification) = notifications.recv().await {
        let mut line = serde_json::to_vec(&notification)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }
    Ok(())
}
