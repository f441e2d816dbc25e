use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};

use crate::activity::ActivityAggregator;
use crate::models::{CaptureContext, InstantRequest};

use super::events::{AgentCommand, AgentStatus};

/// Cloneable front door to a running agent.
///
/// Input events go straight to the aggregator so high-rate hooks never wait
/// on the agent's queue.
#[derive(Clone)]
pub struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
    activity: ActivityAggregator,
}

impl AgentHandle {
    pub(crate) fn new(commands: mpsc::Sender<AgentCommand>, activity: ActivityAggregator) -> Self {
        Self { commands, activity }
    }

    async fn send(&self, command: AgentCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("agent is no longer running"))
    }

    pub async fn login(&self, user_id: impl Into<String>, token: impl Into<String>) -> Result<()> {
        self.send(AgentCommand::Login {
            user_id: user_id.into(),
            token: token.into(),
        })
        .await
    }

    pub async fn logout(&self) -> Result<()> {
        self.send(AgentCommand::Logout).await
    }

    pub async fn check_in(&self) -> Result<()> {
        self.send(AgentCommand::CheckIn).await
    }

    pub async fn check_out(&self) -> Result<()> {
        self.send(AgentCommand::CheckOut).await
    }

    pub async fn instant_request(&self, request: InstantRequest) -> Result<()> {
        self.send(AgentCommand::InstantRequest(request)).await
    }

    pub async fn update_context(&self, context: CaptureContext) -> Result<()> {
        self.send(AgentCommand::UpdateContext(context)).await
    }

    pub async fn status(&self) -> Result<AgentStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::Status(tx)).await?;
        rx.await.map_err(|_| anyhow!("agent dropped the status request"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(AgentCommand::Shutdown).await
    }

    pub fn activity(&self) -> &ActivityAggregator {
        &self.activity
    }
}
