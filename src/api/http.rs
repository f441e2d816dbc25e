use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;

use super::types::{ClockStatusResponse, PendingInstantResponse, PresenceRequest};
use super::{ApiError, Backend};
use crate::config::AgentConfig;
use crate::models::{ClockSnapshot, InstantRequest, UploadPayload};

const HEALTH_PATH: &str = "/api/health";
const STATUS_PATH: &str = "/api/attendance/status";
const CHECK_IN_PATH: &str = "/api/attendance/check-in";
const CHECK_OUT_PATH: &str = "/api/attendance/check-out";
const INSTANT_PENDING_PATH: &str = "/api/screenshots/instant/pending";
const UPLOAD_PATH: &str = "/api/screenshots/upload";
const PRESENCE_PATH: &str = "/api/desktop/presence";

/// `Backend` over HTTPS with bearer-token auth.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout().min(std::time::Duration::from_secs(10)))
            .user_agent(concat!("punchcam/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(status.as_u16(), body))
}

#[async_trait]
impl Backend for HttpBackend {
    async fn probe(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.url(HEALTH_PATH))
            .send()
            .await
            .map_err(transport)?;
        // Any HTTP answer proves reachability; only 5xx counts as down.
        if response.status().is_server_error() {
            return Err(ApiError::from_status(
                response.status().as_u16(),
                String::new(),
            ));
        }
        Ok(())
    }

    async fn clock_status(&self, token: &str) -> Result<ClockSnapshot, ApiError> {
        let response = self
            .client
            .get(self.url(STATUS_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        Self::json::<ClockStatusResponse>(response)
            .await
            .map(ClockSnapshot::from)
    }

    async fn check_in(&self, token: &str) -> Result<ClockSnapshot, ApiError> {
        let response = self
            .client
            .post(self.url(CHECK_IN_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        Self::json::<ClockStatusResponse>(response)
            .await
            .map(ClockSnapshot::from)
    }

    async fn check_out(&self, token: &str) -> Result<ClockSnapshot, ApiError> {
        let response = self
            .client
            .post(self.url(CHECK_OUT_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        Self::json::<ClockStatusResponse>(response)
            .await
            .map(ClockSnapshot::from)
    }

    async fn pending_instant_request(
        &self,
        token: &str,
    ) -> Result<Option<InstantRequest>, ApiError> {
        let response = self
            .client
            .get(self.url(INSTANT_PENDING_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport)?;
        let parsed = Self::json::<PendingInstantResponse>(response).await?;
        Ok(parsed.request.map(InstantRequest::from))
    }

    async fn upload_capture(&self, token: &str, payload: &UploadPayload) -> Result<(), ApiError> {
        let metadata = serde_json::to_string(&payload.metadata)
            .map_err(|err| ApiError::Decode(err.to_string()))?;
        let extension = match payload.metadata.image_mime.as_str() {
            "image/png" => "png",
            _ => "jpg",
        };

        let image = multipart::Part::bytes(payload.image.clone())
            .file_name(format!("capture-{}.{}", payload.task_id(), extension))
            .mime_str(&payload.metadata.image_mime)
            .map_err(|err| ApiError::Decode(err.to_string()))?;

        let form = multipart::Form::new()
            .text("taskId", payload.task_id().to_string())
            .text("mode", payload.metadata.task.mode.as_str())
            .text("metadata", metadata)
            .part("screenshot", image);

        let response = self
            .client
            .post(self.url(UPLOAD_PATH))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await.map(|_| ())
    }

    async fn report_presence(&self, token: &str, connected: bool) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(PRESENCE_PATH))
            .bearer_auth(token)
            .json(&PresenceRequest {
                desktop_connected: connected,
            })
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = AgentConfig {
            server_url: "https://hr.example.com/".into(),
            ..AgentConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(
            backend.url(STATUS_PATH),
            "https://hr.example.com/api/attendance/status"
        );
    }
}
