//! In-memory stand-ins for the backend and the screen, shared by unit tests.

use std::io::Cursor;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::api::{ApiError, Backend};
use crate::capture::ScreenCapturer;
use crate::error::AgentError;
use crate::models::{
    ActivityBucket, CaptureContext, CaptureTask, ClockSnapshot, EncodedImage, InstantRequest,
    UploadMetadata, UploadPayload,
};

#[derive(Default)]
struct BackendState {
    unreachable: bool,
    unauthorized: bool,
    clocked_in: bool,
    check_in_at: Option<DateTime<Utc>>,
    check_out_at: Option<DateTime<Utc>>,
    fail_next_check_in: bool,
    status_calls: usize,
    upload_failure: Option<ApiError>,
    upload_calls: usize,
    uploaded: Vec<UploadMetadata>,
    presence: Vec<bool>,
    pending_instant: Option<InstantRequest>,
}

pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.lock().unauthorized = unauthorized;
    }

    /// Server-side attendance changed, e.g. from the web app.
    pub fn set_clocked_in(&self, clocked_in: bool) {
        let mut state = self.lock();
        state.clocked_in = clocked_in;
        if clocked_in {
            state.check_in_at = Some(Utc::now());
            state.check_out_at = None;
        } else {
            state.check_out_at = Some(Utc::now());
        }
    }

    pub fn is_clocked_in(&self) -> bool {
        self.lock().clocked_in
    }

    pub fn fail_next_check_in(&self) {
        self.lock().fail_next_check_in = true;
    }

    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    pub fn fail_uploads(&self, err: ApiError) {
        self.lock().upload_failure = Some(err);
    }

    pub fn accept_uploads(&self) {
        self.lock().upload_failure = None;
    }

    pub fn upload_calls(&self) -> usize {
        self.lock().upload_calls
    }

    /// Task ids in the order the backend accepted them.
    pub fn uploaded_task_ids(&self) -> Vec<String> {
        self.lock()
            .uploaded
            .iter()
            .map(|metadata| metadata.task.task_id.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<UploadMetadata> {
        self.lock().uploaded.clone()
    }

    pub fn presence_reports(&self) -> Vec<bool> {
        self.lock().presence.clone()
    }

    pub fn set_pending_instant(&self, request: Option<InstantRequest>) {
        self.lock().pending_instant = request;
    }

    fn gate(&self) -> Result<MutexGuard<'_, BackendState>, ApiError> {
        let state = self.lock();
        if state.unreachable {
            return Err(ApiError::Transport("connection refused".into()));
        }
        if state.unauthorized {
            return Err(ApiError::Unauthorized(401));
        }
        Ok(state)
    }

    fn snapshot(state: &BackendState) -> ClockSnapshot {
        ClockSnapshot {
            is_clocked_in: state.clocked_in,
            status: Some(if state.clocked_in { "present" } else { "absent" }.into()),
            check_in: state.check_in_at,
            check_out: state.check_out_at,
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn probe(&self) -> Result<(), ApiError> {
        if self.lock().unreachable {
            return Err(ApiError::Transport("connection refused".into()));
        }
        Ok(())
    }

    async fn clock_status(&self, _token: &str) -> Result<ClockSnapshot, ApiError> {
        self.lock().status_calls += 1;
        let state = self.gate()?;
        Ok(Self::snapshot(&state))
    }

    async fn check_in(&self, _token: &str) -> Result<ClockSnapshot, ApiError> {
        let mut state = self.gate()?;
        if std::mem::take(&mut state.fail_next_check_in) {
            return Err(ApiError::Server {
                status: 503,
                body: "try again".into(),
            });
        }
        state.clocked_in = true;
        state.check_in_at = Some(Utc::now());
        state.check_out_at = None;
        Ok(Self::snapshot(&state))
    }

    async fn check_out(&self, _token: &str) -> Result<ClockSnapshot, ApiError> {
        let mut state = self.gate()?;
        state.clocked_in = false;
        state.check_out_at = Some(Utc::now());
        Ok(Self::snapshot(&state))
    }

    async fn pending_instant_request(
        &self,
        _token: &str,
    ) -> Result<Option<InstantRequest>, ApiError> {
        let state = self.gate()?;
        Ok(state.pending_instant.clone())
    }

    async fn upload_capture(&self, _token: &str, payload: &UploadPayload) -> Result<(), ApiError> {
        self.lock().upload_calls += 1;
        let mut state = self.gate()?;
        if let Some(err) = state.upload_failure.clone() {
            return Err(err);
        }
        state.uploaded.push(payload.metadata.clone());
        Ok(())
    }

    async fn report_presence(&self, _token: &str, connected: bool) -> Result<(), ApiError> {
        let mut state = self.gate()?;
        state.presence.push(connected);
        Ok(())
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([240, 240, 240, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub struct FakeCapturer {
    failure: Mutex<Option<(String, bool)>>,
    calls: Mutex<usize>,
}

impl FakeCapturer {
    pub fn new() -> Self {
        Self {
            failure: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }

    pub fn fail_with(&self, reason: &str, needs_permission: bool) {
        *self.failure.lock().unwrap() = Some((reason.to_string(), needs_permission));
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ScreenCapturer for FakeCapturer {
    async fn capture(&self) -> Result<Vec<u8>, AgentError> {
        *self.calls.lock().unwrap() += 1;
        if let Some((reason, needs_permission)) = self.failure.lock().unwrap().clone() {
            return Err(AgentError::CaptureFailure {
                reason,
                needs_permission,
            });
        }
        Ok(png_bytes(64, 48))
    }
}

/// A ready-to-send capture taken at `at`.
pub fn sample_payload(at: DateTime<Utc>) -> UploadPayload {
    UploadPayload::new(
        CaptureTask::interval(at),
        ActivityBucket::empty(at),
        CaptureContext::default(),
        at,
        EncodedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            mime: "image/jpeg".into(),
            width: 1,
            height: 1,
        },
    )
}
