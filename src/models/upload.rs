use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityBucket, CaptureContext, CaptureTask, EncodedImage};

/// Everything about a capture except the image bytes. This is also the
/// `metadata` part of the multipart upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub task: CaptureTask,
    pub activity: ActivityBucket,
    pub context: CaptureContext,
    pub captured_at: DateTime<Utc>,
    pub image_mime: String,
    pub image_width: u32,
    pub image_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadPayload {
    pub metadata: UploadMetadata,
    pub image: Vec<u8>,
}

impl UploadPayload {
    pub fn new(
        task: CaptureTask,
        activity: ActivityBucket,
        context: CaptureContext,
        captured_at: DateTime<Utc>,
        image: EncodedImage,
    ) -> Self {
        Self {
            metadata: UploadMetadata {
                task,
                activity,
                context,
                captured_at,
                image_mime: image.mime,
                image_width: image.width,
                image_height: image.height,
            },
            image: image.bytes,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.metadata.task.task_id
    }
}

/// A queued upload as stored in the local outbox, without its image.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub id: i64,
    pub task_id: String,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermanentFailureReason {
    MaxAttempts,
    MaxAge,
}

impl PermanentFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermanentFailureReason::MaxAttempts => "max attempts exceeded",
            PermanentFailureReason::MaxAge => "max age exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Requeued {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    },
    PermanentlyFailed {
        reason: PermanentFailureReason,
    },
}
