pub mod activity;
pub mod capture;
pub mod connectivity;
pub mod session;
pub mod upload;

pub use activity::ActivityBucket;
pub use capture::{CaptureContext, CaptureMode, CaptureTask, EncodedImage, InstantRequest};
pub use connectivity::ConnectivityState;
pub use session::{ClockSnapshot, ClockState, Credentials, Session};
pub use upload::{
    DeliveryOutcome, PendingUpload, PermanentFailureReason, UploadMetadata, UploadPayload,
};
