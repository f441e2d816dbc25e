//! Capture scheduling and the screenshot itself.

pub mod capturer;
pub mod encode;
pub mod scheduler;

pub use capturer::{CommandCapturer, ScreenCapturer};
pub use encode::normalize;
pub use scheduler::{CaptureScheduler, InstantDecision};
