mod pipeline;
mod retry;

pub use pipeline::{DeliveryPipeline, DeliveryResult, DrainReport};
pub use retry::RetryPolicy;
