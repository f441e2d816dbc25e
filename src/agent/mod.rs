//! The per-session actor and its command/notification surface.

mod events;
mod handle;
mod runtime;

#[cfg(test)]
pub use events::AgentCommand;
pub use events::Notification;
pub use handle::AgentHandle;
pub use runtime::{Agent, AgentParts};
