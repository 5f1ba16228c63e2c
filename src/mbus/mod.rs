//! Registration event intake.
//!
//! Backends announce themselves on the message bus with `router.register`
//! and withdraw with `router.unregister`. Announcements are repeated
//! periodically, so a registration that stops being repeated is eventually
//! pruned by the registry.

mod line_bus;
mod message;
mod subscriber;

use async_trait::async_trait;

pub use line_bus::LineBus;
pub use message::RegistryMessage;
pub use subscriber::{MessageError, RegistrySubscriber, REGISTER_SUBJECT, UNREGISTER_SUBJECT};

/// Reachability check for the registration event source.
///
/// Implementations may be slow; the registry never calls this while holding
/// a table lock.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Returns false when registrations can currently not be received.
    async fn ping(&self) -> bool;
}
