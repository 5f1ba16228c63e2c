//! Applies registration events to the route table.

use std::sync::Arc;

use thiserror::Error;

use super::RegistryMessage;
use crate::registry::RouteRegistry;

pub const REGISTER_SUBJECT: &str = "router.register";
pub const UNREGISTER_SUBJECT: &str = "router.unregister";

/// Errors raised while handling an inbound event.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("failed to decode registry message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed event line: {0:?}")]
    MalformedLine(String),
}

/// Dispatches `router.register` / `router.unregister` payloads to a registry.
pub struct RegistrySubscriber {
    registry: Arc<RouteRegistry>,
}

impl RegistrySubscriber {
    pub fn new(registry: Arc<RouteRegistry>) -> Self {
        Self { registry }
    }

    /// Handles one event and returns how many routes it touched.
    ///
    /// A payload that fails to decode leaves the table untouched.
    pub fn handle(&self, subject: &str, payload: &[u8]) -> Result<usize, MessageError> {
        let register = match subject {
            REGISTER_SUBJECT => true,
            UNREGISTER_SUBJECT => false,
            other => return Err(MessageError::UnknownSubject(other.to_string())),
        };

        let msg: RegistryMessage = serde_json::from_slice(payload)?;
        let endpoint = msg.make_endpoint();

        tracing::debug!(
            subject = subject,
            address = %endpoint,
            uris = msg.uris.len(),
            "received registry message"
        );

        for uri in &msg.uris {
            if register {
                self.registry.register(uri, Arc::clone(&endpoint));
            } else {
                self.registry.unregister(uri, &endpoint);
            }
        }

        Ok(msg.uris.len())
    }
}
