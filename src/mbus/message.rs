//! Registration event payload.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::route::Endpoint;

/// JSON body of `router.register` and `router.unregister`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryMessage {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub private_instance_id: String,
}

impl RegistryMessage {
    /// Builds the endpoint shared by every URI in this message.
    pub fn make_endpoint(&self) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(
            self.app.clone(),
            &self.host,
            self.port,
            self.private_instance_id.clone(),
            self.tags.clone(),
        ))
    }
}
