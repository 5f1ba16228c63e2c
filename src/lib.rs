//! Dynamic route registry for an HTTP router.
//!
//! Backends announce themselves over a message bus; the registry maps each
//! announced route to a pool of endpoints and hands out endpoints per request
//! with failure-aware round robin. Registrations that stop being refreshed
//! are pruned, unless the event source itself is unreachable.

pub mod config;
pub mod mbus;
pub mod registry;
pub mod route;
pub mod status;

pub use config::{Config, ConfigError, RegistryConfig};
pub use registry::{PruneReport, RouteRegistry};
pub use route::{Endpoint, EndpointIterator, Pool};
