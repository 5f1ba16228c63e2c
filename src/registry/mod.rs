//! Route table for the router.
//!
//! Maps case-insensitive route keys to the pools of endpoints registered for
//! them, and prunes registrations that stop being refreshed.

mod route_registry;

pub use route_registry::{PruneReport, RouteRegistry};
