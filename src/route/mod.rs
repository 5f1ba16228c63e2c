//! Backend endpoints and the per-route pools that balance across them.
//!
//! A [`Pool`] holds the endpoints registered for one route and rotates
//! through them, skipping endpoints recently reported as failed. Requests
//! walk a pool through an [`EndpointIterator`].

mod endpoint;
mod iterator;
mod pool;

pub use endpoint::Endpoint;
pub use iterator::EndpointIterator;
pub use pool::Pool;
