//! Per-request endpoint selection.

use std::sync::Arc;

use super::{Endpoint, Pool};

/// Cursor over a [`Pool`] for the lifetime of one request.
///
/// The rotation state lives in the pool, so iterators are cheap and every
/// concurrent request advances the same round robin.
pub struct EndpointIterator<'a> {
    pool: &'a Pool,
    affinity_hint: Option<String>,
    last_returned: Option<Arc<Endpoint>>,
}

impl<'a> EndpointIterator<'a> {
    pub(crate) fn new(pool: &'a Pool, affinity_hint: Option<&str>) -> Self {
        Self {
            pool,
            affinity_hint: affinity_hint
                .filter(|hint| !hint.is_empty())
                .map(str::to_string),
            last_returned: None,
        }
    }

    /// Returns the endpoint the request should be sent to.
    ///
    /// The affinity hint is tried on the first call only. Returns `None` only
    /// when the pool is empty.
    pub fn next_endpoint(&mut self) -> Option<Arc<Endpoint>> {
        let sticky = self
            .affinity_hint
            .take()
            .and_then(|hint| self.pool.find_by_id(&hint));

        let endpoint = sticky.or_else(|| self.pool.next());
        self.last_returned = endpoint.clone();
        endpoint
    }

    /// Reports that the last returned endpoint could not be reached.
    ///
    /// The endpoint is skipped by every request on the same pool until the
    /// pool's retry window passes.
    pub fn endpoint_failed(&self) {
        if let Some(endpoint) = &self.last_returned {
            tracing::debug!(address = %endpoint, "endpoint marked failed");
            self.pool.mark_failed(endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn make_pool(instance_ids: &[&str]) -> Pool {
        let pool = Pool::new(Duration::from_secs(60));
        for (i, id) in instance_ids.iter().enumerate() {
            pool.put(Arc::new(Endpoint::new(
                "app",
                &format!("10.0.0.{}", i + 1),
                8080,
                *id,
                BTreeMap::new(),
            )));
        }
        pool
    }

    #[test]
    fn test_affinity_hint_selects_instance() {
        let pool = make_pool(&["a", "b", "c", "d"]);

        let mut iter = pool.endpoints(Some("b"));
        let endpoint = iter.next_endpoint().unwrap();

        assert_eq!(endpoint.private_instance_id(), "b");
    }

    #[test]
    fn test_affinity_hint_by_address() {
        let pool = make_pool(&["a", "b", "c"]);

        let mut iter = pool.endpoints(Some("10.0.0.3:8080"));
        assert_eq!(iter.next_endpoint().unwrap().private_instance_id(), "c");
    }

    #[test]
    fn test_unknown_hint_falls_back_to_round_robin() {
        let pool = make_pool(&["a", "b", "c", "d"]);

        let mut iter = pool.endpoints(Some("nope"));
        let endpoint = iter.next_endpoint().unwrap();

        assert!(["a", "b", "c", "d"].contains(&endpoint.private_instance_id()));
    }

    #[test]
    fn test_hint_is_consumed_by_first_call() {
        let pool = make_pool(&["a", "b"]);

        let mut iter = pool.endpoints(Some("a"));
        assert_eq!(iter.next_endpoint().unwrap().private_instance_id(), "a");

        let second = iter.next_endpoint().unwrap();
        let third = iter.next_endpoint().unwrap();
        assert_ne!(second, third);
    }

    #[test]
    fn test_endpoint_failed_skips_endpoint_for_other_iterators() {
        let pool = make_pool(&["a", "b"]);

        let mut iter = pool.endpoints(None);
        let failed = iter.next_endpoint().unwrap();
        iter.endpoint_failed();

        let other = iter.next_endpoint().unwrap();
        assert_ne!(other, failed);
        assert_eq!(iter.next_endpoint().unwrap(), other);

        let mut fresh = pool.endpoints(None);
        assert_eq!(fresh.next_endpoint().unwrap(), other);
    }

    #[test]
    fn test_all_endpoints_failed_still_returns_endpoint() {
        let pool = make_pool(&["a", "b"]);

        let mut iter = pool.endpoints(None);
        iter.next_endpoint();
        iter.endpoint_failed();
        iter.next_endpoint();
        iter.endpoint_failed();

        assert!(iter.next_endpoint().is_some());
    }

    #[test]
    fn test_endpoint_failed_before_next_is_noop() {
        let pool = make_pool(&["a"]);

        let iter = pool.endpoints(None);
        iter.endpoint_failed();

        let mut iter = pool.endpoints(None);
        assert_eq!(iter.next_endpoint().unwrap().private_instance_id(), "a");
    }

    #[test]
    fn test_empty_pool_yields_none() {
        let pool = make_pool(&[]);

        let mut iter = pool.endpoints(Some("a"));
        assert!(iter.next_endpoint().is_none());
        iter.endpoint_failed();
    }
}
