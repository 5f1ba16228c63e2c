//! Endpoint pool with failure-aware round-robin selection.
//!
//! A pool holds every endpoint registered for one route. Selection rotates
//! through the endpoints, skipping those recently reported as failed. When
//! every endpoint is failed the marks are dropped and selection continues:
//! availability wins over strict exclusion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use super::{Endpoint, EndpointIterator};

struct PoolEntry {
    endpoint: Arc<Endpoint>,
    updated_at: Instant,
    failed_at: Option<Instant>,
}

impl PoolEntry {
    /// Drops the failure mark once the retry window has passed.
    fn expire_failure(&mut self, now: Instant, retry_after_failure: Duration) {
        if let Some(failed_at) = self.failed_at {
            if now.saturating_duration_since(failed_at) >= retry_after_failure {
                self.failed_at = None;
            }
        }
    }
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    // Both maps hold positions into `entries`.
    by_address: HashMap<String, usize>,
    by_instance_id: HashMap<String, usize>,
    // None until the first selection picks a random start.
    next_index: Option<usize>,
}

impl PoolState {
    fn index_instance_id(&mut self, instance_id: &str, pos: usize) {
        if !instance_id.is_empty() {
            self.by_instance_id.insert(instance_id.to_string(), pos);
        }
    }

    fn unindex_instance_id(&mut self, instance_id: &str, pos: usize) {
        // Another endpoint may have claimed the same id since.
        if self.by_instance_id.get(instance_id) == Some(&pos) {
            self.by_instance_id.remove(instance_id);
        }
    }

    /// Swap-removes the entry at `pos`, keeping both indexes and the cursor valid.
    fn remove_at(&mut self, pos: usize) -> PoolEntry {
        let last = self.entries.len() - 1;
        let removed = self.entries.swap_remove(pos);

        self.by_address.remove(removed.endpoint.canonical_addr());
        self.unindex_instance_id(removed.endpoint.private_instance_id(), pos);

        if pos < last {
            let moved = Arc::clone(&self.entries[pos].endpoint);
            self.by_address.insert(moved.canonical_addr().to_string(), pos);
            let instance_id = moved.private_instance_id();
            if self.by_instance_id.get(instance_id) == Some(&last) {
                self.by_instance_id.insert(instance_id.to_string(), pos);
            }
        }

        self.next_index = match self.next_index {
            Some(_) if self.entries.is_empty() => None,
            Some(i) if i >= self.entries.len() => Some(0),
            other => other,
        };

        removed
    }
}

/// The set of endpoints registered for one route.
///
/// Thread-safe via an internal mutex. Every operation is short in-memory work
/// and never blocks on anything but the pool's own lock.
pub struct Pool {
    state: Mutex<PoolState>,
    retry_after_failure: Duration,
}

impl Pool {
    /// Creates an empty pool.
    ///
    /// Endpoints reported as failed are skipped for `retry_after_failure`.
    pub fn new(retry_after_failure: Duration) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            retry_after_failure,
        }
    }

    /// Adds or refreshes an endpoint.
    ///
    /// Returns true only when the address was not in the pool before. A known
    /// address has its freshness stamp renewed, and its endpoint replaced if
    /// the metadata changed.
    pub fn put(&self, endpoint: Arc<Endpoint>) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();

        let existing = state.by_address.get(endpoint.canonical_addr()).copied();
        if let Some(pos) = existing {
            let entry = &mut state.entries[pos];
            entry.updated_at = now;
            if entry.endpoint.same_registration(&endpoint) {
                return false;
            }

            let old = std::mem::replace(&mut entry.endpoint, Arc::clone(&endpoint));
            if old.private_instance_id() != endpoint.private_instance_id() {
                state.unindex_instance_id(old.private_instance_id(), pos);
                state.index_instance_id(endpoint.private_instance_id(), pos);
            }
            return false;
        }

        let pos = state.entries.len();
        state
            .by_address
            .insert(endpoint.canonical_addr().to_string(), pos);
        state.index_instance_id(endpoint.private_instance_id(), pos);
        state.entries.push(PoolEntry {
            endpoint,
            updated_at: now,
            failed_at: None,
        });
        true
    }

    /// Removes the endpoint with the same address, if present.
    ///
    /// Order of the remaining endpoints is not preserved.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut state = self.state.lock();
        match state.by_address.get(endpoint.canonical_addr()).copied() {
            Some(pos) => {
                state.remove_at(pos);
                true
            }
            None => false,
        }
    }

    /// Returns a per-request iterator over this pool.
    ///
    /// `affinity_hint` is a canonical address or private instance id to try
    /// before falling back to round robin.
    pub fn endpoints(&self, affinity_hint: Option<&str>) -> EndpointIterator<'_> {
        EndpointIterator::new(self, affinity_hint)
    }

    /// Selects the next healthy endpoint in rotation.
    pub(crate) fn next(&self) -> Option<Arc<Endpoint>> {
        let now = Instant::now();
        let retry_after_failure = self.retry_after_failure;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let len = state.entries.len();
        if len == 0 {
            return None;
        }

        let start = match state.next_index {
            Some(i) if i < len => i,
            Some(_) => 0,
            None => rand::thread_rng().gen_range(0..len),
        };

        for lap in 0..2 {
            for step in 0..len {
                let idx = (start + step) % len;
                let entry = &mut state.entries[idx];
                entry.expire_failure(now, retry_after_failure);
                if entry.failed_at.is_none() {
                    let endpoint = Arc::clone(&entry.endpoint);
                    state.next_index = Some((idx + 1) % len);
                    return Some(endpoint);
                }
            }

            if lap == 0 {
                tracing::debug!(endpoints = len, "all endpoints failed; resetting failure marks");
                for entry in &mut state.entries {
                    entry.failed_at = None;
                }
            }
        }

        None
    }

    /// Finds an endpoint by canonical address or private instance id.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Endpoint>> {
        let state = self.state.lock();
        state
            .by_address
            .get(id)
            .or_else(|| state.by_instance_id.get(id))
            .map(|&pos| Arc::clone(&state.entries[pos].endpoint))
    }

    /// Excludes the endpoint from selection for the retry window.
    pub fn mark_failed(&self, endpoint: &Endpoint) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let existing = state.by_address.get(endpoint.canonical_addr()).copied();
        if let Some(pos) = existing {
            state.entries[pos].failed_at = Some(now);
        }
    }

    /// Removes every endpoint last refreshed before `cutoff`.
    ///
    /// Returns the number of endpoints removed.
    pub fn prune_before(&self, cutoff: Instant) -> usize {
        let mut state = self.state.lock();
        let mut pruned = 0;
        let mut i = 0;
        while i < state.entries.len() {
            if state.entries[i].updated_at < cutoff {
                let entry = state.remove_at(i);
                tracing::debug!(address = %entry.endpoint, "pruned stale endpoint");
                pruned += 1;
            } else {
                i += 1;
            }
        }
        pruned
    }

    /// Marks every endpoint as refreshed at `at`.
    pub fn touch_all(&self, at: Instant) {
        let mut state = self.state.lock();
        for entry in &mut state.entries {
            entry.updated_at = at;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Calls `f` for every endpoint while holding the pool lock.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Endpoint>)) {
        let state = self.state.lock();
        for entry in &state.entries {
            f(&entry.endpoint);
        }
    }

    /// Returns the canonical addresses of all endpoints, in pool order.
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses = Vec::with_capacity(self.len());
        self.for_each(|e| addresses.push(e.canonical_addr().to_string()));
        addresses
    }
}
