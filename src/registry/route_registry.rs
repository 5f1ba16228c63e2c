//! Thread-safe route table using DashMap.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::mbus::LivenessProbe;
use crate::route::{Endpoint, Pool};

/// Outcome of one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// The event source was unreachable; entries were refreshed instead.
    pub suspended: bool,
    pub pruned_endpoints: usize,
    pub removed_routes: usize,
}

struct PruningHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Maps route keys to the pools of endpoints serving them.
///
/// Route keys are case-insensitive. A route exists only while its pool is
/// non-empty. Uses `DashMap` for sharded concurrent access; a shard lock is
/// held only for the map operation and the in-memory pool call that must be
/// atomic with it, never across the liveness probe.
pub struct RouteRegistry {
    routes: DashMap<String, Arc<Pool>>,
    prune_interval: Duration,
    stale_threshold: Duration,
    retry_after_failure: Duration,
    last_update: RwLock<Option<SystemTime>>,
    probe: Arc<dyn LivenessProbe>,
    pruner: Mutex<Option<PruningHandle>>,
}

fn normalize(route: &str) -> String {
    route.to_lowercase()
}

impl RouteRegistry {
    /// Creates an empty registry.
    ///
    /// `probe` is consulted before every pruning pass.
    pub fn new(config: &RegistryConfig, probe: Arc<dyn LivenessProbe>) -> Self {
        Self {
            routes: DashMap::new(),
            prune_interval: config.prune_interval,
            stale_threshold: config.stale_threshold,
            retry_after_failure: config.retry_after_failure(),
            last_update: RwLock::new(None),
            probe,
            pruner: Mutex::new(None),
        }
    }

    /// Adds `endpoint` to the pool for `route`, creating the route if needed.
    ///
    /// Registering a known endpoint again refreshes it.
    pub fn register(&self, route: &str, endpoint: Arc<Endpoint>) {
        let now = SystemTime::now();
        let key = normalize(route);

        let address = Arc::clone(&endpoint);
        let added = self
            .routes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Pool::new(self.retry_after_failure)))
            .put(endpoint);

        *self.last_update.write() = Some(now);

        if added {
            tracing::debug!(route = %key, address = %address, "endpoint registered");
        }
    }

    /// Removes `endpoint` from the pool for `route`.
    ///
    /// The route is deleted together with its last endpoint.
    pub fn unregister(&self, route: &str, endpoint: &Endpoint) {
        let key = normalize(route);
        let mut removed = false;

        let deleted = self
            .routes
            .remove_if(&key, |_, pool| {
                removed = pool.remove(endpoint);
                pool.is_empty()
            })
            .is_some();

        if removed {
            tracing::debug!(route = %key, address = %endpoint, "endpoint unregistered");
        }
        if deleted {
            tracing::debug!(route = %key, "route removed");
        }
    }

    /// Returns the pool serving `route`, if any.
    pub fn lookup(&self, route: &str) -> Option<Arc<Pool>> {
        self.routes
            .get(&normalize(route))
            .map(|pool| Arc::clone(pool.value()))
    }

    /// Starts pruning stale endpoints every `prune_interval`.
    ///
    /// Does nothing when the interval is zero or a cycle is already running.
    /// Must be called from within a Tokio runtime.
    pub fn start_pruning_cycle(self: &Arc<Self>) {
        if self.prune_interval.is_zero() {
            return;
        }

        let mut pruner = self.pruner.lock();
        if pruner.is_some() {
            return;
        }

        let (shutdown, rx) = oneshot::channel();
        let task = tokio::spawn(run_pruning_cycle(
            Arc::downgrade(self),
            self.prune_interval,
            rx,
        ));
        *pruner = Some(PruningHandle { shutdown, task });

        tracing::info!(
            interval = ?self.prune_interval,
            stale_threshold = ?self.stale_threshold,
            "pruning cycle started"
        );
    }

    /// Stops the pruning cycle. Safe to call repeatedly.
    pub fn stop_pruning_cycle(&self) {
        if let Some(handle) = self.pruner.lock().take() {
            // The task may already have exited.
            let _ = handle.shutdown.send(());
            drop(handle.task);
            tracing::info!("pruning cycle stopped");
        }
    }

    /// Returns whether a pruning cycle is running.
    pub fn is_pruning(&self) -> bool {
        self.pruner
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Runs one pruning pass.
    ///
    /// If the event source is unreachable the table is considered stale:
    /// every endpoint is refreshed instead of pruned, so an outage of the
    /// event source never empties the table.
    pub async fn prune_stale_routes(&self) -> PruneReport {
        tracing::debug!("checking for stale endpoints");

        // No table lock may be held across this call.
        if !self.probe.ping().await {
            let now = Instant::now();
            for pool in self.routes.iter() {
                pool.touch_all(now);
            }
            tracing::info!("state is stale; not pruning");
            return PruneReport {
                suspended: true,
                ..PruneReport::default()
            };
        }

        let Some(cutoff) = Instant::now().checked_sub(self.stale_threshold) else {
            return PruneReport::default();
        };

        let mut report = PruneReport::default();
        self.routes.retain(|route, pool| {
            report.pruned_endpoints += pool.prune_before(cutoff);
            if pool.is_empty() {
                tracing::debug!(route = %route, "route removed");
                report.removed_routes += 1;
                return false;
            }
            true
        });

        if report.pruned_endpoints > 0 {
            tracing::info!(
                pruned_endpoints = report.pruned_endpoints,
                removed_routes = report.removed_routes,
                "pruned stale endpoints"
            );
        }
        report
    }

    /// Returns the number of routes.
    pub fn num_routes(&self) -> usize {
        self.routes.len()
    }

    /// Returns the number of distinct endpoint addresses across all routes.
    pub fn num_distinct_endpoints(&self) -> usize {
        let mut addresses = HashSet::new();
        for pool in self.routes.iter() {
            pool.for_each(|e| {
                addresses.insert(e.canonical_addr().to_string());
            });
        }
        addresses.len()
    }

    /// Returns when the last registration was applied.
    pub fn time_of_last_update(&self) -> Option<SystemTime> {
        *self.last_update.read()
    }

    /// Returns every route with the addresses of its endpoints.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.routes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().addresses()))
            .collect()
    }
}

impl Drop for RouteRegistry {
    fn drop(&mut self) {
        self.stop_pruning_cycle();
    }
}

async fn run_pruning_cycle(
    registry: Weak<RouteRegistry>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = ticker.tick() => {}
        }

        let Some(registry) = registry.upgrade() else {
            return;
        };

        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = registry.prune_stale_routes() => {}
        }
    }
}
