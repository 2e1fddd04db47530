//! Depth Registry - (exchange, instrument, segment) → shared depth.
//!
//! The map lock is only held to look up or insert a handle; it is always
//! released before a depth's own lock is taken.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::depth::{Depth, DepthHandle};
use crate::update::Identifier;

/// Receiving end of the change stream; yields the identifier of every
/// depth that changed. Slow consumers observe `Lagged` and skip ahead.
pub type ChangeFeed = broadcast::Receiver<Arc<Identifier>>;

pub struct DepthRegistry {
    depths: RwLock<FxHashMap<Identifier, DepthHandle>>,
    changes: broadcast::Sender<Arc<Identifier>>,
}

impl DepthRegistry {
    /// Create an empty registry whose change stream buffers
    /// `notification_capacity` identifiers per consumer
    pub fn new(notification_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            depths: RwLock::new(FxHashMap::default()),
            changes,
        }
    }

    /// Look up a depth
    pub fn get(&self, identifier: &Identifier) -> Option<DepthHandle> {
        self.depths.read().get(identifier).cloned()
    }

    /// Look up a depth, creating an empty one on first use.
    ///
    /// The flag is true when this call created it.
    pub fn get_or_create(&self, identifier: &Identifier) -> (DepthHandle, bool) {
        if let Some(depth) = self.get(identifier) {
            return (depth, false);
        }
        let mut depths = self.depths.write();
        if let Some(depth) = depths.get(identifier) {
            return (depth.clone(), false);
        }
        let depth = Arc::new(Depth::with_notifier(identifier.clone(), self.changes.clone()));
        depths.insert(identifier.clone(), depth.clone());
        debug!(depth = %identifier, "depth registered");
        (depth, true)
    }

    /// Subscribe to the identifiers of changed depths
    pub fn subscribe(&self) -> ChangeFeed {
        self.changes.subscribe()
    }

    pub fn identifiers(&self) -> Vec<Identifier> {
        self.depths.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.depths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.depths.read().is_empty()
    }

    fn handles(&self) -> Vec<DepthHandle> {
        self.depths.read().values().cloned().collect()
    }

    /// Flush every depth fed by `exchange`, e.g. when its session drops.
    /// Returns how many were flushed.
    pub fn flush_exchange(&self, exchange: &str) -> usize {
        let handles: Vec<_> = self
            .handles()
            .into_iter()
            .filter(|depth| depth.identifier().exchange == exchange)
            .collect();
        for depth in &handles {
            depth.flush();
        }
        info!(exchange, flushed = handles.len(), "exchange depths flushed");
        handles.len()
    }

    /// Sweep every depth's node pool. Returns the total nodes dropped.
    pub fn sweep_pools(&self, ttl: Duration) -> usize {
        self.handles().iter().map(|depth| depth.sweep_pool(ttl)).sum()
    }

    /// Sweep all node pools every `every` on the current Tokio runtime.
    ///
    /// The task ends once the registry is dropped.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime or with a zero period.
    pub fn spawn_pool_sweeper(self: &Arc<Self>, every: Duration, ttl: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let mut ticker = tokio::time::interval(every);
        tokio::spawn(async move {
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let removed = registry.sweep_pools(ttl);
                if removed > 0 {
                    debug!(removed, "pool sweep finished");
                }
            }
        })
    }
}

impl Default for DepthRegistry {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for DepthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthRegistry")
            .field("depths", &self.len())
            .field("subscribers", &self.changes.receiver_count())
            .finish()
    }
}
