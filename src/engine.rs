//! Engine - feed event dispatch with an optional pinned ingest loop.
//!
//! Transports push `FeedEvent`s; the engine hands each one to the update
//! pipeline. A rejected event is logged by the pipeline and counted here,
//! it never stops the loop.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::depth::DepthHandle;
use crate::error::PipelineError;
use crate::pipeline::UpdatePipeline;
use crate::registry::DepthRegistry;
use crate::update::{Identifier, Snapshot, Update};

/// One unit of work from a market data transport
#[derive(Clone, Debug, PartialEq)]
pub enum FeedEvent {
    /// Full book for an instrument
    Snapshot(Snapshot),
    /// Incremental change for an instrument
    Update(Identifier, Update),
    /// The session dropped: empty the book and discard pending updates
    Flush(Identifier),
    /// A sequence gap was detected: refuse updates until the next snapshot
    Invalidate(Identifier, String),
}

impl FeedEvent {
    pub fn identifier(&self) -> &Identifier {
        match self {
            FeedEvent::Snapshot(snapshot) => &snapshot.identifier,
            FeedEvent::Update(identifier, _)
            | FeedEvent::Flush(identifier)
            | FeedEvent::Invalidate(identifier, _) => identifier,
        }
    }
}

/// Running totals of what the engine has dispatched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub snapshots: u64,
    pub updates: u64,
    pub flushes: u64,
    pub invalidations: u64,
    pub rejected: u64,
}

impl EngineStats {
    #[inline]
    pub fn processed(&self) -> u64 {
        self.snapshots + self.updates + self.flushes + self.invalidations
    }
}

pub struct Engine {
    pipeline: UpdatePipeline,
    stats: EngineStats,
}

impl Engine {
    /// Create an engine with its own registry sized from `config`
    pub fn new(config: PipelineConfig) -> Self {
        let registry = Arc::new(DepthRegistry::new(config.notification_capacity));
        Self::with_registry(registry, config)
    }

    /// Create an engine that feeds an existing registry
    pub fn with_registry(registry: Arc<DepthRegistry>, config: PipelineConfig) -> Self {
        Self {
            pipeline: UpdatePipeline::new(registry, config),
            stats: EngineStats::default(),
        }
    }

    /// Run the ingest loop until `stop` is raised.
    ///
    /// Events still queued when `stop` is observed are drained first.
    #[cfg(feature = "runtime")]
    pub fn run(
        &mut self,
        input: &mut rtrb::Consumer<FeedEvent>,
        pin_to_core: bool,
        stop: &std::sync::atomic::AtomicBool,
    ) {
        use std::sync::atomic::Ordering;

        if pin_to_core {
            self.pin_to_core();
        }
        tracing::info!(pinned = pin_to_core, "ingest loop started");

        loop {
            let stopping = stop.load(Ordering::Acquire);
            while let Ok(event) = input.pop() {
                // Failures are already logged by the pipeline
                let _ = self.process_event(event);
            }
            if stopping {
                break;
            }
            std::hint::spin_loop();
        }
        tracing::info!(processed = self.stats.processed(), rejected = self.stats.rejected, "ingest loop stopped");
    }

    /// Dispatch one event.
    ///
    /// Flush and invalidate of an unknown instrument are no-ops, not errors.
    pub fn process_event(&mut self, event: FeedEvent) -> Result<(), PipelineError> {
        let result = match event {
            FeedEvent::Snapshot(snapshot) => {
                self.stats.snapshots += 1;
                self.pipeline.load_snapshot(snapshot)
            }
            FeedEvent::Update(identifier, update) => {
                self.stats.updates += 1;
                self.pipeline.submit_update(&identifier, update)
            }
            FeedEvent::Flush(identifier) => {
                self.stats.flushes += 1;
                self.pipeline.flush(&identifier);
                Ok(())
            }
            FeedEvent::Invalidate(identifier, reason) => {
                self.stats.invalidations += 1;
                self.pipeline.invalidate(&identifier, &reason);
                Ok(())
            }
        };
        if result.is_err() {
            self.stats.rejected += 1;
        }
        result
    }

    /// Pin the current thread to the last available CPU core.
    pub fn pin_to_core(&self) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(last_core) = core_ids.last() {
                core_affinity::set_for_current(*last_core);
            }
        }
    }

    #[inline]
    pub fn pipeline(&self) -> &UpdatePipeline {
        &self.pipeline
    }

    #[inline]
    pub fn registry(&self) -> &Arc<DepthRegistry> {
        self.pipeline.registry()
    }

    #[inline]
    pub fn depth(&self, identifier: &Identifier) -> Option<DepthHandle> {
        self.pipeline.get(identifier)
    }

    /// Start the periodic node pool sweep with the configured idle TTL
    pub fn spawn_pool_sweeper(&self, every: std::time::Duration) -> tokio::task::JoinHandle<()> {
        self.pipeline.spawn_pool_sweeper(every)
    }

    #[inline]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}
