//! Update Pipeline - apply a stream of depth events exactly once, in order.
//!
//! Snapshots replace a book wholesale after validation. Incremental updates
//! are checked for input errors, optionally parked in a per-instrument
//! re-order buffer, and applied with one of two strategies:
//!
//! 1. BY PRICE: zero amount deletes the price, anything else upserts it
//! 2. BY ID: the update's action (amend, delete, insert, update-insert) is
//!    applied to the level carrying each exchange id
//!
//! Buffered updates are sorted by update id or update time once the buffer
//! is full, so ordering is guaranteed within one flush window only.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::depth::{Book, Depth, DepthHandle};
use crate::error::{DepthError, PipelineError};
use crate::registry::DepthRegistry;
use crate::update::{Action, Identifier, Level, Side, Snapshot, Update};
use crate::validator;

pub struct UpdatePipeline {
    registry: Arc<DepthRegistry>,
    config: PipelineConfig,
    /// Pending updates per instrument, only used when buffering is on
    buffers: Mutex<FxHashMap<Identifier, Vec<Update>>>,
}

impl UpdatePipeline {
    pub fn new(registry: Arc<DepthRegistry>, config: PipelineConfig) -> Self {
        Self {
            registry,
            config,
            buffers: Mutex::new(FxHashMap::default()),
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<DepthRegistry> {
        &self.registry
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Look up a loaded depth
    pub fn get(&self, identifier: &Identifier) -> Option<DepthHandle> {
        self.registry.get(identifier)
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Validate a full book and install it.
    ///
    /// The first snapshot for an identifier creates its depth; later ones
    /// replace the existing depth in place. A rejected snapshot leaves the
    /// previous book untouched. Buffered updates for the instrument are
    /// dropped since they predate the snapshot.
    pub fn load_snapshot(&self, snapshot: Snapshot) -> Result<(), PipelineError> {
        let identifier = snapshot.identifier.clone();
        let result = self.load_snapshot_inner(&snapshot);
        match &result {
            Ok(()) => debug!(
                depth = %identifier,
                bids = snapshot.bids.len(),
                asks = snapshot.asks.len(),
                last_update_id = snapshot.last_update_id,
                "snapshot loaded"
            ),
            Err(err) => warn!(
                exchange = %identifier.exchange,
                instrument = %identifier.instrument,
                segment = %identifier.segment,
                %err,
                "snapshot rejected"
            ),
        }
        result
    }

    fn load_snapshot_inner(&self, snapshot: &Snapshot) -> Result<(), PipelineError> {
        if !snapshot.identifier.is_set() {
            return Err(PipelineError::IdentifierUnset);
        }
        let allow_duplicates = snapshot.allow_duplicate_prices || self.config.allow_duplicate_prices;

        match self.registry.get(&snapshot.identifier) {
            Some(depth) => depth.load_with(snapshot, allow_duplicates)?,
            None => {
                validator::verify_book(
                    &snapshot.bids,
                    &snapshot.asks,
                    snapshot.is_funding_rate,
                    allow_duplicates,
                )?;
                let (depth, _) = self.registry.get_or_create(&snapshot.identifier);
                depth.replace(snapshot, allow_duplicates);
            }
        }

        if let Some(buffer) = self.buffers.lock().get_mut(&snapshot.identifier) {
            if !buffer.is_empty() {
                debug!(depth = %snapshot.identifier, dropped = buffer.len(), "buffered updates superseded by snapshot");
                buffer.clear();
            }
        }
        Ok(())
    }

    // ========================================================================
    // Incremental updates
    // ========================================================================

    /// Apply an update, or park it until the instrument's buffer fills.
    ///
    /// When a full buffer is flushed every parked update is attempted even if
    /// an earlier one fails; the first failure is returned.
    pub fn submit_update(&self, identifier: &Identifier, update: Update) -> Result<(), PipelineError> {
        let result = self.submit_inner(identifier, update);
        if let Err(err) = &result {
            warn!(
                exchange = %identifier.exchange,
                instrument = %identifier.instrument,
                segment = %identifier.segment,
                %err,
                "update rejected"
            );
        }
        result
    }

    fn submit_inner(&self, identifier: &Identifier, update: Update) -> Result<(), PipelineError> {
        self.check_update(identifier, &update)?;
        let depth = self
            .registry
            .get(identifier)
            .ok_or_else(|| PipelineError::DepthNotFound(identifier.clone()))?;

        if !self.config.is_buffered() {
            return self.apply(&depth, &update);
        }

        let capacity = self.config.buffer_capacity;
        let batch = {
            let mut buffers = self.buffers.lock();
            let buffer = buffers
                .entry(identifier.clone())
                .or_insert_with(|| Vec::with_capacity(capacity));
            buffer.push(update);
            if buffer.len() < capacity {
                return Ok(());
            }
            mem::take(buffer)
        };
        self.apply_batch(identifier, &depth, batch)
    }

    /// Apply whatever is buffered for `identifier` without waiting for the
    /// buffer to fill.
    pub fn drain(&self, identifier: &Identifier) -> Result<(), PipelineError> {
        let batch = match self.buffers.lock().get_mut(identifier) {
            Some(buffer) if !buffer.is_empty() => mem::take(buffer),
            _ => return Ok(()),
        };
        let depth = self
            .registry
            .get(identifier)
            .ok_or_else(|| PipelineError::DepthNotFound(identifier.clone()))?;
        self.apply_batch(identifier, &depth, batch)
    }

    /// Number of updates waiting in the instrument's buffer
    pub fn pending(&self, identifier: &Identifier) -> usize {
        self.buffers.lock().get(identifier).map_or(0, Vec::len)
    }

    fn apply_batch(
        &self,
        identifier: &Identifier,
        depth: &Depth,
        mut batch: Vec<Update>,
    ) -> Result<(), PipelineError> {
        if self.config.sort_by_update_id {
            batch.sort_by_key(|update| update.update_id);
        } else {
            batch.sort_by_key(|update| update.update_time);
        }
        debug!(depth = %identifier, updates = batch.len(), "flushing update buffer");

        let mut first_error = None;
        for update in batch.drain(..) {
            if let Err(err) = self.apply(depth, &update) {
                warn!(depth = %identifier, update_id = update.update_id, %err, "buffered update failed");
                first_error.get_or_insert(err);
            }
        }

        // Hand the emptied allocation back for the next window
        if let Some(buffer) = self.buffers.lock().get_mut(identifier) {
            if buffer.is_empty() && buffer.capacity() < batch.capacity() {
                *buffer = batch;
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Input checks that run before anything is mutated
    fn check_update(&self, identifier: &Identifier, update: &Update) -> Result<(), PipelineError> {
        if !identifier.is_set() {
            return Err(PipelineError::IdentifierUnset);
        }
        if update.is_empty() {
            return Err(PipelineError::EmptyUpdate);
        }
        if update.update_id == 0 && update.update_time.is_none() {
            return Err(PipelineError::UpdateIdOrTimeUnset);
        }
        if self.config.is_buffered() {
            if self.config.sort_by_update_id && update.update_id == 0 {
                return Err(PipelineError::UpdateIdUnset);
            }
            if !self.config.sort_by_update_id && update.update_time.is_none() {
                return Err(PipelineError::UpdateTimeUnset);
            }
        }

        let by_id = self.by_id(update);
        for (side, levels) in [(Side::Bid, &update.bids), (Side::Ask, &update.asks)] {
            for (index, level) in levels.iter().enumerate() {
                check_level(side, index, level, by_id, update.action)?;
            }
        }
        Ok(())
    }

    #[inline]
    fn by_id(&self, update: &Update) -> bool {
        update.by_id || self.config.apply_by_identifier
    }

    fn apply(&self, depth: &Depth, update: &Update) -> Result<(), PipelineError> {
        let by_id = self.by_id(update);
        let bypass = self.config.bypass_delete_verification;
        depth.mutate(|book| -> Result<(), PipelineError> {
            book.ensure_valid()?;
            if by_id {
                update_by_id(book, update, bypass)?;
            } else {
                update_by_price(book, update);
            }
            book.truncate(update.max_depth);
            if update.update_id != 0 {
                book.options.last_update_id = update.update_id;
            }
            book.options.last_updated = Some(update.update_time.unwrap_or_else(Utc::now));
            Ok(())
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drop buffered updates and empty the depth in place (disconnect).
    /// Returns false when no depth is loaded for `identifier`.
    pub fn flush(&self, identifier: &Identifier) -> bool {
        self.buffers.lock().remove(identifier);
        match self.registry.get(identifier) {
            Some(depth) => {
                depth.flush();
                true
            }
            None => false,
        }
    }

    /// Drop buffered updates and refuse further ones until a new snapshot
    /// arrives (the transport detected a gap).
    pub fn invalidate(&self, identifier: &Identifier, reason: &str) -> bool {
        self.buffers.lock().remove(identifier);
        match self.registry.get(identifier) {
            Some(depth) => {
                depth.invalidate(reason);
                true
            }
            None => false,
        }
    }

    /// Sweep every depth's node pool each `every`, dropping nodes idle
    /// longer than the configured `node_pool_idle_ttl`.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime or with a zero period.
    pub fn spawn_pool_sweeper(&self, every: Duration) -> JoinHandle<()> {
        self.registry
            .spawn_pool_sweeper(every, self.config.node_pool_idle_ttl)
    }
}

impl std::fmt::Debug for UpdatePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePipeline")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

fn check_level(side: Side, index: usize, level: &Level, by_id: bool, action: Action) -> Result<(), PipelineError> {
    if by_id {
        if level.id == 0 {
            return Err(PipelineError::IdUnset { side, index });
        }
        // A delete only needs the id
        if action == Action::Delete {
            return Ok(());
        }
    }
    if level.price.is_nan() || level.price <= 0.0 {
        return Err(PipelineError::InvalidPrice {
            side,
            index,
            price: level.price,
        });
    }
    let amount_bad = if by_id { level.amount <= 0.0 } else { level.amount < 0.0 };
    if level.amount.is_nan() || amount_bad {
        return Err(PipelineError::InvalidAmount {
            side,
            index,
            amount: level.amount,
        });
    }
    Ok(())
}

/// Upsert every level by price; zero amounts delete, and deleting a price
/// that is not there is a no-op.
fn update_by_price(book: &mut Book, update: &Update) {
    for level in &update.bids {
        book.upsert_by_price(Side::Bid, *level);
    }
    for level in &update.asks {
        book.upsert_by_price(Side::Ask, *level);
    }
}

/// Apply the update's action to each level by exchange id.
///
/// Stops at the first lookup failure; levels before it stay applied.
fn update_by_id(book: &mut Book, update: &Update, bypass_delete: bool) -> Result<(), DepthError> {
    for (side, levels) in [(Side::Bid, &update.bids), (Side::Ask, &update.asks)] {
        for level in levels {
            match update.action {
                Action::Amend => book.amend_by_id(side, *level)?,
                Action::Delete => {
                    book.delete_by_id(side, level.id, bypass_delete)?;
                }
                Action::Insert => book.insert(side, *level),
                Action::UpdateInsert => book.update_insert_by_id(side, *level),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::MarketSegment;
    use chrono::TimeZone;

    fn id() -> Identifier {
        Identifier::new("test", "ETH-USD", MarketSegment::Spot)
    }

    fn pipeline(config: PipelineConfig) -> UpdatePipeline {
        UpdatePipeline::new(Arc::new(DepthRegistry::default()), config)
    }

    fn seed(pipeline: &UpdatePipeline, bids: Vec<Level>, asks: Vec<Level>) -> DepthHandle {
        pipeline
            .load_snapshot(Snapshot {
                identifier: id(),
                bids,
                asks,
                last_update_id: 1,
                ..Default::default()
            })
            .unwrap();
        pipeline.get(&id()).unwrap()
    }

    fn asks(depth: &Depth) -> Vec<(f64, f64)> {
        depth.retrieve().1.iter().map(|l| (l.price, l.amount)).collect()
    }

    #[test]
    fn test_first_snapshot_creates_depth() {
        let pipeline = pipeline(PipelineConfig::default());
        assert!(pipeline.get(&id()).is_none());
        let depth = seed(&pipeline, vec![Level::new(99.0, 1.0)], vec![Level::new(101.0, 1.0)]);
        assert_eq!(depth.bid_len(), 1);
        assert_eq!(depth.options().last_update_id, 1);
    }

    #[test]
    fn test_rejected_first_snapshot_registers_nothing() {
        let pipeline = pipeline(PipelineConfig::default());
        let err = pipeline.load_snapshot(Snapshot {
            identifier: id(),
            bids: vec![Level::new(100.0, 1.0), Level::new(100.0, 1.0)],
            ..Default::default()
        });
        assert!(matches!(
            err,
            Err(PipelineError::Validation(crate::error::ValidationError::PriceDuplication { .. }))
        ));
        assert!(pipeline.get(&id()).is_none());
    }

    #[test]
    fn test_snapshot_needs_identifier() {
        let pipeline = pipeline(PipelineConfig::default());
        assert_eq!(
            pipeline.load_snapshot(Snapshot::default()),
            Err(PipelineError::IdentifierUnset)
        );
    }

    #[test]
    fn test_config_allows_duplicate_prices() {
        let pipeline = pipeline(PipelineConfig::default().with_allow_duplicate_prices(true));
        let depth = seed(
            &pipeline,
            vec![Level::new(100.0, 1.0), Level::new(100.0, 2.0)],
            vec![],
        );
        assert_eq!(depth.bid_len(), 2);
        assert!(depth.options().allow_duplicate_prices);
    }

    #[test]
    fn test_by_price_upsert_and_delete() {
        let pipeline = pipeline(PipelineConfig::default());
        let depth = seed(&pipeline, vec![], vec![Level::new(100.0, 1.0), Level::new(102.0, 1.0)]);

        pipeline
            .submit_update(
                &id(),
                Update {
                    asks: vec![
                        Level::new(101.0, 3.0),
                        Level::new(102.0, 5.0),
                        Level::new(100.0, 0.0),
                    ],
                    update_id: 2,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(asks(&depth), vec![(101.0, 3.0), (102.0, 5.0)]);
        assert_eq!(depth.options().last_update_id, 2);
    }

    #[test]
    fn test_zero_amount_at_missing_price_is_noop() {
        let pipeline = pipeline(PipelineConfig::default());
        let depth = seed(&pipeline, vec![], vec![Level::new(101.0, 1.0)]);
        pipeline
            .submit_update(
                &id(),
                Update {
                    asks: vec![Level::new(100.0, 0.0)],
                    update_id: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(depth.ask_len(), 1);
    }

    #[test]
    fn test_input_errors_leave_book_untouched() {
        let pipeline = pipeline(PipelineConfig::default());
        let depth = seed(&pipeline, vec![Level::new(99.0, 1.0)], vec![]);
        let before = depth.retrieve();

        let cases = [
            (Update { update_id: 2, ..Default::default() }, PipelineError::EmptyUpdate),
            (
                Update { bids: vec![Level::new(98.0, 1.0)], ..Default::default() },
                PipelineError::UpdateIdOrTimeUnset,
            ),
            (
                Update {
                    bids: vec![Level::new(98.0, 1.0), Level::new(0.0, 1.0)],
                    update_id: 2,
                    ..Default::default()
                },
                PipelineError::InvalidPrice { side: Side::Bid, index: 1, price: 0.0 },
            ),
            (
                Update {
                    asks: vec![Level::new(98.0, -1.0)],
                    update_id: 2,
                    ..Default::default()
                },
                PipelineError::InvalidAmount { side: Side::Ask, index: 0, amount: -1.0 },
            ),
        ];
        for (update, expected) in cases {
            assert_eq!(pipeline.submit_update(&id(), update), Err(expected));
        }
        assert_eq!(depth.retrieve(), before);
    }

    #[test]
    fn test_update_before_snapshot() {
        let pipeline = pipeline(PipelineConfig::default());
        let err = pipeline.submit_update(
            &id(),
            Update {
                bids: vec![Level::new(1.0, 1.0)],
                update_id: 1,
                ..Default::default()
            },
        );
        assert_eq!(err, Err(PipelineError::DepthNotFound(id())));
    }

    #[test]
    fn test_by_id_actions() {
        let pipeline = pipeline(PipelineConfig::default().with_apply_by_identifier(true));
        let depth = seed(
            &pipeline,
            vec![],
            vec![Level::new(100.0, 1.0).with_id(1), Level::new(101.0, 1.0).with_id(2)],
        );
        let submit = |action, asks: Vec<Level>, update_id| {
            pipeline.submit_update(
                &id(),
                Update {
                    asks,
                    action,
                    update_id,
                    ..Default::default()
                },
            )
        };

        submit(Action::Amend, vec![Level::new(100.0, 7.0).with_id(1)], 2).unwrap();
        assert_eq!(asks(&depth), vec![(100.0, 7.0), (101.0, 1.0)]);

        submit(Action::Insert, vec![Level::new(100.5, 2.0).with_id(3)], 3).unwrap();
        assert_eq!(asks(&depth), vec![(100.0, 7.0), (100.5, 2.0), (101.0, 1.0)]);

        submit(Action::Delete, vec![Level::new(0.0, 0.0).with_id(1)], 4).unwrap();
        assert_eq!(asks(&depth), vec![(100.5, 2.0), (101.0, 1.0)]);

        submit(Action::UpdateInsert, vec![Level::new(99.0, 4.0).with_id(9)], 5).unwrap();
        submit(Action::UpdateInsert, vec![Level::new(101.0, 6.0).with_id(2)], 6).unwrap();
        assert_eq!(asks(&depth), vec![(99.0, 4.0), (100.5, 2.0), (101.0, 6.0)]);

        let err = submit(Action::Amend, vec![Level::new(1.0, 1.0).with_id(42)], 7);
        assert_eq!(
            err,
            Err(PipelineError::Depth(DepthError::IdNotFound { side: Side::Ask, id: 42 }))
        );
        let err = submit(Action::Delete, vec![Level::new(0.0, 0.0).with_id(42)], 8);
        assert!(matches!(err, Err(PipelineError::Depth(DepthError::IdNotFound { .. }))));
        let err = submit(Action::Insert, vec![Level::new(1.0, 1.0)], 9);
        assert_eq!(err, Err(PipelineError::IdUnset { side: Side::Ask, index: 0 }));
    }

    #[test]
    fn test_delete_bypass() {
        let pipeline = pipeline(
            PipelineConfig::default()
                .with_apply_by_identifier(true)
                .with_bypass_delete_verification(true),
        );
        let depth = seed(&pipeline, vec![Level::new(99.0, 1.0).with_id(5)], vec![]);
        for update_id in [2, 3] {
            pipeline
                .submit_update(
                    &id(),
                    Update {
                        bids: vec![Level::new(0.0, 0.0).with_id(5)],
                        action: Action::Delete,
                        update_id,
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        assert_eq!(depth.bid_len(), 0);
    }

    #[test]
    fn test_max_depth_truncates() {
        let pipeline = pipeline(PipelineConfig::default());
        let depth = seed(&pipeline, vec![], vec![Level::new(100.0, 1.0), Level::new(101.0, 1.0)]);
        pipeline
            .submit_update(
                &id(),
                Update {
                    asks: vec![Level::new(99.0, 1.0)],
                    update_id: 2,
                    max_depth: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(asks(&depth), vec![(99.0, 1.0), (100.0, 1.0)]);
    }

    #[test]
    fn test_buffer_sorts_by_update_id() {
        let pipeline = pipeline(PipelineConfig::default().with_buffer(3, true));
        let depth = seed(&pipeline, vec![], vec![Level::new(100.0, 1.0)]);
        let update = |amount, update_id| Update {
            asks: vec![Level::new(100.0, amount)],
            update_id,
            ..Default::default()
        };

        pipeline.submit_update(&id(), update(3.0, 4)).unwrap();
        pipeline.submit_update(&id(), update(2.0, 2)).unwrap();
        assert_eq!(pipeline.pending(&id()), 2);
        assert_eq!(asks(&depth), vec![(100.0, 1.0)], "nothing applied before the flush");

        pipeline.submit_update(&id(), update(5.0, 3)).unwrap();
        assert_eq!(pipeline.pending(&id()), 0);
        // id 4 applied last
        assert_eq!(asks(&depth), vec![(100.0, 3.0)]);
        assert_eq!(depth.options().last_update_id, 4);
    }

    #[test]
    fn test_buffer_sorts_by_update_time() {
        let pipeline = pipeline(PipelineConfig::default().with_buffer(2, false));
        let depth = seed(&pipeline, vec![Level::new(100.0, 1.0)], vec![]);
        let at = |secs| Some(Utc.timestamp_opt(secs, 0).unwrap());

        let late = Update {
            bids: vec![Level::new(100.0, 9.0)],
            update_time: at(20),
            ..Default::default()
        };
        let early = Update {
            bids: vec![Level::new(100.0, 4.0)],
            update_time: at(10),
            ..Default::default()
        };
        pipeline.submit_update(&id(), late).unwrap();
        pipeline.submit_update(&id(), early).unwrap();
        assert_eq!(depth.retrieve().0[0].amount, 9.0);

        let missing_time = Update {
            bids: vec![Level::new(100.0, 1.0)],
            update_id: 7,
            ..Default::default()
        };
        assert_eq!(
            pipeline.submit_update(&id(), missing_time),
            Err(PipelineError::UpdateTimeUnset)
        );
    }

    #[test]
    fn test_drain_and_snapshot_clear_buffer() {
        let pipeline = pipeline(PipelineConfig::default().with_buffer(10, true));
        let depth = seed(&pipeline, vec![], vec![Level::new(100.0, 1.0)]);
        let update = |update_id| Update {
            asks: vec![Level::new(100.0 + update_id as f64, 1.0)],
            update_id,
            ..Default::default()
        };

        pipeline.submit_update(&id(), update(2)).unwrap();
        pipeline.drain(&id()).unwrap();
        assert_eq!(depth.ask_len(), 2);

        pipeline.submit_update(&id(), update(3)).unwrap();
        assert_eq!(pipeline.pending(&id()), 1);
        seed(&pipeline, vec![], vec![Level::new(100.0, 1.0)]);
        assert_eq!(pipeline.pending(&id()), 0);
        assert_eq!(depth.ask_len(), 1);
    }

    #[test]
    fn test_buffered_failure_does_not_stop_batch() {
        let pipeline = pipeline(
            PipelineConfig::default()
                .with_buffer(2, true)
                .with_apply_by_identifier(true),
        );
        let depth = seed(&pipeline, vec![], vec![Level::new(100.0, 1.0).with_id(1)]);

        pipeline
            .submit_update(
                &id(),
                Update {
                    asks: vec![Level::new(1.0, 1.0).with_id(99)],
                    action: Action::Amend,
                    update_id: 2,
                    ..Default::default()
                },
            )
            .unwrap();
        let err = pipeline.submit_update(
            &id(),
            Update {
                asks: vec![Level::new(100.0, 8.0).with_id(1)],
                action: Action::Amend,
                update_id: 3,
                ..Default::default()
            },
        );
        assert!(matches!(err, Err(PipelineError::Depth(DepthError::IdNotFound { id: 99, .. }))));
        assert_eq!(asks(&depth), vec![(100.0, 8.0)]);
    }

    #[tokio::test]
    async fn test_pool_sweeper_uses_configured_ttl() {
        let ladder: Vec<_> = (0..8).map(|i| Level::new(100.0 + i as f64, 1.0)).collect();

        let short = pipeline(PipelineConfig::default().with_node_pool_idle_ttl(Duration::from_millis(1)));
        let depth = seed(&short, vec![], ladder.clone());
        seed(&short, vec![], ladder[..1].to_vec());
        assert_eq!(depth.pool_capacity(), 8);

        let sweeper = short.spawn_pool_sweeper(Duration::from_millis(5));
        for _ in 0..200 {
            if depth.pool_capacity() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(depth.pool_capacity(), 1);
        assert_eq!(depth.ask_len(), 1);
        sweeper.abort();

        // The default TTL keeps recently freed nodes
        let long = pipeline(PipelineConfig::default());
        let depth = seed(&long, vec![], ladder.clone());
        seed(&long, vec![], ladder[..1].to_vec());
        let sweeper = long.spawn_pool_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(depth.pool_capacity(), 8);
        sweeper.abort();
    }

    #[test]
    fn test_flush_and_invalidate() {
        let pipeline = pipeline(PipelineConfig::default());
        let depth = seed(&pipeline, vec![Level::new(99.0, 1.0)], vec![Level::new(101.0, 1.0)]);

        assert!(pipeline.flush(&id()));
        assert_eq!(depth.retrieve(), (vec![], vec![]));
        assert!(pipeline.get(&id()).is_some());

        assert!(pipeline.invalidate(&id(), "gap"));
        let err = pipeline.submit_update(
            &id(),
            Update {
                bids: vec![Level::new(99.0, 1.0)],
                update_id: 5,
                ..Default::default()
            },
        );
        assert_eq!(err, Err(PipelineError::Depth(DepthError::Invalid("gap".into()))));

        seed(&pipeline, vec![Level::new(99.0, 1.0)], vec![]);
        assert!(depth.validity().is_ok());

        let unknown = Identifier::new("other", "X", MarketSegment::Spot);
        assert!(!pipeline.flush(&unknown));
    }
}
