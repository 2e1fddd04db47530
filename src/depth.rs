//! Depth - one instrument's bid and ask chains behind a single lock.
//!
//! Readers and the writer share a `DepthHandle`. Every traversal and every
//! mutation holds the lock for the duration of one O(depth) walk. Changes
//! are announced after the lock is released: blocked `wait` callers are
//! released and, when the depth came from a registry, its identifier is
//! pushed onto the registry's change stream.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::arena::{NodeIndex, NodePool};
use crate::error::{DepthError, ValidationError};
use crate::side_list::SideList;
use crate::signal::{ChangeSignal, Wake};
use crate::update::{Identifier, Level, Side, Snapshot};
use crate::validator;

/// Shared, synchronized reference to a depth container
pub type DepthHandle = Arc<Depth>;

/// Metadata kept alongside the levels
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    pub last_updated: Option<DateTime<Utc>>,
    pub last_update_id: i64,
    pub allow_duplicate_prices: bool,
    pub is_funding_rate: bool,
}

/// The lock-protected state of a depth.
///
/// Both sides draw from one node pool. `dirty` records whether anything a
/// reader can observe changed since the lock was taken.
pub(crate) struct Book {
    pub(crate) bids: SideList,
    pub(crate) asks: SideList,
    pub(crate) pool: NodePool,
    pub(crate) options: Options,
    invalid: Option<String>,
    dirty: bool,
}

impl Book {
    fn new() -> Self {
        Self {
            bids: SideList::new(),
            asks: SideList::new(),
            pool: NodePool::new(),
            options: Options::default(),
            invalid: None,
            dirty: false,
        }
    }

    #[inline]
    fn side(&self, side: Side) -> &SideList {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    #[inline]
    fn side_mut(&mut self, side: Side) -> (&mut SideList, &mut NodePool) {
        match side {
            Side::Bid => (&mut self.bids, &mut self.pool),
            Side::Ask => (&mut self.asks, &mut self.pool),
        }
    }

    pub(crate) fn ensure_valid(&self) -> Result<(), DepthError> {
        match &self.invalid {
            Some(reason) => Err(DepthError::Invalid(reason.clone())),
            None => Ok(()),
        }
    }

    /// Replace both sides. The levels must already be validated.
    fn load(&mut self, bids: &[Level], asks: &[Level]) {
        for (side, levels) in [(Side::Bid, bids), (Side::Ask, asks)] {
            let (list, pool) = self.side_mut(side);
            // An empty side is legitimate in a snapshot
            if let Err(DepthError::EmptyInput) = list.load(levels, pool) {
                list.clear(pool);
            }
        }
        self.invalid = None;
        self.dirty = true;
    }

    fn clear(&mut self) -> usize {
        let released = self.bids.clear(&mut self.pool) + self.asks.clear(&mut self.pool);
        if released > 0 {
            self.dirty = true;
        }
        released
    }

    /// Insert at the sorted position, ignoring any id collision
    pub(crate) fn insert(&mut self, side: Side, level: Level) {
        let (list, pool) = self.side_mut(side);
        list.add(level, pool, |existing| side.belongs_before(existing.price, level.price));
        self.dirty = true;
    }

    pub(crate) fn remove_by_price(&mut self, side: Side, price: f64) -> Result<Level, DepthError> {
        let (list, pool) = self.side_mut(side);
        let index = list
            .remove(pool, |level| level.price == price)
            .ok_or(DepthError::PriceNotFound { side, price })?;
        let removed = pool.get(index).level;
        pool.push(index);
        self.dirty = true;
        Ok(removed)
    }

    /// Zero amount deletes the price if present; anything else amends the
    /// price in place or inserts it. Returns whether the book changed.
    pub(crate) fn upsert_by_price(&mut self, side: Side, level: Level) -> bool {
        if level.amount == 0.0 {
            return self.remove_by_price(side, level.price).is_ok();
        }
        let (list, pool) = self.side_mut(side);
        if list.amend(pool, |existing| existing.price == level.price, level).is_none() {
            self.insert(side, level);
        }
        self.dirty = true;
        true
    }

    fn find_id(&self, side: Side, id: i64) -> Option<NodeIndex> {
        self.side(side).find(&self.pool, |level| level.id == id)
    }

    /// Overwrite a node, moving it when the price changes
    fn replace_node(&mut self, side: Side, index: NodeIndex, level: Level) {
        let (list, pool) = self.side_mut(side);
        if pool.get(index).level.price == level.price {
            pool.get_mut(index).level = level;
        } else {
            list.unlink(index, pool);
            pool.get_mut(index).level = level;
            list.insert_node(index, pool, |existing| {
                side.belongs_before(existing.price, level.price)
            });
        }
        self.dirty = true;
    }

    pub(crate) fn amend_by_id(&mut self, side: Side, level: Level) -> Result<(), DepthError> {
        let index = self
            .find_id(side, level.id)
            .ok_or(DepthError::IdNotFound { side, id: level.id })?;
        self.replace_node(side, index, level);
        Ok(())
    }

    /// Remove the level carrying `id`. With `bypass` a missing id is not an
    /// error. Returns whether a level was removed.
    pub(crate) fn delete_by_id(&mut self, side: Side, id: i64, bypass: bool) -> Result<bool, DepthError> {
        let (list, pool) = self.side_mut(side);
        match list.remove(pool, |level| level.id == id) {
            Some(index) => {
                pool.push(index);
                self.dirty = true;
                Ok(true)
            }
            None if bypass => Ok(false),
            None => Err(DepthError::IdNotFound { side, id }),
        }
    }

    pub(crate) fn update_insert_by_id(&mut self, side: Side, level: Level) {
        match self.find_id(side, level.id) {
            Some(index) => self.replace_node(side, index, level),
            None => self.insert(side, level),
        }
    }

    /// Cut both sides down to `max` levels; zero keeps everything
    pub(crate) fn truncate(&mut self, max: usize) {
        if max == 0 {
            return;
        }
        let released = self.bids.truncate(max, &mut self.pool) + self.asks.truncate(max, &mut self.pool);
        if released > 0 {
            self.dirty = true;
        }
    }

    fn best(&self, side: Side) -> Option<Level> {
        self.side(side).first(&self.pool).copied()
    }
}

/// Order book depth for one (exchange, instrument, segment).
pub struct Depth {
    identifier: Arc<Identifier>,
    book: Mutex<Book>,
    signal: ChangeSignal,
    changes: Option<broadcast::Sender<Arc<Identifier>>>,
}

impl Depth {
    /// Create an empty, unregistered depth
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier: Arc::new(identifier),
            book: Mutex::new(Book::new()),
            signal: ChangeSignal::new(),
            changes: None,
        }
    }

    /// Create a depth that announces its changes on `changes`
    pub(crate) fn with_notifier(
        identifier: Identifier,
        changes: broadcast::Sender<Arc<Identifier>>,
    ) -> Self {
        Self {
            changes: Some(changes),
            ..Self::new(identifier)
        }
    }

    #[inline]
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Run `f` under the lock and announce the change if it touched
    /// anything visible, whatever it returned.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut Book) -> T) -> T {
        let mut book = self.book.lock();
        let out = f(&mut book);
        let dirty = mem::take(&mut book.dirty);
        drop(book);
        if dirty {
            self.announce();
        }
        out
    }

    fn announce(&self) {
        self.signal.notify();
        if let Some(changes) = &self.changes {
            if changes.receiver_count() > 0 {
                let _ = changes.send(Arc::clone(&self.identifier));
            }
        }
    }

    // ========================================================================
    // Single-level mutation
    // ========================================================================

    /// Insert a bid at its sorted position
    pub fn add_bid(&self, level: Level) -> Result<(), DepthError> {
        self.add(Side::Bid, level)
    }

    /// Insert an ask at its sorted position
    pub fn add_ask(&self, level: Level) -> Result<(), DepthError> {
        self.add(Side::Ask, level)
    }

    fn add(&self, side: Side, level: Level) -> Result<(), DepthError> {
        if level.price.is_nan() || level.amount.is_nan() || level.price <= 0.0 || level.amount <= 0.0 {
            return Err(DepthError::InvalidLevel {
                side,
                price: level.price,
                amount: level.amount,
            });
        }
        self.mutate(|book| book.insert(side, level));
        Ok(())
    }

    /// Remove the bid at exactly `price`, returning it
    pub fn remove_bid_by_price(&self, price: f64) -> Result<Level, DepthError> {
        self.mutate(|book| book.remove_by_price(Side::Bid, price))
    }

    /// Remove the ask at exactly `price`, returning it
    pub fn remove_ask_by_price(&self, price: f64) -> Result<Level, DepthError> {
        self.mutate(|book| book.remove_by_price(Side::Ask, price))
    }

    // ========================================================================
    // Wholesale replacement
    // ========================================================================

    /// Validate both sides and replace the book with them.
    ///
    /// Nothing is touched unless both sides pass.
    pub fn process(
        &self,
        bids: &[Level],
        asks: &[Level],
        is_funding: bool,
        allow_duplicate_prices: bool,
    ) -> Result<(), ValidationError> {
        validator::verify_book(bids, asks, is_funding, allow_duplicate_prices)?;
        self.mutate(|book| {
            book.load(bids, asks);
            book.options.is_funding_rate = is_funding;
            book.options.allow_duplicate_prices = allow_duplicate_prices;
        });
        Ok(())
    }

    /// `process` a snapshot and take over its update id and timestamp
    pub fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), ValidationError> {
        self.load_with(snapshot, snapshot.allow_duplicate_prices)
    }

    pub(crate) fn load_with(
        &self,
        snapshot: &Snapshot,
        allow_duplicate_prices: bool,
    ) -> Result<(), ValidationError> {
        validator::verify_book(
            &snapshot.bids,
            &snapshot.asks,
            snapshot.is_funding_rate,
            allow_duplicate_prices,
        )?;
        self.replace(snapshot, allow_duplicate_prices);
        Ok(())
    }

    /// Replace the book with an already validated snapshot
    pub(crate) fn replace(&self, snapshot: &Snapshot, allow_duplicate_prices: bool) {
        self.mutate(|book| {
            book.load(&snapshot.bids, &snapshot.asks);
            book.options = Options {
                last_updated: Some(snapshot.last_updated.unwrap_or_else(Utc::now)),
                last_update_id: snapshot.last_update_id,
                allow_duplicate_prices,
                is_funding_rate: snapshot.is_funding_rate,
            };
        });
    }

    /// Empty both sides in place. Metadata survives as stale information.
    pub fn flush(&self) {
        let released = self.mutate(Book::clear);
        info!(depth = %self.identifier, released, "depth flushed");
    }

    /// Flush and refuse incremental updates until the next snapshot
    pub fn invalidate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!(depth = %self.identifier, %reason, "depth invalidated");
        self.mutate(|book| {
            book.clear();
            book.invalid = Some(reason);
            book.dirty = true;
        });
    }

    /// `Ok` unless the depth was invalidated since its last snapshot
    pub fn validity(&self) -> Result<(), DepthError> {
        self.book.lock().ensure_valid()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// `(liquidity, value)` of the bid side
    pub fn total_bids_amount(&self) -> (f64, f64) {
        let book = self.book.lock();
        book.bids.amount(&book.pool)
    }

    /// `(liquidity, value)` of the ask side
    pub fn total_asks_amount(&self) -> (f64, f64) {
        let book = self.book.lock();
        book.asks.amount(&book.pool)
    }

    /// Copy out `(bids, asks)`, best price first
    pub fn retrieve(&self) -> (Vec<Level>, Vec<Level>) {
        let book = self.book.lock();
        (book.bids.retrieve(&book.pool), book.asks.retrieve(&book.pool))
    }

    /// `retrieve` plus the metadata, read under one lock
    pub fn retrieve_with_options(&self) -> (Vec<Level>, Vec<Level>, Options) {
        let book = self.book.lock();
        (
            book.bids.retrieve(&book.pool),
            book.asks.retrieve(&book.pool),
            book.options.clone(),
        )
    }

    /// The book and its metadata as one consistent snapshot
    pub fn snapshot(&self) -> Snapshot {
        let book = self.book.lock();
        Snapshot {
            identifier: (*self.identifier).clone(),
            bids: book.bids.retrieve(&book.pool),
            asks: book.asks.retrieve(&book.pool),
            last_update_id: book.options.last_update_id,
            last_updated: book.options.last_updated,
            is_funding_rate: book.options.is_funding_rate,
            allow_duplicate_prices: book.options.allow_duplicate_prices,
        }
    }

    pub fn options(&self) -> Options {
        self.book.lock().options.clone()
    }

    pub fn bid_len(&self) -> usize {
        self.book.lock().bids.len()
    }

    pub fn ask_len(&self) -> usize {
        self.book.lock().asks.len()
    }

    /// Highest bid
    pub fn best_bid(&self) -> Option<Level> {
        self.book.lock().best(Side::Bid)
    }

    /// Lowest ask
    pub fn best_ask(&self) -> Option<Level> {
        self.book.lock().best(Side::Ask)
    }

    /// `(best bid, best ask)` read under one lock
    pub fn top(&self) -> (Option<Level>, Option<Level>) {
        let book = self.book.lock();
        (book.best(Side::Bid), book.best(Side::Ask))
    }

    /// Best ask minus best bid
    pub fn spread(&self) -> Option<f64> {
        match self.top() {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<f64> {
        match self.top() {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    // ========================================================================
    // Change notification
    // ========================================================================

    /// Block until the book next changes or `cancel` fires
    pub fn wait(&self, cancel: &Receiver<()>) -> Wake {
        self.signal.wait(cancel)
    }

    /// Block until the book next changes or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Wake {
        self.signal.wait_timeout(timeout)
    }

    // ========================================================================
    // Pool maintenance
    // ========================================================================

    /// Drop pooled nodes idle longer than `ttl`. Returns how many went.
    pub fn sweep_pool(&self, ttl: Duration) -> usize {
        let mut book = self.book.lock();
        let Book { bids, asks, pool, .. } = &mut *book;
        let removed = pool.sweep(ttl, &mut [bids, asks]);
        if removed > 0 {
            debug!(depth = %self.identifier, removed, remaining = pool.capacity(), "node pool swept");
        }
        removed
    }

    /// Nodes waiting for reuse
    pub fn pool_free_len(&self) -> usize {
        self.book.lock().pool.free_len()
    }

    /// Nodes backed by storage, live or free
    pub fn pool_capacity(&self) -> usize {
        self.book.lock().pool.capacity()
    }
}

impl fmt::Debug for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let book = self.book.lock();
        f.debug_struct("Depth")
            .field("identifier", &self.identifier)
            .field("bid_levels", &book.bids.len())
            .field("ask_levels", &book.asks.len())
            .field("options", &book.options)
            .field("invalid", &book.invalid)
            .finish()
    }
}
