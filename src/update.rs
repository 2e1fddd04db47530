//! Depth events and the values they carry.
//!
//! Snapshots and updates arrive from the transport layer already decoded.
//! Nothing in here is long lived: an `Update` is consumed by one pipeline
//! application (or parked in the re-order buffer until it is flushed).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Book side (bid = buy, ask = sell)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Side {
    /// Buy side, walked in descending price order
    Bid = 0,
    /// Sell side, walked in ascending price order
    Ask = 1,
}

impl Side {
    /// Returns the opposite side
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// True when a level priced `incoming` must sit in front of a level
    /// already stored at `existing`.
    ///
    /// Equal prices never jump the queue, so non-aggregated books keep
    /// arrival order within a price.
    #[inline]
    pub fn belongs_before(self, existing: f64, incoming: f64) -> bool {
        match self {
            Side::Bid => incoming > existing,
            Side::Ask => incoming < existing,
        }
    }

    /// True when `price` breaks the side's ordering after `previous`.
    #[inline]
    pub fn is_out_of_order(self, previous: f64, price: f64) -> bool {
        match self {
            Side::Bid => price > previous,
            Side::Ask => price < previous,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => f.write_str("bid"),
            Side::Ask => f.write_str("ask"),
        }
    }
}

/// One priced size entry.
///
/// `period` is only meaningful for funding-rate books. `id` is the
/// exchange-assigned identifier, zero when the venue does not publish one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub amount: f64,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub period: i64,
}

impl Level {
    /// Create a level without identifier or period
    #[inline]
    pub const fn new(price: f64, amount: f64) -> Self {
        Self {
            price,
            amount,
            id: 0,
            period: 0,
        }
    }

    /// Attach an exchange-assigned identifier
    #[inline]
    pub const fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Attach a funding period
    #[inline]
    pub const fn with_period(mut self, period: i64) -> Self {
        self.period = period;
        self
    }

    /// Size times price
    #[inline]
    pub fn notional(&self) -> f64 {
        self.price * self.amount
    }
}

/// Market segment an instrument trades in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSegment {
    #[default]
    Spot,
    Margin,
    Futures,
    PerpetualSwap,
    Options,
}

impl fmt::Display for MarketSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketSegment::Spot => "spot",
            MarketSegment::Margin => "margin",
            MarketSegment::Futures => "futures",
            MarketSegment::PerpetualSwap => "perpetual_swap",
            MarketSegment::Options => "options",
        };
        f.write_str(s)
    }
}

/// Lookup key of one depth container
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub exchange: String,
    pub instrument: String,
    #[serde(default)]
    pub segment: MarketSegment,
}

impl Identifier {
    pub fn new(
        exchange: impl Into<String>,
        instrument: impl Into<String>,
        segment: MarketSegment,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            instrument: instrument.into(),
            segment,
        }
    }

    /// Both the exchange and the instrument are named
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.exchange.is_empty() && !self.instrument.is_empty()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.instrument, self.segment)
    }
}

/// What a by-identifier update does with its levels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Replace the level carrying the same id
    Amend,
    /// Remove the level carrying the same id
    Delete,
    /// Insert a fresh level at its sorted position
    Insert,
    /// Amend when the id is present, insert otherwise
    #[default]
    UpdateInsert,
}

/// Incremental depth change for one instrument
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    /// Only read by the by-identifier strategy
    pub action: Action,
    /// Match levels by exchange id instead of by price
    pub by_id: bool,
    /// Exchange sequence number, zero when unset
    pub update_id: i64,
    pub update_time: Option<DateTime<Utc>>,
    /// Truncate each side to this many levels after applying, zero keeps all
    pub max_depth: usize,
}

impl Update {
    /// Number of levels across both sides
    #[inline]
    pub fn len(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Full replacement of an instrument's book
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub identifier: Identifier,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub last_update_id: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_funding_rate: bool,
    pub allow_duplicate_prices: bool,
}
