//! Replay - recorded depth feeds as `FeedEvent`s.
//!
//! A capture is a CSV file with one level per row. Consecutive rows sharing
//! kind, instrument, update id, timestamp and action form one event:
//!
//! ```text
//! kind,exchange,instrument,segment,side,price,amount,id,update_id,timestamp
//! snapshot,coinbase,BTC-USD,spot,bid,64000.5,0.25,,100,2024-03-01T00:00:00Z
//! snapshot,coinbase,BTC-USD,spot,ask,64001.0,1.10,,100,2024-03-01T00:00:00Z
//! update,coinbase,BTC-USD,spot,ask,64001.0,0,,101,2024-03-01T00:00:00.250Z
//! flush,coinbase,BTC-USD,spot,,,,,,
//! ```
//!
//! Optional trailing columns: `action` (turns an update into a by-id update)
//! and `reason` (for `invalidate` rows).

use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::engine::FeedEvent;
use crate::error::ReplayError;
use crate::update::{Action, Identifier, Level, MarketSegment, Side, Snapshot, Update};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Snapshot,
    Update,
    Flush,
    Invalidate,
}

impl RowKind {
    /// Kinds whose rows accumulate into one multi-level event
    #[inline]
    fn is_batched(self) -> bool {
        matches!(self, RowKind::Snapshot | RowKind::Update)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DepthRow {
    pub kind: RowKind,
    pub exchange: String,
    pub instrument: String,
    pub segment: Option<MarketSegment>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    pub amount: Option<Decimal>,
    pub id: Option<i64>,
    pub update_id: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DepthRow {
    pub fn identifier(&self) -> Identifier {
        Identifier::new(
            self.exchange.as_str(),
            self.instrument.as_str(),
            self.segment.unwrap_or_default(),
        )
    }

    fn same_event(&self, other: &DepthRow) -> bool {
        self.kind == other.kind
            && self.exchange == other.exchange
            && self.instrument == other.instrument
            && self.segment == other.segment
            && self.update_id == other.update_id
            && self.timestamp == other.timestamp
            && self.action == other.action
    }

    /// The row's level, or `None` for a row that only marks an empty book
    fn level(&self, row: u64) -> Result<Option<(Side, Level)>, ReplayError> {
        let Some(side) = self.side else {
            if self.kind == RowKind::Snapshot && self.price.is_none() {
                return Ok(None);
            }
            return Err(ReplayError::MissingField { row, field: "side" });
        };
        let price = match self.price {
            Some(price) => to_f64(row, "price", price)?,
            // A by-id delete only needs the id
            None if self.action == Some(Action::Delete) => 0.0,
            None => return Err(ReplayError::MissingField { row, field: "price" }),
        };
        let amount = match self.amount {
            Some(amount) => to_f64(row, "amount", amount)?,
            None => 0.0,
        };
        let level = Level::new(price, amount).with_id(self.id.unwrap_or(0));
        Ok(Some((side, level)))
    }
}

fn to_f64(row: u64, field: &'static str, value: Decimal) -> Result<f64, ReplayError> {
    value
        .to_f64()
        .ok_or(ReplayError::Unrepresentable { row, field, value })
}

/// Iterator over the events of a CSV capture.
pub struct ReplayReader<R> {
    rows: csv::DeserializeRecordsIntoIter<R, DepthRow>,
    /// First row of the next event, or the error that ended the last one
    pending: Option<Result<(u64, DepthRow), csv::Error>>,
    /// Data rows read so far; the header is not counted
    row: u64,
}

impl ReplayReader<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        Ok(Self::from_csv(reader))
    }
}

impl<R: io::Read> ReplayReader<R> {
    pub fn new(reader: R) -> Self {
        Self::from_csv(
            csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(reader),
        )
    }

    fn from_csv(reader: csv::Reader<R>) -> Self {
        Self {
            rows: reader.into_deserialize(),
            pending: None,
            row: 0,
        }
    }

    fn next_row(&mut self) -> Option<Result<(u64, DepthRow), csv::Error>> {
        if let Some(pending) = self.pending.take() {
            return Some(pending);
        }
        let row = self.rows.next()?;
        self.row += 1;
        Some(row.map(|row| (self.row, row)))
    }
}

impl<R: io::Read> Iterator for ReplayReader<R> {
    type Item = Result<FeedEvent, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (number, first) = match self.next_row()? {
            Ok(row) => row,
            Err(err) => return Some(Err(err.into())),
        };

        let mut group = vec![(number, first)];
        if group[0].1.kind.is_batched() {
            while let Some(next) = self.next_row() {
                match next {
                    Ok((number, row)) if row.same_event(&group[0].1) => group.push((number, row)),
                    other => {
                        self.pending = Some(other);
                        break;
                    }
                }
            }
        }
        Some(build_event(group))
    }
}

fn build_event(group: Vec<(u64, DepthRow)>) -> Result<FeedEvent, ReplayError> {
    let (first_row, head) = &group[0];
    let identifier = head.identifier();

    match head.kind {
        RowKind::Flush => return Ok(FeedEvent::Flush(identifier)),
        RowKind::Invalidate => {
            let reason = head.reason.clone().unwrap_or_else(|| format!("replay row {first_row}"));
            return Ok(FeedEvent::Invalidate(identifier, reason));
        }
        RowKind::Snapshot | RowKind::Update => {}
    }

    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for (number, row) in &group {
        match row.level(*number)? {
            Some((Side::Bid, level)) => bids.push(level),
            Some((Side::Ask, level)) => asks.push(level),
            None => {}
        }
    }

    if head.kind == RowKind::Snapshot {
        return Ok(FeedEvent::Snapshot(Snapshot {
            identifier,
            bids,
            asks,
            last_update_id: head.update_id.unwrap_or(0),
            last_updated: head.timestamp,
            ..Default::default()
        }));
    }

    Ok(FeedEvent::Update(
        identifier,
        Update {
            bids,
            asks,
            action: head.action.unwrap_or_default(),
            by_id: head.action.is_some(),
            update_id: head.update_id.unwrap_or(0),
            update_time: head.timestamp,
            max_depth: 0,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAPTURE: &str = "\
kind,exchange,instrument,segment,side,price,amount,id,update_id,timestamp
snapshot,coinbase,BTC-USD,spot,bid,100.5,1.25,,10,2024-03-01T00:00:00Z
snapshot,coinbase,BTC-USD,spot,bid,100.0,2,,10,2024-03-01T00:00:00Z
snapshot,coinbase,BTC-USD,spot,ask,101.0,1,,10,2024-03-01T00:00:00Z
update,coinbase,BTC-USD,spot,ask,101.0,0,,11,2024-03-01T00:00:01Z
update,coinbase,BTC-USD,spot,ask,102.0,3,,11,2024-03-01T00:00:01Z
update,coinbase,BTC-USD,spot,bid,100.0,5,,12,2024-03-01T00:00:02Z
flush,coinbase,BTC-USD,spot,,,,,,
";

    fn events(csv: &str) -> Vec<Result<FeedEvent, ReplayError>> {
        ReplayReader::new(csv.as_bytes()).collect()
    }

    #[test]
    fn test_groups_rows_into_events() {
        let events: Vec<_> = events(CAPTURE).into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 4);

        let FeedEvent::Snapshot(snapshot) = &events[0] else {
            panic!("expected a snapshot, got {:?}", events[0]);
        };
        assert_eq!(snapshot.identifier, Identifier::new("coinbase", "BTC-USD", MarketSegment::Spot));
        assert_eq!(snapshot.bids, vec![Level::new(100.5, 1.25), Level::new(100.0, 2.0)]);
        assert_eq!(snapshot.asks, vec![Level::new(101.0, 1.0)]);
        assert_eq!(snapshot.last_update_id, 10);

        let FeedEvent::Update(_, update) = &events[1] else {
            panic!("expected an update, got {:?}", events[1]);
        };
        assert_eq!(update.asks, vec![Level::new(101.0, 0.0), Level::new(102.0, 3.0)]);
        assert_eq!(update.update_id, 11);
        assert!(!update.by_id);

        assert!(matches!(&events[2], FeedEvent::Update(_, u) if u.update_id == 12));
        assert!(matches!(&events[3], FeedEvent::Flush(_)));
    }

    #[test]
    fn test_action_column_makes_by_id_update() {
        let csv = "\
kind,exchange,instrument,segment,side,price,amount,id,update_id,timestamp,action,reason
update,bitmex,XBTUSD,perpetual_swap,ask,,,42,7,,delete,
invalidate,bitmex,XBTUSD,perpetual_swap,,,,,,,,sequence gap
";
        let events: Vec<_> = events(csv).into_iter().map(Result::unwrap).collect();
        let FeedEvent::Update(identifier, update) = &events[0] else {
            panic!("expected an update, got {:?}", events[0]);
        };
        assert_eq!(identifier.segment, MarketSegment::PerpetualSwap);
        assert!(update.by_id);
        assert_eq!(update.action, Action::Delete);
        assert_eq!(update.asks[0].id, 42);
        assert_eq!(
            events[1],
            FeedEvent::Invalidate(identifier.clone(), "sequence gap".to_string())
        );
    }

    #[test]
    fn test_missing_side_is_reported() {
        let csv = "\
kind,exchange,instrument,segment,side,price,amount,id,update_id,timestamp
update,coinbase,BTC-USD,spot,,100,1,,1,
";
        let events = events(csv);
        assert!(matches!(
            events[0],
            Err(ReplayError::MissingField { row: 1, field: "side" })
        ));
    }

    #[test]
    fn test_bad_row_does_not_swallow_previous_event() {
        let csv = "\
kind,exchange,instrument,segment,side,price,amount,id,update_id,timestamp
update,coinbase,BTC-USD,spot,bid,100,1,,1,
update,coinbase,BTC-USD,spot,bid,not-a-price,1,,1,
";
        let events = events(csv);
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ReplayError::Csv(_))));
    }
}
