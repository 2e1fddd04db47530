//! Error types.
//!
//! Every failure is returned to the immediate caller. The pipeline logs and
//! moves on; nothing in here is fatal to the process.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::update::{Identifier, Side};

/// A raw batch of levels failed its consistency checks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{side} level {index}: price not set")]
    PriceNotSet { side: Side, index: usize },

    #[error("{side} level {index}: invalid amount {amount} at price {price}")]
    AmountInvalid {
        side: Side,
        index: usize,
        price: f64,
        amount: f64,
    },

    #[error("{side} level {index}: funding period unset at price {price}")]
    PeriodUnset { side: Side, index: usize, price: f64 },

    #[error("{side} level {index}: price {price} out of order after {previous}")]
    OutOfOrder {
        side: Side,
        index: usize,
        previous: f64,
        price: f64,
    },

    #[error("{side} level {index}: duplicate price {price}")]
    PriceDuplication { side: Side, index: usize, price: f64 },

    #[error("{side} level {index}: duplicate id {id}")]
    IdDuplication { side: Side, index: usize, id: i64 },
}

/// A mutation could not be applied to a depth container
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DepthError {
    #[error("no levels supplied")]
    EmptyInput,

    #[error("{side} price {price} not found")]
    PriceNotFound { side: Side, price: f64 },

    #[error("{side} id {id} not found")]
    IdNotFound { side: Side, id: i64 },

    #[error("{side} level rejected: price {price}, amount {amount}")]
    InvalidLevel { side: Side, price: f64, amount: f64 },

    #[error("book invalidated: {0}")]
    Invalid(String),
}

/// An update or snapshot was refused by the pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("update carries no levels")]
    EmptyUpdate,

    #[error("identifier is missing its exchange or instrument")]
    IdentifierUnset,

    #[error("update has neither an update id nor an update time")]
    UpdateIdOrTimeUnset,

    #[error("buffer sorts by update id but the update id is unset")]
    UpdateIdUnset,

    #[error("buffer sorts by update time but the update time is unset")]
    UpdateTimeUnset,

    #[error("{side} level {index}: invalid price {price}")]
    InvalidPrice { side: Side, index: usize, price: f64 },

    #[error("{side} level {index}: invalid amount {amount}")]
    InvalidAmount { side: Side, index: usize, amount: f64 },

    #[error("{side} level {index}: id unset on a by-id update")]
    IdUnset { side: Side, index: usize },

    #[error("no depth loaded for {0}")]
    DepthNotFound(Identifier),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Depth(#[from] DepthError),
}

/// A recorded feed could not be turned into events
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {row}: missing {field}")]
    MissingField { row: u64, field: &'static str },

    #[error("row {row}: {field} {value} does not fit an f64")]
    Unrepresentable {
        row: u64,
        field: &'static str,
        value: Decimal,
    },
}

impl PipelineError {
    /// The validator failure behind this error, if any
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            PipelineError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = ValidationError::OutOfOrder {
            side: Side::Ask,
            index: 1,
            previous: 101.0,
            price: 100.0,
        };
        assert_eq!(err.to_string(), "ask level 1: price 100 out of order after 101");

        let err = DepthError::PriceNotFound {
            side: Side::Bid,
            price: 1338.0,
        };
        assert_eq!(err.to_string(), "bid price 1338 not found");
    }

    #[test]
    fn test_pipeline_error_wraps_validation() {
        let err: PipelineError = ValidationError::PriceDuplication {
            side: Side::Bid,
            index: 1,
            price: 100.0,
        }
        .into();
        assert!(matches!(
            err.validation(),
            Some(ValidationError::PriceDuplication { .. })
        ));
        assert!(PipelineError::EmptyUpdate.validation().is_none());
    }
}
