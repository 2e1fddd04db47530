//! Snapshot validation.
//!
//! Pure checks over a raw slice of levels before it is trusted with a
//! wholesale replacement. Bids must strictly descend and asks strictly
//! ascend, unless the venue publishes non-aggregated books with repeated
//! prices.

use crate::error::ValidationError;
use crate::update::{Level, Side};

/// Check one side of a book.
///
/// Every level must carry a positive price and amount (and a funding period
/// on funding books). Each level after the first must respect the side's
/// ordering, may only repeat the previous price when `allow_duplicate_prices`
/// is set, and may not repeat the previous non-zero id.
///
/// An empty slice is valid: venues do publish momentarily empty sides.
pub fn verify(
    side: Side,
    levels: &[Level],
    is_funding: bool,
    allow_duplicate_prices: bool,
) -> Result<(), ValidationError> {
    let mut previous: Option<&Level> = None;

    for (index, level) in levels.iter().enumerate() {
        if level.price.is_nan() || level.price <= 0.0 {
            return Err(ValidationError::PriceNotSet { side, index });
        }
        if level.amount.is_nan() || level.amount <= 0.0 {
            return Err(ValidationError::AmountInvalid {
                side,
                index,
                price: level.price,
                amount: level.amount,
            });
        }
        if is_funding && level.period == 0 {
            return Err(ValidationError::PeriodUnset {
                side,
                index,
                price: level.price,
            });
        }

        if let Some(prev) = previous {
            if side.is_out_of_order(prev.price, level.price) {
                return Err(ValidationError::OutOfOrder {
                    side,
                    index,
                    previous: prev.price,
                    price: level.price,
                });
            }
            if !allow_duplicate_prices && level.price == prev.price {
                return Err(ValidationError::PriceDuplication {
                    side,
                    index,
                    price: level.price,
                });
            }
            if level.id != 0 && level.id == prev.id {
                return Err(ValidationError::IdDuplication {
                    side,
                    index,
                    id: level.id,
                });
            }
        }
        previous = Some(level);
    }
    Ok(())
}

/// Check both sides; the bid side is reported first.
pub fn verify_book(
    bids: &[Level],
    asks: &[Level],
    is_funding: bool,
    allow_duplicate_prices: bool,
) -> Result<(), ValidationError> {
    verify(Side::Bid, bids, is_funding, allow_duplicate_prices)?;
    verify(Side::Ask, asks, is_funding, allow_duplicate_prices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_side_is_valid() {
        assert!(verify(Side::Bid, &[], false, false).is_ok());
        assert!(verify_book(&[], &[], true, false).is_ok());
    }

    #[test]
    fn test_valid_book() {
        let bids = [Level::new(100.0, 1.0), Level::new(99.0, 2.0)];
        let asks = [Level::new(101.0, 1.0), Level::new(102.0, 2.0)];
        assert!(verify_book(&bids, &asks, false, false).is_ok());
    }

    #[test]
    fn test_price_not_set() {
        let bids = [Level::new(100.0, 1.0), Level::new(0.0, 1.0)];
        assert_eq!(
            verify(Side::Bid, &bids, false, false),
            Err(ValidationError::PriceNotSet { side: Side::Bid, index: 1 })
        );
        // First element is checked too
        let asks = [Level::new(0.0, 1.0)];
        assert!(matches!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::PriceNotSet { index: 0, .. })
        ));
    }

    #[test]
    fn test_amount_invalid() {
        let asks = [Level::new(100.0, 1.0), Level::new(101.0, 0.0)];
        assert!(matches!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::AmountInvalid { index: 1, .. })
        ));
        let asks = [Level::new(100.0, -1.0)];
        assert!(matches!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::AmountInvalid { index: 0, .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let asks = [Level::new(101.0, 1.0), Level::new(f64::NAN, 1.0), Level::new(99.0, 1.0)];
        assert_eq!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::PriceNotSet { side: Side::Ask, index: 1 })
        );
        let bids = [Level::new(100.0, f64::NAN)];
        assert!(matches!(
            verify(Side::Bid, &bids, false, false),
            Err(ValidationError::AmountInvalid { index: 0, .. })
        ));
    }

    #[test]
    fn test_period_unset_only_for_funding() {
        let asks = [Level::new(0.01, 1.0).with_period(2), Level::new(0.02, 1.0)];
        assert!(verify(Side::Ask, &asks, false, false).is_ok());
        assert!(matches!(
            verify(Side::Ask, &asks, true, false),
            Err(ValidationError::PeriodUnset { index: 1, .. })
        ));
    }

    #[test]
    fn test_out_of_order() {
        let asks = [Level::new(101.0, 1.0), Level::new(100.0, 1.0)];
        assert!(matches!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::OutOfOrder { index: 1, .. })
        ));
        let bids = [Level::new(100.0, 1.0), Level::new(101.0, 1.0)];
        assert!(matches!(
            verify(Side::Bid, &bids, false, false),
            Err(ValidationError::OutOfOrder { index: 1, .. })
        ));
        // Duplicates allowed does not relax the direction
        assert!(matches!(
            verify(Side::Bid, &bids, false, true),
            Err(ValidationError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_price_duplication() {
        let bids = [Level::new(100.0, 1.0), Level::new(100.0, 1.0)];
        assert_eq!(
            verify(Side::Bid, &bids, false, false),
            Err(ValidationError::PriceDuplication {
                side: Side::Bid,
                index: 1,
                price: 100.0
            })
        );
        assert!(verify(Side::Bid, &bids, false, true).is_ok());
    }

    #[test]
    fn test_id_duplication() {
        let asks = [
            Level::new(100.0, 1.0).with_id(7),
            Level::new(101.0, 1.0).with_id(7),
        ];
        assert_eq!(
            verify(Side::Ask, &asks, false, false),
            Err(ValidationError::IdDuplication {
                side: Side::Ask,
                index: 1,
                id: 7
            })
        );
        // Zero ids are "unset" and may repeat
        let asks = [Level::new(100.0, 1.0), Level::new(101.0, 1.0)];
        assert!(verify(Side::Ask, &asks, false, false).is_ok());
    }

    #[test]
    fn test_verify_book_reports_bids_first() {
        let bids = [Level::new(100.0, 1.0), Level::new(101.0, 1.0)];
        let asks = [Level::new(0.0, 1.0)];
        assert!(matches!(
            verify_book(&bids, &asks, false, false),
            Err(ValidationError::OutOfOrder { side: Side::Bid, .. })
        ));
    }
}
