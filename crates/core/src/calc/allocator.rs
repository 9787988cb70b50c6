use chrono::NaiveDate;

use crate::errors::CoreError;
use crate::models::lot::BuyLot;

/// Total quantity already allocated to sells.
pub fn sold_amount(lot: &BuyLot) -> f64 {
    lot.sell_allocations.iter().map(|s| s.sell_amount).sum()
}

/// `buyAmount − Σ sellAmount`, computed from the allocations rather than
/// the cached `unsold_amount`.
pub fn remaining(lot: &BuyLot) -> f64 {
    lot.buy_amount - sold_amount(lot)
}

/// Earliest sell date among the lot's allocations, if any exist.
pub fn earliest_sell_date(lot: &BuyLot) -> Option<NaiveDate> {
    lot.sell_allocations.iter().map(|s| s.sell_date).min()
}

/// Check that `amount` more can be sold from `lot`.
///
/// `epsilon` absorbs float noise from summing fractional quantities, so
/// selling exactly the remainder of `0.1 + 0.2` shares still succeeds.
pub fn validate_new_sell(lot: &BuyLot, amount: f64, epsilon: f64) -> Result<(), CoreError> {
    let remaining = remaining(lot);
    if amount > remaining + epsilon {
        return Err(CoreError::ExceedsAvailable {
            remaining,
            requested: amount,
        });
    }
    Ok(())
}

/// A lot can't shrink below what has already been sold from it.
pub fn validate_edited_buy_amount(
    lot: &BuyLot,
    new_buy_amount: f64,
    epsilon: f64,
) -> Result<(), CoreError> {
    let pre_sold = sold_amount(lot);
    if new_buy_amount + epsilon < pre_sold {
        return Err(CoreError::BelowSoldAmount {
            pre_sold,
            requested: new_buy_amount,
        });
    }
    Ok(())
}

/// A lot's buy date can't move past its earliest sale. Lots without sales
/// accept any date.
pub fn validate_edited_buy_date(lot: &BuyLot, new_date: NaiveDate) -> Result<(), CoreError> {
    match earliest_sell_date(lot) {
        Some(earliest) if new_date > earliest => Err(CoreError::DateAfterEarliestSale {
            earliest,
            requested: new_date,
        }),
        _ => Ok(()),
    }
}
