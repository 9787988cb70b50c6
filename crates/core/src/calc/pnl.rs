use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{round2, round3};

/// Realized result of selling part of a lot, fixed at sell time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellMetrics {
    pub profit_loss: f64,
    pub holding_days: i64,
    pub apy: f64,
}

/// Whole days between buy and sell, never less than 1.
///
/// Same-day sells (and sells dated before the buy) count as one day so the
/// annualization exponent stays finite.
pub fn holding_days(buy_date: NaiveDate, sell_date: NaiveDate) -> i64 {
    (sell_date - buy_date).num_days().max(1)
}

/// `(sellPrice − buyPrice) × amount`, rounded to 3 decimals.
pub fn profit_loss(buy_price: f64, sell_price: f64, amount: f64) -> f64 {
    round3((sell_price - buy_price) * amount)
}

/// Ceiling for [`apy`]. Large short-term gains annualize past `f64::MAX`
/// and would otherwise come out as infinity.
pub const MAX_APY: f64 = 1.0e12;

/// Annualized yield in percent: `((1 + ratio)^(365 / days) − 1) × 100`, rounded to 2 decimals
/// and capped at [`MAX_APY`].
pub fn apy(profit_loss: f64, buy_price: f64, amount: f64, holding_days: i64) -> f64 {
    let cost = buy_price * amount;
    if cost == 0.0 {
        return 0.0;
    }
    let profit_ratio = profit_loss / cost;
    let exponent = 365.0 / holding_days.max(1) as f64;
    round2((((1.0 + profit_ratio).powf(exponent) - 1.0) * 100.0).min(MAX_APY))
}

pub fn sell_metrics(
    buy_price: f64,
    buy_date: NaiveDate,
    sell_price: f64,
    amount: f64,
    sell_date: NaiveDate,
) -> SellMetrics {
    let profit_loss = profit_loss(buy_price, sell_price, amount);
    let holding_days = holding_days(buy_date, sell_date);
    SellMetrics {
        profit_loss,
        holding_days,
        apy: apy(profit_loss, buy_price, amount, holding_days),
    }
}
