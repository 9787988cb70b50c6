use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calc::{self, allocator, pnl};
use crate::errors::CoreError;

/// A partial or full sale recorded against one buy lot.
///
/// `profit_loss` and `apy` are computed once, when the sale is recorded,
/// and stay pinned to those values even if the lot is edited later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellAllocation {
    pub id: Uuid,
    pub sell_price: f64,
    pub sell_amount: f64,
    pub sell_date: NaiveDate,
    pub profit_loss: f64,
    pub apy: f64,
}

impl SellAllocation {
    /// Price a sale of `sell_amount` against the given buy terms.
    pub fn priced(
        buy_price: f64,
        buy_date: NaiveDate,
        sell_price: f64,
        sell_amount: f64,
        sell_date: NaiveDate,
    ) -> Self {
        let metrics = pnl::sell_metrics(buy_price, buy_date, sell_price, sell_amount, sell_date);
        Self {
            id: Uuid::new_v4(),
            sell_price,
            sell_amount,
            sell_date,
            profit_loss: metrics.profit_loss,
            apy: metrics.apy,
        }
    }
}

/// Fields needed to open a new lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLot {
    pub account_id: Uuid,
    pub stock_code: String,
    pub buy_price: f64,
    pub buy_amount: f64,
    pub buy_date: NaiveDate,
}

impl NewLot {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_terms(&self.stock_code, self.buy_price, self.buy_amount)
    }
}

/// Full replacement of a lot's editable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotEdit {
    pub account_id: Uuid,
    pub stock_code: String,
    pub buy_price: f64,
    pub buy_amount: f64,
    pub buy_date: NaiveDate,
}

impl LotEdit {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_terms(&self.stock_code, self.buy_price, self.buy_amount)
    }
}

fn validate_terms(stock_code: &str, buy_price: f64, buy_amount: f64) -> Result<(), CoreError> {
    if stock_code.trim().is_empty() {
        return Err(CoreError::ValidationError(
            "Stock code must not be empty".into(),
        ));
    }
    calc::ensure_positive("buyPrice", buy_price)?;
    calc::ensure_positive("buyAmount", buy_amount)?;
    Ok(())
}

/// One buy transaction, and the aggregate root for its sell allocations.
///
/// Invariants held at rest:
/// - `unsold_amount == buy_amount − Σ sell_allocations.sell_amount`
/// - `0 ≤ unsold_amount ≤ buy_amount`
/// - `profit_loss == Σ sell_allocations.profit_loss`
///
/// Allocations are only added or removed through [`BuyLot::record_sale`] and
/// [`BuyLot::remove_sale`], which recompute the cached aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyLot {
    pub id: Uuid,
    pub account_id: Uuid,
    pub stock_code: String,
    pub buy_price: f64,
    pub buy_amount: f64,
    pub buy_date: NaiveDate,
    pub unsold_amount: f64,
    pub profit_loss: f64,
    #[serde(default)]
    pub sell_allocations: Vec<SellAllocation>,
}

impl BuyLot {
    pub fn new(new_lot: NewLot) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: new_lot.account_id,
            stock_code: new_lot.stock_code.trim().to_string(),
            buy_price: new_lot.buy_price,
            buy_amount: new_lot.buy_amount,
            buy_date: new_lot.buy_date,
            unsold_amount: new_lot.buy_amount,
            profit_loss: 0.0,
            sell_allocations: Vec::new(),
        }
    }

    pub fn sold_amount(&self) -> f64 {
        allocator::sold_amount(self)
    }

    pub fn allocation(&self, allocation_id: Uuid) -> Option<&SellAllocation> {
        self.sell_allocations.iter().find(|s| s.id == allocation_id)
    }

    /// Validate, price and append a sale. Leaves the lot untouched on error.
    pub fn record_sale(
        &mut self,
        sell_price: f64,
        sell_amount: f64,
        sell_date: NaiveDate,
        epsilon: f64,
    ) -> Result<SellAllocation, CoreError> {
        calc::ensure_positive("sellPrice", sell_price)?;
        calc::ensure_positive("sellAmount", sell_amount)?;
        allocator::validate_new_sell(self, sell_amount, epsilon)?;

        let allocation = SellAllocation::priced(
            self.buy_price,
            self.buy_date,
            sell_price,
            sell_amount,
            sell_date,
        );
        self.sell_allocations.push(allocation.clone());
        self.recompute_aggregates();
        Ok(allocation)
    }

    /// Remove a sale, returning its quantity to `unsold_amount`.
    pub fn remove_sale(&mut self, allocation_id: Uuid) -> Result<SellAllocation, CoreError> {
        let idx = self
            .sell_allocations
            .iter()
            .position(|s| s.id == allocation_id)
            .ok_or(CoreError::AllocationNotFound {
                lot_id: self.id,
                allocation_id,
            })?;
        let removed = self.sell_allocations.remove(idx);
        self.recompute_aggregates();
        Ok(removed)
    }

    /// Apply an edit after checking it against the existing sales.
    ///
    /// Existing allocations keep the P&L and APY computed when they were recorded.
    pub fn apply_edit(&mut self, edit: &LotEdit, epsilon: f64) -> Result<(), CoreError> {
        edit.validate()?;
        allocator::validate_edited_buy_amount(self, edit.buy_amount, epsilon)?;
        allocator::validate_edited_buy_date(self, edit.buy_date)?;

        self.account_id = edit.account_id;
        self.stock_code = edit.stock_code.trim().to_string();
        self.buy_price = edit.buy_price;
        self.buy_amount = edit.buy_amount;
        self.buy_date = edit.buy_date;
        self.recompute_aggregates();
        Ok(())
    }

    /// Rebuild `unsold_amount` and `profit_loss` from the allocation list.
    pub fn recompute_aggregates(&mut self) {
        let remaining = allocator::remaining(self);
        // The allocator only lets a sale overshoot by float noise, so any negative here is noise.
        self.unsold_amount = remaining.max(0.0);
        self.profit_loss = calc::round3(self.sell_allocations.iter().map(|s| s.profit_loss).sum());
    }

    /// Whether the cached aggregates agree with the allocation list.
    pub fn is_consistent(&self, epsilon: f64) -> bool {
        let expected_unsold = allocator::remaining(self);
        let expected_pl: f64 = self.sell_allocations.iter().map(|s| s.profit_loss).sum();
        (self.unsold_amount - expected_unsold).abs() <= epsilon.max(1e-9)
            && self.unsold_amount >= -epsilon
            && self.unsold_amount <= self.buy_amount + epsilon
            && (self.profit_loss - expected_pl).abs() <= 0.001 + 1e-9
    }

    /// Allocations ordered newest sale first.
    pub fn allocations_newest_first(&self) -> Vec<&SellAllocation> {
        let mut sales: Vec<&SellAllocation> = self.sell_allocations.iter().collect();
        sales.sort_by(|a, b| b.sell_date.cmp(&a.sell_date));
        sales
    }
}

/// A sale carried inside an import payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedSell {
    pub sell_price: f64,
    pub sell_amount: f64,
    pub sell_date: NaiveDate,
}

/// A lot with its historical sales, as accepted by bulk import.
/// The target account is given once for the whole import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedLot {
    pub stock_code: String,
    pub buy_price: f64,
    pub buy_amount: f64,
    pub buy_date: NaiveDate,
    #[serde(default)]
    pub sells: Vec<ImportedSell>,
}

impl ImportedLot {
    /// Build the lot and replay every sale through [`BuyLot::record_sale`].
    pub fn into_lot(self, account_id: Uuid, epsilon: f64) -> Result<BuyLot, CoreError> {
        let new_lot = NewLot {
            account_id,
            stock_code: self.stock_code,
            buy_price: self.buy_price,
            buy_amount: self.buy_amount,
            buy_date: self.buy_date,
        };
        new_lot.validate()?;
        let mut lot = BuyLot::new(new_lot);
        for sell in self.sells {
            lot.record_sale(sell.sell_price, sell.sell_amount, sell.sell_date, epsilon)?;
        }
        Ok(lot)
    }
}
