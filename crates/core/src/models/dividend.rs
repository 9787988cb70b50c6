use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::calc;
use crate::errors::CoreError;

/// The share of a dividend batch credited to one buy lot.
///
/// `account_id` is copied from the lot when the allocation is built; it is a
/// cache for account filtering, not an independent source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivAllocation {
    pub buy_record_id: Uuid,
    pub account_id: Uuid,
    /// Number of shares of the lot receiving the dividend
    pub div_amount: f64,
}

/// Caller-supplied allocation: which lot, and how many of its shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivAllocationInput {
    pub buy_record_id: Uuid,
    pub div_amount: f64,
}

/// Everything needed to create a batch, or to fully replace one on edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDividendBatch {
    pub stock_code: String,
    pub per_div: f64,
    pub div_date: NaiveDate,
    pub allocations: Vec<DivAllocationInput>,
}

impl NewDividendBatch {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.stock_code.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "Stock code must not be empty".into(),
            ));
        }
        calc::ensure_positive("perDiv", self.per_div)?;
        if self.allocations.is_empty() {
            return Err(CoreError::ValidationError(
                "A dividend batch needs at least one allocation".into(),
            ));
        }
        let mut seen = HashSet::new();
        for allocation in &self.allocations {
            calc::ensure_positive("divAmount", allocation.div_amount)?;
            if !seen.insert(allocation.buy_record_id) {
                return Err(CoreError::ValidationError(format!(
                    "Buy lot {} appears more than once in the allocation list",
                    allocation.buy_record_id
                )));
            }
        }
        Ok(())
    }

    pub fn lot_ids(&self) -> Vec<Uuid> {
        self.allocations.iter().map(|a| a.buy_record_id).collect()
    }
}

/// One dividend event for a stock, apportioned across buy lots.
///
/// `account_ids` is derived: always the deduplicated set of
/// `div_records[].account_id`. Every method that touches `div_records`
/// rebuilds it with [`derive_account_ids`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendBatch {
    pub id: Uuid,
    pub stock_code: String,
    pub per_div: f64,
    pub div_date: NaiveDate,
    pub account_ids: Vec<Uuid>,
    pub div_records: Vec<DivAllocation>,
}

/// Distinct account ids in first-seen order.
pub fn derive_account_ids(records: &[DivAllocation]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|r| seen.insert(r.account_id).then_some(r.account_id))
        .collect()
}

impl DividendBatch {
    pub fn new(
        stock_code: impl Into<String>,
        per_div: f64,
        div_date: NaiveDate,
        div_records: Vec<DivAllocation>,
    ) -> Self {
        let account_ids = derive_account_ids(&div_records);
        Self {
            id: Uuid::new_v4(),
            stock_code: stock_code.into().trim().to_string(),
            per_div,
            div_date,
            account_ids,
            div_records,
        }
    }

    /// Total overwrite of the batch's terms and allocation list.
    pub fn replace(
        &mut self,
        stock_code: impl Into<String>,
        per_div: f64,
        div_date: NaiveDate,
        div_records: Vec<DivAllocation>,
    ) {
        self.stock_code = stock_code.into().trim().to_string();
        self.per_div = per_div;
        self.div_date = div_date;
        self.div_records = div_records;
        self.recompute_account_ids();
    }

    pub fn recompute_account_ids(&mut self) {
        self.account_ids = derive_account_ids(&self.div_records);
    }

    /// Drop every allocation pointing at `lot_id`. Returns how many were removed.
    pub fn remove_lot(&mut self, lot_id: Uuid) -> usize {
        let before = self.div_records.len();
        self.div_records.retain(|r| r.buy_record_id != lot_id);
        self.recompute_account_ids();
        before - self.div_records.len()
    }

    /// Drop every allocation credited to `account_id`. Returns how many were removed.
    pub fn remove_account(&mut self, account_id: Uuid) -> usize {
        self.remove_accounts(&[account_id])
    }

    pub fn remove_accounts(&mut self, account_ids: &[Uuid]) -> usize {
        let before = self.div_records.len();
        self.div_records.retain(|r| !account_ids.contains(&r.account_id));
        self.recompute_account_ids();
        before - self.div_records.len()
    }

    /// Point every allocation of `lot_id` at `account_id`. Returns whether anything changed.
    pub fn relink_lot(&mut self, lot_id: Uuid, account_id: Uuid) -> bool {
        let mut changed = false;
        for record in self.div_records.iter_mut() {
            if record.buy_record_id == lot_id && record.account_id != account_id {
                record.account_id = account_id;
                changed = true;
            }
        }
        if changed {
            self.recompute_account_ids();
        }
        changed
    }

    pub fn references_lot(&self, lot_id: Uuid) -> bool {
        self.div_records.iter().any(|r| r.buy_record_id == lot_id)
    }

    pub fn includes_account(&self, account_id: Uuid) -> bool {
        self.account_ids.contains(&account_id)
    }

    pub fn is_empty(&self) -> bool {
        self.div_records.is_empty()
    }

    /// `Σ per_div × div_amount` over the whole batch.
    pub fn total_amount(&self) -> f64 {
        self.div_records
            .iter()
            .map(|r| self.per_div * r.div_amount)
            .sum()
    }

    /// Whether `account_ids` matches the allocation list as a set.
    pub fn is_consistent(&self) -> bool {
        let derived: HashSet<Uuid> = self.div_records.iter().map(|r| r.account_id).collect();
        let cached: HashSet<Uuid> = self.account_ids.iter().copied().collect();
        derived == cached && cached.len() == self.account_ids.len()
    }
}

/// One lot's dividend from one batch, with the batch fields alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotDividend {
    pub batch_id: Uuid,
    pub stock_code: String,
    pub per_div: f64,
    pub div_date: NaiveDate,
    pub buy_record_id: Uuid,
    pub account_id: Uuid,
    pub div_amount: f64,
}

impl LotDividend {
    pub fn total(&self) -> f64 {
        self.per_div * self.div_amount
    }
}

/// A batch with each allocation joined to its lot's buy terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendBatchDetail {
    pub id: Uuid,
    pub stock_code: String,
    pub per_div: f64,
    pub div_date: NaiveDate,
    pub account_ids: Vec<Uuid>,
    /// Newest buy date first
    pub lines: Vec<DividendLine>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DividendLine {
    pub buy_record_id: Uuid,
    pub account_id: Uuid,
    pub div_amount: f64,
    pub total: f64,
    /// Lot fields are `None` when the referenced lot is already gone
    pub buy_amount: Option<f64>,
    pub buy_date: Option<NaiveDate>,
    pub buy_price: Option<f64>,
}
