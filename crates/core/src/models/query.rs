use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::dividend::DividendBatch;
use crate::models::lot::BuyLot;

/// Scalar buy-lot fields usable as a sort key or range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LotField {
    StockCode,
    BuyPrice,
    BuyAmount,
    BuyDate,
    UnsoldAmount,
    ProfitLoss,
}

impl std::fmt::Display for LotField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LotField::StockCode => write!(f, "stockCode"),
            LotField::BuyPrice => write!(f, "buyPrice"),
            LotField::BuyAmount => write!(f, "buyAmount"),
            LotField::BuyDate => write!(f, "buyDate"),
            LotField::UnsoldAmount => write!(f, "unsoldAmount"),
            LotField::ProfitLoss => write!(f, "profitLoss"),
        }
    }
}

impl FromStr for LotField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stockCode" => Ok(LotField::StockCode),
            "buyPrice" => Ok(LotField::BuyPrice),
            "buyAmount" => Ok(LotField::BuyAmount),
            "buyDate" => Ok(LotField::BuyDate),
            "unsoldAmount" => Ok(LotField::UnsoldAmount),
            "profitLoss" => Ok(LotField::ProfitLoss),
            other => Err(CoreError::ValidationError(format!(
                "Unknown buy lot field '{other}'"
            ))),
        }
    }
}

/// A field value read off a lot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(f64),
    Date(NaiveDate),
}

impl LotField {
    pub fn value<'a>(&self, lot: &'a BuyLot) -> FieldValue<'a> {
        match self {
            LotField::StockCode => FieldValue::Text(&lot.stock_code),
            LotField::BuyPrice => FieldValue::Number(lot.buy_price),
            LotField::BuyAmount => FieldValue::Number(lot.buy_amount),
            LotField::BuyDate => FieldValue::Date(lot.buy_date),
            LotField::UnsoldAmount => FieldValue::Number(lot.unsold_amount),
            LotField::ProfitLoss => FieldValue::Number(lot.profit_loss),
        }
    }

    /// Compare two lots on this field. Values of one field always share a type.
    pub fn compare(&self, a: &BuyLot, b: &BuyLot) -> Ordering {
        match (self.value(a), self.value(b)) {
            (FieldValue::Text(x), FieldValue::Text(y)) => x.cmp(y),
            (FieldValue::Number(x), FieldValue::Number(y)) => {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            (FieldValue::Date(x), FieldValue::Date(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        }
    }
}

/// One end of a range filter. Strings parse as dates (`YYYY-MM-DD`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterBound {
    Number(f64),
    Date(NaiveDate),
}

/// Inclusive `{min, max}` range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    #[serde(default)]
    pub min: Option<FilterBound>,
    #[serde(default)]
    pub max: Option<FilterBound>,
}

impl RangeFilter {
    pub fn between(min: FilterBound, max: FilterBound) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: FilterBound) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn at_most(max: FilterBound) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Test a value against this range. A bound of the wrong kind for the
    /// field (a date bound on `buyPrice`, anything on `stockCode`) is rejected.
    pub fn matches(&self, field: LotField, value: FieldValue<'_>) -> Result<bool, CoreError> {
        let above_min = match self.min {
            Some(bound) => compare_bound(field, value, bound)? != Ordering::Less,
            None => true,
        };
        let below_max = match self.max {
            Some(bound) => compare_bound(field, value, bound)? != Ordering::Greater,
            None => true,
        };
        Ok(above_min && below_max)
    }
}

fn compare_bound(
    field: LotField,
    value: FieldValue<'_>,
    bound: FilterBound,
) -> Result<Ordering, CoreError> {
    match (value, bound) {
        (FieldValue::Number(v), FilterBound::Number(b)) => {
            Ok(v.partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
        (FieldValue::Date(v), FilterBound::Date(b)) => Ok(v.cmp(&b)),
        _ => Err(CoreError::ValidationError(format!(
            "Range filter bound {bound:?} does not apply to field '{field}'"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: LotField,
    pub order: SortOrder,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            key: LotField::BuyDate,
            order: SortOrder::Desc,
        }
    }
}

/// Request for one page of buy lots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLotsQuery {
    /// `None` means every account of the caller
    #[serde(default)]
    pub account_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub stock_codes: Option<Vec<String>>,
    #[serde(default)]
    pub filter: BTreeMap<LotField, RangeFilter>,
    /// `None` falls back to the configured default sort
    #[serde(default)]
    pub sort: Option<SortSpec>,
    /// 1-based page number
    #[serde(default = "first_page")]
    pub page: usize,
    /// `None` falls back to the configured default page size
    #[serde(default)]
    pub limit: Option<usize>,
}

fn first_page() -> usize {
    1
}

impl Default for ListLotsQuery {
    fn default() -> Self {
        Self {
            account_ids: None,
            stock_codes: None,
            filter: BTreeMap::new(),
            sort: None,
            page: 1,
            limit: None,
        }
    }
}

/// One page of buy lots plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotPage {
    pub data: Vec<BuyLot>,
    pub total: usize,
    pub next_page: Option<usize>,
}

// ── Repository filters ──────────────────────────────────────────────

/// Selects buy lots in the backing store. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LotFilter {
    pub account_ids: Option<Vec<Uuid>>,
    pub stock_codes: Option<Vec<String>>,
}

impl LotFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_accounts(account_ids: &[Uuid]) -> Self {
        Self {
            account_ids: Some(account_ids.to_vec()),
            stock_codes: None,
        }
    }

    pub fn with_stock_codes(mut self, stock_codes: &[String]) -> Self {
        self.stock_codes = Some(stock_codes.to_vec());
        self
    }

    pub fn matches(&self, lot: &BuyLot) -> bool {
        self.account_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&lot.account_id))
            && self
                .stock_codes
                .as_ref()
                .map_or(true, |codes| codes.iter().any(|c| c == &lot.stock_code))
    }
}

/// Selects dividend batches in the backing store. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchFilter {
    pub stock_code: Option<String>,
    /// Batch matches when its `account_ids` shares at least one id with this list
    pub any_account_ids: Option<Vec<Uuid>>,
    /// Batch matches when one of its allocations points at this lot
    pub buy_record_id: Option<Uuid>,
}

impl BatchFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_accounts(account_ids: &[Uuid]) -> Self {
        Self {
            any_account_ids: Some(account_ids.to_vec()),
            ..Self::default()
        }
    }

    pub fn for_lot(lot_id: Uuid) -> Self {
        Self {
            buy_record_id: Some(lot_id),
            ..Self::default()
        }
    }

    pub fn with_stock_code(mut self, stock_code: impl Into<String>) -> Self {
        self.stock_code = Some(stock_code.into());
        self
    }

    pub fn matches(&self, batch: &DividendBatch) -> bool {
        self.stock_code
            .as_ref()
            .map_or(true, |code| code == &batch.stock_code)
            && self
                .any_account_ids
                .as_ref()
                .map_or(true, |ids| batch.account_ids.iter().any(|a| ids.contains(a)))
            && self
                .buy_record_id
                .map_or(true, |lot_id| batch.references_lot(lot_id))
    }
}
