use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-stock totals across a set of accounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSummary {
    /// Sum of lot buy amounts, sold or not
    pub total_buy_amount: f64,

    /// Sum of lot unsold amounts
    pub total_unsold_amount: f64,

    /// Cost of the still-held position: Σ buyPrice × unsoldAmount
    pub total_cost: f64,

    /// total_cost / total_unsold_amount, 3 decimals; 0 when nothing is held
    pub avg_cost: f64,

    /// Realized P&L summed over every lot
    #[serde(rename = "totalPL")]
    pub total_pl: f64,

    /// Σ perDiv × divAmount over the accounts' dividend allocations
    pub total_div: f64,
}

/// Per-account totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account_id: Uuid,
    pub name: String,
    pub currency: String,

    /// Number of buy lots in the account
    pub lot_count: usize,

    /// Lots with unsold quantity left
    pub open_lot_count: usize,

    /// Σ buyPrice × unsoldAmount
    pub total_cost: f64,

    #[serde(rename = "realizedPL")]
    pub realized_pl: f64,

    /// Dividends credited to this account
    pub total_div: f64,
}

/// A sell allocation flattened together with the lot it was sold from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellAllocationView {
    pub id: Uuid,
    pub buy_record_id: Uuid,
    pub account_id: Uuid,
    pub stock_code: String,
    pub buy_price: f64,
    pub buy_date: NaiveDate,
    pub sell_price: f64,
    pub sell_amount: f64,
    pub sell_date: NaiveDate,
    pub profit_loss: f64,
    pub apy: f64,
}
