use serde::{Deserialize, Serialize};

use super::account::Account;
use super::dividend::DividendBatch;
use super::lot::BuyLot;

/// The full document set. Everything in here gets serialized into a
/// snapshot file, and any repository can be dumped into or rebuilt from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerData {
    pub accounts: Vec<Account>,

    /// Buy lots, each carrying its embedded sell allocations
    pub lots: Vec<BuyLot>,

    pub batches: Vec<DividendBatch>,
}

impl LedgerData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.lots.is_empty() && self.batches.is_empty()
    }
}
