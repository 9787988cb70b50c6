use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::Account;
use crate::models::dividend::DividendBatch;
use crate::models::ledger::LedgerData;
use crate::models::lot::BuyLot;
use crate::models::query::{BatchFilter, LotFilter};

/// Document-store abstraction behind every service.
///
/// Each call is atomic for the single document it touches and nothing more.
/// Multi-document consistency is the services' job (see `services::locks`).
/// Connectivity problems surface as [`CoreError::Store`].
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    // ── Accounts ────────────────────────────────────────────────────

    async fn insert_account(&self, account: Account) -> Result<(), CoreError>;

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, CoreError>;

    async fn list_accounts(&self, owner_id: &str) -> Result<Vec<Account>, CoreError>;

    /// Returns `false` when the account was already gone.
    async fn delete_account(&self, id: Uuid) -> Result<bool, CoreError>;

    // ── Buy lots ────────────────────────────────────────────────────

    async fn insert_lot(&self, lot: BuyLot) -> Result<(), CoreError>;

    /// Insert many lots at once. Either all land or none do.
    async fn insert_lots(&self, lots: Vec<BuyLot>) -> Result<(), CoreError>;

    async fn get_lot(&self, id: Uuid) -> Result<Option<BuyLot>, CoreError>;

    /// Lots for the given ids; missing ids are skipped.
    async fn get_lots(&self, ids: &[Uuid]) -> Result<Vec<BuyLot>, CoreError>;

    async fn find_lots(&self, filter: &LotFilter) -> Result<Vec<BuyLot>, CoreError>;

    /// Overwrite a stored lot. Returns `false` when no lot with that id exists.
    async fn replace_lot(&self, lot: BuyLot) -> Result<bool, CoreError>;

    /// Remove a lot, returning it if it existed.
    async fn delete_lot(&self, id: Uuid) -> Result<Option<BuyLot>, CoreError>;

    // ── Dividend batches ────────────────────────────────────────────

    async fn insert_batch(&self, batch: DividendBatch) -> Result<(), CoreError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<DividendBatch>, CoreError>;

    async fn find_batches(&self, filter: &BatchFilter) -> Result<Vec<DividendBatch>, CoreError>;

    /// Overwrite a stored batch. Returns `false` when no batch with that id exists.
    async fn replace_batch(&self, batch: DividendBatch) -> Result<bool, CoreError>;

    /// Returns `false` when the batch was already gone.
    async fn delete_batch(&self, id: Uuid) -> Result<bool, CoreError>;

    // ── Whole store ─────────────────────────────────────────────────

    /// Dump every document, for snapshots and integrity audits.
    async fn export(&self) -> Result<LedgerData, CoreError>;
}
