pub mod calc;
pub mod errors;
pub mod models;
pub mod repository;
pub mod services;
pub mod storage;

use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use errors::CoreError;
use models::{
    account::Account,
    cascade::CascadeReport,
    dividend::{DividendBatch, DividendBatchDetail, LotDividend, NewDividendBatch},
    lot::{BuyLot, ImportedLot, LotEdit, NewLot, SellAllocation},
    query::{ListLotsQuery, LotPage},
    settings::LedgerSettings,
    summary::{AccountSummary, SellAllocationView, StockSummary},
};
use repository::{memory::MemoryRepository, traits::LedgerRepository};
use services::{
    account_service::AccountService,
    cascade_service::CascadeService,
    dividend_service::DividendService,
    integrity_service::{IntegrityReport, IntegrityService},
    locks::KeyedLocks,
    lot_service::LotService,
    query_service::QueryService,
};
use storage::manager::StorageManager;

/// Main entry point for the lot ledger.
///
/// Every operation takes the authenticated caller's `owner_id` and only
/// touches accounts, lots and batches owned by that caller. The ledger is
/// cheap to clone and safe to share across concurrent request handlers.
#[must_use]
#[derive(Clone)]
pub struct LotLedger {
    repo: Arc<dyn LedgerRepository>,
    settings: Arc<LedgerSettings>,
    account_service: AccountService,
    lot_service: LotService,
    dividend_service: DividendService,
    query_service: QueryService,
    cascade_service: CascadeService,
    integrity_service: IntegrityService,
}

impl std::fmt::Debug for LotLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LotLedger")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl LotLedger {
    /// Build a ledger over any document store.
    pub fn new(repo: Arc<dyn LedgerRepository>, settings: LedgerSettings) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self::build(repo, settings))
    }

    /// An empty in-memory ledger with default settings.
    pub fn in_memory() -> Self {
        Self::build(Arc::new(MemoryRepository::new()), LedgerSettings::default())
    }

    /// Rebuild an in-memory ledger from snapshot bytes.
    ///
    /// Snapshots that break the ledger invariants still load; the problems are
    /// logged and can be inspected with [`LotLedger::audit_integrity`].
    pub async fn from_snapshot_bytes(bytes: &[u8], settings: LedgerSettings) -> Result<Self, CoreError> {
        let data = StorageManager::load_from_bytes(bytes)?;
        let ledger = Self::new(Arc::new(MemoryRepository::from_data(data)), settings)?;
        let report = ledger.audit_integrity().await?;
        if !report.is_clean() {
            warn!(
                "Loaded snapshot with {} integrity violations",
                report.violations.len()
            );
        }
        Ok(ledger)
    }

    /// Serialize every document to snapshot bytes.
    pub async fn save_to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let data = self.repo.export().await?;
        StorageManager::save_to_bytes(&data)
    }

    /// Load from a snapshot file on disk (native only, not WASM).
    #[cfg(not(target_arch = "wasm32"))]
    pub async fn load_from_file(
        path: impl AsRef<std::path::Path>,
        settings: LedgerSettings,
    ) -> Result<Self, CoreError> {
        let bytes = std::fs::read(path)?;
        Self::from_snapshot_bytes(&bytes, settings).await
    }

    /// Save a snapshot file to disk (native only, not WASM).
    #[cfg(not(target_arch = "wasm32"))]
    pub async fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), CoreError> {
        let data = self.repo.export().await?;
        StorageManager::save_to_file(&data, path)
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // ── Accounts ────────────────────────────────────────────────────

    pub async fn create_account(
        &self,
        owner_id: &str,
        name: &str,
        currency: &str,
    ) -> Result<Account, CoreError> {
        self.account_service
            .create_account(owner_id, name, currency)
            .await
    }

    pub async fn list_accounts(&self, owner_id: &str) -> Result<Vec<Account>, CoreError> {
        self.account_service.list_accounts(owner_id).await
    }

    pub async fn get_account(&self, owner_id: &str, account_id: Uuid) -> Result<Account, CoreError> {
        self.account_service.get_account(owner_id, account_id).await
    }

    /// Delete an account, its lots, and its share of every dividend batch.
    pub async fn delete_account(
        &self,
        owner_id: &str,
        account_id: Uuid,
    ) -> Result<CascadeReport, CoreError> {
        self.account_service
            .delete_account(owner_id, account_id)
            .await
    }

    // ── Buy lots ────────────────────────────────────────────────────

    pub async fn create_lot(&self, owner_id: &str, new_lot: NewLot) -> Result<BuyLot, CoreError> {
        self.lot_service.create_lot(owner_id, new_lot).await
    }

    /// Sell part or all of a lot. Returns the updated lot and the new allocation.
    pub async fn sell(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        sell_price: f64,
        sell_amount: f64,
        sell_date: NaiveDate,
    ) -> Result<(BuyLot, SellAllocation), CoreError> {
        self.lot_service
            .sell(owner_id, lot_id, sell_price, sell_amount, sell_date)
            .await
    }

    pub async fn delete_sell_allocation(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<BuyLot, CoreError> {
        self.lot_service
            .delete_sell_allocation(owner_id, lot_id, allocation_id)
            .await
    }

    pub async fn edit_lot(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        edit: LotEdit,
    ) -> Result<BuyLot, CoreError> {
        self.lot_service.edit_lot(owner_id, lot_id, edit).await
    }

    pub async fn delete_lot(&self, owner_id: &str, lot_id: Uuid) -> Result<CascadeReport, CoreError> {
        self.lot_service.delete_lot(owner_id, lot_id).await
    }

    pub async fn delete_stock_group(
        &self,
        owner_id: &str,
        stock_code: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<CascadeReport, CoreError> {
        self.lot_service
            .delete_stock_group(owner_id, stock_code, account_ids)
            .await
    }

    pub async fn get_lot(&self, owner_id: &str, lot_id: Uuid) -> Result<BuyLot, CoreError> {
        self.lot_service.get_lot(owner_id, lot_id).await
    }

    pub async fn import_lots(
        &self,
        owner_id: &str,
        account_id: Uuid,
        lots: Vec<ImportedLot>,
    ) -> Result<Vec<BuyLot>, CoreError> {
        self.lot_service.import_lots(owner_id, account_id, lots).await
    }

    pub async fn import_lots_from_json(
        &self,
        owner_id: &str,
        account_id: Uuid,
        json: &str,
    ) -> Result<Vec<BuyLot>, CoreError> {
        self.lot_service
            .import_lots_from_json(owner_id, account_id, json)
            .await
    }

    // ── Dividend batches ────────────────────────────────────────────

    pub async fn create_dividend_batch(
        &self,
        owner_id: &str,
        input: NewDividendBatch,
    ) -> Result<DividendBatch, CoreError> {
        self.dividend_service.create_batch(owner_id, input).await
    }

    pub async fn edit_dividend_batch(
        &self,
        owner_id: &str,
        batch_id: Uuid,
        input: NewDividendBatch,
    ) -> Result<DividendBatch, CoreError> {
        self.dividend_service
            .edit_batch(owner_id, batch_id, input)
            .await
    }

    pub async fn delete_dividend_batch(&self, owner_id: &str, batch_id: Uuid) -> Result<(), CoreError> {
        self.dividend_service.delete_batch(owner_id, batch_id).await
    }

    pub async fn get_dividend_batch(
        &self,
        owner_id: &str,
        batch_id: Uuid,
    ) -> Result<DividendBatch, CoreError> {
        self.dividend_service.get_batch(owner_id, batch_id).await
    }

    pub async fn dividend_batch_detail(
        &self,
        owner_id: &str,
        batch_id: Uuid,
    ) -> Result<DividendBatchDetail, CoreError> {
        self.dividend_service.batch_detail(owner_id, batch_id).await
    }

    pub async fn dividend_batches_for_stock(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
        stock_code: &str,
    ) -> Result<Vec<DividendBatch>, CoreError> {
        self.dividend_service
            .batches_for_stock(owner_id, account_ids, stock_code)
            .await
    }

    pub async fn stock_codes_with_dividends(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<String>, CoreError> {
        self.dividend_service
            .stock_codes_with_dividends(owner_id, account_ids)
            .await
    }

    pub async fn dividends_for_lot(
        &self,
        owner_id: &str,
        lot_id: Uuid,
    ) -> Result<Vec<LotDividend>, CoreError> {
        self.dividend_service.dividends_for_lot(owner_id, lot_id).await
    }

    pub async fn total_dividend_by_stock_code(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<BTreeMap<String, f64>, CoreError> {
        self.dividend_service
            .total_dividend_by_stock_code(owner_id, account_ids)
            .await
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn list_lots(&self, owner_id: &str, query: &ListLotsQuery) -> Result<LotPage, CoreError> {
        self.query_service.list_lots(owner_id, query).await
    }

    /// Per-stock totals across the accounts (all of the caller's when `None`).
    pub async fn stock_summary(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<BTreeMap<String, StockSummary>, CoreError> {
        self.query_service.stock_summary(owner_id, account_ids).await
    }

    pub async fn account_summaries(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<AccountSummary>, CoreError> {
        self.query_service
            .account_summaries(owner_id, account_ids)
            .await
    }

    pub async fn sell_allocations(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<SellAllocationView>, CoreError> {
        self.query_service
            .sell_allocations(owner_id, account_ids)
            .await
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Drop dividend allocations whose lot is gone. Safe to run at any time.
    pub async fn repair_dangling_references(&self) -> Result<CascadeReport, CoreError> {
        self.cascade_service.repair_dangling_references().await
    }

    pub async fn audit_integrity(&self) -> Result<IntegrityReport, CoreError> {
        self.integrity_service.audit().await
    }

    // ── Internal ────────────────────────────────────────────────────

    fn build(repo: Arc<dyn LedgerRepository>, settings: LedgerSettings) -> Self {
        let settings = Arc::new(settings);
        let locks = Arc::new(KeyedLocks::new());
        let cascade_service = CascadeService::new(repo.clone(), locks.clone());
        Self {
            account_service: AccountService::new(repo.clone(), cascade_service.clone()),
            lot_service: LotService::new(
                repo.clone(),
                locks.clone(),
                settings.clone(),
                cascade_service.clone(),
            ),
            dividend_service: DividendService::new(repo.clone(), locks),
            query_service: QueryService::new(repo.clone(), settings.clone()),
            integrity_service: IntegrityService::new(repo.clone(), settings.quantity_epsilon),
            cascade_service,
            repo,
            settings,
        }
    }
}

impl Default for LotLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}
