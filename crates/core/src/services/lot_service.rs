use chrono::NaiveDate;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::cascade::CascadeReport;
use crate::models::lot::{BuyLot, ImportedLot, LotEdit, NewLot, SellAllocation};
use crate::models::query::BatchFilter;
use crate::models::settings::LedgerSettings;
use crate::repository::traits::LedgerRepository;
use crate::services::access;
use crate::services::cascade_service::CascadeService;
use crate::services::locks::{KeyedLocks, LockKey};

/// Buy lots and their sell allocations.
///
/// Every mutation is a read-modify-write of one lot document under that
/// lot's lock; the lot itself keeps its aggregates consistent.
#[derive(Clone)]
pub struct LotService {
    repo: Arc<dyn LedgerRepository>,
    locks: Arc<KeyedLocks>,
    settings: Arc<LedgerSettings>,
    cascade: CascadeService,
}

impl LotService {
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        locks: Arc<KeyedLocks>,
        settings: Arc<LedgerSettings>,
        cascade: CascadeService,
    ) -> Self {
        Self {
            repo,
            locks,
            settings,
            cascade,
        }
    }

    /// Open a new lot in one of the caller's accounts.
    pub async fn create_lot(&self, owner_id: &str, new_lot: NewLot) -> Result<BuyLot, CoreError> {
        new_lot.validate()?;
        access::owned_account(self.repo.as_ref(), owner_id, new_lot.account_id).await?;

        let _guard = self.locks.acquire([LockKey::Account(new_lot.account_id)]).await;
        // The account may have been deleted while we waited.
        access::owned_account(self.repo.as_ref(), owner_id, new_lot.account_id).await?;

        let lot = BuyLot::new(new_lot);
        self.repo.insert_lot(lot.clone()).await?;
        debug!(
            "Created buy lot {} ({} × {} @ {})",
            lot.id, lot.stock_code, lot.buy_amount, lot.buy_price
        );
        Ok(lot)
    }

    /// Record a sale against a lot. Nothing is written when validation fails.
    pub async fn sell(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        sell_price: f64,
        sell_amount: f64,
        sell_date: NaiveDate,
    ) -> Result<(BuyLot, SellAllocation), CoreError> {
        access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;

        let _guard = self.locks.acquire([LockKey::Lot(lot_id)]).await;
        let mut lot = self.load_lot(lot_id).await?;
        let allocation = lot.record_sale(
            sell_price,
            sell_amount,
            sell_date,
            self.settings.quantity_epsilon,
        )?;
        self.store_lot(lot.clone()).await?;

        debug!(
            "Sold {} of lot {lot_id} @ {}: P&L {}, APY {}%",
            sell_amount, sell_price, allocation.profit_loss, allocation.apy
        );
        Ok((lot, allocation))
    }

    /// Remove one sale, returning its quantity and P&L to the lot.
    pub async fn delete_sell_allocation(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<BuyLot, CoreError> {
        access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;

        let _guard = self.locks.acquire([LockKey::Lot(lot_id)]).await;
        let mut lot = self.load_lot(lot_id).await?;
        let removed = lot.remove_sale(allocation_id)?;
        self.store_lot(lot.clone()).await?;

        debug!(
            "Removed sell allocation {allocation_id} ({} shares) from lot {lot_id}",
            removed.sell_amount
        );
        Ok(lot)
    }

    /// Replace a lot's editable fields.
    ///
    /// Moving the lot to another account re-points its dividend allocations
    /// at the new account. A lot that already has dividend allocations keeps
    /// its stock code.
    pub async fn edit_lot(
        &self,
        owner_id: &str,
        lot_id: Uuid,
        edit: LotEdit,
    ) -> Result<BuyLot, CoreError> {
        edit.validate()?;
        let current = access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;
        if edit.account_id != current.account_id {
            access::owned_account(self.repo.as_ref(), owner_id, edit.account_id).await?;
        }

        let mut stock_code = current.stock_code;
        loop {
            let _guard = self
                .locks
                .acquire([
                    LockKey::Account(edit.account_id),
                    LockKey::Stock(stock_code.clone()),
                    LockKey::Lot(lot_id),
                ])
                .await;
            let mut lot = self.load_lot(lot_id).await?;
            if lot.stock_code != stock_code {
                // Re-coded by a concurrent edit; lock the stock it has now.
                stock_code = lot.stock_code;
                continue;
            }

            let previous_account = lot.account_id;
            lot.apply_edit(&edit, self.settings.quantity_epsilon)?;
            if lot.stock_code != stock_code {
                let batches = self.repo.find_batches(&BatchFilter::for_lot(lot_id)).await?;
                if !batches.is_empty() {
                    return Err(CoreError::ValidationError(format!(
                        "buy lot {lot_id} has dividend allocations under {stock_code}; its stock code cannot change"
                    )));
                }
            }
            if lot.account_id != previous_account {
                // Re-check under the account lock; a concurrent delete may have won.
                access::owned_account(self.repo.as_ref(), owner_id, lot.account_id).await?;
            }
            self.store_lot(lot.clone()).await?;

            // Also repairs allocations left on the old account by an earlier failed edit.
            let relinked = self
                .cascade
                .relink_lot_account_locked(lot_id, lot.account_id)
                .await?;
            debug!("Edited buy lot {lot_id} ({relinked} dividend batches relinked)");
            return Ok(lot);
        }
    }

    /// Delete a lot, trimming every dividend batch that references it.
    pub async fn delete_lot(&self, owner_id: &str, lot_id: Uuid) -> Result<CascadeReport, CoreError> {
        let lot = access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;
        self.cascade.delete_lot(&lot).await
    }

    /// Delete every lot of one stock in the given accounts (all of the
    /// caller's accounts when `None`), with their dividend shares.
    pub async fn delete_stock_group(
        &self,
        owner_id: &str,
        stock_code: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<CascadeReport, CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok(CascadeReport::default());
        }
        self.cascade.delete_stock_group(stock_code.trim(), &scope).await
    }

    /// A lot with its sales ordered newest first.
    pub async fn get_lot(&self, owner_id: &str, lot_id: Uuid) -> Result<BuyLot, CoreError> {
        let mut lot = access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;
        lot.sell_allocations = lot.allocations_newest_first().into_iter().cloned().collect();
        Ok(lot)
    }

    // ── Bulk import ─────────────────────────────────────────────────

    /// Create many lots, replaying their historical sales. If any lot or
    /// sale is invalid nothing is stored.
    pub async fn import_lots(
        &self,
        owner_id: &str,
        account_id: Uuid,
        imported: Vec<ImportedLot>,
    ) -> Result<Vec<BuyLot>, CoreError> {
        access::owned_account(self.repo.as_ref(), owner_id, account_id).await?;

        let epsilon = self.settings.quantity_epsilon;
        let lots = imported
            .into_iter()
            .map(|item| item.into_lot(account_id, epsilon))
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.locks.acquire([LockKey::Account(account_id)]).await;
        access::owned_account(self.repo.as_ref(), owner_id, account_id).await?;
        self.repo.insert_lots(lots.clone()).await?;

        debug!("Imported {} buy lots into account {account_id}", lots.len());
        Ok(lots)
    }

    /// [`LotService::import_lots`] from a JSON array of lots.
    pub async fn import_lots_from_json(
        &self,
        owner_id: &str,
        account_id: Uuid,
        json: &str,
    ) -> Result<Vec<BuyLot>, CoreError> {
        let imported: Vec<ImportedLot> = serde_json::from_str(json)
            .map_err(|e| CoreError::ValidationError(format!("invalid import payload: {e}")))?;
        self.import_lots(owner_id, account_id, imported).await
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn load_lot(&self, lot_id: Uuid) -> Result<BuyLot, CoreError> {
        self.repo
            .get_lot(lot_id)
            .await?
            .ok_or(CoreError::LotNotFound(lot_id))
    }

    async fn store_lot(&self, lot: BuyLot) -> Result<(), CoreError> {
        let lot_id = lot.id;
        if !self.repo.replace_lot(lot).await? {
            return Err(CoreError::LotNotFound(lot_id));
        }
        Ok(())
    }
}
