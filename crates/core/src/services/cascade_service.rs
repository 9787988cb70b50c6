use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::cascade::CascadeReport;
use crate::models::dividend::DividendBatch;
use crate::models::lot::BuyLot;
use crate::models::query::{BatchFilter, LotFilter};
use crate::repository::traits::LedgerRepository;
use crate::services::locks::{KeyedLocks, LockKey};

/// Steps of a buy-lot deletion. Dividend references go first, so a crash
/// between steps leaves a lot without dividends rather than dividends
/// pointing at a missing lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LotStep {
    TrimDividends,
    DeleteLot,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountStep {
    DeleteLots,
    TrimDividends,
    DeleteAccount,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockGroupStep {
    TrimDividends,
    DeleteLots,
    Done,
}

/// Repairs dependent documents when a buy lot, an account or a stock group
/// is deleted.
///
/// Every step re-reads what it is about to change and treats "already gone"
/// as success, so re-running a cascade that crashed halfway converges to the
/// same end state.
#[derive(Clone)]
pub struct CascadeService {
    repo: Arc<dyn LedgerRepository>,
    locks: Arc<KeyedLocks>,
}

impl CascadeService {
    pub fn new(repo: Arc<dyn LedgerRepository>, locks: Arc<KeyedLocks>) -> Self {
        Self { repo, locks }
    }

    // ── Buy lot ─────────────────────────────────────────────────────

    /// Delete a lot and every dividend allocation that references it.
    pub async fn delete_lot(&self, lot: &BuyLot) -> Result<CascadeReport, CoreError> {
        let mut stock_code = lot.stock_code.clone();
        loop {
            let _guard = self
                .locks
                .acquire([LockKey::Stock(stock_code.clone()), LockKey::Lot(lot.id)])
                .await;
            // An edit may have moved the lot to another stock while we waited.
            if let Some(current) = self.repo.get_lot(lot.id).await? {
                if current.stock_code != stock_code {
                    debug!(
                        "Buy lot {} moved from {stock_code} to {}; relocking",
                        lot.id, current.stock_code
                    );
                    stock_code = current.stock_code;
                    continue;
                }
            }

            let report = self.delete_lot_locked(lot.id).await?;
            info!(
                "Deleted buy lot {}: {} batches deleted, {} trimmed",
                lot.id,
                report.batches_deleted.len(),
                report.batches_trimmed.len()
            );
            return Ok(report);
        }
    }

    /// Caller must hold the lot's stock lock.
    pub(crate) async fn delete_lot_locked(&self, lot_id: Uuid) -> Result<CascadeReport, CoreError> {
        let mut report = CascadeReport::default();
        let mut step = LotStep::TrimDividends;
        while step != LotStep::Done {
            debug!("Lot cascade {lot_id}: {step:?}");
            step = match step {
                LotStep::TrimDividends => {
                    self.trim_batches_for_lot(lot_id, &mut report).await?;
                    LotStep::DeleteLot
                }
                LotStep::DeleteLot => {
                    if self.repo.delete_lot(lot_id).await?.is_some() {
                        report.lots_deleted.push(lot_id);
                    }
                    LotStep::Done
                }
                LotStep::Done => LotStep::Done,
            };
        }
        Ok(report)
    }

    async fn trim_batches_for_lot(
        &self,
        lot_id: Uuid,
        report: &mut CascadeReport,
    ) -> Result<(), CoreError> {
        let batches = self.repo.find_batches(&BatchFilter::for_lot(lot_id)).await?;
        for mut batch in batches {
            let removed = batch.remove_lot(lot_id);
            self.settle_batch(batch, removed, report).await?;
        }
        Ok(())
    }

    // ── Account ─────────────────────────────────────────────────────

    /// Delete an account, all of its lots (each cascading), and its share
    /// of every dividend batch.
    pub async fn delete_account(&self, account_id: Uuid) -> Result<CascadeReport, CoreError> {
        let _account_guard = self.locks.acquire([LockKey::Account(account_id)]).await;
        // With the account locked no lot can enter it or change stock inside
        // it, so the stock set read here is the one the cascade will touch.
        let codes = self.stock_codes_touching(&[account_id]).await?;
        let _stock_guard = self.locks.acquire(codes.into_iter().map(LockKey::Stock)).await;

        let mut report = CascadeReport::default();
        let mut step = AccountStep::DeleteLots;
        while step != AccountStep::Done {
            debug!("Account cascade {account_id}: {step:?}");
            step = match step {
                AccountStep::DeleteLots => {
                    let lots = self
                        .repo
                        .find_lots(&LotFilter::for_accounts(&[account_id]))
                        .await?;
                    for lot in lots {
                        report.merge(self.delete_lot_locked(lot.id).await?);
                    }
                    AccountStep::TrimDividends
                }
                AccountStep::TrimDividends => {
                    self.trim_batches_for_account(account_id, &mut report).await?;
                    AccountStep::DeleteAccount
                }
                AccountStep::DeleteAccount => {
                    if self.repo.delete_account(account_id).await? {
                        report.account_deleted = Some(account_id);
                    }
                    AccountStep::Done
                }
                AccountStep::Done => AccountStep::Done,
            };
        }

        info!(
            "Deleted account {account_id}: {} lots, {} batches deleted, {} trimmed",
            report.lots_deleted.len(),
            report.batches_deleted.len(),
            report.batches_trimmed.len()
        );
        Ok(report)
    }

    async fn trim_batches_for_account(
        &self,
        account_id: Uuid,
        report: &mut CascadeReport,
    ) -> Result<(), CoreError> {
        let batches = self
            .repo
            .find_batches(&BatchFilter::for_accounts(&[account_id]))
            .await?;
        for mut batch in batches {
            if batch.account_ids == [account_id] {
                let removed = batch.div_records.len();
                batch.div_records.clear();
                self.settle_batch(batch, removed.max(1), report).await?;
            } else {
                let removed = batch.remove_account(account_id);
                self.settle_batch(batch, removed, report).await?;
            }
        }
        Ok(())
    }

    // ── Stock group ─────────────────────────────────────────────────

    /// Delete every lot of `stock_code` held in `account_ids`, and those
    /// accounts' share of the stock's dividend batches.
    pub async fn delete_stock_group(
        &self,
        stock_code: &str,
        account_ids: &[Uuid],
    ) -> Result<CascadeReport, CoreError> {
        let mut keys: Vec<LockKey> = account_ids.iter().copied().map(LockKey::Account).collect();
        keys.push(LockKey::Stock(stock_code.to_string()));
        let _guard = self.locks.acquire(keys).await;

        let mut report = CascadeReport::default();
        let mut step = StockGroupStep::TrimDividends;
        while step != StockGroupStep::Done {
            debug!("Stock group cascade {stock_code}: {step:?}");
            step = match step {
                StockGroupStep::TrimDividends => {
                    let filter = BatchFilter::for_accounts(account_ids).with_stock_code(stock_code);
                    for mut batch in self.repo.find_batches(&filter).await? {
                        if batch.account_ids.iter().all(|a| account_ids.contains(a)) {
                            let removed = batch.div_records.len();
                            batch.div_records.clear();
                            self.settle_batch(batch, removed.max(1), &mut report).await?;
                        } else {
                            let removed = batch.remove_accounts(account_ids);
                            self.settle_batch(batch, removed, &mut report).await?;
                        }
                    }
                    StockGroupStep::DeleteLots
                }
                StockGroupStep::DeleteLots => {
                    let filter = LotFilter::for_accounts(account_ids)
                        .with_stock_codes(&[stock_code.to_string()]);
                    for lot in self.repo.find_lots(&filter).await? {
                        report.merge(self.delete_lot_locked(lot.id).await?);
                    }
                    StockGroupStep::Done
                }
                StockGroupStep::Done => StockGroupStep::Done,
            };
        }

        info!(
            "Deleted stock group {stock_code}: {} lots, {} batches deleted, {} trimmed",
            report.lots_deleted.len(),
            report.batches_deleted.len(),
            report.batches_trimmed.len()
        );
        Ok(report)
    }

    // ── Relink & repair ─────────────────────────────────────────────

    /// Point a lot's dividend allocations at its new account. Returns the
    /// number of batches rewritten. Caller must hold the lot's stock lock.
    pub(crate) async fn relink_lot_account_locked(
        &self,
        lot_id: Uuid,
        account_id: Uuid,
    ) -> Result<usize, CoreError> {
        let mut updated = 0;
        for mut batch in self.repo.find_batches(&BatchFilter::for_lot(lot_id)).await? {
            if batch.relink_lot(lot_id, account_id) && self.repo.replace_batch(batch).await? {
                updated += 1;
            }
        }
        if updated > 0 {
            debug!("Relinked lot {lot_id} to account {account_id} in {updated} batches");
        }
        Ok(updated)
    }

    /// Bring every dividend batch back in line with the lots it references:
    /// drop allocations whose lot no longer exists (deleting batches left
    /// empty) and re-point allocations whose cached account is stale.
    /// This is the convergence step after a crash between two documents.
    pub async fn repair_dangling_references(&self) -> Result<CascadeReport, CoreError> {
        let codes: BTreeSet<String> = self
            .repo
            .find_batches(&BatchFilter::all())
            .await?
            .into_iter()
            .map(|b| b.stock_code)
            .collect();

        let mut report = CascadeReport::default();
        for code in codes {
            let _guard = self.locks.acquire([LockKey::Stock(code.clone())]).await;
            let filter = BatchFilter::all().with_stock_code(code.as_str());
            for batch in self.repo.find_batches(&filter).await? {
                self.repair_batch(batch, &mut report).await?;
            }
        }
        if !report.is_noop() {
            info!(
                "Repair sweep: {} allocations removed, {} relinked",
                report.allocations_removed, report.allocations_relinked
            );
        }
        Ok(report)
    }

    /// Caller must hold the batch's stock lock.
    async fn repair_batch(
        &self,
        mut batch: DividendBatch,
        report: &mut CascadeReport,
    ) -> Result<(), CoreError> {
        let referenced: Vec<Uuid> = batch.div_records.iter().map(|r| r.buy_record_id).collect();
        let owners: HashMap<Uuid, Uuid> = self
            .repo
            .get_lots(&referenced)
            .await?
            .into_iter()
            .map(|l| (l.id, l.account_id))
            .collect();

        let mut removed = 0;
        let mut relinked = 0;
        for lot_id in referenced {
            match owners.get(&lot_id) {
                Some(account_id) => {
                    if batch.relink_lot(lot_id, *account_id) {
                        relinked += 1;
                    }
                }
                None => removed += batch.remove_lot(lot_id),
            }
        }
        if removed > 0 {
            warn!(
                "Dividend batch {} referenced {removed} missing buy lots; trimming",
                batch.id
            );
        }
        if relinked > 0 {
            warn!(
                "Dividend batch {} carried a stale account for {relinked} buy lots; relinking",
                batch.id
            );
        }

        let saved = if removed > 0 {
            self.settle_batch(batch, removed, report).await?
        } else if relinked > 0 {
            self.repo.replace_batch(batch).await?
        } else {
            false
        };
        if saved {
            report.allocations_relinked += relinked;
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Persist a batch after `removed` allocations were taken out of it:
    /// delete it when empty, save it otherwise. No-op when nothing was removed.
    /// Returns whether the batch was saved with allocations left in it.
    async fn settle_batch(
        &self,
        batch: DividendBatch,
        removed: usize,
        report: &mut CascadeReport,
    ) -> Result<bool, CoreError> {
        if removed == 0 {
            return Ok(false);
        }
        let batch_id = batch.id;
        if batch.is_empty() {
            if self.repo.delete_batch(batch_id).await? {
                report.allocations_removed += removed;
                report.batches_deleted.push(batch_id);
            }
            return Ok(false);
        }
        let saved = self.repo.replace_batch(batch).await?;
        if saved {
            report.allocations_removed += removed;
            report.batches_trimmed.push(batch_id);
        }
        Ok(saved)
    }

    /// Stock codes whose batches a deletion touching these accounts may rewrite.
    async fn stock_codes_touching(&self, account_ids: &[Uuid]) -> Result<Vec<String>, CoreError> {
        let mut codes: HashSet<String> = self
            .repo
            .find_lots(&LotFilter::for_accounts(account_ids))
            .await?
            .into_iter()
            .map(|l| l.stock_code)
            .collect();
        codes.extend(
            self.repo
                .find_batches(&BatchFilter::for_accounts(account_ids))
                .await?
                .into_iter()
                .map(|b| b.stock_code),
        );
        Ok(codes.into_iter().collect())
    }
}
