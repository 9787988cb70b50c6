use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::dividend::{
    DivAllocation, DividendBatch, DividendBatchDetail, DividendLine, LotDividend,
    NewDividendBatch,
};
use crate::models::query::BatchFilter;
use crate::repository::traits::LedgerRepository;
use crate::services::access;
use crate::services::locks::{KeyedLocks, LockKey};

/// Dividend batches: creation, total-overwrite edits, deletion and the
/// read paths that filter by account membership.
#[derive(Clone)]
pub struct DividendService {
    repo: Arc<dyn LedgerRepository>,
    locks: Arc<KeyedLocks>,
}

impl DividendService {
    pub fn new(repo: Arc<dyn LedgerRepository>, locks: Arc<KeyedLocks>) -> Self {
        Self { repo, locks }
    }

    // ── Mutations ───────────────────────────────────────────────────

    pub async fn create_batch(
        &self,
        owner_id: &str,
        input: NewDividendBatch,
    ) -> Result<DividendBatch, CoreError> {
        input.validate()?;
        let stock_code = input.stock_code.trim().to_string();

        let _guard = self.locks.acquire([LockKey::Stock(stock_code.clone())]).await;
        let records = self.resolve_allocations(owner_id, &stock_code, &input).await?;
        let batch = DividendBatch::new(stock_code, input.per_div, input.div_date, records);
        self.repo.insert_batch(batch.clone()).await?;

        debug!(
            "Created dividend batch {} for {} across {} lots",
            batch.id,
            batch.stock_code,
            batch.div_records.len()
        );
        Ok(batch)
    }

    /// Replace every field and the whole allocation list of a batch.
    pub async fn edit_batch(
        &self,
        owner_id: &str,
        batch_id: Uuid,
        input: NewDividendBatch,
    ) -> Result<DividendBatch, CoreError> {
        input.validate()?;
        let stock_code = input.stock_code.trim().to_string();
        let mut locked_code = self.visible_batch(owner_id, batch_id).await?.stock_code;

        loop {
            let _guard = self
                .locks
                .acquire([
                    LockKey::Stock(locked_code.clone()),
                    LockKey::Stock(stock_code.clone()),
                ])
                .await;
            let mut batch = self.load_batch(batch_id).await?;
            if batch.stock_code != locked_code {
                locked_code = batch.stock_code;
                continue;
            }

            let records = self.resolve_allocations(owner_id, &stock_code, &input).await?;
            batch.replace(stock_code, input.per_div, input.div_date, records);
            if !self.repo.replace_batch(batch.clone()).await? {
                return Err(CoreError::BatchNotFound(batch_id));
            }

            debug!("Replaced dividend batch {batch_id}");
            return Ok(batch);
        }
    }

    pub async fn delete_batch(&self, owner_id: &str, batch_id: Uuid) -> Result<(), CoreError> {
        let batch = self.visible_batch(owner_id, batch_id).await?;

        let _guard = self.locks.acquire([LockKey::Stock(batch.stock_code)]).await;
        if !self.repo.delete_batch(batch_id).await? {
            return Err(CoreError::BatchNotFound(batch_id));
        }
        debug!("Deleted dividend batch {batch_id}");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub async fn get_batch(&self, owner_id: &str, batch_id: Uuid) -> Result<DividendBatch, CoreError> {
        self.visible_batch(owner_id, batch_id).await
    }

    /// A batch with each allocation joined to its lot, newest buy first.
    pub async fn batch_detail(
        &self,
        owner_id: &str,
        batch_id: Uuid,
    ) -> Result<DividendBatchDetail, CoreError> {
        let batch = self.visible_batch(owner_id, batch_id).await?;
        let lot_ids: Vec<Uuid> = batch.div_records.iter().map(|r| r.buy_record_id).collect();
        let lots: HashMap<Uuid, _> = self
            .repo
            .get_lots(&lot_ids)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();

        let mut lines: Vec<DividendLine> = batch
            .div_records
            .iter()
            .map(|record| {
                let lot = lots.get(&record.buy_record_id);
                DividendLine {
                    buy_record_id: record.buy_record_id,
                    account_id: record.account_id,
                    div_amount: record.div_amount,
                    total: batch.per_div * record.div_amount,
                    buy_amount: lot.map(|l| l.buy_amount),
                    buy_date: lot.map(|l| l.buy_date),
                    buy_price: lot.map(|l| l.buy_price),
                }
            })
            .collect();
        // Option orders None first, so reversing puts missing lots last.
        lines.sort_by(|a, b| b.buy_date.cmp(&a.buy_date));

        Ok(DividendBatchDetail {
            total: batch.total_amount(),
            id: batch.id,
            stock_code: batch.stock_code,
            per_div: batch.per_div,
            div_date: batch.div_date,
            account_ids: batch.account_ids,
            lines,
        })
    }

    /// Batches of one stock touching any of the accounts, newest first.
    pub async fn batches_for_stock(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
        stock_code: &str,
    ) -> Result<Vec<DividendBatch>, CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let filter = BatchFilter::for_accounts(&scope).with_stock_code(stock_code.trim());
        let mut batches = self.repo.find_batches(&filter).await?;
        batches.sort_by(|a, b| b.div_date.cmp(&a.div_date));
        Ok(batches)
    }

    /// Distinct stock codes with at least one batch touching the accounts.
    pub async fn stock_codes_with_dividends(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<String>, CoreError> {
        let batches = self.batches_in_scope(owner_id, account_ids).await?.1;
        let codes: BTreeSet<String> = batches.into_iter().map(|b| b.stock_code).collect();
        Ok(codes.into_iter().collect())
    }

    /// Every dividend allocation of one lot, with its batch's fields, newest first.
    pub async fn dividends_for_lot(
        &self,
        owner_id: &str,
        lot_id: Uuid,
    ) -> Result<Vec<LotDividend>, CoreError> {
        access::owned_lot(self.repo.as_ref(), owner_id, lot_id).await?;
        let batches = self.repo.find_batches(&BatchFilter::for_lot(lot_id)).await?;
        let mut dividends = lot_dividends(&batches, lot_id);
        dividends.sort_by(|a, b| b.div_date.cmp(&a.div_date));
        Ok(dividends)
    }

    /// `Σ perDiv × divAmount` per stock code over the accounts' allocations.
    pub async fn total_dividend_by_stock_code(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<BTreeMap<String, f64>, CoreError> {
        let (scope, batches) = self.batches_in_scope(owner_id, account_ids).await?;
        Ok(totals_by_stock(&batches, &scope))
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Turn caller allocations into stored ones, copying each lot's account.
    async fn resolve_allocations(
        &self,
        owner_id: &str,
        stock_code: &str,
        input: &NewDividendBatch,
    ) -> Result<Vec<DivAllocation>, CoreError> {
        let mut records = Vec::with_capacity(input.allocations.len());
        for allocation in &input.allocations {
            let lot = access::owned_lot(self.repo.as_ref(), owner_id, allocation.buy_record_id).await?;
            if lot.stock_code != stock_code {
                return Err(CoreError::ValidationError(format!(
                    "Buy lot {} holds {}, not {stock_code}",
                    lot.id, lot.stock_code
                )));
            }
            records.push(DivAllocation {
                buy_record_id: lot.id,
                account_id: lot.account_id,
                div_amount: allocation.div_amount,
            });
        }
        Ok(records)
    }

    async fn load_batch(&self, batch_id: Uuid) -> Result<DividendBatch, CoreError> {
        self.repo
            .get_batch(batch_id)
            .await?
            .ok_or(CoreError::BatchNotFound(batch_id))
    }

    async fn visible_batch(&self, owner_id: &str, batch_id: Uuid) -> Result<DividendBatch, CoreError> {
        let batch = self.load_batch(batch_id).await?;
        access::ensure_batch_visible(self.repo.as_ref(), owner_id, &batch).await?;
        Ok(batch)
    }

    pub(crate) async fn batches_in_scope(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<(Vec<Uuid>, Vec<DividendBatch>), CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok((scope, Vec::new()));
        }
        let batches = self.repo.find_batches(&BatchFilter::for_accounts(&scope)).await?;
        Ok((scope, batches))
    }
}

// ── Folds ───────────────────────────────────────────────────────────

/// Dividend totals per stock code, counting only allocations credited to `account_ids`.
pub fn totals_by_stock(batches: &[DividendBatch], account_ids: &[Uuid]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for batch in batches {
        for record in batch.div_records.iter().filter(|r| account_ids.contains(&r.account_id)) {
            *totals.entry(batch.stock_code.clone()).or_insert(0.0) +=
                batch.per_div * record.div_amount;
        }
    }
    totals
}

/// Dividend totals per account.
pub fn totals_by_account(batches: &[DividendBatch]) -> HashMap<Uuid, f64> {
    let mut totals = HashMap::new();
    for batch in batches {
        for record in &batch.div_records {
            *totals.entry(record.account_id).or_insert(0.0) += batch.per_div * record.div_amount;
        }
    }
    totals
}

/// Unwind the batches' allocations down to those of one lot.
pub fn lot_dividends(batches: &[DividendBatch], lot_id: Uuid) -> Vec<LotDividend> {
    batches
        .iter()
        .flat_map(|batch| {
            batch
                .div_records
                .iter()
                .filter(move |r| r.buy_record_id == lot_id)
                .map(move |r| LotDividend {
                    batch_id: batch.id,
                    stock_code: batch.stock_code.clone(),
                    per_div: batch.per_div,
                    div_date: batch.div_date,
                    buy_record_id: r.buy_record_id,
                    account_id: r.account_id,
                    div_amount: r.div_amount,
                })
        })
        .collect()
}
