use log::debug;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::calc;
use crate::errors::CoreError;
use crate::models::dividend::DividendBatch;
use crate::models::lot::BuyLot;
use crate::models::query::{BatchFilter, ListLotsQuery, LotFilter, LotPage, SortOrder, SortSpec};
use crate::models::settings::LedgerSettings;
use crate::models::summary::{AccountSummary, SellAllocationView, StockSummary};
use crate::repository::traits::LedgerRepository;
use crate::services::access;
use crate::services::dividend_service::{totals_by_account, totals_by_stock};

/// Read-only listing and aggregation over lots and dividend batches.
#[derive(Clone)]
pub struct QueryService {
    repo: Arc<dyn LedgerRepository>,
    settings: Arc<LedgerSettings>,
}

impl QueryService {
    pub fn new(repo: Arc<dyn LedgerRepository>, settings: Arc<LedgerSettings>) -> Self {
        Self { repo, settings }
    }

    /// One page of the caller's lots, filtered and sorted.
    pub async fn list_lots(&self, owner_id: &str, query: &ListLotsQuery) -> Result<LotPage, CoreError> {
        if query.page == 0 {
            return Err(CoreError::ValidationError("Page numbers start at 1".into()));
        }
        let limit = query
            .limit
            .unwrap_or(self.settings.default_page_limit)
            .clamp(1, self.settings.max_page_limit);
        let sort = query.sort.unwrap_or(self.settings.default_sort);

        let scope =
            access::account_scope(self.repo.as_ref(), owner_id, query.account_ids.as_deref()).await?;
        let lots = if scope.is_empty() {
            Vec::new()
        } else {
            let mut filter = LotFilter::for_accounts(&scope);
            if let Some(codes) = &query.stock_codes {
                let codes: Vec<String> = codes.iter().map(|c| c.trim().to_string()).collect();
                filter = filter.with_stock_codes(&codes);
            }
            self.repo.find_lots(&filter).await?
        };

        let mut matched = Vec::with_capacity(lots.len());
        for lot in lots {
            if passes_ranges(query, &lot)? {
                matched.push(lot);
            }
        }
        sort_lots(&mut matched, sort);

        let total = matched.len();
        let data: Vec<BuyLot> = matched
            .into_iter()
            .skip((query.page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        let next_page = (data.len() == limit).then_some(query.page + 1);

        debug!(
            "Listed {} of {total} buy lots (page {}, limit {limit})",
            data.len(),
            query.page
        );
        Ok(LotPage {
            data,
            total,
            next_page,
        })
    }

    /// Totals per stock code across the accounts (all of the caller's when `None`).
    pub async fn stock_summary(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<BTreeMap<String, StockSummary>, CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok(BTreeMap::new());
        }
        let lots = self.repo.find_lots(&LotFilter::for_accounts(&scope)).await?;
        let batches = self.repo.find_batches(&BatchFilter::for_accounts(&scope)).await?;
        Ok(summarize_by_stock(
            &lots,
            &batches,
            &scope,
            self.settings.quantity_epsilon,
        ))
    }

    /// One summary per account in scope, in account-name order.
    pub async fn account_summaries(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<AccountSummary>, CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let lots = self.repo.find_lots(&LotFilter::for_accounts(&scope)).await?;
        let batches = self.repo.find_batches(&BatchFilter::for_accounts(&scope)).await?;
        let dividends = totals_by_account(&batches);
        let epsilon = self.settings.quantity_epsilon;

        let mut summaries = Vec::with_capacity(scope.len());
        for account_id in scope {
            let Some(account) = self.repo.get_account(account_id).await? else {
                continue;
            };
            let held: Vec<&BuyLot> = lots.iter().filter(|l| l.account_id == account_id).collect();
            summaries.push(AccountSummary {
                account_id,
                name: account.name,
                currency: account.currency,
                lot_count: held.len(),
                open_lot_count: held.iter().filter(|l| l.unsold_amount > epsilon).count(),
                total_cost: held.iter().map(|l| l.buy_price * l.unsold_amount).sum(),
                realized_pl: calc::round3(held.iter().map(|l| l.profit_loss).sum()),
                total_div: dividends.get(&account_id).copied().unwrap_or(0.0),
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// Every sale in the accounts, flattened with its lot, newest first.
    pub async fn sell_allocations(
        &self,
        owner_id: &str,
        account_ids: Option<&[Uuid]>,
    ) -> Result<Vec<SellAllocationView>, CoreError> {
        let scope = access::account_scope(self.repo.as_ref(), owner_id, account_ids).await?;
        if scope.is_empty() {
            return Ok(Vec::new());
        }
        let lots = self.repo.find_lots(&LotFilter::for_accounts(&scope)).await?;
        let mut views: Vec<SellAllocationView> = lots
            .iter()
            .flat_map(|lot| {
                lot.sell_allocations.iter().map(move |s| SellAllocationView {
                    id: s.id,
                    buy_record_id: lot.id,
                    account_id: lot.account_id,
                    stock_code: lot.stock_code.clone(),
                    buy_price: lot.buy_price,
                    buy_date: lot.buy_date,
                    sell_price: s.sell_price,
                    sell_amount: s.sell_amount,
                    sell_date: s.sell_date,
                    profit_loss: s.profit_loss,
                    apy: s.apy,
                })
            })
            .collect();
        views.sort_by(|a, b| b.sell_date.cmp(&a.sell_date));
        Ok(views)
    }
}

fn passes_ranges(query: &ListLotsQuery, lot: &BuyLot) -> Result<bool, CoreError> {
    for (field, range) in &query.filter {
        if !range.matches(*field, field.value(lot))? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Sort by the requested field; ties fall back to lot id so pages are stable.
pub fn sort_lots(lots: &mut [BuyLot], sort: SortSpec) {
    lots.sort_by(|a, b| {
        let ordering = match sort.order {
            SortOrder::Asc => sort.key.compare(a, b),
            SortOrder::Desc => sort.key.compare(b, a),
        };
        match ordering {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

/// Fold lots and dividend batches into per-stock totals.
///
/// A stock with dividends in scope but no remaining lots still gets an entry.
pub fn summarize_by_stock(
    lots: &[BuyLot],
    batches: &[DividendBatch],
    account_ids: &[Uuid],
    epsilon: f64,
) -> BTreeMap<String, StockSummary> {
    let mut summaries: BTreeMap<String, StockSummary> = BTreeMap::new();
    for lot in lots.iter().filter(|l| account_ids.contains(&l.account_id)) {
        let entry = summaries.entry(lot.stock_code.clone()).or_default();
        entry.total_buy_amount += lot.buy_amount;
        entry.total_unsold_amount += lot.unsold_amount;
        entry.total_cost += lot.buy_price * lot.unsold_amount;
        entry.total_pl += lot.profit_loss;
    }
    for (code, total) in totals_by_stock(batches, account_ids) {
        summaries.entry(code).or_default().total_div = total;
    }
    for summary in summaries.values_mut() {
        summary.total_pl = calc::round3(summary.total_pl);
        summary.avg_cost = if summary.total_unsold_amount > epsilon {
            calc::round3(summary.total_cost / summary.total_unsold_amount)
        } else {
            0.0
        };
    }
    summaries
}
