use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::Account;
use crate::models::dividend::DividendBatch;
use crate::models::ledger::LedgerData;
use crate::models::lot::BuyLot;
use crate::models::query::{BatchFilter, LotFilter};

use super::traits::LedgerRepository;

#[derive(Debug, Default)]
struct Collections {
    accounts: BTreeMap<Uuid, Account>,
    lots: BTreeMap<Uuid, BuyLot>,
    batches: BTreeMap<Uuid, DividendBatch>,
}

/// In-process document store. Every call takes the lock once, so each call
/// is atomic for the document(s) it touches.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: RwLock<Collections>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository holding the documents of a snapshot.
    pub fn from_data(data: LedgerData) -> Self {
        let collections = Collections {
            accounts: data.accounts.into_iter().map(|a| (a.id, a)).collect(),
            lots: data.lots.into_iter().map(|l| (l.id, l)).collect(),
            batches: data.batches.into_iter().map(|b| (b.id, b)).collect(),
        };
        Self {
            inner: RwLock::new(collections),
        }
    }
}

#[async_trait]
impl LedgerRepository for MemoryRepository {
    async fn insert_account(&self, account: Account) -> Result<(), CoreError> {
        self.inner.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>, CoreError> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self, owner_id: &str) -> Result<Vec<Account>, CoreError> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .filter(|a| a.is_owned_by(owner_id))
            .cloned()
            .collect())
    }

    async fn delete_account(&self, id: Uuid) -> Result<bool, CoreError> {
        Ok(self.inner.write().await.accounts.remove(&id).is_some())
    }

    async fn insert_lot(&self, lot: BuyLot) -> Result<(), CoreError> {
        self.inner.write().await.lots.insert(lot.id, lot);
        Ok(())
    }

    async fn insert_lots(&self, lots: Vec<BuyLot>) -> Result<(), CoreError> {
        let mut inner = self.inner.write().await;
        for lot in lots {
            inner.lots.insert(lot.id, lot);
        }
        Ok(())
    }

    async fn get_lot(&self, id: Uuid) -> Result<Option<BuyLot>, CoreError> {
        Ok(self.inner.read().await.lots.get(&id).cloned())
    }

    async fn get_lots(&self, ids: &[Uuid]) -> Result<Vec<BuyLot>, CoreError> {
        let inner = self.inner.read().await;
        Ok(ids.iter().filter_map(|id| inner.lots.get(id).cloned()).collect())
    }

    async fn find_lots(&self, filter: &LotFilter) -> Result<Vec<BuyLot>, CoreError> {
        Ok(self
            .inner
            .read()
            .await
            .lots
            .values()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect())
    }

    async fn replace_lot(&self, lot: BuyLot) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().await;
        match inner.lots.get_mut(&lot.id) {
            Some(slot) => {
                *slot = lot;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_lot(&self, id: Uuid) -> Result<Option<BuyLot>, CoreError> {
        Ok(self.inner.write().await.lots.remove(&id))
    }

    async fn insert_batch(&self, batch: DividendBatch) -> Result<(), CoreError> {
        self.inner.write().await.batches.insert(batch.id, batch);
        Ok(())
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<DividendBatch>, CoreError> {
        Ok(self.inner.read().await.batches.get(&id).cloned())
    }

    async fn find_batches(&self, filter: &BatchFilter) -> Result<Vec<DividendBatch>, CoreError> {
        Ok(self
            .inner
            .read()
            .await
            .batches
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn replace_batch(&self, batch: DividendBatch) -> Result<bool, CoreError> {
        let mut inner = self.inner.write().await;
        match inner.batches.get_mut(&batch.id) {
            Some(slot) => {
                *slot = batch;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_batch(&self, id: Uuid) -> Result<bool, CoreError> {
        Ok(self.inner.write().await.batches.remove(&id).is_some())
    }

    async fn export(&self) -> Result<LedgerData, CoreError> {
        let inner = self.inner.read().await;
        Ok(LedgerData {
            accounts: inner.accounts.values().cloned().collect(),
            lots: inner.lots.values().cloned().collect(),
            batches: inner.batches.values().cloned().collect(),
        })
    }
}
