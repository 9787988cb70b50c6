use log::debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::Account;
use crate::models::cascade::CascadeReport;
use crate::repository::traits::LedgerRepository;
use crate::services::access;
use crate::services::cascade_service::CascadeService;

/// Manages the caller's brokerage accounts.
#[derive(Clone)]
pub struct AccountService {
    repo: Arc<dyn LedgerRepository>,
    cascade: CascadeService,
}

impl AccountService {
    pub fn new(repo: Arc<dyn LedgerRepository>, cascade: CascadeService) -> Self {
        Self { repo, cascade }
    }

    pub async fn create_account(
        &self,
        owner_id: &str,
        name: &str,
        currency: &str,
    ) -> Result<Account, CoreError> {
        let account = Account::new(owner_id, name.trim(), currency)?;
        self.repo.insert_account(account.clone()).await?;
        debug!("Created account {} ({})", account.id, account.currency);
        Ok(account)
    }

    /// The caller's accounts, sorted by name.
    pub async fn list_accounts(&self, owner_id: &str) -> Result<Vec<Account>, CoreError> {
        let mut accounts = self.repo.list_accounts(owner_id).await?;
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(accounts)
    }

    pub async fn get_account(&self, owner_id: &str, account_id: Uuid) -> Result<Account, CoreError> {
        access::owned_account(self.repo.as_ref(), owner_id, account_id).await
    }

    /// Delete an account together with its lots and its dividend shares.
    pub async fn delete_account(
        &self,
        owner_id: &str,
        account_id: Uuid,
    ) -> Result<CascadeReport, CoreError> {
        access::owned_account(self.repo.as_ref(), owner_id, account_id).await?;
        self.cascade.delete_account(account_id).await
    }
}
