//! Ownership checks shared by the services. Existence is always checked
//! before ownership, so a missing document reports NotFound.

use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::Account;
use crate::models::dividend::DividendBatch;
use crate::models::lot::BuyLot;
use crate::repository::traits::LedgerRepository;

pub async fn owned_account(
    repo: &dyn LedgerRepository,
    owner_id: &str,
    account_id: Uuid,
) -> Result<Account, CoreError> {
    let account = repo
        .get_account(account_id)
        .await?
        .ok_or(CoreError::AccountNotFound(account_id))?;
    if !account.is_owned_by(owner_id) {
        return Err(CoreError::Unauthorized(format!(
            "account {account_id} does not belong to the caller"
        )));
    }
    Ok(account)
}

pub async fn owned_lot(
    repo: &dyn LedgerRepository,
    owner_id: &str,
    lot_id: Uuid,
) -> Result<BuyLot, CoreError> {
    let lot = repo
        .get_lot(lot_id)
        .await?
        .ok_or(CoreError::LotNotFound(lot_id))?;
    ensure_lot_owned(repo, owner_id, &lot).await?;
    Ok(lot)
}

pub async fn ensure_lot_owned(
    repo: &dyn LedgerRepository,
    owner_id: &str,
    lot: &BuyLot,
) -> Result<(), CoreError> {
    let owned = repo
        .get_account(lot.account_id)
        .await?
        .is_some_and(|a| a.is_owned_by(owner_id));
    if !owned {
        return Err(CoreError::Unauthorized(format!(
            "buy lot {} does not belong to the caller",
            lot.id
        )));
    }
    Ok(())
}

/// A batch is visible to the caller when at least one of its accounts is theirs.
pub async fn ensure_batch_visible(
    repo: &dyn LedgerRepository,
    owner_id: &str,
    batch: &DividendBatch,
) -> Result<(), CoreError> {
    let owned = owned_account_ids(repo, owner_id).await?;
    if !batch.account_ids.iter().any(|id| owned.contains(id)) {
        return Err(CoreError::Unauthorized(format!(
            "dividend batch {} does not belong to the caller",
            batch.id
        )));
    }
    Ok(())
}

pub async fn owned_account_ids(
    repo: &dyn LedgerRepository,
    owner_id: &str,
) -> Result<Vec<Uuid>, CoreError> {
    Ok(repo
        .list_accounts(owner_id)
        .await?
        .into_iter()
        .map(|a| a.id)
        .collect())
}

/// Resolve the accounts a read should cover.
///
/// `None` means all of the caller's accounts. An explicit list must name
/// only existing accounts owned by the caller.
pub async fn account_scope(
    repo: &dyn LedgerRepository,
    owner_id: &str,
    requested: Option<&[Uuid]>,
) -> Result<Vec<Uuid>, CoreError> {
    match requested {
        None => owned_account_ids(repo, owner_id).await,
        Some(ids) => {
            let mut scope = Vec::with_capacity(ids.len());
            for &id in ids {
                owned_account(repo, owner_id, id).await?;
                if !scope.contains(&id) {
                    scope.push(id);
                }
            }
            Ok(scope)
        }
    }
}
