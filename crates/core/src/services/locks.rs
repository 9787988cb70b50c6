use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// What a write operation serializes on.
///
/// The derived ordering (accounts, then stocks, then lots) is the global
/// acquisition order, so two operations can never wait on each other in a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    /// Lot creation and account deletion for one account
    Account(Uuid),
    /// Every mutation of dividend batches for one stock code
    Stock(String),
    /// Read-modify-write of one buy lot
    Lot(Uuid),
}

/// Registry size past which idle entries get dropped.
const PRUNE_THRESHOLD: usize = 1024;

/// In-process per-key write serialization.
///
/// Locks are not reentrant: an operation acquires everything it needs once,
/// up front, and calls only `*_locked` helpers while holding them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

/// Guards held for the duration of one operation. Dropping it releases every key.
#[derive(Debug)]
pub struct LockSet {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key, in global order, skipping duplicates.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> LockSet {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let mutex = self.entry(key);
            guards.push(mutex.lock_owned().await);
        }
        LockSet { _guards: guards }
    }

    fn entry(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() > PRUNE_THRESHOLD {
            // Only the registry holds a reference to an idle lock.
            entries.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        }
        entries.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn key_order_puts_accounts_before_stocks_before_lots() {
        let id = Uuid::new_v4();
        let mut keys = vec![
            LockKey::Lot(id),
            LockKey::Stock("sh600519".into()),
            LockKey::Account(id),
        ];
        keys.sort();
        assert!(matches!(keys[0], LockKey::Account(_)));
        assert!(matches!(keys[1], LockKey::Stock(_)));
        assert!(matches!(keys[2], LockKey::Lot(_)));
    }

    #[tokio::test]
    async fn duplicate_keys_do_not_self_deadlock() {
        let locks = KeyedLocks::new();
        let key = LockKey::Stock("AAPL".into());
        let acquired = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire([key.clone(), key]),
        )
        .await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let held = locks.acquire([LockKey::Stock("AAPL".into())]).await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire([LockKey::Stock("AAPL".into())]),
        )
        .await;
        assert!(second.is_err());

        drop(held);
        let third = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire([LockKey::Stock("AAPL".into())]),
        )
        .await;
        assert!(third.is_ok());
    }
}
