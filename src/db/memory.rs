//! In-memory ledger store for tests and ephemeral use.
//!
//! All state lives behind one `RwLock`. `commit` performs the version check,
//! the account write and the entry insert inside a single write guard, which
//! gives the same all-or-nothing result as a database transaction. The guard
//! is never held across retry attempts.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::models::{Account, BalanceWrite, CommitOutcome, EntryStatus, LedgerEntry};
use super::repository::{LedgerStore, StoreResult};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<i64, Account>,
    /// id 순서 = 삽입 순서
    entries: Vec<LedgerEntry>,
    /// idempotency key → entries index (UNIQUE 제약 역할)
    by_key: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_entry(&self, idempotency_key: &str) -> StoreResult<Option<LedgerEntry>> {
        let state = self.read()?;
        Ok(state
            .by_key
            .get(idempotency_key)
            .map(|&idx| state.entries[idx].clone()))
    }

    async fn find_account(&self, user_id: i64) -> StoreResult<Option<Account>> {
        Ok(self.read()?.accounts.get(&user_id).cloned())
    }

    async fn open_account(&self, user_id: i64) -> StoreResult<Account> {
        let mut state = self.write()?;
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::virtual_for(user_id));
        Ok(account.clone())
    }

    async fn commit(&self, write: BalanceWrite) -> StoreResult<CommitOutcome> {
        let mut state = self.write()?;
        let now = Utc::now();
        let entry = write.entry;

        // 1) 조건부 계정 쓰기 검사
        match (write.expected_version, state.accounts.get(&entry.user_id)) {
            (Some(expected), Some(current)) if current.version == expected => {}
            (None, None) => {}
            _ => return Ok(CommitOutcome::VersionConflict),
        }

        // 2) UNIQUE(idempotency_key) 검사 - 실패 시 아무것도 쓰지 않음
        if state.by_key.contains_key(&entry.idempotency_key) {
            return Ok(CommitOutcome::DuplicateKey);
        }

        // 3) 두 쓰기를 같은 guard 안에서 반영
        match state.accounts.get_mut(&entry.user_id) {
            Some(account) => {
                account.balance = entry.balance_after;
                account.version += 1;
                account.updated_at = now;
            }
            None => {
                state.accounts.insert(
                    entry.user_id,
                    Account {
                        user_id: entry.user_id,
                        balance: entry.balance_after,
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        let stored = LedgerEntry {
            id: state.entries.len() as i64 + 1,
            idempotency_key: entry.idempotency_key,
            user_id: entry.user_id,
            amount: entry.amount,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            kind: entry.kind,
            related_entity_type: entry.related_entity_type,
            related_entity_id: entry.related_entity_id,
            description: entry.description,
            status: EntryStatus::Completed,
            created_at: now,
        };
        let idx = state.entries.len();
        state.by_key.insert(stored.idempotency_key.clone(), idx);
        state.entries.push(stored.clone());

        Ok(CommitOutcome::Applied(stored))
    }

    async fn list_entries(
        &self,
        user_id: i64,
        offset: u64,
        limit: u32,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.read()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_entries(&self, user_id: i64) -> StoreResult<i64> {
        let state = self.read()?;
        Ok(state.entries.iter().filter(|e| e.user_id == user_id).count() as i64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewEntry;

    fn new_entry(user_id: i64, key: &str, before: i64, amount: i64) -> NewEntry {
        NewEntry {
            idempotency_key: key.to_string(),
            user_id,
            amount,
            balance_before: before,
            balance_after: before + amount,
            kind: "credit:grant".to_string(),
            related_entity_type: None,
            related_entity_id: None,
            description: String::new(),
        }
    }

    fn applied(outcome: CommitOutcome) -> LedgerEntry {
        match outcome {
            CommitOutcome::Applied(entry) => entry,
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_commit_creates_account_at_version_one() {
        let store = InMemoryLedgerStore::new();
        let entry = applied(
            store
                .commit(BalanceWrite {
                    expected_version: None,
                    entry: new_entry(1, "a", 0, 100),
                })
                .await
                .unwrap(),
        );

        assert_eq!(entry.id, 1);
        assert_eq!(entry.status, EntryStatus::Completed);

        let account = store.find_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        store
            .commit(BalanceWrite {
                expected_version: None,
                entry: new_entry(1, "a", 0, 100),
            })
            .await
            .unwrap();

        // 계정이 이미 있는데 INSERT 시도
        let outcome = store
            .commit(BalanceWrite {
                expected_version: None,
                entry: new_entry(1, "b", 0, 5),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::VersionConflict);

        // 오래된 version
        let outcome = store
            .commit(BalanceWrite {
                expected_version: Some(7),
                entry: new_entry(1, "c", 100, 5),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::VersionConflict);

        assert_eq!(store.count_entries(1).await.unwrap(), 1);
        assert_eq!(store.find_account(1).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_duplicate_key_rolls_back_account_write() {
        let store = InMemoryLedgerStore::new();
        store
            .commit(BalanceWrite {
                expected_version: None,
                entry: new_entry(1, "a", 0, 100),
            })
            .await
            .unwrap();

        let outcome = store
            .commit(BalanceWrite {
                expected_version: Some(1),
                entry: new_entry(1, "a", 100, 100),
            })
            .await
            .unwrap();
        assert_eq!(outcome, CommitOutcome::DuplicateKey);

        let account = store.find_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
        assert_eq!(account.version, 1);
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let store = InMemoryLedgerStore::new();
        let first = store.open_account(9).await.unwrap();
        assert_eq!((first.balance, first.version), (0, 1));

        store
            .commit(BalanceWrite {
                expected_version: Some(1),
                entry: new_entry(9, "a", 0, 10),
            })
            .await
            .unwrap();

        let again = store.open_account(9).await.unwrap();
        assert_eq!((again.balance, again.version), (10, 2));
    }

    #[tokio::test]
    async fn test_list_entries_filters_and_paginates() {
        let store = InMemoryLedgerStore::new();
        for (i, user) in [1, 2, 1, 1, 2].into_iter().enumerate() {
            let current = store.find_account(user).await.unwrap();
            let before = current.as_ref().map(|a| a.balance).unwrap_or(0);
            store
                .commit(BalanceWrite {
                    expected_version: current.map(|a| a.version),
                    entry: new_entry(user, &format!("k{i}"), before, 10),
                })
                .await
                .unwrap();
        }

        let page = store.list_entries(1, 1, 10).await.unwrap();
        let keys: Vec<_> = page.iter().map(|e| e.idempotency_key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3"]);
        assert!(page.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(store.count_entries(2).await.unwrap(), 2);
        assert!(store.list_entries(1, 0, 0).await.unwrap().is_empty());
    }
}
