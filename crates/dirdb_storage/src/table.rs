//! Lock and transaction bookkeeping shared by every store.

use crate::backend::{LockMode, PutMode};
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;

/// What the owning store must do to the OS-level lock after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockAction {
    /// Nothing; the lock was already held at a sufficient level.
    None,
    /// Acquire the OS lock in this mode.
    Acquire(LockMode),
    /// Release the OS lock. `persist` is set when the table changed under an
    /// exclusive lock.
    Release {
        /// Whether pending writes must be written out first.
        persist: bool,
    },
}

#[derive(Debug)]
struct Snapshot {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    dirty: bool,
}

/// An ordered map plus lock depth, dirtiness and transaction snapshot.
#[derive(Debug, Default)]
pub(crate) struct Table {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    mode: Option<LockMode>,
    depth: u32,
    dirty: bool,
    txn_depth: u32,
    snapshot: Option<Snapshot>,
}

impl Table {
    pub(crate) fn with_entries(entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    pub(crate) fn entries(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.entries
    }

    pub(crate) fn replace_entries(&mut self, entries: BTreeMap<Vec<u8>, Vec<u8>>) {
        self.entries = entries;
        self.dirty = false;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn enter(&mut self, mode: LockMode) -> StorageResult<LockAction> {
        match (self.mode, mode) {
            (None, _) => {
                self.mode = Some(mode);
                self.depth = 1;
                Ok(LockAction::Acquire(mode))
            }
            (Some(LockMode::Shared), LockMode::Exclusive) => Err(StorageError::LockUpgrade),
            (Some(_), _) => {
                self.depth += 1;
                Ok(LockAction::None)
            }
        }
    }

    pub(crate) fn leave(&mut self) -> StorageResult<LockAction> {
        if self.depth == 0 {
            return Err(StorageError::NotLocked("unlock"));
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(LockAction::None);
        }
        let persist = self.mode == Some(LockMode::Exclusive) && self.dirty;
        self.mode = None;
        Ok(LockAction::Release { persist })
    }

    pub(crate) fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if self.mode.is_none() {
            return Err(StorageError::NotLocked("get"));
        }
        Ok(self.entries.get(key).cloned())
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8], mode: PutMode) -> StorageResult<()> {
        self.require_exclusive("put")?;
        let exists = self.entries.contains_key(key);
        match mode {
            PutMode::Insert if exists => return Err(StorageError::KeyExists),
            PutMode::Modify if !exists => return Err(StorageError::KeyNotFound),
            _ => {}
        }
        self.entries.insert(key.to_vec(), value.to_vec());
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.require_exclusive("delete")?;
        if self.entries.remove(key).is_none() {
            return Err(StorageError::KeyNotFound);
        }
        self.dirty = true;
        Ok(())
    }

    pub(crate) fn snapshot_entries(&self) -> StorageResult<Vec<(Vec<u8>, Vec<u8>)>> {
        if self.mode.is_none() {
            return Err(StorageError::NotLocked("traverse"));
        }
        Ok(self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Opens a transaction level. The caller must already hold the
    /// exclusive lock level that belongs to this transaction.
    pub(crate) fn begin(&mut self) {
        self.txn_depth += 1;
        if self.txn_depth == 1 {
            self.snapshot = Some(Snapshot {
                entries: self.entries.clone(),
                dirty: self.dirty,
            });
        }
    }

    /// Closes one transaction level. The caller releases one lock level.
    pub(crate) fn commit(&mut self) -> StorageResult<()> {
        if self.txn_depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        self.txn_depth -= 1;
        if self.txn_depth == 0 {
            self.snapshot = None;
        }
        Ok(())
    }

    /// Rolls back to the snapshot. Returns how many lock levels the caller
    /// must release.
    pub(crate) fn cancel(&mut self) -> StorageResult<u32> {
        if self.txn_depth == 0 {
            return Err(StorageError::NoTransaction);
        }
        if let Some(snapshot) = self.snapshot.take() {
            self.entries = snapshot.entries;
            self.dirty = snapshot.dirty;
        }
        let levels = self.txn_depth;
        self.txn_depth = 0;
        Ok(levels)
    }

    fn require_exclusive(&self, op: &'static str) -> StorageResult<()> {
        if self.mode == Some(LockMode::Exclusive) {
            Ok(())
        } else {
            Err(StorageError::NotLocked(op))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_first_lock_acquires() {
        let mut table = Table::default();
        assert_eq!(
            table.enter(LockMode::Shared).unwrap(),
            LockAction::Acquire(LockMode::Shared)
        );
        assert_eq!(table.enter(LockMode::Shared).unwrap(), LockAction::None);
        assert_eq!(table.leave().unwrap(), LockAction::None);
        assert_eq!(
            table.leave().unwrap(),
            LockAction::Release { persist: false }
        );
    }

    #[test]
    fn table_shared_cannot_upgrade() {
        let mut table = Table::default();
        table.enter(LockMode::Shared).unwrap();
        assert!(matches!(
            table.enter(LockMode::Exclusive),
            Err(StorageError::LockUpgrade)
        ));
    }

    #[test]
    fn table_exclusive_covers_shared() {
        let mut table = Table::default();
        table.enter(LockMode::Exclusive).unwrap();
        assert_eq!(table.enter(LockMode::Shared).unwrap(), LockAction::None);
    }

    #[test]
    fn table_dirty_exclusive_release_persists() {
        let mut table = Table::default();
        table.enter(LockMode::Exclusive).unwrap();
        table.put(b"k", b"v", PutMode::Insert).unwrap();
        assert_eq!(table.leave().unwrap(), LockAction::Release { persist: true });
    }

    #[test]
    fn table_write_requires_exclusive() {
        let mut table = Table::default();
        assert!(matches!(
            table.put(b"k", b"v", PutMode::Replace),
            Err(StorageError::NotLocked(_))
        ));
        table.enter(LockMode::Shared).unwrap();
        assert!(matches!(
            table.delete(b"k"),
            Err(StorageError::NotLocked(_))
        ));
    }

    #[test]
    fn table_cancel_restores_snapshot() {
        let mut table = Table::default();
        table.enter(LockMode::Exclusive).unwrap();
        table.put(b"a", b"1", PutMode::Insert).unwrap();
        table.begin();
        table.put(b"b", b"2", PutMode::Insert).unwrap();
        table.delete(b"a").unwrap();
        assert_eq!(table.cancel().unwrap(), 1);
        assert_eq!(table.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(table.get(b"b").unwrap(), None);
    }

    #[test]
    fn table_commit_without_begin_fails() {
        let mut table = Table::default();
        assert!(matches!(table.commit(), Err(StorageError::NoTransaction)));
        assert!(matches!(table.cancel(), Err(StorageError::NoTransaction)));
    }
}
