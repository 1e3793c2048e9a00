//! Key-value store trait definition.

use crate::error::StorageResult;

/// Whole-database lock modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers may hold the lock at once.
    Shared,
    /// A single writer holds the lock.
    Exclusive,
}

/// How `put` treats an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with `KeyExists` if the key is present.
    Insert,
    /// Write whether or not the key is present.
    Replace,
    /// Fail with `KeyNotFound` if the key is absent.
    Modify,
}

/// An embedded ordered key-value store.
///
/// Stores know nothing about records, DNs or indexes. They keep an ordered
/// map of byte keys to byte values and mediate access through one
/// whole-database lock.
///
/// # Invariants
///
/// - Reads require the lock in either mode; writes require it exclusive
/// - Locks are counted: every `lock` must be paired with one `unlock`
/// - A shared lock cannot be upgraded while held
/// - `traverse` visits keys in ascending byte order
/// - Writes become visible to other processes when the outermost
///   exclusive lock is released outside a transaction
///
/// # Implementors
///
/// - [`super::MemoryStore`] - Process-private, for tests and scratch databases
/// - [`super::FileStore`] - Persistent, shared between processes
pub trait KvStore: Send + Sync {
    /// Fetches the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `NotLocked` if no lock is held, or an I/O error.
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyExists` or `KeyNotFound` depending on `mode`, `NotLocked`
    /// without the exclusive lock, and `ReadOnly` on read-only stores.
    fn put(&self, key: &[u8], value: &[u8], mode: PutMode) -> StorageResult<()>;

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent.
    fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Visits every entry in key order until `visit` returns `false`.
    ///
    /// The visitor sees a snapshot taken when the traversal starts, so it
    /// may call back into the store.
    ///
    /// # Errors
    ///
    /// Returns `NotLocked` if no lock is held.
    fn traverse(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> StorageResult<()>;

    /// Acquires the whole-database lock, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns `LockUpgrade` when asking for `Exclusive` while holding
    /// `Shared`, or `ReadOnly` for exclusive locks on read-only stores.
    fn lock(&self, mode: LockMode) -> StorageResult<()>;

    /// Releases one level of the whole-database lock.
    ///
    /// # Errors
    ///
    /// Returns `NotLocked` if no lock is held, or an I/O error while
    /// persisting pending writes.
    fn unlock(&self) -> StorageResult<()>;

    /// Takes the exclusive lock and snapshots the table.
    ///
    /// Nested starts are counted; only the outermost one snapshots.
    ///
    /// # Errors
    ///
    /// Returns the errors of `lock(LockMode::Exclusive)`.
    fn transaction_start(&self) -> StorageResult<()>;

    /// Ends one transaction level, persisting at the outermost level.
    ///
    /// # Errors
    ///
    /// Returns `NoTransaction` if no transaction is open.
    fn transaction_commit(&self) -> StorageResult<()>;

    /// Restores the snapshot and releases every transaction lock level.
    ///
    /// # Errors
    ///
    /// Returns `NoTransaction` if no transaction is open.
    fn transaction_cancel(&self) -> StorageResult<()>;

    /// Returns true if the store rejects writes.
    fn is_read_only(&self) -> bool;

    /// Collects every key that starts with `prefix`, in order.
    ///
    /// # Errors
    ///
    /// Returns the errors of `traverse`.
    fn keys_with_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.traverse(&mut |key, _| {
            if key.starts_with(prefix) {
                keys.push(key.to_vec());
            }
            true
        })?;
        Ok(keys)
    }
}
