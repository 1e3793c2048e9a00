//! In-memory key-value store for testing.

use crate::backend::{KvStore, LockMode, PutMode};
use crate::error::{StorageError, StorageResult};
use crate::table::{LockAction, Table};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The committed entries every connection loads from and writes back to.
#[derive(Debug, Default)]
struct Image {
    generation: u64,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// State shared by all connections to one store.
#[derive(Debug, Default)]
struct SharedMemory {
    gate: Arc<RwLock<()>>,
    image: Mutex<Image>,
}

/// The gate guard a connection holds while its lock depth is non-zero.
enum Held {
    Shared {
        _guard: ArcRwLockReadGuard<RawRwLock, ()>,
    },
    Exclusive {
        _guard: ArcRwLockWriteGuard<RawRwLock, ()>,
    },
}

impl std::fmt::Debug for Held {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared { .. } => f.write_str("Shared"),
            Self::Exclusive { .. } => f.write_str("Exclusive"),
        }
    }
}

/// Lock depth, transaction snapshot and working table of one connection.
#[derive(Debug, Default)]
struct Connection {
    table: Table,
    /// Generation of the image the table was loaded from.
    generation: Option<u64>,
    held: Option<Held>,
}

/// An in-memory key-value store.
///
/// This store keeps all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Scratch databases that don't need persistence
///
/// Each `MemoryStore` value is one connection. [`MemoryStore::connect`]
/// opens another connection to the same entries. Connections exclude each
/// other through a real shared/exclusive lock, and each keeps its own lock
/// depth and transaction snapshot. Writes become visible to other
/// connections when the outermost exclusive lock is released, so a
/// cancelled transaction is never seen outside its connection.
///
/// # Example
///
/// ```rust
/// use dirdb_storage::{KvStore, LockMode, MemoryStore, PutMode};
///
/// let store = MemoryStore::new();
/// store.lock(LockMode::Exclusive).unwrap();
/// store.put(b"DN=CN=A", b"packed", PutMode::Insert).unwrap();
/// assert_eq!(store.get(b"DN=CN=A").unwrap(), Some(b"packed".to_vec()));
/// store.unlock().unwrap();
///
/// let other = store.connect();
/// other.lock(LockMode::Shared).unwrap();
/// assert_eq!(other.get(b"DN=CN=A").unwrap(), Some(b"packed".to_vec()));
/// other.unlock().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    shared: Arc<SharedMemory>,
    conn: Mutex<Connection>,
    read_only: bool,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing entries.
    ///
    /// Useful for testing corruption handling.
    #[must_use]
    pub fn with_entries(entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        let shared = SharedMemory {
            gate: Arc::default(),
            image: Mutex::new(Image {
                generation: 0,
                entries,
            }),
        };
        Self {
            shared: Arc::new(shared),
            conn: Mutex::default(),
            read_only: false,
        }
    }

    /// Opens another connection to the same entries.
    ///
    /// The new connection starts unlocked and outside any transaction.
    #[must_use]
    pub fn connect(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            conn: Mutex::default(),
            read_only: self.read_only,
        }
    }

    /// Makes the store reject writes.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns the number of committed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.image.lock().entries.len()
    }

    /// Returns true if nothing is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn acquire(&self, conn: &mut Connection, mode: LockMode) {
        let gate = &self.shared.gate;
        conn.held = Some(match mode {
            LockMode::Shared => Held::Shared {
                _guard: gate.read_arc(),
            },
            LockMode::Exclusive => Held::Exclusive {
                _guard: gate.write_arc(),
            },
        });
        let image = self.shared.image.lock();
        if conn.generation != Some(image.generation) {
            conn.table.replace_entries(image.entries.clone());
            conn.generation = Some(image.generation);
        }
    }

    fn release(&self, conn: &mut Connection, persist: bool) {
        if persist {
            let mut image = self.shared.image.lock();
            image.generation = image.generation.wrapping_add(1);
            image.entries = conn.table.entries().clone();
            conn.generation = Some(image.generation);
            conn.table.mark_clean();
        }
        conn.held = None;
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.conn.lock().table.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8], mode: PutMode) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.conn.lock().table.put(key, value, mode)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.conn.lock().table.delete(key)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> StorageResult<()> {
        let entries = self.conn.lock().table.snapshot_entries()?;
        for (key, value) in &entries {
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn lock(&self, mode: LockMode) -> StorageResult<()> {
        if self.read_only && mode == LockMode::Exclusive {
            return Err(StorageError::ReadOnly);
        }
        let mut conn = self.conn.lock();
        if let LockAction::Acquire(mode) = conn.table.enter(mode)? {
            self.acquire(&mut conn, mode);
        }
        Ok(())
    }

    fn unlock(&self) -> StorageResult<()> {
        let mut conn = self.conn.lock();
        if let LockAction::Release { persist } = conn.table.leave()? {
            self.release(&mut conn, persist);
        }
        Ok(())
    }

    fn transaction_start(&self) -> StorageResult<()> {
        self.lock(LockMode::Exclusive)?;
        self.conn.lock().table.begin();
        Ok(())
    }

    fn transaction_commit(&self) -> StorageResult<()> {
        self.conn.lock().table.commit()?;
        self.unlock()
    }

    fn transaction_cancel(&self) -> StorageResult<()> {
        let levels = self.conn.lock().table.cancel()?;
        for _ in 0..levels {
            self.unlock()?;
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn locked_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.lock(LockMode::Exclusive).unwrap();
        store
    }

    #[test]
    fn memory_new_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
    }

    #[test]
    fn memory_insert_then_get() {
        let store = locked_store();
        store.put(b"k", b"v", PutMode::Insert).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get(b"missing").unwrap(), None);
    }

    #[test]
    fn memory_insert_existing_fails() {
        let store = locked_store();
        store.put(b"k", b"v", PutMode::Insert).unwrap();
        let result = store.put(b"k", b"w", PutMode::Insert);
        assert!(matches!(result, Err(StorageError::KeyExists)));
    }

    #[test]
    fn memory_modify_missing_fails() {
        let store = locked_store();
        let result = store.put(b"k", b"v", PutMode::Modify);
        assert!(matches!(result, Err(StorageError::KeyNotFound)));
    }

    #[test]
    fn memory_delete_missing_fails() {
        let store = locked_store();
        assert!(matches!(store.delete(b"k"), Err(StorageError::KeyNotFound)));
    }

    #[test]
    fn memory_get_requires_lock() {
        let store = MemoryStore::new();
        assert!(matches!(store.get(b"k"), Err(StorageError::NotLocked(_))));
    }

    #[test]
    fn memory_traverse_is_ordered() {
        let store = locked_store();
        for key in [&b"c"[..], b"a", b"b"] {
            store.put(key, b"", PutMode::Insert).unwrap();
        }
        let mut seen = Vec::new();
        store
            .traverse(&mut |key, _| {
                seen.push(key.to_vec());
                true
            })
            .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn memory_traverse_stops_early() {
        let store = locked_store();
        store.put(b"a", b"", PutMode::Insert).unwrap();
        store.put(b"b", b"", PutMode::Insert).unwrap();
        let mut count = 0;
        store
            .traverse(&mut |_, _| {
                count += 1;
                false
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn memory_keys_with_prefix() {
        let store = locked_store();
        store.put(b"DN=@INDEX:CN:A", b"", PutMode::Insert).unwrap();
        store.put(b"DN=CN=A", b"", PutMode::Insert).unwrap();
        let keys = store.keys_with_prefix(b"DN=@INDEX:").unwrap();
        assert_eq!(keys, vec![b"DN=@INDEX:CN:A".to_vec()]);
    }

    #[test]
    fn memory_transaction_cancel_discards_writes() {
        let store = MemoryStore::new();
        store.transaction_start().unwrap();
        store.put(b"k", b"v", PutMode::Insert).unwrap();
        store.transaction_cancel().unwrap();

        store.lock(LockMode::Shared).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.unlock().unwrap();
    }

    #[test]
    fn memory_transaction_commit_keeps_writes() {
        let store = MemoryStore::new();
        store.transaction_start().unwrap();
        store.transaction_start().unwrap();
        store.put(b"k", b"v", PutMode::Insert).unwrap();
        store.transaction_commit().unwrap();
        store.transaction_commit().unwrap();

        store.lock(LockMode::Shared).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        store.unlock().unwrap();
    }

    #[test]
    fn memory_read_only_rejects_exclusive_lock() {
        let store = MemoryStore::new().read_only();
        assert!(matches!(
            store.lock(LockMode::Exclusive),
            Err(StorageError::ReadOnly)
        ));
        store.lock(LockMode::Shared).unwrap();
        store.unlock().unwrap();
    }

    #[test]
    fn memory_connections_share_committed_entries() {
        let first = MemoryStore::new();
        let second = first.connect();
        first.lock(LockMode::Exclusive).unwrap();
        first.put(b"k", b"v", PutMode::Insert).unwrap();
        first.unlock().unwrap();

        second.lock(LockMode::Shared).unwrap();
        assert_eq!(second.get(b"k").unwrap(), Some(b"v".to_vec()));
        second.unlock().unwrap();
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn memory_exclusive_lock_excludes_other_connections() {
        let first = MemoryStore::new();
        let second = first.connect();
        first.transaction_start().unwrap();
        first.put(b"k", b"v", PutMode::Insert).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let reader = std::thread::spawn(move || {
            second.lock(LockMode::Shared).unwrap();
            tx.send(second.get(b"k").unwrap()).unwrap();
            second.unlock().unwrap();
            second
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        first.transaction_commit().unwrap();
        assert_eq!(rx.recv().unwrap(), Some(b"v".to_vec()));
        let second = reader.join().unwrap();
        assert!(matches!(second.transaction_commit(), Err(StorageError::NoTransaction)));
    }

    #[test]
    fn memory_cancel_only_touches_its_own_connection() {
        let first = MemoryStore::new();
        let second = first.connect();
        first.lock(LockMode::Exclusive).unwrap();
        first.put(b"kept", b"1", PutMode::Insert).unwrap();
        first.unlock().unwrap();

        second.transaction_start().unwrap();
        second.put(b"dropped", b"2", PutMode::Insert).unwrap();
        second.transaction_cancel().unwrap();
        assert!(matches!(second.transaction_cancel(), Err(StorageError::NoTransaction)));

        first.transaction_start().unwrap();
        assert_eq!(first.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(first.get(b"dropped").unwrap(), None);
        first.transaction_commit().unwrap();
        assert_eq!(first.len(), 1);
    }
}
