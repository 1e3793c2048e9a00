//! File-based key-value store shared between processes.
//!
//! The store keeps its table in memory and writes a complete image when the
//! outermost exclusive lock is released. Cross-process exclusion uses an
//! advisory lock on a sibling `<path>.lock` file:
//!
//! ```text
//! <path>        # store image, replaced atomically on every write-back
//! <path>.lock   # advisory lock, shared for readers, exclusive for writers
//! <path>.tmp    # image being written
//! ```
//!
//! Image layout (all integers little-endian):
//!
//! ```text
//! magic "DIRDBKV1" | generation u64 | count u32 |
//!     { key_len u32 | key | value_len u32 | value } * count | crc32 u32
//! ```

use crate::backend::{KvStore, LockMode, PutMode};
use crate::checksum::crc32;
use crate::error::{StorageError, StorageResult};
use crate::table::{LockAction, Table};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 8] = b"DIRDBKV1";
const HEADER_LEN: usize = 8 + 8 + 4;

#[derive(Debug)]
struct FileState {
    table: Table,
    /// Generation of the image the table was loaded from; `None` before the
    /// first load.
    generation: Option<u64>,
}

/// A persistent key-value store.
///
/// Data survives process restarts and may be shared by several processes;
/// readers and writers are serialized by the whole-database lock.
///
/// # Durability
///
/// Writes are buffered in memory until the outermost exclusive lock is
/// released (outside a transaction). The image is then written to a
/// temporary file, synced and renamed over the store file.
///
/// # Example
///
/// ```no_run
/// use dirdb_storage::{FileStore, KvStore, LockMode, PutMode};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("directory.db")).unwrap();
/// store.lock(LockMode::Exclusive).unwrap();
/// store.put(b"DN=CN=A", b"packed", PutMode::Replace).unwrap();
/// store.unlock().unwrap(); // image written here
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_file: File,
    state: Mutex<FileState>,
    read_only: bool,
}

impl FileStore {
    /// Opens or creates a writable store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file or an empty image cannot be created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;

        let store = Self {
            path: path.to_path_buf(),
            lock_file,
            state: Mutex::new(FileState {
                table: Table::default(),
                generation: None,
            }),
            read_only: false,
        };

        if !path.exists() {
            store.lock_file.lock_exclusive()?;
            let created = if path.exists() {
                Ok(())
            } else {
                debug!(path = %path.display(), "creating empty store");
                store.write_image(&BTreeMap::new(), 0)
            };
            FileExt::unlock(&store.lock_file)?;
            created?;
        }

        Ok(store)
    }

    /// Opens or creates a store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the store cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens an existing store that rejects writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store file does not exist.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("store does not exist: {}", path.display()),
            )));
        }
        let lock_file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))
        {
            Ok(file) => file,
            Err(_) => File::open(lock_path(path))?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
            state: Mutex::new(FileState {
                table: Table::default(),
                generation: None,
            }),
            read_only: true,
        })
    }

    /// Returns the path to the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self, state: &mut FileState, mode: LockMode) -> StorageResult<()> {
        match mode {
            LockMode::Shared => FileExt::lock_shared(&self.lock_file)?,
            LockMode::Exclusive => FileExt::lock_exclusive(&self.lock_file)?,
        }
        if let Err(err) = self.reload_if_changed(state) {
            if let Err(unlock) = FileExt::unlock(&self.lock_file) {
                warn!(error = %unlock, "failed to release store lock after a failed load");
            }
            return Err(err);
        }
        Ok(())
    }

    fn reload_if_changed(&self, state: &mut FileState) -> StorageResult<()> {
        let mut file = File::open(&self.path)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| StorageError::corrupted("store image shorter than its header"))?;
        if &header[..8] != MAGIC {
            return Err(StorageError::corrupted("bad store magic"));
        }
        let generation = read_u64(&header[8..16]);
        if state.generation == Some(generation) {
            return Ok(());
        }

        let mut data = header.to_vec();
        file.read_to_end(&mut data)?;
        let entries = decode_image(&data)?;
        debug!(generation, entries = entries.len(), "reloaded store image");
        state.table.replace_entries(entries);
        state.generation = Some(generation);
        Ok(())
    }

    fn release(&self, state: &mut FileState, persist: bool) -> StorageResult<()> {
        let written = if persist {
            let generation = state.generation.map_or(1, |g| g.wrapping_add(1));
            let result = self.write_image(state.table.entries(), generation);
            if result.is_ok() {
                state.generation = Some(generation);
                state.table.mark_clean();
            }
            result
        } else {
            Ok(())
        };
        FileExt::unlock(&self.lock_file)?;
        written
    }

    /// Writes a complete image atomically: temp file, sync, rename.
    fn write_image(&self, entries: &BTreeMap<Vec<u8>, Vec<u8>>, generation: u64) -> StorageResult<()> {
        let temp_path = self.path.with_extension("tmp");
        let data = encode_image(entries, generation);

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.state.lock().table.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8], mode: PutMode) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.state.lock().table.put(key, value, mode)
    }

    fn delete(&self, key: &[u8]) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        self.state.lock().table.delete(key)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> bool) -> StorageResult<()> {
        let entries = self.state.lock().table.snapshot_entries()?;
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
        let mut state = self.state.lock();
        if let LockAction::Acquire(mode) = state.table.enter(mode)? {
            if let Err(err) = self.acquire(&mut state, mode) {
                if let Err(leave) = state.table.leave() {
                    warn!(error = %leave, "failed to reset lock depth after a failed acquire");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn unlock(&self) -> StorageResult<()> {
        let mut state = self.state.lock();
        match state.table.leave()? {
            LockAction::Release { persist } => self.release(&mut state, persist),
            _ => Ok(()),
        }
    }

    fn transaction_start(&self) -> StorageResult<()> {
        self.lock(LockMode::Exclusive)?;
        self.state.lock().table.begin();
        Ok(())
    }

    fn transaction_commit(&self) -> StorageResult<()> {
        self.state.lock().table.commit()?;
        self.unlock()
    }

    fn transaction_cancel(&self) -> StorageResult<()> {
        let levels = self.state.lock().table.cancel()?;
        for _ in 0..levels {
            self.unlock()?;
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn encode_image(entries: &BTreeMap<Vec<u8>, Vec<u8>>, generation: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&generation.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (key, value) in entries {
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(value);
    }
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

fn decode_image(data: &[u8]) -> StorageResult<BTreeMap<Vec<u8>, Vec<u8>>> {
    if data.len() < HEADER_LEN + 4 {
        return Err(StorageError::corrupted("store image truncated"));
    }
    let (body, trailer) = data.split_at(data.len() - 4);
    if crc32(body) != read_u32(trailer) {
        return Err(StorageError::corrupted("store image checksum mismatch"));
    }

    let count = read_u32(&body[16..20]);
    let mut pos = HEADER_LEN;
    let take = |pos: &mut usize| -> StorageResult<Vec<u8>> {
        if body.len() < *pos + 4 {
            return Err(StorageError::corrupted("entry length overruns image"));
        }
        let len = read_u32(&body[*pos..]) as usize;
        *pos += 4;
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= body.len())
            .ok_or_else(|| StorageError::corrupted("entry data overruns image"))?;
        let bytes = body[*pos..end].to_vec();
        *pos = end;
        Ok(bytes)
    };

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let key = take(&mut pos)?;
        let value = take(&mut pos)?;
        entries.insert(key, value);
    }
    if pos != body.len() {
        return Err(StorageError::corrupted("trailing bytes after last entry"));
    }
    Ok(entries)
}
