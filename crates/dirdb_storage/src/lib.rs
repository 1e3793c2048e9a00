//! # dirdb Storage
//!
//! Embedded ordered key-value store for dirdb.
//!
//! This crate provides the lowest-level storage abstraction for dirdb.
//! Stores are **opaque ordered maps** from byte keys to byte values. They do
//! not interpret records, DNs, or index entries.
//!
//! ## Design Principles
//!
//! - Single-key get/put/delete plus an ordered traversal
//! - One whole-database lock, shared for reads and exclusive for writes
//! - Multi-key atomicity through transaction brackets held under the
//!   exclusive lock
//! - Must be `Send + Sync`
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and scratch databases
//! - [`FileStore`] - For persistent storage shared between processes
//!
//! ## Example
//!
//! ```rust
//! use dirdb_storage::{KvStore, LockMode, MemoryStore, PutMode};
//!
//! let store = MemoryStore::new();
//! store.lock(LockMode::Exclusive).unwrap();
//! store.put(b"hello", b"world", PutMode::Insert).unwrap();
//! assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! store.unlock().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod checksum;
mod error;
mod file;
mod memory;
mod table;

pub use backend::{KvStore, LockMode, PutMode};
pub use checksum::crc32;
pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
