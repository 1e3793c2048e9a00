//! Cached control records.
//!
//! The cache is keyed by the stored sequence number: when `@BASEINFO`
//! reports a number other than the one the cache was loaded at, another
//! handle has written and the control records are read again.

use super::key::{self, IDXATTR};
use crate::error::DirResult;
use crate::message::Message;
use crate::pack::unpack_message;
use crate::schema::{attribute_flags, SchemaHandle};
use dirdb_storage::KvStore;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct BackendCache {
    loaded_sequence: Option<u64>,
    indexed: Vec<String>,
}

/// Reads a control record. The caller holds a lock.
pub(crate) fn read_control(store: &dyn KvStore, name: &str) -> DirResult<Option<Message>> {
    match store.get(&key::control_key(name))? {
        Some(packed) => Ok(Some(unpack_message(&packed)?)),
        None => Ok(None),
    }
}

/// Returns the stored sequence number, or 0 before `@BASEINFO` exists.
pub(crate) fn stored_sequence(store: &dyn KvStore) -> DirResult<u64> {
    Ok(read_control(store, key::BASEINFO)?
        .and_then(|m| m.get_u64("sequenceNumber"))
        .unwrap_or(0))
}

impl BackendCache {
    pub(crate) fn invalidate(&mut self) {
        self.loaded_sequence = None;
    }

    /// Records that a local write moved the sequence to `sequence` without
    /// touching any control record.
    pub(crate) fn advance(&mut self, sequence: u64) {
        if self.loaded_sequence.is_some() {
            self.loaded_sequence = Some(sequence);
        }
    }

    pub(crate) fn is_indexed(&self, attr: &str) -> bool {
        self.indexed.iter().any(|a| a.eq_ignore_ascii_case(attr))
    }

    /// Reloads the control records if the store moved on. The caller holds
    /// a lock and no schema guard.
    pub(crate) fn load(&mut self, store: &dyn KvStore, schema: &SchemaHandle) -> DirResult<()> {
        let sequence = stored_sequence(store)?;
        if self.loaded_sequence == Some(sequence) {
            return Ok(());
        }

        let attributes = match read_control(store, key::ATTRIBUTES)? {
            Some(record) => {
                let pairs: Vec<(String, String)> = record
                    .elements
                    .iter()
                    .flat_map(|e| {
                        e.values
                            .iter()
                            .map(move |v| (e.name.clone(), v.to_string_lossy()))
                    })
                    .collect();
                attribute_flags(pairs.iter().map(|(n, f)| (n.as_str(), f.as_str())))?
            }
            None => HashMap::new(),
        };

        let subclasses: HashMap<String, Vec<String>> = read_control(store, key::SUBCLASSES)?
            .map(|record| {
                record
                    .elements
                    .into_iter()
                    .map(|e| {
                        let subs = e.values.iter().map(|v| v.to_string_lossy()).collect();
                        (e.name, subs)
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.indexed = read_control(store, key::INDEXLIST)?
            .and_then(|record| {
                record
                    .element(IDXATTR)
                    .map(|e| e.values.iter().map(|v| v.to_string_lossy()).collect())
            })
            .unwrap_or_default();

        {
            let mut guard = schema.write();
            guard.set_record_attributes(attributes);
            guard.set_record_subclasses(subclasses);
        }
        tracing::debug!(sequence, indexed = self.indexed.len(), "loaded control records");
        self.loaded_sequence = Some(sequence);
        Ok(())
    }
}
