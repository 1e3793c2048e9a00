//! Attribute indexes.
//!
//! For each attribute named in `@INDEXLIST`, every value is mapped to an
//! index record whose `@IDX` values are the folded DNs holding it. Searches
//! whose filter is built from equality tests on indexed attributes read the
//! candidate DNs from these records instead of scanning every record.

use super::cache::BackendCache;
use super::key::{self, IDX_ATTR, INDEX_KEY_PREFIX};
use crate::dn::Dn;
use crate::error::DirResult;
use crate::filter::Filter;
use crate::message::Message;
use crate::pack::{pack_message, unpack_message};
use crate::schema::Schema;
use crate::value::Value;
use dirdb_storage::{KvStore, PutMode};
use std::collections::BTreeSet;

fn load_list(store: &dyn KvStore, index_key: &[u8]) -> DirResult<Option<Message>> {
    match store.get(index_key)? {
        Some(packed) => Ok(Some(unpack_message(&packed)?)),
        None => Ok(None),
    }
}

/// Adds `entry` under `attr=value`. Adding an entry twice is a no-op.
pub(crate) fn add_value(
    store: &dyn KvStore,
    schema: &Schema,
    entry: &Value,
    attr: &str,
    value: &Value,
) -> DirResult<()> {
    let index_dn = key::index_dn(schema, attr, value)?;
    let index_key = key::record_key(schema, &index_dn);
    let mut list = load_list(store, &index_key)?.unwrap_or_else(|| Message::new(index_dn));
    let present = list
        .element(IDX_ATTR)
        .is_some_and(|e| e.values.iter().any(|v| v == entry));
    if present {
        return Ok(());
    }
    list.add_value(IDX_ATTR, entry.clone());
    store.put(&index_key, &pack_message(&list), PutMode::Replace)?;
    Ok(())
}

/// Removes `entry` from `attr=value`, deleting the index record when its
/// list becomes empty.
pub(crate) fn remove_value(
    store: &dyn KvStore,
    schema: &Schema,
    entry: &Value,
    attr: &str,
    value: &Value,
) -> DirResult<()> {
    let index_key = key::index_key(schema, attr, value)?;
    let Some(mut list) = load_list(store, &index_key)? else {
        return Ok(());
    };
    let remaining = match list.element_mut(IDX_ATTR) {
        Some(element) => {
            element.values.retain(|v| v != entry);
            element.values.len()
        }
        None => 0,
    };
    if remaining == 0 {
        store.delete(&index_key)?;
    } else {
        store.put(&index_key, &pack_message(&list), PutMode::Replace)?;
    }
    Ok(())
}

/// Indexes every indexed attribute of `msg`.
pub(crate) fn add_record(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    msg: &Message,
) -> DirResult<()> {
    if msg.dn.is_special() {
        return Ok(());
    }
    let entry = key::index_entry(schema, &msg.dn);
    for element in msg.elements.iter().filter(|e| cache.is_indexed(&e.name)) {
        for value in &element.values {
            add_value(store, schema, &entry, &element.name, value)?;
        }
    }
    Ok(())
}

/// Retracts every index entry of `msg`.
pub(crate) fn remove_record(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    msg: &Message,
) -> DirResult<()> {
    if msg.dn.is_special() {
        return Ok(());
    }
    let entry = key::index_entry(schema, &msg.dn);
    for element in msg.elements.iter().filter(|e| cache.is_indexed(&e.name)) {
        for value in &element.values {
            remove_value(store, schema, &entry, &element.name, value)?;
        }
    }
    Ok(())
}

/// Drops every index record and rebuilds them from the stored records.
pub(crate) fn reindex(store: &dyn KvStore, schema: &Schema, cache: &BackendCache) -> DirResult<()> {
    let stale = store.keys_with_prefix(INDEX_KEY_PREFIX)?;
    for key in &stale {
        store.delete(key)?;
    }

    let mut records = Vec::new();
    store.traverse(&mut |key, value| {
        if key.starts_with(key::RECORD_PREFIX) && !key.starts_with(key::CONTROL_PREFIX) {
            records.push(value.to_vec());
        }
        true
    })?;
    for packed in &records {
        let msg = unpack_message(packed)?;
        add_record(store, schema, cache, &msg)?;
    }
    tracing::debug!(dropped = stale.len(), records = records.len(), "rebuilt indexes");
    Ok(())
}

/// Record keys of the DNs listed under `attr=value`.
fn lookup(store: &dyn KvStore, schema: &Schema, attr: &str, value: &Value) -> Option<BTreeSet<Vec<u8>>> {
    let index_key = key::index_key(schema, attr, value).ok()?;
    let list = match load_list(store, &index_key) {
        Ok(list) => list,
        Err(err) => {
            tracing::warn!(error = %err, attr, "unreadable index record, falling back to a full scan");
            return None;
        }
    };
    Some(
        list.and_then(|l| l.element(IDX_ATTR).cloned())
            .map(|e| {
                e.values
                    .iter()
                    .map(|v| {
                        let mut record_key = key::RECORD_PREFIX.to_vec();
                        record_key.extend_from_slice(v.as_bytes());
                        record_key
                    })
                    .collect()
            })
            .unwrap_or_default(),
    )
}

/// Returns the record keys that may match `filter`, or `None` when the
/// filter cannot be answered from the indexes.
pub(crate) fn candidates(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    filter: &Filter,
) -> Option<BTreeSet<Vec<u8>>> {
    match filter {
        Filter::Equality { attr, value } if cache.is_indexed(attr) => {
            let mut keys = lookup(store, schema, attr, value)?;
            if attr.eq_ignore_ascii_case("objectClass") {
                for class in schema.subclass_closure(&value.to_string_lossy()) {
                    keys.extend(lookup(store, schema, attr, &Value::from(class))?);
                }
            }
            Some(keys)
        }
        Filter::And(children) => {
            let mut result: Option<BTreeSet<Vec<u8>>> = None;
            for child in children {
                if let Some(keys) = candidates(store, schema, cache, child) {
                    result = Some(match result {
                        Some(acc) => acc.intersection(&keys).cloned().collect(),
                        None => keys,
                    });
                }
            }
            result
        }
        Filter::Or(children) => {
            let mut acc = BTreeSet::new();
            for child in children {
                acc.extend(candidates(store, schema, cache, child)?);
            }
            Some(acc)
        }
        _ => None,
    }
}

/// Returns true if `dn` is a control record whose change needs a reindex.
pub(crate) fn needs_reindex(dn: &Dn) -> bool {
    key::is_schema_control(dn)
}
