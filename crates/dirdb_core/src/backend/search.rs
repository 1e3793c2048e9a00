//! Search over stored records.

use super::cache::BackendCache;
use super::index;
use super::key::{self, CONTROL_PREFIX, RECORD_PREFIX};
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::Message;
use crate::pack::unpack_message;
use crate::request::{Scope, SearchRequest};
use crate::schema::Schema;
use crate::value::Value;
use dirdb_storage::KvStore;

/// Fetches the record stored at `dn`. The caller holds a lock.
pub(crate) fn fetch(store: &dyn KvStore, schema: &Schema, dn: &Dn) -> DirResult<Option<Message>> {
    fetch_key(store, &key::record_key(schema, dn))
}

fn fetch_key(store: &dyn KvStore, record_key: &[u8]) -> DirResult<Option<Message>> {
    match store.get(record_key)? {
        Some(packed) => Ok(Some(unpack_message(&packed)?)),
        None => Ok(None),
    }
}

/// Runs `req` against the store. The caller holds a lock.
pub(crate) fn search(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    req: &SearchRequest,
) -> DirResult<Vec<Message>> {
    let base_record = if req.base.is_root() {
        None
    } else {
        let record = fetch(store, schema, &req.base)?;
        if record.is_none() {
            return Err(DirError::not_found(format!(
                "base DN '{}' does not exist",
                req.base
            )));
        }
        record
    };

    let hits = match req.scope {
        Scope::Base => base_record
            .filter(|msg| req.filter.matches(schema, msg))
            .into_iter()
            .collect(),
        Scope::OneLevel | Scope::Subtree => scan(store, schema, cache, req)?,
    };

    Ok(hits.into_iter().map(|msg| pull_attrs(schema, msg, req)).collect())
}

fn in_scope(schema: &Schema, req: &SearchRequest, msg: &Message) -> bool {
    req.scope.contains(schema, &req.base, &msg.dn) && req.filter.matches(schema, msg)
}

fn scan(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    req: &SearchRequest,
) -> DirResult<Vec<Message>> {
    if let Some(target) = req.filter.dn_equality() {
        let dn = parse_dn_value(target)?;
        return Ok(fetch(store, schema, &dn)?
            .filter(|msg| in_scope(schema, req, msg))
            .into_iter()
            .collect());
    }

    if let Some(keys) = index::candidates(store, schema, cache, &req.filter) {
        tracing::debug!(candidates = keys.len(), filter = %req.filter, "indexed search");
        let mut hits = Vec::new();
        for record_key in &keys {
            // Index entries can outlive a record after a failed compensation.
            if let Some(msg) = fetch_key(store, record_key)? {
                if in_scope(schema, req, &msg) {
                    hits.push(msg);
                }
            }
        }
        return Ok(hits);
    }

    let mut hits = Vec::new();
    let mut failure = None;
    store.traverse(&mut |record_key, packed| {
        if !record_key.starts_with(RECORD_PREFIX) || record_key.starts_with(CONTROL_PREFIX) {
            return true;
        }
        match unpack_message(packed) {
            Ok(msg) => {
                if in_scope(schema, req, &msg) {
                    hits.push(msg);
                }
                true
            }
            Err(err) => {
                failure = Some(err);
                false
            }
        }
    })?;
    match failure {
        Some(err) => Err(err),
        None => Ok(hits),
    }
}

fn parse_dn_value(value: &Value) -> DirResult<Dn> {
    let text = value
        .as_str()
        .ok_or_else(|| DirError::syntax("dn filter value is not valid UTF-8"))?;
    Dn::parse(text)
}

/// Trims `msg` to the attributes `req` asks for.
///
/// With no list, or a list containing `*`, every attribute not flagged
/// hidden is returned along with any named explicitly. `distinguishedName`
/// is synthesised only when named.
pub(crate) fn pull_attrs(schema: &Schema, mut msg: Message, req: &SearchRequest) -> Message {
    if req.wants_all() {
        msg.elements
            .retain(|e| !schema.is_hidden(&e.name) || req.explicitly_requests(&e.name));
    } else if let Some(attrs) = &req.attrs {
        msg.retain_attributes(attrs);
    }
    if req.explicitly_requests("distinguishedName") && !msg.has_attribute("distinguishedName") {
        let dn = msg.dn.linearize();
        msg.add_string("distinguishedName", &dn);
    }
    msg
}
