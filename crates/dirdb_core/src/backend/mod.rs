//! The key-value storage backend.
//!
//! [`KvBackend`] terminates every module chain. It maps records onto a
//! [`KvStore`], keeps attribute indexes current, and maintains the
//! `@BASEINFO` sequence number.
//!
//! # Locking
//!
//! Every search holds the whole-database lock shared and every mutation
//! holds it exclusive for the length of the call. `lock(name)` and the
//! transaction bracket hold the exclusive lock across calls; the store's
//! lock is re-entrant so the per-call locks nest inside them.
//!
//! # Atomicity
//!
//! A mutation touches the record and then its index records one key at a
//! time. If indexing fails the record write is undone with a compensating
//! delete, and a rename that cannot remove the old record removes the new
//! one. These are best effort: callers needing all-or-nothing behaviour use
//! a transaction bracket.

mod cache;
mod index;
pub mod key;
mod search;

use crate::config::ConnectOptions;
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::{Element, Message, ModFlag};
use crate::module::{Module, Next};
use crate::pack::pack_message;
use crate::request::{SearchRequest, SequenceKind};
use crate::schema::{attribute_flags, Schema, SchemaHandle};
use crate::timestring::{now_timestring, parse_timestring};
use cache::BackendCache;
use dirdb_storage::{FileStore, KvStore, LockMode, MemoryStore, PutMode, StorageError};
use std::path::Path;
use std::sync::Arc;

/// Holds one level of the whole-database lock until released or dropped.
struct DbLock<'a> {
    store: &'a dyn KvStore,
    held: bool,
}

impl<'a> DbLock<'a> {
    fn acquire(store: &'a dyn KvStore, mode: LockMode) -> DirResult<Self> {
        store.lock(mode)?;
        Ok(Self { store, held: true })
    }

    /// Releases the lock, reporting a failure to persist.
    fn release(mut self) -> DirResult<()> {
        self.held = false;
        self.store.unlock()?;
        Ok(())
    }
}

impl Drop for DbLock<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(err) = self.store.unlock() {
                tracing::warn!(error = %err, "failed to release database lock");
            }
        }
    }
}

/// The storage backend module.
///
/// # Example
///
/// ```
/// use dirdb_core::{ConnectOptions, DirContext, Dn, Message, Scope};
///
/// let mut ctx = DirContext::connect("mem://backend-doc", ConnectOptions::new().modules(Vec::<String>::new())).unwrap();
/// let mut msg = Message::new(Dn::parse("cn=alice,dc=test").unwrap());
/// msg.add_string("cn", "alice");
/// ctx.add(msg).unwrap();
/// let hits = ctx.search(&Dn::root(), Scope::Subtree, Some("(cn=ALICE)"), None).unwrap();
/// assert_eq!(hits.len(), 1);
/// ```
pub struct KvBackend {
    store: Arc<dyn KvStore>,
    cache: BackendCache,
}

impl std::fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBackend")
            .field("read_only", &self.store.is_read_only())
            .field("cache", &self.cache)
            .finish()
    }
}

impl KvBackend {
    /// Wraps an existing store.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            cache: BackendCache::default(),
        }
    }

    /// Creates a backend over a private in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Opens a file-backed store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is missing and either `read_only` is
    /// set or `create_if_missing` is not, or a storage error if the file
    /// cannot be opened.
    pub fn open(path: &Path, options: &ConnectOptions) -> DirResult<Self> {
        if !path.exists() && (options.read_only || !options.create_if_missing) {
            return Err(DirError::not_found(format!(
                "database '{}' does not exist",
                path.display()
            )));
        }
        let store: Arc<dyn KvStore> = if options.read_only {
            Arc::new(FileStore::open_read_only(path)?)
        } else {
            Arc::new(FileStore::open_with_create_dirs(path)?)
        };
        Ok(Self::new(store))
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }
}

/// Rejects control records the backend cannot interpret.
fn check_special(msg: &Message) -> DirResult<()> {
    if msg.dn.is_special_named(key::ATTRIBUTES) {
        let pairs: Vec<(String, String)> = msg
            .elements
            .iter()
            .flat_map(|e| e.values.iter().map(move |v| (e.name.clone(), v.to_string_lossy())))
            .collect();
        attribute_flags(pairs.iter().map(|(n, f)| (n.as_str(), f.as_str())))?;
    }
    Ok(())
}

fn check_unique_values(schema: &Schema, element: &Element) -> DirResult<()> {
    if element.has_duplicate_values(schema) {
        return Err(DirError::conflict(format!(
            "attribute '{}' has duplicate values",
            element.name
        )));
    }
    Ok(())
}

/// Writes `msg` and indexes it, deleting the record again if indexing
/// fails.
fn store_record(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    msg: &Message,
    mode: PutMode,
) -> DirResult<()> {
    let record_key = key::record_key(schema, &msg.dn);
    store
        .put(&record_key, &pack_message(msg), mode)
        .map_err(|err| match err {
            StorageError::KeyExists => DirError::conflict(format!("Entry {} already exists", msg.dn)),
            other => other.into(),
        })?;
    if let Err(err) = index::add_record(store, schema, cache, msg) {
        if let Err(undo) = store.delete(&record_key) {
            tracing::warn!(dn = %msg.dn, error = %undo, "failed to remove record after index failure");
        }
        return Err(err);
    }
    Ok(())
}

fn delete_record(store: &dyn KvStore, schema: &Schema, cache: &BackendCache, msg: &Message) -> DirResult<()> {
    store.delete(&key::record_key(schema, &msg.dn))?;
    index::remove_record(store, schema, cache, msg)
}

fn missing_record(dn: &Dn) -> DirError {
    DirError::not_found(format!("no such record '{dn}'"))
}

/// Bumps the sequence number and stamps `whenChanged`.
fn increase_sequence(store: &dyn KvStore, cache: &mut BackendCache) -> DirResult<u64> {
    let mut baseinfo = cache::read_control(store, key::BASEINFO)?
        .unwrap_or_else(|| Message::new(Dn::special(key::BASEINFO)));
    let sequence = baseinfo.get_u64("sequenceNumber").unwrap_or(0) + 1;
    baseinfo.remove("sequenceNumber");
    baseinfo.add_string("sequenceNumber", &sequence.to_string());
    baseinfo.remove("whenChanged");
    baseinfo.add_string("whenChanged", &now_timestring());
    store.put(&key::control_key(key::BASEINFO), &pack_message(&baseinfo), PutMode::Replace)?;
    cache.advance(sequence);
    Ok(sequence)
}

/// Follow-up work after `dn` changed: control records that shape indexing
/// force a reindex, and anything but `@BASEINFO` bumps the sequence.
fn modified(store: &dyn KvStore, cache: &mut BackendCache, handle: &SchemaHandle, dn: &Dn) -> DirResult<()> {
    if index::needs_reindex(dn) {
        cache.invalidate();
        cache.load(store, handle)?;
        let schema = handle.read();
        index::reindex(store, &schema, cache)?;
    }
    if !dn.is_special_named(key::BASEINFO) {
        let sequence = increase_sequence(store, cache)?;
        tracing::debug!(%dn, sequence, "record modified");
    }
    Ok(())
}

/// Applies modify deltas to `record` in place, keeping indexes current
/// value by value.
fn apply_deltas(
    store: &dyn KvStore,
    schema: &Schema,
    cache: &BackendCache,
    record: &mut Message,
    deltas: &[Element],
) -> DirResult<()> {
    let entry = key::index_entry(schema, &record.dn);
    let special = record.dn.is_special();

    for delta in deltas {
        let track = !special && cache.is_indexed(&delta.name);
        match delta.flags {
            ModFlag::Add => {
                check_unique_values(schema, delta)?;
                if delta.values.iter().any(|v| record.has_value(schema, &delta.name, v)) {
                    return Err(DirError::conflict(format!(
                        "Type or value exists: {}",
                        delta.name
                    )));
                }
                match record.element_mut(&delta.name) {
                    Some(element) => element.values.extend(delta.values.iter().cloned()),
                    None => record.elements.push(Element::with_values(
                        delta.name.clone(),
                        ModFlag::None,
                        delta.values.clone(),
                    )),
                }
                if track {
                    for value in &delta.values {
                        index::add_value(store, schema, &entry, &delta.name, value)?;
                    }
                }
            }
            ModFlag::Replace => {
                check_unique_values(schema, delta)?;
                if let Some(old) = record.element(&delta.name) {
                    if track {
                        for value in &old.values {
                            index::remove_value(store, schema, &entry, &delta.name, value)?;
                        }
                    }
                }
                record.remove(&delta.name);
                if !delta.values.is_empty() {
                    record.elements.push(Element::with_values(
                        delta.name.clone(),
                        ModFlag::None,
                        delta.values.clone(),
                    ));
                    if track {
                        for value in &delta.values {
                            index::add_value(store, schema, &entry, &delta.name, value)?;
                        }
                    }
                }
            }
            ModFlag::Delete => {
                let no_such = || DirError::no_such_attribute(format!("No such attribute: {}", delta.name));
                let Some(element) = record.element_mut(&delta.name) else {
                    return Err(no_such());
                };
                let removed = if delta.values.is_empty() {
                    std::mem::take(&mut element.values)
                } else {
                    let mut removed = Vec::with_capacity(delta.values.len());
                    for value in &delta.values {
                        let position = element.find_value(schema, value).ok_or_else(no_such)?;
                        removed.push(element.values.remove(position));
                    }
                    removed
                };
                if element.values.is_empty() {
                    record.remove(&delta.name);
                }
                if track {
                    for value in &removed {
                        index::remove_value(store, schema, &entry, &delta.name, value)?;
                    }
                }
            }
            ModFlag::None => {
                return Err(DirError::syntax(format!(
                    "modify element '{}' carries no modify flag",
                    delta.name
                )));
            }
        }
    }
    Ok(())
}

impl Module for KvBackend {
    fn name(&self) -> &str {
        "kv"
    }

    fn init(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        let handle = next.schema().clone();
        let store = &*self.store;
        if !store.is_read_only() {
            let lock = DbLock::acquire(store, LockMode::Exclusive)?;
            if cache::read_control(store, key::BASEINFO)?.is_none() {
                let mut baseinfo = Message::new(Dn::special(key::BASEINFO));
                baseinfo.add_string("sequenceNumber", "0");
                baseinfo.add_string("whenChanged", &now_timestring());
                store.put(&key::control_key(key::BASEINFO), &pack_message(&baseinfo), PutMode::Insert)?;
                tracing::debug!("created @BASEINFO");
            }
            lock.release()?;
        }
        let lock = DbLock::acquire(store, LockMode::Shared)?;
        self.cache.load(store, &handle)?;
        lock.release()
    }

    fn search(&mut self, req: &SearchRequest, next: &mut Next<'_>) -> DirResult<Vec<Message>> {
        let handle = next.schema().clone();
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Shared)?;
        self.cache.load(store, &handle)?;
        let result = {
            let schema = handle.read();
            search::search(store, &schema, &self.cache, req)
        };
        lock.release()?;
        result
    }

    fn add(&mut self, mut msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        for element in &mut msg.elements {
            element.flags = ModFlag::None;
        }
        let handle = next.schema().clone();
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Exclusive)?;
        self.cache.load(store, &handle)?;
        check_special(&msg)?;
        {
            let schema = handle.read();
            for element in &msg.elements {
                check_unique_values(&schema, element)?;
            }
            store_record(store, &schema, &self.cache, &msg, PutMode::Insert)?;
        }
        modified(store, &mut self.cache, &handle, &msg.dn)?;
        lock.release()
    }

    fn modify(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        let handle = next.schema().clone();
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Exclusive)?;
        self.cache.load(store, &handle)?;
        let dn = {
            let schema = handle.read();
            let mut record = search::fetch(store, &schema, &msg.dn)?.ok_or_else(|| missing_record(&msg.dn))?;
            apply_deltas(store, &schema, &self.cache, &mut record, &msg.elements)?;
            check_special(&record)?;
            store.put(
                &key::record_key(&schema, &record.dn),
                &pack_message(&record),
                PutMode::Modify,
            )?;
            record.dn
        };
        modified(store, &mut self.cache, &handle, &dn)?;
        lock.release()
    }

    fn delete(&mut self, dn: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        let handle = next.schema().clone();
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Exclusive)?;
        self.cache.load(store, &handle)?;
        {
            let schema = handle.read();
            let record = search::fetch(store, &schema, dn)?.ok_or_else(|| missing_record(dn))?;
            delete_record(store, &schema, &self.cache, &record)?;
        }
        modified(store, &mut self.cache, &handle, dn)?;
        lock.release()
    }

    fn rename(&mut self, old: &Dn, new: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        let handle = next.schema().clone();
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Exclusive)?;
        self.cache.load(store, &handle)?;
        {
            let schema = handle.read();
            let record = search::fetch(store, &schema, old)?.ok_or_else(|| missing_record(old))?;
            let mut moved = record.clone();
            moved.dn = new.clone();

            if key::record_key(&schema, old) == key::record_key(&schema, new) {
                index::remove_record(store, &schema, &self.cache, &record)?;
                store_record(store, &schema, &self.cache, &moved, PutMode::Replace)?;
            } else {
                store_record(store, &schema, &self.cache, &moved, PutMode::Insert)?;
                if let Err(err) = delete_record(store, &schema, &self.cache, &record) {
                    if let Err(undo) = delete_record(store, &schema, &self.cache, &moved) {
                        tracing::warn!(%new, error = %undo, "failed to remove renamed record after delete failure");
                    }
                    return Err(err);
                }
            }
        }
        modified(store, &mut self.cache, &handle, old)?;
        modified(store, &mut self.cache, &handle, new)?;
        lock.release()
    }

    fn lock(&mut self, name: &str, _next: &mut Next<'_>) -> DirResult<()> {
        tracing::debug!(name, "taking database lock");
        self.store.lock(LockMode::Exclusive)?;
        Ok(())
    }

    fn unlock(&mut self, name: &str, _next: &mut Next<'_>) -> DirResult<()> {
        tracing::debug!(name, "releasing database lock");
        self.store.unlock()?;
        Ok(())
    }

    fn start_transaction(&mut self, _next: &mut Next<'_>) -> DirResult<()> {
        self.store.transaction_start()?;
        Ok(())
    }

    fn commit_transaction(&mut self, _next: &mut Next<'_>) -> DirResult<()> {
        self.store.transaction_commit()?;
        Ok(())
    }

    fn cancel_transaction(&mut self, _next: &mut Next<'_>) -> DirResult<()> {
        self.cache.invalidate();
        self.store.transaction_cancel()?;
        Ok(())
    }

    fn sequence_number(&mut self, kind: SequenceKind, _next: &mut Next<'_>) -> DirResult<u64> {
        let store = &*self.store;
        let lock = DbLock::acquire(store, LockMode::Shared)?;
        let baseinfo = cache::read_control(store, key::BASEINFO)?;
        lock.release()?;

        let sequence = baseinfo.as_ref().and_then(|m| m.get_u64("sequenceNumber")).unwrap_or(0);
        Ok(match kind {
            SequenceKind::HighestSeq => sequence,
            SequenceKind::Next => sequence + 1,
            SequenceKind::HighestTimestamp => match baseinfo.and_then(|m| m.get_string("whenChanged")) {
                Some(text) => u64::try_from(parse_timestring(&text)?).unwrap_or(0),
                None => 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::filter::Filter;
    use crate::module::ModuleEnv;
    use crate::request::Scope;
    use crate::value::Value;

    struct Harness {
        store: Arc<dyn KvStore>,
        chain: Vec<Box<dyn Module>>,
        env: ModuleEnv,
    }

    impl Harness {
        fn new() -> Self {
            let env = ModuleEnv {
                schema: Schema::new().into_handle(),
                options: ConnectOptions::default(),
            };
            let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
            let mut harness = Self {
                chain: vec![Box::new(KvBackend::new(Arc::clone(&store)))],
                store,
                env,
            };
            harness.next().init().unwrap();
            harness
        }

        fn next(&mut self) -> Next<'_> {
            Next::new(&mut self.chain, &self.env)
        }

        fn find(&mut self, filter: &str) -> Vec<Message> {
            let req = SearchRequest::new(Dn::root(), Scope::Subtree, Filter::parse(filter).unwrap());
            self.next().search(&req).unwrap()
        }

        fn sequence(&mut self) -> u64 {
            self.next().sequence_number(SequenceKind::HighestSeq).unwrap()
        }
    }

    fn person(dn: &str, cn: &str) -> Message {
        let mut msg = Message::new(Dn::parse(dn).unwrap());
        msg.add_string("objectClass", "person");
        msg.add_string("cn", cn);
        msg
    }

    fn delta(dn: &str, name: &str, flag: ModFlag, values: &[&str]) -> Message {
        let mut msg = Message::new(Dn::parse(dn).unwrap());
        msg.elements.push(Element::with_values(
            name,
            flag,
            values.iter().map(|v| Value::from(*v)).collect(),
        ));
        msg
    }

    fn index_cn(h: &mut Harness) {
        let mut list = Message::new(Dn::special(key::INDEXLIST));
        list.add_string(key::IDXATTR, "cn");
        h.next().add(list).unwrap();
    }

    #[test]
    fn add_and_delete_bump_the_sequence_twice() {
        let mut h = Harness::new();
        let before = h.sequence();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        h.next().delete(&Dn::parse("cn=alice,dc=test").unwrap()).unwrap();
        assert_eq!(h.sequence(), before + 2);
        assert!(h.find("(cn=alice)").is_empty());
    }

    #[test]
    fn duplicate_add_conflicts() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        let err = h.next().add(person("CN=Alice,DC=test", "alice")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn duplicate_values_conflict() {
        let mut h = Harness::new();
        let mut msg = person("cn=alice,dc=test", "alice");
        msg.add_string("cn", "ALICE");
        assert_eq!(h.next().add(msg).unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut h = Harness::new();
        let err = h.next().delete(&Dn::parse("cn=ghost").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn modify_deltas() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        h.next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::Add, &["a@test", "b@test"]))
            .unwrap();

        let err = h
            .next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::Add, &["a@test"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        h.next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::Delete, &["a@test"]))
            .unwrap();
        let err = h
            .next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::Delete, &["a@test"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSuchAttribute);

        h.next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::Delete, &["b@test"]))
            .unwrap();
        let hits = h.find("(cn=alice)");
        assert_eq!(hits.len(), 1);
        assert!(!hits[0].has_attribute("mail"));

        h.next()
            .modify(delta("cn=alice,dc=test", "description", ModFlag::Replace, &["x"]))
            .unwrap();
        assert_eq!(h.find("(description=x)").len(), 1);
    }

    #[test]
    fn modify_without_flag_is_syntax() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        let err = h
            .next()
            .modify(delta("cn=alice,dc=test", "mail", ModFlag::None, &["a"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }

    #[test]
    fn indexed_search_follows_adds_and_deletes() {
        let mut h = Harness::new();
        index_cn(&mut h);
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        h.next().add(person("cn=bob,dc=test", "bob")).unwrap();
        assert_eq!(h.find("(cn=ALICE)").len(), 1);
        assert_eq!(h.find("(|(cn=alice)(cn=bob))").len(), 2);

        h.next().delete(&Dn::parse("cn=alice,dc=test").unwrap()).unwrap();
        assert!(h.find("(cn=alice)").is_empty());
    }

    #[test]
    fn indexlist_change_reindexes_existing_records() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        index_cn(&mut h);
        h.store.lock(LockMode::Shared).unwrap();
        let entry = h.store.get(b"DN=@INDEX:CN:ALICE").unwrap();
        h.store.unlock().unwrap();
        assert!(entry.is_some());
    }

    #[test]
    fn rename_moves_the_record() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        let old = Dn::parse("cn=alice,dc=test").unwrap();
        let new = Dn::parse("cn=carol,dc=test").unwrap();
        h.next().rename(&old, &new).unwrap();
        assert_eq!(h.next().delete(&old).unwrap_err().kind(), ErrorKind::NotFound);
        let hits = h.find("(dn=cn=carol,dc=test)");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get_string("cn").unwrap(), "alice");
    }

    #[test]
    fn rename_to_same_key_rewrites_in_place() {
        let mut h = Harness::new();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        let old = Dn::parse("cn=alice,dc=test").unwrap();
        let new = Dn::parse("CN=Alice,DC=test").unwrap();
        h.next().rename(&old, &new).unwrap();
        let hits = h.find("(cn=alice)");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].dn.linearize(), "CN=Alice,DC=test");
    }

    #[test]
    fn missing_base_is_not_found() {
        let mut h = Harness::new();
        let req = SearchRequest::new(
            Dn::parse("dc=nowhere").unwrap(),
            Scope::OneLevel,
            Filter::everything(),
        );
        assert_eq!(h.next().search(&req).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn invalid_attributes_record_is_rejected() {
        let mut h = Harness::new();
        let mut msg = Message::new(Dn::special(key::ATTRIBUTES));
        msg.add_string("cn", "SHOUTING");
        assert_eq!(h.next().add(msg).unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn cancelled_transaction_discards_writes() {
        let mut h = Harness::new();
        h.next().start_transaction().unwrap();
        h.next().add(person("cn=alice,dc=test", "alice")).unwrap();
        h.next().cancel_transaction().unwrap();
        assert!(h.find("(cn=alice)").is_empty());
    }
}
