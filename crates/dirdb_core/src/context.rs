//! The directory context.
//!
//! A [`DirContext`] owns one module chain and the schema it shares. Every
//! public call enters the chain at its head. Mutations run inside a
//! transaction bracket so a failure part-way through a module's
//! sub-requests leaves the store as it was.

use crate::config::ConnectOptions;
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::filter::Filter;
use crate::message::Message;
use crate::module::{Module, ModuleEnv, Next};
use crate::registry::Registry;
use crate::request::{Scope, SearchRequest, SequenceKind};
use crate::schema::SchemaHandle;

/// An open directory database.
///
/// # Example
///
/// ```
/// use dirdb_core::{ConnectOptions, DirContext, Dn, Message, Scope};
///
/// let options = ConnectOptions::new().modules(["timestamps"]);
/// let mut ctx = DirContext::connect("mem://context-doc", options).unwrap();
///
/// let mut msg = Message::new(Dn::parse("cn=alice,dc=test").unwrap());
/// msg.add_string("objectClass", "person");
/// ctx.add(msg).unwrap();
///
/// let hits = ctx.search(&Dn::root(), Scope::Subtree, Some("(objectClass=person)"), None).unwrap();
/// assert!(hits[0].has_attribute("whenCreated"));
/// ```
pub struct DirContext {
    chain: Vec<Box<dyn Module>>,
    env: ModuleEnv,
    last_error: Option<String>,
}

impl std::fmt::Debug for DirContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.chain.iter().map(|m| m.name()).collect();
        f.debug_struct("DirContext")
            .field("chain", &names)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl DirContext {
    /// Connects through the process-wide default registry.
    ///
    /// `url` is `tdb://<path>`, a bare path, or `mem://<name>`.
    ///
    /// # Errors
    ///
    /// Returns `Operations` for an unknown scheme or module, `NotFound` for
    /// a missing database that may not be created, or the first module
    /// initialization error.
    pub fn connect(url: &str, options: ConnectOptions) -> DirResult<Self> {
        Registry::shared().connect(url, options)
    }

    pub(crate) fn from_parts(chain: Vec<Box<dyn Module>>, env: ModuleEnv) -> Self {
        Self {
            chain,
            env,
            last_error: None,
        }
    }

    /// Returns the module names, head first.
    #[must_use]
    pub fn module_names(&self) -> Vec<&str> {
        self.chain.iter().map(|m| m.name()).collect()
    }

    /// Returns the shared schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaHandle {
        &self.env.schema
    }

    /// Returns the options the context was opened with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.env.options
    }

    /// Returns the detail of the most recent failure.
    ///
    /// The next call on the context clears it.
    #[must_use]
    pub fn errstring(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn run<T>(&mut self, op: impl FnOnce(&mut Next<'_>) -> DirResult<T>) -> DirResult<T> {
        self.last_error = None;
        let result = {
            let mut next = Next::new(&mut self.chain, &self.env);
            op(&mut next)
        };
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
        }
        result
    }

    fn run_mutation<T>(&mut self, op: impl FnOnce(&mut Next<'_>) -> DirResult<T>) -> DirResult<T> {
        self.run(|next| {
            next.start_transaction()?;
            match op(next) {
                Ok(value) => {
                    next.commit_transaction()?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(cancel) = next.cancel_transaction() {
                        tracing::warn!(error = %cancel, "failed to cancel transaction");
                    }
                    Err(err)
                }
            }
        })
    }

    /// Searches with filter text. `None` matches every record.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for bad filter text, `NotFound` for a missing
    /// base, or the first chain error.
    pub fn search(
        &mut self,
        base: &Dn,
        scope: Scope,
        expression: Option<&str>,
        attrs: Option<&[&str]>,
    ) -> DirResult<Vec<Message>> {
        self.run(|next| {
            let filter = match expression {
                Some(text) => Filter::parse(text)?,
                None => Filter::everything(),
            };
            let mut req = SearchRequest::new(base.clone(), scope, filter);
            if let Some(attrs) = attrs {
                req = req.with_attrs(attrs.iter().copied());
            }
            next.search(&req)
        })
    }

    /// Searches with a parsed request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing base, or the first chain error.
    pub fn search_tree(&mut self, req: &SearchRequest) -> DirResult<Vec<Message>> {
        self.run(|next| next.search(req))
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for the root DN or an element without values,
    /// `Conflict` if the record exists, or the first chain error.
    pub fn add(&mut self, msg: Message) -> DirResult<()> {
        self.run_mutation(|next| {
            if msg.dn.is_root() {
                return Err(DirError::syntax("cannot add a record at the root DN"));
            }
            if let Some(empty) = msg.elements.iter().find(|e| e.values.is_empty()) {
                return Err(DirError::syntax(format!(
                    "element '{}' of '{}' has no values",
                    empty.name, msg.dn
                )));
            }
            next.add(msg)
        })
    }

    /// Applies modify deltas.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is missing, `Conflict`,
    /// `NoSuchAttribute` or `Syntax` for bad deltas, or the first chain
    /// error.
    pub fn modify(&mut self, msg: Message) -> DirResult<()> {
        self.run_mutation(|next| next.modify(msg))
    }

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record is missing, or the first chain
    /// error.
    pub fn delete(&mut self, dn: &Dn) -> DirResult<()> {
        self.run_mutation(|next| {
            if dn.is_root() {
                return Err(DirError::syntax("cannot delete the root DN"));
            }
            next.delete(dn)
        })
    }

    /// Renames a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `old` is missing, `Conflict` if `new` exists,
    /// or the first chain error.
    pub fn rename(&mut self, old: &Dn, new: &Dn) -> DirResult<()> {
        self.run_mutation(|next| {
            if old.is_root() || new.is_root() {
                return Err(DirError::syntax("cannot rename to or from the root DN"));
            }
            next.rename(old, new)
        })
    }

    /// Takes the named whole-database lock until [`Self::unlock`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lock cannot be taken.
    pub fn lock(&mut self, name: &str) -> DirResult<()> {
        self.run(|next| next.lock(name))
    }

    /// Releases the named whole-database lock.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no lock is held.
    pub fn unlock(&mut self, name: &str) -> DirResult<()> {
        self.run(|next| next.unlock(name))
    }

    /// Opens a transaction bracket. Brackets nest.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the exclusive lock cannot be taken.
    pub fn transaction_start(&mut self) -> DirResult<()> {
        self.run(|next| next.start_transaction())
    }

    /// Commits the innermost transaction bracket.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no transaction is open or the store
    /// cannot be written.
    pub fn transaction_commit(&mut self) -> DirResult<()> {
        self.run(|next| next.commit_transaction())
    }

    /// Cancels every open transaction bracket.
    ///
    /// # Errors
    ///
    /// Returns a storage error if no transaction is open.
    pub fn transaction_cancel(&mut self) -> DirResult<()> {
        self.run(|next| next.cancel_transaction())
    }

    /// Reports a sequence value.
    ///
    /// # Errors
    ///
    /// Returns the first chain error.
    pub fn sequence_number(&mut self, kind: SequenceKind) -> DirResult<u64> {
        self.run(|next| next.sequence_number(kind))
    }

    /// Registers a supported control OID with the chain.
    ///
    /// # Errors
    ///
    /// Returns `Operations` if no module accepts registrations.
    pub fn register_control(&mut self, oid: &str) -> DirResult<()> {
        self.run(|next| next.register_control(oid))
    }

    /// Registers a naming context with the chain.
    ///
    /// # Errors
    ///
    /// Returns `Operations` if no module accepts registrations.
    pub fn register_partition(&mut self, dn: &Dn) -> DirResult<()> {
        self.run(|next| next.register_partition(dn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::{Element, ModFlag};

    fn context(name: &str) -> DirContext {
        let options = ConnectOptions::new().modules(Vec::<String>::new());
        DirContext::connect(&format!("mem://context-tests-{name}"), options).unwrap()
    }

    #[test]
    fn errstring_tracks_the_last_call() {
        let mut ctx = context("errstring");
        let err = ctx.delete(&Dn::parse("cn=ghost").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(ctx.errstring().unwrap().contains("cn=ghost"));

        ctx.sequence_number(SequenceKind::HighestSeq).unwrap();
        assert!(ctx.errstring().is_none());
    }

    #[test]
    fn empty_elements_are_rejected() {
        let mut ctx = context("empty");
        let mut msg = Message::new(Dn::parse("cn=a").unwrap());
        msg.elements.push(Element::new("cn", ModFlag::None));
        assert_eq!(ctx.add(msg).unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn root_dn_cannot_be_added() {
        let mut ctx = context("root");
        assert_eq!(
            ctx.add(Message::new(Dn::root())).unwrap_err().kind(),
            ErrorKind::Syntax
        );
    }

    #[test]
    fn failed_mutation_leaves_no_trace() {
        let mut ctx = context("rollback");
        let mut msg = Message::new(Dn::parse("cn=a").unwrap());
        msg.add_string("cn", "a");
        ctx.add(msg.clone()).unwrap();
        let before = ctx.sequence_number(SequenceKind::HighestSeq).unwrap();
        assert_eq!(ctx.add(msg).unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(ctx.sequence_number(SequenceKind::HighestSeq).unwrap(), before);
    }

    #[test]
    fn bad_filter_is_syntax() {
        let mut ctx = context("filter");
        let err = ctx.search(&Dn::root(), Scope::Subtree, Some("(cn=a"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax);
    }
}
