//! The module chain.
//!
//! A context holds an ordered list of [`Module`]s ending with a storage
//! backend. Every call enters at the head. Each module receives a [`Next`]
//! handle for the rest of the chain and may answer the call itself, rewrite
//! it and forward, or forward and act on the outcome. Every trait method
//! forwards unchanged by default, so a module overrides only the operations
//! it cares about.
//!
//! Sub-requests a module issues (template lookups, counter updates) go
//! through its `Next`, so they see only the modules below it.

use crate::config::ConnectOptions;
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::filter::Filter;
use crate::message::Message;
use crate::request::{Scope, SearchRequest, SequenceKind};
use crate::schema::SchemaHandle;

/// State shared by every module of one context.
#[derive(Debug, Clone)]
pub struct ModuleEnv {
    /// Attribute handlers and subclass graph.
    pub schema: SchemaHandle,
    /// Connect options.
    pub options: ConnectOptions,
}

/// One interceptor in the chain.
pub trait Module: Send {
    /// Returns the module name.
    fn name(&self) -> &str;

    /// Called once, head first, when the chain is built.
    ///
    /// # Errors
    ///
    /// An error aborts the connect.
    fn init(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.init()
    }

    /// Searches with a parsed filter.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn search(&mut self, req: &SearchRequest, next: &mut Next<'_>) -> DirResult<Vec<Message>> {
        next.search(req)
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn add(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        next.add(msg)
    }

    /// Applies modify deltas.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn modify(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        next.modify(msg)
    }

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn delete(&mut self, dn: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        next.delete(dn)
    }

    /// Renames a record.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn rename(&mut self, old: &Dn, new: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        next.rename(old, new)
    }

    /// Takes the named whole-database lock.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn lock(&mut self, name: &str, next: &mut Next<'_>) -> DirResult<()> {
        next.lock(name)
    }

    /// Releases the named whole-database lock.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn unlock(&mut self, name: &str, next: &mut Next<'_>) -> DirResult<()> {
        next.unlock(name)
    }

    /// Opens a transaction bracket.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn start_transaction(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.start_transaction()
    }

    /// Commits a transaction bracket.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn commit_transaction(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.commit_transaction()
    }

    /// Cancels a transaction bracket.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn cancel_transaction(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.cancel_transaction()
    }

    /// Reports a sequence value.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    fn sequence_number(&mut self, kind: SequenceKind, next: &mut Next<'_>) -> DirResult<u64> {
        next.sequence_number(kind)
    }

    /// Registers a supported control OID.
    ///
    /// # Errors
    ///
    /// Fails if no module handles registrations.
    fn register_control(&mut self, oid: &str, next: &mut Next<'_>) -> DirResult<()> {
        next.register_control(oid)
    }

    /// Registers a naming context.
    ///
    /// # Errors
    ///
    /// Fails if no module handles registrations.
    fn register_partition(&mut self, dn: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        next.register_partition(dn)
    }
}

/// The remainder of the chain below a module.
pub struct Next<'a> {
    modules: &'a mut [Box<dyn Module>],
    env: &'a ModuleEnv,
}

fn end_of_chain(op: &str) -> DirError {
    DirError::operations(format!("{op}: no module in the chain handled the request"))
}

macro_rules! forward {
    ($self:ident, $op:literal, |$module:ident, $next:ident| $call:expr) => {{
        match $self.modules.split_first_mut() {
            Some(($module, rest)) => {
                let mut $next = Next {
                    modules: rest,
                    env: $self.env,
                };
                $call
            }
            None => Err(end_of_chain($op)),
        }
    }};
}

impl<'a> Next<'a> {
    /// Wraps a chain slice.
    pub fn new(modules: &'a mut [Box<dyn Module>], env: &'a ModuleEnv) -> Self {
        Self { modules, env }
    }

    /// Returns the shared environment.
    #[must_use]
    pub fn env(&self) -> &ModuleEnv {
        self.env
    }

    /// Returns the shared schema handle.
    #[must_use]
    pub fn schema(&self) -> &SchemaHandle {
        &self.env.schema
    }

    /// Returns the connect options.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.env.options
    }

    /// Initializes the rest of the chain.
    ///
    /// # Errors
    ///
    /// Returns the first initialization error.
    pub fn init(&mut self) -> DirResult<()> {
        match self.modules.split_first_mut() {
            Some((module, rest)) => {
                let mut next = Next {
                    modules: rest,
                    env: self.env,
                };
                tracing::debug!(module = module.name(), "initializing module");
                module.init(&mut next)
            }
            None => Ok(()),
        }
    }

    /// Forwards a search.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn search(&mut self, req: &SearchRequest) -> DirResult<Vec<Message>> {
        forward!(self, "search", |m, next| m.search(req, &mut next))
    }

    /// Forwards an add.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn add(&mut self, msg: Message) -> DirResult<()> {
        forward!(self, "add", |m, next| m.add(msg, &mut next))
    }

    /// Forwards a modify.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn modify(&mut self, msg: Message) -> DirResult<()> {
        forward!(self, "modify", |m, next| m.modify(msg, &mut next))
    }

    /// Forwards a delete.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn delete(&mut self, dn: &Dn) -> DirResult<()> {
        forward!(self, "delete", |m, next| m.delete(dn, &mut next))
    }

    /// Forwards a rename.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn rename(&mut self, old: &Dn, new: &Dn) -> DirResult<()> {
        forward!(self, "rename", |m, next| m.rename(old, new, &mut next))
    }

    /// Forwards a lock request.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn lock(&mut self, name: &str) -> DirResult<()> {
        forward!(self, "lock", |m, next| m.lock(name, &mut next))
    }

    /// Forwards an unlock request.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn unlock(&mut self, name: &str) -> DirResult<()> {
        forward!(self, "unlock", |m, next| m.unlock(name, &mut next))
    }

    /// Forwards a transaction start.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn start_transaction(&mut self) -> DirResult<()> {
        forward!(self, "start_transaction", |m, next| m.start_transaction(&mut next))
    }

    /// Forwards a transaction commit.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn commit_transaction(&mut self) -> DirResult<()> {
        forward!(self, "commit_transaction", |m, next| m.commit_transaction(&mut next))
    }

    /// Forwards a transaction cancel.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn cancel_transaction(&mut self) -> DirResult<()> {
        forward!(self, "cancel_transaction", |m, next| m.cancel_transaction(&mut next))
    }

    /// Forwards a sequence-number query.
    ///
    /// # Errors
    ///
    /// Returns the first error from the chain.
    pub fn sequence_number(&mut self, kind: SequenceKind) -> DirResult<u64> {
        forward!(self, "sequence_number", |m, next| m.sequence_number(kind, &mut next))
    }

    /// Forwards a control registration.
    ///
    /// # Errors
    ///
    /// Fails if no module handles registrations.
    pub fn register_control(&mut self, oid: &str) -> DirResult<()> {
        forward!(self, "register_control", |m, next| m.register_control(oid, &mut next))
    }

    /// Forwards a partition registration.
    ///
    /// # Errors
    ///
    /// Fails if no module handles registrations.
    pub fn register_partition(&mut self, dn: &Dn) -> DirResult<()> {
        forward!(self, "register_partition", |m, next| m.register_partition(dn, &mut next))
    }

    /// Searches below this module with filter text.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for bad filter text, or the first chain error.
    pub fn search_expr(
        &mut self,
        base: &Dn,
        scope: Scope,
        expression: &str,
        attrs: Option<&[&str]>,
    ) -> DirResult<Vec<Message>> {
        let mut req = SearchRequest::new(base.clone(), scope, Filter::parse(expression)?);
        if let Some(attrs) = attrs {
            req = req.with_attrs(attrs.iter().copied());
        }
        self.search(&req)
    }
}
