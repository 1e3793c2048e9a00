//! Backend and module registry.
//!
//! A [`Registry`] maps URL schemes to backend constructors and module names
//! to module constructors. It is built once and passed to
//! [`Registry::connect`]; [`DirContext::connect`] uses a process-wide
//! registry holding the stock entries.

use crate::backend::{key, KvBackend};
use crate::config::{split_list, ConnectOptions};
use crate::context::DirContext;
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::filter::Filter;
use crate::module::{Module, ModuleEnv, Next};
use crate::modules;
use crate::request::{Scope, SearchRequest};
use crate::schema::Schema;
use dirdb_storage::{KvStore, MemoryStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Builds the backend for the location part of a URL.
pub type BackendFactory = Box<dyn Fn(&str, &ConnectOptions) -> DirResult<Box<dyn Module>> + Send + Sync>;

/// Builds a fresh module instance.
pub type ModuleFactory = Box<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Scheme used for bare paths.
pub const DEFAULT_SCHEME: &str = "tdb";

/// Registered backends and modules.
pub struct Registry {
    backends: HashMap<String, BackendFactory>,
    modules: HashMap<String, ModuleFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut backends: Vec<&String> = self.backends.keys().collect();
        backends.sort();
        let mut modules: Vec<&String> = self.modules.keys().collect();
        modules.sort();
        f.debug_struct("Registry")
            .field("backends", &backends)
            .field("modules", &modules)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            modules: HashMap::new(),
        }
    }

    /// Creates a registry holding the stock backends and modules.
    ///
    /// `mem://<name>` stores are shared by every connection made through
    /// the same registry. Each connection keeps its own lock and
    /// transaction state.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = registry
            .register_defaults()
            .and_then(|()| modules::register_stock(&mut registry));
        if let Err(err) = defaults {
            tracing::error!(error = %err, "stock registrations collided");
        }
        registry
    }

    fn register_defaults(&mut self) -> DirResult<()> {
        self.register_backend(
            DEFAULT_SCHEME,
            Box::new(|location, options| {
                Ok(Box::new(KvBackend::open(Path::new(location), options)?) as Box<dyn Module>)
            }),
        )?;

        let memory: Mutex<HashMap<String, MemoryStore>> = Mutex::default();
        self.register_backend(
            "mem",
            Box::new(move |location, _options| {
                let store = memory
                    .lock()
                    .entry(location.to_string())
                    .or_default()
                    .connect();
                Ok(Box::new(KvBackend::new(Arc::new(store) as Arc<dyn KvStore>)) as Box<dyn Module>)
            }),
        )
    }

    /// Returns the process-wide registry with the stock entries.
    pub fn shared() -> &'static Self {
        static SHARED: OnceLock<Registry> = OnceLock::new();
        SHARED.get_or_init(Self::with_defaults)
    }

    /// Registers a backend for `scheme`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the scheme is taken.
    pub fn register_backend(&mut self, scheme: &str, factory: BackendFactory) -> DirResult<()> {
        let scheme = scheme.to_ascii_lowercase();
        if self.backends.contains_key(&scheme) {
            return Err(DirError::conflict(format!(
                "backend for scheme '{scheme}' already registered"
            )));
        }
        self.backends.insert(scheme, factory);
        Ok(())
    }

    /// Registers a module under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the name is taken.
    pub fn register_module(&mut self, name: &str, factory: ModuleFactory) -> DirResult<()> {
        if self.modules.contains_key(name) {
            return Err(DirError::conflict(format!("module '{name}' already registered")));
        }
        self.modules.insert(name.to_string(), factory);
        Ok(())
    }

    /// Returns true if a module is registered under `name`.
    #[must_use]
    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Builds the backend named by `url`.
    ///
    /// # Errors
    ///
    /// Returns `Operations` for an unregistered scheme, or the backend's
    /// open error.
    pub fn backend(&self, url: &str, options: &ConnectOptions) -> DirResult<Box<dyn Module>> {
        let (scheme, location) = match url.split_once("://") {
            Some((scheme, location)) => (scheme.to_ascii_lowercase(), location),
            None => (DEFAULT_SCHEME.to_string(), url),
        };
        let factory = self.backends.get(&scheme).ok_or_else(|| {
            DirError::operations(format!("no backend registered for scheme '{scheme}' in '{url}'"))
        })?;
        factory(location, options)
    }

    /// Builds the module registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Operations` if no such module is registered.
    pub fn module(&self, name: &str) -> DirResult<Box<dyn Module>> {
        self.modules
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| DirError::operations(format!("module '{name}' is not registered")))
    }

    /// Opens `url` and builds its module chain.
    ///
    /// The chain is the modules named in `options`, or in the `@MODULES`
    /// record when the options name none, followed by the backend.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::backend`] and [`Self::module`], or the
    /// first module initialization error.
    pub fn connect(&self, url: &str, options: ConnectOptions) -> DirResult<DirContext> {
        let env = ModuleEnv {
            schema: Schema::new().into_handle(),
            options,
        };
        let mut backend_only = vec![self.backend(url, &env.options)?];
        Next::new(&mut backend_only, &env).init()?;

        let names = match &env.options.modules {
            Some(names) => names.clone(),
            None => stored_module_list(&mut backend_only, &env)?,
        };
        let mut chain = names
            .iter()
            .map(|name| self.module(name))
            .collect::<DirResult<Vec<_>>>()?;
        chain.append(&mut backend_only);
        tracing::debug!(url, modules = ?names, "building module chain");

        Next::new(&mut chain, &env).init()?;
        Ok(DirContext::from_parts(chain, env))
    }
}

fn stored_module_list(chain: &mut [Box<dyn Module>], env: &ModuleEnv) -> DirResult<Vec<String>> {
    let base = Dn::special(key::MODULES);
    let req = SearchRequest::new(base, Scope::Base, Filter::everything());
    let found = match Next::new(chain, env).search(&req) {
        Ok(found) => found,
        Err(err) if err.kind() == crate::error::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };
    Ok(found
        .iter()
        .filter_map(|record| record.element(key::MODULES_LIST))
        .flat_map(|element| element.values.iter())
        .flat_map(|value| split_list(&value.to_string_lossy()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::message::Message;

    struct Passthrough;

    impl Module for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let mut registry = Registry::new();
        registry
            .register_module("passthrough", Box::new(|| Box::new(Passthrough) as Box<dyn Module>))
            .unwrap();
        let err = registry
            .register_module("passthrough", Box::new(|| Box::new(Passthrough) as Box<dyn Module>))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let mut defaults = Registry::with_defaults();
        let err = defaults
            .register_backend("MEM", Box::new(|_, _| Ok(Box::new(Passthrough) as Box<dyn Module>)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn unknown_scheme_is_operations_error() {
        let registry = Registry::with_defaults();
        for url in ["ldap://server", "sqlite://db.sqlite"] {
            let err = registry.connect(url, ConnectOptions::new()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Operations);
            assert!(err.to_string().contains("no backend registered for scheme"));
        }
    }

    #[test]
    fn unknown_module_is_operations_error() {
        let registry = Registry::with_defaults();
        let options = ConnectOptions::new().modules(["no_such_module"]);
        let err = registry.connect("mem://unknown-module", options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operations);
    }

    #[test]
    fn memory_stores_are_shared_by_name() {
        let registry = Registry::with_defaults();
        let none = || ConnectOptions::new().modules(Vec::<String>::new());
        let mut first = registry.connect("mem://shared", none()).unwrap();
        let mut msg = Message::new(Dn::parse("cn=a").unwrap());
        msg.add_string("cn", "a");
        first.add(msg).unwrap();

        let mut second = registry.connect("mem://shared", none()).unwrap();
        assert_eq!(second.search(&Dn::root(), Scope::Subtree, Some("(cn=a)"), None).unwrap().len(), 1);

        let mut other = registry.connect("mem://other", none()).unwrap();
        assert!(other.search(&Dn::root(), Scope::Subtree, Some("(cn=a)"), None).unwrap().is_empty());
    }

    #[test]
    fn memory_connections_wait_for_the_exclusive_lock() {
        let registry = Registry::with_defaults();
        let none = || ConnectOptions::new().modules(Vec::<String>::new());
        let mut writer = registry.connect("mem://isolated", none()).unwrap();
        let mut reader = registry.connect("mem://isolated", none()).unwrap();

        writer.transaction_start().unwrap();
        writer.add(named("x")).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let found = reader.search(&Dn::root(), Scope::Subtree, Some("(cn=x)"), None);
            tx.send(found.map(|records| records.len()).map_err(|err| err.kind())).unwrap();
            let duplicate = reader.add(named("x")).unwrap_err();
            assert_eq!(duplicate.kind(), ErrorKind::Conflict);
        });
        assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());

        writer.transaction_commit().unwrap();
        assert_eq!(rx.recv().unwrap(), Ok(1));
        handle.join().unwrap();

        writer.transaction_start().unwrap();
        writer.add(named("y")).unwrap();
        writer.transaction_commit().unwrap();
        let found = writer.search(&Dn::root(), Scope::Subtree, Some("(|(cn=x)(cn=y))"), None).unwrap();
        assert_eq!(found.len(), 2);
    }

    fn named(cn: &str) -> Message {
        let mut msg = Message::new(Dn::parse(&format!("cn={cn}")).unwrap());
        msg.add_string("cn", cn);
        msg
    }

    #[test]
    fn module_list_is_read_from_the_store() {
        let registry = Registry::with_defaults();
        let mut setup = registry
            .connect("mem://stored-list", ConnectOptions::new().modules(Vec::<String>::new()))
            .unwrap();
        let mut list = Message::new(Dn::special(key::MODULES));
        list.add_string(key::MODULES_LIST, "timestamps, instancetype");
        setup.add(list).unwrap();

        let ctx = registry.connect("mem://stored-list", ConnectOptions::new()).unwrap();
        assert_eq!(ctx.module_names(), vec!["timestamps", "instancetype", "kv"]);
    }
}
