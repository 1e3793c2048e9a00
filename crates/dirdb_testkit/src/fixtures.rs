//! Test fixtures and database helpers.
//!
//! Provides convenience functions for opening test databases with the
//! stock module chain and provisioning a small account domain.

use dirdb_core::{ConnectOptions, DirContext, DirResult, Dn, Message, Registry};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The stock module chain, head first.
pub const STOCK_MODULES: [&str; 6] = [
    "rootdse",
    "samldb",
    "timestamps",
    "schema_fsmo",
    "instancetype",
    "subtree_rename",
];

/// DN of the provisioned domain.
pub const DOMAIN_DN: &str = "DC=test";

/// Security identifier of the provisioned domain.
pub const DOMAIN_SID: &str = "S-1-5-21-1-2-3";

/// `nextRid` of the provisioned domain before any account is added.
pub const FIRST_RID: u32 = 1000;

/// A test context with automatic cleanup.
pub struct TestContext {
    /// The context.
    pub ctx: DirContext,
    /// Database file, for on-disk contexts.
    path: Option<PathBuf>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestContext {
    /// Opens an in-memory database with the stock modules.
    pub fn memory() -> Self {
        Self::memory_with(&STOCK_MODULES)
    }

    /// Opens an in-memory database with the given modules.
    pub fn memory_with(modules: &[&str]) -> Self {
        let ctx = Registry::with_defaults()
            .connect("mem://testkit", options(modules))
            .expect("Failed to open in-memory database");
        Self {
            ctx,
            path: None,
            _temp_dir: None,
        }
    }

    /// Opens a database file in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.ldb");
        let ctx = connect_file(&path, &STOCK_MODULES);
        Self {
            ctx,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens a second context on the same file.
    pub fn reopen(&self) -> Option<DirContext> {
        self.path().map(|path| connect_file(path, &STOCK_MODULES))
    }
}

impl std::ops::Deref for TestContext {
    type Target = DirContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl std::ops::DerefMut for TestContext {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

fn options(modules: &[&str]) -> ConnectOptions {
    ConnectOptions::new().modules(modules.iter().copied())
}

fn connect_file(path: &Path, modules: &[&str]) -> DirContext {
    let url = format!("tdb://{}", path.display());
    Registry::with_defaults()
        .connect(&url, options(modules))
        .expect("Failed to open file database")
}

/// Opens an in-memory database with the stock modules.
pub fn memory_context() -> TestContext {
    TestContext::memory()
}

/// Opens an on-disk database with the stock modules.
pub fn temp_context() -> TestContext {
    TestContext::file()
}

/// Runs a test with a provisioned in-memory database.
pub fn with_domain<F, R>(f: F) -> R
where
    F: FnOnce(&mut DirContext) -> R,
{
    let mut test_ctx = TestContext::memory();
    provision_domain(&mut test_ctx).expect("Failed to provision domain");
    f(&mut test_ctx.ctx)
}

fn record(dn: &str, attrs: &[(&str, &str)]) -> DirResult<Message> {
    let mut msg = Message::new(Dn::parse(dn)?);
    for (name, value) in attrs {
        msg.add_string(name, value);
    }
    Ok(msg)
}

/// Provisions the test domain.
///
/// Adds an index list covering `cn`, `objectClass` and `sAMAccountName`,
/// the domain head with its SID and `nextRid`, account templates for
/// users, member servers, groups and foreign security principals, and an
/// empty users container. Returns the domain DN.
///
/// # Errors
///
/// Returns the first add error.
pub fn provision_domain(ctx: &mut DirContext) -> DirResult<Dn> {
    let templates = "CN=Templates,DC=test";
    let first_rid = FIRST_RID.to_string();
    let records = [
        record(
            "@INDEXLIST",
            &[
                ("@IDXATTR", "cn"),
                ("@IDXATTR", "objectClass"),
                ("@IDXATTR", "sAMAccountName"),
            ],
        )?,
        record("@ROOTDSE", &[("defaultNamingContext", DOMAIN_DN)])?,
        record(
            DOMAIN_DN,
            &[
                ("objectClass", "top"),
                ("objectClass", "domain"),
                ("dc", "test"),
                ("objectSid", DOMAIN_SID),
                ("nextRid", first_rid.as_str()),
            ],
        )?,
        record(templates, &[("objectClass", "container"), ("cn", "Templates")])?,
        record(
            "CN=TemplateUser,CN=Templates,DC=test",
            &[
                ("objectClass", "top"),
                ("objectClass", "userTemplate"),
                ("cn", "TemplateUser"),
                ("userAccountControl", "546"),
                ("sAMAccountType", "805306368"),
            ],
        )?,
        record(
            "CN=TemplateMemberServer,CN=Templates,DC=test",
            &[
                ("objectClass", "top"),
                ("objectClass", "userTemplate"),
                ("cn", "TemplateMemberServer"),
                ("userAccountControl", "4098"),
                ("sAMAccountType", "805306369"),
            ],
        )?,
        record(
            "CN=TemplateGroup,CN=Templates,DC=test",
            &[
                ("objectClass", "top"),
                ("objectClass", "groupTemplate"),
                ("cn", "TemplateGroup"),
                ("groupType", "-2147483646"),
                ("sAMAccountType", "268435456"),
            ],
        )?,
        record(
            "CN=TemplateForeignSecurityPrincipal,CN=Templates,DC=test",
            &[
                ("objectClass", "top"),
                ("objectClass", "foreignSecurityPrincipalTemplate"),
                ("cn", "TemplateForeignSecurityPrincipal"),
            ],
        )?,
        record("CN=Users,DC=test", &[("objectClass", "container"), ("cn", "Users")])?,
    ];
    for msg in records {
        ctx.add(msg)?;
    }
    Dn::parse(DOMAIN_DN)
}
