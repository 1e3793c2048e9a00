//! # dirdb Core
//!
//! Embeddable, schema-aware directory database with an LDAP-like data model.
//!
//! This crate provides:
//! - Distinguished names, records and search filters
//! - A key-value backend with attribute indexes over [`dirdb_storage`]
//! - A module chain that every operation passes through, top to bottom
//! - Stock modules for directory-server semantics (account identity,
//!   timestamps, schema loading, the root entry and subtree renames)
//! - LDIF reading and writing
//!
//! ## Example
//!
//! ```rust
//! use dirdb_core::{ConnectOptions, Dn, Message, Registry, Scope};
//!
//! let mut ctx = Registry::with_defaults()
//!     .connect("mem://doc-example", ConnectOptions::new())
//!     .unwrap();
//! let mut msg = Message::new(Dn::parse("cn=alice,dc=example").unwrap());
//! msg.add_string("cn", "alice");
//! ctx.add(msg).unwrap();
//!
//! let found = ctx.search(&Dn::root(), Scope::Subtree, Some("(cn=alice)"), None).unwrap();
//! assert_eq!(found.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
mod config;
mod context;
mod dn;
mod error;
mod filter;
pub mod ldif;
mod message;
mod module;
pub mod modules;
mod pack;
mod registry;
mod request;
pub mod schema;
mod sid;
pub mod syntax;
pub mod timestring;
mod value;

pub use backend::KvBackend;
pub use config::{split_list, ConnectOptions};
pub use context::DirContext;
pub use dn::{Dn, DnComponent};
pub use error::{DirError, DirResult, ErrorKind};
pub use filter::Filter;
pub use message::{Element, Message, ModFlag};
pub use module::{Module, ModuleEnv, Next};
pub use pack::{pack_message, unpack_message};
pub use registry::{BackendFactory, ModuleFactory, Registry, DEFAULT_SCHEME};
pub use request::{Scope, SearchRequest, SequenceKind};
pub use schema::{Schema, SchemaHandle};
pub use sid::Sid;
pub use value::Value;
