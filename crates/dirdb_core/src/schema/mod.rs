//! Attribute and objectclass schema tables.
//!
//! Attribute lookups consult, in order:
//!
//! 1. the per-database `@ATTRIBUTES` control record
//! 2. attributes registered in code or loaded from the directory schema
//! 3. the octet-string default
//!
//! The subclass graph merges registered edges with the `@SUBCLASSES`
//! control record.

mod directory;

pub use directory::{DirectorySchema, PrefixMap, PrefixMapping, SchemaAttribute, SchemaClass};

use crate::error::{DirError, DirResult};
use crate::syntax::{self, SyntaxHandler};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Flag value marking an attribute case-insensitive.
pub const FLAG_CASE_INSENSITIVE: &str = "CASE_INSENSITIVE";
/// Flag value marking an attribute as an integer.
pub const FLAG_INTEGER: &str = "INTEGER";
/// Flag value hiding an attribute from wildcard searches.
pub const FLAG_HIDDEN: &str = "HIDDEN";
/// Flag value accepted for compatibility; has no effect on matching.
pub const FLAG_WILDCARD: &str = "WILDCARD";

/// Shared, lockable schema handle.
pub type SchemaHandle = Arc<RwLock<Schema>>;

/// How one attribute is handled.
#[derive(Debug, Clone, Copy)]
pub struct AttributeInfo {
    /// Syntax handler for the attribute's values.
    pub syntax: &'static dyn SyntaxHandler,
    /// Omitted from wildcard searches.
    pub hidden: bool,
}

impl AttributeInfo {
    /// Creates a visible attribute with the given syntax.
    #[must_use]
    pub fn new(syntax: &'static dyn SyntaxHandler) -> Self {
        Self {
            syntax,
            hidden: false,
        }
    }
}

impl Default for AttributeInfo {
    fn default() -> Self {
        Self::new(&syntax::OCTET_STRING)
    }
}

/// Builds attribute overrides from `@ATTRIBUTES` pairs.
///
/// # Errors
///
/// Returns `Syntax` for a flag outside the accepted set.
pub fn attribute_flags<'a, I>(pairs: I) -> DirResult<HashMap<String, AttributeInfo>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out: HashMap<String, AttributeInfo> = HashMap::new();
    for (name, flag) in pairs {
        let info = out.entry(name.to_ascii_uppercase()).or_default();
        match flag {
            FLAG_CASE_INSENSITIVE => info.syntax = &syntax::DIRECTORY_STRING,
            FLAG_INTEGER => info.syntax = &syntax::INTEGER,
            FLAG_HIDDEN => info.hidden = true,
            FLAG_WILDCARD => {}
            _ => {
                return Err(DirError::syntax(
                    "Invalid attribute value in an @ATTRIBUTES entry",
                ))
            }
        }
    }
    Ok(out)
}

/// The attribute-handler and subclass table shared by a context.
#[derive(Debug, Clone)]
pub struct Schema {
    registered: HashMap<String, AttributeInfo>,
    record: HashMap<String, AttributeInfo>,
    subclasses: HashMap<String, Vec<String>>,
    record_subclasses: HashMap<String, Vec<String>>,
    directory: Option<Arc<DirectorySchema>>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Creates a schema with the well-known attributes registered.
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Self {
            registered: HashMap::new(),
            record: HashMap::new(),
            subclasses: HashMap::new(),
            record_subclasses: HashMap::new(),
            directory: None,
        };
        for name in ["dn", "distinguishedName", "ncName"] {
            schema.register(name, &syntax::DN);
        }
        for name in ["member", "memberOf", "fSMORoleOwner", "objectCategory"] {
            schema.register(name, &syntax::DN);
        }
        for name in ["cn", "dc", "ou"] {
            schema.register(name, &syntax::DIRECTORY_STRING);
        }
        schema.register("objectClass", &syntax::OBJECTCLASS);
        schema.register("objectSid", &syntax::SID);
        schema.register("objectGUID", &syntax::GUID);
        schema
    }

    /// Creates a shared handle around this schema.
    #[must_use]
    pub fn into_handle(self) -> SchemaHandle {
        Arc::new(RwLock::new(self))
    }

    /// Returns how `name` is handled.
    #[must_use]
    pub fn attribute(&self, name: &str) -> AttributeInfo {
        let key = name.to_ascii_uppercase();
        self.record
            .get(&key)
            .or_else(|| self.registered.get(&key))
            .copied()
            .unwrap_or_default()
    }

    /// Returns the syntax handler for `name`.
    #[must_use]
    pub fn syntax(&self, name: &str) -> &'static dyn SyntaxHandler {
        self.attribute(name).syntax
    }

    /// Returns true if values of `name` fold case.
    #[must_use]
    pub fn is_case_insensitive(&self, name: &str) -> bool {
        self.syntax(name).is_case_insensitive()
    }

    /// Returns true if `name` is hidden from wildcard searches.
    #[must_use]
    pub fn is_hidden(&self, name: &str) -> bool {
        self.attribute(name).hidden
    }

    /// Registers a syntax for `name`, replacing any earlier registration.
    pub fn register(&mut self, name: &str, syntax: &'static dyn SyntaxHandler) {
        self.registered
            .insert(name.to_ascii_uppercase(), AttributeInfo::new(syntax));
    }

    /// Registers a syntax for `name` unless one is already registered.
    pub fn register_if_absent(&mut self, name: &str, syntax: &'static dyn SyntaxHandler) {
        self.registered
            .entry(name.to_ascii_uppercase())
            .or_insert_with(|| AttributeInfo::new(syntax));
    }

    /// Replaces the overrides taken from `@ATTRIBUTES`.
    pub fn set_record_attributes(&mut self, record: HashMap<String, AttributeInfo>) {
        self.record = record;
    }

    /// Replaces the subclass edges taken from `@SUBCLASSES`.
    pub fn set_record_subclasses(&mut self, edges: HashMap<String, Vec<String>>) {
        self.record_subclasses = edges
            .into_iter()
            .map(|(class, subs)| (class.to_ascii_uppercase(), subs))
            .collect();
    }

    /// Registers `subclass` as a direct subclass of `class`.
    pub fn add_subclass(&mut self, class: &str, subclass: &str) {
        let subs = self
            .subclasses
            .entry(class.to_ascii_uppercase())
            .or_default();
        if !subs.iter().any(|s| s.eq_ignore_ascii_case(subclass)) {
            subs.push(subclass.to_string());
        }
    }

    /// Returns the direct subclasses of `class`.
    #[must_use]
    pub fn subclasses(&self, class: &str) -> Vec<String> {
        let key = class.to_ascii_uppercase();
        let mut out: Vec<String> = Vec::new();
        for source in [&self.subclasses, &self.record_subclasses] {
            for sub in source.get(&key).into_iter().flatten() {
                if !out.iter().any(|s| s.eq_ignore_ascii_case(sub)) {
                    out.push(sub.clone());
                }
            }
        }
        out
    }

    /// Returns every transitive subclass of `class`, excluding `class`.
    #[must_use]
    pub fn subclass_closure(&self, class: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(class.to_ascii_uppercase());
        let mut out = Vec::new();
        let mut pending = self.subclasses(class);
        while let Some(sub) = pending.pop() {
            if seen.insert(sub.to_ascii_uppercase()) {
                pending.extend(self.subclasses(&sub));
                out.push(sub);
            }
        }
        out
    }

    /// Returns the loaded directory schema, if any.
    #[must_use]
    pub fn directory(&self) -> Option<&DirectorySchema> {
        self.directory.as_deref()
    }

    /// Returns the loaded directory schema for modification.
    pub fn directory_mut(&mut self) -> Option<&mut DirectorySchema> {
        self.directory.as_mut().map(Arc::make_mut)
    }

    /// Installs a loaded directory schema, registering its attribute
    /// syntaxes and class hierarchy.
    pub fn set_directory(&mut self, directory: DirectorySchema) {
        for attribute in &directory.attributes {
            if let Some(handler) = attribute.syntax_handler() {
                self.register_if_absent(&attribute.ldap_display_name, handler);
            }
        }
        for class in &directory.classes {
            if let Some(parent) = &class.sub_class_of {
                if !parent.eq_ignore_ascii_case(&class.ldap_display_name) {
                    self.add_subclass(parent, &class.ldap_display_name);
                }
            }
        }
        self.directory = Some(Arc::new(directory));
    }
}
