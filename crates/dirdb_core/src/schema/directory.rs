//! Directory schema loaded from `attributeSchema` and `classSchema` objects.

use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::syntax::{self, SyntaxHandler};
use crate::value::Value;

/// One loaded attribute definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAttribute {
    /// LDAP display name, e.g. `sAMAccountName`.
    pub ldap_display_name: String,
    /// Attribute OID.
    pub attribute_id: String,
    /// Directory syntax OID, e.g. `2.5.5.12`.
    pub attribute_syntax: Option<String>,
    /// True if the attribute holds at most one value.
    pub single_valued: bool,
}

impl SchemaAttribute {
    /// Maps the directory syntax OID onto a handler.
    #[must_use]
    pub fn syntax_handler(&self) -> Option<&'static dyn SyntaxHandler> {
        let handler: &'static dyn SyntaxHandler = match self.attribute_syntax.as_deref()? {
            "2.5.5.1" => &syntax::DN,
            "2.5.5.2" | "2.5.5.4" | "2.5.5.8" | "2.5.5.12" => &syntax::DIRECTORY_STRING,
            "2.5.5.9" | "2.5.5.16" => &syntax::INTEGER,
            "2.5.5.17" => &syntax::SID,
            _ => &syntax::OCTET_STRING,
        };
        Some(handler)
    }
}

/// One loaded class definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaClass {
    /// LDAP display name, e.g. `user`.
    pub ldap_display_name: String,
    /// Class OID.
    pub governs_id: String,
    /// Direct superclass.
    pub sub_class_of: Option<String>,
}

/// One `"<id>:<oid prefix>"` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixMapping {
    /// Numeric prefix identifier, the high 16 bits of an attribute id.
    pub id: u32,
    /// OID prefix without the last arc.
    pub oid_prefix: String,
}

impl PrefixMapping {
    /// Renders the stored form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::from(format!("{}:{}", self.id, self.oid_prefix))
    }
}

/// Table mapping OID prefixes to compact identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixMap {
    mappings: Vec<PrefixMapping>,
}

/// Splits an OID into its prefix and last arc.
fn split_oid(oid: &str) -> DirResult<(&str, u32)> {
    let invalid = || DirError::syntax(format!("invalid OID '{oid}'"));
    let (prefix, last) = oid.rsplit_once('.').ok_or_else(invalid)?;
    if prefix.is_empty() || !prefix.split('.').all(|arc| arc.parse::<u32>().is_ok()) {
        return Err(invalid());
    }
    let last: u32 = last.parse().map_err(|_| invalid())?;
    if last > 0xFFFF {
        return Err(DirError::operations(format!(
            "last arc of OID '{oid}' does not fit an attribute id"
        )));
    }
    Ok((prefix, last))
}

impl PrefixMap {
    /// Parses stored `prefixMap` values.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for values not of the form `<id>:<oid prefix>`.
    pub fn parse(values: &[Value]) -> DirResult<Self> {
        let mut mappings = Vec::with_capacity(values.len());
        for value in values {
            let text = value.to_string_lossy();
            let (id, prefix) = text
                .split_once(':')
                .ok_or_else(|| DirError::syntax(format!("invalid prefixMap value '{text}'")))?;
            let id = id
                .trim()
                .parse::<u32>()
                .map_err(|_| DirError::syntax(format!("invalid prefixMap id in '{text}'")))?;
            mappings.push(PrefixMapping {
                id,
                oid_prefix: prefix.trim().to_string(),
            });
        }
        Ok(Self { mappings })
    }

    /// Returns the mappings.
    #[must_use]
    pub fn mappings(&self) -> &[PrefixMapping] {
        &self.mappings
    }

    /// Returns the number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Returns true if there are no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Maps an OID to its 32-bit attribute id.
    ///
    /// Returns `Ok(None)` when no mapping covers the OID's prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the OID is malformed.
    pub fn oid_to_id32(&self, oid: &str) -> DirResult<Option<u32>> {
        let (prefix, last) = split_oid(oid)?;
        Ok(self
            .mappings
            .iter()
            .find(|m| m.oid_prefix == prefix)
            .map(|m| (m.id << 16) | last))
    }

    /// Adds a mapping for the prefix of `oid` using the next free id.
    ///
    /// # Errors
    ///
    /// Returns an error if the OID is malformed or the id space is full.
    pub fn add_prefix_for(&mut self, oid: &str) -> DirResult<PrefixMapping> {
        let (prefix, _) = split_oid(oid)?;
        if let Some(existing) = self.mappings.iter().find(|m| m.oid_prefix == prefix) {
            return Ok(existing.clone());
        }
        let id = match self.mappings.iter().map(|m| m.id).max() {
            Some(max) if max >= 0xFFFF => {
                return Err(DirError::operations("prefix map id space exhausted"))
            }
            Some(max) => max + 1,
            None => 0,
        };
        let mapping = PrefixMapping {
            id,
            oid_prefix: prefix.to_string(),
        };
        self.mappings.push(mapping.clone());
        Ok(mapping)
    }

    /// Renders all mappings in stored form.
    #[must_use]
    pub fn to_values(&self) -> Vec<Value> {
        self.mappings.iter().map(PrefixMapping::to_value).collect()
    }
}

/// The schema partition as loaded at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySchema {
    /// DN of the schema head.
    pub schema_dn: Dn,
    /// Loaded attribute definitions.
    pub attributes: Vec<SchemaAttribute>,
    /// Loaded class definitions.
    pub classes: Vec<SchemaClass>,
    /// OID prefix mappings.
    pub prefix_map: PrefixMap,
    /// Opaque `schemaInfo` blob.
    pub schema_info: Option<Value>,
    /// DN stored in the head's `fSMORoleOwner`.
    pub role_owner: Option<Dn>,
    /// True if this replica owns the schema role.
    pub we_are_master: bool,
}

impl DirectorySchema {
    /// Creates an empty schema rooted at `schema_dn`.
    #[must_use]
    pub fn new(schema_dn: Dn) -> Self {
        Self {
            schema_dn,
            attributes: Vec::new(),
            classes: Vec::new(),
            prefix_map: PrefixMap::default(),
            schema_info: None,
            role_owner: None,
            we_are_master: false,
        }
    }

    /// Looks up an attribute by display name.
    #[must_use]
    pub fn attribute_by_name(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes
            .iter()
            .find(|a| a.ldap_display_name.eq_ignore_ascii_case(name))
    }

    /// Looks up a class by display name.
    #[must_use]
    pub fn class_by_name(&self, name: &str) -> Option<&SchemaClass> {
        self.classes
            .iter()
            .find(|c| c.ldap_display_name.eq_ignore_ascii_case(name))
    }
}
