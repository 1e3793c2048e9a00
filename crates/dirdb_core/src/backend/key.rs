//! Key derivation.
//!
//! Every record lives under `DN=` followed by its folded DN. Control
//! records keep their raw special body, so their keys start with `DN=@`.
//! Index records are control records named `@INDEX:<ATTR>:<value>`.

use crate::dn::Dn;
use crate::error::DirResult;
use crate::schema::Schema;
use crate::value::Value;

/// Prefix of every record key.
pub(crate) const RECORD_PREFIX: &[u8] = b"DN=";
/// Prefix of every control-record key.
pub(crate) const CONTROL_PREFIX: &[u8] = b"DN=@";
/// Prefix of every index-record key.
pub(crate) const INDEX_KEY_PREFIX: &[u8] = b"DN=@INDEX:";
/// Body prefix of index-record DNs.
pub(crate) const INDEX_PREFIX: &str = "@INDEX:";
/// Attribute holding the DN list of an index record.
pub(crate) const IDX_ATTR: &str = "@IDX";

/// Sequence-number control record.
pub const BASEINFO: &str = "@BASEINFO";
/// Attribute-flags control record.
pub const ATTRIBUTES: &str = "@ATTRIBUTES";
/// Index-definition control record.
pub const INDEXLIST: &str = "@INDEXLIST";
/// Attribute of `@INDEXLIST` naming an indexed attribute.
pub const IDXATTR: &str = "@IDXATTR";
/// Subclass-graph control record.
pub const SUBCLASSES: &str = "@SUBCLASSES";
/// Default module-list control record.
pub const MODULES: &str = "@MODULES";
/// Attribute of `@MODULES` holding the comma-separated list.
pub const MODULES_LIST: &str = "@LIST";

/// Returns the storage key for `dn`.
pub(crate) fn record_key(schema: &Schema, dn: &Dn) -> Vec<u8> {
    let mut key = RECORD_PREFIX.to_vec();
    key.extend_from_slice(&dn.fold(schema).to_stored());
    key
}

/// Returns the storage key of the control record `name`.
pub(crate) fn control_key(name: &str) -> Vec<u8> {
    let mut key = RECORD_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

/// Returns the text stored in `@IDX` for `dn`: its folded linearization.
pub(crate) fn index_entry(schema: &Schema, dn: &Dn) -> Value {
    Value::from(dn.fold(schema).linearize())
}

/// Returns the DN of the index record for `attr=value`.
///
/// The attribute name is always uppercased. The value is canonicalised by
/// the attribute's syntax, and the whole body is uppercased only for
/// case-insensitive attributes, so binary values keep their exact bytes.
pub(crate) fn index_dn(schema: &Schema, attr: &str, value: &Value) -> DirResult<Dn> {
    let handler = schema.syntax(attr);
    let canonical = handler.canonicalise(schema, value)?;
    let mut body = format!("{INDEX_PREFIX}{}:", attr.to_ascii_uppercase()).into_bytes();
    body.extend_from_slice(canonical.as_bytes());
    if handler.is_case_insensitive() {
        body.make_ascii_uppercase();
    }
    Ok(Dn::special(body))
}

/// Returns the storage key of the index record for `attr=value`.
pub(crate) fn index_key(schema: &Schema, attr: &str, value: &Value) -> DirResult<Vec<u8>> {
    Ok(record_key(schema, &index_dn(schema, attr, value)?))
}

/// Returns true for control-record DNs that change how records are
/// indexed or matched.
pub(crate) fn is_schema_control(dn: &Dn) -> bool {
    dn.is_special_named(INDEXLIST) || dn.is_special_named(ATTRIBUTES) || dn.is_special_named(SUBCLASSES)
}
