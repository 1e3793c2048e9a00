//! Stock policy modules.
//!
//! Each module is registered under the name it is listed by in the
//! `modules` connect option or the `@MODULES` record.

pub mod instancetype;
pub mod ldap_map;
pub mod rootdse;
pub mod samldb;
pub mod schema_fsmo;
pub mod subtree_rename;
pub mod timestamps;

use crate::dn::Dn;
use crate::error::{DirError, DirResult, ErrorKind};
use crate::message::Message;
use crate::module::{Module, Next};
use crate::registry::{ModuleFactory, Registry};
use crate::request::Scope;
use crate::value::Value;

/// Filter text matching every record.
pub(crate) const ANY: &str = "(distinguishedName=*)";

/// Registers every stock module with `registry`.
///
/// # Errors
///
/// Returns `Conflict` if a stock name is already taken.
pub(crate) fn register_stock(registry: &mut Registry) -> DirResult<()> {
    registry.register_module(rootdse::NAME, factory(rootdse::RootDse::new))?;
    registry.register_module(samldb::NAME, factory(samldb::SamLdb::new))?;
    registry.register_module(timestamps::NAME, factory(|| timestamps::Timestamps))?;
    registry.register_module(schema_fsmo::NAME, factory(|| schema_fsmo::SchemaFsmo))?;
    registry.register_module(instancetype::NAME, factory(|| instancetype::InstanceType))?;
    registry.register_module(ldap_map::ENTRYUUID, factory(ldap_map::LdapMap::entryuuid))?;
    registry.register_module(ldap_map::NSUNIQUEID, factory(ldap_map::LdapMap::nsuniqueid))?;
    registry.register_module(subtree_rename::NAME, factory(|| subtree_rename::SubtreeRename))
}

fn factory<M: Module + 'static>(build: fn() -> M) -> ModuleFactory {
    Box::new(move || Box::new(build()) as Box<dyn Module>)
}

/// Searches below the calling module and returns the only hit.
///
/// Returns `Ok(None)` when nothing matches or the base does not exist,
/// and `ConstraintViolation` when more than one record matches.
pub(crate) fn search_unique(
    next: &mut Next<'_>,
    base: &Dn,
    scope: Scope,
    expression: &str,
    attrs: Option<&[&str]>,
) -> DirResult<Option<Message>> {
    let mut found = match next.search_expr(base, scope, expression, attrs) {
        Ok(found) => found,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        n => Err(DirError::constraint(format!(
            "expected one record for '{expression}' under '{base}', found {n}"
        ))),
    }
}

/// Returns the single value of `attr`, rejecting multi-valued elements.
pub(crate) fn single_value<'m>(msg: &'m Message, attr: &str) -> DirResult<Option<&'m Value>> {
    let values: Vec<_> = msg
        .elements
        .iter()
        .filter(|e| e.is_named(attr))
        .flat_map(|e| e.values.iter())
        .collect();
    match values.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        _ => Err(DirError::constraint(format!(
            "the '{attr}' attribute of '{}' must have exactly one value",
            msg.dn
        ))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_modules_are_registered() {
        let registry = Registry::with_defaults();
        for name in [
            "rootdse",
            "samldb",
            "timestamps",
            "schema_fsmo",
            "instancetype",
            "entryuuid",
            "nsuniqueid",
            "subtree_rename",
        ] {
            assert!(registry.has_module(name), "{name} missing");
        }
    }

    #[test]
    fn single_value_rejects_many() {
        let mut msg = Message::new(Dn::parse("cn=a").unwrap());
        assert_eq!(single_value(&msg, "x").unwrap(), None);
        msg.add_string("x", "1");
        assert_eq!(single_value(&msg, "X").unwrap(), Some(&Value::from("1")));
        msg.add_string("x", "2");
        assert_eq!(
            single_value(&msg, "x").unwrap_err().kind(),
            ErrorKind::ConstraintViolation
        );
    }
}
