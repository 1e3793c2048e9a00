//! Directory schema loading and the schema role guard.
//!
//! At init the schema partition named by `@ROOTDSE`'s
//! `schemaNamingContext` is read into a [`DirectorySchema`] and installed
//! in the shared schema, where its attribute definitions select syntax
//! handlers and its classes extend the subclass graph.
//!
//! Adds inside the schema partition are refused unless this replica holds
//! the schema role, that is, unless the head's `fSMORoleOwner` names the
//! `dsServiceName` of `@ROOTDSE`. An added `attributeID` or `governsID`
//! whose OID prefix is not yet mapped gets a new `prefixMap` entry, which
//! is written back to the schema head before the add proceeds.

use super::{search_unique, ANY};
use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::{Element, Message, ModFlag};
use crate::module::{Module, Next};
use crate::request::Scope;
use crate::schema::{DirectorySchema, PrefixMap, SchemaAttribute, SchemaClass};
use std::sync::Arc;

/// Registered module name.
pub const NAME: &str = "schema_fsmo";

/// DN of the stored root entry.
pub const ROOTDSE: &str = "@ROOTDSE";

const HEAD_ATTRS: [&str; 3] = ["prefixMap", "schemaInfo", "fSMORoleOwner"];

/// Loads the directory schema and guards schema additions.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchemaFsmo;

fn rootdse_dn(next: &mut Next<'_>, attr: &str) -> DirResult<Option<Dn>> {
    let attrs = [attr];
    search_unique(next, &Dn::special(ROOTDSE), Scope::Base, ANY, Some(&attrs[..]))?
        .and_then(|record| record.get_string(attr))
        .map(|text| Dn::parse(&text))
        .transpose()
}

/// Returns the schema partition DN named in `@ROOTDSE`.
///
/// # Errors
///
/// Returns the chain's search error, or `Syntax` for a malformed DN.
pub fn schema_dn(next: &mut Next<'_>) -> DirResult<Option<Dn>> {
    rootdse_dn(next, "schemaNamingContext")
}

fn required(record: &Message, attr: &str) -> DirResult<String> {
    record.get_string(attr).ok_or_else(|| {
        DirError::syntax(format!(
            "schema_fsmo: '{}' has no '{attr}' attribute",
            record.dn
        ))
    })
}

fn attribute_from(record: &Message) -> DirResult<SchemaAttribute> {
    Ok(SchemaAttribute {
        ldap_display_name: required(record, "lDAPDisplayName")?,
        attribute_id: required(record, "attributeID")?,
        attribute_syntax: record.get_string("attributeSyntax"),
        single_valued: record
            .get_string("isSingleValued")
            .is_some_and(|v| v.eq_ignore_ascii_case("TRUE")),
    })
}

fn class_from(record: &Message) -> DirResult<SchemaClass> {
    Ok(SchemaClass {
        ldap_display_name: required(record, "lDAPDisplayName")?,
        governs_id: required(record, "governsID")?,
        sub_class_of: record.get_string("subClassOf"),
    })
}

/// Reads the schema partition below the calling module.
///
/// Returns `Ok(None)`, after a warning, when no schema DN is configured or
/// the schema head does not exist.
///
/// # Errors
///
/// Returns `ConstraintViolation` if the head search is ambiguous, `Syntax`
/// for malformed definitions, or the chain's search error.
pub fn load_directory_schema(next: &mut Next<'_>) -> DirResult<Option<DirectorySchema>> {
    let Some(schema_dn) = schema_dn(next)? else {
        tracing::warn!("no schema dn present, skipping schema loading");
        return Ok(None);
    };
    let Some(head) = search_unique(next, &schema_dn, Scope::Base, ANY, Some(&HEAD_ATTRS[..]))
        .map_err(|err| err.context("schema_fsmo: schema heads found on a base search"))?
    else {
        tracing::warn!(schema_dn = %schema_dn, "no schema head present, skipping schema loading");
        return Ok(None);
    };

    let attributes = next
        .search_expr(&schema_dn, Scope::OneLevel, "(objectClass=attributeSchema)", None)
        .map_err(|err| err.context("schema_fsmo: failed to search attributeSchema objects"))?;
    let classes = next
        .search_expr(&schema_dn, Scope::OneLevel, "(objectClass=classSchema)", None)
        .map_err(|err| err.context("schema_fsmo: failed to search classSchema objects"))?;

    let mut directory = DirectorySchema::new(schema_dn);
    directory.attributes = attributes.iter().map(attribute_from).collect::<DirResult<_>>()?;
    directory.classes = classes.iter().map(class_from).collect::<DirResult<_>>()?;
    if let Some(element) = head.element("prefixMap") {
        directory.prefix_map = PrefixMap::parse(&element.values)?;
    }
    directory.schema_info = head.get_value("schemaInfo").cloned();
    directory.role_owner = head
        .get_string("fSMORoleOwner")
        .map(|text| Dn::parse(&text))
        .transpose()?;

    let service = rootdse_dn(next, "dsServiceName")?;
    directory.we_are_master = {
        let schema = next.schema().read();
        match (&directory.role_owner, &service) {
            (Some(owner), Some(service)) => owner.matches(service, &schema),
            _ => false,
        }
    };

    tracing::debug!(
        schema_dn = %directory.schema_dn,
        attributes = directory.attributes.len(),
        classes = directory.classes.len(),
        prefixes = directory.prefix_map.len(),
        we_are_master = directory.we_are_master,
        "loaded directory schema"
    );
    Ok(Some(directory))
}

enum AddCheck {
    Forward,
    Rejected,
    Map,
}

impl Module for SchemaFsmo {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.init()?;
        let loaded = next.schema().read().directory().is_some();
        if !loaded {
            if let Some(directory) = load_directory_schema(next)? {
                next.schema().write().set_directory(directory);
            }
        }
        Ok(())
    }

    fn add(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        let handle = Arc::clone(next.schema());
        let check = {
            let schema = handle.read();
            match schema.directory() {
                Some(directory) if msg.dn.is_descendant_of(&directory.schema_dn, &schema) => {
                    if directory.we_are_master {
                        AddCheck::Map
                    } else {
                        AddCheck::Rejected
                    }
                }
                _ => AddCheck::Forward,
            }
        };
        match check {
            AddCheck::Forward => return next.add(msg),
            AddCheck::Rejected => {
                tracing::error!(dn = %msg.dn, "schema_fsmo_add: we are not master: reject request");
                return Err(DirError::constraint(format!(
                    "schema_fsmo_add: we are not master: cannot add '{}'",
                    msg.dn
                )));
            }
            AddCheck::Map => {}
        }

        let oid = ["attributeID", "governsID"]
            .into_iter()
            .find_map(|attr| msg.get_string(attr).map(|oid| (attr, oid)));
        let Some((oid_attr, oid)) = oid else {
            return next.add(msg);
        };

        let pending = {
            let schema = handle.read();
            let Some(directory) = schema.directory() else {
                return Err(DirError::operations("schema_fsmo_add: directory schema vanished"));
            };
            let rejected = |err: DirError| {
                DirError::constraint(format!(
                    "schema_fsmo_add: failed to map {oid_attr}[{oid}]: {err}"
                ))
            };
            match directory.prefix_map.oid_to_id32(&oid).map_err(rejected)? {
                Some(_) => None,
                None => {
                    let mut prefix_map = directory.prefix_map.clone();
                    let mapping = prefix_map.add_prefix_for(&oid).map_err(rejected)?;
                    tracing::debug!(id = mapping.id, prefix = %mapping.oid_prefix, "adding prefix mapping");
                    Some((directory.schema_dn.clone(), prefix_map))
                }
            }
        };

        let Some((schema_dn, prefix_map)) = pending else {
            return next.add(msg);
        };
        let mut change = Message::new(schema_dn);
        change.elements.push(Element::with_values(
            "prefixMap",
            ModFlag::Replace,
            prefix_map.to_values(),
        ));
        next.modify(change).map_err(|err| {
            err.context(&format!(
                "schema_fsmo_add: failed to create prefix mapping for {oid_attr}[{oid}]"
            ))
        })?;
        next.add(msg)?;

        // Installed only once the stored map and the object both exist.
        if let Some(directory) = handle.write().directory_mut() {
            directory.prefix_map = prefix_map;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DirContext;
    use crate::error::ErrorKind;
    use crate::modules::testing;

    const SCHEMA: &str = "CN=Schema,CN=Configuration,DC=test";
    const SERVICE: &str = "CN=NTDS Settings,CN=DC1,DC=test";

    fn provision(ctx: &mut DirContext, owner: &str) {
        let mut rootdse = Message::new(Dn::special(ROOTDSE));
        rootdse.add_string("schemaNamingContext", SCHEMA);
        rootdse.add_string("dsServiceName", SERVICE);
        ctx.add(rootdse).unwrap();

        let mut head = Message::new(Dn::parse(SCHEMA).unwrap());
        head.add_string("objectClass", "dMD");
        head.add_string("prefixMap", "0:2.5.4");
        head.add_string("prefixMap", "1:1.2.840.113556.1.4");
        head.add_string("fSMORoleOwner", owner);
        ctx.add(head).unwrap();

        let mut attr = Message::new(Dn::parse(&format!("CN=SAM-Account-Name,{SCHEMA}")).unwrap());
        attr.add_string("objectClass", "attributeSchema");
        attr.add_string("lDAPDisplayName", "sAMAccountName");
        attr.add_string("attributeID", "1.2.840.113556.1.4.221");
        attr.add_string("attributeSyntax", "2.5.5.12");
        attr.add_string("isSingleValued", "TRUE");
        ctx.add(attr).unwrap();

        let mut class = Message::new(Dn::parse(&format!("CN=Computer,{SCHEMA}")).unwrap());
        class.add_string("objectClass", "classSchema");
        class.add_string("lDAPDisplayName", "computer");
        class.add_string("governsID", "1.2.840.113556.1.5.9");
        class.add_string("subClassOf", "user");
        ctx.add(class).unwrap();
    }

    /// Provisions a plain store, then reopens it with the module on top.
    fn reopen(owner: &str) -> DirContext {
        let store: Arc<dyn dirdb_storage::KvStore> = Arc::new(dirdb_storage::MemoryStore::new());
        let build = |modules: Vec<Box<dyn Module>>| {
            testing::context_over(Arc::clone(&store), modules)
        };
        let mut plain = build(Vec::new());
        provision(&mut plain, owner);
        build(vec![Box::new(SchemaFsmo)])
    }

    #[test]
    fn init_loads_the_directory_schema() {
        let ctx = reopen(SERVICE);
        let schema = ctx.schema().read();
        let directory = schema.directory().unwrap();
        assert!(directory.we_are_master);
        assert_eq!(directory.attributes.len(), 1);
        assert_eq!(directory.classes.len(), 1);
        assert_eq!(directory.prefix_map.len(), 2);
        assert!(schema.is_case_insensitive("sAMAccountName"));
        assert!(schema.subclass_closure("user").iter().any(|c| c == "computer"));
    }

    #[test]
    fn missing_schema_dn_skips_loading() {
        let ctx = testing::context(vec![Box::new(SchemaFsmo)]);
        assert!(ctx.schema().read().directory().is_none());
    }

    #[test]
    fn non_master_cannot_add_schema_objects() {
        let mut ctx = reopen("CN=NTDS Settings,CN=DC2,DC=test");
        assert!(!ctx.schema().read().directory().unwrap().we_are_master);

        let mut attr = Message::new(Dn::parse(&format!("CN=Foo,{SCHEMA}")).unwrap());
        attr.add_string("attributeID", "2.5.4.99");
        let err = ctx.add(attr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let mut user = Message::new(Dn::parse("CN=alice,DC=test").unwrap());
        user.add_string("cn", "alice");
        ctx.add(user).unwrap();
    }

    #[test]
    fn unmapped_prefix_is_added_and_persisted() {
        let mut ctx = reopen(SERVICE);
        let mut attr = Message::new(Dn::parse(&format!("CN=Foo,{SCHEMA}")).unwrap());
        attr.add_string("objectClass", "attributeSchema");
        attr.add_string("attributeID", "1.3.6.1.4.1.7165.4.1.1");
        ctx.add(attr).unwrap();

        let head = ctx
            .search(&Dn::parse(SCHEMA).unwrap(), Scope::Base, None, Some(&["prefixMap"]))
            .unwrap()
            .remove(0);
        let values = &head.element("prefixMap").unwrap().values;
        assert_eq!(values.len(), 3);
        assert_eq!(values[2].to_string_lossy(), "2:1.3.6.1.4.1.7165.4.1");
        assert_eq!(
            ctx.schema()
                .read()
                .directory()
                .unwrap()
                .prefix_map
                .oid_to_id32("1.3.6.1.4.1.7165.4.1.1")
                .unwrap(),
            Some((2 << 16) | 1)
        );
    }

    #[test]
    fn failed_add_leaves_the_prefix_map_unchanged() {
        let mut ctx = reopen(SERVICE);
        let mut attr = Message::new(Dn::parse(&format!("CN=SAM-Account-Name,{SCHEMA}")).unwrap());
        attr.add_string("objectClass", "attributeSchema");
        attr.add_string("attributeID", "1.3.6.1.4.1.7165.4.1.1");
        let err = ctx.add(attr).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let head = ctx
            .search(&Dn::parse(SCHEMA).unwrap(), Scope::Base, None, Some(&["prefixMap"]))
            .unwrap()
            .remove(0);
        assert_eq!(head.element("prefixMap").unwrap().values.len(), 2);
        let schema = ctx.schema().read();
        let prefix_map = &schema.directory().unwrap().prefix_map;
        assert_eq!(prefix_map.len(), 2);
        assert_eq!(prefix_map.oid_to_id32("1.3.6.1.4.1.7165.4.1.1").unwrap(), None);
    }
}
