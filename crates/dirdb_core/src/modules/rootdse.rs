//! The root entry.
//!
//! A base-scope search of the null DN is answered from the stored
//! `@ROOTDSE` record, augmented with attributes that are computed on every
//! request rather than stored: the current time, the registered controls
//! and naming contexts, the highest committed sequence number and, when
//! named explicitly, schema counters and role information.

use super::schema_fsmo::{self, ROOTDSE};
use crate::dn::Dn;
use crate::error::{DirError, DirResult, ErrorKind};
use crate::filter::Filter;
use crate::message::Message;
use crate::module::{Module, Next};
use crate::request::{Scope, SearchRequest, SequenceKind};
use crate::timestring::now_timestring;

/// Registered module name.
pub const NAME: &str = "rootdse";

/// Synthesises the root entry and collects registrations.
#[derive(Debug, Default, Clone)]
pub struct RootDse {
    controls: Vec<String>,
    partitions: Vec<Dn>,
}

impl RootDse {
    /// Creates the module with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registered control OIDs.
    #[must_use]
    pub fn controls(&self) -> &[String] {
        &self.controls
    }

    /// Returns the registered naming contexts.
    #[must_use]
    pub fn partitions(&self) -> &[Dn] {
        &self.partitions
    }

    fn add_dynamic(&self, msg: &mut Message, req: &SearchRequest, next: &mut Next<'_>) {
        msg.dn = Dn::root();
        for attr in ["distinguishedName", "cn", "name"] {
            msg.remove(attr);
        }

        if req.wants("currentTime") {
            msg.add_string("currentTime", &now_timestring());
        }
        if req.wants("supportedControl") {
            for control in &self.controls {
                msg.add_string("supportedControl", control);
            }
        }
        if req.wants("namingContexts") {
            for partition in &self.partitions {
                msg.add_string("namingContexts", &partition.linearize());
            }
        }
        if req.wants("highestCommittedUSN") {
            match next.sequence_number(SequenceKind::HighestSeq) {
                Ok(seq) => msg.add_string("highestCommittedUSN", &seq.to_string()),
                Err(err) => tracing::warn!(error = %err, "cannot read highestCommittedUSN"),
            }
        }

        let schema = next.schema().read();
        if let Some(directory) = schema.directory() {
            let counters = [
                ("dsSchemaAttrCount", directory.attributes.len()),
                ("dsSchemaClassCount", directory.classes.len()),
                ("dsSchemaPrefixCount", directory.prefix_map.len()),
            ];
            for (attr, count) in counters {
                if req.explicitly_requests(attr) {
                    msg.add_string(attr, &count.to_string());
                }
            }
            if req.explicitly_requests("validFSMOs") && directory.we_are_master {
                let schema_dn = directory.schema_dn.linearize();
                if !schema_dn.is_empty() {
                    msg.add_string("validFSMOs", &schema_dn);
                }
            }
        }
        if req.explicitly_requests("vendorVersion") {
            msg.add_string("vendorVersion", concat!("dirdb ", env!("CARGO_PKG_VERSION")));
        }
    }
}

impl Module for RootDse {
    fn name(&self) -> &str {
        NAME
    }

    fn search(&mut self, req: &SearchRequest, next: &mut Next<'_>) -> DirResult<Vec<Message>> {
        if req.scope != Scope::Base || !req.base.is_root() {
            return next.search(req);
        }
        if req.explicitly_requests("netlogon") {
            return Ok(Vec::new());
        }

        let mut down = SearchRequest::new(Dn::special(ROOTDSE), Scope::Base, Filter::everything());
        down.attrs = req.attrs.clone();
        let mut found = match next.search(&down) {
            Ok(found) => found,
            Err(err) if err.kind() == ErrorKind::NotFound => vec![Message::new(Dn::special(ROOTDSE))],
            Err(err) => return Err(err),
        };
        for msg in &mut found {
            self.add_dynamic(msg, req, next);
        }
        Ok(found)
    }

    fn modify(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if !msg.dn.is_root() {
            return next.modify(msg);
        }
        if !msg.has_attribute("schemaUpdateNow") {
            return Err(DirError::operations(
                "rootdse: a modify of the root entry must carry schemaUpdateNow",
            ));
        }
        if schema_fsmo::schema_dn(next)?.is_none() {
            tracing::warn!("rootdse_modify: no schema dn present, skipping schema reload");
            return Ok(());
        }
        match schema_fsmo::load_directory_schema(next)? {
            Some(directory) => next.schema().write().set_directory(directory),
            None => tracing::warn!("rootdse_modify: schema head missing, keeping the loaded schema"),
        }
        Ok(())
    }

    fn register_control(&mut self, oid: &str, _next: &mut Next<'_>) -> DirResult<()> {
        self.controls.push(oid.to_string());
        Ok(())
    }

    fn register_partition(&mut self, dn: &Dn, _next: &mut Next<'_>) -> DirResult<()> {
        self.partitions.push(dn.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DirContext;
    use crate::message::{Element, ModFlag};
    use crate::modules::testing;
    use crate::value::Value;

    fn context() -> DirContext {
        testing::context(vec![Box::new(RootDse::new())])
    }

    fn root(ctx: &mut DirContext, attrs: Option<&[&str]>) -> Vec<Message> {
        ctx.search(&Dn::root(), Scope::Base, None, attrs).unwrap()
    }

    #[test]
    fn computed_attributes_need_no_stored_record() {
        let mut ctx = context();
        let found = root(&mut ctx, None);
        assert_eq!(found.len(), 1);
        assert!(found[0].dn.is_root());
        assert!(found[0].has_attribute("currentTime"));
        assert!(found[0].has_attribute("highestCommittedUSN"));
    }

    #[test]
    fn stored_attributes_are_merged_and_identity_dropped() {
        let mut ctx = context();
        let mut stored = Message::new(Dn::special(ROOTDSE));
        stored.add_string("cn", "rootdse");
        stored.add_string("defaultNamingContext", "DC=test");
        ctx.add(stored).unwrap();

        let entry = root(&mut ctx, None).remove(0);
        assert_eq!(entry.get_string("defaultNamingContext").unwrap(), "DC=test");
        assert!(!entry.has_attribute("cn"));

        let only = root(&mut ctx, Some(&["currentTime"])).remove(0);
        assert!(!only.has_attribute("defaultNamingContext"));
        assert!(!only.has_attribute("highestCommittedUSN"));
    }

    #[test]
    fn registrations_are_reported() {
        let mut ctx = context();
        ctx.register_control("1.2.840.113556.1.4.319").unwrap();
        ctx.register_partition(&Dn::parse("DC=test").unwrap()).unwrap();
        let entry = root(&mut ctx, Some(&["*"])).remove(0);
        assert_eq!(
            entry.get_string("supportedControl").unwrap(),
            "1.2.840.113556.1.4.319"
        );
        assert_eq!(entry.get_string("namingContexts").unwrap(), "DC=test");
    }

    #[test]
    fn explicit_only_attributes() {
        let mut ctx = context();
        assert!(!root(&mut ctx, None).remove(0).has_attribute("vendorVersion"));
        let entry = root(&mut ctx, Some(&["vendorVersion"])).remove(0);
        assert!(entry.get_string("vendorVersion").unwrap().starts_with("dirdb "));
        assert!(!entry.has_attribute("dsSchemaAttrCount"));
    }

    #[test]
    fn netlogon_requests_get_no_entry() {
        let mut ctx = context();
        assert!(root(&mut ctx, Some(&["netlogon"])).is_empty());
    }

    #[test]
    fn other_searches_pass_through() {
        let mut ctx = context();
        let mut msg = Message::new(Dn::parse("cn=a,dc=test").unwrap());
        msg.add_string("cn", "a");
        ctx.add(msg).unwrap();
        let found = ctx.search(&Dn::root(), Scope::Subtree, Some("(cn=a)"), None).unwrap();
        assert_eq!(found.len(), 1);
        assert!(!found[0].has_attribute("currentTime"));
    }

    #[test]
    fn root_modify_requires_schema_update_now() {
        let mut ctx = context();
        let mut change = Message::new(Dn::root());
        change.elements.push(Element::with_values("description", ModFlag::Replace, vec![Value::from("x")]));
        assert_eq!(ctx.modify(change).unwrap_err().kind(), ErrorKind::Operations);

        let mut update = Message::new(Dn::root());
        update.elements.push(Element::with_values("schemaUpdateNow", ModFlag::Add, vec![Value::from("1")]));
        ctx.modify(update).unwrap();
    }
}
