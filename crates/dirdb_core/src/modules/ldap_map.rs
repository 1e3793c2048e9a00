//! Attribute mapping onto a generic LDAP backend.
//!
//! Directory-server attributes are stored under the names a stock LDAP
//! server uses for the same concept. `objectGUID` becomes `entryUUID` (or
//! `nsuniqueid` for the Netscape-style preset), update sequence numbers are
//! stored as change sequence numbers or timestamps, and a few names are
//! moved out of the way of the server's own operational attributes.
//!
//! Messages are mapped on the way down and replies on the way back up.
//! Filters and attribute lists are rewritten so searches in local terms
//! match remote records. The DN pseudo-attributes (`dn` and
//! `distinguishedName`) are never mapped in filters or attribute lists,
//! because the backend computes them.

use crate::dn::Dn;
use crate::error::{DirError, DirResult, ErrorKind};
use crate::filter::Filter;
use crate::message::{Element, Message, ModFlag};
use crate::module::{Module, Next};
use crate::request::{Scope, SearchRequest, SequenceKind};
use crate::schema::Schema;
use crate::syntax::{self, guid_to_binary, guid_to_string, SyntaxHandler};
use crate::timestring::{parse_timestring, timestring};
use crate::value::Value;

/// Registered name of the `entryUUID` preset.
pub const ENTRYUUID: &str = "entryuuid";
/// Registered name of the `nsuniqueid` preset.
pub const NSUNIQUEID: &str = "nsuniqueid";

/// Converts one value between the local and remote forms.
pub type Convert = fn(&Schema, &Value) -> DirResult<Value>;

/// How one local attribute is stored remotely.
#[derive(Debug, Clone, Copy)]
pub enum AttributeMap {
    /// Same values, different name.
    Rename {
        /// Local name.
        local: &'static str,
        /// Remote name.
        remote: &'static str,
    },
    /// Values are converted in both directions.
    Convert {
        /// Local name.
        local: &'static str,
        /// Remote name.
        remote: &'static str,
        /// Local to remote.
        to_remote: Convert,
        /// Remote to local.
        to_local: Convert,
    },
}

impl AttributeMap {
    /// Returns the local attribute name.
    #[must_use]
    pub const fn local(&self) -> &'static str {
        match self {
            Self::Rename { local, .. } | Self::Convert { local, .. } => local,
        }
    }

    /// Returns the remote attribute name.
    #[must_use]
    pub const fn remote(&self) -> &'static str {
        match self {
            Self::Rename { remote, .. } | Self::Convert { remote, .. } => remote,
        }
    }

    fn to_remote(&self, schema: &Schema, value: &Value) -> DirResult<Value> {
        match self {
            Self::Rename { .. } => Ok(value.clone()),
            Self::Convert { to_remote, .. } => to_remote(schema, value),
        }
    }

    fn to_local(&self, schema: &Schema, value: &Value) -> DirResult<Value> {
        match self {
            Self::Rename { .. } => Ok(value.clone()),
            Self::Convert { to_local, .. } => to_local(schema, value),
        }
    }
}

/// A complete mapping preset.
///
/// Attributes not named in `attributes` are stored unchanged.
#[derive(Debug)]
pub struct MapTable {
    /// Per-attribute rules.
    pub attributes: &'static [AttributeMap],
    /// `objectClass` value renames as `(local, remote)` pairs.
    pub objectclasses: &'static [(&'static str, &'static str)],
    /// Local attributes the remote server hides from `*` searches.
    pub wildcard: &'static [&'static str],
}

const fn rename(local: &'static str, remote: &'static str) -> AttributeMap {
    AttributeMap::Rename { local, remote }
}

const fn convert(
    local: &'static str,
    remote: &'static str,
    to_remote: Convert,
    to_local: Convert,
) -> AttributeMap {
    AttributeMap::Convert {
        local,
        remote,
        to_remote,
        to_local,
    }
}

/// The `entryUUID` preset, for OpenLDAP-style servers.
pub static ENTRYUUID_TABLE: MapTable = MapTable {
    attributes: &[
        convert("objectGUID", "entryUUID", guid_always_string, encode_guid),
        convert("invocationId", "invocationId", guid_always_string, encode_guid),
        convert("objectSid", "objectSid", sid_always_binary, copy),
        rename("name", "samba4RDN"),
        rename("whenCreated", "createTimestamp"),
        rename("whenChanged", "modifyTimestamp"),
        rename("objectClasses", "samba4ObjectClasses"),
        rename("dITContentRules", "samba4DITContentRules"),
        rename("attributeTypes", "samba4AttributeTypes"),
        convert("objectCategory", "objectCategory", category_always_dn, copy),
        rename("distinguishedName", "entryDN"),
        convert("groupType", "groupType", normalise_to_signed32, copy),
        convert("sAMAccountType", "sAMAccountType", normalise_to_signed32, copy),
        convert("usnChanged", "entryCSN", usn_to_entry_csn, entry_csn_to_usn),
        convert("usnCreated", "createTimestamp", usn_to_timestamp, timestamp_to_usn),
        rename("sambaPassword", "userPassword"),
    ],
    objectclasses: &[("subSchema", "samba4SubSchema")],
    wildcard: &[
        "objectGUID",
        "whenCreated",
        "whenChanged",
        "usnCreated",
        "usnChanged",
        "memberOf",
    ],
};

/// The `nsuniqueid` preset, for Netscape-derived servers.
pub static NSUNIQUEID_TABLE: MapTable = MapTable {
    attributes: &[
        convert("objectGUID", "nsuniqueid", guid_ns_string, encode_ns_guid),
        convert("objectSid", "objectSid", sid_always_binary, copy),
        rename("whenCreated", "createTimestamp"),
        rename("whenChanged", "modifyTimestamp"),
        rename("sambaPassword", "userPassword"),
        rename("distinguishedName", "entryDN"),
        convert("objectCategory", "objectCategory", category_always_dn, copy),
        convert("groupType", "groupType", normalise_to_signed32, copy),
        convert("sAMAccountType", "sAMAccountType", normalise_to_signed32, copy),
        convert("usnChanged", "modifyTimestamp", usn_to_timestamp, timestamp_to_usn),
        convert("usnCreated", "createTimestamp", usn_to_timestamp, timestamp_to_usn),
    ],
    objectclasses: &[],
    wildcard: &[
        "objectGUID",
        "whenCreated",
        "whenChanged",
        "usnCreated",
        "usnChanged",
    ],
};

fn copy(_schema: &Schema, value: &Value) -> DirResult<Value> {
    Ok(value.clone())
}

fn is_guid_text(value: &Value) -> bool {
    value.len() >= 32 && value.as_str().is_some()
}

fn guid_always_string(_schema: &Schema, value: &Value) -> DirResult<Value> {
    if is_guid_text(value) {
        return Ok(value.clone());
    }
    Ok(Value::from(guid_to_string(value.as_bytes())?))
}

fn encode_guid(_schema: &Schema, value: &Value) -> DirResult<Value> {
    Ok(Value::from(guid_to_binary(&value.to_string_lossy())?))
}

/// Regroups the 32 hex digits of a GUID as `8-8-8-8`.
fn guid_ns_string(schema: &Schema, value: &Value) -> DirResult<Value> {
    let text = guid_always_string(schema, value)?.to_string_lossy();
    let digits: String = text.chars().filter(|c| *c != '-').collect();
    if digits.len() != 32 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DirError::syntax(format!("invalid GUID '{text}'")));
    }
    Ok(Value::from(format!(
        "{}-{}-{}-{}",
        &digits[0..8],
        &digits[8..16],
        &digits[16..24],
        &digits[24..32]
    )))
}

fn encode_ns_guid(_schema: &Schema, value: &Value) -> DirResult<Value> {
    let text = value.to_string_lossy();
    let digits: String = text.chars().filter(|c| *c != '-').collect();
    if digits.len() != 32 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DirError::syntax(format!("invalid nsuniqueid '{text}'")));
    }
    let standard = format!(
        "{}-{}-{}-{}-{}",
        &digits[0..8],
        &digits[8..12],
        &digits[12..16],
        &digits[16..20],
        &digits[20..32]
    );
    Ok(Value::from(guid_to_binary(&standard)?))
}

fn sid_always_binary(schema: &Schema, value: &Value) -> DirResult<Value> {
    syntax::SID.canonicalise(schema, value)
}

fn category_always_dn(schema: &Schema, value: &Value) -> DirResult<Value> {
    syntax::DN.canonicalise(schema, value)
}

fn normalise_to_signed32(_schema: &Schema, value: &Value) -> DirResult<Value> {
    let text = value.to_string_lossy();
    let number: i64 = text
        .trim()
        .parse()
        .map_err(|_| DirError::syntax(format!("invalid integer '{text}'")))?;
    match u32::try_from(number) {
        Ok(unsigned) if unsigned >= 0x8000_0000 => {
            Ok(Value::from(i32::from_ne_bytes(unsigned.to_ne_bytes()).to_string()))
        }
        _ => Ok(value.clone()),
    }
}

fn parse_usn(value: &Value) -> DirResult<u64> {
    let text = value.to_string_lossy();
    text.trim()
        .parse()
        .map_err(|_| DirError::syntax(format!("invalid sequence number '{text}'")))
}

fn usn_seconds(usn: u64) -> i64 {
    i64::try_from(usn >> 24).unwrap_or(i64::MAX)
}

fn seconds_usn(seconds: i64) -> DirResult<u64> {
    u64::try_from(seconds)
        .map(|t| t << 24)
        .map_err(|_| DirError::syntax(format!("time {seconds} predates the epoch")))
}

fn usn_to_entry_csn(_schema: &Schema, value: &Value) -> DirResult<Value> {
    let usn = parse_usn(value)?;
    let time = timestring(usn_seconds(usn))?;
    Ok(Value::from(format!("{time}#{:06x}#00#000000", usn & 0x00FF_FFFF)))
}

/// Folds a change sequence number back into a sequence number.
///
/// # Errors
///
/// Returns `Syntax` for malformed input.
pub fn entry_csn_usn(text: &str) -> DirResult<u64> {
    let mut parts = text.split('#');
    let time = parts.next().unwrap_or_default();
    let count = parts
        .next()
        .ok_or_else(|| DirError::syntax(format!("invalid entryCSN '{text}'")))?;
    let count = u64::from_str_radix(count, 16)
        .map_err(|_| DirError::syntax(format!("invalid entryCSN counter in '{text}'")))?;
    Ok(seconds_usn(parse_timestring(time)?)? | (count & 0x00FF_FFFF))
}

fn entry_csn_to_usn(_schema: &Schema, value: &Value) -> DirResult<Value> {
    Ok(Value::from(entry_csn_usn(&value.to_string_lossy())?.to_string()))
}

fn usn_to_timestamp(_schema: &Schema, value: &Value) -> DirResult<Value> {
    Ok(Value::from(timestring(usn_seconds(parse_usn(value)?))?))
}

fn timestamp_to_usn(_schema: &Schema, value: &Value) -> DirResult<Value> {
    let seconds = parse_timestring(&value.to_string_lossy())?;
    Ok(Value::from(seconds_usn(seconds)?.to_string()))
}

fn is_dn_attribute(attr: &str) -> bool {
    attr.eq_ignore_ascii_case("dn") || attr.eq_ignore_ascii_case("distinguishedName")
}

impl MapTable {
    fn by_local(&self, name: &str) -> Option<&AttributeMap> {
        self.attributes.iter().find(|a| a.local().eq_ignore_ascii_case(name))
    }

    fn is_remote_name(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.remote().eq_ignore_ascii_case(name))
    }

    /// Returns the remote name of a local attribute.
    #[must_use]
    pub fn remote_name(&self, local: &str) -> String {
        self.by_local(local)
            .map_or_else(|| local.to_string(), |a| a.remote().to_string())
    }

    fn class_to_remote(&self, value: &Value) -> Value {
        let text = value.to_string_lossy();
        self.objectclasses
            .iter()
            .find(|(local, _)| local.eq_ignore_ascii_case(&text))
            .map_or_else(|| value.clone(), |(_, remote)| Value::from(*remote))
    }

    fn class_to_local(&self, value: &Value) -> Value {
        let text = value.to_string_lossy();
        self.objectclasses
            .iter()
            .find(|(_, remote)| remote.eq_ignore_ascii_case(&text))
            .map_or_else(|| value.clone(), |(local, _)| Value::from(*local))
    }

    fn classes(&self, element: Element, map: impl Fn(&Value) -> Value) -> Element {
        if !element.is_named("objectClass") || self.objectclasses.is_empty() {
            return element;
        }
        let values = element.values.iter().map(map).collect();
        Element::with_values(element.name, element.flags, values)
    }

    /// Maps an outgoing add or modify message.
    ///
    /// When two local attributes share a remote name, the first one in the
    /// message wins for plain records.
    ///
    /// # Errors
    ///
    /// Returns the first conversion error.
    pub fn message_to_remote(&self, schema: &Schema, msg: Message) -> DirResult<Message> {
        let mut out = Message::new(msg.dn.clone());
        for element in msg.elements {
            let Some(rule) = self.by_local(&element.name) else {
                out.elements.push(self.classes(element, |v| self.class_to_remote(v)));
                continue;
            };
            let remote = rule.remote();
            if element.flags == ModFlag::None && out.has_attribute(remote) {
                tracing::debug!(attr = %element.name, remote, "remote attribute already set, skipping");
                continue;
            }
            let values = element
                .values
                .iter()
                .map(|v| rule.to_remote(schema, v))
                .collect::<DirResult<Vec<_>>>()
                .map_err(|err| err.context(&format!("mapping '{}'", element.name)))?;
            out.elements.push(Element::with_values(remote, element.flags, values));
        }
        Ok(out)
    }

    /// Maps a stored record back into local terms.
    ///
    /// Values that fail to convert are dropped.
    #[must_use]
    pub fn message_to_local(&self, schema: &Schema, msg: Message) -> Message {
        let mut out = Message::new(msg.dn.clone());
        for rule in self.attributes {
            let Some(element) = msg.element(rule.remote()) else {
                continue;
            };
            let values: Vec<Value> = element
                .values
                .iter()
                .filter_map(|v| match rule.to_local(schema, v) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::debug!(attr = rule.local(), error = %err, "dropping unmappable value");
                        None
                    }
                })
                .collect();
            if !values.is_empty() {
                out.elements.push(Element::with_values(rule.local(), element.flags, values));
            }
        }
        for element in msg.elements {
            if !self.is_remote_name(&element.name) {
                out.elements.push(self.classes(element, |v| self.class_to_local(v)));
            }
        }
        out
    }

    fn value_to_remote(&self, schema: &Schema, attr: &str, value: &Value) -> (String, Value) {
        if attr.eq_ignore_ascii_case("objectClass") {
            return (attr.to_string(), self.class_to_remote(value));
        }
        match self.by_local(attr) {
            Some(_) if is_dn_attribute(attr) => (attr.to_string(), value.clone()),
            Some(rule) => {
                let mapped = rule.to_remote(schema, value).unwrap_or_else(|err| {
                    tracing::debug!(attr, error = %err, "filter value left unconverted");
                    value.clone()
                });
                (rule.remote().to_string(), mapped)
            }
            None => (attr.to_string(), value.clone()),
        }
    }

    fn attr_to_remote(&self, attr: &str) -> String {
        if is_dn_attribute(attr) {
            attr.to_string()
        } else {
            self.remote_name(attr)
        }
    }

    /// Rewrites a filter in remote terms.
    #[must_use]
    pub fn filter_to_remote(&self, schema: &Schema, filter: &Filter) -> Filter {
        match filter {
            Filter::And(parts) => Filter::And(parts.iter().map(|f| self.filter_to_remote(schema, f)).collect()),
            Filter::Or(parts) => Filter::Or(parts.iter().map(|f| self.filter_to_remote(schema, f)).collect()),
            Filter::Not(inner) => Filter::Not(Box::new(self.filter_to_remote(schema, inner))),
            Filter::Equality { attr, value } => {
                let (attr, value) = self.value_to_remote(schema, attr, value);
                Filter::Equality { attr, value }
            }
            Filter::GreaterOrEqual { attr, value } => {
                let (attr, value) = self.value_to_remote(schema, attr, value);
                Filter::GreaterOrEqual { attr, value }
            }
            Filter::LessOrEqual { attr, value } => {
                let (attr, value) = self.value_to_remote(schema, attr, value);
                Filter::LessOrEqual { attr, value }
            }
            Filter::Approx { attr, value } => {
                let (attr, value) = self.value_to_remote(schema, attr, value);
                Filter::Approx { attr, value }
            }
            Filter::Substring {
                attr,
                initial,
                any,
                end,
            } => Filter::Substring {
                attr: self.attr_to_remote(attr),
                initial: initial.clone(),
                any: any.clone(),
                end: end.clone(),
            },
            Filter::Present { attr } => Filter::Present {
                attr: self.attr_to_remote(attr),
            },
        }
    }

    /// Rewrites a requested attribute list in remote terms.
    ///
    /// A request for everything also names the attributes the remote server
    /// would otherwise hide.
    #[must_use]
    pub fn attrs_to_remote(&self, req: &SearchRequest) -> Option<Vec<String>> {
        let mut remote: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if !remote.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
                remote.push(name);
            }
        };
        if req.wants_all() {
            push("*".to_string());
            for attr in self.wildcard {
                push(self.remote_name(attr));
            }
        }
        for attr in req.attrs.iter().flatten() {
            if attr != "*" {
                push(self.attr_to_remote(attr));
            }
        }
        Some(remote)
    }
}

/// Maps directory attributes onto a generic LDAP schema.
#[derive(Debug, Clone)]
pub struct LdapMap {
    name: &'static str,
    table: &'static MapTable,
    base_dns: Vec<Dn>,
}

impl LdapMap {
    /// Creates the `entryUUID` preset.
    #[must_use]
    pub fn entryuuid() -> Self {
        Self::with_table(ENTRYUUID, &ENTRYUUID_TABLE)
    }

    /// Creates the `nsuniqueid` preset.
    #[must_use]
    pub fn nsuniqueid() -> Self {
        Self::with_table(NSUNIQUEID, &NSUNIQUEID_TABLE)
    }

    /// Creates a module over an arbitrary table.
    #[must_use]
    pub const fn with_table(name: &'static str, table: &'static MapTable) -> Self {
        Self {
            name,
            table,
            base_dns: Vec::new(),
        }
    }

    /// Returns the naming contexts discovered at init.
    #[must_use]
    pub fn base_dns(&self) -> &[Dn] {
        &self.base_dns
    }

    fn discover_base_dns(next: &mut Next<'_>) -> DirResult<Vec<Dn>> {
        let req = SearchRequest::new(Dn::root(), Scope::Base, Filter::everything())
            .with_attrs(["namingContexts"]);
        let mut dns = Vec::new();
        for msg in next.search(&req)? {
            for value in msg.element("namingContexts").into_iter().flat_map(|e| e.values.iter()) {
                dns.push(Dn::parse(&value.to_string_lossy())?);
            }
        }
        Ok(dns)
    }

    fn highest_csn(&self, next: &mut Next<'_>) -> DirResult<u64> {
        let mut highest = 0;
        for base in &self.base_dns {
            let req = SearchRequest::new(base.clone(), Scope::Base, Filter::everything())
                .with_attrs(["contextCSN"]);
            let found = match next.search(&req) {
                Ok(found) => found,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };
            for text in found.iter().filter_map(|m| m.get_string("contextCSN")) {
                match entry_csn_usn(&text) {
                    Ok(usn) => highest = highest.max(usn),
                    Err(err) => tracing::warn!(base = %base, error = %err, "ignoring contextCSN"),
                }
            }
        }
        Ok(highest)
    }
}

impl Module for LdapMap {
    fn name(&self) -> &str {
        self.name
    }

    fn init(&mut self, next: &mut Next<'_>) -> DirResult<()> {
        next.init()?;
        match Self::discover_base_dns(next) {
            Ok(dns) => self.base_dns = dns,
            Err(err) => tracing::warn!(module = self.name, error = %err, "no naming contexts found"),
        }
        Ok(())
    }

    fn search(&mut self, req: &SearchRequest, next: &mut Next<'_>) -> DirResult<Vec<Message>> {
        if req.base.is_special() {
            return next.search(req);
        }
        let schema = std::sync::Arc::clone(next.schema());
        let down = {
            let schema = schema.read();
            SearchRequest {
                base: req.base.clone(),
                scope: req.scope,
                filter: self.table.filter_to_remote(&schema, &req.filter),
                attrs: self.table.attrs_to_remote(req),
            }
        };
        let found = next.search(&down)?;

        let schema = schema.read();
        Ok(found
            .into_iter()
            .map(|msg| {
                let mut msg = self.table.message_to_local(&schema, msg);
                if let Some(attrs) = req.attrs.as_ref().filter(|_| !req.wants_all()) {
                    msg.retain_attributes(attrs);
                }
                msg
            })
            .collect())
    }

    fn add(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if msg.dn.is_special() {
            return next.add(msg);
        }
        let mapped = self.table.message_to_remote(&next.schema().read(), msg)?;
        next.add(mapped)
    }

    fn modify(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if msg.dn.is_special() {
            return next.modify(msg);
        }
        let mapped = self.table.message_to_remote(&next.schema().read(), msg)?;
        next.modify(mapped)
    }

    fn sequence_number(&mut self, kind: SequenceKind, next: &mut Next<'_>) -> DirResult<u64> {
        if self.base_dns.is_empty() {
            return next.sequence_number(kind);
        }
        let highest = self.highest_csn(next)?;
        Ok(match kind {
            SequenceKind::HighestSeq => highest,
            SequenceKind::Next => highest + 1,
            SequenceKind::HighestTimestamp => highest >> 24,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DirContext;
    use crate::modules::rootdse::RootDse;
    use crate::modules::testing;
    use dirdb_storage::{KvStore, MemoryStore};
    use std::sync::Arc;

    const GUID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    fn schema() -> Schema {
        Schema::new()
    }

    #[test]
    fn sequence_numbers_round_trip_through_csn() {
        let usn = (1_200_000_000u64 << 24) | 0x2a;
        let csn = usn_to_entry_csn(&schema(), &Value::from(usn.to_string())).unwrap();
        assert_eq!(csn.to_string_lossy(), "20080110212000.0Z#00002a#00#000000");
        let back = entry_csn_to_usn(&schema(), &csn).unwrap();
        assert_eq!(back.to_string_lossy(), usn.to_string());
    }

    #[test]
    fn timestamps_drop_the_counter() {
        let usn = (1_200_000_000u64 << 24) | 7;
        let stamp = usn_to_timestamp(&schema(), &Value::from(usn.to_string())).unwrap();
        assert_eq!(stamp.to_string_lossy(), "20080110212000.0Z");
        let back = timestamp_to_usn(&schema(), &stamp).unwrap();
        assert_eq!(back.to_string_lossy(), (1_200_000_000u64 << 24).to_string());
    }

    #[test]
    fn large_unsigned_values_become_signed() {
        let mapped = normalise_to_signed32(&schema(), &Value::from("2147483650")).unwrap();
        assert_eq!(mapped.to_string_lossy(), "-2147483646");
        let kept = normalise_to_signed32(&schema(), &Value::from("-2147483646")).unwrap();
        assert_eq!(kept.to_string_lossy(), "-2147483646");
        assert_eq!(
            normalise_to_signed32(&schema(), &Value::from("4")).unwrap().to_string_lossy(),
            "4"
        );
    }

    #[test]
    fn guid_forms() {
        let binary = encode_guid(&schema(), &Value::from(GUID)).unwrap();
        assert_eq!(binary.len(), 16);
        assert_eq!(guid_always_string(&schema(), &binary).unwrap().to_string_lossy(), GUID);

        let ns = guid_ns_string(&schema(), &binary).unwrap();
        assert_eq!(ns.to_string_lossy(), "6ba7b810-9dad11d1-80b400c0-4fd430c8");
        assert_eq!(encode_ns_guid(&schema(), &ns).unwrap(), binary);
        assert!(encode_ns_guid(&schema(), &Value::from("nope")).is_err());
    }

    fn user() -> Message {
        let mut msg = Message::new(Dn::parse("cn=alice,dc=test").unwrap());
        msg.add_string("objectClass", "user");
        msg.add_string("cn", "alice");
        msg.add_value("objectGUID", guid_to_binary(GUID).unwrap());
        msg.add_string("whenCreated", "20080110212000.0Z");
        msg.add_string("groupType", "2147483650");
        msg
    }

    fn mapped_context(store: &Arc<dyn KvStore>) -> DirContext {
        testing::context_over(Arc::clone(store), vec![Box::new(LdapMap::entryuuid())])
    }

    #[test]
    fn records_are_stored_under_remote_names() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut ctx = mapped_context(&store);
        ctx.add(user()).unwrap();

        let mut plain = testing::context_over(Arc::clone(&store), Vec::new());
        let dn = Dn::parse("cn=alice,dc=test").unwrap();
        let raw = plain.search(&dn, Scope::Base, None, None).unwrap().remove(0);
        assert_eq!(raw.get_string("entryUUID").unwrap(), GUID);
        assert!(!raw.has_attribute("objectGUID"));
        assert_eq!(raw.get_string("createTimestamp").unwrap(), "20080110212000.0Z");
        assert_eq!(raw.get_string("groupType").unwrap(), "-2147483646");

        let local = ctx.search(&dn, Scope::Base, None, None).unwrap().remove(0);
        assert_eq!(local.get_value("objectGUID").unwrap().len(), 16);
        assert_eq!(local.get_string("whenCreated").unwrap(), "20080110212000.0Z");
        assert!(!local.has_attribute("entryUUID"));
    }

    #[test]
    fn filters_and_attribute_lists_use_remote_names() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut ctx = mapped_context(&store);
        ctx.add(user()).unwrap();

        let expression = format!("(objectGUID={GUID})");
        let found = ctx
            .search(&Dn::root(), Scope::Subtree, Some(&expression), Some(&["usnCreated"]))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].elements.len(), 1);
        assert_eq!(
            found[0].get_u64("usnCreated"),
            Some(1_200_000_000u64 << 24)
        );
    }

    #[test]
    fn objectclass_values_are_renamed() {
        let table = &ENTRYUUID_TABLE;
        let filter = Filter::parse("(&(objectClass=subSchema)(name=x))").unwrap();
        let mapped = table.filter_to_remote(&schema(), &filter);
        assert_eq!(
            mapped,
            Filter::parse("(&(objectClass=samba4SubSchema)(samba4RDN=x))").unwrap()
        );
        assert_eq!(
            table.filter_to_remote(&schema(), &Filter::everything()),
            Filter::everything()
        );
    }

    #[test]
    fn sequence_number_comes_from_context_csn() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut plain = testing::context_over(Arc::clone(&store), Vec::new());
        let mut rootdse = Message::new(Dn::special("@ROOTDSE"));
        rootdse.add_string("namingContexts", "DC=test");
        plain.add(rootdse).unwrap();
        let mut head = Message::new(Dn::parse("DC=test").unwrap());
        head.add_string("contextCSN", "20080110212000.0Z#000005#00#000000");
        plain.add(head).unwrap();

        let mut ctx = testing::context_over(
            Arc::clone(&store),
            vec![Box::new(LdapMap::entryuuid()), Box::new(RootDse::new())],
        );
        let expected = (1_200_000_000u64 << 24) | 5;
        assert_eq!(ctx.sequence_number(SequenceKind::HighestSeq).unwrap(), expected);
        assert_eq!(ctx.sequence_number(SequenceKind::Next).unwrap(), expected + 1);
        assert_eq!(
            ctx.sequence_number(SequenceKind::HighestTimestamp).unwrap(),
            1_200_000_000
        );
    }

    #[test]
    fn without_naming_contexts_the_backend_answers() {
        let mut ctx = testing::context(vec![Box::new(LdapMap::nsuniqueid())]);
        let mut msg = Message::new(Dn::parse("cn=a").unwrap());
        msg.add_string("cn", "a");
        ctx.add(msg).unwrap();
        assert!(ctx.sequence_number(SequenceKind::HighestSeq).unwrap() >= 1);
    }
}
