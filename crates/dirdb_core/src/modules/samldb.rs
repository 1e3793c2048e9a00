//! Security account defaults.
//!
//! Adds of users, computers, groups and foreign security principals are
//! completed before they reach the store:
//!
//! - attributes missing from the request are copied from the matching
//!   template record, identity attributes excepted;
//! - the RDN must be `cn`;
//! - accounts without an `objectSid` get the owning domain's SID plus a
//!   freshly allocated RID, and foreign security principals take the SID
//!   written in their CN;
//! - accounts without a `sAMAccountName` get a generated one.
//!
//! RIDs come from the domain's `nextRid` counter, bumped with a single
//! modify that deletes the old value and adds the new one, so two writers
//! racing on the same value cannot both succeed. A lost race is retried.

use super::{search_unique, single_value};
use crate::dn::Dn;
use crate::error::{DirError, DirResult, ErrorKind};
use crate::message::{Element, Message, ModFlag};
use crate::module::{Module, Next};
use crate::request::Scope;
use crate::sid::Sid;
use crate::value::Value;
use uuid::Uuid;

/// Registered module name.
pub const NAME: &str = "samldb";

/// RID allocation attempts before giving up.
pub const RID_ATTEMPTS: usize = 10;

const USER_TEMPLATE: &str = "(&(CN=TemplateUser)(objectclass=userTemplate))";
const COMPUTER_TEMPLATE: &str = "(&(CN=TemplateMemberServer)(objectclass=userTemplate))";
const GROUP_TEMPLATE: &str = "(&(CN=TemplateGroup)(objectclass=groupTemplate))";
const FSP_TEMPLATE: &str =
    "(&(CN=TemplateForeignSecurityPrincipal)(objectclass=foreignSecurityPrincipalTemplate))";

const TEMPLATE_SKIP_ATTRS: [&str; 4] = ["cn", "name", "sAMAccountName", "objectGUID"];
const TEMPLATE_CLASSES: [&str; 7] = [
    "Template",
    "userTemplate",
    "groupTemplate",
    "foreignSecurityPrincipalTemplate",
    "aliasTemplate",
    "trustedDomainTemplate",
    "secretTemplate",
];

/// The kinds of account this module completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Account {
    User,
    Computer,
    Group,
    ForeignPrincipal,
}

impl Account {
    fn classify(msg: &Message) -> Option<Self> {
        if has_class(msg, "computer") {
            Some(Self::Computer)
        } else if has_class(msg, "user") {
            Some(Self::User)
        } else if has_class(msg, "group") {
            Some(Self::Group)
        } else if has_class(msg, "foreignSecurityPrincipal") {
            Some(Self::ForeignPrincipal)
        } else {
            None
        }
    }

    const fn template(self) -> &'static str {
        match self {
            Self::User => USER_TEMPLATE,
            Self::Computer => COMPUTER_TEMPLATE,
            Self::Group => GROUP_TEMPLATE,
            Self::ForeignPrincipal => FSP_TEMPLATE,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::User | Self::Computer => "user/computer",
            Self::Group => "group",
            Self::ForeignPrincipal => "foreignSecurityPrincipal",
        }
    }
}

fn has_class(msg: &Message, class: &str) -> bool {
    msg.elements
        .iter()
        .filter(|e| e.is_named("objectClass"))
        .flat_map(|e| e.values.iter())
        .any(|v| v.as_bytes().eq_ignore_ascii_case(class.as_bytes()))
}

/// Generates an account name of the form `$XXXXXX-XXXXXXXXXXXX`.
#[must_use]
pub fn generate_account_name() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_ascii_uppercase();
    format!("${}-{}", &hex[..6], &hex[6..18])
}

/// Completes account records on add.
#[derive(Debug, Default, Clone, Copy)]
pub struct SamLdb;

impl SamLdb {
    /// Creates the module.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Copies the template's attributes that `msg` lacks.
fn copy_template(msg: &mut Message, template: &str, next: &mut Next<'_>) -> DirResult<()> {
    let found = match search_unique(next, &Dn::root(), Scope::Subtree, template, None) {
        Ok(Some(found)) => found,
        Ok(None) => {
            tracing::warn!(template, "samldb: template matched no record");
            return Ok(());
        }
        Err(err) => {
            tracing::warn!(template, error = %err, "samldb: template is ambiguous");
            return Ok(());
        }
    };

    for element in found.elements {
        if TEMPLATE_SKIP_ATTRS.iter().any(|skip| element.is_named(skip)) {
            continue;
        }
        if msg.has_attribute(&element.name) {
            continue;
        }
        let is_class = element.is_named("objectClass");
        for value in element.values {
            let template_class = is_class
                && TEMPLATE_CLASSES
                    .iter()
                    .any(|c| value.as_bytes().eq_ignore_ascii_case(c.as_bytes()));
            if !template_class {
                msg.add_value(&element.name, value);
            }
        }
    }
    Ok(())
}

/// Walks up from `dn` to the nearest `domain` object.
fn find_domain(dn: &Dn, next: &mut Next<'_>) -> DirResult<Dn> {
    let mut cursor = Some(dn.clone());
    while let Some(candidate) = cursor {
        if candidate.is_root() {
            break;
        }
        if search_unique(next, &candidate, Scope::Base, "(objectClass=domain)", Some(&["objectClass"][..]))?.is_some() {
            return Ok(candidate);
        }
        cursor = candidate.parent();
    }
    Err(DirError::not_found(format!(
        "samldb: invalid dn '{dn}', not child of a domain object"
    )))
}

/// One attempt at bumping `nextRid`. `Ok(None)` means another writer won.
fn try_allocate_rid(domain: &Dn, next: &mut Next<'_>) -> DirResult<Option<u32>> {
    let failed = || DirError::operations(format!("samldb: failed to increment nextRid of '{domain}'"));
    let record = search_unique(next, domain, Scope::Base, "(nextRid=*)", Some(&["nextRid"][..]))?
        .ok_or_else(failed)?;
    let current: u32 = record
        .get_string("nextRid")
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| {
            DirError::syntax(format!("samldb: invalid nextRid in '{domain}'"))
        })?;
    let bumped = current
        .checked_add(1)
        .ok_or_else(|| DirError::operations("samldb: out of valid RIDs"))?;

    let mut change = Message::new(domain.clone());
    change.elements.push(Element::with_values(
        "nextRid",
        ModFlag::Delete,
        vec![Value::from(current.to_string())],
    ));
    change.elements.push(Element::with_values(
        "nextRid",
        ModFlag::Add,
        vec![Value::from(bumped.to_string())],
    ));
    match next.modify(change) {
        Ok(()) => Ok(Some(bumped)),
        Err(err) if matches!(err.kind(), ErrorKind::NoSuchAttribute | ErrorKind::Conflict) => {
            tracing::debug!(domain = %domain, error = %err, "lost nextRid race, retrying");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Allocates a new SID in the domain owning `dn`.
fn new_sid(dn: &Dn, next: &mut Next<'_>) -> DirResult<Sid> {
    let domain = find_domain(dn, next)?;
    let record = search_unique(next, &domain, Scope::Base, "(objectSid=*)", Some(&["objectSid"][..]))?
        .ok_or_else(|| {
            DirError::operations(format!("samldb: error retrieving domain sid of '{domain}'"))
        })?;
    let domain_sid = match single_value(&record, "objectSid")? {
        Some(value) => Sid::from_value(value.as_bytes())?,
        None => {
            return Err(DirError::operations(format!(
                "samldb: error retrieving domain sid of '{domain}'"
            )))
        }
    };

    for _ in 0..RID_ATTEMPTS {
        if let Some(rid) = try_allocate_rid(&domain, next)? {
            tracing::debug!(dn = %dn, domain = %domain, rid, "allocated RID");
            return domain_sid.with_rid(rid);
        }
    }
    Err(DirError::operations(format!(
        "samldb: failed to increment nextRid of '{domain}' after {RID_ATTEMPTS} attempts"
    )))
}

fn fill(kind: Account, mut msg: Message, next: &mut Next<'_>) -> DirResult<Message> {
    copy_template(&mut msg, kind.template(), next)?;

    let rdn = msg
        .dn
        .rdn()
        .ok_or_else(|| DirError::syntax(format!("samldb: bad DN '{}'", msg.dn)))?
        .clone();
    if !rdn.name.eq_ignore_ascii_case("cn") {
        return Err(DirError::constraint(format!(
            "samldb: bad RDN '{}' for {}",
            rdn.name,
            kind.label()
        )));
    }

    if kind == Account::Computer && !has_class(&msg, "user") {
        msg.add_string("objectClass", "user");
    }

    if !msg.has_attribute("objectSid") {
        let sid = match kind {
            Account::ForeignPrincipal => {
                let text = rdn.value.as_str().ok_or_else(|| {
                    DirError::syntax("samldb: can't parse sid in CN")
                })?;
                Sid::parse(text).map_err(|err| err.context("samldb: can't parse sid in CN"))?
            }
            _ => new_sid(&msg.dn, next)?,
        };
        msg.add_value("objectSid", sid.to_bytes());
    }

    if kind != Account::ForeignPrincipal && !msg.has_attribute("sAMAccountName") {
        msg.add_string("sAMAccountName", &generate_account_name());
    }
    Ok(msg)
}

impl Module for SamLdb {
    fn name(&self) -> &str {
        NAME
    }

    fn add(&mut self, msg: Message, next: &mut Next<'_>) -> DirResult<()> {
        if msg.dn.is_special() {
            return next.add(msg);
        }
        match Account::classify(&msg) {
            Some(kind) => {
                let filled = fill(kind, msg, next)?;
                next.add(filled)
            }
            None => next.add(msg),
        }
    }
}
