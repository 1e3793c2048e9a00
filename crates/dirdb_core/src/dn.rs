//! Distinguished names.
//!
//! A DN is an ordered list of `name=value` components. Index 0 holds the
//! relative DN (least significant); the last component is nearest the root.
//! The empty DN is the root.
//!
//! A text DN starting with `@` is a *special* DN naming a control record.
//! It has exactly one component, named [`Dn::SPECIAL_NAME`], whose value is
//! the whole text including the `@`. Special DNs are never folded or
//! indexed.
//!
//! # Example
//!
//! ```
//! use dirdb_core::{Dn, Schema};
//!
//! let dn = Dn::parse("cn=Alice Smith,DC=example,dc=com").unwrap();
//! assert_eq!(dn.len(), 3);
//! assert_eq!(dn.parent().unwrap().to_string(), "DC=example,dc=com");
//!
//! let folded = dn.fold(&Schema::new());
//! assert_eq!(folded.linearize(), "CN=ALICE SMITH,DC=EXAMPLE,DC=COM");
//! ```

use crate::error::{DirError, DirResult};
use crate::schema::Schema;
use crate::value::Value;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Bytes that must be backslash-escaped inside a component value.
const SPECIALS: &[u8] = b",=\n+<>#;\\\"";

/// One `name=value` component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnComponent {
    /// Attribute name.
    pub name: String,
    /// Raw (unescaped) value.
    pub value: Value,
}

impl DnComponent {
    /// Creates a component, validating the name and value.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for an invalid attribute name or an empty value.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> DirResult<Self> {
        let name = name.into();
        let value = value.into();
        if !is_valid_attribute_name(&name) {
            return Err(DirError::syntax(format!(
                "invalid attribute name '{name}' in DN"
            )));
        }
        if value.is_empty() {
            return Err(DirError::syntax(format!("empty value for '{name}' in DN")));
        }
        Ok(Self { name, value })
    }
}

/// A distinguished name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Dn {
    components: Vec<DnComponent>,
}

fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn trim_edges(text: &str) -> &str {
    text.trim_matches(|c| c == ' ' || c == '\n')
}

fn hex_digit(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Splits DN text on unescaped, unquoted `,` or `;`.
fn split_components(text: &str) -> DirResult<Vec<&str>> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'"' => in_quotes = !in_quotes,
            b',' | b';' if !in_quotes => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if in_quotes {
        return Err(DirError::syntax(format!("unterminated quote in DN '{text}'")));
    }
    parts.push(&text[start..]);
    Ok(parts)
}

/// Decodes backslash escapes. `allow_specials` permits unescaped special
/// bytes, as inside a quoted value.
fn unescape_value(raw: &str, allow_specials: bool) -> DirResult<Vec<u8>> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == b'\\' {
            let next = *bytes
                .get(i + 1)
                .ok_or_else(|| DirError::syntax(format!("dangling escape in '{raw}'")))?;
            if SPECIALS.contains(&next) || next == b' ' {
                out.push(next);
                i += 2;
                continue;
            }
            let high = hex_digit(next);
            let low = bytes.get(i + 2).copied().and_then(hex_digit);
            match (high, low) {
                (Some(h), Some(l)) => {
                    out.push((h << 4) | l);
                    i += 3;
                }
                _ => return Err(DirError::syntax(format!("invalid escape in '{raw}'"))),
            }
            continue;
        }
        if !allow_specials && SPECIALS.contains(&byte) {
            return Err(DirError::syntax(format!(
                "unescaped '{}' in DN value '{raw}'",
                char::from(byte)
            )));
        }
        out.push(byte);
        i += 1;
    }
    Ok(out)
}

fn parse_component(raw: &str) -> DirResult<DnComponent> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| DirError::syntax(format!("missing '=' in DN component '{raw}'")))?;
    let name = trim_edges(name);
    let value = trim_edges(value);
    let bytes = if let Some(quoted) = value.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .filter(|inner| !inner.ends_with('\\') || inner.ends_with("\\\\"))
            .ok_or_else(|| DirError::syntax(format!("mismatched quotes in '{raw}'")))?;
        unescape_value(inner, true)?
    } else {
        unescape_value(value, false)?
    };
    DnComponent::new(name, bytes)
}

fn push_hex(out: &mut String, byte: u8) {
    out.push_str(&format!("\\{byte:02X}"));
}

/// Escapes one component value for linearization.
fn escape_value(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.len().saturating_sub(1);
    let text = std::str::from_utf8(value).ok();
    match text {
        Some(text) => {
            for (i, ch) in text.char_indices() {
                if ch.is_ascii() {
                    escape_ascii(&mut out, ch as u8, i == 0 || i == last);
                } else {
                    out.push(ch);
                }
            }
        }
        None => {
            for (i, &byte) in value.iter().enumerate() {
                if byte.is_ascii() {
                    escape_ascii(&mut out, byte, i == 0 || i == last);
                } else {
                    push_hex(&mut out, byte);
                }
            }
        }
    }
    out
}

fn escape_ascii(out: &mut String, byte: u8, at_edge: bool) {
    match byte {
        b'\n' => push_hex(out, byte),
        b if SPECIALS.contains(&b) => {
            out.push('\\');
            out.push(char::from(b));
        }
        b' ' if at_edge => push_hex(out, byte),
        b if b < 0x20 || b == 0x7f => push_hex(out, b),
        b => out.push(char::from(b)),
    }
}

impl Dn {
    /// Component name used by special DNs.
    pub const SPECIAL_NAME: &'static str = "@SPECIAL";

    /// Returns the root (empty) DN.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a special DN from its body, which should start with `@`.
    #[must_use]
    pub fn special(body: impl Into<Value>) -> Self {
        Self {
            components: vec![DnComponent {
                name: Self::SPECIAL_NAME.to_string(),
                value: body.into(),
            }],
        }
    }

    /// Builds a DN from components, RDN first.
    #[must_use]
    pub fn from_components(components: Vec<DnComponent>) -> Self {
        Self { components }
    }

    /// Parses DN text.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on a missing `=`, an invalid or empty attribute
    /// name, mismatched quotes, an empty value, an unescaped special
    /// character, or an invalid escape.
    pub fn parse(text: &str) -> DirResult<Self> {
        if text.is_empty() {
            return Ok(Self::root());
        }
        if text.starts_with('@') {
            return Ok(Self::special(text));
        }
        let components = split_components(text)?
            .into_iter()
            .map(parse_component)
            .collect::<DirResult<Vec<_>>>()
            .map_err(|e| e.context(&format!("invalid DN '{text}'")))?;
        Ok(Self { components })
    }

    /// Decodes a DN from stored bytes: a special body when it starts with
    /// `@`, otherwise linearized text.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the text is not a valid DN.
    pub fn from_stored(bytes: &[u8]) -> DirResult<Self> {
        if bytes.first() == Some(&b'@') {
            return Ok(Self::special(bytes));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| DirError::syntax("stored DN is not valid UTF-8"))?;
        Self::parse(text)
    }

    /// Encodes the DN for storage.
    #[must_use]
    pub fn to_stored(&self) -> Vec<u8> {
        match self.special_body() {
            Some(body) => body.as_bytes().to_vec(),
            None => self.linearize().into_bytes(),
        }
    }

    /// Returns the components, RDN first.
    #[must_use]
    pub fn components(&self) -> &[DnComponent] {
        &self.components
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns true for the root DN.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns true for the root DN.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns true for a control-record DN.
    #[must_use]
    pub fn is_special(&self) -> bool {
        self.components.len() == 1 && self.components[0].name == Self::SPECIAL_NAME
    }

    /// Returns the body of a special DN.
    #[must_use]
    pub fn special_body(&self) -> Option<&Value> {
        if self.is_special() {
            Some(&self.components[0].value)
        } else {
            None
        }
    }

    /// Returns true if this is the special DN with exactly `body`.
    #[must_use]
    pub fn is_special_named(&self, body: &str) -> bool {
        self.special_body()
            .is_some_and(|b| b.as_bytes() == body.as_bytes())
    }

    /// Returns the relative DN component.
    #[must_use]
    pub fn rdn(&self) -> Option<&DnComponent> {
        self.components.first()
    }

    /// Returns the parent DN, or `None` for the root and special DNs.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() || self.is_special() {
            return None;
        }
        Some(Self {
            components: self.components[1..].to_vec(),
        })
    }

    /// Keeps the `n` most significant (root-most) components.
    #[must_use]
    pub fn copy_partial(&self, n: usize) -> Self {
        let n = n.min(self.components.len());
        Self {
            components: self.components[self.components.len() - n..].to_vec(),
        }
    }

    /// Builds a child DN by prepending `name=value`.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for an invalid name or empty value.
    pub fn child(&self, name: &str, value: impl Into<Value>) -> DirResult<Self> {
        let mut components = Vec::with_capacity(self.components.len() + 1);
        components.push(DnComponent::new(name, value)?);
        components.extend(self.components.iter().cloned());
        Ok(Self { components })
    }

    /// Appends `base` below this DN's components.
    #[must_use]
    pub fn compose(&self, base: &Self) -> Self {
        let mut components = self.components.clone();
        components.extend(base.components.iter().cloned());
        Self { components }
    }

    /// Replaces the trailing `old_base.len()` components with `new_base`.
    ///
    /// The caller must have checked that `self` is under `old_base`.
    #[must_use]
    pub fn rebase(&self, old_base: &Self, new_base: &Self) -> Self {
        let keep = self.components.len().saturating_sub(old_base.len());
        let mut components = self.components[..keep].to_vec();
        components.extend(new_base.components.iter().cloned());
        Self { components }
    }

    /// Renders the DN as text. Special DNs render their body.
    #[must_use]
    pub fn linearize(&self) -> String {
        if let Some(body) = self.special_body() {
            return body.to_string_lossy();
        }
        let mut out = String::new();
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&component.name);
            out.push('=');
            out.push_str(&escape_value(component.value.as_bytes()));
        }
        out
    }

    /// Canonicalizes the DN: attribute names uppercased, values of
    /// case-insensitive attributes canonicalised by their syntax.
    #[must_use]
    pub fn fold(&self, schema: &Schema) -> Self {
        if self.is_special() {
            return self.clone();
        }
        let components = self
            .components
            .iter()
            .map(|c| {
                let handler = schema.syntax(&c.name);
                let value = if handler.is_case_insensitive() {
                    handler
                        .canonicalise(schema, &c.value)
                        .unwrap_or_else(|_| c.value.clone())
                } else {
                    c.value.clone()
                };
                DnComponent {
                    name: c.name.to_ascii_uppercase(),
                    value,
                }
            })
            .collect();
        Self { components }
    }

    /// Schema-aware ordering: component count first, then component by
    /// component from the RDN toward the root.
    #[must_use]
    pub fn compare(&self, other: &Self, schema: &Schema) -> Ordering {
        self.components
            .len()
            .cmp(&other.components.len())
            .then_with(|| compare_components(&self.components, &other.components, schema))
    }

    /// Returns true if the two DNs name the same record.
    #[must_use]
    pub fn matches(&self, other: &Self, schema: &Schema) -> bool {
        self.compare(other, schema) == Ordering::Equal
    }

    /// Returns true if this DN equals `base` or lies beneath it.
    #[must_use]
    pub fn is_descendant_of(&self, base: &Self, schema: &Schema) -> bool {
        if base.is_root() {
            return !self.is_special();
        }
        if self.components.len() < base.components.len() {
            return false;
        }
        let tail = &self.components[self.components.len() - base.components.len()..];
        compare_components(tail, &base.components, schema) == Ordering::Equal
    }
}

fn compare_components(a: &[DnComponent], b: &[DnComponent], schema: &Schema) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let by_name = x
            .name
            .to_ascii_uppercase()
            .cmp(&y.name.to_ascii_uppercase());
        if by_name != Ordering::Equal {
            return by_name;
        }
        let by_value = schema.syntax(&x.name).compare(schema, &x.value, &y.value);
        if by_value != Ordering::Equal {
            return by_value;
        }
    }
    Ordering::Equal
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.linearize())
    }
}

impl FromStr for Dn {
    type Err = DirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.linearize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use proptest::prelude::*;

    fn dn(text: &str) -> Dn {
        Dn::parse(text).unwrap()
    }

    #[test]
    fn parse_basic_components() {
        let parsed = dn("cn=Alice, dc=example ;dc=com");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed.rdn().unwrap().name, "cn");
        assert_eq!(parsed.rdn().unwrap().value, Value::from("Alice"));
        assert_eq!(parsed.linearize(), "cn=Alice,dc=example,dc=com");
    }

    #[test]
    fn empty_text_is_root() {
        assert!(dn("").is_root());
        assert_eq!(Dn::root().linearize(), "");
    }

    #[test]
    fn special_dns_keep_their_body() {
        let special = dn("@INDEX:CN:ALICE");
        assert!(special.is_special());
        assert!(special.is_special_named("@INDEX:CN:ALICE"));
        assert_eq!(special.linearize(), "@INDEX:CN:ALICE");
        assert!(special.parent().is_none());
        assert_eq!(special.fold(&Schema::new()), special);
    }

    #[test]
    fn parse_rejects_malformed_text() {
        for bad in [
            "cn",
            "=value",
            "cn=",
            "c n=x",
            "cn=a,,dc=b",
            "cn=\"open",
            "cn=a=b",
            "cn=a\\",
            "cn=a\\zz",
        ] {
            let err = Dn::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "{bad}");
        }
    }

    #[test]
    fn quoted_values_keep_specials() {
        let parsed = dn("cn=\"Smith, John\",dc=test");
        assert_eq!(parsed.rdn().unwrap().value, Value::from("Smith, John"));
        assert_eq!(parsed.linearize(), "cn=Smith\\, John,dc=test");
    }

    #[test]
    fn escapes_roundtrip() {
        let parsed = dn("cn=a\\2Cb\\00c,dc=x");
        assert_eq!(parsed.rdn().unwrap().value, Value::new(b"a,b\0c".to_vec()));
        assert_eq!(parsed.linearize(), "cn=a\\,b\\00c,dc=x");
        assert_eq!(Dn::parse(&parsed.linearize()).unwrap(), parsed);
    }

    #[test]
    fn edge_spaces_are_escaped() {
        let built = Dn::root().child("cn", " padded ").unwrap();
        assert_eq!(built.linearize(), "cn=\\20padded\\20");
        assert_eq!(Dn::parse(&built.linearize()).unwrap(), built);
    }

    #[test]
    fn fold_uppercases_names_and_case_insensitive_values() {
        let schema = Schema::new();
        let folded = dn("cn=Alice,description=MiXed,dc=Test").fold(&schema);
        assert_eq!(folded.linearize(), "CN=ALICE,DESCRIPTION=MiXed,DC=TEST");
    }

    #[test]
    fn parent_child_and_partial_copies() {
        let base = dn("dc=example,dc=com");
        let child = base.child("cn", "Users").unwrap();
        assert_eq!(child.linearize(), "cn=Users,dc=example,dc=com");
        assert_eq!(child.parent().unwrap(), base);
        assert_eq!(child.copy_partial(1).linearize(), "dc=com");
        assert_eq!(child.copy_partial(10), child);
        assert!(Dn::root().parent().is_none());
    }

    #[test]
    fn rebase_moves_a_subtree_member() {
        let member = dn("cn=x,ou=old,dc=t");
        let moved = member.rebase(&dn("ou=old,dc=t"), &dn("ou=new,dc=t"));
        assert_eq!(moved.linearize(), "cn=x,ou=new,dc=t");
    }

    #[test]
    fn compare_uses_count_first() {
        let schema = Schema::new();
        assert_eq!(
            dn("dc=z").compare(&dn("cn=a,dc=a"), &schema),
            Ordering::Less
        );
        assert_eq!(
            dn("CN=alice,DC=test").compare(&dn("cn=ALICE,dc=TEST"), &schema),
            Ordering::Equal
        );
    }

    #[test]
    fn descendant_check_is_schema_aware() {
        let schema = Schema::new();
        let base = dn("DC=Example,DC=Com");
        assert!(dn("cn=a,ou=b,dc=example,dc=com").is_descendant_of(&base, &schema));
        assert!(base.is_descendant_of(&base, &schema));
        assert!(!dn("dc=com").is_descendant_of(&base, &schema));
        assert!(dn("dc=com").is_descendant_of(&Dn::root(), &schema));
        assert!(!dn("@BASEINFO").is_descendant_of(&Dn::root(), &schema));
    }

    #[test]
    fn stored_form_distinguishes_special() {
        let special = Dn::special(b"@INDEX:OBJECTGUID:\x01\xff".to_vec());
        assert_eq!(Dn::from_stored(&special.to_stored()).unwrap(), special);
        let plain = dn("cn=a,dc=b");
        assert_eq!(Dn::from_stored(&plain.to_stored()).unwrap(), plain);
    }

    fn arb_component() -> impl Strategy<Value = DnComponent> {
        (
            "[a-zA-Z][a-zA-Z0-9-]{0,8}",
            prop::collection::vec(any::<u8>(), 1..16),
        )
            .prop_map(|(name, value)| DnComponent {
                name,
                value: Value::new(value),
            })
    }

    fn arb_text_dn() -> impl Strategy<Value = Dn> {
        prop::collection::vec(
            ("(cn|ou|dc|description)", "[a-zA-Z0-9 ]{1,12}"),
            0..5,
        )
        .prop_map(|parts| {
            let components = parts
                .into_iter()
                .map(|(name, value)| DnComponent::new(name, value).unwrap())
                .collect();
            Dn::from_components(components)
        })
    }

    proptest! {
        #[test]
        fn linearize_parse_roundtrip(components in prop::collection::vec(arb_component(), 0..5)) {
            let original = Dn::from_components(components);
            let text = original.linearize();
            let parsed = Dn::parse(&text).unwrap();
            prop_assert_eq!(&parsed, &original);
            prop_assert_eq!(parsed.linearize(), text);
        }

        #[test]
        fn fold_is_idempotent(original in arb_text_dn()) {
            let schema = Schema::new();
            let once = original.fold(&schema);
            prop_assert_eq!(once.fold(&schema), once);
        }

        #[test]
        fn compare_agrees_with_folded_compare(a in arb_text_dn(), b in arb_text_dn()) {
            let schema = Schema::new();
            prop_assert_eq!(
                a.compare(&b, &schema),
                a.fold(&schema).compare(&b.fold(&schema), &schema)
            );
        }

        #[test]
        fn compare_is_antisymmetric(a in arb_text_dn(), b in arb_text_dn()) {
            let schema = Schema::new();
            prop_assert_eq!(a.compare(&b, &schema), b.compare(&a, &schema).reverse());
        }
    }
}
