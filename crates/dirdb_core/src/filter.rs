//! Search filters.
//!
//! The text grammar follows RFC 4515: `(&..)`, `(|..)`, `(!..)`, `(a=v)`,
//! `(a=*)`, `(a=x*y*z)`, `(a>=v)`, `(a<=v)` and `(a~=v)`. Values use `\XX`
//! hex escapes. A bare top-level `a=v` without parentheses is accepted.
//!
//! Matching goes through each attribute's syntax handler, so objectclass
//! equality is polymorphic over the subclass graph.

use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::Message;
use crate::schema::Schema;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed filter tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All children must match.
    And(Vec<Filter>),
    /// At least one child must match.
    Or(Vec<Filter>),
    /// The child must not match.
    Not(Box<Filter>),
    /// `attr=value`.
    Equality {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Value,
    },
    /// `attr=initial*any*...*end`.
    Substring {
        /// Attribute name.
        attr: String,
        /// Required prefix.
        initial: Option<Value>,
        /// Required inner chunks, in order.
        any: Vec<Value>,
        /// Required suffix.
        end: Option<Value>,
    },
    /// `attr>=value`.
    GreaterOrEqual {
        /// Attribute name.
        attr: String,
        /// Bound.
        value: Value,
    },
    /// `attr<=value`.
    LessOrEqual {
        /// Attribute name.
        attr: String,
        /// Bound.
        value: Value,
    },
    /// `attr=*`.
    Present {
        /// Attribute name.
        attr: String,
    },
    /// `attr~=value`, evaluated as equality.
    Approx {
        /// Attribute name.
        attr: String,
        /// Asserted value.
        value: Value,
    },
}

fn is_dn_attribute(attr: &str) -> bool {
    attr.eq_ignore_ascii_case("dn") || attr.eq_ignore_ascii_case("distinguishedName")
}

fn valid_attr(attr: &str) -> bool {
    !attr.is_empty()
        && attr
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b';' | b'.' | b'_' | b'@'))
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|d| d as u8)
}

/// Decodes RFC 4515 `\XX` escapes.
fn decode_value(raw: &str) -> DirResult<Value> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let high = bytes.get(i + 1).copied().and_then(hex_value);
            let low = bytes.get(i + 2).copied().and_then(hex_value);
            match (high, low) {
                (Some(h), Some(l)) => out.push((h << 4) | l),
                _ => return Err(DirError::syntax(format!("invalid escape in filter value '{raw}'"))),
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(Value::new(out))
}

/// Encodes a value with RFC 4515 escapes.
fn encode_value(value: &Value) -> String {
    let escape = |code: u32| format!("\\{code:02x}");
    match value.as_str() {
        Some(text) => text
            .chars()
            .map(|ch| match ch {
                '*' | '(' | ')' | '\\' => escape(ch as u32),
                c if c.is_ascii_control() => escape(c as u32),
                c => c.to_string(),
            })
            .collect(),
        None => value
            .as_bytes()
            .iter()
            .map(|&b| match b {
                b'*' | b'(' | b')' | b'\\' => escape(u32::from(b)),
                0x20..=0x7e => char::from(b).to_string(),
                _ => escape(u32::from(b)),
            })
            .collect(),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.text[self.pos..].starts_with(|c: char| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> DirResult<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", char::from(byte))))
        }
    }

    fn error(&self, what: &str) -> DirError {
        DirError::syntax(format!(
            "invalid filter '{}': {what} at offset {}",
            self.text, self.pos
        ))
    }

    fn filter(&mut self) -> DirResult<Filter> {
        self.expect(b'(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => {
                let end = self.text[self.pos..]
                    .find(')')
                    .ok_or_else(|| self.error("unterminated item"))?;
                let item = &self.text[self.pos..self.pos + end];
                self.pos += end;
                parse_item(item).map_err(|e| e.context(&format!("invalid filter '{}'", self.text)))?
            }
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> DirResult<Vec<Filter>> {
        let mut children = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'(') => children.push(self.filter()?),
                _ => break,
            }
        }
        if children.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(children)
    }
}

fn parse_item(item: &str) -> DirResult<Filter> {
    let eq = item
        .find('=')
        .ok_or_else(|| DirError::syntax(format!("missing '=' in '{item}'")))?;
    let (left, raw) = (&item[..eq], &item[eq + 1..]);
    let (attr, op) = match left.as_bytes().last() {
        Some(b'>') => (&left[..left.len() - 1], Some(b'>')),
        Some(b'<') => (&left[..left.len() - 1], Some(b'<')),
        Some(b'~') => (&left[..left.len() - 1], Some(b'~')),
        _ => (left, None),
    };
    let attr = attr.trim();
    if !valid_attr(attr) {
        return Err(DirError::syntax(format!("invalid attribute name '{attr}'")));
    }
    let attr = attr.to_string();
    let raw = raw.trim_start();
    Ok(match op {
        Some(b'>') => Filter::GreaterOrEqual {
            attr,
            value: decode_value(raw)?,
        },
        Some(b'<') => Filter::LessOrEqual {
            attr,
            value: decode_value(raw)?,
        },
        Some(_) => Filter::Approx {
            attr,
            value: decode_value(raw)?,
        },
        None if raw == "*" => Filter::Present { attr },
        None if raw.contains('*') => {
            let parts: Vec<&str> = raw.split('*').collect();
            let last = parts.len() - 1;
            let chunk = |s: &str| -> DirResult<Option<Value>> {
                if s.is_empty() {
                    Ok(None)
                } else {
                    decode_value(s).map(Some)
                }
            };
            let mut any = Vec::new();
            for part in &parts[1..last] {
                if let Some(value) = chunk(part)? {
                    any.push(value);
                }
            }
            Filter::Substring {
                attr,
                initial: chunk(parts[0])?,
                any,
                end: chunk(parts[last])?,
            }
        }
        None => Filter::Equality {
            attr,
            value: decode_value(raw)?,
        },
    })
}

impl Filter {
    /// Parses filter text.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` for malformed text or trailing garbage.
    ///
    /// # Example
    ///
    /// ```
    /// use dirdb_core::Filter;
    ///
    /// let filter = Filter::parse("(&(objectClass=user)(cn=al*))").unwrap();
    /// assert_eq!(filter.to_string(), "(&(objectClass=user)(cn=al*))");
    /// ```
    pub fn parse(text: &str) -> DirResult<Self> {
        let mut parser = Parser { text, pos: 0 };
        parser.skip_ws();
        let filter = if parser.peek() == Some(b'(') {
            parser.filter()?
        } else {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(DirError::syntax("empty filter"));
            }
            parser.pos = text.len();
            parse_item(trimmed)?
        };
        parser.skip_ws();
        if parser.pos != text.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    /// Returns the match-everything filter.
    #[must_use]
    pub fn everything() -> Self {
        Self::Present {
            attr: "distinguishedName".to_string(),
        }
    }

    /// Creates an equality filter.
    #[must_use]
    pub fn equality(attr: &str, value: impl Into<Value>) -> Self {
        Self::Equality {
            attr: attr.to_string(),
            value: value.into(),
        }
    }

    /// Evaluates the filter against a record.
    #[must_use]
    pub fn matches(&self, schema: &Schema, msg: &Message) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(schema, msg)),
            Self::Or(children) => children.iter().any(|c| c.matches(schema, msg)),
            Self::Not(child) => !child.matches(schema, msg),
            Self::Equality { attr, value } | Self::Approx { attr, value } => {
                if is_dn_attribute(attr) {
                    return value
                        .as_str()
                        .and_then(|text| Dn::parse(text).ok())
                        .is_some_and(|dn| dn.matches(&msg.dn, schema));
                }
                let handler = schema.syntax(attr);
                stored_values(msg, attr)
                    .any(|v| handler.compare(schema, value, v) == Ordering::Equal)
            }
            Self::Present { attr } => {
                is_dn_attribute(attr) || stored_values(msg, attr).next().is_some()
            }
            Self::GreaterOrEqual { attr, value } => {
                let handler = schema.syntax(attr);
                stored_values(msg, attr)
                    .any(|v| handler.compare(schema, v, value) != Ordering::Less)
            }
            Self::LessOrEqual { attr, value } => {
                let handler = schema.syntax(attr);
                stored_values(msg, attr)
                    .any(|v| handler.compare(schema, v, value) != Ordering::Greater)
            }
            Self::Substring {
                attr,
                initial,
                any,
                end,
            } => {
                let handler = schema.syntax(attr);
                let canon = |v: &Value| {
                    handler
                        .canonicalise(schema, v)
                        .unwrap_or_else(|_| v.clone())
                        .into_bytes()
                };
                let initial = initial.as_ref().map(&canon);
                let any: Vec<Vec<u8>> = any.iter().map(&canon).collect();
                let end = end.as_ref().map(&canon);
                let check = |subject: &[u8]| {
                    substring_match(subject, initial.as_deref(), &any, end.as_deref())
                };
                if is_dn_attribute(attr) {
                    return check(msg.dn.fold(schema).linearize().as_bytes());
                }
                stored_values(msg, attr).any(|v| check(&canon(v)))
            }
        }
    }

    /// Returns the value of a top-level `dn=` equality.
    #[must_use]
    pub fn dn_equality(&self) -> Option<&Value> {
        match self {
            Self::Equality { attr, value } if is_dn_attribute(attr) => Some(value),
            _ => None,
        }
    }
}

fn stored_values<'m>(msg: &'m Message, attr: &'m str) -> impl Iterator<Item = &'m Value> {
    msg.elements
        .iter()
        .filter(move |e| e.is_named(attr))
        .flat_map(|e| e.values.iter())
}

fn substring_match(subject: &[u8], initial: Option<&[u8]>, any: &[Vec<u8>], end: Option<&[u8]>) -> bool {
    let mut rest = subject;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix) {
            Some(tail) => rest = tail,
            None => return false,
        }
    }
    let end_len = end.map_or(0, <[u8]>::len);
    if rest.len() < end_len {
        return false;
    }
    let (mut middle, tail) = rest.split_at(rest.len() - end_len);
    if let Some(suffix) = end {
        if tail != suffix {
            return false;
        }
    }
    for chunk in any {
        match find(middle, chunk) {
            Some(at) => middle = &middle[at + chunk.len()..],
            None => return false,
        }
    }
    true
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(children) | Self::Or(children) => {
                f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
                for child in children {
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Self::Not(child) => write!(f, "(!{child})"),
            Self::Equality { attr, value } => write!(f, "({attr}={})", encode_value(value)),
            Self::Approx { attr, value } => write!(f, "({attr}~={})", encode_value(value)),
            Self::GreaterOrEqual { attr, value } => write!(f, "({attr}>={})", encode_value(value)),
            Self::LessOrEqual { attr, value } => write!(f, "({attr}<={})", encode_value(value)),
            Self::Present { attr } => write!(f, "({attr}=*)"),
            Self::Substring {
                attr,
                initial,
                any,
                end,
            } => {
                write!(f, "({attr}=")?;
                if let Some(v) = initial {
                    f.write_str(&encode_value(v))?;
                }
                f.write_str("*")?;
                for v in any {
                    write!(f, "{}*", encode_value(v))?;
                }
                if let Some(v) = end {
                    f.write_str(&encode_value(v))?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for Filter {
    type Err = DirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn alice() -> Message {
        let mut msg = Message::new(Dn::parse("cn=Alice,dc=test").unwrap());
        msg.add_string("cn", "Alice");
        msg.add_string("objectClass", "user");
        msg.add_string("uSNCreated", "17");
        msg.add_string("description", "Head of Research");
        msg
    }

    fn matches(text: &str) -> bool {
        let mut schema = Schema::new();
        schema.add_subclass("top", "person");
        schema.add_subclass("person", "user");
        schema.register("uSNCreated", &crate::syntax::INTEGER);
        Filter::parse(text).unwrap().matches(&schema, &alice())
    }

    #[test]
    fn parses_every_operator() {
        let filter = Filter::parse("(&(a=1)(|(b=*)(!(c>=2)))(d<=3)(e~=4)(f=x*y*z))").unwrap();
        assert_eq!(filter.to_string(), "(&(a=1)(|(b=*)(!(c>=2)))(d<=3)(e~=4)(f=x*y*z))");
    }

    #[test]
    fn bare_item_is_accepted() {
        assert_eq!(
            Filter::parse("cn=Alice").unwrap(),
            Filter::equality("cn", "Alice")
        );
    }

    #[test]
    fn hex_escapes_decode() {
        let filter = Filter::parse("(cn=a\\2ab\\28)").unwrap();
        assert_eq!(filter, Filter::equality("cn", "a*b("));
        assert_eq!(filter.to_string(), "(cn=a\\2ab\\28)");
    }

    #[test]
    fn malformed_filters_fail() {
        for bad in ["", "(", "(cn=a", "(&)", "(cn)", "(=a)", "(cn=a))", "(cn=\\zz)"] {
            let err = Filter::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Syntax, "{bad}");
        }
    }

    #[test]
    fn equality_folds_case_insensitive_attributes() {
        assert!(matches("(cn=ALICE)"));
        assert!(!matches("(description=head of research)"));
        assert!(matches("(description=Head of Research)"));
    }

    #[test]
    fn objectclass_equality_is_polymorphic() {
        assert!(matches("(objectClass=top)"));
        assert!(matches("(objectClass=person)"));
        assert!(!matches("(objectClass=group)"));
    }

    #[test]
    fn presence_and_dn_attributes() {
        assert!(matches("(cn=*)"));
        assert!(!matches("(mail=*)"));
        assert!(matches("(distinguishedName=*)"));
        assert!(matches("(dn=CN=alice,DC=TEST)"));
    }

    #[test]
    fn ordering_uses_syntax() {
        assert!(matches("(uSNCreated>=9)"));
        assert!(matches("(uSNCreated<=17)"));
        assert!(!matches("(uSNCreated>=100)"));
    }

    #[test]
    fn substring_matching() {
        assert!(matches("(cn=al*)"));
        assert!(matches("(cn=*IC*)"));
        assert!(matches("(cn=a*i*e)"));
        assert!(!matches("(cn=a*x*e)"));
        assert!(!matches("(description=*research)"));
        assert!(matches("(description=*Research)"));
    }

    #[test]
    fn substring_chunks_do_not_overlap() {
        assert!(!substring_match(b"abc", Some(b"ab"), &[], Some(b"bc")));
        assert!(substring_match(b"abbc", Some(b"ab"), &[], Some(b"bc")));
    }

    #[test]
    fn boolean_combinations() {
        assert!(matches("(&(cn=alice)(objectClass=user))"));
        assert!(matches("(|(cn=bob)(objectClass=user))"));
        assert!(matches("(!(cn=bob))"));
        assert!(!matches("(&(cn=alice)(!(objectClass=person)))"));
    }
}
