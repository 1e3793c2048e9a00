//! Attribute syntax handlers.
//!
//! Each syntax supplies four functions:
//!
//! - `ldif_read`: external text form to stored form
//! - `ldif_write`: stored form to external text form
//! - `canonicalise`: the form used for equality, ordering and index keys
//! - `compare`: three-way comparison of two stored values
//!
//! For every syntax, comparing two canonicalised values gives the same
//! answer as comparing the originals.

use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::schema::Schema;
use crate::sid::Sid;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Name of the integer syntax.
pub const SYNTAX_INTEGER: &str = "INTEGER";
/// Name of the octet-string syntax.
pub const SYNTAX_OCTET_STRING: &str = "OCTET_STRING";
/// Name of the case-insensitive directory-string syntax.
pub const SYNTAX_DIRECTORY_STRING: &str = "DIRECTORY_STRING";
/// Name of the DN syntax.
pub const SYNTAX_DN: &str = "DN";
/// Name of the objectclass syntax.
pub const SYNTAX_OBJECTCLASS: &str = "OBJECTCLASS";
/// Name of the security-identifier syntax.
pub const SYNTAX_SID: &str = "SID";
/// Name of the GUID syntax.
pub const SYNTAX_GUID: &str = "GUID";

/// Per-syntax value handling.
pub trait SyntaxHandler: Send + Sync + fmt::Debug {
    /// Returns the syntax name.
    fn name(&self) -> &'static str;

    /// Converts the external text form into the stored form.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the text is not valid for this syntax.
    fn ldif_read(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        Ok(value.clone())
    }

    /// Converts the stored form into the external text form.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the stored value is not valid for this syntax.
    fn ldif_write(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        Ok(value.clone())
    }

    /// Produces the canonical form.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the value is not valid for this syntax.
    fn canonicalise(&self, schema: &Schema, value: &Value) -> DirResult<Value>;

    /// Three-way comparison.
    fn compare(&self, schema: &Schema, a: &Value, b: &Value) -> Ordering;

    /// Returns true if values of this syntax fold case.
    fn is_case_insensitive(&self) -> bool {
        false
    }
}

/// Signed 64-bit integers, canonically written in decimal.
#[derive(Debug)]
pub struct IntegerSyntax;
/// Arbitrary bytes, compared exactly.
#[derive(Debug)]
pub struct OctetStringSyntax;
/// Text compared without regard to case or repeated spaces.
#[derive(Debug)]
pub struct DirectoryStringSyntax;
/// Distinguished names.
#[derive(Debug)]
pub struct DnSyntax;
/// Objectclass names, equal to any of their subclasses.
#[derive(Debug)]
pub struct ObjectClassSyntax;
/// Security identifiers, stored binary.
#[derive(Debug)]
pub struct SidSyntax;
/// GUIDs, stored as 16 mixed-endian bytes.
#[derive(Debug)]
pub struct GuidSyntax;

/// Integer handler.
pub static INTEGER: IntegerSyntax = IntegerSyntax;
/// Octet-string handler.
pub static OCTET_STRING: OctetStringSyntax = OctetStringSyntax;
/// Directory-string handler.
pub static DIRECTORY_STRING: DirectoryStringSyntax = DirectoryStringSyntax;
/// DN handler.
pub static DN: DnSyntax = DnSyntax;
/// Objectclass handler.
pub static OBJECTCLASS: ObjectClassSyntax = ObjectClassSyntax;
/// SID handler.
pub static SID: SidSyntax = SidSyntax;
/// GUID handler.
pub static GUID: GuidSyntax = GuidSyntax;

/// Looks up a handler by syntax name.
#[must_use]
pub fn syntax_by_name(name: &str) -> Option<&'static dyn SyntaxHandler> {
    let handler: &'static dyn SyntaxHandler = match name {
        SYNTAX_INTEGER => &INTEGER,
        SYNTAX_OCTET_STRING => &OCTET_STRING,
        SYNTAX_DIRECTORY_STRING => &DIRECTORY_STRING,
        SYNTAX_DN => &DN,
        SYNTAX_OBJECTCLASS => &OBJECTCLASS,
        SYNTAX_SID => &SID,
        SYNTAX_GUID => &GUID,
        _ => return None,
    };
    Some(handler)
}

/// Parses an integer the way `strtoll(.., 0)` does, but rejects trailing
/// garbage: optional sign, then `0x` hex, leading-zero octal, or decimal.
#[must_use]
pub fn parse_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).ok()
}

/// Folds directory-string text: uppercase, no leading or trailing spaces,
/// runs of spaces collapsed to one.
#[must_use]
pub fn fold_directory_string(bytes: &[u8]) -> Vec<u8> {
    let upper = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_uppercase().into_bytes(),
        Err(_) => bytes.to_ascii_uppercase(),
    };
    let mut out = Vec::with_capacity(upper.len());
    let mut after_space = true;
    for byte in upper {
        if byte == b' ' {
            if !after_space {
                out.push(b' ');
            }
            after_space = true;
        } else {
            out.push(byte);
            after_space = false;
        }
    }
    if out.last() == Some(&b' ') {
        out.pop();
    }
    out
}

/// Byte comparison that orders shorter values first.
fn compare_binary(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl SyntaxHandler for IntegerSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_INTEGER
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        let parsed = value
            .as_str()
            .and_then(parse_integer)
            .ok_or_else(|| DirError::syntax(format!("invalid integer {value:?}")))?;
        Ok(Value::from(parsed.to_string()))
    }

    fn compare(&self, _schema: &Schema, a: &Value, b: &Value) -> Ordering {
        match (
            a.as_str().and_then(parse_integer),
            b.as_str().and_then(parse_integer),
        ) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => compare_binary(a.as_bytes(), b.as_bytes()),
        }
    }
}

impl SyntaxHandler for OctetStringSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_OCTET_STRING
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        Ok(value.clone())
    }

    fn compare(&self, _schema: &Schema, a: &Value, b: &Value) -> Ordering {
        compare_binary(a.as_bytes(), b.as_bytes())
    }
}

impl SyntaxHandler for DirectoryStringSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_DIRECTORY_STRING
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        Ok(Value::new(fold_directory_string(value.as_bytes())))
    }

    fn compare(&self, _schema: &Schema, a: &Value, b: &Value) -> Ordering {
        fold_directory_string(a.as_bytes()).cmp(&fold_directory_string(b.as_bytes()))
    }

    fn is_case_insensitive(&self) -> bool {
        true
    }
}

impl SyntaxHandler for DnSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_DN
    }

    fn canonicalise(&self, schema: &Schema, value: &Value) -> DirResult<Value> {
        let text = value
            .as_str()
            .ok_or_else(|| DirError::syntax("DN value is not valid UTF-8"))?;
        let dn = Dn::parse(text)?;
        Ok(Value::from(dn.fold(schema).linearize()))
    }

    fn compare(&self, schema: &Schema, a: &Value, b: &Value) -> Ordering {
        match (self.canonicalise(schema, a), self.canonicalise(schema, b)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => compare_binary(a.as_bytes(), b.as_bytes()),
        }
    }
}

impl SyntaxHandler for ObjectClassSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_OBJECTCLASS
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        Ok(Value::new(fold_directory_string(value.as_bytes())))
    }

    /// `a` equals `b` when they fold equal or `b` is a (transitive) subclass
    /// of `a`. Filters pass their value as `a`.
    fn compare(&self, schema: &Schema, a: &Value, b: &Value) -> Ordering {
        let folded_a = fold_directory_string(a.as_bytes());
        let folded_b = fold_directory_string(b.as_bytes());
        if folded_a == folded_b {
            return Ordering::Equal;
        }
        if let Some(class) = a.as_str() {
            let is_subclass = schema
                .subclass_closure(class)
                .iter()
                .any(|sub| fold_directory_string(sub.as_bytes()) == folded_b);
            if is_subclass {
                return Ordering::Equal;
            }
        }
        folded_a.cmp(&folded_b)
    }

    fn is_case_insensitive(&self) -> bool {
        true
    }
}

fn looks_like_sid_text(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes[..2].eq_ignore_ascii_case(b"S-")
}

impl SyntaxHandler for SidSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_SID
    }

    fn ldif_read(&self, schema: &Schema, value: &Value) -> DirResult<Value> {
        self.canonicalise(schema, value)
    }

    fn ldif_write(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        if looks_like_sid_text(value.as_bytes()) {
            return Ok(value.clone());
        }
        Ok(Value::from(Sid::from_bytes(value.as_bytes())?.to_string()))
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        if looks_like_sid_text(value.as_bytes()) {
            let text = value
                .as_str()
                .ok_or_else(|| DirError::syntax("SID text is not valid UTF-8"))?;
            return Ok(Value::new(Sid::parse(text)?.to_bytes()));
        }
        Ok(value.clone())
    }

    fn compare(&self, schema: &Schema, a: &Value, b: &Value) -> Ordering {
        let a = self.canonicalise(schema, a).unwrap_or_else(|_| a.clone());
        let b = self.canonicalise(schema, b).unwrap_or_else(|_| b.clone());
        compare_binary(a.as_bytes(), b.as_bytes())
    }
}

/// Encodes a textual GUID as 16 mixed-endian bytes.
///
/// # Errors
///
/// Returns `Syntax` if the text is not a GUID.
pub fn guid_to_binary(text: &str) -> DirResult<Vec<u8>> {
    let uuid = Uuid::parse_str(text.trim())
        .map_err(|_| DirError::syntax(format!("invalid GUID '{text}'")))?;
    Ok(uuid.to_bytes_le().to_vec())
}

/// Decodes 16 mixed-endian bytes into the hyphenated text form.
///
/// # Errors
///
/// Returns `Syntax` if the buffer is not 16 bytes.
pub fn guid_to_string(bytes: &[u8]) -> DirResult<String> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| DirError::syntax("binary GUID must be 16 bytes"))?;
    Ok(Uuid::from_bytes_le(raw).hyphenated().to_string())
}

impl SyntaxHandler for GuidSyntax {
    fn name(&self) -> &'static str {
        SYNTAX_GUID
    }

    fn ldif_read(&self, schema: &Schema, value: &Value) -> DirResult<Value> {
        self.canonicalise(schema, value)
    }

    fn ldif_write(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        if value.len() == 16 {
            return Ok(Value::from(guid_to_string(value.as_bytes())?));
        }
        Ok(value.clone())
    }

    fn canonicalise(&self, _schema: &Schema, value: &Value) -> DirResult<Value> {
        if value.len() == 16 {
            return Ok(value.clone());
        }
        let text = value
            .as_str()
            .ok_or_else(|| DirError::syntax("GUID text is not valid UTF-8"))?;
        Ok(Value::new(guid_to_binary(text)?))
    }

    fn compare(&self, schema: &Schema, a: &Value, b: &Value) -> Ordering {
        let a = self.canonicalise(schema, a).unwrap_or_else(|_| a.clone());
        let b = self.canonicalise(schema, b).unwrap_or_else(|_| b.clone());
        compare_binary(a.as_bytes(), b.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new()
    }

    #[test]
    fn integer_parses_like_strtoll_base_zero() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-42"), Some(-42));
        assert_eq!(parse_integer("0x10"), Some(16));
        assert_eq!(parse_integer("010"), Some(8));
        assert_eq!(parse_integer("0"), Some(0));
        assert_eq!(parse_integer("12abc"), None);
        assert_eq!(parse_integer(""), None);
    }

    #[test]
    fn integer_canonicalises_to_decimal() {
        let canon = INTEGER.canonicalise(&schema(), &Value::from("0x1F")).unwrap();
        assert_eq!(canon, Value::from("31"));
        assert!(INTEGER.canonicalise(&schema(), &Value::from("nope")).is_err());
    }

    #[test]
    fn integer_compares_numerically() {
        let s = schema();
        assert_eq!(
            INTEGER.compare(&s, &Value::from("9"), &Value::from("10")),
            Ordering::Less
        );
        assert_eq!(
            INTEGER.compare(&s, &Value::from("0x10"), &Value::from("16")),
            Ordering::Equal
        );
    }

    #[test]
    fn directory_string_folds_case_and_spaces() {
        assert_eq!(fold_directory_string(b"  Alice   Smith "), b"ALICE SMITH");
        assert_eq!(
            DIRECTORY_STRING.compare(&schema(), &Value::from("alice  smith"), &Value::from(" ALICE SMITH")),
            Ordering::Equal
        );
    }

    #[test]
    fn directory_string_fold_is_idempotent() {
        let once = fold_directory_string("Stra\u{df}e  Ecke".as_bytes());
        assert_eq!(fold_directory_string(&once), once);
    }

    #[test]
    fn octet_string_is_exact() {
        assert_ne!(
            OCTET_STRING.compare(&schema(), &Value::from("abc"), &Value::from("ABC")),
            Ordering::Equal
        );
    }

    #[test]
    fn dn_syntax_canonicalises_through_fold() {
        let canon = DN
            .canonicalise(&schema(), &Value::from("cn=Alice ,dc=Test"))
            .unwrap();
        assert_eq!(canon, Value::from("CN=ALICE,DC=TEST"));
    }

    #[test]
    fn objectclass_matches_subclasses() {
        let mut s = schema();
        s.add_subclass("top", "person");
        s.add_subclass("person", "user");
        assert_eq!(
            OBJECTCLASS.compare(&s, &Value::from("top"), &Value::from("User")),
            Ordering::Equal
        );
        assert_ne!(
            OBJECTCLASS.compare(&s, &Value::from("user"), &Value::from("top")),
            Ordering::Equal
        );
    }

    #[test]
    fn sid_text_and_binary_compare_equal() {
        let s = schema();
        let text = Value::from("S-1-5-21-1-2-3-500");
        let binary = SID.ldif_read(&s, &text).unwrap();
        assert_eq!(SID.compare(&s, &text, &binary), Ordering::Equal);
        assert_eq!(SID.ldif_write(&s, &binary).unwrap(), text);
    }

    #[test]
    fn guid_roundtrip_through_binary() {
        let s = schema();
        let text = Value::from("6f86c3a5-3b0b-4d7e-9c1d-2a3b4c5d6e7f");
        let binary = GUID.ldif_read(&s, &text).unwrap();
        assert_eq!(binary.len(), 16);
        // time_low is little-endian on the wire.
        assert_eq!(&binary.as_bytes()[..4], &[0xa5, 0xc3, 0x86, 0x6f]);
        assert_eq!(GUID.ldif_write(&s, &binary).unwrap(), text);
    }

    #[test]
    fn syntax_lookup_by_name() {
        assert_eq!(syntax_by_name("DN").map(|h| h.name()), Some(SYNTAX_DN));
        assert!(syntax_by_name("BOGUS").is_none());
    }
}
