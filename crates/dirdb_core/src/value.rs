//! Binary-safe attribute values.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Serialize, Serializer};
use std::fmt;

/// One attribute value.
///
/// Values are length-delimited byte buffers. Nothing here assumes they are
/// text or NUL-terminated; syntax handlers decide how to interpret them.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Value(Vec<u8>);

impl Value {
    /// Creates a value from raw bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the value, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the value as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Returns the value as text, replacing invalid sequences.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }

    /// Returns the length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the value cannot be written as a plain LDIF line.
    ///
    /// Matches RFC 2849 SAFE-STRING: no NUL, CR or LF anywhere, no leading
    /// space, colon or '<', no trailing space, and only printable ASCII.
    #[must_use]
    pub fn needs_base64(&self) -> bool {
        let bytes = &self.0;
        if let Some(&first) = bytes.first() {
            if first == b' ' || first == b':' || first == b'<' {
                return true;
            }
        }
        if bytes.last() == Some(&b' ') {
            return true;
        }
        bytes.iter().any(|&b| !(0x20..0x7f).contains(&b))
    }

    /// Encodes the value as standard base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decodes a base64 string into a value.
    ///
    /// Returns `None` if the input is not valid base64.
    #[must_use]
    pub fn from_base64(text: &str) -> Option<Self> {
        STANDARD.decode(text.trim()).ok().map(Self)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) if !self.needs_base64() => write!(f, "{text:?}"),
            _ => write!(f, "b64:{}", self.to_base64()),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Text values serialize as strings, anything else as `"b64:<base64>"`.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(text) if !self.needs_base64() => serializer.serialize_str(text),
            _ => serializer.serialize_str(&format!("b64:{}", self.to_base64())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_needs_no_base64() {
        assert!(!Value::from("Alice Smith").needs_base64());
    }

    #[test]
    fn binary_and_edge_spaces_need_base64() {
        assert!(Value::new(vec![1, 5, 0, 0]).needs_base64());
        assert!(Value::from(" leading").needs_base64());
        assert!(Value::from("trailing ").needs_base64());
        assert!(Value::from(":colon").needs_base64());
        assert!(Value::from("line\nbreak").needs_base64());
        assert!(Value::from("caf\u{e9}").needs_base64());
    }

    #[test]
    fn base64_roundtrip() {
        let value = Value::new(vec![0, 1, 2, 255]);
        assert_eq!(Value::from_base64(&value.to_base64()), Some(value));
    }

    #[test]
    fn invalid_base64_is_none() {
        assert_eq!(Value::from_base64("not base64!"), None);
    }

    #[test]
    fn as_str_rejects_invalid_utf8() {
        assert_eq!(Value::new(vec![0xff, 0xfe]).as_str(), None);
        assert_eq!(Value::from("ok").as_str(), Some("ok"));
    }
}
