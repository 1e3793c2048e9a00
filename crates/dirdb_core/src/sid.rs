//! Security identifiers.
//!
//! Textual form: `S-<revision>-<authority>-<sub1>-...-<subN>`.
//! Binary form: revision byte, sub-authority count byte, 48-bit big-endian
//! identifier authority, then each sub-authority as a little-endian `u32`.

use crate::error::{DirError, DirResult};
use std::fmt;
use std::str::FromStr;

/// Maximum number of sub-authorities in a SID.
pub const MAX_SUB_AUTHORITIES: usize = 15;

/// A security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Creates a SID from its parts.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the authority does not fit in 48 bits or there
    /// are too many sub-authorities.
    pub fn new(revision: u8, authority: u64, sub_authorities: Vec<u32>) -> DirResult<Self> {
        if authority >= 1 << 48 {
            return Err(DirError::syntax("SID authority exceeds 48 bits"));
        }
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(DirError::syntax("too many SID sub-authorities"));
        }
        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Parses the textual form.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` on malformed input.
    pub fn parse(text: &str) -> DirResult<Self> {
        let invalid = || DirError::syntax(format!("invalid SID '{text}'"));
        let mut parts = text.trim().split('-');
        match parts.next() {
            Some(prefix) if prefix.eq_ignore_ascii_case("S") => {}
            _ => return Err(invalid()),
        }
        let revision = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let authority = parts
            .next()
            .and_then(|p| match p.strip_prefix("0x").or_else(|| p.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => p.parse::<u64>().ok(),
            })
            .ok_or_else(invalid)?;
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<DirResult<Vec<_>>>()?;
        Self::new(revision, authority, sub_authorities).map_err(|_| invalid())
    }

    /// Decodes the binary form.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the buffer length disagrees with its header.
    pub fn from_bytes(bytes: &[u8]) -> DirResult<Self> {
        if bytes.len() < 8 {
            return Err(DirError::syntax("binary SID shorter than its header"));
        }
        let count = usize::from(bytes[1]);
        if count > MAX_SUB_AUTHORITIES || bytes.len() != 8 + count * 4 {
            return Err(DirError::syntax("binary SID length mismatch"));
        }
        let authority = bytes[2..8]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            revision: bytes[0],
            authority,
            sub_authorities,
        })
    }

    /// Encodes the binary form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.sub_authorities.len() * 4);
        out.push(self.revision);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    /// Returns a copy with `rid` appended as the last sub-authority.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the SID already has the maximum number of
    /// sub-authorities.
    pub fn with_rid(&self, rid: u32) -> DirResult<Self> {
        let mut subs = self.sub_authorities.clone();
        subs.push(rid);
        Self::new(self.revision, self.authority, subs)
    }

    /// Returns the last sub-authority.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    /// Returns the sub-authorities.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// Decodes either form: text starting with `S-`, or binary.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if neither form decodes.
    pub fn from_value(bytes: &[u8]) -> DirResult<Self> {
        match std::str::from_utf8(bytes) {
            Ok(text) if text.len() > 2 && text[..2].eq_ignore_ascii_case("S-") => Self::parse(text),
            _ => Self::from_bytes(bytes),
        }
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = DirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "S-1-5-21-3623811015-3361044348-30300820";

    #[test]
    fn parse_and_display_roundtrip() {
        let sid = Sid::parse(DOMAIN).unwrap();
        assert_eq!(sid.to_string(), DOMAIN);
        assert_eq!(sid.sub_authorities().len(), 4);
    }

    #[test]
    fn binary_roundtrip() {
        let sid = Sid::parse(DOMAIN).unwrap();
        let bytes = sid.to_bytes();
        assert_eq!(bytes.len(), 8 + 4 * 4);
        assert_eq!(&bytes[..8], &[1, 4, 0, 0, 0, 0, 0, 5]);
        assert_eq!(Sid::from_bytes(&bytes).unwrap(), sid);
    }

    #[test]
    fn with_rid_appends() {
        let sid = Sid::parse(DOMAIN).unwrap().with_rid(1105).unwrap();
        assert_eq!(sid.rid(), Some(1105));
        assert!(sid.to_string().ends_with("-1105"));
    }

    #[test]
    fn malformed_text_fails() {
        for bad in ["", "S-", "X-1-5", "S-1-five-21", "S-1-5-21-notanumber"] {
            assert!(Sid::parse(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn binary_length_mismatch_fails() {
        let mut bytes = Sid::parse(DOMAIN).unwrap().to_bytes();
        bytes.pop();
        assert!(Sid::from_bytes(&bytes).is_err());
    }

    #[test]
    fn from_value_accepts_both_forms() {
        let sid = Sid::parse(DOMAIN).unwrap();
        assert_eq!(Sid::from_value(DOMAIN.as_bytes()).unwrap(), sid);
        assert_eq!(Sid::from_value(&sid.to_bytes()).unwrap(), sid);
    }
}
