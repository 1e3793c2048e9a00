//! LDIF text form of records.
//!
//! Values pass through each attribute's `ldif_read` / `ldif_write`, so
//! binary SIDs and GUIDs appear in their text forms. Values that are not
//! safe strings are written base64-encoded (`name:: ...`).

use crate::dn::Dn;
use crate::error::{DirError, DirResult};
use crate::message::Message;
use crate::schema::Schema;
use crate::value::Value;
use std::fmt::Write as _;

fn write_line(out: &mut String, name: &str, value: &Value) {
    if value.needs_base64() {
        let _ = writeln!(out, "{name}:: {}", value.to_base64());
    } else {
        let _ = writeln!(out, "{name}: {}", value.to_string_lossy());
    }
}

/// Renders one record as LDIF, without a trailing blank line.
///
/// # Errors
///
/// Returns an error if a syntax handler rejects a stored value.
pub fn write_ldif(schema: &Schema, msg: &Message) -> DirResult<String> {
    let mut out = String::new();
    write_line(&mut out, "dn", &Value::from(msg.dn.linearize()));
    for element in &msg.elements {
        let handler = schema.syntax(&element.name);
        for value in &element.values {
            let external = handler.ldif_write(schema, value)?;
            write_line(&mut out, &element.name, &external);
        }
    }
    Ok(out)
}

/// Joins folded continuation lines and drops comments.
fn unfold(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut in_comment = false;
    for raw in text.lines() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = line.strip_prefix(' ') {
            if !in_comment {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                }
            }
            continue;
        }
        in_comment = line.starts_with('#');
        if !in_comment {
            lines.push(line.to_string());
        }
    }
    lines
}

/// Parses LDIF text into records.
///
/// Records are separated by blank lines. `version:` lines are ignored.
///
/// # Errors
///
/// Returns `Syntax` for a record not starting with `dn:`, a line without
/// a colon, invalid base64, or a value the attribute's syntax rejects.
///
/// # Example
///
/// ```
/// use dirdb_core::{ldif::parse_ldif, Schema};
///
/// let records = parse_ldif(&Schema::new(), "dn: cn=a,dc=test\ncn: a\n\ndn: cn=b,dc=test\ncn: b\n").unwrap();
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[1].get_string("cn").as_deref(), Some("b"));
/// ```
pub fn parse_ldif(schema: &Schema, text: &str) -> DirResult<Vec<Message>> {
    let mut records = Vec::new();
    let mut current: Option<Message> = None;
    for line in unfold(text) {
        if line.trim().is_empty() {
            records.extend(current.take());
            continue;
        }
        let (name, rest) = line
            .split_once(':')
            .ok_or_else(|| DirError::syntax(format!("LDIF line without ':': '{line}'")))?;
        let value = if let Some(encoded) = rest.strip_prefix(':') {
            Value::from_base64(encoded)
                .ok_or_else(|| DirError::syntax(format!("invalid base64 for '{name}'")))?
        } else if rest.starts_with('<') {
            return Err(DirError::syntax(format!(
                "URL values are not supported for '{name}'"
            )));
        } else {
            Value::from(rest.trim_start_matches(' '))
        };
        match current.as_mut() {
            None if name.eq_ignore_ascii_case("version") => {}
            None if name.eq_ignore_ascii_case("dn") => {
                let text = value
                    .as_str()
                    .ok_or_else(|| DirError::syntax("LDIF dn is not valid UTF-8"))?;
                current = Some(Message::new(Dn::parse(text)?));
            }
            None => {
                return Err(DirError::syntax(format!(
                    "LDIF record must start with dn, found '{name}'"
                )))
            }
            Some(msg) => {
                let stored = schema.syntax(name).ldif_read(schema, &value)?;
                msg.add_value(name, stored);
            }
        }
    }
    records.extend(current);
    Ok(records)
}
