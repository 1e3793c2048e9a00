//! Records and modify deltas.
//!
//! A [`Message`] is a DN plus an ordered list of [`Element`]s. In a stored
//! record every element carries [`ModFlag::None`]; in a modify request each
//! element is one delta.

use crate::dn::Dn;
use crate::schema::Schema;
use crate::value::Value;
use serde::Serialize;
use std::cmp::Ordering;

/// How a modify delta applies to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ModFlag {
    /// Plain attribute, no delta.
    #[default]
    None,
    /// Add the values.
    Add,
    /// Replace every value.
    Replace,
    /// Delete the values, or the whole attribute when no values are given.
    Delete,
}

impl ModFlag {
    /// Returns the stored numeric form.
    #[must_use]
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Add => 1,
            Self::Replace => 2,
            Self::Delete => 3,
        }
    }

    /// Decodes the stored numeric form.
    #[must_use]
    pub const fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Add),
            2 => Some(Self::Replace),
            3 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One named, multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Element {
    /// Attribute name as supplied.
    pub name: String,
    /// Delta flag.
    pub flags: ModFlag,
    /// Values in insertion order.
    pub values: Vec<Value>,
}

impl Element {
    /// Creates an element with no values.
    #[must_use]
    pub fn new(name: impl Into<String>, flags: ModFlag) -> Self {
        Self {
            name: name.into(),
            flags,
            values: Vec::new(),
        }
    }

    /// Creates an element holding `values`.
    #[must_use]
    pub fn with_values(name: impl Into<String>, flags: ModFlag, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            flags,
            values,
        }
    }

    /// Returns true if `name` names this element.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Finds `value` using the attribute's syntax.
    #[must_use]
    pub fn find_value(&self, schema: &Schema, value: &Value) -> Option<usize> {
        let handler = schema.syntax(&self.name);
        self.values
            .iter()
            .position(|v| handler.compare(schema, v, value) == Ordering::Equal)
    }

    /// Returns true if some pair of values compares equal.
    #[must_use]
    pub fn has_duplicate_values(&self, schema: &Schema) -> bool {
        let handler = schema.syntax(&self.name);
        self.values.iter().enumerate().any(|(i, a)| {
            self.values[i + 1..]
                .iter()
                .any(|b| handler.compare(schema, a, b) == Ordering::Equal)
        })
    }
}

/// A record or modify request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Record DN.
    pub dn: Dn,
    /// Elements in order.
    pub elements: Vec<Element>,
}

impl Message {
    /// Creates an empty message.
    #[must_use]
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            elements: Vec::new(),
        }
    }

    /// Returns the first element named `name`.
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.is_named(name))
    }

    /// Returns the first element named `name`, mutably.
    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.is_named(name))
    }

    /// Returns true if an element named `name` exists.
    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.element(name).is_some()
    }

    /// Appends a new element and returns it.
    pub fn add_element(&mut self, name: impl Into<String>, flags: ModFlag) -> &mut Element {
        self.elements.push(Element::new(name, flags));
        let last = self.elements.len() - 1;
        &mut self.elements[last]
    }

    /// Appends `value` to the plain element named `name`, creating it.
    pub fn add_value(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let position = self
            .elements
            .iter()
            .position(|e| e.is_named(name) && e.flags == ModFlag::None);
        match position {
            Some(i) => self.elements[i].values.push(value),
            None => self
                .elements
                .push(Element::with_values(name, ModFlag::None, vec![value])),
        }
    }

    /// Appends a text value.
    pub fn add_string(&mut self, name: &str, value: &str) {
        self.add_value(name, Value::from(value));
    }

    /// Removes every element named `name`.
    pub fn remove(&mut self, name: &str) {
        self.elements.retain(|e| !e.is_named(name));
    }

    /// Returns the first value of `name`.
    #[must_use]
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.element(name).and_then(|e| e.values.first())
    }

    /// Returns the first value of `name` as text.
    #[must_use]
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get_value(name).map(Value::to_string_lossy)
    }

    /// Returns the first value of `name` parsed as an unsigned integer.
    #[must_use]
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get_value(name)
            .and_then(Value::as_str)
            .and_then(|s| s.trim().parse().ok())
    }

    /// Returns the first value of `name` parsed as a signed integer.
    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get_value(name)
            .and_then(Value::as_str)
            .and_then(|s| s.trim().parse().ok())
    }

    /// Returns true if `name` holds `value` under the attribute's syntax.
    #[must_use]
    pub fn has_value(&self, schema: &Schema, name: &str, value: &Value) -> bool {
        self.elements
            .iter()
            .filter(|e| e.is_named(name))
            .any(|e| e.find_value(schema, value).is_some())
    }

    /// Keeps only the elements named in `attrs`.
    pub fn retain_attributes(&mut self, attrs: &[String]) {
        self.elements
            .retain(|e| attrs.iter().any(|a| e.is_named(a)));
    }

    /// Orders elements by case-folded name, keeping the relative order of
    /// equal names.
    pub fn sort_elements(&mut self) {
        self.elements
            .sort_by_key(|e| e.name.to_ascii_uppercase());
    }
}
