//! Search requests and related enums.

use crate::dn::Dn;
use crate::error::DirError;
use crate::filter::Filter;
use crate::schema::Schema;
use std::fmt;
use std::str::FromStr;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// The base record only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything beneath it.
    #[default]
    Subtree,
}

impl Scope {
    /// Returns true if `dn` lies in this scope relative to `base`.
    #[must_use]
    pub fn contains(self, schema: &Schema, base: &Dn, dn: &Dn) -> bool {
        match self {
            Self::Base => base.matches(dn, schema),
            Self::OneLevel => dn.len() == base.len() + 1 && dn.is_descendant_of(base, schema),
            Self::Subtree => dn.is_descendant_of(base, schema),
        }
    }
}

impl FromStr for Scope {
    type Err = DirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "one" | "onelevel" => Ok(Self::OneLevel),
            "sub" | "subtree" => Ok(Self::Subtree),
            _ => Err(DirError::syntax(format!("invalid search scope '{s}'"))),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Base => "base",
            Self::OneLevel => "one",
            Self::Subtree => "sub",
        })
    }
}

/// A parsed search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Base DN.
    pub base: Dn,
    /// Scope relative to the base.
    pub scope: Scope,
    /// Filter tree.
    pub filter: Filter,
    /// Requested attributes; `None` means all.
    pub attrs: Option<Vec<String>>,
}

impl SearchRequest {
    /// Creates a request for all attributes.
    #[must_use]
    pub fn new(base: Dn, scope: Scope, filter: Filter) -> Self {
        Self {
            base,
            scope,
            filter,
            attrs: None,
        }
    }

    /// Restricts the returned attributes.
    #[must_use]
    pub fn with_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs = Some(attrs.into_iter().map(Into::into).collect());
        self
    }

    /// Returns true if every visible attribute is wanted.
    #[must_use]
    pub fn wants_all(&self) -> bool {
        self.attrs
            .as_ref()
            .map_or(true, |attrs| attrs.iter().any(|a| a == "*"))
    }

    /// Returns true if `name` was requested by name.
    #[must_use]
    pub fn explicitly_requests(&self, name: &str) -> bool {
        self.attrs
            .as_ref()
            .is_some_and(|attrs| attrs.iter().any(|a| a.eq_ignore_ascii_case(name)))
    }

    /// Returns true if `name` should be returned.
    #[must_use]
    pub fn wants(&self, name: &str) -> bool {
        self.wants_all() || self.explicitly_requests(name)
    }
}

/// Which sequence value to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    /// The highest committed sequence number.
    HighestSeq,
    /// The number the next mutation will receive.
    Next,
    /// The time of the last mutation, as a Unix time.
    HighestTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_aliases() {
        assert_eq!("SUB".parse::<Scope>().unwrap(), Scope::Subtree);
        assert_eq!("one".parse::<Scope>().unwrap(), Scope::OneLevel);
        assert_eq!("base".parse::<Scope>().unwrap(), Scope::Base);
        assert!("deep".parse::<Scope>().is_err());
    }

    #[test]
    fn scope_containment() {
        let schema = Schema::new();
        let base = Dn::parse("dc=test").unwrap();
        let child = Dn::parse("cn=a,dc=test").unwrap();
        let grandchild = Dn::parse("cn=b,cn=a,dc=test").unwrap();
        assert!(Scope::Base.contains(&schema, &base, &base));
        assert!(!Scope::Base.contains(&schema, &base, &child));
        assert!(Scope::OneLevel.contains(&schema, &base, &child));
        assert!(!Scope::OneLevel.contains(&schema, &base, &grandchild));
        assert!(Scope::Subtree.contains(&schema, &base, &grandchild));
    }

    #[test]
    fn attribute_selection() {
        let base = SearchRequest::new(Dn::root(), Scope::Base, Filter::everything());
        assert!(base.wants_all());
        let some = base.clone().with_attrs(["cn", "netlogon"]);
        assert!(!some.wants_all());
        assert!(some.wants("CN"));
        assert!(some.explicitly_requests("NetLogon"));
        assert!(!some.wants("sn"));
        assert!(base.with_attrs(["*"]).wants("sn"));
    }
}
