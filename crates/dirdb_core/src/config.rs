//! Connection configuration.

use crate::error::{DirError, DirResult};

/// Option key naming the module list.
pub const MODULES_OPTION: &str = "modules";

/// Configuration for connecting to a database.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Whether writes are refused.
    pub read_only: bool,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Ordered module list. `None` reads it from `@MODULES`.
    pub modules: Option<Vec<String>>,

    /// Free-form `key:value` options, in the order given.
    pub options: Vec<(String, String)>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            create_if_missing: true,
            modules: None,
            options: Vec::new(),
        }
    }
}

impl ConnectOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether writes are refused.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether to create a missing store.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the module list, head of the chain first.
    #[must_use]
    pub fn modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modules = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a `key:value` option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Parses and adds one `key:value` option string. A `modules` key sets
    /// the comma-separated module list.
    ///
    /// # Errors
    ///
    /// Returns `Syntax` if the string has no `:`.
    pub fn parse_option(self, text: &str) -> DirResult<Self> {
        let (key, value) = text
            .split_once(':')
            .ok_or_else(|| DirError::syntax(format!("option '{text}' is not key:value")))?;
        let key = key.trim();
        if key.eq_ignore_ascii_case(MODULES_OPTION) {
            return Ok(self.modules(split_list(value)));
        }
        Ok(self.option(key, value.trim()))
    }

    /// Returns the last value given for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Splits a comma-separated list, dropping empty entries.
#[must_use]
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ConnectOptions::default();
        assert!(options.create_if_missing);
        assert!(!options.read_only);
        assert!(options.modules.is_none());
    }

    #[test]
    fn builder_pattern() {
        let options = ConnectOptions::new()
            .read_only(true)
            .create_if_missing(false)
            .modules(["rootdse", "timestamps"])
            .option("ldapmap", "entryuuid");

        assert!(options.read_only);
        assert!(!options.create_if_missing);
        assert_eq!(
            options.modules.as_deref(),
            Some(&["rootdse".to_string(), "timestamps".to_string()][..])
        );
        assert_eq!(options.get("LDAPMAP"), Some("entryuuid"));
    }

    #[test]
    fn parse_option_strings() {
        let options = ConnectOptions::new()
            .parse_option("modules: rootdse, samldb,,timestamps")
            .unwrap()
            .parse_option("vendorVersion:dirdb 0.4")
            .unwrap();
        assert_eq!(
            options.modules.clone().unwrap(),
            vec!["rootdse", "samldb", "timestamps"]
        );
        assert_eq!(options.get("vendorVersion"), Some("dirdb 0.4"));
    }

    #[test]
    fn option_without_colon_fails() {
        assert!(ConnectOptions::new().parse_option("modules").is_err());
    }
}
