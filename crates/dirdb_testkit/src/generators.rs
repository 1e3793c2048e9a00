//! Property-based test generators using proptest.
//!
//! Provides strategies for generating DNs and records that the engine
//! accepts as they are.

use dirdb_core::{Dn, DnComponent, Message};
use proptest::prelude::*;

/// Attributes [`arb_message`] fills in.
pub const MESSAGE_ATTRIBUTES: [&str; 4] = ["description", "mail", "street", "info"];

/// Strategy for generating one `name=value` component.
pub fn arb_component() -> impl Strategy<Value = DnComponent> {
    ("(cn|ou|dc|CN|OU|DC)", "[a-zA-Z0-9][a-zA-Z0-9 ]{0,10}[a-zA-Z0-9]")
        .prop_filter_map("component must be valid", |(name, value)| {
            DnComponent::new(name, value).ok()
        })
}

/// Strategy for generating non-root DNs of up to four components.
pub fn arb_dn() -> impl Strategy<Value = Dn> {
    prop::collection::vec(arb_component(), 1..5).prop_map(Dn::from_components)
}

/// Strategy for generating records with unique values per attribute.
pub fn arb_message() -> impl Strategy<Value = Message> {
    let attributes = prop::collection::btree_map(
        prop::sample::select(MESSAGE_ATTRIBUTES.to_vec()),
        prop::collection::btree_set("[a-z0-9]{1,12}", 1..4),
        1..4,
    );
    (arb_dn(), attributes).prop_map(|(dn, attributes)| {
        let mut msg = Message::new(dn);
        for (name, values) in attributes {
            for value in values {
                msg.add_string(name, &value);
            }
        }
        msg
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for tests that open databases per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn dn_text_parses_back(dn in arb_dn()) {
            let parsed = Dn::parse(&dn.linearize()).unwrap();
            prop_assert_eq!(parsed, dn);
        }

        #[test]
        fn messages_have_values(msg in arb_message()) {
            prop_assert!(!msg.dn.is_root());
            prop_assert!(!msg.elements.is_empty());
            prop_assert!(msg.elements.iter().all(|e| !e.values.is_empty()));
        }
    }
}
