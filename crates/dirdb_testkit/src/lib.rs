//! # dirdb Testkit
//!
//! Test utilities for dirdb.
//!
//! This crate provides:
//! - Fixtures opening in-memory and on-disk databases with the stock
//!   module chain
//! - A provisioned test domain with account templates
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirdb_testkit::prelude::*;
//!
//! #[test]
//! fn adds_a_user() {
//!     let mut ctx = memory_context();
//!     provision_domain(&mut ctx).unwrap();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
