//! CLI command implementations.

pub mod rename;
pub mod search;
