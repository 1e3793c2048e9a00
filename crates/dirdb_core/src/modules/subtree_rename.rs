//! Renames whole subtrees.
//!
//! A rename of a record also moves every record beneath it, so the
//! descendants keep their position relative to the renamed record.

use crate::dn::Dn;
use crate::error::DirResult;
use crate::filter::Filter;
use crate::module::{Module, Next};
use crate::request::{Scope, SearchRequest};

/// Registered module name.
pub const NAME: &str = "subtree_rename";

/// Carries descendants along with a renamed record.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubtreeRename;

impl Module for SubtreeRename {
    fn name(&self) -> &str {
        NAME
    }

    fn rename(&mut self, old: &Dn, new: &Dn, next: &mut Next<'_>) -> DirResult<()> {
        if old.is_special() {
            return next.rename(old, new);
        }

        let req = SearchRequest::new(old.clone(), Scope::Subtree, Filter::everything())
            .with_attrs(Vec::<String>::new());
        let found = next.search(&req)?;
        let moves: Vec<(Dn, Dn)> = {
            let schema = next.schema().read();
            found
                .into_iter()
                .filter(|record| !record.dn.matches(old, &schema))
                .map(|record| {
                    let target = record.dn.rebase(old, new);
                    (record.dn, target)
                })
                .collect()
        };

        tracing::debug!(old = %old, new = %new, descendants = moves.len(), "renaming subtree");
        for (from, to) in &moves {
            next.rename(from, to)
                .map_err(|err| err.context(&format!("subtree rename of '{from}' to '{to}'")))?;
        }
        next.rename(old, new)
    }
}
