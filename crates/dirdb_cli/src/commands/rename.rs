//! Rename command implementation.

use dirdb_core::{DirContext, Dn};
use std::io::Write;

/// Renames `olddn` to `newdn` and reports the outcome.
pub fn run(
    ctx: &mut DirContext,
    olddn: &str,
    newdn: &str,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let old = Dn::parse(olddn)?;
    let new = Dn::parse(newdn)?;
    if let Err(err) = ctx.rename(&old, &new) {
        let detail = ctx.errstring().map_or_else(|| err.to_string(), str::to_string);
        return Err(format!("rename of '{olddn}' to '{newdn}' failed - {detail}").into());
    }
    writeln!(out, "Renamed 1 record")?;
    Ok(())
}
