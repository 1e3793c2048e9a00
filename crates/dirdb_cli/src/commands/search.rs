//! Search command implementation.

use clap::{Args, ValueEnum};
use dirdb_core::ldif::write_ldif;
use dirdb_core::{DirContext, Dn, Message, Scope};
use std::io::{BufRead, Write};

/// Filter used when none is given.
pub const DEFAULT_EXPRESSION: &str = "(|(objectClass=*)(distinguishedName=*))";

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// LDIF records with `# record N` headers.
    #[default]
    Ldif,
    /// One JSON object per record.
    Json,
}

/// Arguments of the search command.
#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// Search scope: base, one or sub
    #[arg(short, long, default_value = "sub")]
    pub scope: Scope,

    /// Base DN; the root when omitted
    #[arg(short, long)]
    pub basedn: Option<String>,

    /// Read one filter per line from stdin
    #[arg(short, long)]
    pub interactive: bool,

    /// Sort records by DN
    #[arg(short = 'S', long)]
    pub sort: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: Format,

    /// Filter expression
    pub expression: Option<String>,

    /// Attributes to return; all when omitted
    pub attrs: Vec<String>,
}

/// Runs the search command and returns the number of records printed.
pub fn run(
    ctx: &mut DirContext,
    args: &SearchArgs,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<usize, Box<dyn std::error::Error>> {
    let base = match &args.basedn {
        Some(text) => Dn::parse(text)?,
        None => Dn::root(),
    };

    if !args.interactive {
        let expression = args.expression.as_deref().unwrap_or(DEFAULT_EXPRESSION);
        return search_once(ctx, args, &base, expression, out);
    }

    let mut total = 0;
    for line in input.lines() {
        let line = line?;
        let expression = line.trim();
        if expression.is_empty() {
            continue;
        }
        match search_once(ctx, args, &base, expression, out) {
            Ok(count) => total += count,
            Err(err) => writeln!(out, "# search of '{expression}' failed - {err}")?,
        }
    }
    Ok(total)
}

fn search_once(
    ctx: &mut DirContext,
    args: &SearchArgs,
    base: &Dn,
    expression: &str,
    out: &mut dyn Write,
) -> Result<usize, Box<dyn std::error::Error>> {
    let attrs: Vec<&str> = args.attrs.iter().map(String::as_str).collect();
    let attrs = (!attrs.is_empty()).then_some(&attrs[..]);
    let mut found = ctx.search(base, args.scope, Some(expression), attrs)?;
    tracing::debug!(expression, count = found.len(), "search finished");

    let schema = ctx.schema().read();
    if args.sort {
        found.sort_by(|a, b| a.dn.compare(&b.dn, &schema));
    }
    for (index, msg) in found.iter().enumerate() {
        print_record(&schema, index + 1, msg, args.format, out)?;
    }
    if args.format == Format::Ldif {
        writeln!(out, "# returned {} records", found.len())?;
    }
    Ok(found.len())
}

fn print_record(
    schema: &dirdb_core::Schema,
    number: usize,
    msg: &Message,
    format: Format,
    out: &mut dyn Write,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        Format::Ldif => {
            writeln!(out, "# record {number}")?;
            writeln!(out, "{}", write_ldif(schema, msg)?)?;
        }
        Format::Json => writeln!(out, "{}", serde_json::to_string(msg)?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use dirdb_testkit::with_domain;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SearchArgs,
    }

    fn args(argv: &[&str]) -> SearchArgs {
        Harness::parse_from(std::iter::once("search").chain(argv.iter().copied())).args
    }

    fn output(ctx: &mut DirContext, args: &SearchArgs, input: &str) -> (usize, String) {
        let mut out = Vec::new();
        let count = run(ctx, args, &mut input.as_bytes(), &mut out).unwrap();
        (count, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_prints_records_and_total() {
        with_domain(|ctx| {
            let (count, text) = output(ctx, &args(&["-b", "DC=test", "-s", "base", "(dc=test)", "dc"]), "");
            assert_eq!(count, 1);
            assert!(text.starts_with("# record 1\ndn: DC=test\ndc: test\n"));
            assert!(text.ends_with("# returned 1 records\n"));
        });
    }

    #[test]
    fn test_sorted_output() {
        with_domain(|ctx| {
            let (_, text) = output(ctx, &args(&["-S", "-s", "one", "-b", "CN=Templates,DC=test", "(cn=*)", "cn"]), "");
            let dns: Vec<&str> = text.lines().filter(|l| l.starts_with("dn: ")).collect();
            let mut sorted = dns.clone();
            sorted.sort_by_key(|l| l.to_ascii_uppercase());
            assert_eq!(dns.len(), 4);
            assert_eq!(dns, sorted);
        });
    }

    #[test]
    fn test_interactive_reads_filters() {
        with_domain(|ctx| {
            let (count, text) = output(ctx, &args(&["-i"]), "(dc=test)\n\n(cn=Users)\n(bad\n");
            assert_eq!(count, 2);
            assert!(text.contains("failed"));
        });
    }

    #[test]
    fn test_json_format() {
        with_domain(|ctx| {
            let (count, text) = output(ctx, &args(&["--format", "json", "-s", "base", "-b", "DC=test"]), "");
            assert_eq!(count, 1);
            assert_eq!(text.lines().count(), 1);
            assert!(text.contains("DC=test"));
        });
    }
}
