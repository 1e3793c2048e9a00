//! dirdb CLI
//!
//! Command-line tools for dirdb directory databases.
//!
//! # Commands
//!
//! - `search` - Search records and print them as LDIF
//! - `rename` - Rename a record and everything beneath it

mod commands;

use clap::{Parser, Subcommand};
use dirdb_core::{ConnectOptions, DirContext};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// dirdb command-line database tools.
#[derive(Parser)]
#[command(name = "dirdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL: a path, tdb://<path> or mem://<name>
    #[arg(global = true, short = 'H', long, env = "DIRDB_URL")]
    url: Option<String>,

    /// Connect option as key:value, e.g. modules:rootdse,samldb
    #[arg(global = true, short = 'o', long = "option")]
    options: Vec<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search records and print them as LDIF
    Search(commands::search::SearchArgs),

    /// Rename a record
    Rename {
        /// Current DN
        olddn: String,

        /// New DN
        newdn: String,
    },
}

fn connect(url: Option<&str>, options: &[String]) -> Result<DirContext, Box<dyn std::error::Error>> {
    let url = url.ok_or("Database URL required (use -H or DIRDB_URL)")?;
    let options = options
        .iter()
        .try_fold(ConnectOptions::new(), |acc, text| acc.parse_option(text))?;
    Ok(DirContext::connect(url, options)?)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut ctx = match connect(cli.url.as_deref(), &cli.options) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("Failed to connect: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::Search(args) => {
            let stdin = std::io::stdin();
            commands::search::run(&mut ctx, args, &mut stdin.lock(), &mut std::io::stdout().lock())
                .map(|_| ())
        }
        Commands::Rename { olddn, newdn } => {
            commands::rename::run(&mut ctx, olddn, newdn, &mut std::io::stdout().lock())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
