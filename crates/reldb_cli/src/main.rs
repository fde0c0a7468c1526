//! RelDB CLI
//!
//! Command-line front end for the RelDB in-memory store.
//!
//! # Commands
//!
//! - `tutorial` - Walk through connections, transactions, metadata and the ORM
//! - `exec` - Run SQL statements in one connection and commit
//! - `script` - Run a semicolon-separated script in one transaction

mod commands;
mod error;

use clap::{Parser, Subcommand};
use reldb_core::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RelDB command-line tools.
#[derive(Parser)]
#[command(name = "reldb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log every statement and its parameters
    #[arg(global = true, short, long)]
    echo: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guided walkthrough
    Tutorial,

    /// Run SQL statements against a fresh store
    Exec {
        /// Named parameter, as name=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = commands::exec::parse_param)]
        params: Vec<(String, Value)>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// SQL statements, run in order
        #[arg(required = true)]
        sql: Vec<String>,
    },

    /// Run a SQL script file in a single transaction
    Script {
        /// Script to run
        file: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Tutorial => {
            commands::tutorial::run(cli.echo)?;
        }
        Commands::Exec {
            params,
            format,
            sql,
        } => {
            commands::exec::run(&sql, params, &format, cli.echo)?;
        }
        Commands::Script { file, format } => {
            commands::script::run(&file, &format, cli.echo)?;
        }
        Commands::Version => {
            println!("RelDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
