//! CLI argument parsing and command handling.
//!
//! This module provides the command-line interface for ddd: checking names
//! against a protect list, explaining how a list is read, and running SQL
//! against an in-process server with the guard preloaded.

use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use crate::config::Config;
use crate::extension::DEFAULT_PROTECT_LIST;
use crate::host::{DestReceiver, ExecError};
use crate::matcher::{ListEntry, find_match, scan};
use crate::server::Server;

/// Guard against `DROP DATABASE` of protected databases.
///
/// ddd checks database names against a `dont_drop_db.list` protect list and
/// runs SQL through a server model with the guard loaded at startup.
#[derive(Parser, Debug)]
#[command(name = "ddd")]
#[command(version, about, long_about = None)]
#[command(after_help = "Run 'ddd init' to write a sample configuration.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check whether a database is protected
    #[command(name = "check")]
    Check {
        /// Database name as DROP DATABASE would receive it
        dbname: String,

        /// Protect list to use instead of the configured one
        #[arg(long, short)]
        list: Option<String>,
    },

    /// Show how the protect list is read for a database name
    #[command(name = "explain")]
    Explain {
        /// Database name as DROP DATABASE would receive it
        dbname: String,

        /// Protect list to use instead of the configured one
        #[arg(long, short)]
        list: Option<String>,

        /// Output format
        #[arg(long, short, value_enum, default_value_t = ExplainFormat::Pretty)]
        format: ExplainFormat,
    },

    /// Run SQL against a server started from the configuration
    #[command(name = "exec")]
    Exec {
        /// Database the session connects to
        #[arg(long, short)]
        database: Option<String>,

        /// One or more statements separated by semicolons
        sql: String,
    },

    /// Generate a sample configuration file
    #[command(name = "init")]
    Init {
        /// Output path (prints to stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    #[command(name = "config")]
    ShowConfig,
}

/// Output format for `explain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExplainFormat {
    /// Human-readable listing
    Pretty,
    /// Structured JSON
    Json,
}

/// A statement failed under `exec`. The error has already been printed.
#[derive(Debug)]
pub struct StatementFailed {
    pub sqlstate: &'static str,
}

impl fmt::Display for StatementFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement failed (SQLSTATE {})", self.sqlstate)
    }
}

impl std::error::Error for StatementFailed {}

/// Run a parsed command.
///
/// # Errors
///
/// Returns an error for I/O failures, a server that cannot start, or (as
/// [`StatementFailed`]) a failing statement under `exec`.
pub fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let (config, sources) = Config::load_with_sources();
    configure_color_mode(&config.general.color);
    crate::logging::init_tracing(
        config.general.verbose,
        colored::control::SHOULD_COLORIZE.should_colorize(),
    );

    match cli.command {
        Command::Check { dbname, list } => {
            check_database(&effective_list(&config, list.as_deref()), &dbname);
        }
        Command::Explain {
            dbname,
            list,
            format,
        } => {
            handle_explain(&effective_list(&config, list.as_deref()), &dbname, format)?;
        }
        Command::Exec { database, sql } => {
            exec_sql(config, database, &sql)?;
        }
        Command::Init { output, force } => {
            init_config(output, force)?;
        }
        Command::ShowConfig => {
            show_config(&config, &sources);
        }
    }
    Ok(())
}

fn configure_color_mode(mode: &str) {
    match mode {
        "always" => colored::control::set_override(true),
        "never" => colored::control::set_override(false),
        _ => {}
    }
}

/// `--list`, else the configured list, else the built-in default.
fn effective_list(config: &Config, list: Option<&str>) -> String {
    list.or_else(|| config.protect_list())
        .unwrap_or(DEFAULT_PROTECT_LIST)
        .to_string()
}

fn check_database(list: &str, dbname: &str) {
    println!("Database: {dbname}");
    println!("List: {list}");
    println!();
    match find_match(list, dbname) {
        Some(matched) => {
            println!("Result: {}", "PROTECTED".red().bold());
            println!("Entry: {}", matched.label());
        }
        None => println!("Result: {}", "ALLOWED".green().bold()),
    }
}

// ============================================================================
// Explain
// ============================================================================

#[derive(Debug, Serialize)]
struct ExplainReport<'a> {
    database: &'a str,
    list: &'a str,
    decision: &'static str,
    matched_entry: Option<String>,
    entries: Vec<ExplainEntry>,
}

#[derive(Debug, Serialize)]
struct ExplainEntry {
    index: usize,
    kind: &'static str,
    raw: String,
    name: Option<String>,
    start: usize,
    end: usize,
    protects: bool,
    deciding: bool,
}

fn build_explain_report<'a>(list: &'a str, dbname: &'a str) -> ExplainReport<'a> {
    let mut decided = false;
    let entries = scan(list)
        .enumerate()
        .map(|(index, entry)| {
            let span = entry.span();
            let protects = entry.protects(dbname);
            let deciding = protects && !decided;
            decided |= protects;
            ExplainEntry {
                index,
                kind: match &entry {
                    ListEntry::Name { .. } if entry.is_all() => "all",
                    ListEntry::Name { .. } => "name",
                    ListEntry::Oversized { .. } => "oversized",
                    ListEntry::Empty { .. } => "empty",
                },
                raw: list.get(span.clone()).unwrap_or_default().to_string(),
                name: entry.name().map(str::to_string),
                start: span.start,
                end: span.end,
                protects,
                deciding,
            }
        })
        .collect();
    let matched = find_match(list, dbname);
    ExplainReport {
        database: dbname,
        list,
        decision: if matched.is_some() { "deny" } else { "allow" },
        matched_entry: matched.map(|m| m.label().to_string()),
        entries,
    }
}

fn handle_explain(
    list: &str,
    dbname: &str,
    format: ExplainFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = build_explain_report(list, dbname);
    match format {
        ExplainFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ExplainFormat::Pretty => {
            println!("Database: {}", report.database);
            println!("List: {:?}", report.list);
            println!();
            println!("Entries:");
            if report.entries.is_empty() {
                println!("  (none)");
            }
            for e in &report.entries {
                let marker = if e.deciding {
                    "=>".red().bold().to_string()
                } else {
                    "  ".to_string()
                };
                let shown = e.name.as_deref().unwrap_or("-");
                println!(
                    "  {marker} [{}] {:<9} {:>3}..{:<3} {:?} -> {}",
                    e.index, e.kind, e.start, e.end, e.raw, shown
                );
            }
            println!();
            match report.matched_entry {
                Some(ref entry) => println!(
                    "Decision: {} (entry: {entry})",
                    "DENY".red().bold()
                ),
                None => println!("Decision: {}", "ALLOW".green().bold()),
            }
        }
    }
    Ok(())
}

// ============================================================================
// Exec
// ============================================================================

/// Prints notices the way psql does.
struct StderrNotices;

impl DestReceiver for StderrNotices {
    fn notice(&mut self, message: &str) {
        eprintln!("{}  {message}", "NOTICE:".yellow());
    }
}

fn exec_sql(
    mut config: Config,
    database: Option<String>,
    sql: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(db) = database {
        if !config.cluster.databases.contains(&db) {
            config.cluster.databases.push(db.clone());
        }
        config.cluster.current_database = db;
    }

    let server = Server::start(&config)?;
    let result = server.backend().execute(sql, &mut StderrNotices);
    let _ = server.shutdown();

    match result {
        Ok(completions) => {
            for completion in completions {
                if let Some(tag) = completion.tag {
                    println!("{tag}");
                }
            }
            Ok(())
        }
        Err(e) => {
            print_exec_error(&e);
            Err(Box::new(StatementFailed {
                sqlstate: e.sqlstate(),
            }))
        }
    }
}

fn print_exec_error(e: &ExecError) {
    eprintln!("{}  {e}", "ERROR:".red().bold());
}

// ============================================================================
// Config
// ============================================================================

/// Generate a sample configuration file
fn init_config(output: Option<String>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let sample = Config::generate_sample_config();

    match output {
        Some(path) => {
            let path = std::path::Path::new(&path);
            if path.exists() && !force {
                return Err(
                    format!("File exists: {}. Use --force to overwrite.", path.display()).into(),
                );
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            std::fs::write(path, sample)?;
            println!("Configuration written to: {}", path.display());
        }
        None => {
            println!("{sample}");
        }
    }

    Ok(())
}

fn show_config(config: &Config, sources: &[crate::config::ConfigSource]) {
    println!("Current configuration:");
    println!();
    println!("Config sources (lowest → highest priority):");
    if sources.is_empty() {
        println!("  (defaults only)");
    }
    for source in sources {
        println!("  - {}: {}", source.kind, source.location);
    }
    println!();
    println!("General:");
    println!("  Color: {}", config.general.color);
    println!("  Verbose: {}", config.general.verbose);
    println!();
    println!("Settings:");
    println!(
        "  dont_drop_db.list = {:?}{}",
        config.protect_list().unwrap_or(DEFAULT_PROTECT_LIST),
        if config.protect_list().is_none() {
            " (default)"
        } else {
            ""
        }
    );
    for (name, value) in &config.settings {
        if config.protect_list().is_some() && name == crate::extension::LIST_GUC {
            continue;
        }
        println!("  {name} = {value:?}");
    }
    println!();
    println!("Cluster:");
    println!("  Databases: {}", config.cluster.databases.join(", "));
    println!("  Current database: {}", config.cluster.current_database);
    println!(
        "  shared_preload_libraries: {}",
        config.cluster.shared_preload_libraries.join(", ")
    );
    println!();
    println!("Logging:");
    println!("  Enabled: {}", config.logging.enabled);
    println!("  File: {:?}", config.logging.file);
    println!("  Format: {:?}", config.logging.format);
}
