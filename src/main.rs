#![forbid(unsafe_code)]
//! ddd: command-line front end for the `DROP DATABASE` guard.
//!
//! Exit behavior:
//!   - 0 on success (including `check` of a protected name)
//!   - 1 when a command fails or a statement under `exec` is rejected
//!   - 2 on argument errors

use clap::Parser;
use colored::Colorize;
use dont_drop_db::cli::{self, Cli, StatementFailed};
use std::io::{self, IsTerminal};

// Build metadata from vergen (set by build.rs)
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_TIMESTAMP: Option<&str> = option_env!("VERGEN_BUILD_TIMESTAMP");
const RUSTC_SEMVER: Option<&str> = option_env!("VERGEN_RUSTC_SEMVER");
const CARGO_TARGET: Option<&str> = option_env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Configure colored output based on TTY detection.
///
/// Disables colors if stderr is not a terminal (e.g., piped to a file).
fn configure_colors() {
    if !io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
}

/// Print version information.
fn print_version() {
    println!("ddd {PKG_VERSION}");
    if let Some(ts) = BUILD_TIMESTAMP {
        let date = ts.split('T').next().unwrap_or(ts);
        println!("  {} {}", "Built:".bright_black(), date);
    }
    if let Some(rustc) = RUSTC_SEMVER {
        println!("  {} {}", "Rustc:".bright_black(), rustc);
    }
    if let Some(target) = CARGO_TARGET {
        println!("  {} {}", "Target:".bright_black(), target);
    }
}

fn main() {
    configure_colors();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().skip(1).any(|a| a == "--version" || a == "-V") {
        print_version();
        return;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help lands here too and must not be reported as a failure.
            let code = if e.use_stderr() { 2 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = cli::run_command(cli) {
        if e.downcast_ref::<StatementFailed>().is_none() {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}
