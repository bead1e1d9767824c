#![forbid(unsafe_code)]
//! cachetrace binary entry point.
//!
//! Parses the command line, configures terminal colors, and dispatches to
//! the subcommand handlers in the library's `cli` module.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use cachetrace::cli::{self, Cli};
use clap::Parser;

// Build metadata from vergen (set by build.rs)
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_TIMESTAMP: Option<&str> = option_env!("VERGEN_BUILD_TIMESTAMP");
const RUSTC_SEMVER: Option<&str> = option_env!("VERGEN_RUSTC_SEMVER");
const CARGO_TARGET: Option<&str> = option_env!("VERGEN_CARGO_TARGET_TRIPLE");

/// Disable colors if stderr is not a terminal (e.g., piped to a file).
fn configure_colors() {
    if !io::stderr().is_terminal() {
        colored::control::set_override(false);
    }
}

/// Long version string with build metadata.
fn long_version() -> String {
    let mut version = format!("cachetrace {PKG_VERSION}");
    if let Some(timestamp) = BUILD_TIMESTAMP {
        version.push_str(&format!("\nbuilt:  {timestamp}"));
    }
    if let Some(rustc) = RUSTC_SEMVER {
        version.push_str(&format!("\nrustc:  {rustc}"));
    }
    if let Some(target) = CARGO_TARGET {
        version.push_str(&format!("\ntarget: {target}"));
    }
    version
}

fn main() -> ExitCode {
    configure_colors();

    // `--version` is handled by clap; `-V --verbose-version` style output
    // goes through the same metadata.
    if std::env::args().any(|a| a == "--build-info") {
        println!("{}", long_version());
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();
    let code = cli::run(cli);
    ExitCode::from(u8::try_from(code).unwrap_or(2))
}
