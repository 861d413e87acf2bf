//! CLI module for binswap - command-line interface.
//!
//! `binswap [OPTIONS] <EXECUTABLE> [ARGS]...`; everything after the executable
//! is handed to the child untouched.

use clap::Parser;
use std::path::PathBuf;

/// Binswap - run a binary and hot-swap it when a replacement appears
#[derive(Parser, Debug)]
#[command(name = "binswap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Append log output to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Executable to run and monitor
    pub executable: PathBuf,

    /// Arguments passed to every launch of the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}
