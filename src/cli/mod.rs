//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parallel acceptance-test scheduler for blockchain networks
#[derive(Parser, Debug)]
#[command(name = "paratest")]
#[command(version)]
#[command(about = "Run blockchain acceptance scenarios concurrently on leased signers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the scheduler over suite files
    Run(RunArgs),

    /// Parse suite files and list scenarios without running them
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Only run tests whose full title matches this regex
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Suite files to run (defaults to every suite in the tests directory)
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Network from the configuration file
    #[arg(short, long)]
    pub network: Option<String>,

    /// Default per-test timeout in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Output format (table, summary, json, json-pretty)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save the report to file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Only list tests whose full title matches this regex
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Suite files to list
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Show tests, tags and hooks of every scenario
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "paratest.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Apply this network before printing
        #[arg(short, long)]
        network: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the discovered one)
        path: Option<PathBuf>,
    },

    /// Describe the supported environment variables
    Env,
}
