//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{ArgAction, Parser, Subcommand};

/// Parallel test file runner
#[derive(Parser, Debug)]
#[command(name = "runboard")]
#[command(version)]
#[command(about = "Run test files in parallel workers and report live results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file to use instead of the standard locations
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test files
    Run(RunArgs),

    /// List discovered test files
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test files to run, relative to the target directory (default: all)
    pub files: Vec<String>,

    /// Directory to discover test files in
    #[arg(short, long)]
    pub dir: Option<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Re-run test files when they change
    #[arg(long)]
    pub watch: bool,

    /// Treat suites without tests as errors
    #[arg(long)]
    pub empty_suite_error: bool,

    /// Per-file timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the final report to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Don't print test results while the run executes
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Directory to discover test files in
    #[arg(short, long)]
    pub dir: Option<String>,

    /// Show absolute paths as well
    #[arg(short = 'D', long)]
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
    /// Write a configuration file with default settings
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./runboard.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Show environment variable overrides only
        #[arg(short, long)]
        env: bool,

        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (default: first one found)
        file: Option<String>,
    },

    /// List supported environment variables
    Env,
}
