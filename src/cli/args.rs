//! CLI argument definitions
//!
//! All Clap derive structs for `labsim` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

// ============================================================================
// Root CLI
// ============================================================================

/// Guided experiment state machine for virtual science labs.
#[derive(Parser, Debug)]
#[command(name = "labsim", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "LABSIM_COLOR")]
    pub color: ColorChoice,

    /// Log line format on stderr.
    #[arg(long, default_value = "human", global = true, env = "LABSIM_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a lab session from an action script.
    Run(RunArgs),

    /// Validate lab documents without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the lab document.
    #[arg(env = "LABSIM_LAB")]
    pub lab: PathBuf,

    /// Path to the YAML action script.
    #[arg(short, long)]
    pub script: PathBuf,

    /// JSON file recording lab completions; in-memory when omitted.
    #[arg(long, env = "LABSIM_PROGRESS_FILE")]
    pub progress: Option<PathBuf>,

    /// Write the JSONL session event stream to this file.
    #[arg(long, env = "LABSIM_EVENTS_FILE")]
    pub events: Option<PathBuf>,

    /// Run timers on the wall clock instead of virtual time.
    #[arg(long)]
    pub realtime: bool,

    /// Stop at the first rejected step.
    #[arg(long)]
    pub strict: bool,

    /// Serve Prometheus metrics on this local port.
    #[arg(long, env = "LABSIM_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Lab documents to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}
