//! Logging initialization.
//!
//! `labsim` logs to stderr so `run` output on stdout stays pure JSONL.
//! The filter comes from `LABSIM_LOG_LEVEL` when it holds a valid
//! directive, otherwise from the `-v` count.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Environment variable that overrides the verbosity flags.
pub const LOG_LEVEL_ENV: &str = "LABSIM_LOG_LEVEL";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format with optional ANSI colors.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

/// Maps a `-v` count to a tracing directive.
///
/// Quiet by default: a scripted run only reports transitions at `-v`.
#[must_use]
pub const fn verbosity_to_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Picks the filter directive for a session.
///
/// A non-blank `override_directive` that parses as a filter wins; anything
/// else falls back to the verbosity mapping.
#[must_use]
pub fn select_directive(override_directive: Option<&str>, verbosity: u8) -> String {
    override_directive
        .map(str::trim)
        .filter(|d| !d.is_empty() && EnvFilter::try_new(d).is_ok())
        .map_or_else(|| verbosity_to_directive(verbosity).to_owned(), str::to_owned)
}

fn use_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
        ColorChoice::Always => true,
        ColorChoice::Never => false,
    }
}

/// Installs the global subscriber on stderr.
///
/// Later calls leave the first subscriber in place.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let env = std::env::var(LOG_LEVEL_ENV).ok();
    let directive = select_directive(env.as_deref(), verbosity);
    let filter = EnvFilter::new(directive);
    // Module paths only help when chasing engine internals.
    let show_target = verbosity >= 2;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(show_target)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Human => builder.with_ansi(use_ansi(color)).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
