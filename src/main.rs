//! `labsim` - Guided experiment state machine for virtual science labs

use clap::Parser;
use tokio_util::sync::CancellationToken;

use labsim::cli::args::{Cli, OutputFormat};
use labsim::cli::commands;
use labsim::error::{ConfigError, ExitCode, LabError};
use labsim::observability::{LogFormat, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        let format = match cli.log_format {
            OutputFormat::Human => LogFormat::Human,
            OutputFormat::Json => LogFormat::Json,
        };
        init_logging(format, cli.verbose, cli.color);
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();

    // First signal stops the session after the current step, second one exits.
    tokio::spawn(async move {
        let Ok(mut sigterm) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            tracing::warn!("failed to register SIGTERM handler");
            return;
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }

        eprintln!("\nStopping after the current step... (press Ctrl+C again to force)");
        shutdown.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            _ = sigterm.recv() => std::process::exit(ExitCode::TERMINATED),
        }
    });

    let result = commands::dispatch(cli, cancel).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            if let LabError::Config(ConfigError::ValidationError { errors, .. }) = &e {
                for issue in errors {
                    eprintln!("  {issue}");
                }
            }
            std::process::exit(e.exit_code());
        }
    }
}
