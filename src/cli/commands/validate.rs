//! `labsim validate`
//!
//! Loads each lab document through the full pipeline and reports every
//! issue found, in human or JSON form.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{LabLoader, LoadResult};
use crate::error::{ConfigError, LabError, Severity, ValidationIssue};

#[derive(Debug, Serialize)]
struct FileReport {
    file: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lab: Option<String>,
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl FileReport {
    fn from_load(path: &Path, result: &Result<LoadResult, ConfigError>, strict: bool) -> Self {
        let file = path.display().to_string();
        match result {
            Ok(loaded) => {
                let warnings: Vec<String> =
                    loaded.warnings.iter().map(ToString::to_string).collect();
                Self {
                    file,
                    valid: !(strict && !warnings.is_empty()),
                    lab: Some(loaded.lab.id.clone()),
                    errors: Vec::new(),
                    warnings,
                }
            }
            Err(ConfigError::ValidationError { errors, .. }) => Self {
                file,
                valid: false,
                lab: None,
                errors: errors.iter().map(ToString::to_string).collect(),
                warnings: Vec::new(),
            },
            Err(e) => Self {
                file,
                valid: false,
                lab: None,
                errors: vec![e.to_string()],
                warnings: Vec::new(),
            },
        }
    }

    fn print_human(&self) {
        if self.valid {
            println!(
                "ok   {} ({})",
                self.file,
                self.lab.as_deref().unwrap_or("unnamed")
            );
        } else {
            println!("FAIL {}", self.file);
        }
        for error in &self.errors {
            println!("     {error}");
        }
        for warning in &self.warnings {
            println!("     warning: {warning}");
        }
    }
}

/// Validates lab documents.
///
/// Every file is checked and reported before failing.
///
/// # Errors
///
/// Returns the first file's config error when any file is invalid; with
/// `--strict`, warnings count as errors.
pub fn validate(args: &ValidateArgs) -> Result<(), LabError> {
    let loader = LabLoader::default();
    let mut reports = Vec::with_capacity(args.files.len());
    let mut first_error: Option<ConfigError> = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating lab");
        let result = loader.load(path);
        let report = FileReport::from_load(path, &result, args.strict);

        if !report.valid && first_error.is_none() {
            first_error = Some(match result {
                Err(e) => e,
                Ok(loaded) => ConfigError::ValidationError {
                    path: path.display().to_string(),
                    errors: loaded
                        .warnings
                        .into_iter()
                        .map(|w| ValidationIssue {
                            path: w.location.unwrap_or_default(),
                            message: w.message,
                            severity: Severity::Warning,
                        })
                        .collect(),
                },
            });
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => reports.iter().for_each(FileReport::print_human),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_error.map_or(Ok(()), |e| Err(e.into()))
}
