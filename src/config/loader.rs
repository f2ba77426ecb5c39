//! Lab document loader
//!
//! Loading pipeline:
//! 1. Size limit check
//! 2. Environment variable expansion (pre-parse, on raw text)
//! 3. YAML parsing into [`LabConfig`]
//! 4. Validation (all issues collected)
//! 5. Resolution into a frozen [`LabDefinition`]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::LabDefinition;
use crate::config::schema::LabConfig;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits on lab document size.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of supplies.
    pub max_supplies: usize,

    /// Maximum number of trial slots.
    pub max_trials: usize,

    /// Maximum number of quiz questions.
    pub max_questions: usize,

    /// Maximum document size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_supplies: env_or("LABSIM_MAX_SUPPLIES", 64),
            max_trials: env_or("LABSIM_MAX_TRIALS", 32),
            max_questions: env_or("LABSIM_MAX_QUESTIONS", 50),
            max_config_size: env_or("LABSIM_MAX_CONFIG_SIZE", 1024 * 1024),
        }
    }
}

/// Result of loading a lab document.
#[derive(Debug)]
pub struct LoadResult {
    /// The resolved lab.
    pub lab: Arc<LabDefinition>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Loads lab documents.
#[derive(Debug, Default)]
pub struct LabLoader {
    limits: ConfigLimits,
}

impl LabLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Returns the loader's limits.
    #[must_use]
    pub const fn limits(&self) -> &ConfigLimits {
        &self.limits
    }

    /// Loads a lab document from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or too large, an `${VAR:?}`
    /// reference is unset, the YAML is malformed, or validation fails.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_config_size {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.limits.max_config_size,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Loads a lab document from text; `source` names it in errors.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus the file checks.
    pub fn load_str(&self, raw: &str, source: &Path) -> Result<LoadResult, ConfigError> {
        if raw.len() > self.limits.max_config_size {
            return Err(ConfigError::TooLarge {
                path: source.to_path_buf(),
                size: raw.len(),
                limit: self.limits.max_config_size,
            });
        }
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut warnings = Vec::new();
        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub.substitute(raw, source)?;
        warnings.extend(env_sub.warnings);

        if substituted.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: source.to_path_buf(),
                line: None,
                message: "lab document is empty".to_string(),
            });
        }

        let config: LabConfig =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: source.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&config, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: source.display().to_string(),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        let lab = LabDefinition::from_config(&config)?;
        for warning in &warnings {
            warn!(%warning, "lab loaded with warning");
        }
        debug!(lab = %lab.id, trials = lab.trials.len(), "lab loaded");

        Ok(LoadResult {
            lab: Arc::new(lab),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution on raw YAML text.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

enum VarSpec {
    Plain(String),
    Default(String, String),
    Required(String, String),
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Supports `${VAR}` (empty with a warning if unset), `${VAR:-default}`,
    /// `${VAR:?message}` (error if unset) and `$$` for a literal `$`.
    fn substitute(&mut self, raw: &str, source: &Path) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    out.push('$');
                }
                Some('{') => {
                    chars.next();
                    let spec = Self::parse_var_spec(&mut chars, source)?;
                    self.expand(spec, source, &mut out)?;
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }

    fn expand(&mut self, spec: VarSpec, source: &Path, out: &mut String) -> Result<(), ConfigError> {
        match spec {
            VarSpec::Plain(var) => match std::env::var(&var) {
                Ok(value) => out.push_str(&value),
                Err(_) => self.warnings.push(LoadWarning {
                    message: format!("environment variable '{var}' is not set, using empty string"),
                    location: Some(source.display().to_string()),
                }),
            },
            VarSpec::Default(var, default) => {
                out.push_str(&std::env::var(&var).unwrap_or(default));
            }
            VarSpec::Required(var, message) => match std::env::var(&var) {
                Ok(value) => out.push_str(&value),
                Err(_) => {
                    return Err(ConfigError::EnvVarNotSet {
                        var,
                        location: message,
                    });
                }
            },
        }
        Ok(())
    }

    fn parse_var_spec(
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
        source: &Path,
    ) -> Result<VarSpec, ConfigError> {
        let mut name = String::new();
        while let Some(c) = chars.next() {
            match c {
                '}' => return Ok(VarSpec::Plain(name)),
                ':' => match chars.peek() {
                    Some('-') => {
                        chars.next();
                        let default = Self::read_until_close(chars, source)?;
                        return Ok(VarSpec::Default(name, default));
                    }
                    Some('?') => {
                        chars.next();
                        let message = Self::read_until_close(chars, source)?;
                        return Ok(VarSpec::Required(name, message));
                    }
                    _ => name.push(':'),
                },
                _ => name.push(c),
            }
        }
        Err(unclosed(source, &name))
    }

    /// Reads up to the matching `}`, allowing nested braces.
    fn read_until_close(
        chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
        source: &Path,
    ) -> Result<String, ConfigError> {
        let mut value = String::new();
        let mut depth = 1;
        for c in chars.by_ref() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(value);
                    }
                }
                _ => {}
            }
            value.push(c);
        }
        Err(unclosed(source, &value))
    }
}

fn unclosed(source: &Path, fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(source),
        line: None,
        message: format!("unclosed environment variable reference near '${{{fragment}'"),
    }
}

/// Parses an environment variable, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
