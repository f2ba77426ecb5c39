//! Error types for `labsim`
//!
//! Engine errors are caller errors (bad sequencing) and are reported
//! synchronously. Store errors describe degraded external operation and are
//! never surfaced through the engine API.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::state::Phase;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `labsim` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Engine error (illegal transition, guard failure)
    pub const ENGINE_ERROR: i32 = 5;

    /// Progress store error
    pub const STORE_ERROR: i32 = 6;

    /// Usage error (invalid arguments, malformed action script)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `labsim` operations.
#[derive(Debug, Error)]
pub enum LabError {
    /// Lab configuration loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Engine caller error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Progress store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Malformed CLI input (action script, arguments)
    #[error("usage error: {0}")]
    Usage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LabError {
    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Engine(_) => ExitCode::ENGINE_ERROR,
            Self::Store(_) => ExitCode::STORE_ERROR,
            Self::Usage(_) => ExitCode::USAGE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Lab configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the configuration file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Configuration validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path (or source name) of the configuration
        path: String,
        /// Every error-severity issue found
        errors: Vec<ValidationIssue>,
    },

    /// Configuration file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Configuration file exceeds the size limit
    #[error("{path} is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Path to the configuration file
        path: PathBuf,
        /// Actual size in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in configuration is not set
    #[error("environment variable '{var}' not set ({location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message attached to the `${VAR:?message}` reference
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found while validating a lab configuration.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g. `"trials.slots[2].id"`)
    pub path: String,
    /// Description of the issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the lab from being loaded
    Error,
    /// Reported, but the lab still loads
    Warning,
}

// ============================================================================
// Engine Errors
// ============================================================================

/// Caller errors raised by the guided experiment engine.
///
/// Every operation validates before it applies, so returning one of these
/// leaves the session exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The supply id is not part of the lab definition
    #[error("unknown supply '{id}'{}", .suggestion.as_ref().map_or_else(String::new, |s| format!(" (did you mean '{s}'?)")))]
    InvalidSupply {
        /// The id that was collected
        id: String,
        /// Closest known supply id, if any is similar enough
        suggestion: Option<String>,
    },

    /// Sequential collection order was violated
    #[error("supply '{id}' collected out of order, expected '{expected}'")]
    SupplyOutOfOrder {
        /// The id that was collected
        id: String,
        /// The next supply in order
        expected: String,
    },

    /// Required supplies are still missing
    #[error("supplies not yet collected: {}", .missing.join(", "))]
    SuppliesIncomplete {
        /// Ids of required supplies not collected yet
        missing: Vec<String>,
    },

    /// The trial id is not part of the lab definition
    #[error("unknown trial '{id}'")]
    UnknownTrial {
        /// The trial id that was referenced
        id: String,
    },

    /// The outcome model rejected the trial input
    #[error("invalid input for trial '{trial}': {reason}")]
    InvalidInput {
        /// Trial the input was selected for
        trial: String,
        /// Reason reported by the outcome model
        reason: String,
    },

    /// A simulation is already in flight
    #[error("trial '{trial}' is already running")]
    AlreadyRunning {
        /// The trial that is running
        trial: String,
    },

    /// The trial already produced its outcome
    #[error("trial '{trial}' is already complete")]
    AlreadyComplete {
        /// The completed trial
        trial: String,
    },

    /// The barrier has not collected every trial outcome
    #[error("completed {completed} of {expected} trials ({} outstanding)", .expected - .completed)]
    IncompleteTrials {
        /// Trials that have reported
        completed: usize,
        /// Trials the barrier waits for
        expected: usize,
    },

    /// The question id is not part of the answer key
    #[error("unknown question '{id}'")]
    UnknownQuestion {
        /// The question id that was answered
        id: String,
    },

    /// The quiz submission does not fill every slot of the key
    #[error("quiz submission answers {answered} of {expected} questions")]
    IncompleteSubmission {
        /// Filled slots that match a key question
        answered: usize,
        /// Number of questions in the key
        expected: usize,
    },

    /// No valid trial input has been selected
    #[error("no trial input selected{}", .trial.as_ref().map_or_else(String::new, |t| format!(" for trial '{t}'")))]
    NoInputSelected {
        /// The trial that has no input, when the check concerns one trial
        trial: Option<String>,
    },

    /// The action is not available in the current phase
    #[error("cannot {action} during {phase}")]
    WrongPhase {
        /// Action that was attempted
        action: &'static str,
        /// Phase the session is in
        phase: Phase,
    },

    /// The requested phase change is not an edge of the state machine,
    /// or its guard does not hold
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },
}

impl EngineError {
    /// Returns a short, stable label for metrics and event streams.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSupply { .. } => "invalid_supply",
            Self::SupplyOutOfOrder { .. } => "supply_out_of_order",
            Self::SuppliesIncomplete { .. } => "supplies_incomplete",
            Self::UnknownTrial { .. } => "unknown_trial",
            Self::InvalidInput { .. } => "invalid_input",
            Self::AlreadyRunning { .. } => "already_running",
            Self::AlreadyComplete { .. } => "already_complete",
            Self::IncompleteTrials { .. } => "incomplete_trials",
            Self::UnknownQuestion { .. } => "unknown_question",
            Self::IncompleteSubmission { .. } => "incomplete_submission",
            Self::NoInputSelected { .. } => "no_input_selected",
            Self::WrongPhase { .. } => "wrong_phase",
            Self::IllegalTransition { .. } => "illegal_transition",
        }
    }
}

// ============================================================================
// Store Errors
// ============================================================================

/// Progress store failures.
///
/// These are degraded-operation conditions: the engine logs them and keeps
/// the reward claim queued instead of failing the learner's action.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached right now
    #[error("progress store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer in time
    #[error("progress store timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error in a file-backed store
    #[error("progress store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unserializable progress data
    #[error("progress store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
