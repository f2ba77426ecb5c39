//! Action scripts for `labsim run`
//!
//! A script is a YAML list of learner actions applied to one session in
//! order. Actions without arguments are bare strings; the rest are
//! single-key maps:
//!
//! ```yaml
//! steps:
//!   - start
//!   - collect: nails
//!   - proceed
//!   - run_trial: { trial: r1, input: { voltage: 6, resistance: 2 } }
//!   - wait: 2s
//!   - submit: { q1: b, q2: a }
//! ```

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::LabError;
use crate::outcome::TrialInput;

/// A parsed action script.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Actions, applied in order
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub steps: Vec<ScriptStep>,
}

/// Trial reference with an optional input.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialArgs {
    /// Trial id
    pub trial: String,
    /// Input to run with; the selected input when omitted
    #[serde(default)]
    pub input: Option<TrialInput>,
}

/// Trial id with the input to select.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectArgs {
    /// Trial id
    pub trial: String,
    /// Input to select
    pub input: TrialInput,
}

/// One learner action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    /// `Intro -> CollectSupplies`
    Start,
    /// Collect one supply
    Collect(String),
    /// `CollectSupplies -> Setup`
    Proceed,
    /// Select a trial input
    Select(SelectArgs),
    /// `Setup -> Running`
    Begin,
    /// Start a trial without waiting for it
    StartTrial(TrialArgs),
    /// Cancel a running trial
    CancelTrial(String),
    /// Start a trial and wait until it completes
    RunTrial(TrialArgs),
    /// Let time pass, e.g. `2s` or `700ms`
    Wait(String),
    /// `Running -> Result`
    ViewResults,
    /// Request `Result -> Quiz`, honouring the pacing delay
    OpenQuiz,
    /// Open the quiz immediately
    SkipPacing,
    /// Answer questions and submit, question id to option id
    Submit(IndexMap<String, String>),
    /// Retry reward claims the store has not confirmed
    FlushRewards,
    /// Back to `Intro`
    Reset,
}

impl ScriptStep {
    /// Short action name for output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Collect(_) => "collect",
            Self::Proceed => "proceed",
            Self::Select(_) => "select",
            Self::Begin => "begin",
            Self::StartTrial(_) => "start_trial",
            Self::CancelTrial(_) => "cancel_trial",
            Self::RunTrial(_) => "run_trial",
            Self::Wait(_) => "wait",
            Self::ViewResults => "view_results",
            Self::OpenQuiz => "open_quiz",
            Self::SkipPacing => "skip_pacing",
            Self::Submit(_) => "submit",
            Self::FlushRewards => "flush_rewards",
            Self::Reset => "reset",
        }
    }
}

impl Script {
    /// Reads and parses a script file.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be read, `Usage` if it is malformed or a
    /// `wait` duration does not parse.
    pub fn load(path: &Path) -> Result<Self, LabError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|e| LabError::Usage(format!("{}: {e}", path.display())))
    }

    /// Parses script text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed step.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let script: Self = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        for (index, step) in script.steps.iter().enumerate() {
            if let ScriptStep::Wait(value) = step {
                parse_wait(value).map_err(|e| format!("step {}: {e}", index + 1))?;
            }
        }
        Ok(script)
    }
}

/// Parses a `wait` duration.
///
/// # Errors
///
/// Returns a message naming the bad value.
pub fn parse_wait(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value.trim())
        .map_err(|_| format!("invalid wait duration '{value}'"))
}
