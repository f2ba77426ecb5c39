//! Lab document validation
//!
//! Runs on the deserialized [`LabConfig`] and collects every issue instead
//! of stopping at the first one.

use std::collections::HashSet;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{LabConfig, OutcomeSpec, TrialSlotConfig};
use crate::error::{Severity, ValidationIssue};
use crate::outcome::build_model;

// ============================================================================
// Public API
// ============================================================================

/// Result of validating a lab document.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Lab document validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a lab document.
    pub fn validate(&mut self, config: &LabConfig, limits: &ConfigLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_metadata(config);
        self.validate_supplies(config);
        self.validate_trials(config);
        self.validate_outcome(config);
        self.validate_quiz(config);
        self.validate_timings(config);
        self.validate_limits(config, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_metadata(&mut self, config: &LabConfig) {
        if config.lab.id.trim().is_empty() {
            self.add_error("lab.id", "lab id is required and cannot be empty");
        } else if config.lab.id.chars().any(char::is_whitespace) {
            self.add_error("lab.id", "lab id cannot contain whitespace");
        }
        if config.lab.title.trim().is_empty() {
            self.add_warning("lab.title", "lab title is empty");
        }
    }

    fn validate_supplies(&mut self, config: &LabConfig) {
        let mut seen = HashSet::new();
        for (i, item) in config.supplies.items.iter().enumerate() {
            let path = format!("supplies.items[{i}].id");
            if item.id.trim().is_empty() {
                self.add_error(&path, "supply id cannot be empty");
            } else if !seen.insert(item.id.as_str()) {
                self.add_error(&path, &format!("duplicate supply id '{}'", item.id));
            }
        }
        if !config.supplies.items.is_empty() && !config.supplies.items.iter().any(|i| i.required) {
            self.add_warning(
                "supplies.items",
                "no supply is required; setup opens without collecting anything",
            );
        }
    }

    fn validate_trials(&mut self, config: &LabConfig) {
        let slots = &config.trials.slots;
        if slots.is_empty() {
            self.add_error("trials.slots", "at least one trial slot is required");
        }
        let mut seen = HashSet::new();
        for (i, slot) in slots.iter().enumerate() {
            if slot.id.trim().is_empty() {
                self.add_error(&format!("trials.slots[{i}].id"), "trial id cannot be empty");
            } else if !seen.insert(slot.id.as_str()) {
                self.add_error(
                    &format!("trials.slots[{i}].id"),
                    &format!("duplicate trial id '{}'", slot.id),
                );
            }
        }
    }

    fn validate_outcome(&mut self, config: &LabConfig) {
        match &config.outcome {
            OutcomeSpec::OhmsLaw { decimals, .. } => {
                if *decimals > 12 {
                    self.add_error("outcome.decimals", "at most 12 decimal places are supported");
                }
            }
            OutcomeSpec::Conjunction { require, .. } => {
                if require.is_empty() {
                    self.add_error("outcome.require", "at least one required flag is needed");
                }
            }
            OutcomeSpec::Lookup {
                cases, default, ..
            } => {
                if cases.is_empty() && default.is_none() {
                    self.add_error("outcome.cases", "lookup needs cases or a default");
                }
                let mut seen = HashSet::new();
                for (i, case) in cases.iter().enumerate() {
                    if !seen.insert(case.when.as_str()) {
                        self.add_warning(
                            &format!("outcome.cases[{i}].when"),
                            &format!("case '{}' is shadowed by an earlier case", case.when),
                        );
                    }
                }
            }
        }
        self.validate_presets(&config.outcome, &config.trials.slots);
    }

    /// Presets the model rejects are dropped at runtime; flag them here.
    fn validate_presets(&mut self, spec: &OutcomeSpec, slots: &[TrialSlotConfig]) {
        let model = build_model(spec);
        for (i, slot) in slots.iter().enumerate() {
            let Some(input) = &slot.input else { continue };
            if let Err(reason) = model.validate(input) {
                self.add_error(&format!("trials.slots[{i}].input"), &reason);
            }
        }
    }

    fn validate_quiz(&mut self, config: &LabConfig) {
        let questions = &config.quiz.questions;
        if questions.is_empty() {
            self.add_error("quiz.questions", "at least one question is required");
        }
        let mut seen = HashSet::new();
        for (i, q) in questions.iter().enumerate() {
            if q.question_id.trim().is_empty() {
                self.add_error(&format!("quiz.questions[{i}].id"), "question id cannot be empty");
            } else if !seen.insert(q.question_id.as_str()) {
                self.add_error(
                    &format!("quiz.questions[{i}].id"),
                    &format!("duplicate question id '{}'", q.question_id),
                );
            }
            if q.correct_option_id.trim().is_empty() {
                self.add_error(
                    &format!("quiz.questions[{i}].correct"),
                    "correct option cannot be empty",
                );
            }
        }

        let tiers = &config.quiz.tiers;
        for (name, score) in [("a", tiers.scores.a), ("b", tiers.scores.b), ("c", tiers.scores.c)] {
            if score > 100 {
                self.add_error(
                    &format!("quiz.tiers.scores.{name}"),
                    &format!("score {score} is above 100"),
                );
            }
        }
        if !(tiers.scores.a >= tiers.scores.b && tiers.scores.b >= tiers.scores.c) {
            self.add_warning("quiz.tiers.scores", "tier scores are not descending");
        }
        if let Some(min) = tiers.partial_credit_min {
            if min == 0 || (!questions.is_empty() && min >= questions.len()) {
                self.add_error(
                    "quiz.tiers.partial_credit_min",
                    &format!(
                        "must be between 1 and {} for {} questions",
                        questions.len().saturating_sub(1),
                        questions.len()
                    ),
                );
            }
        }
    }

    fn validate_timings(&mut self, config: &LabConfig) {
        let duration = self.validate_duration(&config.trials.duration, "trials.duration");
        let tick = self.validate_duration(&config.trials.tick, "trials.tick");
        if tick.is_some_and(|t| t.is_zero()) {
            self.add_error("trials.tick", "tick interval must be greater than zero");
        }
        if let (Some(duration), Some(tick)) = (duration, tick) {
            if tick > duration && !duration.is_zero() {
                self.add_warning("trials.tick", "tick is longer than the trial duration");
            }
        }
        if let Some(pacing) = &config.pacing.result_to_quiz {
            self.validate_duration(pacing, "pacing.result_to_quiz");
        }
        if let Some(timeout) = &config.reward.timeout {
            if self
                .validate_duration(timeout, "reward.timeout")
                .is_some_and(|t| t.is_zero())
            {
                self.add_error("reward.timeout", "timeout must be greater than zero");
            }
        }
    }

    /// Parses a `humantime` duration string (e.g. `"3500ms"`, `"2s"`).
    fn validate_duration(&mut self, value: &str, path: &str) -> Option<std::time::Duration> {
        match humantime::parse_duration(value.trim()) {
            Ok(d) => Some(d),
            Err(e) => {
                self.add_error(path, &format!("invalid duration '{value}': {e}"));
                None
            }
        }
    }

    fn validate_limits(&mut self, config: &LabConfig, limits: &ConfigLimits) {
        let checks = [
            ("supplies.items", config.supplies.items.len(), limits.max_supplies, "LABSIM_MAX_SUPPLIES"),
            ("trials.slots", config.trials.slots.len(), limits.max_trials, "LABSIM_MAX_TRIALS"),
            ("quiz.questions", config.quiz.questions.len(), limits.max_questions, "LABSIM_MAX_QUESTIONS"),
        ];
        for (path, count, max, var) in checks {
            if count > max {
                self.add_error(
                    path,
                    &format!("too many entries: {count} (maximum: {max}). Set {var} to increase the limit."),
                );
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
