//! Lab configuration
//!
//! Lab documents are YAML files describing one guided experiment: its
//! supplies, trial slots and timing, outcome model, quiz key and narration.
//! [`LabLoader`] turns a document into an immutable [`LabDefinition`].

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, LabLoader, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};

use std::sync::Arc;
use std::time::Duration;

use crate::engine::quiz::{QuizAnswerKey, TierPolicy};
use crate::engine::reward::DEFAULT_GRANT_TIMEOUT;
use crate::engine::trial::{TickPlan, TrialId};
use crate::error::ConfigError;
use crate::narrator::NarrationScript;
use crate::outcome::{OutcomeModel, TrialInput, build_model};

/// One trial slot of a resolved lab.
#[derive(Debug, Clone)]
pub struct TrialSlot {
    /// Slot id
    pub id: TrialId,
    /// Display label
    pub label: String,
    /// Fixed input, if the slot has one
    pub preset: Option<TrialInput>,
}

/// A resolved lab: durations parsed, outcome model built.
///
/// Shared read-only between the controller and anything presenting the lab.
#[derive(Debug, Clone)]
pub struct LabDefinition {
    /// Lab id
    pub id: String,
    /// Lab title
    pub title: String,
    /// Supplies, in lab order
    pub supplies: Vec<SupplyItem>,
    /// Supply collection order
    pub collection_order: CollectionOrder,
    /// Trial slots, in lab order
    pub trials: Vec<TrialSlot>,
    /// Timing of every trial
    pub plan: TickPlan,
    /// Only one trial may run at a time
    pub exclusive_trials: bool,
    /// Outcome function
    pub model: Arc<dyn OutcomeModel>,
    /// Answer key
    pub quiz_key: QuizAnswerKey,
    /// Tier thresholds and scores
    pub tier_policy: TierPolicy,
    /// Delay between results and quiz
    pub pacing: Duration,
    /// Bound on each progress store call
    pub reward_timeout: Duration,
    /// Narrator lines
    pub narration: NarrationScript,
}

impl LabDefinition {
    /// Resolves a validated document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for an unparseable duration.
    pub fn from_config(config: &LabConfig) -> Result<Self, ConfigError> {
        let plan = TickPlan {
            duration: parse_duration("trials.duration", &config.trials.duration)?,
            tick: parse_duration("trials.tick", &config.trials.tick)?,
        };
        let pacing = config
            .pacing
            .result_to_quiz
            .as_deref()
            .map(|v| parse_duration("pacing.result_to_quiz", v))
            .transpose()?
            .unwrap_or(Duration::ZERO);
        let reward_timeout = config
            .reward
            .timeout
            .as_deref()
            .map(|v| parse_duration("reward.timeout", v))
            .transpose()?
            .unwrap_or(DEFAULT_GRANT_TIMEOUT);

        let scores = config.quiz.tiers.scores;
        Ok(Self {
            id: config.lab.id.clone(),
            title: config.lab.title.clone(),
            supplies: config.supplies.items.clone(),
            collection_order: config.supplies.order,
            trials: config
                .trials
                .slots
                .iter()
                .map(|slot| TrialSlot {
                    id: TrialId::new(slot.id.clone()),
                    label: slot.label.clone(),
                    preset: slot.input.clone(),
                })
                .collect(),
            plan,
            exclusive_trials: config.trials.exclusive,
            model: build_model(&config.outcome),
            quiz_key: QuizAnswerKey(config.quiz.questions.clone()),
            tier_policy: TierPolicy {
                partial_credit_min: config.quiz.tiers.partial_credit_min,
                scores: [scores.a, scores.b, scores.c],
            },
            pacing,
            reward_timeout,
            narration: config.narration.clone(),
        })
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        expected: "a duration such as \"700ms\" or \"2s\"".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_durations_and_defaults() {
        let config: LabConfig = serde_yaml::from_str(
            r"
lab: { id: ohms-law, title: Ohm's Law }
trials: { duration: 2s, tick: 500ms, slots: [{ id: r1, label: Reading 1 }] }
outcome: { model: ohms_law }
quiz: { questions: [{ id: q1, correct: a }] }
pacing: { result_to_quiz: 1500ms }
",
        )
        .unwrap();
        let lab = LabDefinition::from_config(&config).unwrap();
        assert_eq!(lab.plan.duration, Duration::from_secs(2));
        assert_eq!(lab.plan.tick, Duration::from_millis(500));
        assert_eq!(lab.pacing, Duration::from_millis(1500));
        assert_eq!(lab.reward_timeout, DEFAULT_GRANT_TIMEOUT);
        assert_eq!(lab.trials[0].id.as_str(), "r1");
        assert_eq!(lab.tier_policy, TierPolicy::default());
        assert_eq!(lab.quiz_key.len(), 1);
    }

    #[test]
    fn bad_duration_is_invalid_value() {
        let err = parse_duration("trials.tick", "fast").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "trials.tick"));
    }
}
