//! Lab configuration schema
//!
//! Raw YAML shape of a lab document. Types here are deserialized as-is and
//! checked by the [`Validator`](super::validation::Validator) before being
//! resolved into a [`LabDefinition`](super::LabDefinition).

use serde::{Deserialize, Serialize};

use crate::engine::quiz::AnswerKeyEntry;
use crate::narrator::NarrationScript;
use crate::outcome::TrialInput;

/// Root of a lab document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabConfig {
    /// Lab identity
    pub lab: LabMetadata,

    /// Supplies to collect before setup
    #[serde(default)]
    pub supplies: SuppliesConfig,

    /// Trial slots and timing
    pub trials: TrialsConfig,

    /// Outcome function shared by every trial
    pub outcome: OutcomeSpec,

    /// Answer key and tier policy
    pub quiz: QuizConfig,

    /// Cosmetic delays
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Reward grant settings
    #[serde(default)]
    pub reward: RewardConfig,

    /// Narrator lines
    #[serde(default)]
    pub narration: NarrationScript,
}

/// Lab identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabMetadata {
    /// Stable id; the reward ledger and progress store key on it
    pub id: String,

    /// Human-readable title
    pub title: String,
}

// ============================================================================
// Supplies
// ============================================================================

/// Supply section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuppliesConfig {
    /// Collection order
    #[serde(default)]
    pub order: CollectionOrder,

    /// Supply items, in lab order
    #[serde(default)]
    pub items: Vec<SupplyItem>,
}

/// Whether supplies may be collected in any order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionOrder {
    /// Any order
    #[default]
    Any,
    /// Required items only in list order
    Sequential,
}

/// One supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupplyItem {
    /// Supply id
    pub id: String,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Whether the item gates `CollectSupplies → Setup`
    #[serde(default = "default_true")]
    pub required: bool,
}

const fn default_true() -> bool {
    true
}

// ============================================================================
// Trials
// ============================================================================

/// Trial section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialsConfig {
    /// Simulated duration of each trial (e.g. `"3500ms"`)
    pub duration: String,

    /// Progress tick interval (e.g. `"700ms"`)
    pub tick: String,

    /// Only one trial may run at a time
    #[serde(default)]
    pub exclusive: bool,

    /// Trial slots, in lab order
    pub slots: Vec<TrialSlotConfig>,
}

/// One trial slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrialSlotConfig {
    /// Slot id
    pub id: String,

    /// Display label
    #[serde(default)]
    pub label: String,

    /// Fixed input for slots whose conditions the learner does not choose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<TrialInput>,
}

// ============================================================================
// Outcome
// ============================================================================

/// Built-in outcome model, tagged by `model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum OutcomeSpec {
    /// `I = V / R`
    OhmsLaw {
        /// Input key of the voltage
        #[serde(default = "default_voltage_key")]
        voltage_key: String,
        /// Input key of the resistance
        #[serde(default = "default_resistance_key")]
        resistance_key: String,
        /// Decimal places kept in the current
        #[serde(default = "default_decimals")]
        decimals: u32,
        /// Classification of every reading
        #[serde(default = "default_measured")]
        classification: String,
    },

    /// Positive iff every required flag is true
    Conjunction {
        /// Required boolean input keys
        require: Vec<String>,
        /// Classification when all hold
        positive: String,
        /// Classification otherwise
        negative: String,
    },

    /// Classification chosen by the value of one key
    Lookup {
        /// Input key to match on
        key: String,
        /// Cases in match order
        cases: Vec<LookupCase>,
        /// Classification when no case matches
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
}

fn default_voltage_key() -> String {
    "voltage".into()
}

fn default_resistance_key() -> String {
    "resistance".into()
}

const fn default_decimals() -> u32 {
    3
}

fn default_measured() -> String {
    "measured".into()
}

/// One case of a lookup model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupCase {
    /// Input value that selects the case
    pub when: String,
    /// Resulting classification
    pub classification: String,
    /// Resulting numeric factor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
}

// ============================================================================
// Quiz, pacing, reward
// ============================================================================

/// Quiz section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuizConfig {
    /// Answer key, in question order
    pub questions: Vec<AnswerKeyEntry>,

    /// Tier thresholds and scores
    #[serde(default)]
    pub tiers: TiersConfig,
}

/// Tier policy section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TiersConfig {
    /// Minimum correct answers for tier B
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_credit_min: Option<usize>,

    /// Scores per tier
    #[serde(default)]
    pub scores: TierScores,
}

/// Score per tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierScores {
    /// Tier A score
    pub a: u8,
    /// Tier B score
    pub b: u8,
    /// Tier C score
    pub c: u8,
}

impl Default for TierScores {
    fn default() -> Self {
        Self { a: 100, b: 75, c: 50 }
    }
}

/// Pacing section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacingConfig {
    /// Delay between opening the quiz from results and the quiz appearing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_to_quiz: Option<String>,
}

/// Reward section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardConfig {
    /// Bound on each progress store call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_document_parses() {
        let yaml = r"
lab: { id: ohms-law, title: Ohm's Law }
trials:
  duration: 2s
  tick: 500ms
  slots: [{ id: r1 }, { id: r2 }, { id: r3 }]
outcome: { model: ohms_law }
quiz:
  questions:
    - { id: q1, correct: b }
";
        let config: LabConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.lab.id, "ohms-law");
        assert_eq!(config.supplies.order, CollectionOrder::Any);
        assert!(config.supplies.items.is_empty());
        assert_eq!(config.trials.slots.len(), 3);
        assert!(!config.trials.exclusive);
        match config.outcome {
            OutcomeSpec::OhmsLaw { decimals, ref voltage_key, .. } => {
                assert_eq!(decimals, 3);
                assert_eq!(voltage_key, "voltage");
            }
            ref other => panic!("unexpected model {other:?}"),
        }
        assert_eq!(config.quiz.tiers.scores.b, 75);
    }

    #[test]
    fn supply_required_defaults_true() {
        let item: SupplyItem = serde_yaml::from_str("id: nails\nlabel: Iron nails").unwrap();
        assert!(item.required);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<SupplyItem>("id: nails\ncolour: grey").unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn slot_input_is_a_free_form_map() {
        let slot: TrialSlotConfig =
            serde_yaml::from_str("id: tube_a\ninput: { water: true, oxygen: false }").unwrap();
        let input = slot.input.unwrap();
        assert_eq!(input.flag("water"), Some(true));
        assert_eq!(input.flag("oxygen"), Some(false));
    }
}
