//! Trial inputs, outcomes, and the per-lab outcome functions.
//!
//! The engine treats a [`TrialInput`] as opaque. An [`OutcomeModel`] maps it
//! to a [`TrialOutcome`] deterministically and names the end value of the
//! quantity the presentation layer animates while the trial runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::schema::{LookupCase, OutcomeSpec};

/// Lab-specific parameter bundle for one trial.
///
/// Keys are lab-defined (`voltage`, `water`, `reagent`, ...). Ordering is
/// stable so two equal inputs always serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialInput(BTreeMap<String, Value>);

impl TrialInput {
    /// Creates an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the input with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `key` as a number.
    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Returns `key` as a boolean flag.
    #[must_use]
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Returns `key` rendered as text; strings are used verbatim, scalars
    /// through their JSON form.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
            other => Some(other.to_string()),
        }
    }

    /// Returns `true` if no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TrialInput {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Lab-defined outcome class (`rusted`, `no_rust`, `purple`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Classification(String);

impl Classification {
    /// Creates a classification.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the classification name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one trial. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialOutcome {
    /// Outcome class
    pub classification: Classification,
    /// Measured quantity, when the lab has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric_factor: Option<f64>,
}

impl TrialOutcome {
    /// Creates an outcome without a numeric factor.
    #[must_use]
    pub fn classified(classification: impl Into<String>) -> Self {
        Self {
            classification: Classification::new(classification),
            numeric_factor: None,
        }
    }

    /// Returns the outcome with a numeric factor attached.
    #[must_use]
    pub const fn with_factor(mut self, factor: f64) -> Self {
        self.numeric_factor = Some(factor);
        self
    }
}

/// Pure, deterministic mapping from trial input to trial outcome.
pub trait OutcomeModel: Send + Sync + std::fmt::Debug {
    /// Checks that `input` carries what [`evaluate`](Self::evaluate) needs.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the input is unusable.
    fn validate(&self, input: &TrialInput) -> Result<(), String>;

    /// Computes the outcome. Only called with inputs that passed `validate`.
    fn evaluate(&self, input: &TrialInput) -> TrialOutcome;

    /// End value of the animated quantity for this input.
    fn progress_target(&self, _input: &TrialInput) -> f64 {
        100.0
    }
}

/// Builds the model described by a lab's `outcome` section.
#[must_use]
pub fn build_model(spec: &OutcomeSpec) -> Arc<dyn OutcomeModel> {
    match spec {
        OutcomeSpec::OhmsLaw {
            voltage_key,
            resistance_key,
            decimals,
            classification,
        } => Arc::new(OhmsLaw {
            voltage_key: voltage_key.clone(),
            resistance_key: resistance_key.clone(),
            decimals: *decimals,
            classification: Classification::new(classification.clone()),
        }),
        OutcomeSpec::Conjunction {
            require,
            positive,
            negative,
        } => Arc::new(Conjunction {
            require: require.clone(),
            positive: Classification::new(positive.clone()),
            negative: Classification::new(negative.clone()),
        }),
        OutcomeSpec::Lookup {
            key,
            cases,
            default,
        } => Arc::new(Lookup {
            key: key.clone(),
            cases: cases.clone(),
            default: default.clone().map(Classification::new),
        }),
    }
}

// ============================================================================
// Built-in models
// ============================================================================

/// `I = V / R`, rounded to a fixed number of decimals.
#[derive(Debug, Clone)]
pub struct OhmsLaw {
    /// Input key holding the voltage in volts
    pub voltage_key: String,
    /// Input key holding the resistance in ohms
    pub resistance_key: String,
    /// Decimal places kept in the computed current
    pub decimals: u32,
    /// Classification attached to every reading
    pub classification: Classification,
}

impl Default for OhmsLaw {
    fn default() -> Self {
        Self {
            voltage_key: "voltage".into(),
            resistance_key: "resistance".into(),
            decimals: 3,
            classification: Classification::new("measured"),
        }
    }
}

impl OhmsLaw {
    fn current(&self, input: &TrialInput) -> f64 {
        let voltage = input.number(&self.voltage_key).unwrap_or(0.0);
        let resistance = input.number(&self.resistance_key).unwrap_or(f64::INFINITY);
        let scale = 10f64.powi(self.decimals.min(12) as i32);
        (voltage / resistance * scale).round() / scale
    }
}

impl OutcomeModel for OhmsLaw {
    fn validate(&self, input: &TrialInput) -> Result<(), String> {
        let voltage = input
            .number(&self.voltage_key)
            .ok_or_else(|| format!("'{}' must be a number", self.voltage_key))?;
        let resistance = input
            .number(&self.resistance_key)
            .ok_or_else(|| format!("'{}' must be a number", self.resistance_key))?;
        if !voltage.is_finite() || voltage < 0.0 {
            return Err(format!("'{}' must be a non-negative number", self.voltage_key));
        }
        if !resistance.is_finite() || resistance <= 0.0 {
            return Err(format!("'{}' must be greater than zero", self.resistance_key));
        }
        Ok(())
    }

    fn evaluate(&self, input: &TrialInput) -> TrialOutcome {
        TrialOutcome {
            classification: self.classification.clone(),
            numeric_factor: Some(self.current(input)),
        }
    }

    fn progress_target(&self, input: &TrialInput) -> f64 {
        self.current(input)
    }
}

/// Positive classification iff every required flag is `true`.
///
/// Rusting: a nail rusts only with water *and* oxygen present.
#[derive(Debug, Clone)]
pub struct Conjunction {
    /// Flags that must all be set
    pub require: Vec<String>,
    /// Classification when every flag is set
    pub positive: Classification,
    /// Classification otherwise
    pub negative: Classification,
}

impl Conjunction {
    fn holds(&self, input: &TrialInput) -> bool {
        self.require
            .iter()
            .all(|key| input.flag(key).unwrap_or(false))
    }
}

impl OutcomeModel for Conjunction {
    fn validate(&self, input: &TrialInput) -> Result<(), String> {
        match self.require.iter().find(|key| input.flag(key).is_none()) {
            Some(key) => Err(format!("'{key}' must be true or false")),
            None => Ok(()),
        }
    }

    fn evaluate(&self, input: &TrialInput) -> TrialOutcome {
        let classification = if self.holds(input) {
            self.positive.clone()
        } else {
            self.negative.clone()
        };
        TrialOutcome {
            classification,
            numeric_factor: None,
        }
    }

    fn progress_target(&self, input: &TrialInput) -> f64 {
        if self.holds(input) { 100.0 } else { 0.0 }
    }
}

/// Classification and factor chosen by the value of one input key.
///
/// Food tests (reagent → colour), photosynthesis (light → bubble rate).
#[derive(Debug, Clone)]
pub struct Lookup {
    /// Input key that selects the case
    pub key: String,
    /// Cases in match order
    pub cases: Vec<LookupCase>,
    /// Classification for values no case matches
    pub default: Option<Classification>,
}

impl Lookup {
    fn case_for(&self, input: &TrialInput) -> Option<&LookupCase> {
        let value = input.text(&self.key)?;
        self.cases.iter().find(|case| case.when == value)
    }
}

impl OutcomeModel for Lookup {
    fn validate(&self, input: &TrialInput) -> Result<(), String> {
        let Some(value) = input.text(&self.key) else {
            return Err(format!("'{}' is required", self.key));
        };
        if self.case_for(input).is_none() && self.default.is_none() {
            return Err(format!("'{}' has no outcome for '{value}'", self.key));
        }
        Ok(())
    }

    fn evaluate(&self, input: &TrialInput) -> TrialOutcome {
        match self.case_for(input) {
            Some(case) => TrialOutcome {
                classification: Classification::new(case.classification.clone()),
                numeric_factor: case.factor,
            },
            None => TrialOutcome {
                classification: self
                    .default
                    .clone()
                    .unwrap_or_else(|| Classification::new("unknown")),
                numeric_factor: None,
            },
        }
    }

    fn progress_target(&self, input: &TrialInput) -> f64 {
        self.case_for(input)
            .and_then(|case| case.factor)
            .unwrap_or(100.0)
    }
}

/// Adapts a closure into an [`OutcomeModel`] that accepts every input.
pub struct FnOutcome<F>(pub F);

impl<F> std::fmt::Debug for FnOutcome<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOutcome").finish_non_exhaustive()
    }
}

impl<F> OutcomeModel for FnOutcome<F>
where
    F: Fn(&TrialInput) -> TrialOutcome + Send + Sync,
{
    fn validate(&self, _input: &TrialInput) -> Result<(), String> {
        Ok(())
    }

    fn evaluate(&self, input: &TrialInput) -> TrialOutcome {
        (self.0)(input)
    }

    fn progress_target(&self, input: &TrialInput) -> f64 {
        (self.0)(input).numeric_factor.unwrap_or(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tube(water: bool, oxygen: bool) -> TrialInput {
        TrialInput::new().with("water", water).with("oxygen", oxygen)
    }

    fn rusting() -> Conjunction {
        Conjunction {
            require: vec!["water".into(), "oxygen".into()],
            positive: Classification::new("rusted"),
            negative: Classification::new("no_rust"),
        }
    }

    #[test]
    fn ohms_law_five_volts_ten_ohms() {
        let model = OhmsLaw::default();
        let input = TrialInput::new().with("voltage", 5).with("resistance", 10);

        assert!(model.validate(&input).is_ok());
        let outcome = model.evaluate(&input);
        assert_eq!(outcome.numeric_factor, Some(0.5));
        assert_eq!(outcome.classification.as_str(), "measured");
        assert_eq!(model.evaluate(&input), outcome);
    }

    #[test]
    fn ohms_law_rounds_to_three_decimals() {
        let model = OhmsLaw::default();
        let input = TrialInput::new().with("voltage", 1).with("resistance", 3);
        assert_eq!(model.evaluate(&input).numeric_factor, Some(0.333));
    }

    #[test]
    fn ohms_law_rejects_zero_resistance() {
        let model = OhmsLaw::default();
        let input = TrialInput::new().with("voltage", 5).with("resistance", 0);
        let err = model.validate(&input).unwrap_err();
        assert!(err.contains("resistance"));
    }

    #[test]
    fn ohms_law_requires_numbers() {
        let model = OhmsLaw::default();
        let input = TrialInput::new().with("voltage", "five").with("resistance", 10);
        assert!(model.validate(&input).is_err());
    }

    #[test]
    fn conjunction_needs_every_flag() {
        let model = rusting();
        assert_eq!(model.evaluate(&tube(true, true)).classification.as_str(), "rusted");
        assert_eq!(model.evaluate(&tube(true, false)).classification.as_str(), "no_rust");
        assert_eq!(model.evaluate(&tube(false, true)).classification.as_str(), "no_rust");
        assert!((model.progress_target(&tube(true, true)) - 100.0).abs() < f64::EPSILON);
        assert!(model.progress_target(&tube(false, true)).abs() < f64::EPSILON);
    }

    #[test]
    fn conjunction_validate_names_missing_flag() {
        let model = rusting();
        let input = TrialInput::new().with("water", true);
        assert_eq!(model.validate(&input).unwrap_err(), "'oxygen' must be true or false");
    }

    #[test]
    fn lookup_matches_case_and_factor() {
        let model = Lookup {
            key: "intensity".into(),
            cases: vec![
                LookupCase {
                    when: "low".into(),
                    classification: "few_bubbles".into(),
                    factor: Some(5.0),
                },
                LookupCase {
                    when: "high".into(),
                    classification: "many_bubbles".into(),
                    factor: Some(25.0),
                },
            ],
            default: None,
        };
        let high = TrialInput::new().with("intensity", "high");
        let outcome = model.evaluate(&high);
        assert_eq!(outcome.classification.as_str(), "many_bubbles");
        assert_eq!(outcome.numeric_factor, Some(25.0));
        assert!((model.progress_target(&high) - 25.0).abs() < f64::EPSILON);

        let unknown = TrialInput::new().with("intensity", "blinding");
        assert!(model.validate(&unknown).is_err());
        assert!(model.validate(&TrialInput::new()).is_err());
    }

    #[test]
    fn lookup_falls_back_to_default() {
        let model = Lookup {
            key: "reagent".into(),
            cases: vec![],
            default: Some(Classification::new("no_change")),
        };
        let input = TrialInput::new().with("reagent", "water");
        assert!(model.validate(&input).is_ok());
        assert_eq!(model.evaluate(&input).classification.as_str(), "no_change");
    }

    #[test]
    fn fn_outcome_delegates() {
        let model = FnOutcome(|input: &TrialInput| {
            TrialOutcome::classified("doubled")
                .with_factor(input.number("x").unwrap_or(0.0) * 2.0)
        });
        let input = TrialInput::new().with("x", 4);
        assert_eq!(model.evaluate(&input).numeric_factor, Some(8.0));
        assert!((model.progress_target(&input) - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn input_text_renders_scalars() {
        let input = TrialInput::new().with("n", 3).with("s", "abc").with("b", true);
        assert_eq!(input.text("n").as_deref(), Some("3"));
        assert_eq!(input.text("s").as_deref(), Some("abc"));
        assert_eq!(input.text("b").as_deref(), Some("true"));
        assert_eq!(input.text("missing"), None);
    }

    #[test]
    fn build_model_from_spec() {
        let spec = OutcomeSpec::Conjunction {
            require: vec!["water".into(), "oxygen".into()],
            positive: "rusted".into(),
            negative: "no_rust".into(),
        };
        let model = build_model(&spec);
        assert_eq!(model.evaluate(&tube(true, true)).classification.as_str(), "rusted");
    }

    #[derive(Debug)]
    struct Fixed;

    impl OutcomeModel for Fixed {
        fn validate(&self, _input: &TrialInput) -> Result<(), String> {
            Ok(())
        }

        fn evaluate(&self, _input: &TrialInput) -> TrialOutcome {
            TrialOutcome::classified("done")
        }
    }

    #[test]
    fn default_progress_target_ignores_input() {
        let target = Fixed.progress_target(&tube(false, false));
        assert!((target - 100.0).abs() < f64::EPSILON);
        assert!((Fixed.progress_target(&TrialInput::new()) - target).abs() < f64::EPSILON);
    }
}
