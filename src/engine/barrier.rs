//! Trial barrier.
//!
//! Collects one outcome per expected trial and opens once all have reported.
//! Outcomes are kept in lab order regardless of completion order.

use indexmap::IndexMap;

use crate::error::EngineError;
use crate::outcome::TrialOutcome;

use super::trial::TrialId;

/// Waits for every trial of a lab to report.
#[derive(Debug, Clone)]
pub struct TrialBarrier {
    slots: IndexMap<TrialId, Option<TrialOutcome>>,
}

impl TrialBarrier {
    /// Creates a closed barrier expecting the given trials.
    pub fn new(expected: impl IntoIterator<Item = TrialId>) -> Self {
        Self {
            slots: expected.into_iter().map(|id| (id, None)).collect(),
        }
    }

    /// Records the outcome of `id`.
    ///
    /// Reporting the same trial twice keeps the first outcome. Returns `true`
    /// if this call opened the barrier.
    ///
    /// # Errors
    ///
    /// `UnknownTrial` if the barrier does not expect `id`.
    pub fn submit(&mut self, id: &TrialId, outcome: TrialOutcome) -> Result<bool, EngineError> {
        let was_open = self.is_open();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownTrial { id: id.to_string() })?;
        if slot.is_none() {
            *slot = Some(outcome);
        }
        Ok(!was_open && self.is_open())
    }

    /// Returns `true` once every expected trial has reported.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.slots.values().all(Option::is_some)
    }

    /// Number of trials that have reported.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_some()).count()
    }

    /// Number of trials the barrier waits for.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.slots.len()
    }

    /// Trials that have not reported yet, in lab order.
    #[must_use]
    pub fn outstanding(&self) -> Vec<&TrialId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    /// Fails unless the barrier is open.
    ///
    /// # Errors
    ///
    /// `IncompleteTrials` with the completed and expected counts.
    pub fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::IncompleteTrials {
                completed: self.completed(),
                expected: self.expected(),
            })
        }
    }

    /// Reported outcomes, in lab order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&TrialId, &TrialOutcome)> {
        self.slots
            .iter()
            .filter_map(|(id, slot)| slot.as_ref().map(|outcome| (id, outcome)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tubes() -> TrialBarrier {
        TrialBarrier::new(["tube_a", "tube_b", "tube_c"].map(TrialId::from))
    }

    #[test]
    fn opens_after_every_trial_reports() {
        let mut barrier = tubes();
        assert!(!barrier.submit(&"tube_c".into(), TrialOutcome::classified("no_rust")).unwrap());
        assert!(!barrier.submit(&"tube_a".into(), TrialOutcome::classified("rusted")).unwrap());
        assert_eq!(
            barrier.ensure_open().unwrap_err(),
            EngineError::IncompleteTrials {
                completed: 2,
                expected: 3
            }
        );
        assert_eq!(barrier.outstanding(), vec![&TrialId::from("tube_b")]);

        assert!(barrier.submit(&"tube_b".into(), TrialOutcome::classified("no_rust")).unwrap());
        assert!(barrier.ensure_open().is_ok());

        let order: Vec<&str> = barrier.outcomes().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["tube_a", "tube_b", "tube_c"]);
    }

    #[test]
    fn duplicate_report_keeps_first_outcome() {
        let mut barrier = tubes();
        barrier.submit(&"tube_a".into(), TrialOutcome::classified("rusted")).unwrap();
        assert!(!barrier.submit(&"tube_a".into(), TrialOutcome::classified("no_rust")).unwrap());
        assert_eq!(barrier.completed(), 1);
        let (_, outcome) = barrier.outcomes().next().unwrap();
        assert_eq!(outcome.classification.as_str(), "rusted");
    }

    #[test]
    fn unknown_trial_is_rejected() {
        let mut barrier = tubes();
        let err = barrier
            .submit(&"tube_z".into(), TrialOutcome::classified("rusted"))
            .unwrap_err();
        assert_eq!(err, EngineError::UnknownTrial { id: "tube_z".into() });
        assert_eq!(barrier.completed(), 0);
    }

    #[test]
    fn reopening_is_not_reported_twice() {
        let mut barrier = TrialBarrier::new([TrialId::from("only")]);
        assert!(barrier.submit(&"only".into(), TrialOutcome::classified("x")).unwrap());
        assert!(!barrier.submit(&"only".into(), TrialOutcome::classified("x")).unwrap());
    }
}
