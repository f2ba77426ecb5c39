//! Session state representation
//!
//! The phase enum, the transition record handed to observers, and the
//! mutable per-session state owned by the `PhaseController`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::clock::TimerToken;
use crate::config::LabDefinition;

use super::barrier::TrialBarrier;
use super::quiz::{QuizSubmission, QuizVerdict};
use super::supply::SupplyGate;
use super::trial::{TrialId, TrialRecord, TrialSimulator};

/// Workflow phase of a guided experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Lab overview, nothing collected yet
    Intro,
    /// Learner gathers the lab's supplies
    CollectSupplies,
    /// Learner chooses trial inputs
    Setup,
    /// Timed simulations run
    Running,
    /// Trial outcomes are presented
    Result,
    /// Learner answers the quiz
    Quiz,
    /// Quiz passed with the top tier
    Complete,
}

impl Phase {
    /// Every phase, in workflow order.
    pub const ALL: [Self; 7] = [
        Self::Intro,
        Self::CollectSupplies,
        Self::Setup,
        Self::Running,
        Self::Result,
        Self::Quiz,
        Self::Complete,
    ];

    /// Returns the stable snake-case name of the phase.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Intro => "intro",
            Self::CollectSupplies => "collect_supplies",
            Self::Setup => "setup",
            Self::Running => "running",
            Self::Result => "result",
            Self::Quiz => "quiz",
            Self::Complete => "complete",
        }
    }

    /// Returns whether `self -> to` is an edge of the state machine.
    ///
    /// Reset (any phase back to `Intro`) is always an edge. Guards are
    /// checked separately by the controller.
    #[must_use]
    pub const fn has_edge_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (_, Self::Intro)
                | (Self::Intro, Self::CollectSupplies)
                | (Self::CollectSupplies, Self::Setup)
                | (Self::Setup, Self::Running)
                | (Self::Running, Self::Result)
                | (Self::Result | Self::Quiz, Self::Quiz)
                | (Self::Quiz, Self::Complete)
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Record of a phase transition for downstream processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabTransition {
    /// Phase we transitioned from
    pub from: Phase,
    /// Phase we transitioned to
    pub to: Phase,
    /// Human-readable reason the guard passed
    pub reason: String,
}

/// Mutable state of one learner's run through one lab.
///
/// Owned exclusively by the controller. A reset replaces the whole value;
/// reward history lives in the progress store and survives.
#[derive(Debug)]
pub struct SessionState {
    pub(crate) phase: Phase,
    pub(crate) supplies: SupplyGate,
    pub(crate) trials: IndexMap<TrialId, TrialSimulator>,
    pub(crate) barrier: TrialBarrier,
    pub(crate) submission: Option<QuizSubmission>,
    pub(crate) last_verdict: Option<QuizVerdict>,
    pub(crate) attempts: u32,
    pub(crate) reward_granted: bool,
    pub(crate) quiz_pacing: Option<TimerToken>,
}

impl SessionState {
    /// Builds a fresh `Intro` state for the given lab.
    #[must_use]
    pub fn new(lab: &LabDefinition) -> Self {
        let trials: IndexMap<TrialId, TrialSimulator> = lab
            .trials
            .iter()
            .map(|slot| {
                (
                    slot.id.clone(),
                    TrialSimulator::new(slot.id.clone(), lab.model.clone(), slot.preset.clone()),
                )
            })
            .collect();
        let barrier = TrialBarrier::new(trials.keys().cloned());

        Self {
            phase: Phase::Intro,
            supplies: SupplyGate::new(lab.supplies.clone(), lab.collection_order),
            trials,
            barrier,
            submission: None,
            last_verdict: None,
            attempts: 0,
            reward_granted: false,
            quiz_pacing: None,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the pending (not yet evaluated) quiz submission, if any.
    #[must_use]
    pub const fn submission(&self) -> Option<&QuizSubmission> {
        self.submission.as_ref()
    }

    /// Builds a serializable view of the state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            collected: self.supplies.collected_ids(),
            missing: self
                .supplies
                .missing()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            trials: self
                .trials
                .values()
                .map(|sim| TrialView {
                    record: sim.record().clone(),
                    progress: sim.progress(),
                })
                .collect(),
            trials_completed: self.barrier.completed(),
            trials_expected: self.barrier.expected(),
            attempts: self.attempts,
            last_verdict: self.last_verdict.clone(),
            reward_granted: self.reward_granted,
        }
    }
}

/// One trial as seen by the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct TrialView {
    /// Lifecycle record
    #[serde(flatten)]
    pub record: TrialRecord,
    /// Interpolated progress quantity
    pub progress: f64,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: Phase,
    /// Collected supply ids, in lab order
    pub collected: Vec<String>,
    /// Required supply ids still missing
    pub missing: Vec<String>,
    /// Every trial, in lab order
    pub trials: Vec<TrialView>,
    /// Trials that reported to the barrier
    pub trials_completed: usize,
    /// Trials the barrier waits for
    pub trials_expected: usize,
    /// Quiz submissions evaluated so far
    pub attempts: u32,
    /// Verdict of the latest evaluated submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<QuizVerdict>,
    /// Whether a submission in this session produced XP
    pub reward_granted: bool,
}
