//! Guided experiment engine
//!
//! The phase state machine and the components it composes: the supply
//! gate, trial simulators, the completion barrier, the quiz evaluator and
//! the reward gate. [`PhaseController`] is the entry point.

pub mod barrier;
pub mod controller;
pub mod quiz;
pub mod reward;
pub mod state;
pub mod supply;
pub mod trial;

pub use barrier::TrialBarrier;
pub use controller::{PhaseController, QuizReport, TimerReport};
pub use quiz::{
    FeedbackClass, QuizAnswerKey, QuizEvaluator, QuizSubmission, QuizVerdict, ScoreTier,
    TierPolicy,
};
pub use reward::{GrantOutcome, GrantStatus, RewardGate};
pub use state::{LabTransition, Phase, SessionSnapshot, SessionState};
pub use supply::{CollectOutcome, SupplyGate};
pub use trial::{TickPlan, TrialId, TrialRecord, TrialSimulator, TrialStatus};
