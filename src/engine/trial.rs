//! Timed trial simulation
//!
//! A [`TrialSimulator`] owns one trial's lifecycle (`Pending → Running →
//! Done`). Progress ticks arrive as clock timers; the simulator keeps the
//! token of the tick it is waiting for and treats every other token as stale.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::clock::{Clock, TimerEvent, TimerToken};
use crate::error::EngineError;
use crate::outcome::{OutcomeModel, TrialInput, TrialOutcome};

/// Identifier of a trial slot within a lab (`tube_a`, `reading_3`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TrialId(String);

impl TrialId {
    /// Creates a trial id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrialId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::borrow::Borrow<str> for TrialId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Not started, or cancelled
    Pending,
    /// Simulation in flight
    Running,
    /// Outcome produced; immutable until reset
    Done,
}

/// Simulated duration of a trial and the interval between progress ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPlan {
    /// Total simulated duration
    pub duration: Duration,
    /// Interval between progress ticks
    pub tick: Duration,
}

impl TickPlan {
    /// Tick interval actually used; never shorter than 1 ms.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.tick.max(Duration::from_millis(1))
    }

    /// Number of ticks a trial takes from start to outcome.
    #[must_use]
    pub fn ticks(&self) -> u32 {
        if self.duration.is_zero() {
            return 1;
        }
        let tick = self.interval().as_nanos();
        let n = self.duration.as_nanos().div_ceil(tick);
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// Snapshot-able record of one trial.
#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    /// Trial id
    pub id: TrialId,
    /// Input the trial runs (or will run) with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<TrialInput>,
    /// Lifecycle state
    pub status: TrialStatus,
    /// Outcome, present iff `status == Done`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TrialOutcome>,
    /// Simulated time elapsed since start
    #[serde(with = "secs_f64")]
    pub elapsed: Duration,
}

/// What a delivered tick did to the trial.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResult {
    /// The trial advanced and scheduled its next tick
    Progress {
        /// Simulated time elapsed since start
        elapsed: Duration,
        /// Interpolated value of the animated quantity
        value: f64,
    },
    /// The trial finished
    Completed(TrialOutcome),
    /// The token was not the one the trial waits for
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    plan: TickPlan,
    token: TimerToken,
}

/// Runs one trial.
#[derive(Debug)]
pub struct TrialSimulator {
    record: TrialRecord,
    model: Arc<dyn OutcomeModel>,
    running: Option<InFlight>,
    target: f64,
}

impl TrialSimulator {
    /// Creates a pending trial, optionally with a preset input.
    ///
    /// A preset that the model rejects is dropped; the learner must pick an
    /// input before the trial can start.
    #[must_use]
    pub fn new(id: TrialId, model: Arc<dyn OutcomeModel>, preset: Option<TrialInput>) -> Self {
        let input = preset.filter(|input| model.validate(input).is_ok());
        let target = input.as_ref().map_or(0.0, |i| model.progress_target(i));
        Self {
            record: TrialRecord {
                id,
                input,
                status: TrialStatus::Pending,
                outcome: None,
                elapsed: Duration::ZERO,
            },
            model,
            running: None,
            target,
        }
    }

    /// Returns the trial id.
    #[must_use]
    pub const fn id(&self) -> &TrialId {
        &self.record.id
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn status(&self) -> TrialStatus {
        self.record.status
    }

    /// Returns the trial record.
    #[must_use]
    pub const fn record(&self) -> &TrialRecord {
        &self.record
    }

    /// Returns the input selected for the trial.
    #[must_use]
    pub const fn selected_input(&self) -> Option<&TrialInput> {
        self.record.input.as_ref()
    }

    /// Returns the token of the tick the trial waits for.
    #[must_use]
    pub fn pending_token(&self) -> Option<TimerToken> {
        self.running.map(|r| r.token)
    }

    fn guard_idle(&self) -> Result<(), EngineError> {
        match self.record.status {
            TrialStatus::Done => Err(EngineError::AlreadyComplete {
                trial: self.record.id.to_string(),
            }),
            TrialStatus::Running => Err(EngineError::AlreadyRunning {
                trial: self.record.id.to_string(),
            }),
            TrialStatus::Pending => Ok(()),
        }
    }

    fn check(&self, input: &TrialInput) -> Result<(), EngineError> {
        self.model
            .validate(input)
            .map_err(|reason| EngineError::InvalidInput {
                trial: self.record.id.to_string(),
                reason,
            })
    }

    /// Selects the input for a pending trial.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` / `AlreadyComplete` if the trial is not pending,
    /// `InvalidInput` if the outcome model rejects `input`.
    pub fn select_input(&mut self, input: TrialInput) -> Result<(), EngineError> {
        self.guard_idle()?;
        self.check(&input)?;
        self.target = self.model.progress_target(&input);
        self.record.input = Some(input);
        Ok(())
    }

    /// Starts the simulation with `input`, or the selected input if `None`.
    ///
    /// Schedules the first tick and returns its token.
    ///
    /// # Errors
    ///
    /// `AlreadyComplete` / `AlreadyRunning` if the trial is not pending,
    /// `NoInputSelected` if neither `input` nor a selection exists,
    /// `InvalidInput` if the outcome model rejects the input.
    pub fn start(
        &mut self,
        input: Option<TrialInput>,
        plan: TickPlan,
        clock: &dyn Clock,
    ) -> Result<TimerToken, EngineError> {
        self.guard_idle()?;
        let input = match input {
            Some(input) => input,
            None => self
                .record
                .input
                .clone()
                .ok_or_else(|| EngineError::NoInputSelected {
                    trial: Some(self.record.id.to_string()),
                })?,
        };
        self.check(&input)?;

        self.target = self.model.progress_target(&input);
        self.record.input = Some(input);
        self.record.status = TrialStatus::Running;
        self.record.elapsed = Duration::ZERO;

        let token = self.schedule(plan, clock);
        debug!(trial = %self.record.id, ticks = plan.ticks(), "trial started");
        Ok(token)
    }

    fn schedule(&mut self, plan: TickPlan, clock: &dyn Clock) -> TimerToken {
        let remaining = plan.duration.saturating_sub(self.record.elapsed);
        let delay = plan.interval().min(remaining);
        let token = clock.after(delay, TimerEvent::TrialTick(self.record.id.clone()));
        self.running = Some(InFlight { plan, token });
        token
    }

    /// Cancels a running trial.
    ///
    /// The trial returns to `Pending` with its input kept. Returns `false`
    /// when the trial was not running.
    pub fn cancel(&mut self, clock: &dyn Clock) -> bool {
        let Some(in_flight) = self.running.take() else {
            return false;
        };
        clock.cancel(in_flight.token);
        self.record.status = TrialStatus::Pending;
        self.record.elapsed = Duration::ZERO;
        debug!(trial = %self.record.id, "trial cancelled");
        true
    }

    /// Applies a delivered tick.
    pub fn on_tick(&mut self, token: TimerToken, clock: &dyn Clock) -> TickResult {
        let Some(in_flight) = self.running.filter(|r| r.token == token) else {
            trace!(trial = %self.record.id, %token, "stale tick ignored");
            return TickResult::Stale;
        };

        let plan = in_flight.plan;
        let step = plan
            .interval()
            .min(plan.duration.saturating_sub(self.record.elapsed));
        self.record.elapsed = (self.record.elapsed + step).min(plan.duration);

        if self.record.elapsed >= plan.duration {
            self.running = None;
            // Input is always present while running.
            let outcome = self
                .record
                .input
                .as_ref()
                .map_or_else(|| TrialOutcome::classified("unknown"), |i| self.model.evaluate(i));
            self.record.status = TrialStatus::Done;
            self.record.outcome = Some(outcome.clone());
            debug!(trial = %self.record.id, outcome = %outcome.classification, "trial completed");
            return TickResult::Completed(outcome);
        }

        self.schedule(plan, clock);
        TickResult::Progress {
            elapsed: self.record.elapsed,
            value: self.progress(),
        }
    }

    /// Current value of the animated quantity.
    ///
    /// Linear in elapsed time from zero to the model's target; equals the
    /// target once done.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let target = self.target.max(0.0);
        match self.record.status {
            TrialStatus::Done => target,
            TrialStatus::Pending => 0.0,
            TrialStatus::Running => {
                let Some(in_flight) = self.running else {
                    return 0.0;
                };
                if in_flight.plan.duration.is_zero() {
                    return target;
                }
                let fraction = self.record.elapsed.as_secs_f64()
                    / in_flight.plan.duration.as_secs_f64();
                target * fraction.clamp(0.0, 1.0)
            }
        }
    }
}

/// Serializes `Duration` as fractional seconds.
mod secs_f64 {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::outcome::{Classification, Conjunction, OhmsLaw};

    fn plan() -> TickPlan {
        TickPlan {
            duration: Duration::from_millis(3500),
            tick: Duration::from_millis(700),
        }
    }

    fn rusting() -> Arc<dyn OutcomeModel> {
        Arc::new(Conjunction {
            require: vec!["water".into(), "oxygen".into()],
            positive: Classification::new("rusted"),
            negative: Classification::new("no_rust"),
        })
    }

    fn wet_air() -> TrialInput {
        TrialInput::new().with("water", true).with("oxygen", true)
    }

    fn run_to_end(
        sim: &mut TrialSimulator,
        clock: &ManualClock,
        rx: &mut crate::clock::TimerReceiver,
    ) -> Vec<TickResult> {
        let mut results = Vec::new();
        while clock.fire_next(Duration::from_secs(3600)) {
            while let Ok(fired) = rx.try_recv() {
                results.push(sim.on_tick(fired.token, clock));
            }
        }
        results
    }

    #[test]
    fn tick_plan_counts_partial_final_tick() {
        assert_eq!(plan().ticks(), 5);
        let uneven = TickPlan {
            duration: Duration::from_millis(1000),
            tick: Duration::from_millis(300),
        };
        assert_eq!(uneven.ticks(), 4);
    }

    #[test]
    fn zero_tick_interval_still_finishes() {
        let (clock, mut rx) = ManualClock::new();
        let zero = TickPlan {
            duration: Duration::from_millis(20),
            tick: Duration::ZERO,
        };
        assert_eq!(zero.interval(), Duration::from_millis(1));
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        sim.start(Some(wet_air()), zero, clock.as_ref()).unwrap();

        let results = run_to_end(&mut sim, &clock, &mut rx);
        assert_eq!(results.len(), 20);
        assert_eq!(u32::try_from(results.len()).unwrap(), zero.ticks());
        assert_eq!(sim.status(), TrialStatus::Done);
        assert_eq!(sim.record().elapsed, Duration::from_millis(20));
    }

    #[test]
    fn runs_five_ticks_then_completes() {
        let (clock, mut rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        sim.start(Some(wet_air()), plan(), clock.as_ref()).unwrap();
        assert_eq!(sim.status(), TrialStatus::Running);

        let results = run_to_end(&mut sim, &clock, &mut rx);
        assert_eq!(results.len(), 5);
        assert!(matches!(results[0], TickResult::Progress { .. }));
        match results.last().unwrap() {
            TickResult::Completed(outcome) => assert_eq!(outcome.classification.as_str(), "rusted"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(sim.status(), TrialStatus::Done);
        assert_eq!(sim.record().elapsed, Duration::from_millis(3500));
        assert!((sim.progress() - 100.0).abs() < f64::EPSILON);
        assert_eq!(clock.now(), Duration::from_millis(3500));
    }

    #[test]
    fn progress_is_monotonic() {
        let (clock, mut rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("r1".into(), Arc::new(OhmsLaw::default()), None);
        let input = TrialInput::new().with("voltage", 5).with("resistance", 10);
        sim.start(Some(input), plan(), clock.as_ref()).unwrap();

        let mut last = 0.0;
        for result in run_to_end(&mut sim, &clock, &mut rx) {
            if let TickResult::Progress { value, .. } = result {
                assert!(value >= last);
                assert!(value <= 0.5);
                last = value;
            }
        }
        assert!((sim.progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn start_without_input_fails() {
        let (clock, _rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        let err = sim.start(None, plan(), clock.as_ref()).unwrap_err();
        assert_eq!(
            err,
            EngineError::NoInputSelected {
                trial: Some("tube_a".into())
            }
        );
        assert_eq!(sim.status(), TrialStatus::Pending);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn start_uses_preset() {
        let (clock, _rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), Some(wet_air()));
        sim.start(None, plan(), clock.as_ref()).unwrap();
        assert_eq!(sim.selected_input(), Some(&wet_air()));
    }

    #[test]
    fn double_start_is_rejected() {
        let (clock, _rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        sim.start(Some(wet_air()), plan(), clock.as_ref()).unwrap();
        let err = sim.start(Some(wet_air()), plan(), clock.as_ref()).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning { .. }));
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn invalid_input_leaves_trial_pending() {
        let (clock, _rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("r1".into(), Arc::new(OhmsLaw::default()), None);
        let bad = TrialInput::new().with("voltage", 5).with("resistance", 0);
        let err = sim.start(Some(bad), plan(), clock.as_ref()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
        assert_eq!(sim.status(), TrialStatus::Pending);
        assert!(sim.selected_input().is_none());
    }

    #[test]
    fn cancel_discards_progress_and_ignores_late_tick() {
        let (clock, mut rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        let token = sim.start(Some(wet_air()), plan(), clock.as_ref()).unwrap();

        assert!(sim.cancel(clock.as_ref()));
        assert!(!sim.cancel(clock.as_ref()));
        assert_eq!(sim.status(), TrialStatus::Pending);
        assert_eq!(sim.record().elapsed, Duration::ZERO);
        assert_eq!(sim.selected_input(), Some(&wet_air()));
        assert_eq!(clock.pending(), 0);

        assert_eq!(sim.on_tick(token, clock.as_ref()), TickResult::Stale);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn done_trial_is_immutable() {
        let (clock, mut rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        sim.start(Some(wet_air()), plan(), clock.as_ref()).unwrap();
        run_to_end(&mut sim, &clock, &mut rx);

        let err = sim.select_input(TrialInput::new().with("water", false).with("oxygen", true));
        assert!(matches!(err, Err(EngineError::AlreadyComplete { .. })));
        let err = sim.start(None, plan(), clock.as_ref());
        assert!(matches!(err, Err(EngineError::AlreadyComplete { .. })));
        assert!(!sim.cancel(clock.as_ref()));
        assert_eq!(sim.status(), TrialStatus::Done);
    }

    #[test]
    fn zero_duration_completes_on_first_tick() {
        let (clock, mut rx) = ManualClock::new();
        let mut sim = TrialSimulator::new("tube_a".into(), rusting(), None);
        let instant = TickPlan {
            duration: Duration::ZERO,
            tick: Duration::from_millis(100),
        };
        sim.start(Some(wet_air()), instant, clock.as_ref()).unwrap();
        let results = run_to_end(&mut sim, &clock, &mut rx);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], TickResult::Completed(_)));
    }
}
