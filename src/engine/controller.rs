//! Phase controller orchestration
//!
//! The `PhaseController` owns one session: it routes learner actions and
//! fired timers to the supply gate, trial simulators, barrier, quiz
//! evaluator and reward gate, and moves the session along the phase graph
//! when guards pass.
//!
//! All mutation happens through `&mut self`, so learner actions and timer
//! deliveries are processed one at a time. Every transition is logged,
//! counted, written to the event stream and narrated exactly once.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::clock::{Clock, ManualClock, TimerEvent, TimerFired, TimerReceiver, TimerToken};
use crate::config::LabDefinition;
use crate::error::EngineError;
use crate::narrator::{NarrationContext, Narrator, NarratorMessage};
use crate::observability::{EventEmitter, SessionEvent, metrics};
use crate::outcome::{TrialInput, TrialOutcome};
use crate::store::ProgressStore;

use super::quiz::{FeedbackClass, QuizAnswer, QuizEvaluator, QuizSubmission, QuizVerdict};
use super::reward::{GrantOutcome, GrantStatus, RewardGate};
use super::state::{LabTransition, Phase, SessionSnapshot, SessionState};
use super::supply::CollectOutcome;
use super::trial::{TickResult, TrialId, TrialSimulator, TrialStatus};

/// What a delivered timer did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerReport {
    /// A running trial advanced
    Progress {
        /// Trial id
        trial: TrialId,
        /// Simulated time since the trial started
        elapsed: Duration,
        /// Interpolated progress value
        value: f64,
    },
    /// A trial finished
    TrialCompleted {
        /// Trial id
        trial: TrialId,
        /// Its outcome
        outcome: TrialOutcome,
        /// Whether every trial has now reported
        barrier_open: bool,
    },
    /// The pacing delay elapsed and the quiz opened
    QuizOpened(LabTransition),
    /// Cancelled, superseded or reset timer; ignored
    Stale,
}

/// Result of an evaluated quiz submission.
#[derive(Debug, Clone)]
pub struct QuizReport {
    /// Score and per-question correctness
    pub verdict: QuizVerdict,
    /// Feedback class for the presentation layer
    pub feedback: FeedbackClass,
    /// `Quiz -> Complete` for the top tier, `Quiz -> Quiz` otherwise
    pub transition: LabTransition,
    /// What the reward gate did with the submission
    pub reward: GrantOutcome,
    /// Narrator feedback for the submission
    pub narration: NarratorMessage,
}

/// Drives one learner session through a lab.
///
/// The reward gate outlives resets; everything else is rebuilt by
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct PhaseController {
    lab: Arc<LabDefinition>,
    clock: Arc<dyn Clock>,
    timers: TimerReceiver,
    state: SessionState,
    rewards: RewardGate,
    evaluator: QuizEvaluator,
    narrator: Narrator,
    events: Option<Arc<EventEmitter>>,
    session_id: Uuid,
    last_xp: u32,
}

/// Counts and logs a rejected operation.
fn rejected(err: EngineError) -> EngineError {
    metrics::record_error(err.kind());
    debug!(kind = err.kind(), error = %err, "operation rejected");
    err
}

const fn wrong_phase(action: &'static str, phase: Phase) -> EngineError {
    EngineError::WrongPhase { action, phase }
}

impl PhaseController {
    /// Creates a session in `Intro`.
    ///
    /// `timers` must be the receiver paired with `clock`.
    #[must_use]
    pub fn new(
        lab: Arc<LabDefinition>,
        clock: Arc<dyn Clock>,
        timers: TimerReceiver,
        store: Arc<dyn ProgressStore>,
    ) -> Self {
        let state = SessionState::new(&lab);
        let rewards = RewardGate::new(store).with_timeout(lab.reward_timeout);
        let evaluator = QuizEvaluator::new(lab.tier_policy);
        let narrator = Narrator::new(lab.narration.clone());
        let session_id = Uuid::new_v4();
        info!(session = %session_id, lab = %lab.id, "session created");
        Self {
            lab,
            clock,
            timers,
            state,
            rewards,
            evaluator,
            narrator,
            events: None,
            session_id,
            last_xp: 0,
        }
    }

    /// Delivers narrator messages to `tx`.
    #[must_use]
    pub fn with_narrator(mut self, tx: tokio::sync::mpsc::UnboundedSender<NarratorMessage>) -> Self {
        self.narrator = Narrator::new(self.lab.narration.clone()).with_channel(tx);
        self
    }

    /// Writes session events to `emitter`, starting with `SessionStarted`.
    #[must_use]
    pub fn with_events(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.events = Some(emitter);
        self.emit(SessionEvent::SessionStarted {
            lab_id: self.lab.id.clone(),
            title: self.lab.title.clone(),
        });
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the lab this session runs.
    #[must_use]
    pub fn lab(&self) -> &Arc<LabDefinition> {
        &self.lab
    }

    /// Returns the session id used in logs and events.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Returns the session state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns a trial simulator by id.
    #[must_use]
    pub fn trial(&self, id: &str) -> Option<&TrialSimulator> {
        self.state.trials.get(id)
    }

    /// Returns the reward gate.
    #[must_use]
    pub const fn rewards(&self) -> &RewardGate {
        &self.rewards
    }

    /// Builds a serializable view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    // ========================================================================
    // Intro and supplies
    // ========================================================================

    /// Begins the lab: `Intro -> CollectSupplies`.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Intro`.
    pub fn start(&mut self) -> Result<LabTransition, EngineError> {
        if self.state.phase != Phase::Intro {
            return Err(rejected(wrong_phase("start the lab", self.state.phase)));
        }
        Ok(self.transition(Phase::CollectSupplies, "lab started"))
    }

    /// Marks a supply collected.
    ///
    /// Collecting an already-collected supply is a no-op.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `CollectSupplies`, `InvalidSupply` for an unknown
    /// id, `SupplyOutOfOrder` for a sequential lab.
    pub fn collect(&mut self, supply: &str) -> Result<CollectOutcome, EngineError> {
        if self.state.phase != Phase::CollectSupplies {
            return Err(rejected(wrong_phase("collect supplies", self.state.phase)));
        }
        let outcome = self.state.supplies.collect(supply).map_err(rejected)?;
        match outcome {
            CollectOutcome::AlreadyCollected => {}
            CollectOutcome::Collected => self.emit(SessionEvent::SupplyCollected {
                supply: supply.to_owned(),
            }),
            CollectOutcome::AllCollected => {
                self.emit(SessionEvent::SupplyCollected {
                    supply: supply.to_owned(),
                });
                let count = self.state.supplies.collected_ids().len();
                info!(session = %self.session_id, count, "all supplies collected");
                self.emit(SessionEvent::AllSuppliesCollected { count });
            }
        }
        Ok(outcome)
    }

    /// `CollectSupplies -> Setup`.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `CollectSupplies`, `SuppliesIncomplete` while a
    /// required supply is missing.
    pub fn proceed_to_setup(&mut self) -> Result<LabTransition, EngineError> {
        if self.state.phase != Phase::CollectSupplies {
            return Err(rejected(wrong_phase("proceed to setup", self.state.phase)));
        }
        if !self.state.supplies.is_complete() {
            let missing = self
                .state
                .supplies
                .missing()
                .into_iter()
                .map(str::to_owned)
                .collect();
            return Err(rejected(EngineError::SuppliesIncomplete { missing }));
        }
        Ok(self.transition(Phase::Setup, "all required supplies collected"))
    }

    // ========================================================================
    // Setup and trials
    // ========================================================================

    /// Selects the input a trial will run with.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Setup` and `Running`, `UnknownTrial`, or the
    /// simulator's rejection of the input.
    pub fn select_input(&mut self, trial: &str, input: TrialInput) -> Result<(), EngineError> {
        if !matches!(self.state.phase, Phase::Setup | Phase::Running) {
            return Err(rejected(wrong_phase("select a trial input", self.state.phase)));
        }
        self.simulator_mut(trial)?
            .select_input(input)
            .map_err(rejected)
    }

    /// `Setup -> Running`.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Setup`, `NoInputSelected` if no trial has a
    /// valid input.
    pub fn begin_trials(&mut self) -> Result<LabTransition, EngineError> {
        if self.state.phase != Phase::Setup {
            return Err(rejected(wrong_phase("begin the trials", self.state.phase)));
        }
        let ready = self
            .state
            .trials
            .values()
            .filter(|sim| sim.selected_input().is_some())
            .count();
        if ready == 0 {
            return Err(rejected(EngineError::NoInputSelected { trial: None }));
        }
        Ok(self.transition(Phase::Running, format!("{ready} trial(s) have an input")))
    }

    /// Starts a trial with `input`, or its selected input if `None`.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Running`, `UnknownTrial`, `AlreadyRunning` when
    /// the lab runs trials one at a time and another one is running, or the
    /// simulator's own rejection.
    pub fn start_trial(
        &mut self,
        trial: &str,
        input: Option<TrialInput>,
    ) -> Result<TimerToken, EngineError> {
        if self.state.phase != Phase::Running {
            return Err(rejected(wrong_phase("start a trial", self.state.phase)));
        }
        if self.lab.exclusive_trials {
            if let Some(other) = self
                .state
                .trials
                .values()
                .find(|sim| sim.status() == TrialStatus::Running && sim.id().as_str() != trial)
            {
                return Err(rejected(EngineError::AlreadyRunning {
                    trial: other.id().to_string(),
                }));
            }
        }

        let plan = self.lab.plan;
        let clock = Arc::clone(&self.clock);
        let sim = self.simulator_mut(trial)?;
        let token = sim.start(input, plan, clock.as_ref()).map_err(rejected)?;
        let input = sim.selected_input().cloned().unwrap_or_default();

        metrics::record_trial("started");
        self.emit(SessionEvent::TrialStarted {
            trial: trial.to_owned(),
            input,
        });
        Ok(token)
    }

    /// Cancels a running trial.
    ///
    /// Returns `false` if the trial was not running.
    ///
    /// # Errors
    ///
    /// `UnknownTrial`.
    pub fn cancel_trial(&mut self, trial: &str) -> Result<bool, EngineError> {
        let clock = Arc::clone(&self.clock);
        let cancelled = self.simulator_mut(trial)?.cancel(clock.as_ref());
        if cancelled {
            metrics::record_trial("cancelled");
            self.emit(SessionEvent::TrialCancelled {
                trial: trial.to_owned(),
            });
        }
        Ok(cancelled)
    }

    /// `Running -> Result`.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Running`, `IncompleteTrials` until every trial
    /// has reported.
    pub fn view_results(&mut self) -> Result<LabTransition, EngineError> {
        if self.state.phase != Phase::Running {
            return Err(rejected(wrong_phase("view results", self.state.phase)));
        }
        self.state.barrier.ensure_open().map_err(rejected)?;
        let trials = self.state.barrier.expected();
        Ok(self.transition(Phase::Result, format!("{trials} trial(s) completed")))
    }

    fn simulator_mut(&mut self, trial: &str) -> Result<&mut TrialSimulator, EngineError> {
        self.state
            .trials
            .get_mut(trial)
            .ok_or_else(|| {
                rejected(EngineError::UnknownTrial {
                    id: trial.to_owned(),
                })
            })
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Applies one fired timer.
    ///
    /// Timers cancelled or superseded before delivery are reported as
    /// [`TimerReport::Stale`] and change nothing.
    pub fn handle_timer(&mut self, fired: TimerFired) -> TimerReport {
        match fired.event {
            TimerEvent::QuizPacing => {
                if self.state.quiz_pacing != Some(fired.token) || self.state.phase != Phase::Result
                {
                    trace!(token = %fired.token, "stale pacing timer ignored");
                    return TimerReport::Stale;
                }
                self.state.quiz_pacing = None;
                TimerReport::QuizOpened(self.enter_quiz("pacing delay elapsed"))
            }
            TimerEvent::TrialTick(id) => {
                let clock = Arc::clone(&self.clock);
                let Some(result) = self
                    .state
                    .trials
                    .get_mut(&id)
                    .map(|sim| sim.on_tick(fired.token, clock.as_ref()))
                else {
                    trace!(trial = %id, "tick for unknown trial ignored");
                    return TimerReport::Stale;
                };
                self.apply_tick(id, result)
            }
        }
    }

    fn apply_tick(&mut self, trial: TrialId, result: TickResult) -> TimerReport {
        match result {
            TickResult::Stale => TimerReport::Stale,
            TickResult::Progress { elapsed, value } => {
                self.emit(SessionEvent::TrialProgress {
                    trial: trial.to_string(),
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    value,
                });
                TimerReport::Progress {
                    trial,
                    elapsed,
                    value,
                }
            }
            TickResult::Completed(outcome) => {
                metrics::record_trial("completed");
                self.emit(SessionEvent::TrialCompleted {
                    trial: trial.to_string(),
                    outcome: outcome.clone(),
                });
                let opened = match self.state.barrier.submit(&trial, outcome.clone()) {
                    Ok(opened) => opened,
                    Err(e) => {
                        warn!(trial = %trial, error = %e, "completed trial not tracked by barrier");
                        false
                    }
                };
                if opened {
                    let trials = self.state.barrier.expected();
                    info!(session = %self.session_id, trials, "all trials completed");
                    self.emit(SessionEvent::BarrierOpened { trials });
                }
                TimerReport::TrialCompleted {
                    trial,
                    outcome,
                    barrier_open: self.state.barrier.is_open(),
                }
            }
        }
    }

    /// Applies every timer already delivered, without waiting.
    pub fn drain_timers(&mut self) -> Vec<TimerReport> {
        let mut reports = Vec::new();
        while let Ok(fired) = self.timers.try_recv() {
            reports.push(self.handle_timer(fired));
        }
        reports
    }

    /// Waits for the next timer and applies it.
    ///
    /// Returns `None` once the clock is gone.
    pub async fn next_timer(&mut self) -> Option<TimerReport> {
        let fired = self.timers.recv().await?;
        Some(self.handle_timer(fired))
    }

    /// Advances a manual clock by `by`, applying every timer that comes due,
    /// including timers scheduled along the way.
    ///
    /// `clock` must be the clock this controller was built with.
    pub fn drive(&mut self, clock: &ManualClock, by: Duration) -> Vec<TimerReport> {
        let until = clock.now() + by;
        let mut reports = self.drain_timers();
        while clock.fire_next(until) {
            reports.extend(self.drain_timers());
        }
        clock.advance_to(until);
        reports.extend(self.drain_timers());
        reports
    }

    // ========================================================================
    // Result and quiz
    // ========================================================================

    /// Requests `Result -> Quiz`.
    ///
    /// With no pacing delay the quiz opens now and the transition is
    /// returned. Otherwise a pacing timer is scheduled and `None` returned;
    /// the quiz opens when the timer fires. Repeated calls while the timer
    /// is pending do nothing.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Result`.
    pub fn open_quiz(&mut self) -> Result<Option<LabTransition>, EngineError> {
        if self.state.phase != Phase::Result {
            return Err(rejected(wrong_phase("open the quiz", self.state.phase)));
        }
        if self.state.quiz_pacing.is_some() {
            return Ok(None);
        }
        if self.lab.pacing.is_zero() {
            return Ok(Some(self.enter_quiz("quiz opened")));
        }
        let token = self.clock.after(self.lab.pacing, TimerEvent::QuizPacing);
        debug!(%token, pacing = ?self.lab.pacing, "quiz pacing scheduled");
        self.state.quiz_pacing = Some(token);
        Ok(None)
    }

    /// Opens the quiz now, cancelling any pending pacing timer.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Result`.
    pub fn skip_pacing(&mut self) -> Result<LabTransition, EngineError> {
        if self.state.phase != Phase::Result {
            return Err(rejected(wrong_phase("open the quiz", self.state.phase)));
        }
        if let Some(token) = self.state.quiz_pacing.take() {
            self.clock.cancel(token);
        }
        Ok(self.enter_quiz("pacing skipped"))
    }

    fn enter_quiz(&mut self, reason: &str) -> LabTransition {
        self.transition(Phase::Quiz, reason)
    }

    /// Records one answer in the pending submission.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Quiz`, `UnknownQuestion` for an id not in the key.
    pub fn answer(&mut self, question: &str, option: &str) -> Result<(), EngineError> {
        if self.state.phase != Phase::Quiz {
            return Err(rejected(wrong_phase("answer a question", self.state.phase)));
        }
        let Some(slot) = self
            .lab
            .quiz_key
            .iter()
            .position(|entry| entry.question_id == question)
        else {
            return Err(rejected(EngineError::UnknownQuestion {
                id: question.to_owned(),
            }));
        };

        let key = &self.lab.quiz_key;
        let pending = self.state.submission.get_or_insert_with(|| {
            QuizSubmission(
                key.iter()
                    .map(|entry| QuizAnswer {
                        question_id: entry.question_id.clone(),
                        chosen: None,
                    })
                    .collect(),
            )
        });
        if let Some(answer) = pending.0.get_mut(slot) {
            answer.chosen = Some(option.to_owned());
        }
        Ok(())
    }

    /// Evaluates the answers recorded with [`answer`](Self::answer).
    ///
    /// # Errors
    ///
    /// As [`submit_quiz`](Self::submit_quiz); `IncompleteSubmission` if
    /// nothing was answered.
    pub async fn submit_answers(&mut self) -> Result<QuizReport, EngineError> {
        let Some(submission) = self.state.submission.clone() else {
            if self.state.phase != Phase::Quiz {
                return Err(rejected(wrong_phase("submit the quiz", self.state.phase)));
            }
            return Err(rejected(EngineError::IncompleteSubmission {
                answered: 0,
                expected: self.lab.quiz_key.len(),
            }));
        };
        self.submit_quiz(submission).await
    }

    /// Evaluates a submission and requests the reward.
    ///
    /// The top tier moves the session to `Complete`; any other tier keeps it
    /// in `Quiz` with the pending answers cleared for a retry. The
    /// transition is committed before the reward grant is awaited, and the
    /// grant never fails the submission.
    ///
    /// # Errors
    ///
    /// `WrongPhase` outside `Quiz`, `IncompleteSubmission` unless every
    /// question is answered. State is unchanged on error.
    pub async fn submit_quiz(
        &mut self,
        submission: QuizSubmission,
    ) -> Result<QuizReport, EngineError> {
        if self.state.phase != Phase::Quiz {
            return Err(rejected(wrong_phase("submit the quiz", self.state.phase)));
        }
        let verdict = self
            .evaluator
            .evaluate(&submission, &self.lab.quiz_key)
            .map_err(rejected)?;

        self.state.attempts += 1;
        let attempt = self.state.attempts;
        metrics::record_quiz(verdict.tier, verdict.score);
        info!(
            session = %self.session_id,
            attempt,
            correct = verdict.correct,
            total = verdict.total,
            tier = %verdict.tier,
            score = verdict.score,
            "quiz evaluated"
        );
        self.emit(SessionEvent::QuizEvaluated {
            attempt,
            correct: verdict.correct,
            total: verdict.total,
            tier: verdict.tier,
            score: verdict.score,
        });
        self.state.last_verdict = Some(verdict.clone());
        self.state.submission = None;

        let summary = format!("{}/{} correct", verdict.correct, verdict.total);
        let transition = if verdict.tier.is_terminal() {
            self.transition_silent(Phase::Complete, format!("{summary}, tier A"))
        } else {
            self.transition_silent(Phase::Quiz, format!("{summary}, tier {}", verdict.tier))
        };

        let reward = self
            .rewards
            .grant(&self.lab.id, verdict.tier, verdict.score)
            .await;
        self.note_reward(&reward);
        self.last_xp = reward.xp;

        let narration = self.narrator.feedback(verdict.tier, &self.narration_context());
        Ok(QuizReport {
            feedback: verdict.feedback(),
            verdict,
            transition,
            reward,
            narration,
        })
    }

    /// Retries reward claims the store has not confirmed yet.
    pub async fn flush_rewards(&mut self) -> Vec<GrantOutcome> {
        let outcomes = self.rewards.retry_pending().await;
        for outcome in &outcomes {
            self.note_reward(outcome);
        }
        outcomes
    }

    fn note_reward(&mut self, outcome: &GrantOutcome) {
        metrics::record_reward(outcome.status.label());
        match &outcome.status {
            GrantStatus::Granted => {
                if outcome.xp > 0 {
                    self.state.reward_granted = true;
                }
                self.emit(SessionEvent::RewardGranted {
                    lab_id: outcome.lab_id.clone(),
                    xp: outcome.xp,
                });
            }
            GrantStatus::Deferred { attempts, reason } => {
                warn!(lab = %outcome.lab_id, attempts, reason = %reason, "reward deferred");
                self.emit(SessionEvent::RewardDeferred {
                    lab_id: outcome.lab_id.clone(),
                    attempts: *attempts,
                    reason: reason.clone(),
                });
            }
            GrantStatus::AlreadyClaimed => {
                debug!(lab = %outcome.lab_id, "reward already claimed");
            }
        }
    }

    // ========================================================================
    // Generic transitions and reset
    // ========================================================================

    /// Requests a move to `to` by its target phase.
    ///
    /// Routes to the matching operation; `Result -> Quiz` opens the quiz
    /// without pacing. Quiz outcomes only follow from a submission.
    ///
    /// # Errors
    ///
    /// `IllegalTransition` when `to` is not reachable from the current phase
    /// this way, otherwise the guard error of the routed operation.
    pub fn advance(&mut self, to: Phase) -> Result<LabTransition, EngineError> {
        match (self.state.phase, to) {
            (_, Phase::Intro) => Ok(self.reset()),
            (Phase::Intro, Phase::CollectSupplies) => self.start(),
            (Phase::CollectSupplies, Phase::Setup) => self.proceed_to_setup(),
            (Phase::Setup, Phase::Running) => self.begin_trials(),
            (Phase::Running, Phase::Result) => self.view_results(),
            (Phase::Result, Phase::Quiz) => self.skip_pacing(),
            (from, to) => Err(rejected(EngineError::IllegalTransition { from, to })),
        }
    }

    /// Returns the session to `Intro` from any phase.
    ///
    /// Cancels every pending timer and discards supplies, trials, answers
    /// and attempts. Reward history is kept.
    pub fn reset(&mut self) -> LabTransition {
        let from = self.state.phase;
        for sim in self.state.trials.values_mut() {
            sim.cancel(self.clock.as_ref());
        }
        if let Some(token) = self.state.quiz_pacing.take() {
            self.clock.cancel(token);
        }
        self.state = SessionState::new(&self.lab);
        self.last_xp = 0;

        self.emit(SessionEvent::SessionReset { from });
        let transition = self.commit(Phase::Intro, from, "session reset");
        self.narrator.restart(&self.narration_context());
        transition
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Commits a transition and narrates the phase entered.
    fn transition(&mut self, to: Phase, reason: impl Into<String>) -> LabTransition {
        let transition = self.transition_silent(to, reason);
        self.narrator.phase_entered(to, &self.narration_context());
        transition
    }

    /// Commits a transition; the caller narrates.
    fn transition_silent(&mut self, to: Phase, reason: impl Into<String>) -> LabTransition {
        let from = self.state.phase;
        debug_assert!(from.has_edge_to(to), "{from} -> {to} is not an edge");
        self.state.phase = to;
        self.commit(to, from, reason)
    }

    fn commit(&self, to: Phase, from: Phase, reason: impl Into<String>) -> LabTransition {
        let reason = reason.into();
        info!(
            session = %self.session_id,
            lab = %self.lab.id,
            %from,
            %to,
            reason = %reason,
            "phase transition"
        );
        metrics::record_phase_transition(from, to);
        self.emit(SessionEvent::PhaseEntered {
            from,
            to,
            reason: reason.clone(),
        });
        LabTransition { from, to, reason }
    }

    fn narration_context(&self) -> NarrationContext {
        let verdict = self.state.last_verdict.as_ref();
        NarrationContext {
            lab: self.lab.title.clone(),
            correct: verdict.map_or(0, |v| v.correct),
            total: verdict.map_or(self.lab.quiz_key.len(), |v| v.total),
            score: verdict.map_or(0, |v| v.score),
            xp: self.last_xp,
            attempt: self.state.attempts,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.emit(&self.session_id, &event);
        }
    }
}
