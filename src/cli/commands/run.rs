//! `labsim run`
//!
//! Loads a lab, drives one session through an action script and prints
//! what happened as JSONL on stdout: transitions, narrator messages, trial
//! outcomes, quiz reports, rejected steps, then a final snapshot and the
//! progress summary.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::args::RunArgs;
use crate::cli::script::{Script, ScriptStep, parse_wait};
use crate::clock::{Clock, ManualClock, TokioClock};
use crate::config::LabLoader;
use crate::engine::{
    CollectOutcome, FeedbackClass, GrantOutcome, LabTransition, PhaseController, QuizVerdict,
    SessionSnapshot, TimerReport, TrialStatus,
};
use crate::error::{EngineError, LabError};
use crate::narrator::NarratorMessage;
use crate::observability::{EventEmitter, init_metrics};
use crate::outcome::TrialOutcome;
use crate::store::file::JsonFileProgressStore;
use crate::store::memory::InMemoryProgressStore;
use crate::store::{ProgressStore, ProgressSummary};

/// One line of `run` output.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RunOutput<'a> {
    Transition(&'a LabTransition),
    Narration(&'a NarratorMessage),
    Supply {
        supply: &'a str,
        status: &'static str,
    },
    TrialStarted {
        trial: &'a str,
    },
    TrialCancelled {
        trial: &'a str,
        cancelled: bool,
    },
    TrialCompleted {
        trial: &'a str,
        outcome: &'a TrialOutcome,
        barrier_open: bool,
    },
    Quiz {
        verdict: &'a QuizVerdict,
        feedback: FeedbackClass,
        reward: &'a GrantOutcome,
    },
    Reward(&'a GrantOutcome),
    Rejected {
        step: usize,
        action: &'static str,
        error_kind: &'static str,
        error: String,
    },
    Snapshot(&'a SessionSnapshot),
    Summary(&'a ProgressSummary),
}

/// JSONL writer on stdout.
struct Output<W: Write> {
    writer: W,
}

impl<W: Write> Output<W> {
    fn write(&mut self, line: &RunOutput<'_>) -> Result<(), LabError> {
        let json = serde_json::to_string(line)?;
        writeln!(self.writer, "{json}")?;
        Ok(())
    }

    fn timers(&mut self, reports: &[TimerReport]) -> Result<(), LabError> {
        for report in reports {
            match report {
                TimerReport::TrialCompleted {
                    trial,
                    outcome,
                    barrier_open,
                } => self.write(&RunOutput::TrialCompleted {
                    trial: trial.as_str(),
                    outcome,
                    barrier_open: *barrier_open,
                })?,
                TimerReport::QuizOpened(transition) => {
                    self.write(&RunOutput::Transition(transition))?;
                }
                TimerReport::Progress { trial, value, .. } => {
                    debug!(trial = %trial, value, "trial progress");
                }
                TimerReport::Stale => {}
            }
        }
        Ok(())
    }

    fn narration(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<NarratorMessage>,
    ) -> Result<(), LabError> {
        while let Ok(message) = rx.try_recv() {
            self.write(&RunOutput::Narration(&message))?;
        }
        Ok(())
    }
}

/// How script time passes.
enum Driver {
    Virtual(Arc<ManualClock>),
    Realtime(Arc<TokioClock>),
}

impl Driver {
    async fn wait(
        &self,
        ctrl: &mut PhaseController,
        by: Duration,
        cancel: &CancellationToken,
    ) -> Vec<TimerReport> {
        match self {
            Self::Virtual(clock) => ctrl.drive(clock, by),
            Self::Realtime(_) => {
                let deadline = tokio::time::Instant::now() + by;
                let mut reports = Vec::new();
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        next = tokio::time::timeout_at(deadline, ctrl.next_timer()) => match next {
                            Ok(Some(report)) => reports.push(report),
                            Ok(None) | Err(_) => break,
                        },
                    }
                }
                reports
            }
        }
    }

    async fn until_done(
        &self,
        ctrl: &mut PhaseController,
        trial: &str,
        cancel: &CancellationToken,
    ) -> Vec<TimerReport> {
        let running = |ctrl: &PhaseController| {
            ctrl.trial(trial)
                .is_some_and(|sim| sim.status() == TrialStatus::Running)
        };
        let mut reports = Vec::new();
        match self {
            Self::Virtual(clock) => {
                while running(&*ctrl) {
                    let Some(deadline) = clock.next_deadline() else {
                        break;
                    };
                    reports.extend(ctrl.drive(clock, deadline.saturating_sub(clock.now())));
                }
            }
            Self::Realtime(_) => {
                while running(&*ctrl) {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        next = ctrl.next_timer() => match next {
                            Some(report) => reports.push(report),
                            None => break,
                        },
                    }
                }
            }
        }
        reports
    }
}

/// Drives a lab session from an action script.
///
/// Rejected steps are reported and skipped unless `--strict` is set.
///
/// # Errors
///
/// Returns a config error if the lab does not load, a usage error if the
/// script is malformed, a store error if the progress file cannot be
/// opened, and, with `--strict`, the first rejected step.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), LabError> {
    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    info!(lab = %args.lab.display(), "loading lab");
    let loaded = LabLoader::default().load(&args.lab)?;
    let script = Script::load(&args.script)?;

    let store: Arc<dyn ProgressStore> = match &args.progress {
        Some(path) => Arc::new(JsonFileProgressStore::open(path.clone()).await?),
        None => Arc::new(InMemoryProgressStore::new()),
    };

    let (driver, clock, timers) = if args.realtime {
        let (tokio_clock, timers) = TokioClock::new();
        let clock: Arc<dyn Clock> = tokio_clock.clone();
        (Driver::Realtime(tokio_clock), clock, timers)
    } else {
        let (manual, timers) = ManualClock::new();
        let clock: Arc<dyn Clock> = manual.clone();
        (Driver::Virtual(manual), clock, timers)
    };

    let (tx, mut narration) = mpsc::unbounded_channel();
    let mut ctrl = PhaseController::new(loaded.lab, clock, timers, Arc::clone(&store))
        .with_narrator(tx);
    if let Some(path) = &args.events {
        ctrl = ctrl.with_events(Arc::new(EventEmitter::from_file(path)?));
    }

    let mut out = Output {
        writer: std::io::stdout().lock(),
    };
    for (index, step) in script.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(step = index + 1, "interrupted, remaining steps skipped");
            break;
        }
        debug!(step = index + 1, action = step.name(), "applying step");
        let result = apply(&mut ctrl, &driver, step, &mut out, &cancel).await;
        out.narration(&mut narration)?;
        if let Err(e) = result {
            out.write(&RunOutput::Rejected {
                step: index + 1,
                action: step.name(),
                error_kind: e.kind(),
                error: e.to_string(),
            })?;
            if args.strict {
                return Err(e.into());
            }
        }
    }

    out.write(&RunOutput::Snapshot(&ctrl.snapshot()))?;
    let summary = store.summary().await?;
    out.write(&RunOutput::Summary(&summary))?;

    if let Driver::Realtime(clock) = &driver {
        clock.shutdown();
    }
    Ok(())
}

async fn apply<W: Write>(
    ctrl: &mut PhaseController,
    driver: &Driver,
    step: &ScriptStep,
    out: &mut Output<W>,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    match step {
        ScriptStep::Start => transition(out, &ctrl.start()?),
        ScriptStep::Proceed => transition(out, &ctrl.proceed_to_setup()?),
        ScriptStep::Begin => transition(out, &ctrl.begin_trials()?),
        ScriptStep::ViewResults => transition(out, &ctrl.view_results()?),
        ScriptStep::SkipPacing => transition(out, &ctrl.skip_pacing()?),
        ScriptStep::Reset => transition(out, &ctrl.reset()),
        ScriptStep::OpenQuiz => {
            if let Some(opened) = ctrl.open_quiz()? {
                transition(out, &opened);
            }
        }
        ScriptStep::Collect(supply) => {
            let status = match ctrl.collect(supply)? {
                CollectOutcome::Collected => "collected",
                CollectOutcome::AlreadyCollected => "already_collected",
                CollectOutcome::AllCollected => "all_collected",
            };
            report(out.write(&RunOutput::Supply { supply, status }));
        }
        ScriptStep::Select(args) => ctrl.select_input(&args.trial, args.input.clone())?,
        ScriptStep::StartTrial(args) => {
            ctrl.start_trial(&args.trial, args.input.clone())?;
            report(out.write(&RunOutput::TrialStarted { trial: &args.trial }));
        }
        ScriptStep::CancelTrial(trial) => {
            let cancelled = ctrl.cancel_trial(trial)?;
            report(out.write(&RunOutput::TrialCancelled { trial, cancelled }));
        }
        ScriptStep::RunTrial(args) => {
            ctrl.start_trial(&args.trial, args.input.clone())?;
            report(out.write(&RunOutput::TrialStarted { trial: &args.trial }));
            let reports = driver.until_done(ctrl, &args.trial, cancel).await;
            report(out.timers(&reports));
        }
        ScriptStep::Wait(value) => {
            // Durations are checked when the script is parsed.
            let by = parse_wait(value).unwrap_or_default();
            let reports = driver.wait(ctrl, by, cancel).await;
            report(out.timers(&reports));
        }
        ScriptStep::Submit(answers) => {
            for (question, option) in answers {
                ctrl.answer(question, option)?;
            }
            let quiz = ctrl.submit_answers().await?;
            report(out.write(&RunOutput::Quiz {
                verdict: &quiz.verdict,
                feedback: quiz.feedback,
                reward: &quiz.reward,
            }));
            transition(out, &quiz.transition);
        }
        ScriptStep::FlushRewards => {
            for outcome in ctrl.flush_rewards().await {
                report(out.write(&RunOutput::Reward(&outcome)));
            }
        }
    }
    Ok(())
}

fn transition<W: Write>(out: &mut Output<W>, transition: &LabTransition) {
    report(out.write(&RunOutput::Transition(transition)));
}

fn report(result: Result<(), LabError>) {
    if let Err(e) = result {
        warn!(error = %e, "failed to write run output");
    }
}
