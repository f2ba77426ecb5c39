mod common;

use std::sync::Arc;
use std::time::Duration;

use labsim::engine::{CollectOutcome, GrantStatus, Phase, QuizSubmission, ScoreTier, TimerReport};
use labsim::error::EngineError;
use labsim::observability::EventEmitter;
use labsim::store::ProgressStore;

use common::{advance_to_quiz, fresh_session, run_all_presets};

fn answers(q3: &str) -> QuizSubmission {
    QuizSubmission::new()
        .answer("q1", "b")
        .answer("q2", "a")
        .answer("q3", q3)
}

#[test]
fn setup_requires_every_supply() {
    let (mut ctrl, _, _) = fresh_session("rusting.yaml");
    ctrl.start().unwrap();
    assert_eq!(ctrl.collect("nails").unwrap(), CollectOutcome::Collected);
    assert_eq!(ctrl.collect("water").unwrap(), CollectOutcome::Collected);
    assert_eq!(ctrl.collect("water").unwrap(), CollectOutcome::AlreadyCollected);

    let err = ctrl.proceed_to_setup().unwrap_err();
    assert_eq!(
        err,
        EngineError::SuppliesIncomplete {
            missing: vec!["oil".into()]
        }
    );
    assert_eq!(ctrl.phase(), Phase::CollectSupplies);

    assert_eq!(ctrl.collect("oil").unwrap(), CollectOutcome::AllCollected);
    // The gate fires once; re-collecting does not fire again.
    assert_eq!(ctrl.collect("oil").unwrap(), CollectOutcome::AlreadyCollected);
    assert_eq!(ctrl.proceed_to_setup().unwrap().to, Phase::Setup);
}

#[test]
fn unknown_supply_suggests_a_close_match() {
    let (mut ctrl, _, _) = fresh_session("rusting.yaml");
    ctrl.start().unwrap();
    let err = ctrl.collect("nail").unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidSupply {
            id: "nail".into(),
            suggestion: Some("nails".into()),
        }
    );
    assert!(ctrl.snapshot().collected.is_empty());
}

#[test]
fn barrier_holds_results_until_all_tubes_finish() {
    let (mut ctrl, clock, _) = fresh_session("rusting.yaml");
    common::advance_to_running(&mut ctrl);

    ctrl.start_trial("a", None).unwrap();
    ctrl.start_trial("b", None).unwrap();
    let reports = ctrl.drive(&clock, Duration::from_secs(3));
    let completed: Vec<_> = reports
        .iter()
        .filter_map(|r| match r {
            TimerReport::TrialCompleted { trial, barrier_open, .. } => {
                Some((trial.to_string(), *barrier_open))
            }
            _ => None,
        })
        .collect();
    assert_eq!(completed, [("a".to_string(), false), ("b".to_string(), false)]);

    let err = ctrl.view_results().unwrap_err();
    assert_eq!(
        err,
        EngineError::IncompleteTrials {
            completed: 2,
            expected: 3
        }
    );
    assert_eq!(ctrl.phase(), Phase::Running);

    ctrl.start_trial("c", None).unwrap();
    ctrl.drive(&clock, Duration::from_secs(3));
    ctrl.view_results().unwrap();
    assert_eq!(ctrl.phase(), Phase::Result);

    let snapshot = ctrl.snapshot();
    let outcomes: Vec<_> = snapshot
        .trials
        .iter()
        .map(|t| {
            (
                t.record.id.to_string(),
                t.record.outcome.as_ref().unwrap().classification.to_string(),
            )
        })
        .collect();
    assert_eq!(
        outcomes,
        [
            ("a".to_string(), "rusted".to_string()),
            ("b".to_string(), "no_rust".to_string()),
            ("c".to_string(), "no_rust".to_string()),
        ]
    );
    assert_eq!(snapshot.trials[0].progress, 100.0);
    assert_eq!(snapshot.trials[1].progress, 0.0);
}

#[test]
fn restarting_a_finished_tube_is_rejected() {
    let (mut ctrl, clock, _) = fresh_session("rusting.yaml");
    common::advance_to_running(&mut ctrl);
    ctrl.start_trial("a", None).unwrap();
    ctrl.drive(&clock, Duration::from_secs(3));

    assert_eq!(
        ctrl.start_trial("a", None).unwrap_err(),
        EngineError::AlreadyComplete { trial: "a".into() }
    );
    assert_eq!(
        ctrl.start_trial("z", None).unwrap_err(),
        EngineError::UnknownTrial { id: "z".into() }
    );
}

#[tokio::test]
async fn partial_credit_then_perfect_keeps_first_reward() {
    let (mut ctrl, clock, store) = fresh_session("rusting.yaml");
    advance_to_quiz(&mut ctrl, &clock);

    let first = ctrl.submit_quiz(answers("a")).await.unwrap();
    assert_eq!(first.verdict.correct, 2);
    assert_eq!(first.verdict.tier, ScoreTier::B);
    assert_eq!(first.verdict.score, 75);
    assert_eq!(first.transition.from, Phase::Quiz);
    assert_eq!(first.transition.to, Phase::Quiz);
    assert_eq!(first.reward.xp, 75);
    assert_eq!(first.reward.status, GrantStatus::Granted);
    assert!(ctrl.state().submission().is_none());

    let second = ctrl.submit_quiz(answers("d")).await.unwrap();
    assert_eq!(second.verdict.tier, ScoreTier::A);
    assert_eq!(second.transition.to, Phase::Complete);
    assert_eq!(second.reward.xp, 0);
    assert_eq!(second.reward.status, GrantStatus::AlreadyClaimed);
    assert_eq!(ctrl.phase(), Phase::Complete);
    assert_eq!(ctrl.snapshot().attempts, 2);

    let record = store.get_completion("rusting").await.unwrap().unwrap();
    assert_eq!(record.score, 75);
    assert_eq!(record.xp_earned, 75);
    assert_eq!(store.summary().await.unwrap().total_xp, 75);
}

#[tokio::test]
async fn complete_is_terminal_except_for_reset() {
    let (mut ctrl, clock, _) = fresh_session("rusting.yaml");
    advance_to_quiz(&mut ctrl, &clock);
    ctrl.submit_quiz(answers("d")).await.unwrap();
    assert_eq!(ctrl.phase(), Phase::Complete);

    assert!(matches!(
        ctrl.submit_quiz(answers("d")).await,
        Err(EngineError::WrongPhase { phase: Phase::Complete, .. })
    ));
    assert_eq!(
        ctrl.advance(Phase::Quiz).unwrap_err(),
        EngineError::IllegalTransition {
            from: Phase::Complete,
            to: Phase::Quiz
        }
    );
    assert_eq!(ctrl.advance(Phase::Intro).unwrap().to, Phase::Intro);
}

#[tokio::test]
async fn event_stream_records_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let emitter = Arc::new(EventEmitter::from_file(&path).unwrap());

    let (ctrl, clock, _) = fresh_session("rusting.yaml");
    let mut ctrl = ctrl.with_events(emitter.clone());
    common::advance_to_running(&mut ctrl);
    run_all_presets(&mut ctrl, &clock);
    ctrl.view_results().unwrap();
    drop(ctrl);
    drop(emitter);

    let raw = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(events[0]["type"], "SessionStarted");
    assert_eq!(events[0]["lab_id"], "rusting");
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["sequence"], i as u64);
    }

    let count = |kind: &str| events.iter().filter(|e| e["type"] == kind).count();
    assert_eq!(count("SupplyCollected"), 3);
    assert_eq!(count("AllSuppliesCollected"), 1);
    assert_eq!(count("TrialStarted"), 3);
    assert_eq!(count("TrialCompleted"), 3);
    assert_eq!(count("BarrierOpened"), 1);
    assert_eq!(count("PhaseEntered"), 4);

    let last = events.last().unwrap();
    assert_eq!(last["type"], "PhaseEntered");
    assert_eq!(last["to"], "result");
}
