//! Shared integration-test helpers: fixture loading, session construction
//! and progress stores that misbehave on purpose.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use labsim::clock::ManualClock;
use labsim::config::{LabDefinition, LabLoader};
use labsim::engine::{PhaseController, Phase};
use labsim::error::StoreError;
use labsim::store::memory::InMemoryProgressStore;
use labsim::store::{CompletionRecord, ProgressStore, ProgressSummary};

/// Path of a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Path of a file under `demos`.
pub fn demo_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

/// Runs the `labsim` binary to completion with `args`.
pub fn labsim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_labsim"))
        .args(args)
        .env_remove("LABSIM_LAB")
        .env_remove("LABSIM_PROGRESS_FILE")
        .env_remove("LABSIM_EVENTS_FILE")
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn labsim: {e}"))
}

/// Parses JSONL output into one value per line.
pub fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|e| panic!("bad JSON line {line}: {e}"))
        })
        .collect()
}

/// Loads a fixture lab through the full loader pipeline.
pub fn load_fixture(name: &str) -> Arc<LabDefinition> {
    LabLoader::default()
        .load(&fixture_path(name))
        .unwrap_or_else(|e| panic!("fixture {name} should load: {e}"))
        .lab
}

/// A session on virtual time.
pub fn session(
    lab: Arc<LabDefinition>,
    store: Arc<dyn ProgressStore>,
) -> (PhaseController, Arc<ManualClock>) {
    let (clock, timers) = ManualClock::new();
    let ctrl = PhaseController::new(lab, clock.clone(), timers, store);
    (ctrl, clock)
}

/// A session over a fresh in-memory store.
pub fn fresh_session(name: &str) -> (PhaseController, Arc<ManualClock>, Arc<InMemoryProgressStore>) {
    let store = Arc::new(InMemoryProgressStore::new());
    let (ctrl, clock) = session(load_fixture(name), store.clone());
    (ctrl, clock, store)
}

/// Collects every supply and moves to `Running`.
pub fn advance_to_running(ctrl: &mut PhaseController) {
    ctrl.start().unwrap();
    let ids: Vec<String> = ctrl.lab().supplies.iter().map(|s| s.id.clone()).collect();
    for id in ids {
        ctrl.collect(&id).unwrap();
    }
    ctrl.proceed_to_setup().unwrap();
    ctrl.begin_trials().unwrap();
    assert_eq!(ctrl.phase(), Phase::Running);
}

/// Starts every trial with its preset and lets them all finish.
pub fn run_all_presets(ctrl: &mut PhaseController, clock: &ManualClock) {
    let ids: Vec<String> = ctrl
        .lab()
        .trials
        .iter()
        .map(|t| t.id.to_string())
        .collect();
    for id in ids {
        ctrl.start_trial(&id, None).unwrap();
        let duration = ctrl.lab().plan.duration;
        ctrl.drive(clock, duration);
    }
}

/// Drives a preset-only lab all the way to `Quiz`.
pub fn advance_to_quiz(ctrl: &mut PhaseController, clock: &ManualClock) {
    advance_to_running(ctrl);
    run_all_presets(ctrl, clock);
    ctrl.view_results().unwrap();
    ctrl.skip_pacing().unwrap();
    assert_eq!(ctrl.phase(), Phase::Quiz);
}

/// Store that fails the first `n` grant calls, then delegates.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryProgressStore,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl FlakyStore {
    pub fn failing(n: u32) -> Self {
        Self {
            failures: AtomicU32::new(n),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProgressStore for FlakyStore {
    async fn grant_if_first(&self, lab_id: &str, score: u8) -> Result<u32, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("progress service offline".into()));
        }
        self.inner.grant_if_first(lab_id, score).await
    }

    async fn is_completed(&self, lab_id: &str) -> Result<bool, StoreError> {
        self.inner.is_completed(lab_id).await
    }

    async fn get_completion(&self, lab_id: &str) -> Result<Option<CompletionRecord>, StoreError> {
        self.inner.get_completion(lab_id).await
    }

    async fn summary(&self) -> Result<ProgressSummary, StoreError> {
        self.inner.summary().await
    }
}

/// Store whose grant takes `delay` before delegating.
#[derive(Debug, Default)]
pub struct SlowStore {
    pub inner: InMemoryProgressStore,
    pub delay: Duration,
}

#[async_trait::async_trait]
impl ProgressStore for SlowStore {
    async fn grant_if_first(&self, lab_id: &str, score: u8) -> Result<u32, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.grant_if_first(lab_id, score).await
    }

    async fn is_completed(&self, lab_id: &str) -> Result<bool, StoreError> {
        self.inner.is_completed(lab_id).await
    }

    async fn get_completion(&self, lab_id: &str) -> Result<Option<CompletionRecord>, StoreError> {
        self.inner.get_completion(lab_id).await
    }

    async fn summary(&self) -> Result<ProgressSummary, StoreError> {
        self.inner.summary().await
    }
}
