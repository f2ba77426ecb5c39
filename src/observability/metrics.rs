//! Session metrics.
//!
//! Counters and gauges recorded through the `metrics` facade and exported
//! in Prometheus format. Every label value comes from a closed set of
//! `&'static str` names, so lab content can never grow label cardinality.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::engine::quiz::ScoreTier;
use crate::engine::state::Phase;
use crate::error::LabError;

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global Prometheus recorder.
///
/// With `port`, an HTTP listener serves `/metrics` on `127.0.0.1:<port>`.
/// A second call is a no-op.
///
/// # Errors
///
/// Returns `LabError::Io` if the recorder or listener cannot be installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), LabError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| LabError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "labsim_phase_transitions_total",
        "Phase transitions, by phase entered"
    );
    describe_gauge!("labsim_current_phase", "Currently active phase (1 = active)");
    describe_counter!("labsim_trials_total", "Trial lifecycle events, by status");
    describe_counter!(
        "labsim_quiz_submissions_total",
        "Evaluated quiz submissions, by tier"
    );
    describe_histogram!("labsim_quiz_score", "Score of evaluated quiz submissions");
    describe_counter!("labsim_reward_grants_total", "Reward grant requests, by status");
    describe_counter!("labsim_errors_total", "Rejected engine operations, by kind");
}

/// Records entering `to` from `from`.
pub fn record_phase_transition(from: Phase, to: Phase) {
    counter!("labsim_phase_transitions_total", "phase" => to.name()).increment(1);
    gauge!("labsim_current_phase", "phase" => from.name()).set(0.0);
    gauge!("labsim_current_phase", "phase" => to.name()).set(1.0);
}

/// Records a trial lifecycle event (`started`, `cancelled`, `completed`).
pub fn record_trial(status: &'static str) {
    counter!("labsim_trials_total", "status" => status).increment(1);
}

/// Records an evaluated quiz submission.
pub fn record_quiz(tier: ScoreTier, score: u8) {
    counter!("labsim_quiz_submissions_total", "tier" => tier.label()).increment(1);
    histogram!("labsim_quiz_score").record(f64::from(score));
}

/// Records a reward grant request by status label.
pub fn record_reward(status: &'static str) {
    counter!("labsim_reward_grants_total", "status" => status).increment(1);
}

/// Records a rejected engine operation by error kind.
pub fn record_error(kind: &'static str) {
    counter!("labsim_errors_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_phase_transition(Phase::Intro, Phase::CollectSupplies);
        record_trial("started");
        record_quiz(ScoreTier::B, 75);
        record_reward("deferred");
        record_error("wrong_phase");
    }
}
