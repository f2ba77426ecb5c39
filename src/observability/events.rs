//! Structured session event stream.
//!
//! Typed events emitted as a session progresses, serialized as JSONL with a
//! monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::quiz::ScoreTier;
use crate::engine::state::Phase;
use crate::outcome::{TrialInput, TrialOutcome};

/// A discrete event in a lab session.
///
/// Serialized with a `"type"` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// A session was created for a lab.
    SessionStarted {
        /// Lab id
        lab_id: String,
        /// Lab title
        title: String,
    },

    /// The session moved to a new phase.
    PhaseEntered {
        /// Previous phase
        from: Phase,
        /// Phase entered
        to: Phase,
        /// Why the guard passed
        reason: String,
    },

    /// A supply was newly collected.
    SupplyCollected {
        /// Supply id
        supply: String,
    },

    /// Every required supply is collected.
    AllSuppliesCollected {
        /// Number of supplies collected
        count: usize,
    },

    /// A trial started.
    TrialStarted {
        /// Trial id
        trial: String,
        /// Input it runs with
        input: TrialInput,
    },

    /// A running trial advanced.
    TrialProgress {
        /// Trial id
        trial: String,
        /// Simulated milliseconds since start
        elapsed_ms: u64,
        /// Interpolated progress value
        value: f64,
    },

    /// A running trial was cancelled.
    TrialCancelled {
        /// Trial id
        trial: String,
    },

    /// A trial produced its outcome.
    TrialCompleted {
        /// Trial id
        trial: String,
        /// The outcome
        outcome: TrialOutcome,
    },

    /// Every trial reported.
    BarrierOpened {
        /// Number of trials
        trials: usize,
    },

    /// A quiz submission was scored.
    QuizEvaluated {
        /// Attempt number, starting at 1
        attempt: u32,
        /// Correct answers
        correct: usize,
        /// Questions
        total: usize,
        /// Score band
        tier: ScoreTier,
        /// Score
        score: u8,
    },

    /// The store confirmed a reward claim.
    RewardGranted {
        /// Lab id
        lab_id: String,
        /// XP awarded
        xp: u32,
    },

    /// The store could not confirm a reward claim; it stays queued.
    RewardDeferred {
        /// Lab id
        lab_id: String,
        /// Store calls attempted
        attempts: u32,
        /// Last failure
        reason: String,
    },

    /// The session was reset to `Intro`.
    SessionReset {
        /// Phase the session was in
        from: Phase,
    },
}

#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    sequence: u64,
    timestamp: DateTime<Utc>,
    session: &'a Uuid,
    #[serde(flatten)]
    event: &'a SessionEvent,
}

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization and I/O failures are dropped; the event stream never
/// interferes with the session.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter writing to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter writing to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter writing to a new file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits one event for `session` as a JSONL line.
    pub fn emit(&self, session: &Uuid, event: &SessionEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence,
            timestamp: Utc::now(),
            session,
            event,
        };
        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<StdMutex<Vec<u8>>>);

    impl Capture {
        fn lines(&self) -> Vec<serde_json::Value> {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf)
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn envelope_is_flat_and_sequenced() {
        let capture = Capture::default();
        let emitter = EventEmitter::new(Box::new(capture.clone()));
        let session = Uuid::new_v4();

        emitter.emit(
            &session,
            &SessionEvent::PhaseEntered {
                from: Phase::Intro,
                to: Phase::CollectSupplies,
                reason: "lab started".into(),
            },
        );
        emitter.emit(&session, &SessionEvent::BarrierOpened { trials: 3 });

        let lines = capture.lines();
        assert_eq!(emitter.event_count(), 2);
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[0]["type"], "PhaseEntered");
        assert_eq!(lines[0]["to"], "collect_supplies");
        assert_eq!(lines[0]["session"], session.to_string());
        assert!(lines[0].get("event").is_none());
        assert_eq!(lines[1]["sequence"], 1);
        assert_eq!(lines[1]["trials"], 3);
    }

    #[test]
    fn outcome_fields_are_nested() {
        let capture = Capture::default();
        let emitter = EventEmitter::new(Box::new(capture.clone()));
        emitter.emit(
            &Uuid::nil(),
            &SessionEvent::TrialCompleted {
                trial: "r1".into(),
                outcome: TrialOutcome::classified("measured").with_factor(0.5),
            },
        );
        let lines = capture.lines();
        assert_eq!(lines[0]["outcome"]["classification"], "measured");
        assert_eq!(lines[0]["outcome"]["numeric_factor"], 0.5);
    }
}
