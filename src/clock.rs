//! Time source for trial simulations and pacing delays.
//!
//! A [`Clock`] schedules one-shot timers and reports them as [`TimerFired`]
//! values on an unbounded channel. The session's control loop drains that
//! channel; nothing runs inside the clock itself, so a cancelled or stale
//! timer can never mutate session state.
//!
//! - [`ManualClock`]: virtual time advanced explicitly (tests, scripted runs)
//! - [`TokioClock`]: wall-clock time backed by `tokio` tasks

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::engine::trial::TrialId;

/// Opaque handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Returns the raw token value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a timer is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Next progress tick of a running trial
    TrialTick(TrialId),
    /// The cosmetic delay between results and quiz has elapsed
    QuizPacing,
}

/// A timer that reached its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    /// Token returned by [`Clock::after`]
    pub token: TimerToken,
    /// Payload given to [`Clock::after`]
    pub event: TimerEvent,
}

/// Receiving half of a clock's timer channel.
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerFired>;

/// Abstract time source.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Schedules `event` to fire once after `delay`.
    fn after(&self, delay: Duration, event: TimerEvent) -> TimerToken;

    /// Cancels a scheduled timer.
    ///
    /// Returns `true` if the timer was still pending.
    fn cancel(&self, token: TimerToken) -> bool;

    /// Number of timers scheduled but not yet fired or cancelled.
    fn pending(&self) -> usize;
}

// ============================================================================
// ManualClock
// ============================================================================

#[derive(Debug, Default)]
struct ManualQueue {
    now: Duration,
    next_token: u64,
    by_deadline: BTreeMap<(Duration, u64), TimerEvent>,
    deadlines: HashMap<u64, Duration>,
}

/// Deterministic clock whose time only moves when told to.
///
/// Timers with equal deadlines fire in scheduling order.
#[derive(Debug)]
pub struct ManualClock {
    queue: Mutex<ManualQueue>,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl ManualClock {
    /// Creates a clock at time zero and the receiver its timers fire into.
    #[must_use]
    pub fn new() -> (Arc<Self>, TimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Arc::new(Self {
            queue: Mutex::new(ManualQueue::default()),
            tx,
        });
        (clock, rx)
    }

    /// Fires the earliest timer due at or before `until`.
    ///
    /// Time moves to that timer's deadline. Returns `false` when nothing is
    /// due, leaving time unchanged.
    pub fn fire_next(&self, until: Duration) -> bool {
        let fired = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let due = queue
                .by_deadline
                .first_key_value()
                .is_some_and(|(&(deadline, _), _)| deadline <= until);
            if !due {
                return false;
            }
            let Some(((deadline, token), event)) = queue.by_deadline.pop_first() else {
                return false;
            };
            queue.deadlines.remove(&token);
            queue.now = queue.now.max(deadline);
            TimerFired {
                token: TimerToken(token),
                event,
            }
        };
        trace!(token = %fired.token, "manual timer fired");
        if self.tx.send(fired).is_err() {
            debug!("timer receiver dropped; discarding fired timer");
        }
        true
    }

    /// Moves time forward to `to` without firing anything.
    ///
    /// Moving backwards is ignored.
    pub fn advance_to(&self, to: Duration) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.now = queue.now.max(to);
    }

    /// Deadline of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.by_deadline.keys().next().map(|&(deadline, _)| deadline)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    fn after(&self, delay: Duration, event: TimerEvent) -> TimerToken {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let token = queue.next_token;
        queue.next_token += 1;
        let deadline = queue.now.saturating_add(delay);
        queue.by_deadline.insert((deadline, token), event);
        queue.deadlines.insert(token, deadline);
        TimerToken(token)
    }

    fn cancel(&self, token: TimerToken) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .deadlines
            .remove(&token.0)
            .and_then(|deadline| queue.by_deadline.remove(&(deadline, token.0)))
            .is_some()
    }

    fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deadlines
            .len()
    }
}

// ============================================================================
// TokioClock
// ============================================================================

/// Real-time clock; each timer is a `tokio` task racing its cancellation token.
///
/// Must be used from within a `tokio` runtime. Dropping the clock cancels
/// every outstanding timer.
#[derive(Debug)]
pub struct TokioClock {
    epoch: Instant,
    next_token: AtomicU64,
    live: Arc<DashMap<TimerToken, CancellationToken>>,
    root: CancellationToken,
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioClock {
    /// Creates a clock starting now and the receiver its timers fire into.
    #[must_use]
    pub fn new() -> (Arc<Self>, TimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = Arc::new(Self {
            epoch: Instant::now(),
            next_token: AtomicU64::new(0),
            live: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            tx,
        });
        (clock, rx)
    }

    /// Cancels every outstanding timer.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.live.clear();
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn after(&self, delay: Duration, event: TimerEvent) -> TimerToken {
        let token = TimerToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let cancel = self.root.child_token();
        self.live.insert(token, cancel.clone());

        let live = Arc::clone(&self.live);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    trace!(%token, "timer cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    // A concurrent cancel() wins if it already removed the entry.
                    if live.remove(&token).is_some() {
                        let _ = tx.send(TimerFired { token, event });
                    }
                }
            }
        });
        token
    }

    fn cancel(&self, token: TimerToken) -> bool {
        self.live.remove(&token).is_some_and(|(_, cancel)| {
            cancel.cancel();
            true
        })
    }

    fn pending(&self) -> usize {
        self.live.len()
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
