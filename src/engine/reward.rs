//! Reward gate.
//!
//! The first quiz submission evaluated for a lab claims the lab's reward.
//! That claim is the only one that can yield XP, and always at its original
//! score. A claim the store could not confirm stays queued and is retried on
//! the next grant or on [`RewardGate::retry_pending`]; whichever call settles
//! it reports the XP. Every other submission gets zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::ProgressStore;

use super::quiz::ScoreTier;

/// Default bound on a single store call.
pub const DEFAULT_GRANT_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened to a grant request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GrantStatus {
    /// The lab's claim was settled by this call
    Granted,
    /// The lab was already claimed; nothing awarded
    AlreadyClaimed,
    /// The store did not confirm the claim; it stays queued
    Deferred {
        /// Store calls attempted for the claim so far
        attempts: u32,
        /// Last store failure
        reason: String,
    },
}

impl GrantStatus {
    /// Stable label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::AlreadyClaimed => "already_claimed",
            Self::Deferred { .. } => "deferred",
        }
    }
}

/// Result of [`RewardGate::grant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    /// Lab the grant was for
    pub lab_id: String,
    /// XP awarded by this call
    pub xp: u32,
    /// Grant status
    #[serde(flatten)]
    pub status: GrantStatus,
}

#[derive(Debug, Clone)]
struct Claim {
    score: u8,
    tier: ScoreTier,
    attempts: u32,
    settled: Option<u32>,
}

/// Enforces the first-claim rule against a [`ProgressStore`].
///
/// Survives session resets: the controller keeps one gate for its lifetime.
#[derive(Debug)]
pub struct RewardGate {
    store: Arc<dyn ProgressStore>,
    ledger: HashMap<String, Claim>,
    timeout: Duration,
}

impl RewardGate {
    /// Creates a gate over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self {
            store,
            ledger: HashMap::new(),
            timeout: DEFAULT_GRANT_TIMEOUT,
        }
    }

    /// Bounds each store call by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the progress store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Requests the reward for one evaluated submission.
    ///
    /// Never fails: store errors become [`GrantStatus::Deferred`]. A later
    /// submission for an already-claimed lab retries a still-pending claim
    /// with the claim's original score; if the store confirms it now, that
    /// call reports `Granted` with the settled XP. A claim settled before
    /// the call reports `AlreadyClaimed`.
    pub async fn grant(&mut self, lab_id: &str, tier: ScoreTier, score: u8) -> GrantOutcome {
        let first = !self.ledger.contains_key(lab_id);
        if first {
            debug!(lab = lab_id, %tier, score, "reward claimed");
            self.ledger.insert(
                lab_id.to_owned(),
                Claim {
                    score,
                    tier,
                    attempts: 0,
                    settled: None,
                },
            );
        }

        self.settle(lab_id).await
    }

    /// Retries every pending claim.
    ///
    /// Returns one outcome per claim that was pending before the call.
    pub async fn retry_pending(&mut self) -> Vec<GrantOutcome> {
        let mut pending: Vec<String> = self
            .ledger
            .iter()
            .filter(|(_, claim)| claim.settled.is_none())
            .map(|(lab, _)| lab.clone())
            .collect();
        pending.sort();

        let mut outcomes = Vec::with_capacity(pending.len());
        for lab in pending {
            outcomes.push(self.settle(&lab).await);
        }
        outcomes
    }

    /// Returns `true` once a claim exists for `lab_id`, settled or not.
    #[must_use]
    pub fn is_locked(&self, lab_id: &str) -> bool {
        self.ledger.contains_key(lab_id)
    }

    /// XP settled for `lab_id`, if the store confirmed the claim.
    #[must_use]
    pub fn settled_xp(&self, lab_id: &str) -> Option<u32> {
        self.ledger.get(lab_id).and_then(|claim| claim.settled)
    }

    /// Tier that claimed `lab_id`.
    #[must_use]
    pub fn claimed_tier(&self, lab_id: &str) -> Option<ScoreTier> {
        self.ledger.get(lab_id).map(|claim| claim.tier)
    }

    /// Number of claims the store has not confirmed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.ledger
            .values()
            .filter(|claim| claim.settled.is_none())
            .count()
    }

    /// Drives one claim towards the store. A settled claim is reported as
    /// `AlreadyClaimed` without touching the store.
    async fn settle(&mut self, lab_id: &str) -> GrantOutcome {
        let Some(claim) = self.ledger.get(lab_id) else {
            return GrantOutcome {
                lab_id: lab_id.to_owned(),
                xp: 0,
                status: GrantStatus::AlreadyClaimed,
            };
        };
        if claim.settled.is_some() {
            return GrantOutcome {
                lab_id: lab_id.to_owned(),
                xp: 0,
                status: GrantStatus::AlreadyClaimed,
            };
        }
        let score = claim.score;

        let result = match tokio::time::timeout(
            self.timeout,
            self.store.grant_if_first(lab_id, score),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        let Some(claim) = self.ledger.get_mut(lab_id) else {
            return GrantOutcome {
                lab_id: lab_id.to_owned(),
                xp: 0,
                status: GrantStatus::AlreadyClaimed,
            };
        };
        claim.attempts += 1;
        match result {
            Ok(xp) => {
                claim.settled = Some(xp);
                info!(lab = lab_id, xp, score, "reward granted");
                GrantOutcome {
                    lab_id: lab_id.to_owned(),
                    xp,
                    status: GrantStatus::Granted,
                }
            }
            Err(e) => {
                warn!(lab = lab_id, attempts = claim.attempts, error = %e, "reward grant deferred");
                GrantOutcome {
                    lab_id: lab_id.to_owned(),
                    xp: 0,
                    status: GrantStatus::Deferred {
                        attempts: claim.attempts,
                        reason: e.to_string(),
                    },
                }
            }
        }
    }
}
