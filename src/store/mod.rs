//! Persisted learner progress.
//!
//! The engine only ever talks to a [`ProgressStore`]; completion records are
//! owned by the store and written once per lab. Calls may be repeated for the
//! same logical event, so `grant_if_first` must dedupe by lab id.

pub mod file;
pub mod memory;

pub use file::JsonFileProgressStore;
pub use memory::InMemoryProgressStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Completion of one lab, written once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Lab id
    pub lab_id: String,
    /// Score of the first granted submission
    pub score: u8,
    /// XP awarded for that submission
    pub xp_earned: u32,
    /// When the grant was recorded
    pub completed_at: DateTime<Utc>,
}

/// Totals across every completed lab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    /// Labs with a completion record
    pub completed_labs: usize,
    /// Sum of XP over every record
    pub total_xp: u64,
}

/// Converts a quiz score to XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpSchedule {
    /// XP for a score of 100
    pub base_xp: u32,
}

impl Default for XpSchedule {
    fn default() -> Self {
        Self { base_xp: 100 }
    }
}

impl XpSchedule {
    /// XP for `score` (clamped to 100).
    #[must_use]
    pub fn xp_for(&self, score: u8) -> u32 {
        self.base_xp * u32::from(score.min(100)) / 100
    }
}

/// External progress store consumed by the reward gate.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync + std::fmt::Debug {
    /// Records a completion for `lab_id` unless one exists.
    ///
    /// Returns the XP awarded: non-zero only for the call that created the
    /// record, `0` for every later call.
    async fn grant_if_first(&self, lab_id: &str, score: u8) -> Result<u32>;

    /// Returns `true` if `lab_id` has a completion record.
    async fn is_completed(&self, lab_id: &str) -> Result<bool>;

    /// Returns the completion record for `lab_id`.
    async fn get_completion(&self, lab_id: &str) -> Result<Option<CompletionRecord>>;

    /// Totals across every completed lab.
    async fn summary(&self) -> Result<ProgressSummary>;
}

fn summarize<'a>(records: impl Iterator<Item = &'a CompletionRecord>) -> ProgressSummary {
    records.fold(ProgressSummary::default(), |acc, record| ProgressSummary {
        completed_labs: acc.completed_labs + 1,
        total_xp: acc.total_xp + u64::from(record.xp_earned),
    })
}
