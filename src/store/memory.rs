//! In-process progress store.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{CompletionRecord, ProgressStore, ProgressSummary, Result, XpSchedule, summarize};

/// Progress store backed by a concurrent map; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    records: DashMap<String, CompletionRecord>,
    schedule: XpSchedule,
}

impl InMemoryProgressStore {
    /// Creates an empty store with the default XP schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with a custom XP schedule.
    #[must_use]
    pub fn with_schedule(schedule: XpSchedule) -> Self {
        Self {
            records: DashMap::new(),
            schedule,
        }
    }

    /// Number of completion records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing has been completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn grant_if_first(&self, lab_id: &str, score: u8) -> Result<u32> {
        match self.records.entry(lab_id.to_owned()) {
            Entry::Occupied(_) => Ok(0),
            Entry::Vacant(slot) => {
                let xp = self.schedule.xp_for(score);
                slot.insert(CompletionRecord {
                    lab_id: lab_id.to_owned(),
                    score,
                    xp_earned: xp,
                    completed_at: Utc::now(),
                });
                Ok(xp)
            }
        }
    }

    async fn is_completed(&self, lab_id: &str) -> Result<bool> {
        Ok(self.records.contains_key(lab_id))
    }

    async fn get_completion(&self, lab_id: &str) -> Result<Option<CompletionRecord>> {
        Ok(self.records.get(lab_id).map(|r| r.value().clone()))
    }

    async fn summary(&self) -> Result<ProgressSummary> {
        let records: Vec<CompletionRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        Ok(summarize(records.iter()))
    }
}
