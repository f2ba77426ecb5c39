//! Supply collection gate.
//!
//! Tracks which of the lab's supplies have been gathered. The gate reports
//! completion exactly once, on the collect that gathers the last required
//! item.

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::config::schema::{CollectionOrder, SupplyItem};
use crate::error::EngineError;

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Result of a successful [`SupplyGate::collect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectOutcome {
    /// Item newly collected; required items remain
    Collected,
    /// Item was already collected; nothing changed
    AlreadyCollected,
    /// Item newly collected and it completed the required set
    AllCollected,
}

/// Set of supplies collected so far.
#[derive(Debug, Clone)]
pub struct SupplyGate {
    items: IndexMap<String, SupplyItem>,
    collected: IndexSet<String>,
    order: CollectionOrder,
    fired: bool,
}

impl SupplyGate {
    /// Creates an empty gate over the lab's supplies.
    #[must_use]
    pub fn new(items: Vec<SupplyItem>, order: CollectionOrder) -> Self {
        let items: IndexMap<String, SupplyItem> = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        // Nothing to reach: the gate starts complete and never reports it.
        let fired = !items.values().any(|item| item.required);
        Self {
            items,
            collected: IndexSet::new(),
            order,
            fired,
        }
    }

    /// Marks `id` as collected.
    ///
    /// # Errors
    ///
    /// `InvalidSupply` if `id` is not one of the lab's supplies;
    /// `SupplyOutOfOrder` in sequential mode when `id` is not the next
    /// uncollected required item.
    pub fn collect(&mut self, id: &str) -> Result<CollectOutcome, EngineError> {
        if !self.items.contains_key(id) {
            return Err(EngineError::InvalidSupply {
                id: id.to_owned(),
                suggestion: self.suggest(id),
            });
        }
        if self.collected.contains(id) {
            return Ok(CollectOutcome::AlreadyCollected);
        }
        if self.order == CollectionOrder::Sequential {
            if let Some(expected) = self.next_required() {
                let required = self.items.get(id).is_some_and(|item| item.required);
                if required && expected != id {
                    return Err(EngineError::SupplyOutOfOrder {
                        id: id.to_owned(),
                        expected: expected.to_owned(),
                    });
                }
            }
        }

        self.collected.insert(id.to_owned());
        debug!(supply = id, "supply collected");

        if !self.fired && self.is_complete() {
            self.fired = true;
            return Ok(CollectOutcome::AllCollected);
        }
        Ok(CollectOutcome::Collected)
    }

    /// Returns `true` once every required supply is collected.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.items
            .values()
            .filter(|item| item.required)
            .all(|item| self.collected.contains(&item.id))
    }

    /// Returns whether the completion event has been reported.
    #[must_use]
    pub const fn all_collected_fired(&self) -> bool {
        self.fired
    }

    /// Required supplies not collected yet, in lab order.
    #[must_use]
    pub fn missing(&self) -> Vec<&str> {
        self.items
            .values()
            .filter(|item| item.required && !self.collected.contains(&item.id))
            .map(|item| item.id.as_str())
            .collect()
    }

    /// Collected supply ids, in lab order.
    #[must_use]
    pub fn collected_ids(&self) -> Vec<String> {
        self.items
            .keys()
            .filter(|id| self.collected.contains(*id))
            .cloned()
            .collect()
    }

    /// Returns the label of a supply.
    #[must_use]
    pub fn label(&self, id: &str) -> Option<&str> {
        self.items.get(id).map(|item| item.label.as_str())
    }

    fn next_required(&self) -> Option<&str> {
        self.missing().into_iter().next()
    }

    fn suggest(&self, id: &str) -> Option<String> {
        self.items
            .keys()
            .map(|known| (known, strsim::jaro_winkler(id, known)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(known, _)| known.clone())
    }
}
