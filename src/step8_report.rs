//! Read-only views over an inventory: statistics, filtered listings and the
//! Step 9 handoff projection.

use serde::{Deserialize, Serialize};

use crate::model_step8::{AmendsEntry, Inventory, Priority, Progress, WillingnessStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

impl PriorityCounts {
    fn record(&mut self, priority: Priority) {
        match priority {
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendsStats {
    pub total_entries: i64,
    pub entries_willing: i64,
    pub entries_completed: i64,
    pub willingness_percentage: i64,
    pub completed_percentage: i64,
    pub priority_counts: PriorityCounts,
}

impl AmendsStats {
    /// Stats for a user without an active inventory.
    pub fn empty() -> Self {
        AmendsStats::default()
    }

    pub fn from_entries(entries: &[AmendsEntry]) -> Self {
        let progress = Progress::from_entries(entries);
        let mut priority_counts = PriorityCounts::default();
        for entry in entries {
            priority_counts.record(entry.priority);
        }
        AmendsStats {
            total_entries: progress.total_entries,
            entries_willing: progress.entries_willing,
            entries_completed: progress.entries_completed,
            willingness_percentage: rounded_percentage(
                progress.entries_willing,
                progress.total_entries,
            ),
            completed_percentage: rounded_percentage(
                progress.entries_completed,
                progress.total_entries,
            ),
            priority_counts,
        }
    }
}

/// `part / total` as a whole percentage, halves rounded up. Zero when
/// `total` is not positive.
pub fn rounded_percentage(part: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    (part * 200 + total) / (total * 2)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<WillingnessStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &AmendsEntry) -> bool {
        let search_match = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                entry.person.to_lowercase().contains(&term)
                    || entry.harm_done.to_lowercase().contains(&term)
            }
        };
        search_match
            && self.status.map_or(true, |s| entry.willingness_status == s)
            && self.priority.map_or(true, |p| entry.priority == p)
    }

    /// Matching entries, highest priority first. List order is kept within
    /// a priority.
    pub fn apply(&self, entries: &[AmendsEntry]) -> Vec<AmendsEntry> {
        let mut matched: Vec<AmendsEntry> = entries
            .iter()
            .filter(|entry| self.matches(entry))
            .cloned()
            .collect();
        matched.sort_by_key(|entry| std::cmp::Reverse(entry.priority.rank()));
        matched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmendStatus {
    NotStarted,
    Completed,
}

/// Seed record for the Step 9 amends-making list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmendsHandoff {
    pub step_eight_entry_id: String,
    pub person: String,
    pub harm_done: String,
    pub amend_status: AmendStatus,
    pub priority: Priority,
    pub plan_for_amends: String,
    pub notes: String,
}

pub fn handoff_entries(inventory: &Inventory) -> Vec<AmendsHandoff> {
    inventory
        .entries
        .iter()
        .filter(|entry| entry.willingness_status.counts_as_willing())
        .map(|entry| AmendsHandoff {
            step_eight_entry_id: entry.id.clone(),
            person: entry.person.clone(),
            harm_done: entry.harm_done.clone(),
            amend_status: if entry.willingness_status == WillingnessStatus::Completed {
                AmendStatus::Completed
            } else {
                AmendStatus::NotStarted
            },
            priority: entry.priority,
            plan_for_amends: entry.plan_for_amends.clone().unwrap_or_default(),
            notes: entry.notes.clone().unwrap_or_default(),
        })
        .collect()
}
