use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    error::{
        VALIDATION_HARM_DONE_REQUIRED, VALIDATION_INVALID_VALUE, VALIDATION_PERSON_REQUIRED,
        VALIDATION_USER_REQUIRED,
    },
    AppError, AppResult,
};

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($label:literal) {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $( $text => Ok($name::$variant), )+
                    other => Err(AppError::new(
                        VALIDATION_INVALID_VALUE,
                        format!("Unrecognised {}.", $label),
                    )
                    .with_context("field", $label)
                    .with_context("value", other.to_string())),
                }
            }
        }
    };
}

string_enum! {
    /// Lifecycle of a whole inventory.
    pub enum InventoryStatus ("inventory status") {
        InProgress => "in_progress",
        Completed => "completed",
        Archived => "archived",
    }
}

string_enum! {
    /// How ready the user is to make amends to one person.
    pub enum WillingnessStatus ("willingness status") {
        NotWilling => "not_willing",
        NotSure => "not_sure",
        Willing => "willing",
        Completed => "completed",
    }
}

string_enum! {
    pub enum Priority ("priority") {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

impl Default for InventoryStatus {
    fn default() -> Self {
        InventoryStatus::InProgress
    }
}

impl Default for WillingnessStatus {
    fn default() -> Self {
        WillingnessStatus::NotSure
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl WillingnessStatus {
    /// `willing` and `completed` both count towards the willing total.
    pub fn counts_as_willing(self) -> bool {
        matches!(self, WillingnessStatus::Willing | WillingnessStatus::Completed)
    }
}

impl Priority {
    /// Sort weight, highest first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

/// Counters cached on the inventory row. Always equal to a direct count
/// over the entry list once the owning transaction commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Progress {
    pub total_entries: i64,
    pub entries_willing: i64,
    pub entries_completed: i64,
}

impl Progress {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = WillingnessStatus>,
    {
        statuses
            .into_iter()
            .fold(Progress::default(), |mut progress, status| {
                progress.total_entries += 1;
                if status.counts_as_willing() {
                    progress.entries_willing += 1;
                }
                if status == WillingnessStatus::Completed {
                    progress.entries_completed += 1;
                }
                progress
            })
    }

    pub fn from_entries(entries: &[AmendsEntry]) -> Self {
        Self::tally(entries.iter().map(|entry| entry.willingness_status))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AmendsEntry {
    pub id: String,
    pub person: String,
    pub harm_done: String,
    pub willingness_status: WillingnessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_for_amends: Option<String>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl AmendsEntry {
    pub fn from_draft(id: String, draft: EntryDraft, now: i64) -> Self {
        let completed_at =
            (draft.willingness_status == WillingnessStatus::Completed).then_some(now);
        AmendsEntry {
            id,
            person: draft.person,
            harm_done: draft.harm_done,
            willingness_status: draft.willingness_status,
            plan_for_amends: draft.plan_for_amends,
            priority: draft.priority,
            notes: draft.notes,
            completed_at,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Inventory {
    pub id: String,
    pub user_id: String,
    pub status: InventoryStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
    pub entries: Vec<AmendsEntry>,
    pub progress: Progress,
    pub is_encrypted: bool,
}

impl Inventory {
    pub fn entry(&self, entry_id: &str) -> Option<&AmendsEntry> {
        self.entries.iter().find(|entry| entry.id == entry_id)
    }

    /// Apply a status change, keeping `completed_at` consistent with it.
    /// Reopening clears the completion time; archiving leaves it alone.
    pub fn apply_status(&mut self, status: InventoryStatus, now: i64) {
        match status {
            InventoryStatus::Completed => {
                self.completed_at.get_or_insert(now);
            }
            InventoryStatus::InProgress => self.completed_at = None,
            InventoryStatus::Archived => {}
        }
        self.status = status;
        self.updated_at = now;
    }
}

fn normalize_required(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| normalize_required(&v))
}

pub fn validate_user_id(user_id: &str) -> AppResult<()> {
    if user_id.trim().is_empty() {
        return Err(AppError::new(
            VALIDATION_USER_REQUIRED,
            "A user id is required.",
        ));
    }
    Ok(())
}

fn person_required() -> AppError {
    AppError::new(VALIDATION_PERSON_REQUIRED, "Person is required.").with_context("field", "person")
}

fn harm_done_required() -> AppError {
    AppError::new(VALIDATION_HARM_DONE_REQUIRED, "Harm done is required.")
        .with_context("field", "harm_done")
}

/// Payload for appending an entry. `person` and `harm_done` are required;
/// missing fields deserialize as empty and are rejected by [`validate`].
///
/// [`validate`]: NewAmendsEntry::validate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAmendsEntry {
    #[serde(default)]
    pub person: String,
    #[serde(default, alias = "harmDone")]
    pub harm_done: String,
    #[serde(default, alias = "willingnessStatus")]
    pub willingness_status: Option<WillingnessStatus>,
    #[serde(default, alias = "planForAmends")]
    pub plan_for_amends: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewAmendsEntry {
    pub fn new(person: impl Into<String>, harm_done: impl Into<String>) -> Self {
        NewAmendsEntry {
            person: person.into(),
            harm_done: harm_done.into(),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: WillingnessStatus) -> Self {
        self.willingness_status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn validate(self) -> AppResult<EntryDraft> {
        let person = normalize_required(&self.person).ok_or_else(person_required)?;
        let harm_done = normalize_required(&self.harm_done).ok_or_else(harm_done_required)?;
        Ok(EntryDraft {
            person,
            harm_done,
            willingness_status: self.willingness_status.unwrap_or_default(),
            plan_for_amends: normalize_optional(self.plan_for_amends),
            priority: self.priority.unwrap_or_default(),
            notes: normalize_optional(self.notes),
        })
    }
}

/// A validated, trimmed entry ready to be appended. Only obtainable through
/// [`NewAmendsEntry::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    person: String,
    harm_done: String,
    willingness_status: WillingnessStatus,
    plan_for_amends: Option<String>,
    priority: Priority,
    notes: Option<String>,
}

/// Partial update for one entry. Absent fields keep their stored value.
/// An empty `plan_for_amends` or `notes` clears the field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryPatch {
    #[serde(default)]
    pub person: Option<String>,
    #[serde(default, alias = "harmDone")]
    pub harm_done: Option<String>,
    #[serde(default, alias = "willingnessStatus")]
    pub willingness_status: Option<WillingnessStatus>,
    #[serde(default, alias = "planForAmends")]
    pub plan_for_amends: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EntryPatch {
    pub fn status(status: WillingnessStatus) -> Self {
        EntryPatch {
            willingness_status: Some(status),
            ..Default::default()
        }
    }

    pub fn validate(self) -> AppResult<EntryChanges> {
        let person = match self.person {
            Some(value) => Some(normalize_required(&value).ok_or_else(person_required)?),
            None => None,
        };
        let harm_done = match self.harm_done {
            Some(value) => Some(normalize_required(&value).ok_or_else(harm_done_required)?),
            None => None,
        };
        Ok(EntryChanges {
            person,
            harm_done,
            willingness_status: self.willingness_status,
            plan_for_amends: self.plan_for_amends.map(|v| normalize_required(&v)),
            priority: self.priority,
            notes: self.notes.map(|v| normalize_required(&v)),
        })
    }
}

/// Validated form of [`EntryPatch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryChanges {
    person: Option<String>,
    harm_done: Option<String>,
    willingness_status: Option<WillingnessStatus>,
    plan_for_amends: Option<Option<String>>,
    priority: Option<Priority>,
    notes: Option<Option<String>>,
}

impl EntryChanges {
    /// Write the changes onto `entry`. Entering `completed` stamps
    /// `completed_at` once; later updates never move it.
    pub fn apply(&self, entry: &mut AmendsEntry, now: i64) {
        if let Some(person) = &self.person {
            entry.person = person.clone();
        }
        if let Some(harm_done) = &self.harm_done {
            entry.harm_done = harm_done.clone();
        }
        if let Some(status) = self.willingness_status {
            entry.willingness_status = status;
            if status == WillingnessStatus::Completed && entry.completed_at.is_none() {
                entry.completed_at = Some(now);
            }
        }
        if let Some(plan) = &self.plan_for_amends {
            entry.plan_for_amends = plan.clone();
        }
        if let Some(priority) = self.priority {
            entry.priority = priority;
        }
        if let Some(notes) = &self.notes {
            entry.notes = notes.clone();
        }
        entry.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VALIDATION_INVALID_VALUE;

    fn entry(status: WillingnessStatus) -> AmendsEntry {
        let draft = NewAmendsEntry::new("Jane", "Said cruel things")
            .with_status(status)
            .validate()
            .expect("valid draft");
        AmendsEntry::from_draft("e1".into(), draft, 1_000)
    }

    #[test]
    fn enums_round_trip_through_strings() {
        for status in WillingnessStatus::ALL {
            assert_eq!(status.as_str().parse::<WillingnessStatus>().unwrap(), *status);
        }
        let json = serde_json::to_string(&InventoryStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let err = "hesitant".parse::<WillingnessStatus>().unwrap_err();
        assert_eq!(err.code(), VALIDATION_INVALID_VALUE);
        assert_eq!(err.context().get("value").map(String::as_str), Some("hesitant"));
    }

    #[test]
    fn draft_applies_defaults_and_trims() {
        let draft = NewAmendsEntry {
            person: "  Jane ".into(),
            harm_done: " Lied ".into(),
            notes: Some("   ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(draft.person, "Jane");
        assert_eq!(draft.harm_done, "Lied");
        assert_eq!(draft.willingness_status, WillingnessStatus::NotSure);
        assert_eq!(draft.priority, Priority::Medium);
        assert_eq!(draft.notes, None);
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let err = NewAmendsEntry::new("", "harm").validate().unwrap_err();
        assert_eq!(err.code(), VALIDATION_PERSON_REQUIRED);

        let err = NewAmendsEntry::new("Jane", "  ").validate().unwrap_err();
        assert_eq!(err.code(), VALIDATION_HARM_DONE_REQUIRED);

        let payload: NewAmendsEntry =
            serde_json::from_str(r#"{"person":"Jane"}"#).expect("missing fields default");
        assert_eq!(
            payload.validate().unwrap_err().code(),
            VALIDATION_HARM_DONE_REQUIRED
        );
    }

    #[test]
    fn accepts_camel_case_payloads() {
        let payload: NewAmendsEntry = serde_json::from_str(
            r#"{"person":"Jane","harmDone":"Said cruel things","willingnessStatus":"willing","priority":"high"}"#,
        )
        .unwrap();
        let draft = payload.validate().unwrap();
        assert_eq!(draft.willingness_status, WillingnessStatus::Willing);
        assert_eq!(draft.priority, Priority::High);
    }

    #[test]
    fn completed_draft_is_stamped_at_creation() {
        let e = entry(WillingnessStatus::Completed);
        assert_eq!(e.completed_at, Some(1_000));
        assert_eq!(entry(WillingnessStatus::Willing).completed_at, None);
    }

    #[test]
    fn completion_time_is_set_once() {
        let mut e = entry(WillingnessStatus::NotSure);
        EntryPatch::status(WillingnessStatus::Completed)
            .validate()
            .unwrap()
            .apply(&mut e, 2_000);
        assert_eq!(e.completed_at, Some(2_000));
        assert_eq!(e.updated_at, 2_000);

        let notes = EntryPatch {
            notes: Some("called her".into()),
            ..Default::default()
        };
        notes.validate().unwrap().apply(&mut e, 3_000);
        assert_eq!(e.completed_at, Some(2_000));
        assert_eq!(e.notes.as_deref(), Some("called her"));

        // reopening keeps the original completion time
        EntryPatch::status(WillingnessStatus::Willing)
            .validate()
            .unwrap()
            .apply(&mut e, 4_000);
        EntryPatch::status(WillingnessStatus::Completed)
            .validate()
            .unwrap()
            .apply(&mut e, 5_000);
        assert_eq!(e.completed_at, Some(2_000));
    }

    #[test]
    fn patch_rejects_blank_required_fields_and_clears_optional_ones() {
        let err = EntryPatch {
            person: Some(" ".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(err.code(), VALIDATION_PERSON_REQUIRED);

        let mut e = entry(WillingnessStatus::NotSure);
        e.plan_for_amends = Some("write a letter".into());
        EntryPatch {
            plan_for_amends: Some(String::new()),
            ..Default::default()
        }
        .validate()
        .unwrap()
        .apply(&mut e, 2_000);
        assert_eq!(e.plan_for_amends, None);
    }

    #[test]
    fn progress_counts_willing_and_completed() {
        let progress = Progress::tally([
            WillingnessStatus::NotWilling,
            WillingnessStatus::Willing,
            WillingnessStatus::Completed,
            WillingnessStatus::NotSure,
        ]);
        assert_eq!(
            progress,
            Progress {
                total_entries: 4,
                entries_willing: 2,
                entries_completed: 1,
            }
        );
        assert_eq!(Progress::from_entries(&[]), Progress::default());
    }

    #[test]
    fn inventory_status_keeps_completion_time_consistent() {
        let mut inventory = Inventory {
            id: "inv".into(),
            user_id: "user".into(),
            status: InventoryStatus::InProgress,
            started_at: 0,
            completed_at: None,
            updated_at: 0,
            entries: Vec::new(),
            progress: Progress::default(),
            is_encrypted: false,
        };
        inventory.apply_status(InventoryStatus::Completed, 10);
        inventory.apply_status(InventoryStatus::Completed, 20);
        assert_eq!(inventory.completed_at, Some(10));
        inventory.apply_status(InventoryStatus::Archived, 30);
        assert_eq!(inventory.completed_at, Some(10));
        inventory.apply_status(InventoryStatus::InProgress, 40);
        assert_eq!(inventory.completed_at, None);
        assert_eq!(inventory.updated_at, 40);
    }

    #[test]
    fn user_id_is_required() {
        assert!(validate_user_id("u-1").is_ok());
        assert_eq!(
            validate_user_id("   ").unwrap_err().code(),
            VALIDATION_USER_REQUIRED
        );
    }
}
