//! In-memory record of which timer is installed for which subject.
//!
//! Only the reconciliation loop owns and mutates a [`ScheduleTable`]; firing
//! callbacks never see it.
use std::collections::BTreeMap;

use crate::model::{DesiredTime, TimeOfDay};
use crate::timer::TimerHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub subject_id: i64,
    pub contact: String,
    pub time: TimeOfDay,
    pub handle: TimerHandle,
}

impl ScheduleEntry {
    fn matches(&self, desired: &DesiredTime) -> bool {
        self.time == desired.time && self.contact == desired.contact
    }
}

#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: BTreeMap<i64, ScheduleEntry>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject_id: i64) -> Option<&ScheduleEntry> {
        self.entries.get(&subject_id)
    }

    /// Insert or replace; returns the previous entry for the subject.
    pub fn upsert(&mut self, entry: ScheduleEntry) -> Option<ScheduleEntry> {
        self.entries.insert(entry.subject_id, entry)
    }

    pub fn remove(&mut self, subject_id: i64) -> Option<ScheduleEntry> {
        self.entries.remove(&subject_id)
    }

    /// Entries ordered by subject id.
    pub fn entries(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One action needed to bring the table in line with the desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleChange {
    Install(DesiredTime),
    Replace {
        previous: TimerHandle,
        desired: DesiredTime,
    },
    Cancel {
        subject_id: i64,
        handle: TimerHandle,
    },
}

impl ScheduleChange {
    pub fn subject_id(&self) -> i64 {
        match self {
            ScheduleChange::Install(d) => d.subject_id,
            ScheduleChange::Replace { desired, .. } => desired.subject_id,
            ScheduleChange::Cancel { subject_id, .. } => *subject_id,
        }
    }
}

/// Structural per-subject diff. Unchanged subjects produce nothing.
///
/// When `desired` lists a subject twice, the last row wins.
pub fn diff(table: &ScheduleTable, desired: &[DesiredTime]) -> Vec<ScheduleChange> {
    let wanted: BTreeMap<i64, &DesiredTime> =
        desired.iter().map(|d| (d.subject_id, d)).collect();

    let mut changes = Vec::new();
    for (subject_id, want) in &wanted {
        match table.get(*subject_id) {
            None => changes.push(ScheduleChange::Install((*want).clone())),
            Some(entry) if entry.matches(want) => {}
            Some(entry) => changes.push(ScheduleChange::Replace {
                previous: entry.handle,
                desired: (*want).clone(),
            }),
        }
    }
    for entry in table.entries() {
        if !wanted.contains_key(&entry.subject_id) {
            changes.push(ScheduleChange::Cancel {
                subject_id: entry.subject_id,
                handle: entry.handle,
            });
        }
    }
    changes
}
