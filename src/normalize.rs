use std::collections::HashMap;

use clap::ValueEnum;
use serde_json::Value;
use tracing::debug;

use crate::models::{AttendanceEvent, AttendanceStatus, SubjectTally, TallyEntry};

/// `Name` merges distinct subjects that share a display name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GroupBy {
    #[default]
    Id,
    Name,
}

pub fn tally_by_subject(events: &[AttendanceEvent], group_by: GroupBy) -> Vec<SubjectTally> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut tallies: Vec<SubjectTally> = Vec::new();

    for event in events {
        let Some(subject) = event.subject.as_ref() else {
            debug!(date = ?event.date, "skipping attendance event without subject");
            continue;
        };
        let name = match subject.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => {
                debug!(subject_id = %subject.id, "skipping attendance event without subject name");
                continue;
            }
        };

        let key = match group_by {
            GroupBy::Id => subject.id.clone(),
            GroupBy::Name => name.to_string(),
        };

        let slot = *index.entry(key).or_insert_with(|| {
            tallies.push(SubjectTally {
                subject_id: subject.id.clone(),
                subject_name: name.to_string(),
                sessions_defined: subject.sessions.unwrap_or(0),
                present_count: 0,
                absent_count: 0,
                events: Vec::new(),
            });
            tallies.len() - 1
        });
        let tally = &mut tallies[slot];

        match event.status {
            AttendanceStatus::Present => tally.present_count += 1,
            AttendanceStatus::Absent => tally.absent_count += 1,
            AttendanceStatus::Unknown => {}
        }
        tally.events.push(TallyEntry {
            date: event.date,
            status: event.status,
        });
    }

    tallies
}

pub fn events_from_value(value: &Value) -> Vec<AttendanceEvent> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(event) => Some(event),
            Err(err) => {
                debug!(error = %err, "dropping malformed attendance event");
                None
            }
        })
        .collect()
}
