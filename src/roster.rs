use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{Origin, Student};

// Sources are assumed disjoint; nothing is de-duplicated.
pub fn merge(regular: Vec<Student>, day_to_day: Vec<Student>) -> Vec<Student> {
    let mut combined = regular;
    combined.reserve(day_to_day.len());
    combined.extend(day_to_day.into_iter().map(|student| Student {
        origin: Origin::DayToDay,
        ..student
    }));
    combined
}

pub fn merge_values(regular: &Value, day_to_day: &Value) -> Vec<Student> {
    merge(students_from_value(regular), students_from_value(day_to_day))
}

fn students_from_value(value: &Value) -> Vec<Student> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(student) => Some(student),
            Err(err) => {
                debug!(error = %err, "dropping malformed roster entry");
                None
            }
        })
        .collect()
}

pub fn find_id_collisions(regular: &[Student], day_to_day: &[Student]) -> Vec<String> {
    let regular_ids: HashSet<&str> = regular.iter().map(|s| s.id.as_str()).collect();
    let mut seen = HashSet::new();
    let collisions: Vec<String> = day_to_day
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| regular_ids.contains(id) && seen.insert(*id))
        .map(str::to_string)
        .collect();

    if !collisions.is_empty() {
        warn!(
            count = collisions.len(),
            ids = ?collisions,
            "student ids present in both regular and day-to-day rosters"
        );
    }
    collisions
}
