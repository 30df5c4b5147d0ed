use std::fmt;

use serde::Serialize;

use crate::models::SubjectTally;

// `Empty` means there was nothing to divide by; it renders differently from a computed zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Percentage {
    Empty,
    Computed(f64),
}

impl Percentage {
    pub fn value(self) -> f64 {
        match self {
            Percentage::Empty => 0.0,
            Percentage::Computed(value) => value,
        }
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Percentage::Empty => write!(f, "n/a"),
            Percentage::Computed(value) => write!(f, "{value:.1}%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPercentage {
    pub subject_id: String,
    pub subject_name: String,
    pub present_count: u32,
    pub sessions_defined: u32,
    pub percentage: Percentage,
}

pub fn round1(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

pub fn subject_percentage(present_count: u32, total_sessions: u32) -> Percentage {
    if total_sessions == 0 {
        return Percentage::Empty;
    }
    Percentage::Computed(round1(
        f64::from(present_count) / f64::from(total_sessions) * 100.0,
    ))
}

// Weighted by recorded events, not declared sessions.
pub fn overall_percentage(tallies: &[SubjectTally]) -> Percentage {
    let (present, events) = tallies
        .iter()
        .filter(|tally| tally.total_events() > 0)
        .fold((0u64, 0u64), |(present, events), tally| {
            (
                present + u64::from(tally.present_count),
                events + tally.total_events() as u64,
            )
        });

    if events == 0 {
        return Percentage::Empty;
    }
    Percentage::Computed(round1(present as f64 / events as f64 * 100.0))
}

pub fn subject_breakdown(tallies: &[SubjectTally]) -> Vec<SubjectPercentage> {
    tallies
        .iter()
        .map(|tally| SubjectPercentage {
            subject_id: tally.subject_id.clone(),
            subject_name: tally.subject_name.clone(),
            present_count: tally.present_count,
            sessions_defined: tally.sessions_defined,
            percentage: subject_percentage(tally.present_count, tally.sessions_defined),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttendanceStatus;
    use crate::normalize::tests::event;
    use crate::normalize::{tally_by_subject, GroupBy};

    fn math_seventy() -> Vec<crate::models::AttendanceEvent> {
        let mut events = Vec::new();
        for day in 1..=7 {
            events.push(event("m1", "Math", 10, day, AttendanceStatus::Present));
        }
        for day in 8..=10 {
            events.push(event("m1", "Math", 10, day, AttendanceStatus::Absent));
        }
        events
    }

    #[test]
    fn rounds_half_up_to_one_decimal() {
        assert_eq!(round1(33.333), 33.3);
        assert_eq!(round1(66.666), 66.7);
        assert_eq!(round1(12.25), 12.3);
        assert_eq!(round1(0.0), 0.0);
    }

    #[test]
    fn subject_percentage_matches_formula() {
        for (present, total) in [(0u32, 3u32), (1, 3), (2, 3), (7, 10), (5, 8), (9, 9)] {
            let expected = round1(f64::from(present) / f64::from(total) * 100.0);
            assert_eq!(subject_percentage(present, total).value(), expected);
        }
    }

    #[test]
    fn zero_sessions_is_empty() {
        assert_eq!(subject_percentage(4, 0), Percentage::Empty);
        assert_eq!(subject_percentage(4, 0).value(), 0.0);
        assert_eq!(subject_percentage(0, 5), Percentage::Computed(0.0));
    }

    #[test]
    fn seventy_percent_scenario() {
        let tallies = tally_by_subject(&math_seventy(), GroupBy::Id);
        let breakdown = subject_breakdown(&tallies);
        assert_eq!(breakdown[0].percentage, Percentage::Computed(70.0));
        assert_eq!(overall_percentage(&tallies), Percentage::Computed(70.0));
    }

    #[test]
    fn overall_is_order_independent() {
        let mut events = math_seventy();
        events.push(event("p1", "Physics", 4, 11, AttendanceStatus::Absent));
        events.push(event("p1", "Physics", 4, 12, AttendanceStatus::Present));

        let forward = overall_percentage(&tally_by_subject(&events, GroupBy::Id));
        events.reverse();
        let backward = overall_percentage(&tally_by_subject(&events, GroupBy::Id));
        assert_eq!(forward, backward);
    }

    #[test]
    fn overall_is_event_weighted_average() {
        let mut events = math_seventy();
        events.push(event("p1", "Physics", 4, 11, AttendanceStatus::Absent));
        events.push(event("p1", "Physics", 4, 12, AttendanceStatus::Present));
        events.push(event("c1", "Chemistry", 4, 13, AttendanceStatus::Absent));
        let tallies = tally_by_subject(&events, GroupBy::Id);

        let (weighted, weight) = tallies.iter().fold((0.0, 0.0), |(sum, n), tally| {
            let events = tally.total_events() as f64;
            let per_subject = f64::from(tally.present_count) / events * 100.0;
            (sum + per_subject * events, n + events)
        });

        let overall = overall_percentage(&tallies).value();
        assert!((overall - round1(weighted / weight)).abs() < 1e-9);
        assert_eq!(overall, 61.5);
    }

    #[test]
    fn overall_without_events_is_empty() {
        assert_eq!(overall_percentage(&[]), Percentage::Empty);
    }

    #[test]
    fn display_marks_empty() {
        assert_eq!(Percentage::Empty.to_string(), "n/a");
        assert_eq!(Percentage::Computed(70.0).to_string(), "70.0%");
    }
}
