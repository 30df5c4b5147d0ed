use std::collections::HashMap;
use std::fmt::Write;

use crate::models::{AttendanceEvent, Origin, Student};
use crate::normalize::{self, GroupBy};
use crate::percentage::{self, Percentage};

pub const LOW_ATTENDANCE_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone)]
pub struct StudentAttendance<'a> {
    pub student: &'a Student,
    pub overall: Percentage,
    pub subjects: Vec<percentage::SubjectPercentage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub subject_name: String,
    pub student_count: usize,
    pub avg_percentage: f64,
}

pub fn student_attendance<'a>(
    students: &'a [Student],
    attendance: &HashMap<String, Vec<AttendanceEvent>>,
    group_by: GroupBy,
) -> Vec<StudentAttendance<'a>> {
    students
        .iter()
        .map(|student| {
            let events = attendance.get(&student.id).map(Vec::as_slice).unwrap_or(&[]);
            let tallies = normalize::tally_by_subject(events, group_by);
            StudentAttendance {
                student,
                overall: percentage::overall_percentage(&tallies),
                subjects: percentage::subject_breakdown(&tallies),
            }
        })
        .collect()
}

// Subjects with no declared sessions are left out.
pub fn summarize_by_subject(
    rows: &[StudentAttendance<'_>],
    group_by: GroupBy,
) -> Vec<SubjectSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut map: HashMap<String, (SubjectSummary, f64)> = HashMap::new();

    for row in rows {
        for subject in &row.subjects {
            let Percentage::Computed(value) = subject.percentage else {
                continue;
            };
            let key = match group_by {
                GroupBy::Id => subject.subject_id.clone(),
                GroupBy::Name => subject.subject_name.clone(),
            };
            let entry = map.entry(key).or_insert_with_key(|key| {
                order.push(key.clone());
                let summary = SubjectSummary {
                    subject_id: subject.subject_id.clone(),
                    subject_name: subject.subject_name.clone(),
                    student_count: 0,
                    avg_percentage: 0.0,
                };
                (summary, 0.0)
            });
            entry.0.student_count += 1;
            entry.1 += value;
        }
    }

    order
        .into_iter()
        .filter_map(|key| {
            let (mut summary, total) = map.remove(&key)?;
            if summary.student_count > 0 {
                summary.avg_percentage =
                    percentage::round1(total / summary.student_count as f64);
            }
            Some(summary)
        })
        .collect()
}

pub fn build_report(
    class_id: &str,
    students: &[Student],
    attendance: &HashMap<String, Vec<AttendanceEvent>>,
    group_by: GroupBy,
) -> String {
    let rows = student_attendance(students, attendance, group_by);
    let summaries = summarize_by_subject(&rows, group_by);

    let mut output = String::new();
    let day_to_day = students
        .iter()
        .filter(|s| s.origin == Origin::DayToDay)
        .count();

    let _ = writeln!(output, "# Class Attendance Report");
    let _ = writeln!(
        output,
        "Generated for {} ({} regular, {} day-to-day students)",
        class_id,
        students.len() - day_to_day,
        day_to_day
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Averages");

    if summaries.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this class.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {:.1}% across {} students",
                summary.subject_name,
                summary.subject_id,
                summary.avg_percentage,
                summary.student_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if rows.is_empty() {
        let _ = writeln!(output, "No students on this roster.");
    } else {
        for row in rows.iter() {
            let _ = writeln!(
                output,
                "- {} ({}, roll {}, {}) overall {}",
                row.student.name,
                row.student.id,
                row.student.roll_num,
                row.student.origin.label(),
                row.overall
            );
            for subject in row.subjects.iter() {
                let _ = writeln!(
                    output,
                    "  - {}: {} ({} of {} sessions)",
                    subject.subject_name,
                    subject.percentage,
                    subject.present_count,
                    subject.sessions_defined
                );
            }
        }
    }

    let mut flagged: Vec<&StudentAttendance<'_>> = rows
        .iter()
        .filter(|row| matches!(row.overall, Percentage::Computed(v) if v < LOW_ATTENDANCE_THRESHOLD))
        .collect();
    flagged.sort_by(|a, b| {
        a.overall
            .value()
            .partial_cmp(&b.overall.value())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Needs Attention");

    if flagged.is_empty() {
        let _ = writeln!(
            output,
            "Every student with recorded attendance is at or above {:.0}%.",
            LOW_ATTENDANCE_THRESHOLD
        );
    } else {
        for row in flagged.iter() {
            let _ = writeln!(output, "- {} ({}) overall {}", row.student.name, row.student.id, row.overall);
        }
    }

    output
}
