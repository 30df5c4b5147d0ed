use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AttendanceError;
use crate::models::NamedBatch;

pub const MAX_BATCHES: usize = 64;

// Always holds between 1 and MAX_BATCHES batches, and `current` indexes one of
// them. A student may sit in several batches or in none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredPlan")]
pub struct BatchPlan {
    batches: Vec<Vec<String>>,
    current: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredPlan {
    #[serde(default)]
    batches: Vec<Vec<String>>,
    #[serde(default)]
    current: usize,
}

impl From<StoredPlan> for BatchPlan {
    fn from(stored: StoredPlan) -> Self {
        let mut batches = stored.batches;
        batches.truncate(MAX_BATCHES);
        if batches.is_empty() {
            batches.push(Vec::new());
        }
        let current = stored.current.min(batches.len() - 1);
        Self { batches, current }
    }
}

impl Default for BatchPlan {
    fn default() -> Self {
        Self::new(1)
    }
}

impl BatchPlan {
    pub fn new(count: i64) -> Self {
        Self {
            batches: vec![Vec::new(); clamp_count(count)],
            current: 0,
        }
    }

    pub fn from_assignments(named: &[NamedBatch]) -> Self {
        let batches: Vec<Vec<String>> = named
            .iter()
            .map(|batch| {
                let mut seen = HashSet::new();
                batch
                    .students
                    .iter()
                    .filter(|id| seen.insert(id.as_str()))
                    .cloned()
                    .collect::<Vec<String>>()
            })
            .collect();
        Self::from(StoredPlan {
            batches,
            current: 0,
        })
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn snapshot(&self) -> Vec<NamedBatch> {
        self.batches
            .iter()
            .enumerate()
            .map(|(index, students)| NamedBatch {
                batch_name: batch_name(index),
                students: students.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum BatchAction {
    SetBatchCount(i64),
    ToggleStudent(String),
    SetCurrentBatch(usize),
    Next,
    Previous,
}

pub fn apply_action(mut plan: BatchPlan, action: BatchAction) -> BatchPlan {
    match action {
        BatchAction::SetBatchCount(count) => {
            // Shrinking drops tail batches and whatever they held.
            plan.batches.resize_with(clamp_count(count), Vec::new);
            plan.current = plan.current.min(plan.batches.len() - 1);
        }
        BatchAction::ToggleStudent(student_id) => {
            if let Some(batch) = plan.batches.get_mut(plan.current) {
                match batch.iter().position(|id| *id == student_id) {
                    Some(pos) => {
                        batch.remove(pos);
                    }
                    None => batch.push(student_id),
                }
            }
        }
        BatchAction::SetCurrentBatch(index) => {
            if index < plan.batches.len() {
                plan.current = index;
            }
        }
        BatchAction::Next => {
            if plan.current + 1 < plan.batches.len() {
                plan.current += 1;
            }
        }
        BatchAction::Previous => {
            plan.current = plan.current.saturating_sub(1);
        }
    }
    plan
}

fn clamp_count(count: i64) -> usize {
    usize::try_from(count.clamp(1, MAX_BATCHES as i64)).unwrap_or(1)
}

fn batch_name(index: usize) -> String {
    format!("Batch-{}", index + 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BatchWarning {
    Duplicated {
        student_id: String,
        batches: Vec<String>,
    },
    Unassigned {
        student_id: String,
    },
}

impl fmt::Display for BatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchWarning::Duplicated {
                student_id,
                batches,
            } => write!(f, "{student_id} is in {}", batches.join(", ")),
            BatchWarning::Unassigned { student_id } => {
                write!(f, "{student_id} is not in any batch")
            }
        }
    }
}

pub fn validate(plan: &BatchPlan, roster_ids: &[String]) -> Vec<BatchWarning> {
    let mut order: Vec<&str> = Vec::new();
    let mut placements: HashMap<&str, Vec<String>> = HashMap::new();

    for (index, students) in plan.batches.iter().enumerate() {
        for id in students {
            let entry = placements.entry(id.as_str()).or_insert_with(|| {
                order.push(id.as_str());
                Vec::new()
            });
            entry.push(batch_name(index));
        }
    }

    let mut warnings: Vec<BatchWarning> = order
        .iter()
        .filter_map(|id| {
            let batches = &placements[id];
            (batches.len() > 1).then(|| BatchWarning::Duplicated {
                student_id: id.to_string(),
                batches: batches.clone(),
            })
        })
        .collect();

    warnings.extend(
        roster_ids
            .iter()
            .filter(|id| !placements.contains_key(id.as_str()))
            .map(|id| BatchWarning::Unassigned {
                student_id: id.clone(),
            }),
    );
    warnings
}

// Implementations store every batch or fail as a whole.
#[allow(async_fn_in_trait)]
pub trait BatchSink {
    async fn save_batches(
        &self,
        subject_id: &str,
        batches: &[NamedBatch],
    ) -> Result<(), AttendanceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub subject_id: String,
    pub batches: Vec<NamedBatch>,
    pub warnings: Vec<BatchWarning>,
}

pub async fn commit<S: BatchSink>(
    plan: &BatchPlan,
    subject_id: &str,
    roster_ids: &[String],
    sink: &S,
) -> Result<CommitReport, AttendanceError> {
    let warnings = validate(plan, roster_ids);
    for warning in &warnings {
        warn!(subject_id, %warning, "batch assignment warning");
    }

    let batches = plan.snapshot();
    sink.save_batches(subject_id, &batches).await?;
    info!(subject_id, batch_count = batches.len(), "batches saved");

    Ok(CommitReport {
        subject_id: subject_id.to_string(),
        batches,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn run(plan: BatchPlan, actions: Vec<BatchAction>) -> BatchPlan {
        actions.into_iter().fold(plan, apply_action)
    }

    #[derive(Default)]
    struct MemorySink {
        reject: bool,
        saved: Mutex<Vec<(String, Vec<NamedBatch>)>>,
    }

    impl BatchSink for MemorySink {
        async fn save_batches(
            &self,
            subject_id: &str,
            batches: &[NamedBatch],
        ) -> Result<(), AttendanceError> {
            if self.reject {
                return Err(AttendanceError::SinkRejected {
                    subject_id: subject_id.to_string(),
                    message: "subject not found".to_string(),
                });
            }
            self.saved
                .lock()
                .unwrap()
                .push((subject_id.to_string(), batches.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn count_is_clamped_to_one() {
        assert_eq!(BatchPlan::new(-3).batch_count(), 1);
        assert_eq!(BatchPlan::new(0).batch_count(), 1);
        let plan = apply_action(BatchPlan::new(3), BatchAction::SetBatchCount(-1));
        assert_eq!(plan.batch_count(), 1);
    }

    #[test]
    fn count_is_capped() {
        let plan = apply_action(BatchPlan::new(2), BatchAction::SetBatchCount(i64::MAX));
        assert_eq!(plan.batch_count(), MAX_BATCHES);
        assert_eq!(BatchPlan::new(i64::MAX).batch_count(), MAX_BATCHES);
    }

    #[test]
    fn stored_plans_are_clamped_on_load() {
        let empty: BatchPlan = serde_json::from_str(r#"{"batches":[],"current":0}"#).unwrap();
        assert_eq!(empty.batch_count(), 1);
        let plan = apply_action(empty, BatchAction::ToggleStudent("a".into()));
        assert_eq!(plan.batches[0], ids(&["a"]));

        let stray: BatchPlan = serde_json::from_str(r#"{"batches":[[]],"current":5}"#).unwrap();
        assert_eq!(stray.current, 0);
        let plan = apply_action(stray, BatchAction::ToggleStudent("b".into()));
        assert_eq!(plan.batches[0], ids(&["b"]));

        let saved = serde_json::to_string(&plan).unwrap();
        assert_eq!(serde_json::from_str::<BatchPlan>(&saved).unwrap(), plan);
    }

    #[test]
    fn from_assignments_drops_repeated_ids() {
        let named = vec![
            NamedBatch {
                batch_name: "Batch-1".into(),
                students: ids(&["c", "a", "c", "b", "a"]),
            },
            NamedBatch {
                batch_name: "Lab Group".into(),
                students: ids(&["a"]),
            },
        ];
        let plan = BatchPlan::from_assignments(&named);
        assert_eq!(plan.batches[0], ids(&["c", "a", "b"]));
        assert_eq!(plan.batches[1], ids(&["a"]));
        assert_eq!(plan.snapshot()[1].batch_name, "Batch-2");
        assert_eq!(BatchPlan::from_assignments(&[]).batch_count(), 1);
    }

    #[test]
    fn toggle_adds_then_removes() {
        let plan = run(
            BatchPlan::new(2),
            vec![
                BatchAction::ToggleStudent("s1".into()),
                BatchAction::ToggleStudent("s2".into()),
                BatchAction::ToggleStudent("s1".into()),
            ],
        );
        assert_eq!(plan.batches[0], ids(&["s2"]));
        assert!(plan.batches[1].is_empty());
    }

    #[test]
    fn shrink_keeps_head_batches() {
        let plan = run(
            BatchPlan::new(2),
            vec![
                BatchAction::ToggleStudent("student1".into()),
                BatchAction::SetBatchCount(1),
            ],
        );
        assert_eq!(plan.batch_count(), 1);
        assert_eq!(plan.batches[0], ids(&["student1"]));
        assert!(plan.batches.get(1).is_none());
    }

    #[test]
    fn shrink_then_regrow_clears_dropped_batches() {
        let plan = run(
            BatchPlan::new(2),
            vec![
                BatchAction::Next,
                BatchAction::ToggleStudent("s9".into()),
                BatchAction::SetBatchCount(1),
                BatchAction::SetBatchCount(2),
            ],
        );
        assert_eq!(plan.batch_count(), 2);
        assert!(plan.batches[1].is_empty());
        assert_eq!(plan.current, 0);
    }

    #[test]
    fn navigation_stays_in_bounds() {
        let plan = run(
            BatchPlan::new(3),
            vec![BatchAction::Previous, BatchAction::Next, BatchAction::Next, BatchAction::Next],
        );
        assert_eq!(plan.current, 2);

        let plan = apply_action(plan, BatchAction::SetCurrentBatch(7));
        assert_eq!(plan.current, 2);
        let plan = apply_action(plan, BatchAction::SetCurrentBatch(1));
        assert_eq!(plan.current, 1);
    }

    #[test]
    fn snapshot_names_are_one_based() {
        let plan = run(
            BatchPlan::new(2),
            vec![
                BatchAction::ToggleStudent("a".into()),
                BatchAction::Next,
                BatchAction::ToggleStudent("b".into()),
            ],
        );
        let snapshot = plan.snapshot();
        assert_eq!(snapshot[0].batch_name, "Batch-1");
        assert_eq!(snapshot[0].students, ids(&["a"]));
        assert_eq!(snapshot[1].batch_name, "Batch-2");
        assert_eq!(snapshot[1].students, ids(&["b"]));
        assert_eq!(BatchPlan::from_assignments(&snapshot).snapshot(), snapshot);
    }

    #[test]
    fn validate_reports_duplicates_and_unassigned() {
        let plan = run(
            BatchPlan::new(2),
            vec![
                BatchAction::ToggleStudent("a".into()),
                BatchAction::Next,
                BatchAction::ToggleStudent("a".into()),
                BatchAction::ToggleStudent("b".into()),
            ],
        );
        let warnings = validate(&plan, &ids(&["a", "b", "c"]));
        assert_eq!(
            warnings,
            vec![
                BatchWarning::Duplicated {
                    student_id: "a".into(),
                    batches: ids(&["Batch-1", "Batch-2"]),
                },
                BatchWarning::Unassigned {
                    student_id: "c".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn commit_hands_snapshot_to_sink() {
        let sink = MemorySink::default();
        let plan = apply_action(BatchPlan::new(2), BatchAction::ToggleStudent("a".into()));

        let report = commit(&plan, "lab-1", &ids(&["a", "b"]), &sink).await.unwrap();
        assert_eq!(report.batches.len(), 2);
        assert_eq!(report.warnings.len(), 1);

        let saved = sink.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "lab-1");
        assert_eq!(saved[0].1, report.batches);
    }

    #[tokio::test]
    async fn commit_propagates_sink_failure() {
        let sink = MemorySink {
            reject: true,
            ..Default::default()
        };
        let err = commit(&BatchPlan::new(1), "lab-1", &[], &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::SinkRejected { .. }));
        assert!(err.to_string().contains("lab-1"));
    }
}
