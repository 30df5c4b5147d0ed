use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    #[default]
    #[serde(other)]
    Unknown,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Present" => Self::Present,
            "Absent" => Self::Absent,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sessions: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEvent {
    #[serde(default)]
    pub subject: Option<SubjectRef>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub date: Option<NaiveDate>,
    pub status: AttendanceStatus,
}

// Accepts `2024-03-03` as well as datetimes such as `2024-03-03T09:00:00Z`.
pub fn parse_event_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    raw.get(..10)
        .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(Value::as_str).and_then(parse_event_date))
}

fn lenient_status<'de, D>(deserializer: D) -> Result<AttendanceStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .map(AttendanceStatus::parse)
        .unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectTally {
    pub subject_id: String,
    pub subject_name: String,
    pub sessions_defined: u32,
    pub present_count: u32,
    pub absent_count: u32,
    pub events: Vec<TallyEntry>,
}

impl SubjectTally {
    pub fn total_events(&self) -> usize {
        self.events.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[default]
    Regular,
    DayToDay,
}

impl Origin {
    pub fn label(self) -> &'static str {
        match self {
            Origin::Regular => "Regular",
            Origin::DayToDay => "DayToDay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roll_num: String,
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedBatch {
    pub batch_name: String,
    pub students: Vec<String>,
}
