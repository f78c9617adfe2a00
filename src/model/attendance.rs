use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Late,
}

/// One stored attendance row, joined with the student and class names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    #[schema(example = "A12")]
    pub id: String,
    #[schema(example = "S1")]
    pub student_id: String,
    #[schema(example = "Ada Lovelace")]
    pub student_name: String,
    #[schema(example = "C1")]
    pub class_id: String,
    #[schema(example = "Grade 5 - A")]
    pub class_name: String,
    #[schema(example = "2024-03-01", format = "date", value_type = String)]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[schema(example = "arrived with a note from home", nullable = true)]
    pub note: Option<String>,
}

/// The (class, date) slot a batch replaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    pub class_id: String,
    pub date: NaiveDate,
}

/// A validated batch entry, ready for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub note: Option<String>,
}

/// `POST /attendance` body. Fields are kept loose so that validation errors
/// come from the service with a readable message instead of a serde failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttendance {
    #[serde(default, deserialize_with = "id_string")]
    #[schema(example = "C1", value_type = String)]
    pub class_id: String,
    #[serde(default)]
    #[schema(example = "2024-03-01", format = "date")]
    pub date: String,
    #[serde(default)]
    pub records: Vec<RecordInput>,
}

/// Longest note a record may carry, matching the `attendance.note` column.
pub const MAX_NOTE_LEN: usize = 255;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    #[serde(default, deserialize_with = "id_string")]
    #[schema(example = "S1", value_type = String)]
    pub student_id: String,
    #[serde(default)]
    #[schema(example = "present")]
    pub status: String,
    #[serde(default)]
    #[schema(max_length = 255)]
    pub note: Option<String>,
}

/// Identifiers arrive as strings from the local mode and as numbers from the
/// MySQL backend.
pub fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or numeric identifier, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceFilter {
    pub class_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub student_id: Option<String>,
}

impl AttendanceFilter {
    pub fn matches(&self, class_id: &str, date: NaiveDate, student_id: &str) -> bool {
        self.class_id.as_deref().is_none_or(|c| c == class_id)
            && self.date.is_none_or(|d| d == date)
            && self.student_id.as_deref().is_none_or(|s| s == student_id)
    }
}

/// Inclusive on both ends; either bound may be open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryFilter {
    pub class_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SummaryFilter {
    pub fn matches(&self, class_id: &str, date: NaiveDate) -> bool {
        self.class_id.as_deref().is_none_or(|c| c == class_id)
            && self.start_date.is_none_or(|start| date >= start)
            && self.end_date.is_none_or(|end| date <= end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusCount {
    pub status: AttendanceStatus,
    #[schema(example = 12)]
    pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub present: u64,
    pub absent: u64,
    pub late: u64,
    pub total_records: u64,
    /// `round(present / total * 100)`, 0 for an empty set
    pub attendance_percentage: u64,
}

impl AttendanceSummary {
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        let mut summary = AttendanceSummary::default();
        for c in counts {
            match c.status {
                AttendanceStatus::Present => summary.present += c.count,
                AttendanceStatus::Absent => summary.absent += c.count,
                AttendanceStatus::Late => summary.late += c.count,
            }
        }
        summary.total_records = summary.present + summary.absent + summary.late;
        summary.attendance_percentage = percentage(summary.present, summary.total_records);
        summary
    }

    /// Per-status counts in display order, zero-filled.
    pub fn counts(&self) -> Vec<StatusCount> {
        AttendanceStatus::iter()
            .map(|status| StatusCount {
                status,
                count: match status {
                    AttendanceStatus::Present => self.present,
                    AttendanceStatus::Absent => self.absent,
                    AttendanceStatus::Late => self.late,
                },
            })
            .collect()
    }
}

// half rounds up
fn percentage(part: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    (part * 100 + total / 2) / total
}
