use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attendance::AttendanceMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Score,
    Rate,
    Attendance,
    None,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Score => "score",
            InputType::Rate => "rate",
            InputType::Attendance => "attendance",
            InputType::None => "none",
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" => Ok(InputType::Score),
            "rate" => Ok(InputType::Rate),
            "attendance" => Ok(InputType::Attendance),
            "none" | "" => Ok(InputType::None),
            other => Err(format!("unknown input type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    Early,
    Late,
    FullYear,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::Early => "early",
            Term::Late => "late",
            Term::FullYear => "full_year",
        }
    }
}

impl FromStr for Term {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "early" => Ok(Term::Early),
            "late" => Ok(Term::Late),
            "full_year" | "full-year" => Ok(Term::FullYear),
            other => Err(format!("unknown term '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub name: String,
    pub year: i32,
    pub term: Term,
    pub is_required: bool,
    pub total_classes: u32,
    pub attendance_mask: AttendanceMask,
    /// Per-course pass mark; falls back to the configured threshold.
    pub threshold: Option<f64>,
}

impl Course {
    pub fn attendance(&self) -> AttendanceRecord {
        AttendanceRecord {
            mask: self.attendance_mask.clone(),
            total_classes: self.total_classes,
        }
    }
}

/// A criterion in a course's grading scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalNode {
    pub id: Uuid,
    pub course_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    /// Share of the parent's weight, in percentage points.
    pub weight: f64,
    pub is_leaf: bool,
    pub input_type: InputType,
    pub order: i32,
    pub due_date: Option<NaiveDate>,
}

/// Raw measurement record for a leaf, as the store holds it. Which fields
/// matter depends on the node's input type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalEntry {
    pub node_id: Uuid,
    pub earned: Option<f64>,
    pub max: Option<f64>,
    pub rate: Option<f64>,
    pub attended: Option<i64>,
    pub total: Option<i64>,
    #[serde(default)]
    pub adjustment: f64,
}

impl EvalEntry {
    pub fn new(node_id: Uuid) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }

    pub fn has_measurement(&self) -> bool {
        self.earned.is_some()
            || self.max.is_some()
            || self.rate.is_some()
            || self.attended.is_some()
            || self.total.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub mask: AttendanceMask,
    pub total_classes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseSummary {
    pub current_score: f64,
    pub predicted_score: f64,
    pub max_score: f64,
    pub deficit: f64,
    pub is_fail_predicted: bool,
    pub is_certain_fail: bool,
    pub is_course_failed: bool,
    pub attendance_rate: f64,
    pub current_attended: u32,
    pub attendance_threshold: f64,
    pub is_attendance_fail: bool,
    pub is_attendance_safe: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub struct RankedCourse {
    pub course_id: Uuid,
    pub course_name: String,
    pub is_required: bool,
    pub summary: CourseSummary,
}

#[derive(Debug, Clone)]
pub struct InputTypeSummary {
    pub input_type: InputType,
    pub completed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deadline {
    pub node_id: Uuid,
    pub name: String,
    pub input_type: InputType,
    pub due_date: NaiveDate,
    pub days_left: i64,
    pub status: EntryStatus,
}
