use uuid::Uuid;

use crate::aggregate::{self, Aggregation, ScoreBounds};
use crate::attendance::{self, AttendanceStatus};
use crate::config::EngineConfig;
use crate::entry::{self, Resolution};
use crate::error::StructureError;
use crate::models::{AttendanceRecord, CourseSummary, EvalEntry, EvalNode, RankedCourse};
use crate::tree::Forest;

/// Everything computed for one course snapshot. The summary is the contract
/// consumers rely on; the rest feeds the detailed report.
#[derive(Debug, Clone)]
pub struct CourseEvaluation {
    pub forest: Forest,
    pub resolution: Resolution,
    pub aggregation: Aggregation,
    pub attendance: AttendanceStatus,
    pub summary: CourseSummary,
}

/// Evaluate one course. Pure: the same snapshot always gives the same result.
pub fn evaluate_course(
    course_id: Uuid,
    nodes: Vec<EvalNode>,
    entries: &[EvalEntry],
    record: &AttendanceRecord,
    config: &EngineConfig,
) -> Result<CourseEvaluation, StructureError> {
    let forest = Forest::assemble(course_id, nodes)?;
    let resolution = entry::resolve(&forest, entries)?;
    let aggregation = aggregate::aggregate(&forest, &resolution, config);
    let attendance = attendance::evaluate(record, config.attendance_quota);
    let summary = assemble_summary(&aggregation.bounds, &attendance, config.threshold);

    Ok(CourseEvaluation {
        forest,
        resolution,
        aggregation,
        attendance,
        summary,
    })
}

pub fn assemble_summary(
    bounds: &ScoreBounds,
    attendance: &AttendanceStatus,
    threshold: f64,
) -> CourseSummary {
    let is_certain_fail = bounds.max_score < threshold;
    CourseSummary {
        current_score: bounds.current_score,
        predicted_score: bounds.predicted_score,
        max_score: bounds.max_score,
        deficit: (threshold - bounds.predicted_score).max(0.0),
        is_fail_predicted: bounds.predicted_score < threshold,
        is_certain_fail,
        is_course_failed: is_certain_fail || attendance.is_attendance_fail,
        attendance_rate: attendance.attendance_rate,
        current_attended: attendance.current_attended,
        attendance_threshold: attendance.attendance_threshold,
        is_attendance_fail: attendance.is_attendance_fail,
        is_attendance_safe: attendance.is_attendance_safe,
        threshold,
    }
}

/// Highest deficit first, then by course name.
pub fn rank_by_deficit(mut courses: Vec<RankedCourse>) -> Vec<RankedCourse> {
    courses.sort_by(|a, b| {
        b.summary
            .deficit
            .partial_cmp(&a.summary.deficit)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.course_name.cmp(&b.course_name))
    });
    courses
}
