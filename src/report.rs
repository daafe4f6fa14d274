use std::fmt::Write;

use chrono::NaiveDate;

use crate::calendar;
use crate::entry::Resolution;
use crate::models::{Course, EntryStatus, InputType, InputTypeSummary, RankedCourse};
use crate::risk::CourseEvaluation;
use crate::tree::Forest;

pub fn summarize_by_input_type(forest: &Forest, resolution: &Resolution) -> Vec<InputTypeSummary> {
    let mut map: std::collections::HashMap<InputType, (usize, usize)> =
        std::collections::HashMap::new();

    for position in forest.leaves() {
        let input_type = forest.get(position).node.input_type;
        let entry = map.entry(input_type).or_insert((0, 0));
        match resolution.leaf(position).map(|outcome| outcome.status()) {
            Some(EntryStatus::Completed) => entry.0 += 1,
            _ => entry.1 += 1,
        }
    }

    let mut summaries: Vec<InputTypeSummary> = map
        .into_iter()
        .map(|(input_type, (completed, pending))| InputTypeSummary {
            input_type,
            completed,
            pending,
        })
        .collect();

    summaries.sort_by(|a, b| {
        (b.completed + b.pending)
            .cmp(&(a.completed + a.pending))
            .then_with(|| a.input_type.as_str().cmp(b.input_type.as_str()))
    });
    summaries
}

pub fn outlook_label(evaluation: &CourseEvaluation) -> &'static str {
    let summary = &evaluation.summary;
    if summary.is_certain_fail {
        "certain fail"
    } else if summary.is_attendance_fail {
        "attendance fail"
    } else if summary.is_fail_predicted {
        "at risk"
    } else {
        "on track"
    }
}

pub fn build_report(
    course: &Course,
    evaluation: &CourseEvaluation,
    today: NaiveDate,
    within_days: i64,
) -> String {
    let summary = &evaluation.summary;
    let forest = &evaluation.forest;
    let resolution = &evaluation.resolution;
    let mut output = String::new();

    let _ = writeln!(output, "# {} ({} {})", course.name, course.year, course.term.as_str());
    let _ = writeln!(
        output,
        "Generated on {}, outlook: **{}**",
        today,
        outlook_label(evaluation)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Score Outlook");
    let _ = writeln!(output, "- Secured: {:.2}", summary.current_score);
    let _ = writeln!(
        output,
        "- Predicted: {:.2} (pending work estimated at {:.0}%)",
        summary.predicted_score,
        evaluation.aggregation.estimated_completion_ratio * 100.0
    );
    let _ = writeln!(output, "- Best case: {:.2}", summary.max_score);
    let _ = writeln!(output, "- Pass mark: {:.2}", summary.threshold);
    if summary.deficit > 0.0 {
        let _ = writeln!(output, "- Short by: {:.2}", summary.deficit);
    }
    if summary.is_certain_fail {
        let _ = writeln!(
            output,
            "- Even full marks on every pending item stay below the pass mark."
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance");
    let attendance = &evaluation.attendance;
    if attendance.total_classes == 0 {
        let _ = writeln!(output, "No sessions configured for this course.");
    } else {
        let _ = writeln!(
            output,
            "- Attended {} of {} sessions ({:.1}%, quota {:.1}%)",
            attendance.current_attended,
            attendance.total_classes,
            attendance.attendance_rate,
            attendance.attendance_threshold
        );
        let _ = writeln!(
            output,
            "- Status: {}",
            if attendance.is_attendance_safe {
                "safe"
            } else {
                "fail"
            }
        );
        if attendance.is_attendance_fail {
            let _ = writeln!(
                output,
                "- {} attended sessions are needed to meet the quota",
                attendance.sessions_required
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Criteria");
    if forest.is_empty() {
        let _ = writeln!(output, "No criteria defined yet.");
    } else {
        for &position in forest.preorder() {
            let node = forest.get(position);
            let total = evaluation.aggregation.node_total(position);
            let indent = "  ".repeat(node.depth);
            let status = match resolution.leaf(position) {
                Some(outcome) => match outcome.ratio {
                    Some(ratio) => format!(" [{:.0}%]", ratio * 100.0),
                    None => " [pending]".to_string(),
                },
                None => String::new(),
            };
            let _ = writeln!(
                output,
                "{}- {} ({:.1} pts): secured {:.2} / predicted {:.2} / best {:.2}{}",
                indent,
                node.node.name,
                node.effective_weight,
                total.secured,
                total.expected,
                total.best_case,
                status
            );
        }
    }

    let mix = summarize_by_input_type(forest, resolution);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Measurement Mix");
    if mix.is_empty() {
        let _ = writeln!(output, "No measurable criteria yet.");
    } else {
        for item in mix.iter() {
            let _ = writeln!(
                output,
                "- {}: {} completed, {} pending",
                item.input_type, item.completed, item.pending
            );
        }
    }

    let issues: Vec<_> = resolution.issues().collect();
    if !issues.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Entries Needing Attention");
        for (position, issue) in issues {
            let _ = writeln!(output, "- {}: {}", forest.get(position).node.name, issue);
        }
    }

    let deadlines = calendar::upcoming_deadlines(forest, resolution, today, within_days);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Upcoming Deadlines");
    if deadlines.is_empty() {
        let _ = writeln!(output, "Nothing due in the next {} days.", within_days.max(0));
    } else {
        for deadline in deadlines.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) due {} in {} days{}",
                deadline.name,
                deadline.input_type,
                deadline.due_date,
                deadline.days_left,
                if deadline.status == EntryStatus::Completed {
                    ", done"
                } else {
                    ""
                }
            );
        }
    }

    output
}

pub fn build_dashboard(courses: &[RankedCourse]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Course Dashboard");
    if courses.is_empty() {
        let _ = writeln!(output, "No courses tracked yet.");
        return output;
    }
    for course in courses {
        let summary = &course.summary;
        let mut flags = Vec::new();
        if course.is_required {
            flags.push("required");
        }
        if summary.is_certain_fail {
            flags.push("certain fail");
        } else if summary.is_fail_predicted {
            flags.push("at risk");
        }
        if summary.is_attendance_fail {
            flags.push("attendance fail");
        }
        let _ = writeln!(
            output,
            "- {}: predicted {:.1}, best {:.1}, short {:.1}{}",
            course.course_name,
            summary.predicted_score,
            summary.max_score,
            summary.deficit,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            }
        );
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::AttendanceMask;
    use crate::config::EngineConfig;
    use crate::import::parse_criteria;
    use crate::models::Term;
    use crate::risk::{evaluate_course, rank_by_deficit};
    use uuid::Uuid;

    fn course(total_classes: u32, attended: u32) -> Course {
        Course {
            id: Uuid::new_v4(),
            name: "Linear Algebra".to_string(),
            year: 2026,
            term: Term::Early,
            is_required: true,
            total_classes,
            attendance_mask: AttendanceMask::from_sessions(1..=attended),
            threshold: None,
        }
    }

    fn evaluate(course: &Course, sheet: &str) -> CourseEvaluation {
        let import = parse_criteria(sheet.as_bytes(), course.id).expect("valid sheet");
        evaluate_course(
            course.id,
            import.nodes,
            &import.entries,
            &course.attendance(),
            &EngineConfig::default(),
        )
        .expect("valid course")
    }

    const SHEET: &str = "\
key,parent_key,name,weight,input_type,is_leaf,due_date,earned,max
total,,Total,100,none,false,,,
mid,total,Midterm,60,score,true,2026-06-01,15,30
final,total,Final,40,score,true,2026-06-10,,
";

    #[test]
    fn report_covers_every_section() {
        let course = course(15, 9);
        let evaluation = evaluate(&course, SHEET);
        let today = NaiveDate::from_ymd_opt(2026, 5, 30).unwrap();
        let report = build_report(&course, &evaluation, today, 14);

        assert!(report.contains("# Linear Algebra (2026 early)"));
        assert!(report.contains("- Secured: 30.00"));
        assert!(report.contains("- Predicted: 50.00"));
        assert!(report.contains("- Best case: 70.00"));
        assert!(report.contains("- Short by: 10.00"));
        assert!(report.contains("Attended 9 of 15 sessions (60.0%"));
        assert!(report.contains("10 attended sessions are needed"));
        assert!(report.contains("  - Midterm (60.0 pts)"));
        assert!(report.contains("- score: 1 completed, 1 pending"));
        assert!(report.contains("- Midterm (score) due 2026-06-01 in 2 days, done"));
        assert!(report.contains("- Final (score) due 2026-06-10 in 11 days"));
        assert_eq!(outlook_label(&evaluation), "attendance fail");
    }

    #[test]
    fn report_lists_entry_issues() {
        let course = course(0, 0);
        let sheet = "key,name,weight,is_leaf,earned,max\nq,Quiz,100,true,5,0\n";
        let evaluation = evaluate(&course, sheet);
        let report = build_report(&course, &evaluation, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(), 7);
        assert!(report.contains("## Entries Needing Attention"));
        assert!(report.contains("- Quiz: max points must be positive, got 0"));
        assert!(report.contains("No sessions configured for this course."));
        assert!(report.contains("Nothing due in the next 7 days."));
    }

    #[test]
    fn dashboard_flags_risky_courses() {
        let course = course(15, 9);
        let evaluation = evaluate(&course, SHEET);
        let ranked = rank_by_deficit(vec![RankedCourse {
            course_id: course.id,
            course_name: course.name.clone(),
            is_required: course.is_required,
            summary: evaluation.summary,
        }]);
        let dashboard = build_dashboard(&ranked);
        assert!(dashboard.contains(
            "- Linear Algebra: predicted 50.0, best 70.0, short 10.0 [required, at risk, attendance fail]"
        ));
        assert!(build_dashboard(&[]).contains("No courses tracked yet."));
    }
}
