use pass_outlook::attendance::AttendanceMask;
use pass_outlook::config::{EngineConfig, EstimationPolicy};
use pass_outlook::error::StructureError;
use pass_outlook::models::{AttendanceRecord, CourseSummary, EvalEntry, EvalNode, InputType};
use pass_outlook::risk::evaluate_course;
use uuid::Uuid;

struct Course {
    id: Uuid,
    nodes: Vec<EvalNode>,
    entries: Vec<EvalEntry>,
}

impl Course {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            nodes: Vec::new(),
            entries: Vec::new(),
        }
    }

    fn add(&mut self, parent: Option<Uuid>, name: &str, weight: f64, is_leaf: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.nodes.push(EvalNode {
            id,
            course_id: self.id,
            parent_id: parent,
            name: name.to_string(),
            weight,
            is_leaf,
            input_type: if is_leaf {
                InputType::Score
            } else {
                InputType::None
            },
            order: self.nodes.len() as i32,
            due_date: None,
        });
        id
    }

    fn score(&mut self, node: Uuid, earned: f64, max: f64) {
        self.entries.push(EvalEntry {
            earned: Some(earned),
            max: Some(max),
            ..EvalEntry::new(node)
        });
    }

    fn summary(&self, record: &AttendanceRecord, config: &EngineConfig) -> CourseSummary {
        evaluate_course(self.id, self.nodes.clone(), &self.entries, record, config)
            .expect("well-formed course")
            .summary
    }

    fn scores(&self) -> CourseSummary {
        self.summary(&no_sessions(), &EngineConfig::default())
    }
}

fn no_sessions() -> AttendanceRecord {
    AttendanceRecord {
        mask: AttendanceMask::new(),
        total_classes: 0,
    }
}

fn close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-9
}

/// Midterm 60 and final 40 under one container.
fn two_exam_course() -> (Course, Uuid, Uuid) {
    let mut course = Course::new();
    let total = course.add(None, "Total", 100.0, false);
    let midterm = course.add(Some(total), "Midterm", 60.0, true);
    let final_exam = course.add(Some(total), "Final", 40.0, true);
    (course, midterm, final_exam)
}

#[test]
fn single_graded_leaf_is_fully_secured() {
    let mut course = Course::new();
    let exam = course.add(None, "Exam", 100.0, true);
    course.score(exam, 80.0, 100.0);

    let summary = course.scores();
    assert!(close(summary.current_score, 80.0));
    assert!(close(summary.predicted_score, 80.0));
    assert!(close(summary.max_score, 80.0));
    assert!(!summary.is_fail_predicted);
    assert_eq!(summary.deficit, 0.0);
}

#[test]
fn full_marks_so_far_predict_full_marks() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 30.0, 30.0);

    let summary = course.scores();
    assert!(close(summary.current_score, 60.0));
    assert!(close(summary.max_score, 100.0));
    assert!(close(summary.predicted_score, 100.0));
}

#[test]
fn half_marks_so_far_predict_half_of_the_rest() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 15.0, 30.0);

    let summary = course.scores();
    assert!(close(summary.current_score, 30.0));
    assert!(close(summary.max_score, 70.0));
    assert!(close(summary.predicted_score, 50.0));
    assert!(summary.is_fail_predicted);
    assert!(!summary.is_certain_fail);
    assert!(close(summary.deficit, 10.0));
}

#[test]
fn constant_policy_ignores_history() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 15.0, 30.0);
    let config = EngineConfig {
        estimation: EstimationPolicy::Constant,
        default_completion_ratio: 0.75,
        ..EngineConfig::default()
    };

    let summary = course.summary(&no_sessions(), &config);
    assert!(close(summary.predicted_score, 30.0 + 40.0 * 0.75));
}

#[test]
fn nine_of_fifteen_sessions_fail_attendance() {
    let course = Course::new();
    let record = AttendanceRecord {
        mask: AttendanceMask::from_sessions(1..=9),
        total_classes: 15,
    };

    let summary = course.summary(&record, &EngineConfig::default());
    assert!(close(summary.attendance_rate, 60.0));
    assert_eq!(summary.current_attended, 9);
    assert!(!summary.is_attendance_safe);
    assert!(summary.is_attendance_fail);
    assert!(summary.is_course_failed);
}

#[test]
fn unreachable_pass_mark_is_certain_fail() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 9.0, 30.0);

    let summary = course.scores();
    assert!(close(summary.max_score, 58.0));
    assert!(summary.is_certain_fail);
    assert!(summary.is_fail_predicted);
    assert!(summary.is_course_failed);
}

#[test]
fn per_course_threshold_changes_the_verdict() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 15.0, 30.0);
    let config = EngineConfig::default()
        .with_threshold_override(Some(50.0))
        .expect("valid threshold");

    let summary = course.summary(&no_sessions(), &config);
    assert!(!summary.is_fail_predicted);
    assert_eq!(summary.deficit, 0.0);
    assert_eq!(summary.threshold, 50.0);
}

#[test]
fn scores_stay_ordered_as_leaves_complete() {
    let mut course = Course::new();
    let coursework = course.add(None, "Coursework", 40.0, false);
    let exams = course.add(None, "Exams", 60.0, false);
    let quizzes = course.add(Some(coursework), "Quizzes", 50.0, false);
    let leaves = [
        course.add(Some(quizzes), "Quiz 1", 50.0, true),
        course.add(Some(quizzes), "Quiz 2", 50.0, true),
        course.add(Some(coursework), "Project", 50.0, true),
        course.add(Some(exams), "Midterm", 40.0, true),
        course.add(Some(exams), "Final", 60.0, true),
    ];
    let marks = [(7.0, 10.0), (10.0, 10.0), (0.0, 20.0), (44.0, 50.0), (30.0, 100.0)];

    let mut previous = course.scores();
    assert_eq!(previous.current_score, 0.0);
    assert!(close(previous.max_score, 100.0));

    for (leaf, (earned, max)) in leaves.into_iter().zip(marks) {
        let effective = course
            .nodes
            .iter()
            .find(|node| node.id == leaf)
            .map(|node| effective_weight(&course.nodes, node))
            .expect("leaf exists");
        course.score(leaf, earned, max);
        let summary = course.scores();
        let ratio = earned / max;

        assert!(0.0 <= summary.current_score);
        assert!(summary.current_score <= summary.predicted_score + 1e-9);
        assert!(summary.predicted_score <= summary.max_score + 1e-9);
        assert!(summary.max_score <= 100.0 + 1e-9);
        assert!(close(
            summary.current_score - previous.current_score,
            ratio * effective
        ));
        assert!(close(
            previous.max_score - summary.max_score,
            (1.0 - ratio) * effective
        ));
        if summary.is_certain_fail {
            assert!(summary.is_fail_predicted);
        }
        previous = summary;
    }
    assert!(close(previous.current_score, previous.max_score));
}

fn effective_weight(nodes: &[EvalNode], node: &EvalNode) -> f64 {
    let mut weight = node.weight;
    let mut parent = node.parent_id;
    while let Some(id) = parent {
        let ancestor = nodes.iter().find(|n| n.id == id).expect("parent exists");
        weight = weight / 100.0 * ancestor.weight;
        parent = ancestor.parent_id;
    }
    weight
}

#[test]
fn same_snapshot_gives_same_summary() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 21.0, 30.0);
    let record = AttendanceRecord {
        mask: AttendanceMask::from_sessions([1, 2, 5, 8]),
        total_classes: 10,
    };

    let first = course.summary(&record, &EngineConfig::default());
    let second = course.summary(&record, &EngineConfig::default());
    assert_eq!(first, second);
}

#[test]
fn attendance_and_scores_do_not_interact() {
    let (mut course, midterm, _) = two_exam_course();
    course.score(midterm, 21.0, 30.0);
    let mut mask = AttendanceMask::from_sessions(1..=12);
    let before = course.summary(
        &AttendanceRecord {
            mask: mask.clone(),
            total_classes: 15,
        },
        &EngineConfig::default(),
    );
    mask.toggle(3);
    mask.toggle(14);
    let after = course.summary(
        &AttendanceRecord {
            mask,
            total_classes: 15,
        },
        &EngineConfig::default(),
    );

    assert_eq!(before.current_score, after.current_score);
    assert_eq!(before.predicted_score, after.predicted_score);
    assert_eq!(before.max_score, after.max_score);
    assert_eq!(before.current_attended, after.current_attended);

    let mut regraded = Course {
        id: course.id,
        nodes: course.nodes.clone(),
        entries: Vec::new(),
    };
    regraded.score(midterm, 3.0, 30.0);
    let record = AttendanceRecord {
        mask: AttendanceMask::from_sessions(1..=12),
        total_classes: 15,
    };
    let baseline = course.summary(&record, &EngineConfig::default());
    let changed = regraded.summary(&record, &EngineConfig::default());
    assert_eq!(baseline.attendance_rate, changed.attendance_rate);
    assert_eq!(baseline.is_attendance_safe, changed.is_attendance_safe);
}

#[test]
fn empty_course_has_nothing_to_secure() {
    let summary = Course::new().scores();
    assert_eq!(summary.current_score, 0.0);
    assert_eq!(summary.predicted_score, 0.0);
    assert_eq!(summary.max_score, 0.0);
    assert!(summary.is_attendance_safe);
}

#[test]
fn cyclic_tree_is_rejected() {
    let mut course = Course::new();
    let a = course.add(None, "A", 50.0, false);
    let b = course.add(Some(a), "B", 50.0, false);
    course.nodes[0].parent_id = Some(b);

    let err = evaluate_course(
        course.id,
        course.nodes.clone(),
        &[],
        &no_sessions(),
        &EngineConfig::default(),
    )
    .expect_err("cycle must fail");
    assert!(matches!(err, StructureError::Cycle(_)));
}
