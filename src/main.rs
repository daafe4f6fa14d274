use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use pass_outlook::attendance::{AttendanceChange, AttendanceMask};
use pass_outlook::config::EngineConfig;
use pass_outlook::entry::Measurement;
use pass_outlook::error::StructureError;
use pass_outlook::models::{
    AttendanceRecord, Course, CourseSummary, EvalEntry, EvalNode, InputType, RankedCourse, Term,
};
use pass_outlook::risk::{self, CourseEvaluation};
use pass_outlook::{db, import, report};

#[derive(Parser)]
#[command(name = "pass-outlook")]
#[command(about = "Track whether each course is still on course to pass", long_about = None)]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SessionState {
    Present,
    Absent,
    Toggle,
}

impl From<SessionState> for AttendanceChange {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Present => AttendanceChange::Present,
            SessionState::Absent => AttendanceChange::Absent,
            SessionState::Toggle => AttendanceChange::Toggle,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample course
    Seed,
    /// Register a course
    AddCourse {
        #[arg(long)]
        name: String,
        #[arg(long)]
        year: i32,
        #[arg(long, default_value = "early")]
        term: Term,
        #[arg(long, default_value_t = 15)]
        total_classes: u32,
        #[arg(long)]
        required: bool,
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Import a criteria sheet (CSV) into a course
    Import {
        #[arg(long)]
        course: Uuid,
        #[arg(long)]
        csv: PathBuf,
        /// Drop the course's current criteria first
        #[arg(long)]
        replace: bool,
    },
    /// Add a criterion to a course
    AddNode {
        #[arg(long)]
        course: Uuid,
        #[arg(long)]
        parent: Option<Uuid>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        leaf: bool,
        /// score, rate or attendance for leaves
        #[arg(long)]
        input_type: Option<InputType>,
        #[arg(long, default_value_t = 0)]
        order: i32,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    /// Change a criterion
    #[command(group(
        ArgGroup::new("placement")
            .args(["parent", "root"])
            .multiple(false)
    ))]
    EditNode {
        #[arg(long)]
        node: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        parent: Option<Uuid>,
        /// Detach the node from its parent
        #[arg(long)]
        root: bool,
        #[arg(long)]
        order: Option<i32>,
        #[arg(long)]
        due: Option<NaiveDate>,
        #[arg(long, conflicts_with = "due")]
        clear_due: bool,
    },
    /// Delete a criterion with its subtree and entries
    RemoveNode {
        #[arg(long)]
        node: Uuid,
    },
    /// Record or replace the measurement for a leaf
    Record {
        #[arg(long)]
        node: Uuid,
        #[arg(long)]
        earned: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(long)]
        rate: Option<f64>,
        #[arg(long)]
        attended: Option<i64>,
        #[arg(long)]
        total: Option<i64>,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        adjustment: f64,
    },
    /// Remove the measurement for a leaf
    Clear {
        #[arg(long)]
        node: Uuid,
    },
    /// Mark a class session
    Attend {
        #[arg(long)]
        course: Uuid,
        #[arg(long)]
        session: u32,
        #[arg(long, value_enum, default_value_t = SessionState::Toggle)]
        state: SessionState,
    },
    /// Set or clear a course's own pass mark
    Threshold {
        #[arg(long)]
        course: Uuid,
        /// Omit to fall back to the configured threshold
        #[arg(long)]
        value: Option<f64>,
    },
    /// Show the outlook for one course
    Summary {
        #[arg(long)]
        course: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Rank all courses by how far they fall short
    Rank {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown report for one course
    Report {
        #[arg(long)]
        course: Uuid,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 14)]
        within_days: i64,
    },
    /// Evaluate a criteria sheet without a database
    #[command(group(
        ArgGroup::new("attendance")
            .args(["sessions", "mask"])
            .multiple(false)
    ))]
    Check {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value_t = 0)]
        total_classes: u32,
        /// Attended sessions, e.g. "1,2,4-9"
        #[arg(long)]
        sessions: Option<String>,
        /// Attendance mask in hex, bit 0 = session 1
        #[arg(long)]
        mask: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        json: bool,
        /// Print the full markdown report instead of the summary
        #[arg(long, conflicts_with = "json")]
        report: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pass_outlook=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(cli.config.as_deref())
        .context("invalid engine configuration")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let course_id = db::seed(&pool).await?;
            println!("Seed course ready: {course_id}");
        }
        Commands::AddCourse {
            name,
            year,
            term,
            total_classes,
            required,
            threshold,
        } => {
            let pool = connect().await?;
            let course = Course {
                id: Uuid::new_v4(),
                name,
                year,
                term,
                is_required: required,
                total_classes,
                attendance_mask: AttendanceMask::new(),
                threshold,
            };
            db::create_course(&pool, &course).await?;
            println!("Created course {} ({}).", course.name, course.id);
        }
        Commands::Import {
            course,
            csv,
            replace,
        } => {
            let pool = connect().await?;
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let sheet = import::parse_criteria(file, course)?;
            let written = db::import_criteria(&pool, course, &sheet, replace).await?;
            println!(
                "Imported {written} criteria and {} entries from {}.",
                sheet.entries.len(),
                csv.display()
            );
        }
        Commands::AddNode {
            course,
            parent,
            name,
            weight,
            leaf,
            input_type,
            order,
            due,
        } => {
            let pool = connect().await?;
            let node = EvalNode {
                id: Uuid::new_v4(),
                course_id: course,
                parent_id: parent,
                name,
                weight,
                is_leaf: leaf,
                input_type: input_type.unwrap_or(if leaf {
                    InputType::Score
                } else {
                    InputType::None
                }),
                order,
                due_date: due,
            };
            db::create_node(&pool, &node).await?;
            println!("Added {} ({}).", node.name, node.id);
        }
        Commands::EditNode {
            node,
            name,
            weight,
            parent,
            root,
            order,
            due,
            clear_due,
        } => {
            let pool = connect().await?;
            let mut current = db::fetch_node(&pool, node).await?;
            if let Some(name) = name {
                current.name = name;
            }
            if let Some(weight) = weight {
                current.weight = weight;
            }
            if root {
                current.parent_id = None;
            } else if parent.is_some() {
                current.parent_id = parent;
            }
            if let Some(order) = order {
                current.order = order;
            }
            if clear_due {
                current.due_date = None;
            } else if due.is_some() {
                current.due_date = due;
            }
            db::update_node(&pool, &current).await?;
            println!("Updated {} ({}).", current.name, current.id);
        }
        Commands::RemoveNode { node } => {
            let pool = connect().await?;
            let removed = db::delete_node(&pool, node).await?;
            println!("Removed {removed} criteria.");
        }
        Commands::Record {
            node,
            earned,
            max,
            rate,
            attended,
            total,
            adjustment,
        } => {
            let pool = connect().await?;
            let entry = EvalEntry {
                node_id: node,
                earned,
                max,
                rate,
                attended,
                total,
                adjustment,
            };
            let target = db::fetch_node(&pool, node).await?;
            db::upsert_entry(&pool, &entry).await?;
            match Measurement::from_entry(target.input_type, &entry) {
                Ok(Some(measurement)) => println!(
                    "Recorded {}: {:.1}%.",
                    target.name,
                    measurement.ratio(entry.adjustment) * 100.0
                ),
                Ok(None) => println!("Recorded {} as pending.", target.name),
                Err(issue) => println!("Recorded {}, counted as pending: {issue}.", target.name),
            }
        }
        Commands::Clear { node } => {
            let pool = connect().await?;
            if db::delete_entry(&pool, node).await? {
                println!("Entry cleared.");
            } else {
                println!("No entry recorded for this node.");
            }
        }
        Commands::Attend {
            course,
            session,
            state,
        } => {
            let pool = connect().await?;
            let attended = db::set_attendance(&pool, course, session, state.into()).await?;
            println!(
                "Session {session} marked {}.",
                if attended { "present" } else { "absent" }
            );
        }
        Commands::Threshold { course, value } => {
            let pool = connect().await?;
            db::set_threshold(&pool, course, value).await?;
            match value {
                Some(value) => println!("Pass mark set to {value:.1}."),
                None => println!("Pass mark reset to the configured {:.1}.", config.threshold),
            }
        }
        Commands::Summary { course, json } => {
            let pool = connect().await?;
            let course = db::fetch_course(&pool, course).await?;
            let evaluation = evaluate_stored(&pool, &course, &config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&evaluation.summary)?);
            } else {
                print_summary(&course.name, &evaluation);
            }
        }
        Commands::Rank { limit } => {
            let pool = connect().await?;
            let courses = db::fetch_courses(&pool).await?;
            if courses.is_empty() {
                println!("No courses tracked yet.");
                return Ok(());
            }

            let mut ranked = Vec::with_capacity(courses.len());
            for course in courses {
                match evaluate_stored(&pool, &course, &config).await {
                    Ok(evaluation) => ranked.push(RankedCourse {
                        course_id: course.id,
                        course_name: course.name,
                        is_required: course.is_required,
                        summary: evaluation.summary,
                    }),
                    Err(err) => tracing::warn!("skipping {}: {err:#}", course.name),
                }
            }
            let ranked = risk::rank_by_deficit(ranked);
            let shown: Vec<RankedCourse> = ranked.into_iter().take(limit).collect();
            print!("{}", report::build_dashboard(&shown));
        }
        Commands::Report {
            course,
            out,
            within_days,
        } => {
            let pool = connect().await?;
            let course = db::fetch_course(&pool, course).await?;
            let evaluation = evaluate_stored(&pool, &course, &config).await?;
            let report = report::build_report(&course, &evaluation, today(), within_days);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Check {
            csv,
            total_classes,
            sessions,
            mask,
            threshold,
            json,
            report: full_report,
        } => {
            let course_id = Uuid::new_v4();
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let sheet = import::parse_criteria(file, course_id)?;
            let attendance_mask = match (sessions, mask) {
                (Some(list), _) => AttendanceMask::from_sessions(parse_sessions(&list, total_classes)?),
                (None, Some(hex)) => hex.parse()?,
                (None, None) => AttendanceMask::new(),
            };
            let course = Course {
                id: course_id,
                name: csv
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "course".to_string()),
                year: today().year(),
                term: Term::FullYear,
                is_required: false,
                total_classes,
                attendance_mask,
                threshold,
            };
            let config = config.with_threshold_override(course.threshold)?;
            let evaluation = risk::evaluate_course(
                course.id,
                sheet.nodes,
                &sheet.entries,
                &course.attendance(),
                &config,
            )
            .map_err(|err| structural_problem(&csv.display().to_string(), err))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&evaluation.summary)?);
            } else if full_report {
                print!("{}", report::build_report(&course, &evaluation, today(), 14));
            } else {
                print_summary(&course.name, &evaluation);
            }
        }
    }

    Ok(())
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn evaluate_stored(
    pool: &PgPool,
    course: &Course,
    config: &EngineConfig,
) -> anyhow::Result<CourseEvaluation> {
    let nodes = db::fetch_nodes(pool, course.id).await?;
    let entries = db::fetch_entries(pool, course.id).await?;
    let config = config.with_threshold_override(course.threshold)?;
    let record: AttendanceRecord = course.attendance();

    risk::evaluate_course(course.id, nodes, &entries, &record, &config)
        .map_err(|err| structural_problem(&format!("course '{}'", course.name), err))
}

fn structural_problem(subject: &str, err: StructureError) -> anyhow::Error {
    let node = err.node();
    anyhow::Error::new(err).context(format!(
        "{subject} has a structural problem at node {node}"
    ))
}

/// Parses "1,2,4-9" into session numbers within `1..=total_classes`.
fn parse_sessions(list: &str, total_classes: u32) -> anyhow::Result<Vec<u32>> {
    let in_range = |session: u32| -> anyhow::Result<u32> {
        if session == 0 || session > total_classes {
            bail!("session {session} is outside 1..={total_classes}");
        }
        Ok(session)
    };

    let mut sessions = Vec::new();
    for part in list.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().context("invalid session range")?;
                let end: u32 = end.trim().parse().context("invalid session range")?;
                if start > end {
                    bail!("session range {start}-{end} is reversed");
                }
                sessions.extend(in_range(start)?..=in_range(end)?);
            }
            None => sessions.push(in_range(part.parse().context("invalid session number")?)?),
        }
    }
    Ok(sessions)
}

fn print_summary(name: &str, evaluation: &CourseEvaluation) {
    let summary: &CourseSummary = &evaluation.summary;
    println!("{name}: {}", report::outlook_label(evaluation));
    println!(
        "- scores: secured {:.2}, predicted {:.2}, best case {:.2} (pass mark {:.1})",
        summary.current_score, summary.predicted_score, summary.max_score, summary.threshold
    );
    if summary.deficit > 0.0 {
        println!("- short by {:.2} points", summary.deficit);
    }
    println!(
        "- attendance: {} sessions, {:.1}% (quota {:.1}%) {}",
        summary.current_attended,
        summary.attendance_rate,
        summary.attendance_threshold,
        if summary.is_attendance_safe {
            "safe"
        } else {
            "fail"
        }
    );
    println!(
        "- criteria: {} completed, {} pending",
        evaluation.resolution.completed_count(),
        evaluation.resolution.pending_count()
    );
}
