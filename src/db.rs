use std::collections::HashSet;

use anyhow::{bail, Context};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::attendance::{AttendanceChange, AttendanceMask};
use crate::config;
use crate::import::{self, CriteriaImport};
use crate::models::{Course, EvalEntry, EvalNode, InputType, Term};
use crate::tree::Forest;

const SEED_COURSE_ID: &str = "6b0f3c1e-2f4d-4c7a-9a51-7c2d8e4f1a90";

const SEED_SHEET: &str = "\
key,parent_key,name,weight,input_type,is_leaf,order,due_date,earned,max,rate,attended,total,adjustment
total,,Total,100,none,false,0,,,,,,,
exams,total,Exams,60,none,false,1,,,,,,,
midterm,exams,Midterm exam,40,score,true,1,2026-06-02,52,80,,,,
final,exams,Final exam,60,score,true,2,2026-07-28,,,,,,
homework,total,Homework,30,rate,true,2,2026-07-14,,,78,,,
labs,total,Lab participation,10,attendance,true,3,,,,,6,7,
";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<Uuid> {
    let course = Course {
        id: Uuid::parse_str(SEED_COURSE_ID)?,
        name: "Linear Algebra".to_string(),
        year: 2026,
        term: Term::Early,
        is_required: true,
        total_classes: 15,
        attendance_mask: AttendanceMask::from_sessions([1, 2, 3, 5, 6, 7, 8]),
        threshold: None,
    };

    sqlx::query(
        r#"
        INSERT INTO pass_outlook.courses
        (id, name, year, term, is_required, total_classes, attendance_mask)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(course.id)
    .bind(&course.name)
    .bind(course.year)
    .bind(course.term.as_str())
    .bind(course.is_required)
    .bind(course.total_classes as i32)
    .bind(course.attendance_mask.to_string())
    .execute(pool)
    .await?;

    if fetch_nodes(pool, course.id).await?.is_empty() {
        let sheet = import::parse_criteria(SEED_SHEET.as_bytes(), course.id)?;
        import_criteria(pool, course.id, &sheet, false).await?;
    }

    Ok(course.id)
}

pub async fn create_course(pool: &PgPool, course: &Course) -> anyhow::Result<()> {
    if let Some(threshold) = course.threshold {
        config::validate_threshold(threshold)?;
    }
    let total_classes = i32::try_from(course.total_classes).context("too many classes")?;

    sqlx::query(
        r#"
        INSERT INTO pass_outlook.courses
        (id, name, year, term, is_required, total_classes, attendance_mask, threshold)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(course.id)
    .bind(&course.name)
    .bind(course.year)
    .bind(course.term.as_str())
    .bind(course.is_required)
    .bind(total_classes)
    .bind(course.attendance_mask.to_string())
    .bind(course.threshold)
    .execute(pool)
    .await?;

    tracing::info!(course = %course.id, name = %course.name, "created course");
    Ok(())
}

fn course_from_row(row: &PgRow) -> anyhow::Result<Course> {
    let term: String = row.try_get("term")?;
    let mask: String = row.try_get("attendance_mask")?;
    let total_classes: i32 = row.try_get("total_classes")?;
    Ok(Course {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        year: row.try_get("year")?,
        term: term.parse().map_err(anyhow::Error::msg)?,
        is_required: row.try_get("is_required")?,
        total_classes: u32::try_from(total_classes).context("negative class count")?,
        attendance_mask: mask.parse()?,
        threshold: row.try_get("threshold")?,
    })
}

pub async fn fetch_course(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Course> {
    let row = sqlx::query(
        "SELECT id, name, year, term, is_required, total_classes, attendance_mask, threshold \
         FROM pass_outlook.courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await?
    .with_context(|| format!("course {course_id} not found"))?;

    course_from_row(&row)
}

pub async fn fetch_courses(pool: &PgPool) -> anyhow::Result<Vec<Course>> {
    let rows = sqlx::query(
        "SELECT id, name, year, term, is_required, total_classes, attendance_mask, threshold \
         FROM pass_outlook.courses ORDER BY year DESC, name",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(course_from_row).collect()
}

pub async fn fetch_nodes(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Vec<EvalNode>> {
    let rows = sqlx::query(
        "SELECT id, course_id, parent_id, name, weight, is_leaf, input_type, sort_order, due_date \
         FROM pass_outlook.eval_nodes WHERE course_id = $1 ORDER BY sort_order, name",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let mut nodes = Vec::with_capacity(rows.len());
    for row in rows {
        let input_type: String = row.try_get("input_type")?;
        nodes.push(EvalNode {
            id: row.try_get("id")?,
            course_id: row.try_get("course_id")?,
            parent_id: row.try_get("parent_id")?,
            name: row.try_get("name")?,
            weight: row.try_get("weight")?,
            is_leaf: row.try_get("is_leaf")?,
            input_type: input_type.parse().map_err(anyhow::Error::msg)?,
            order: row.try_get("sort_order")?,
            due_date: row.try_get("due_date")?,
        });
    }

    Ok(nodes)
}

pub async fn fetch_node(pool: &PgPool, node_id: Uuid) -> anyhow::Result<EvalNode> {
    let course_id: Uuid =
        sqlx::query_scalar("SELECT course_id FROM pass_outlook.eval_nodes WHERE id = $1")
            .bind(node_id)
            .fetch_optional(pool)
            .await?
            .with_context(|| format!("node {node_id} not found"))?;

    fetch_nodes(pool, course_id)
        .await?
        .into_iter()
        .find(|node| node.id == node_id)
        .with_context(|| format!("node {node_id} not found"))
}

pub async fn fetch_entries(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Vec<EvalEntry>> {
    let rows = sqlx::query(
        "SELECT e.node_id, e.earned, e.max_points, e.rate, e.attended, e.total, e.adjustment \
         FROM pass_outlook.eval_entries e \
         JOIN pass_outlook.eval_nodes n ON n.id = e.node_id \
         WHERE n.course_id = $1",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        entries.push(EvalEntry {
            node_id: row.try_get("node_id")?,
            earned: row.try_get("earned")?,
            max: row.try_get("max_points")?,
            rate: row.try_get("rate")?,
            attended: row.try_get("attended")?,
            total: row.try_get("total")?,
            adjustment: row.try_get("adjustment")?,
        });
    }

    Ok(entries)
}

/// Checks a node's own fields against the authoring rules the store keeps.
pub fn validate_node(node: &EvalNode) -> anyhow::Result<()> {
    if node.name.trim().is_empty() {
        bail!("node name must not be empty");
    }
    if !node.weight.is_finite() || !(0.0..=100.0).contains(&node.weight) {
        bail!("weight must be within [0, 100], got {}", node.weight);
    }
    match (node.is_leaf, node.input_type) {
        (true, InputType::None) => {
            bail!("leaf '{}' needs an input type of score, rate or attendance", node.name)
        }
        (false, input_type) if input_type != InputType::None => {
            bail!("container '{}' cannot take {input_type} input", node.name)
        }
        _ => Ok(()),
    }
}

/// Takes the per-course write lock. Every structural mutation goes through
/// this first so readers never see a half-applied change.
async fn lock_course(tx: &mut Transaction<'_, Postgres>, course_id: Uuid) -> anyhow::Result<()> {
    let locked: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM pass_outlook.courses WHERE id = $1 FOR UPDATE")
            .bind(course_id)
            .fetch_optional(&mut **tx)
            .await?;
    if locked.is_none() {
        bail!("course {course_id} not found");
    }
    Ok(())
}

/// Locks the course owning `node_id` and returns (course id, is_leaf) as seen
/// under the lock.
async fn lock_node_course(
    tx: &mut Transaction<'_, Postgres>,
    node_id: Uuid,
) -> anyhow::Result<(Uuid, bool)> {
    let course_id: Uuid =
        sqlx::query_scalar("SELECT course_id FROM pass_outlook.eval_nodes WHERE id = $1")
            .bind(node_id)
            .fetch_optional(&mut **tx)
            .await?
            .with_context(|| format!("node {node_id} not found"))?;
    lock_course(tx, course_id).await?;

    let is_leaf: bool =
        sqlx::query_scalar("SELECT is_leaf FROM pass_outlook.eval_nodes WHERE id = $1")
            .bind(node_id)
            .fetch_optional(&mut **tx)
            .await?
            .with_context(|| format!("node {node_id} was removed concurrently"))?;
    Ok((course_id, is_leaf))
}

async fn check_parent(tx: &mut Transaction<'_, Postgres>, node: &EvalNode) -> anyhow::Result<()> {
    let Some(parent_id) = node.parent_id else {
        return Ok(());
    };

    let row = sqlx::query("SELECT course_id, is_leaf FROM pass_outlook.eval_nodes WHERE id = $1")
        .bind(parent_id)
        .fetch_optional(&mut **tx)
        .await?
        .with_context(|| format!("parent node {parent_id} does not exist"))?;
    let parent_course: Uuid = row.try_get("course_id")?;
    if parent_course != node.course_id {
        bail!("parent node {parent_id} belongs to another course");
    }
    let parent_is_leaf: bool = row.try_get("is_leaf")?;
    if parent_is_leaf {
        bail!("parent node {parent_id} is a leaf and cannot have children");
    }

    let mut seen = HashSet::new();
    let mut current = Some(parent_id);
    while let Some(ancestor) = current {
        if ancestor == node.id {
            bail!("placing node {} under {parent_id} would create a cycle", node.id);
        }
        if !seen.insert(ancestor) {
            bail!("existing parent chain above {parent_id} is cyclic");
        }
        current = sqlx::query_scalar("SELECT parent_id FROM pass_outlook.eval_nodes WHERE id = $1")
            .bind(ancestor)
            .fetch_one(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn insert_node(tx: &mut Transaction<'_, Postgres>, node: &EvalNode) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pass_outlook.eval_nodes
        (id, course_id, parent_id, name, weight, is_leaf, input_type, sort_order, due_date)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(node.id)
    .bind(node.course_id)
    .bind(node.parent_id)
    .bind(&node.name)
    .bind(node.weight)
    .bind(node.is_leaf)
    .bind(node.input_type.as_str())
    .bind(node.order)
    .bind(node.due_date)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn write_entry(tx: &mut Transaction<'_, Postgres>, entry: &EvalEntry) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pass_outlook.eval_entries
        (node_id, earned, max_points, rate, attended, total, adjustment)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (node_id) DO UPDATE
        SET earned = EXCLUDED.earned,
            max_points = EXCLUDED.max_points,
            rate = EXCLUDED.rate,
            attended = EXCLUDED.attended,
            total = EXCLUDED.total,
            adjustment = EXCLUDED.adjustment,
            updated_at = now()
        "#,
    )
    .bind(entry.node_id)
    .bind(entry.earned)
    .bind(entry.max)
    .bind(entry.rate)
    .bind(entry.attended)
    .bind(entry.total)
    .bind(entry.adjustment)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn create_node(pool: &PgPool, node: &EvalNode) -> anyhow::Result<()> {
    validate_node(node)?;

    let mut tx = pool.begin().await?;
    lock_course(&mut tx, node.course_id).await?;
    check_parent(&mut tx, node).await?;
    insert_node(&mut tx, node).await?;
    tx.commit().await?;

    tracing::info!(node = %node.id, course = %node.course_id, "created node");
    Ok(())
}

/// Replaces a node's editable fields. The node may move to another parent
/// within its course but never to another course.
pub async fn update_node(pool: &PgPool, node: &EvalNode) -> anyhow::Result<()> {
    validate_node(node)?;

    let mut tx = pool.begin().await?;
    let (course_id, _) = lock_node_course(&mut tx, node.id).await?;
    if course_id != node.course_id {
        bail!("node {} cannot move to another course", node.id);
    }
    check_parent(&mut tx, node).await?;

    if node.is_leaf {
        let has_children: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pass_outlook.eval_nodes WHERE parent_id = $1)",
        )
        .bind(node.id)
        .fetch_one(&mut *tx)
        .await?;
        if has_children {
            bail!("node {} has children and cannot become a leaf", node.id);
        }
    } else {
        let has_entry: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pass_outlook.eval_entries WHERE node_id = $1)",
        )
        .bind(node.id)
        .fetch_one(&mut *tx)
        .await?;
        if has_entry {
            bail!("node {} has a recorded entry; clear it before making it a container", node.id);
        }
    }

    sqlx::query(
        r#"
        UPDATE pass_outlook.eval_nodes
        SET parent_id = $2, name = $3, weight = $4, is_leaf = $5,
            input_type = $6, sort_order = $7, due_date = $8
        WHERE id = $1
        "#,
    )
    .bind(node.id)
    .bind(node.parent_id)
    .bind(&node.name)
    .bind(node.weight)
    .bind(node.is_leaf)
    .bind(node.input_type.as_str())
    .bind(node.order)
    .bind(node.due_date)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(node = %node.id, "updated node");
    Ok(())
}

/// Removes a node, its subtree and their entries. Returns the number of
/// nodes removed.
pub async fn delete_node(pool: &PgPool, node_id: Uuid) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let (course_id, _) = lock_node_course(&mut tx, node_id).await?;

    let removed: i64 = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree AS (
            SELECT id FROM pass_outlook.eval_nodes WHERE id = $1
            UNION ALL
            SELECT n.id FROM pass_outlook.eval_nodes n JOIN subtree s ON n.parent_id = s.id
        )
        SELECT COUNT(*) FROM subtree
        "#,
    )
    .bind(node_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM pass_outlook.eval_nodes WHERE id = $1")
        .bind(node_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(node = %node_id, course = %course_id, removed, "deleted node");
    Ok(removed as u64)
}

pub async fn upsert_entry(pool: &PgPool, entry: &EvalEntry) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let (_, is_leaf) = lock_node_course(&mut tx, entry.node_id).await?;
    if !is_leaf {
        bail!("entries can only be recorded on leaf nodes");
    }
    write_entry(&mut tx, entry).await?;
    tx.commit().await?;

    tracing::info!(node = %entry.node_id, "recorded entry");
    Ok(())
}

pub async fn delete_entry(pool: &PgPool, node_id: Uuid) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    lock_node_course(&mut tx, node_id).await?;
    let result = sqlx::query("DELETE FROM pass_outlook.eval_entries WHERE node_id = $1")
        .bind(node_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// Applies `change` to one session and returns whether it is now attended.
pub async fn set_attendance(
    pool: &PgPool,
    course_id: Uuid,
    session: u32,
    change: AttendanceChange,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "SELECT attendance_mask, total_classes FROM pass_outlook.courses WHERE id = $1 FOR UPDATE",
    )
    .bind(course_id)
    .fetch_optional(&mut *tx)
    .await?
    .with_context(|| format!("course {course_id} not found"))?;

    let total_classes: i32 = row.try_get("total_classes")?;
    if session == 0 || i64::from(session) > i64::from(total_classes) {
        bail!("session {session} is outside 1..={total_classes}");
    }
    let mask_text: String = row.try_get("attendance_mask")?;
    let mut mask: AttendanceMask = mask_text.parse()?;
    let attended = change.apply(&mut mask, session);

    sqlx::query(
        "UPDATE pass_outlook.courses SET attendance_mask = $2, updated_at = now() WHERE id = $1",
    )
    .bind(course_id)
    .bind(mask.to_string())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(course = %course_id, session, attended, "updated attendance");
    Ok(attended)
}

pub async fn set_threshold(
    pool: &PgPool,
    course_id: Uuid,
    threshold: Option<f64>,
) -> anyhow::Result<()> {
    if let Some(value) = threshold {
        config::validate_threshold(value)?;
    }
    let mut tx = pool.begin().await?;
    lock_course(&mut tx, course_id).await?;

    sqlx::query(
        "UPDATE pass_outlook.courses SET threshold = $2, updated_at = now() WHERE id = $1",
    )
    .bind(course_id)
    .bind(threshold)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(course = %course_id, ?threshold, "updated pass mark");
    Ok(())
}

/// Writes a parsed criteria sheet into a course. Without `replace` the course
/// must not have criteria yet. Returns the number of nodes written.
pub async fn import_criteria(
    pool: &PgPool,
    course_id: Uuid,
    sheet: &CriteriaImport,
    replace: bool,
) -> anyhow::Result<usize> {
    for node in &sheet.nodes {
        validate_node(node)?;
    }
    let forest = Forest::assemble(course_id, sheet.nodes.clone())?;

    let mut tx = pool.begin().await?;
    lock_course(&mut tx, course_id).await?;

    if replace {
        sqlx::query("DELETE FROM pass_outlook.eval_nodes WHERE course_id = $1")
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
    } else {
        let existing: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM pass_outlook.eval_nodes WHERE course_id = $1)",
        )
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;
        if existing {
            bail!("course {course_id} already has criteria; pass --replace to overwrite");
        }
    }

    // Parents are written before their children to satisfy the foreign key.
    for &position in forest.preorder() {
        insert_node(&mut tx, &forest.get(position).node).await?;
    }
    for entry in &sheet.entries {
        write_entry(&mut tx, entry).await?;
    }
    tx.commit().await?;

    tracing::info!(
        course = %course_id,
        nodes = sheet.nodes.len(),
        entries = sheet.entries.len(),
        "imported criteria"
    );
    Ok(sheet.nodes.len())
}
