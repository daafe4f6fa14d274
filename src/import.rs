use std::collections::HashMap;
use std::io::Read;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::entry;
use crate::models::{EvalEntry, EvalNode, InputType};
use crate::tree::Forest;

#[derive(Debug, Clone)]
pub struct CriteriaImport {
    pub nodes: Vec<EvalNode>,
    pub entries: Vec<EvalEntry>,
}

/// Reads a criteria sheet into node and entry records for `course_id`.
///
/// Each row is one node; `key`/`parent_key` are labels local to the file and
/// get fresh ids. Measurement columns on leaf rows become that leaf's entry.
/// The resulting tree is validated before it is returned.
pub fn parse_criteria<R: Read>(reader: R, course_id: Uuid) -> anyhow::Result<CriteriaImport> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        key: String,
        #[serde(default)]
        parent_key: Option<String>,
        name: String,
        weight: f64,
        #[serde(default)]
        input_type: Option<InputType>,
        is_leaf: bool,
        #[serde(default)]
        order: Option<i32>,
        #[serde(default)]
        due_date: Option<NaiveDate>,
        #[serde(default)]
        earned: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        rate: Option<f64>,
        #[serde(default)]
        attended: Option<i64>,
        #[serde(default)]
        total: Option<i64>,
        #[serde(default)]
        adjustment: Option<f64>,
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut ids: HashMap<String, Uuid> = HashMap::new();
    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("invalid criteria row on line {line}"))?;
        if row.key.is_empty() {
            bail!("line {line}: key must not be empty");
        }
        if ids.insert(row.key.clone(), Uuid::new_v4()).is_some() {
            bail!("line {line}: duplicate key '{}'", row.key);
        }
        rows.push((line, row));
    }

    let mut nodes = Vec::with_capacity(rows.len());
    let mut entries = Vec::new();
    for (position, (line, row)) in rows.into_iter().enumerate() {
        let id = ids[&row.key];
        let parent_id = match row.parent_key.as_deref().filter(|key| !key.is_empty()) {
            None => None,
            Some(key) => Some(
                *ids.get(key)
                    .with_context(|| format!("line {line}: unknown parent key '{key}'"))?,
            ),
        };
        let input_type = row.input_type.unwrap_or(if row.is_leaf {
            InputType::Score
        } else {
            InputType::None
        });

        let entry = EvalEntry {
            node_id: id,
            earned: row.earned,
            max: row.max,
            rate: row.rate,
            attended: row.attended,
            total: row.total,
            adjustment: row.adjustment.unwrap_or(0.0),
        };
        if entry.has_measurement() {
            entries.push(entry);
        }

        nodes.push(EvalNode {
            id,
            course_id,
            parent_id,
            name: row.name,
            weight: row.weight,
            is_leaf: row.is_leaf,
            input_type,
            order: row.order.unwrap_or(position as i32),
            due_date: row.due_date,
        });
    }

    let forest = Forest::assemble(course_id, nodes.clone()).context("criteria tree is invalid")?;
    entry::resolve(&forest, &entries).context("criteria entries are invalid")?;

    tracing::info!(
        course = %course_id,
        nodes = nodes.len(),
        entries = entries.len(),
        "parsed criteria sheet"
    );

    Ok(CriteriaImport { nodes, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
key,parent_key,name,weight,input_type,is_leaf,order,due_date,earned,max,rate,attended,total,adjustment
total,,Total,100,none,false,0,,,,,,,
exams,total,Exams,60,,false,1,,,,,,,
mid,exams,Midterm,50,score,true,1,2026-06-01,42,50,,,,2
final,exams,Final,50,score,true,2,2026-07-20,,,,,,
hw,total,Homework,30,rate,true,2,,,,85,,,
att,total,Attendance,10,attendance,true,3,,,,,12,15,
";

    #[test]
    fn parses_tree_and_entries() {
        let course = Uuid::new_v4();
        let import = parse_criteria(SHEET.as_bytes(), course).expect("valid sheet");
        assert_eq!(import.nodes.len(), 6);
        assert_eq!(import.entries.len(), 3);

        let mid = import
            .nodes
            .iter()
            .find(|n| n.name == "Midterm")
            .expect("midterm row");
        let exams = import
            .nodes
            .iter()
            .find(|n| n.name == "Exams")
            .expect("exams row");
        assert_eq!(mid.parent_id, Some(exams.id));
        assert_eq!(mid.due_date, NaiveDate::from_ymd_opt(2026, 6, 1));
        assert_eq!(exams.input_type, InputType::None);

        let mid_entry = import
            .entries
            .iter()
            .find(|e| e.node_id == mid.id)
            .expect("midterm entry");
        assert_eq!(mid_entry.earned, Some(42.0));
        assert_eq!(mid_entry.adjustment, 2.0);
        assert!(import.nodes.iter().all(|n| n.course_id == course));
    }

    #[test]
    fn leaf_without_type_defaults_to_score() {
        let sheet = "key,name,weight,is_leaf\nq,Quiz,100,true\n";
        let import = parse_criteria(sheet.as_bytes(), Uuid::new_v4()).expect("valid sheet");
        assert_eq!(import.nodes[0].input_type, InputType::Score);
        assert!(import.entries.is_empty());
    }

    #[test]
    fn rejects_unknown_parent_key() {
        let sheet = "key,parent_key,name,weight,is_leaf\nq,missing,Quiz,100,true\n";
        let err = parse_criteria(sheet.as_bytes(), Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("unknown parent key 'missing'"));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let sheet = "key,name,weight,is_leaf\nq,Quiz,50,true\nq,Quiz again,50,true\n";
        let err = parse_criteria(sheet.as_bytes(), Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("duplicate key 'q'"));
    }

    #[test]
    fn rejects_structurally_invalid_tree() {
        let sheet = "key,parent_key,name,weight,is_leaf\nq,,Quiz,50,true\nsub,q,Part,50,true\n";
        let err = parse_criteria(sheet.as_bytes(), Uuid::new_v4()).unwrap_err();
        assert!(err.to_string().contains("criteria tree is invalid"));
    }
}
