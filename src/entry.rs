//! Normalizes leaf measurements into achieved ratios.

use std::collections::HashMap;

use crate::error::{EntryIssue, StructureError};
use crate::models::{EntryStatus, EvalEntry, InputType};
use crate::tree::Forest;

/// A validated measurement, shaped by the leaf's input type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    Score { earned: f64, max: f64 },
    Rate { rate: f64 },
    Attendance { attended: i64, total: i64 },
}

impl Measurement {
    /// `Ok(None)` when the primary value has not been entered yet.
    pub fn from_entry(
        input_type: InputType,
        entry: &EvalEntry,
    ) -> Result<Option<Measurement>, EntryIssue> {
        let measurement = match input_type {
            InputType::Score | InputType::None => {
                let Some(earned) = entry.earned else {
                    return Ok(None);
                };
                finite("earned", earned)?;
                let max = entry.max.ok_or(EntryIssue::MissingMax)?;
                finite("max", max)?;
                if max <= 0.0 {
                    return Err(EntryIssue::NonPositiveMax(max));
                }
                Measurement::Score { earned, max }
            }
            InputType::Rate => {
                let Some(rate) = entry.rate else {
                    return Ok(None);
                };
                finite("rate", rate)?;
                Measurement::Rate { rate }
            }
            InputType::Attendance => {
                let Some(attended) = entry.attended else {
                    return Ok(None);
                };
                let total = entry.total.ok_or(EntryIssue::MissingTotal)?;
                if total <= 0 {
                    return Err(EntryIssue::NonPositiveTotal(total));
                }
                Measurement::Attendance { attended, total }
            }
        };
        finite("adjustment", entry.adjustment)?;
        Ok(Some(measurement))
    }

    /// Achieved fraction of the leaf's own maximum, adjustment applied in the
    /// raw domain first.
    pub fn ratio(&self, adjustment: f64) -> f64 {
        let raw = match *self {
            Measurement::Score { earned, max } => (earned + adjustment) / max,
            Measurement::Rate { rate } => (rate + adjustment) / 100.0,
            Measurement::Attendance { attended, total } => {
                (attended as f64 + adjustment) / total as f64
            }
        };
        raw.clamp(0.0, 1.0)
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), EntryIssue> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EntryIssue::NonFinite(field))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafOutcome {
    /// Present only for completed leaves.
    pub ratio: Option<f64>,
    pub issue: Option<EntryIssue>,
}

impl LeafOutcome {
    pub fn status(&self) -> EntryStatus {
        if self.ratio.is_some() {
            EntryStatus::Completed
        } else {
            EntryStatus::Pending
        }
    }

    pub fn is_completed(&self) -> bool {
        self.ratio.is_some()
    }
}

/// Per-leaf outcomes, indexed by forest position. Containers have none.
#[derive(Debug, Clone)]
pub struct Resolution {
    outcomes: Vec<Option<LeafOutcome>>,
}

impl Resolution {
    pub fn leaf(&self, position: usize) -> Option<&LeafOutcome> {
        self.outcomes.get(position).and_then(Option::as_ref)
    }

    pub fn completed_count(&self) -> usize {
        self.outcomes
            .iter()
            .flatten()
            .filter(|outcome| outcome.is_completed())
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.outcomes
            .iter()
            .flatten()
            .filter(|outcome| !outcome.is_completed())
            .count()
    }

    /// Leaves whose entry was rejected, in forest position order.
    pub fn issues(&self) -> impl Iterator<Item = (usize, &EntryIssue)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(position, outcome)| {
                outcome
                    .as_ref()
                    .and_then(|outcome| outcome.issue.as_ref())
                    .map(|issue| (position, issue))
            })
    }
}

pub fn resolve(forest: &Forest, entries: &[EvalEntry]) -> Result<Resolution, StructureError> {
    let mut by_position: HashMap<usize, &EvalEntry> = HashMap::new();
    for entry in entries {
        let Some(position) = forest.position(entry.node_id) else {
            tracing::warn!(node = %entry.node_id, "ignoring entry for unknown node");
            continue;
        };
        if !forest.get(position).node.is_leaf {
            return Err(StructureError::MeasurementOnContainer(entry.node_id));
        }
        if by_position.insert(position, entry).is_some() {
            tracing::warn!(node = %entry.node_id, "duplicate entry, keeping the latest");
        }
    }

    let mut outcomes = vec![None; forest.len()];
    for position in forest.leaves() {
        let node = &forest.get(position).node;
        let outcome = match by_position.get(&position) {
            None => LeafOutcome::default(),
            Some(entry) => match Measurement::from_entry(node.input_type, entry) {
                Ok(Some(measurement)) => LeafOutcome {
                    ratio: Some(measurement.ratio(entry.adjustment)),
                    issue: None,
                },
                Ok(None) => LeafOutcome::default(),
                Err(issue) => {
                    tracing::debug!(node = %node.id, %issue, "entry treated as pending");
                    LeafOutcome {
                        ratio: None,
                        issue: Some(issue),
                    }
                }
            },
        };
        outcomes[position] = Some(outcome);
    }

    Ok(Resolution { outcomes })
}
