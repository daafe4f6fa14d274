//! Error types for the grading engine.
//!
//! Structural problems abort the computation for a course, entry issues only
//! demote a single leaf to pending, and configuration problems are caught when
//! the configuration is loaded.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// The grading tree of a course cannot be evaluated until this is fixed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    #[error("node {0} appears more than once")]
    DuplicateNode(Uuid),

    #[error("node {node} belongs to course {found}, expected {expected}")]
    ForeignNode {
        node: Uuid,
        expected: Uuid,
        found: Uuid,
    },

    #[error("node {node} references parent {parent}, which is not part of this course")]
    UnknownParent { node: Uuid, parent: Uuid },

    #[error("parent chain of node {0} forms a cycle")]
    Cycle(Uuid),

    #[error("leaf node {leaf} has child {child}")]
    LeafWithChildren { leaf: Uuid, child: Uuid },

    #[error("container node {node} must use input type 'none', found '{input_type}'")]
    ContainerInputType { node: Uuid, input_type: String },

    #[error("container node {0} carries a measurement")]
    MeasurementOnContainer(Uuid),

    #[error("node {node} has invalid weight {weight}")]
    InvalidWeight { node: Uuid, weight: f64 },
}

impl StructureError {
    /// The node the error should be reported against.
    pub fn node(&self) -> Uuid {
        match self {
            StructureError::DuplicateNode(id)
            | StructureError::Cycle(id)
            | StructureError::MeasurementOnContainer(id) => *id,
            StructureError::ForeignNode { node, .. }
            | StructureError::UnknownParent { node, .. }
            | StructureError::ContainerInputType { node, .. }
            | StructureError::InvalidWeight { node, .. } => *node,
            StructureError::LeafWithChildren { leaf, .. } => *leaf,
        }
    }
}

/// Attendance mask text that is not a hexadecimal number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid attendance mask '{0}'")]
pub struct ParseMaskError(pub(crate) String);

/// Why an entry could not be counted. The leaf stays pending.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryIssue {
    #[error("{0} is not a finite number")]
    NonFinite(&'static str),

    #[error("max points missing")]
    MissingMax,

    #[error("max points must be positive, got {0}")]
    NonPositiveMax(f64),

    #[error("session total missing")]
    MissingTotal,

    #[error("session total must be positive, got {0}")]
    NonPositiveTotal(i64),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("threshold must be within [0, 100], got {0}")]
    Threshold(f64),

    #[error("attendance quota must be within [0, 1], got {0}")]
    AttendanceQuota(f64),

    #[error("default completion ratio must be within [0, 1], got {0}")]
    CompletionRatio(f64),

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
