//! pass-outlook: tracks whether a student is on course to pass.
//!
//! A course's grading scheme is a weighted tree of criteria. The engine
//! (`tree`, `entry`, `aggregate`, `attendance`, `risk`) turns a snapshot of
//! that tree, the recorded measurements and the attendance record into a
//! [`models::CourseSummary`] without doing any I/O. `db`, `import` and
//! `report` are the collaborators the command-line tool wires around it.

pub mod aggregate;
pub mod attendance;
pub mod calendar;
pub mod config;
pub mod db;
pub mod entry;
pub mod error;
pub mod import;
pub mod models;
pub mod report;
pub mod risk;
pub mod tree;
