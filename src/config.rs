//! Engine configuration: pass mark, attendance quota and estimation policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How pending leaves are estimated when predicting the final score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationPolicy {
    /// Pending work is assumed to go as well as completed work has so far,
    /// falling back to `default_completion_ratio` before anything is graded.
    #[default]
    History,
    /// Pending work always scores `default_completion_ratio`.
    Constant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Pass mark in course points.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Minimum fraction of sessions that must be attended.
    #[serde(default = "default_attendance_quota", alias = "attendanceQuota")]
    pub attendance_quota: f64,
    #[serde(
        default = "default_completion_ratio",
        alias = "defaultCompletionRatio"
    )]
    pub default_completion_ratio: f64,
    #[serde(default)]
    pub estimation: EstimationPolicy,
}

fn default_threshold() -> f64 {
    60.0
}
fn default_attendance_quota() -> f64 {
    2.0 / 3.0
}
fn default_completion_ratio() -> f64 {
    1.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            attendance_quota: default_attendance_quota(),
            default_completion_ratio: default_completion_ratio(),
            estimation: EstimationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::debug!(?config, "loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(self.threshold)?;
        if !in_unit_range(self.attendance_quota) {
            return Err(ConfigError::AttendanceQuota(self.attendance_quota));
        }
        if !in_unit_range(self.default_completion_ratio) {
            return Err(ConfigError::CompletionRatio(self.default_completion_ratio));
        }
        Ok(())
    }

    /// Copy of this configuration with a course's own pass mark applied.
    pub fn with_threshold_override(&self, threshold: Option<f64>) -> Result<Self, ConfigError> {
        let mut config = self.clone();
        if let Some(value) = threshold {
            validate_threshold(value)?;
            config.threshold = value;
        }
        Ok(config)
    }
}

pub fn validate_threshold(value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Threshold(value))
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}
