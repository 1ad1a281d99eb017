//! Sidecar document model.
//!
//! Input JSON shape:
//!
//! {
//!   "schema_version": "0.1.0",
//!   "versions": [
//!     {
//!       "label": "2.0.0",
//!       "description": "...",
//!       "datetime": "2020-10-29T19:15:15.789Z",
//!       "agent": "...",
//!       "changes": [
//!         { "object_id": "...", "relative_path": "my_data/attr2", "value": null },
//!         { "object_id": "...", "relative_path": "my_data", "value": [4, 5], "dtype": "int32" }
//!       ]
//!     }
//!   ]
//! }
//!
//! `value` is required; `value: null` deletes the addressed attribute.

use crate::error::{Error, Result};
use crate::value::Dtype;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default)]
    pub schema_version: String,
    #[serde(default)]
    pub versions: Vec<Version>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub datetime: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub changes: Vec<ChangeRecord>,
}

fn present<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<serde_json::Value>, D::Error> {
    serde_json::Value::deserialize(d).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub object_id: String,
    pub relative_path: String,
    /// `None` when the key is absent, `Some(Null)` for an explicit `null`.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl ChangeRecord {
    pub fn is_delete(&self) -> bool {
        self.value.as_ref().is_some_and(serde_json::Value::is_null)
    }

    pub fn parsed_dtype(&self) -> std::result::Result<Option<Dtype>, String> {
        self.dtype.as_deref().map(str::parse).transpose()
    }
}

impl Version {
    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.datetime).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidecarProblem {
    #[error("sidecar has no versions")]
    NoVersions,
    #[error("object_id is empty")]
    EmptyObjectId,
    #[error("change has no value (use null to delete)")]
    MissingValue,
    #[error("datetime '{0}' is not ISO-8601")]
    BadDatetime(String),
    #[error("{0}")]
    UnknownDtype(String),
    #[error("no object with this id in the container")]
    UnknownObject,
    #[error("path does not resolve to a dataset or attribute")]
    UnresolvedPath,
    #[error("{0}")]
    BadValue(String),
}

/// A sidecar that failed structural or referential validation, with the
/// version/change it failed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarValidationError {
    pub version: Option<usize>,
    pub label: Option<String>,
    pub change: Option<usize>,
    pub object_id: Option<String>,
    pub relative_path: Option<String>,
    pub problem: SidecarProblem,
}

impl SidecarValidationError {
    pub fn new(problem: SidecarProblem) -> Self {
        Self {
            version: None,
            label: None,
            change: None,
            object_id: None,
            relative_path: None,
            problem,
        }
    }

    /// Attach the position of `change` within `version`.
    pub fn at(mut self, vi: usize, version: &Version, ci: usize, change: &ChangeRecord) -> Self {
        self.version = Some(vi);
        self.label = Some(version.label.clone());
        self.change = Some(ci);
        self.object_id = Some(change.object_id.clone());
        self.relative_path = Some(change.relative_path.clone());
        self
    }
}

impl fmt::Display for SidecarValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "sidecar validation failed")?;
        if let Some(vi) = self.version {
            write!(f, " at version {vi}")?;
            if let Some(label) = &self.label {
                write!(f, " ({label})")?;
            }
        }
        if let Some(ci) = self.change {
            write!(f, ", change {ci}")?;
        }
        if let Some(id) = &self.object_id {
            write!(f, ", object {id}")?;
        }
        if let Some(path) = &self.relative_path {
            write!(f, ", path '{path}'")?;
        }
        write!(f, ": {}", self.problem)
    }
}

impl std::error::Error for SidecarValidationError {}

impl Sidecar {
    /// Parse and structurally validate a sidecar document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let sidecar: Sidecar = serde_json::from_str(text)?;
        sidecar.validate()?;
        Ok(sidecar)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&text)
    }

    /// Structural checks only; object ids and paths are checked on apply.
    pub fn validate(&self) -> std::result::Result<(), SidecarValidationError> {
        if self.versions.is_empty() {
            return Err(SidecarValidationError::new(SidecarProblem::NoVersions));
        }

        for (vi, version) in self.versions.iter().enumerate() {
            if version.timestamp().is_none() {
                let mut err =
                    SidecarValidationError::new(SidecarProblem::BadDatetime(version.datetime.clone()));
                err.version = Some(vi);
                err.label = Some(version.label.clone());
                return Err(err);
            }

            for (ci, change) in version.changes.iter().enumerate() {
                if change.object_id.trim().is_empty() {
                    return Err(SidecarValidationError::new(SidecarProblem::EmptyObjectId)
                        .at(vi, version, ci, change));
                }
                if change.value.is_none() {
                    return Err(SidecarValidationError::new(SidecarProblem::MissingValue)
                        .at(vi, version, ci, change));
                }
                if let Err(msg) = change.parsed_dtype() {
                    return Err(SidecarValidationError::new(SidecarProblem::UnknownDtype(msg))
                        .at(vi, version, ci, change));
                }
            }
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
