//! Error taxonomy for catalog, build, construct, sidecar and store operations.
//!
//! Every variant names the type, object id or path involved so a failure can
//! be traced back to the offending element without re-running the pass.

use std::path::PathBuf;

use thiserror::Error;

use crate::sidecar::SidecarValidationError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown data type '{type_name}'{}", namespace.as_ref().map(|n| format!(" in namespace '{n}'")).unwrap_or_default())]
    UnknownType {
        type_name: String,
        namespace: Option<String>,
    },

    #[error("data type '{type_name}' is already registered (from source '{source_name}')")]
    DuplicateType {
        type_name: String,
        source_name: String,
    },

    #[error("namespace '{0}' is already registered")]
    DuplicateNamespace(String),

    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("spec from '{source_name}' has no data_type_def and cannot be registered")]
    AnonymousSpec { source_name: String },

    #[error("data type '{type_name}' cannot extend '{base}': group/dataset kind differs")]
    SpecKindMismatch { type_name: String, base: String },

    #[error("inheritance cycle through data types: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),

    #[error("spec for '{type_name}' has no element at '{path}'")]
    UnknownSpecElement { type_name: String, path: String },

    #[error("{type_name} {object_id}: missing required field '{field}' ({reason})")]
    MissingRequiredField {
        type_name: String,
        object_id: String,
        field: String,
        reason: String,
    },

    #[error("{type_name}: field '{field}' expects {expected}, got {got}")]
    FieldTypeMismatch {
        type_name: String,
        field: String,
        expected: String,
        got: String,
    },

    #[error("{path}: shape {actual:?} does not satisfy {expected:?}")]
    ShapeMismatch {
        path: String,
        expected: Vec<Option<usize>>,
        actual: Vec<usize>,
    },

    #[error("{path}: cannot coerce {value} to dtype {dtype}")]
    DtypeMismatch {
        path: String,
        dtype: String,
        value: String,
    },

    #[error("{path}: expected {expected} occurrence(s), found {found}")]
    QuantityMismatch {
        path: String,
        expected: String,
        found: usize,
    },

    #[error("circular build: {type_name} {object_id} is contained in itself")]
    CircularBuild {
        type_name: String,
        object_id: String,
    },

    #[error("{path}: referenced object {object_id} is not part of the built tree")]
    DanglingReference { path: String, object_id: String },

    #[error("{path}: link target {target} cannot be resolved")]
    DanglingLink { path: String, target: String },

    #[error("{path}: a child named '{name}' already exists")]
    DuplicateChild { path: String, name: String },

    #[error("{path}: only groups can hold child nodes")]
    NotAGroup { path: String },

    #[error("{path}: builder has no data type and cannot be constructed")]
    UntypedBuilder { path: String },

    #[error("stored document is corrupt at '{path}': {reason}")]
    CorruptStore { path: String, reason: String },

    #[error("sorted data is decreasing at index {index}")]
    UnsortedData { index: usize },

    #[error("linspace step must be positive and finite, got {step}")]
    InvalidStep { step: f64 },

    #[error(transparent)]
    SidecarValidation(#[from] SidecarValidationError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn unknown_type(type_name: impl Into<String>) -> Self {
        Error::UnknownType {
            type_name: type_name.into(),
            namespace: None,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
