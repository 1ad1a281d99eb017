//! Sidecar changelogs and the read-time overlay that applies them.

pub mod doc;
pub mod patch;

pub use doc::{ChangeRecord, Sidecar, SidecarProblem, SidecarValidationError, Version};
pub use patch::{Overlay, apply_sidecar};
