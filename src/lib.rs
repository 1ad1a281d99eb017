//! Schema-driven persistence for hierarchical, typed data.
//!
//! Typed containers are converted to a backend-agnostic builder tree by a
//! `BuildManager`, driven by specs resolved through a `NamespaceCatalog`, and
//! back. Stored trees can be corrected at read time with a sidecar changelog.

pub mod array;
pub mod build;
pub mod error;
pub mod sidecar;
pub mod spec;
pub mod store;
pub mod value;

pub use array::{LinSpace, Selection, SortedArray, SortedIndex};
pub use build::{
    BuildManager, BuilderTree, Container, ContainerClass, ContainerRef, Field, FieldKind, ObjectId,
    ObjectMapper, TypeMap,
};
pub use error::{Error, Result};
pub use sidecar::{Overlay, Sidecar, SidecarValidationError};
pub use spec::{Namespace, NamespaceCatalog, SpecCatalog};
pub use store::{Backend, FileStore, MemoryStore};
pub use value::{Dtype, Value};
