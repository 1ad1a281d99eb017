//! Spec layer: schema nodes, type catalogs and namespaces.
//!
//! This module only describes expected shapes. It owns:
//! - Spec model (groups, datasets, attributes, links, quantities)
//! - SpecCatalog (type name -> inheritance-resolved spec)
//! - Namespace / NamespaceCatalog (versioned catalogs keyed by name)

pub mod catalog;
pub mod namespace;
pub mod types;

pub use catalog::SpecCatalog;
pub use namespace::{Namespace, NamespaceCatalog};
pub use types::{AttributeSpec, DatasetSpec, GroupSpec, LinkSpec, Quantity, TypeSpec};
