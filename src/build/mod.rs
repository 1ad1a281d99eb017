//! Build layer: typed containers <-> generic builder trees.
//!
//! It owns:
//! - Builder tree arena (groups, datasets, links, references)
//! - Container model and class declarations
//! - TypeMap (data type -> class -> mapper)
//! - ObjectMapper (one container <-> one builder subtree)
//! - BuildManager (whole-graph passes, identity caches)

pub mod builder;
pub mod container;
pub mod manager;
pub mod mapper;
pub mod type_map;

pub use builder::{Builder, BuilderTree, Data, NodeId, NodeKind};
pub use container::{
    Container, ContainerClass, ContainerInit, ContainerRef, Field, FieldDecl, FieldKind, ObjectId,
};
pub use manager::{BuildManager, RefSlot};
pub use mapper::{ObjectMapper, SpecElement};
pub use type_map::{MapperFactory, TypeMap};
