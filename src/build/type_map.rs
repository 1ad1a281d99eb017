//! Binds data types to container classes, and classes to object mappers.
//!
//! Lookups walk a class's lineage (most derived first), so a mapper or type
//! binding registered for a base class serves every class derived from it
//! unless a more derived class registers its own.

use crate::build::container::{Container, ContainerClass};
use crate::build::mapper::ObjectMapper;
use crate::error::{Error, Result};
use crate::spec::{NamespaceCatalog, TypeSpec};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Produces the mapper for a class from the resolved spec of its data type.
pub type MapperFactory = fn(Rc<TypeSpec>) -> Result<ObjectMapper>;

#[derive(Debug, Clone)]
struct ClassBinding {
    class: Rc<ContainerClass>,
    namespace: String,
    data_type: String,
}

pub struct TypeMap {
    namespaces: NamespaceCatalog,
    /// class name -> binding
    classes: BTreeMap<String, ClassBinding>,
    /// (namespace, data type) -> class name
    types: BTreeMap<(String, String), String>,
    mappers: BTreeMap<String, MapperFactory>,
}

impl TypeMap {
    pub fn new(namespaces: NamespaceCatalog) -> Self {
        Self {
            namespaces,
            classes: BTreeMap::new(),
            types: BTreeMap::new(),
            mappers: BTreeMap::new(),
        }
    }

    pub fn namespace_catalog(&self) -> &NamespaceCatalog {
        &self.namespaces
    }

    pub fn register_container_type(
        &mut self,
        namespace: &str,
        type_name: &str,
        class: Rc<ContainerClass>,
    ) -> Result<()> {
        // Fails early on unknown namespaces and types.
        self.namespaces.get_spec(namespace, type_name)?;

        let key = (namespace.to_string(), type_name.to_string());
        if let Some(prev) = self.types.get(&key) {
            log::warn!(
                "{}:{} was bound to class {}, rebinding to {}",
                namespace,
                type_name,
                prev,
                class.name()
            );
        }
        self.types.insert(key, class.name().to_string());
        self.classes.insert(
            class.name().to_string(),
            ClassBinding {
                class,
                namespace: namespace.to_string(),
                data_type: type_name.to_string(),
            },
        );
        Ok(())
    }

    pub fn register_map(&mut self, class_name: &str, factory: MapperFactory) {
        self.mappers.insert(class_name.to_string(), factory);
    }

    /// The class bound to a data type. Types without a registered class get a
    /// generic class whose lineage follows the spec hierarchy.
    pub fn get_class(&self, namespace: &str, type_name: &str) -> Result<Rc<ContainerClass>> {
        if let Some(class_name) = self.types.get(&(namespace.to_string(), type_name.to_string())) {
            if let Some(binding) = self.classes.get(class_name) {
                return Ok(binding.class.clone());
            }
        }

        let ns = self.namespaces.get_namespace(namespace)?;
        let lineage = ns.catalog.get_hierarchy(type_name).map_err(|e| match e {
            Error::UnknownType { type_name, .. } => Error::UnknownType {
                type_name,
                namespace: Some(namespace.to_string()),
            },
            other => other,
        })?;
        log::debug!("no class registered for {}:{}, using a generic one", namespace, type_name);
        Ok(Rc::new(ContainerClass::generic(lineage)))
    }

    /// `(namespace, data type)` a class maps to, via its lineage.
    pub fn data_type_of(&self, class: &ContainerClass) -> Result<(String, String)> {
        for name in class.lineage() {
            if let Some(binding) = self.classes.get(name) {
                return Ok((binding.namespace.clone(), binding.data_type.clone()));
            }
        }

        // Generic classes are named after their data type.
        let type_name = class.name();
        match self.namespaces.namespace_of(type_name) {
            Some(ns) => Ok((ns.to_string(), type_name.to_string())),
            None => Err(Error::unknown_type(type_name)),
        }
    }

    pub fn spec_for_class(&self, class: &ContainerClass) -> Result<Rc<TypeSpec>> {
        let (namespace, type_name) = self.data_type_of(class)?;
        self.namespaces.get_spec(&namespace, &type_name)
    }

    /// Mapper for a class: the most derived registered factory in its lineage,
    /// or the default structural mapper.
    pub fn mapper_for_class(&self, class: &ContainerClass) -> Result<ObjectMapper> {
        let spec = self.spec_for_class(class)?;
        match class.lineage().iter().find_map(|name| self.mappers.get(name)) {
            Some(factory) => factory(spec),
            None => ObjectMapper::new(spec),
        }
    }

    pub fn get_map(&self, container: &Container) -> Result<ObjectMapper> {
        self.mapper_for_class(container.class())
    }

    /// `true` if `type_name` is `base` or derives from it in `namespace`.
    pub fn is_sub_type(&self, namespace: &str, type_name: &str, base: &str) -> bool {
        self.namespaces
            .get_namespace(namespace)
            .map(|ns| ns.catalog.is_sub_type(type_name, base))
            .unwrap_or(false)
    }
}
