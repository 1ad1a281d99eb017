//! Namespaces: named, versioned spec catalogs.
//!
//! JSON shape accepted by `Namespace::from_json_str`:
//! {
//!   "name": "test_core",
//!   "version": "0.1.0",
//!   "doc": "...",
//!   "schema": [
//!     { "source": "test.yaml", "specs": [ { "group": { ... } } ] }
//!   ]
//! }

use crate::error::{Error, Result};
use crate::spec::catalog::SpecCatalog;
use crate::spec::types::TypeSpec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub version: String,
    pub doc: String,
    pub catalog: SpecCatalog,
}

#[derive(Debug, Deserialize)]
struct NamespaceDoc {
    name: String,
    version: String,
    #[serde(default)]
    doc: String,
    #[serde(default)]
    schema: Vec<SchemaSource>,
}

#[derive(Debug, Deserialize)]
struct SchemaSource {
    source: String,
    #[serde(default)]
    specs: Vec<TypeSpec>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, version: impl Into<String>, catalog: SpecCatalog) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            doc: String::new(),
            catalog,
        }
    }

    /// Parse a namespace document with inline specs.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let doc: NamespaceDoc = serde_json::from_str(text)?;
        let mut catalog = SpecCatalog::new();
        for source in doc.schema {
            for spec in source.specs {
                catalog.register_spec(spec, &source.source)?;
            }
        }
        Ok(Self {
            name: doc.name,
            version: doc.version,
            doc: doc.doc,
            catalog,
        })
    }

    /// Identifies the schema snapshot, e.g. `core@2.1.0`.
    pub fn snapshot(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceCatalog {
    namespaces: BTreeMap<String, Namespace>,
}

impl NamespaceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&mut self, name: &str, namespace: Namespace) -> Result<()> {
        if self.namespaces.contains_key(name) {
            return Err(Error::DuplicateNamespace(name.to_string()));
        }
        log::debug!("added namespace {} as '{}'", namespace.snapshot(), name);
        self.namespaces.insert(name.to_string(), namespace);
        Ok(())
    }

    pub fn get_namespace(&self, name: &str) -> Result<&Namespace> {
        self.namespaces
            .get(name)
            .ok_or_else(|| Error::UnknownNamespace(name.to_string()))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn get_spec(&self, namespace: &str, type_name: &str) -> Result<Rc<TypeSpec>> {
        let ns = self.get_namespace(namespace)?;
        ns.catalog.get_spec(type_name).map_err(|e| match e {
            Error::UnknownType { type_name, .. } => Error::UnknownType {
                type_name,
                namespace: Some(namespace.to_string()),
            },
            other => other,
        })
    }

    /// First namespace (by name) that registers `type_name`.
    pub fn namespace_of(&self, type_name: &str) -> Option<&str> {
        self.namespaces
            .iter()
            .find(|(_, ns)| ns.catalog.has_type(type_name))
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NS: &str = r#"{
        "name": "test_core",
        "version": "0.1.0",
        "schema": [
            { "source": "test.yaml", "specs": [ { "group": { "data_type_def": "Foo" } } ] }
        ]
    }"#;

    #[test]
    fn loads_namespace_document() {
        let ns = Namespace::from_json_str(NS).unwrap();
        assert_eq!(ns.snapshot(), "test_core@0.1.0");
        assert!(ns.catalog.has_type("Foo"));
        assert_eq!(ns.catalog.get_source("Foo"), Some("test.yaml"));
    }

    #[test]
    fn duplicate_namespace_is_rejected() {
        let mut catalog = NamespaceCatalog::new();
        catalog
            .add_namespace("test_core", Namespace::from_json_str(NS).unwrap())
            .unwrap();
        let err = catalog
            .add_namespace("test_core", Namespace::from_json_str(NS).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateNamespace(ref n) if n == "test_core"));
    }

    #[test]
    fn spec_lookup_names_the_namespace() {
        let mut catalog = NamespaceCatalog::new();
        catalog
            .add_namespace("test_core", Namespace::from_json_str(NS).unwrap())
            .unwrap();

        assert!(catalog.get_spec("test_core", "Foo").is_ok());
        assert_eq!(catalog.namespace_of("Foo"), Some("test_core"));
        match catalog.get_spec("test_core", "Bar").unwrap_err() {
            Error::UnknownType {
                type_name,
                namespace,
            } => {
                assert_eq!(type_name, "Bar");
                assert_eq!(namespace.as_deref(), Some("test_core"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            catalog.get_spec("other", "Foo").unwrap_err(),
            Error::UnknownNamespace(_)
        ));
    }
}
