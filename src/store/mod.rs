//! Storage backends for builder trees.
//!
//! A backend only sees `BuilderTree`s; it never learns about containers or
//! specs. Both backends here persist the flat `Document` form. Every read
//! yields a fresh tree, so patching a read tree never reaches stored data.

pub mod document;

pub use document::{Document, Entry};

use crate::build::builder::BuilderTree;
use crate::error::{Error, Result};
use crate::sidecar::{Overlay, Sidecar};
use std::path::{Path, PathBuf};

pub trait Backend {
    fn write(&mut self, tree: &BuilderTree) -> Result<()>;
    fn read(&self) -> Result<BuilderTree>;
}

/// Keeps the serialized document in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    text: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryStore {
    fn write(&mut self, tree: &BuilderTree) -> Result<()> {
        self.text = Some(serde_json::to_string(&Document::from_tree(tree)?)?);
        Ok(())
    }

    fn read(&self) -> Result<BuilderTree> {
        let Some(text) = &self.text else {
            return Err(Error::CorruptStore {
                path: "/".to_string(),
                reason: "nothing has been written".to_string(),
            });
        };
        let doc: Document = serde_json::from_str(text)?;
        doc.to_tree()
    }
}

/// A JSON document on disk, with an optional sidecar next to it.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `data.json` -> `data.sidecar.json`
    pub fn sidecar_path(&self) -> PathBuf {
        self.path.with_extension("sidecar.json")
    }

    /// Read the stored tree and overlay the adjacent sidecar, if there is one.
    /// A sidecar that fails validation yields `Overlay::Failed` with the
    /// unpatched tree; unreadable or malformed sidecar files are errors.
    pub fn read_patched(&self) -> Result<Overlay> {
        let tree = self.read()?;
        let sidecar_path = self.sidecar_path();
        if !sidecar_path.exists() {
            return Ok(Overlay::load(tree));
        }
        log::debug!("applying sidecar {}", sidecar_path.display());
        overlay_from(tree, Sidecar::from_path(&sidecar_path))
    }

    /// Like `read_patched`, with an explicit sidecar file.
    pub fn read_with_sidecar(&self, sidecar_path: &Path) -> Result<Overlay> {
        let tree = self.read()?;
        overlay_from(tree, Sidecar::from_path(sidecar_path))
    }
}

fn overlay_from(tree: BuilderTree, sidecar: Result<Sidecar>) -> Result<Overlay> {
    match sidecar {
        Ok(sidecar) => Ok(Overlay::load(tree).apply(&sidecar)),
        Err(Error::SidecarValidation(error)) => {
            log::warn!("{error}");
            Ok(Overlay::Failed { tree, error })
        }
        Err(other) => Err(other),
    }
}

impl Backend for FileStore {
    fn write(&mut self, tree: &BuilderTree) -> Result<()> {
        let text = serde_json::to_string_pretty(&Document::from_tree(tree)?)?;
        std::fs::write(&self.path, text).map_err(|e| Error::io(&self.path, e))
    }

    fn read(&self) -> Result<BuilderTree> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;
        let doc: Document = serde_json::from_str(&text)?;
        doc.to_tree()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::builder::Data;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn tree() -> BuilderTree {
        let mut tree = BuilderTree::new("root");
        let root = tree.root();
        tree.set_attribute(root, "attr1", Data::Value(Value::from("old")));
        tree
    }

    #[test]
    fn memory_store_reads_fresh_copies() {
        let mut store = MemoryStore::new();
        assert!(store.read().is_err());
        store.write(&tree()).unwrap();

        let mut first = store.read().unwrap();
        let root = first.root();
        first.remove_attribute(root, "attr1");
        assert_eq!(store.read().unwrap(), tree());
    }

    #[test]
    fn file_store_round_trip_and_sidecar_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("data.json"));
        store.write(&tree()).unwrap();
        assert_eq!(store.read().unwrap(), tree());
        assert_eq!(store.sidecar_path(), dir.path().join("data.sidecar.json"));

        let overlay = store.read_patched().unwrap();
        assert!(matches!(overlay, Overlay::Loaded(_)));
    }

    #[test]
    fn invalid_sidecar_yields_failed_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("data.json"));
        store.write(&tree()).unwrap();
        std::fs::write(store.sidecar_path(), r#"{ "versions": [] }"#).unwrap();

        let overlay = store.read_patched().unwrap();
        assert!(overlay.error().is_some());
        assert_eq!(overlay.tree(), &tree());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.read(), Err(Error::Io { .. })));
    }
}
