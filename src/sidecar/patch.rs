//! Read-time overlay: applies a sidecar to a loaded builder tree.
//!
//! Loaded --apply(ok)--> Patched
//! Loaded --apply(err)--> Failed (tree kept as loaded, error attached)
//!
//! A sidecar is applied to a working copy and only replaces the tree once
//! every change of every version went through. The stored container is
//! never touched.

use crate::build::builder::{BuilderTree, Data, NodeId, RESERVED_ATTRS};
use crate::build::{BuildManager, ContainerRef};
use crate::error::{Error, Result};
use crate::sidecar::doc::{ChangeRecord, Sidecar, SidecarProblem, SidecarValidationError};
use crate::value::{Dtype, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Overlay {
    Loaded(BuilderTree),
    Patched {
        tree: BuilderTree,
        /// Labels of the applied versions, in order.
        versions: Vec<String>,
    },
    Failed {
        tree: BuilderTree,
        error: SidecarValidationError,
    },
}

impl Overlay {
    pub fn load(tree: BuilderTree) -> Self {
        Overlay::Loaded(tree)
    }

    /// Apply `sidecar` on top of the current tree. A failed overlay stays
    /// failed.
    pub fn apply(self, sidecar: &Sidecar) -> Self {
        let (tree, mut versions) = match self {
            Overlay::Loaded(tree) => (tree, Vec::new()),
            Overlay::Patched { tree, versions } => (tree, versions),
            failed @ Overlay::Failed { .. } => return failed,
        };

        match apply_sidecar(&tree, sidecar) {
            Ok(patched) => {
                versions.extend(sidecar.versions.iter().map(|v| v.label.clone()));
                log::debug!("sidecar applied, versions: {}", versions.join(", "));
                Overlay::Patched {
                    tree: patched,
                    versions,
                }
            }
            Err(error) => {
                log::warn!("{error}");
                Overlay::Failed { tree, error }
            }
        }
    }

    pub fn tree(&self) -> &BuilderTree {
        match self {
            Overlay::Loaded(tree) => tree,
            Overlay::Patched { tree, .. } | Overlay::Failed { tree, .. } => tree,
        }
    }

    pub fn into_tree(self) -> BuilderTree {
        match self {
            Overlay::Loaded(tree) => tree,
            Overlay::Patched { tree, .. } | Overlay::Failed { tree, .. } => tree,
        }
    }

    pub fn error(&self) -> Option<&SidecarValidationError> {
        match self {
            Overlay::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, Overlay::Patched { .. })
    }

    /// The tree, or the validation error for a failed overlay.
    pub fn into_result(self) -> Result<BuilderTree> {
        match self {
            Overlay::Failed { error, .. } => Err(Error::SidecarValidation(error)),
            other => Ok(other.into_tree()),
        }
    }

    /// Construct containers from the current tree, failing on a failed overlay.
    pub fn construct(&self, manager: &mut BuildManager) -> Result<ContainerRef> {
        if let Some(error) = self.error() {
            return Err(Error::SidecarValidation(error.clone()));
        }
        manager.construct(self.tree())
    }
}

/// Patched copy of `tree`; `tree` itself is left as is.
pub fn apply_sidecar(
    tree: &BuilderTree,
    sidecar: &Sidecar,
) -> std::result::Result<BuilderTree, SidecarValidationError> {
    sidecar.validate()?;

    // Reserved attributes are never patched, so object ids stay put.
    let index: HashMap<String, NodeId> = tree
        .object_id_index()
        .into_iter()
        .map(|(oid, id)| (oid.to_string(), id))
        .collect();

    let mut work = tree.clone();
    for (vi, version) in sidecar.versions.iter().enumerate() {
        for (ci, change) in version.changes.iter().enumerate() {
            let start = index
                .get(&change.object_id)
                .copied()
                .ok_or(SidecarProblem::UnknownObject);
            start
                .and_then(|start| apply_change(&mut work, start, change))
                .map_err(|p| SidecarValidationError::new(p).at(vi, version, ci, change))?;
        }
    }
    Ok(work)
}

fn apply_change(
    tree: &mut BuilderTree,
    start: NodeId,
    change: &ChangeRecord,
) -> std::result::Result<(), SidecarProblem> {
    let relative = change.relative_path.trim_matches('/');
    let (parent_path, last) = match relative.rsplit_once('/') {
        Some((p, l)) => (p, l),
        None => ("", relative),
    };
    if last.is_empty() {
        return Err(SidecarProblem::UnresolvedPath);
    }
    let parent = tree
        .resolve_relative(start, parent_path)
        .ok_or(SidecarProblem::UnresolvedPath)?;
    if tree.get(parent).is_link() {
        return Err(SidecarProblem::UnresolvedPath);
    }

    let dtype = change
        .parsed_dtype()
        .map_err(SidecarProblem::UnknownDtype)?;

    if let Some(child) = tree.child(parent, last) {
        if !tree.get(child).is_dataset() {
            return Err(SidecarProblem::UnresolvedPath);
        }
        if change.is_delete() {
            return Err(SidecarProblem::BadValue("datasets cannot be deleted".to_string()));
        }
        let target_dtype = dtype.clone().or_else(|| tree.dtype(child).cloned());
        let value = replacement(change, target_dtype.as_ref())?;
        tree.set_data(child, Data::Value(value), dtype);
        return Ok(());
    }

    if RESERVED_ATTRS.contains(&last) {
        return Err(SidecarProblem::BadValue(format!("attribute '{last}' cannot be changed")));
    }
    if change.is_delete() {
        if tree.remove_attribute(parent, last).is_none() {
            log::warn!(
                "{}: attribute '{last}' already absent, nothing to delete",
                tree.path(parent)
            );
        }
        return Ok(());
    }

    let value = replacement(change, dtype.as_ref())?;
    tree.set_attribute(parent, last, Data::Value(value));
    Ok(())
}

fn replacement(
    change: &ChangeRecord,
    dtype: Option<&Dtype>,
) -> std::result::Result<Value, SidecarProblem> {
    let json = change.value.as_ref().ok_or(SidecarProblem::MissingValue)?;
    let value = Value::from_json(json)
        .ok_or_else(|| SidecarProblem::BadValue(format!("unsupported value {json}")))?;
    match dtype {
        None => Ok(value),
        Some(dtype) => dtype
            .coerce(&value)
            .ok_or_else(|| SidecarProblem::BadValue(format!("cannot coerce {value} to {dtype}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::builder::ATTR_OBJECT_ID;
    use crate::sidecar::doc::Version;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const ID: &str = "6a9f4bd4-7d8e-4a59-9f44-5c4c2f1e2b3a";

    fn loaded() -> BuilderTree {
        let mut tree = BuilderTree::new("foo1");
        let root = tree.root();
        tree.set_attribute(root, ATTR_OBJECT_ID, Data::Value(Value::from(ID)));
        tree.set_attribute(root, "attr1", Data::Value(Value::from("old")));
        let d = tree
            .add_dataset(root, "my_data", Data::Value(Value::from(vec![1i64, 2, 3])), Some(Dtype::Int32))
            .unwrap();
        tree.set_attribute(d, "attr2", Data::Value(Value::from(vec![17i64])));
        tree
    }

    fn version(label: &str, changes: Vec<ChangeRecord>) -> Version {
        Version {
            label: label.to_string(),
            description: String::new(),
            datetime: "2021-11-30T20:16:16.790Z".to_string(),
            agent: "tester".to_string(),
            changes,
        }
    }

    fn change(path: &str, value: serde_json::Value, dtype: Option<&str>) -> ChangeRecord {
        ChangeRecord {
            object_id: ID.to_string(),
            relative_path: path.to_string(),
            value: Some(value),
            dtype: dtype.map(str::to_string),
        }
    }

    fn sidecar(versions: Vec<Version>) -> Sidecar {
        Sidecar {
            schema_version: "0.1.0".to_string(),
            versions,
        }
    }

    #[test]
    fn later_versions_win() {
        let sc = sidecar(vec![
            version(
                "2.0.0",
                vec![
                    change("attr1", json!("my experiment"), None),
                    change("my_data", json!([4, 5]), Some("int32")),
                ],
            ),
            version("3.0.0", vec![change("my_data", json!([6, 7]), Some("int8"))]),
        ]);
        let overlay = Overlay::load(loaded()).apply(&sc);
        assert!(overlay.is_patched());

        let tree = overlay.tree();
        let d = tree.resolve_path("my_data").unwrap();
        assert_eq!(tree.data(d), Some(&Data::Value(Value::from(vec![6i64, 7]))));
        assert_eq!(tree.dtype(d), Some(&Dtype::Int8));
        assert_eq!(tree.get(tree.root()).attribute_text("attr1"), Some("my experiment"));
    }

    #[test]
    fn null_deletes_attribute_and_leaves_source_alone() {
        let source = loaded();
        let sc = sidecar(vec![version("1", vec![change("my_data/attr2", json!(null), None)])]);
        let patched = apply_sidecar(&source, &sc).unwrap();

        let d = patched.resolve_path("my_data").unwrap();
        assert!(!patched.get(d).attributes.contains_key("attr2"));
        let d = source.resolve_path("my_data").unwrap();
        assert!(source.get(d).attributes.contains_key("attr2"));
    }

    #[test]
    fn empty_trailing_version_changes_nothing() {
        let v1 = version("1", vec![change("attr1", json!("x"), None)]);
        let once = apply_sidecar(&loaded(), &sidecar(vec![v1.clone()])).unwrap();
        let twice = apply_sidecar(&loaded(), &sidecar(vec![v1, version("2", vec![])])).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn no_versions_fails_and_keeps_tree() {
        let overlay = Overlay::load(loaded()).apply(&sidecar(vec![]));
        assert_eq!(overlay.error().map(|e| &e.problem), Some(&SidecarProblem::NoVersions));
        assert_eq!(overlay.tree(), &loaded());
        assert!(matches!(overlay.into_result(), Err(Error::SidecarValidation(_))));
    }

    #[test]
    fn failure_is_all_or_nothing() {
        let sc = sidecar(vec![
            version("1", vec![change("attr1", json!("changed"), None)]),
            version("2", vec![change("nope/attr", json!(1), None)]),
        ]);
        let overlay = Overlay::load(loaded()).apply(&sc);
        let err = overlay.error().unwrap();
        assert_eq!(err.version, Some(1));
        assert_eq!(err.label.as_deref(), Some("2"));
        assert_eq!(err.problem, SidecarProblem::UnresolvedPath);
        assert_eq!(overlay.tree().get(overlay.tree().root()).attribute_text("attr1"), Some("old"));
    }

    #[test]
    fn unknown_object_is_rejected() {
        let mut c = change("attr1", json!("x"), None);
        c.object_id = "00000000-0000-0000-0000-000000000000".to_string();
        let err = apply_sidecar(&loaded(), &sidecar(vec![version("1", vec![c])])).unwrap_err();
        assert_eq!(err.problem, SidecarProblem::UnknownObject);
        assert_eq!(err.change, Some(0));
    }

    #[test]
    fn change_without_value_fails_validation() {
        let mut c = change("attr1", json!(null), None);
        c.value = None;
        let overlay = Overlay::load(loaded()).apply(&sidecar(vec![version("1", vec![c])]));
        assert_eq!(overlay.error().map(|e| &e.problem), Some(&SidecarProblem::MissingValue));
        assert_eq!(overlay.tree().get(overlay.tree().root()).attribute_text("attr1"), Some("old"));
    }

    #[test]
    fn changes_to_several_objects_resolve_by_id() {
        let mut tree = loaded();
        let root = tree.root();
        let sub = tree.add_group(root, "sub").unwrap();
        let sub_id = "0b6a3c1e-9d2f-4e8a-8c1b-2f3e4d5c6b7a";
        tree.set_attribute(sub, ATTR_OBJECT_ID, Data::Value(Value::from(sub_id)));

        let mut on_sub = change("note", json!("hi"), None);
        on_sub.object_id = sub_id.to_string();
        let sc = sidecar(vec![version("1", vec![on_sub, change("attr1", json!("new"), None)])]);
        let patched = apply_sidecar(&tree, &sc).unwrap();
        assert_eq!(patched.get(sub).attribute_text("note"), Some("hi"));
        assert_eq!(patched.get(patched.root()).attribute_text("attr1"), Some("new"));
        assert_eq!(tree.object_id_index().get(sub_id), Some(&sub));
    }

    #[test]
    fn values_are_coerced_to_dataset_dtype() {
        let sc = sidecar(vec![version("1", vec![change("my_data", json!([1.5]), None)])]);
        let err = apply_sidecar(&loaded(), &sc).unwrap_err();
        assert!(matches!(err.problem, SidecarProblem::BadValue(_)));
    }

    #[test]
    fn reserved_attributes_are_protected() {
        let sc = sidecar(vec![version("1", vec![change("object_id", json!("x"), None)])]);
        let err = apply_sidecar(&loaded(), &sc).unwrap_err();
        assert!(matches!(err.problem, SidecarProblem::BadValue(_)));
    }
}
