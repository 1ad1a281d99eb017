use hdbuild::build::{ContainerRef, ObjectMapper};
use hdbuild::spec::TypeSpec;
use hdbuild::{
    Backend, BuildManager, ContainerClass, Error, FieldKind, FileStore, Namespace,
    NamespaceCatalog, Overlay, TypeMap, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::rc::Rc;

const NAMESPACE: &str = r#"{
    "name": "test_core",
    "version": "0.1.0",
    "doc": "a test namespace",
    "schema": [
        {
            "source": "test.yaml",
            "specs": [
                {
                    "group": {
                        "doc": "A test group with a data type",
                        "data_type_def": "Foo",
                        "groups": [
                            { "doc": "a child Foo", "data_type_inc": "Foo", "name": "sub_foo", "quantity": "?" }
                        ],
                        "datasets": [
                            {
                                "doc": "a 1-D integer dataset",
                                "dtype": "int",
                                "name": "my_data",
                                "shape": [null],
                                "attributes": [
                                    { "name": "attr2", "doc": "a 1-D integer attribute", "dtype": "int", "shape": [null], "required": false }
                                ]
                            }
                        ],
                        "attributes": [
                            { "name": "attr1", "doc": "a string attribute", "dtype": "text" }
                        ]
                    }
                }
            ]
        }
    ]
}"#;

fn foo_class() -> Rc<ContainerClass> {
    Rc::new(
        ContainerClass::new("Foo")
            .field("my_data", FieldKind::Data)
            .field("attr1", FieldKind::Data)
            .optional_field("attr2", FieldKind::Data)
            .optional_field("sub_foo", FieldKind::Child),
    )
}

/// `attr2` lives on the `my_data` dataset, not on the group.
fn foo_mapper(spec: Rc<TypeSpec>) -> hdbuild::Result<ObjectMapper> {
    let mut mapper = ObjectMapper::new(spec)?;
    mapper.map_spec("attr2", &["my_data", "attr2"])?;
    Ok(mapper)
}

fn type_map() -> TypeMap {
    let ns = Namespace::from_json_str(NAMESPACE).unwrap();
    let mut catalog = NamespaceCatalog::new();
    catalog.add_namespace("test_core", ns).unwrap();
    let mut tm = TypeMap::new(catalog);
    tm.register_container_type("test_core", "Foo", foo_class())
        .unwrap();
    tm.register_map("Foo", foo_mapper);
    tm
}

fn foo1() -> (ContainerRef, ContainerRef) {
    let class = foo_class();
    let foo2 = class
        .create("sub_foo")
        .set_value("my_data", vec![-1i64, -2, -3])
        .set_value("attr1", "OLD")
        .set_value("attr2", vec![-17i64])
        .finish()
        .unwrap();
    let foo1 = class
        .create("foo1")
        .set_value("my_data", vec![1i64, 2, 3])
        .set_value("attr1", "old")
        .set_value("attr2", vec![17i64])
        .set("sub_foo", foo2.clone())
        .finish()
        .unwrap();
    (foo1, foo2)
}

fn write(dir: &tempfile::TempDir, tm: &TypeMap, root: &ContainerRef) -> FileStore {
    let mut store = FileStore::new(dir.path().join("test_sidecar.json"));
    let tree = BuildManager::new(tm).build(root).unwrap();
    store.write(&tree).unwrap();
    store
}

fn sidecar(foo1_id: &str, foo2_id: &str) -> serde_json::Value {
    json!({
        "schema_version": "0.1.0",
        "versions": [
            {
                "label": "2.0.0",
                "description": "change attr1 from 'old' to 'my experiment' and my_data from [1, 2, 3] to [4, 5]",
                "datetime": "2020-10-29T19:15:15.789Z",
                "agent": "John Doe",
                "changes": [
                    { "object_id": foo1_id, "relative_path": "attr1", "value": "my experiment" },
                    { "object_id": foo1_id, "relative_path": "my_data", "value": [4, 5], "dtype": "int32" }
                ]
            },
            {
                "label": "3.0.0",
                "description": "change sub_foo/my_data, delete my_data/attr2, and change dtype of my_data",
                "datetime": "2021-11-30T20:16:16.790Z",
                "agent": "Jane Doe",
                "changes": [
                    { "object_id": foo2_id, "relative_path": "my_data", "value": [[0]] },
                    { "object_id": foo1_id, "relative_path": "my_data/attr2", "value": null },
                    { "object_id": foo1_id, "relative_path": "my_data", "value": [6, 7], "dtype": "int8" }
                ]
            },
            {
                "label": "3.0.1",
                "description": "change my_data from [4, 5] to [6, 7]",
                "datetime": "2021-11-30T20:17:16.790Z",
                "agent": "Jane Doe",
                "changes": [
                    { "object_id": foo1_id, "relative_path": "my_data", "value": [6, 7] }
                ]
            }
        ]
    })
}

#[test]
fn sidecar_patches_are_applied_on_read() {
    let tm = type_map();
    let (foo1, foo2) = foo1();
    let dir = tempfile::tempdir().unwrap();
    let store = write(&dir, &tm, &foo1);

    let foo1_id = foo1.borrow().object_id().to_string();
    let foo2_id = foo2.borrow().object_id().to_string();
    let text = serde_json::to_string_pretty(&sidecar(&foo1_id, &foo2_id)).unwrap();
    std::fs::write(store.sidecar_path(), text).unwrap();

    let overlay = store.read_patched().unwrap();
    match &overlay {
        Overlay::Patched { versions, .. } => assert_eq!(versions, &["2.0.0", "3.0.0", "3.0.1"]),
        other => panic!("expected a patched overlay, got {other:?}"),
    }

    let mut manager = BuildManager::new(&tm);
    let read = overlay.construct(&mut manager).unwrap();
    let read = read.borrow();
    assert_eq!(read.object_id(), foo1.borrow().object_id());
    assert_eq!(read.value("attr1"), Some(&Value::from("my experiment")));
    assert_eq!(read.value("my_data"), Some(&Value::from(vec![6i64, 7])));
    assert_eq!(read.value("attr2"), None);

    let sub = read.child("sub_foo").unwrap();
    assert_eq!(
        sub.borrow().value("my_data"),
        Some(&Value::Array(vec![Value::from(vec![0i64])]))
    );
    assert_eq!(sub.borrow().value("attr1"), Some(&Value::from("OLD")));

    // The stored container is untouched.
    let raw = manager.construct(&store.read().unwrap()).unwrap();
    assert_eq!(raw.borrow().value("attr1"), Some(&Value::from("old")));
    assert_eq!(raw.borrow().value("attr2"), Some(&Value::from(vec![17i64])));
}

#[test]
fn patched_dtype_is_kept_by_later_versions() {
    let tm = type_map();
    let (foo1, foo2) = foo1();
    let dir = tempfile::tempdir().unwrap();
    let store = write(&dir, &tm, &foo1);

    let foo1_id = foo1.borrow().object_id().to_string();
    let foo2_id = foo2.borrow().object_id().to_string();
    std::fs::write(store.sidecar_path(), sidecar(&foo1_id, &foo2_id).to_string()).unwrap();

    let tree = store.read_patched().unwrap().into_result().unwrap();
    let my_data = tree.resolve_path("my_data").unwrap();
    assert_eq!(tree.dtype(my_data).map(|d| d.to_string()), Some("int8".to_string()));
}

#[test]
fn empty_sidecar_fails_validation() {
    let tm = type_map();
    let (foo1, _) = foo1();
    let dir = tempfile::tempdir().unwrap();
    let store = write(&dir, &tm, &foo1);
    std::fs::write(store.sidecar_path(), r#"{ "versions": [] }"#).unwrap();

    let overlay = store.read_patched().unwrap();
    let mut manager = BuildManager::new(&tm);
    assert!(matches!(
        overlay.construct(&mut manager),
        Err(Error::SidecarValidation(_))
    ));

    // The unpatched tree is still there for callers that want it.
    let raw = manager.construct(overlay.tree()).unwrap();
    assert_eq!(raw.borrow().value("attr1"), Some(&Value::from("old")));
}

#[test]
fn unknown_object_id_fails_with_context() {
    let tm = type_map();
    let (foo1, _) = foo1();
    let dir = tempfile::tempdir().unwrap();
    let store = write(&dir, &tm, &foo1);

    let doc = json!({
        "schema_version": "0.1.0",
        "versions": [{
            "label": "1.0.0",
            "datetime": "2020-10-29T19:15:15Z",
            "changes": [{ "object_id": "not-in-this-file", "relative_path": "attr1", "value": "x" }]
        }]
    });
    std::fs::write(store.sidecar_path(), doc.to_string()).unwrap();

    let overlay = store.read_patched().unwrap();
    let error = overlay.error().unwrap();
    assert_eq!(error.label.as_deref(), Some("1.0.0"));
    assert_eq!(error.object_id.as_deref(), Some("not-in-this-file"));
    assert_eq!(error.relative_path.as_deref(), Some("attr1"));
}

#[test]
fn remapped_attribute_is_stored_under_the_dataset() {
    let tm = type_map();
    let (foo1, _) = foo1();
    let tree = BuildManager::new(&tm).build(&foo1).unwrap();

    let my_data = tree.resolve_path("my_data").unwrap();
    assert_eq!(
        tree.get(my_data).attributes.get("attr2").and_then(|d| d.as_value()),
        Some(&Value::from(vec![17i64]))
    );
    assert!(!tree.get(tree.root()).attributes.contains_key("attr2"));
    assert_eq!(tree.data_type(tree.resolve_path("sub_foo").unwrap()), Some("Foo"));
}

#[test]
fn shape_violations_are_rejected_on_build() {
    let tm = type_map();
    let bad = foo_class()
        .create("foo")
        .set_value("my_data", Value::Array(vec![Value::from(vec![1i64])]))
        .set_value("attr1", "x")
        .finish()
        .unwrap();
    let err = BuildManager::new(&tm).build(&bad).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { ref path, .. } if path == "Foo/my_data"));
}
