//! Flat, path-keyed serialization of a builder tree.
//!
//! Output JSON shape:
//!
//! {
//!   "root": "foo1",
//!   "nodes": {
//!     "/":             { "kind": "group", "attributes": { "attr1": "old", ... } },
//!     "/my_data":      { "kind": "dataset", "data": [1, 2, 3], "dtype": "int32",
//!                        "attributes": { "attr2": [17] } },
//!     "/alias":        { "kind": "link", "target": "/my_data" }
//!   }
//! }
//!
//! Markers for what plain JSON cannot carry:
//!   `{ "$ref": "/path" }`            one reference
//!   `{ "$refs": ["/a", "/b"] }`      a reference list, possibly empty
//!   `{ "$float": "NaN" }`            a non-finite float (`NaN`, `inf`, `-inf`)
//! Paths sort parents before children, which is the order nodes are rebuilt in.

use crate::build::builder::{BuilderTree, Data, NodeKind};
use crate::error::{Error, Result};
use crate::value::{Dtype, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const REF_KEY: &str = "$ref";
const REFS_KEY: &str = "$refs";
const FLOAT_KEY: &str = "$float";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: String,
    pub nodes: BTreeMap<String, Entry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entry {
    Group {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, serde_json::Value>,
    },
    Dataset {
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dtype: Option<Dtype>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, serde_json::Value>,
    },
    Link {
        target: String,
    },
}

impl Document {
    pub fn from_tree(tree: &BuilderTree) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for (id, b) in tree.iter() {
            let attributes = b
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), encode_data(tree, v)))
                .collect();
            let entry = match &b.kind {
                NodeKind::Group { .. } => Entry::Group { attributes },
                NodeKind::Dataset { data, dtype } => Entry::Dataset {
                    data: encode_data(tree, data),
                    dtype: dtype.clone(),
                    attributes,
                },
                NodeKind::Link { target } => Entry::Link {
                    target: tree.path(*target),
                },
            };
            nodes.insert(tree.path(id), entry);
        }
        Ok(Self {
            root: tree.get(tree.root()).name.clone(),
            nodes,
        })
    }

    pub fn to_tree(&self) -> Result<BuilderTree> {
        let mut tree = match self.nodes.get("/") {
            Some(Entry::Group { .. }) => BuilderTree::new(&self.root),
            Some(Entry::Dataset { .. }) => BuilderTree::new_dataset_root(&self.root),
            _ => return Err(corrupt("/", "root must be a group or dataset")),
        };

        // Nodes first, links once every target exists, then payloads so
        // references can resolve anywhere in the tree.
        let mut links = Vec::new();
        for (path, entry) in self.nodes.iter().filter(|(p, _)| p.as_str() != "/") {
            let (parent_path, name) = split_path(path)?;
            let parent = tree
                .resolve_path(parent_path)
                .ok_or_else(|| corrupt(path, "parent node is missing"))?;
            match entry {
                Entry::Group { .. } => {
                    tree.add_group(parent, name)?;
                }
                Entry::Dataset { dtype, .. } => {
                    tree.add_dataset(parent, name, Data::Value(Value::Array(Vec::new())), dtype.clone())?;
                }
                Entry::Link { target } => links.push((parent, name, path, target)),
            }
        }

        for (parent, name, path, target) in links {
            let target = tree
                .resolve_path(target)
                .ok_or_else(|| corrupt(path, "link target is missing"))?;
            tree.add_link(parent, name, target)?;
        }

        for (path, entry) in &self.nodes {
            let (attributes, data) = match entry {
                Entry::Group { attributes } => (attributes, None),
                Entry::Dataset {
                    data, attributes, ..
                } => (attributes, Some(data)),
                Entry::Link { .. } => continue,
            };
            let node = tree
                .resolve_path(path)
                .ok_or_else(|| corrupt(path, "node vanished while loading"))?;
            for (key, json) in attributes {
                let value = decode_data(&tree, path, json)?;
                tree.set_attribute(node, key, value);
            }
            if let Some(json) = data {
                let value = decode_data(&tree, path, json)?;
                tree.set_data(node, value, None);
            }
        }
        Ok(tree)
    }
}

fn corrupt(path: &str, reason: &str) -> Error {
    Error::CorruptStore {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn split_path(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((parent, name)) if !name.is_empty() => Ok((if parent.is_empty() { "/" } else { parent }, name)),
        _ => Err(corrupt(path, "not an absolute node path")),
    }
}

fn marker(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value);
    serde_json::Value::Object(map)
}

/// The value of `key` if `json` is exactly a one-key marker object.
fn marker_value<'a>(json: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    json.as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get(key))
}

fn encode_value(v: &Value) -> serde_json::Value {
    match v {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(x) => match serde_json::Number::from_f64(*x) {
            Some(n) => serde_json::Value::Number(n),
            None => {
                let text = if x.is_nan() {
                    "NaN"
                } else if *x > 0.0 {
                    "inf"
                } else {
                    "-inf"
                };
                marker(FLOAT_KEY, serde_json::Value::from(text))
            }
        },
        Value::Text(t) => serde_json::Value::String(t.clone()),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(encode_value).collect()),
    }
}

fn decode_value(json: &serde_json::Value) -> Option<Value> {
    if let Some(text) = marker_value(json, FLOAT_KEY) {
        return match text.as_str()? {
            "NaN" => Some(Value::Float(f64::NAN)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "-inf" => Some(Value::Float(f64::NEG_INFINITY)),
            _ => None,
        };
    }
    match json {
        serde_json::Value::Array(items) => items
            .iter()
            .map(decode_value)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        other => Value::from_json(other),
    }
}

fn encode_data(tree: &BuilderTree, data: &Data) -> serde_json::Value {
    match data {
        Data::Value(v) => encode_value(v),
        Data::Reference(id) => marker(REF_KEY, serde_json::Value::String(tree.path(*id))),
        Data::References(ids) => marker(
            REFS_KEY,
            serde_json::Value::Array(
                ids.iter()
                    .map(|id| serde_json::Value::String(tree.path(*id)))
                    .collect(),
            ),
        ),
    }
}

fn decode_data(tree: &BuilderTree, path: &str, json: &serde_json::Value) -> Result<Data> {
    let resolve = |target: &str| {
        tree.resolve_path(target)
            .ok_or_else(|| corrupt(path, &format!("reference target '{target}' is missing")))
    };

    if let Some(target) = marker_value(json, REF_KEY) {
        let target = target
            .as_str()
            .ok_or_else(|| corrupt(path, "reference target must be a path"))?;
        return Ok(Data::Reference(resolve(target)?));
    }
    if let Some(targets) = marker_value(json, REFS_KEY) {
        let targets = targets
            .as_array()
            .ok_or_else(|| corrupt(path, "reference list must be an array of paths"))?;
        return targets
            .iter()
            .map(|t| {
                t.as_str()
                    .ok_or_else(|| corrupt(path, "reference target must be a path"))
                    .and_then(resolve)
            })
            .collect::<Result<Vec<_>>>()
            .map(Data::References);
    }
    decode_value(json)
        .map(Data::Value)
        .ok_or_else(|| corrupt(path, &format!("unsupported value {json}")))
}
