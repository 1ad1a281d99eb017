//! Builder tree: the backend-agnostic persisted representation.
//!
//! All nodes live in one arena owned by `BuilderTree`. Parent edges and child
//! maps hold `NodeId` handles; links and references are additional handles to
//! nodes owned elsewhere in the same arena, never second owners.
//!
//! A tree is mutated by at most one pass at a time. `&mut BuilderTree` enforces
//! that within this crate; callers that share a tree behind their own
//! indirection must keep the same discipline.

use crate::error::{Error, Result};
use crate::value::{Dtype, Value};
use std::collections::{BTreeMap, HashMap};

pub const ATTR_DATA_TYPE: &str = "data_type";
pub const ATTR_NAMESPACE: &str = "namespace";
pub const ATTR_OBJECT_ID: &str = "object_id";

/// Attributes written by the build pass itself rather than by a mapper.
pub const RESERVED_ATTRS: [&str; 3] = [ATTR_DATA_TYPE, ATTR_NAMESPACE, ATTR_OBJECT_ID];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Attribute or dataset payload. References compare by target identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Value(Value),
    Reference(NodeId),
    References(Vec<NodeId>),
}

impl Data {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Data::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Value> for Data {
    fn from(v: Value) -> Self {
        Data::Value(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group {
        groups: BTreeMap<String, NodeId>,
        datasets: BTreeMap<String, NodeId>,
        links: BTreeMap<String, NodeId>,
    },
    Dataset {
        data: Data,
        dtype: Option<Dtype>,
    },
    Link {
        target: NodeId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Builder {
    pub name: String,
    pub parent: Option<NodeId>,
    pub attributes: BTreeMap<String, Data>,
    pub kind: NodeKind,
}

impl Builder {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }

    pub fn is_dataset(&self) -> bool {
        matches!(self.kind, NodeKind::Dataset { .. })
    }

    pub fn is_link(&self) -> bool {
        matches!(self.kind, NodeKind::Link { .. })
    }

    pub fn attribute_text(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .and_then(Data::as_value)
            .and_then(Value::as_text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuilderTree {
    nodes: Vec<Builder>,
    root: NodeId,
}

impl Default for BuilderTree {
    fn default() -> Self {
        Self::new("root")
    }
}

impl BuilderTree {
    pub fn new(root_name: &str) -> Self {
        let root = Builder {
            name: root_name.to_string(),
            parent: None,
            attributes: BTreeMap::new(),
            kind: NodeKind::Group {
                groups: BTreeMap::new(),
                datasets: BTreeMap::new(),
                links: BTreeMap::new(),
            },
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Start a tree whose root is a dataset, for dataset-typed root objects.
    pub fn new_dataset_root(root_name: &str) -> Self {
        let mut tree = Self::new(root_name);
        tree.nodes[0].kind = NodeKind::Dataset {
            data: Data::Value(Value::Array(Vec::new())),
            dtype: None,
        };
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &Builder {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Builder {
        &mut self.nodes[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Builder)> {
        self.nodes.iter().enumerate().map(|(i, b)| (NodeId(i), b))
    }

    fn add_child(&mut self, parent: NodeId, name: &str, kind: NodeKind) -> Result<NodeId> {
        if !self.nodes[parent.0].is_group() {
            return Err(Error::NotAGroup {
                path: self.path(parent),
            });
        }
        if self.child(parent, name).is_some() {
            return Err(Error::DuplicateChild {
                path: self.path(parent),
                name: name.to_string(),
            });
        }

        let id = NodeId(self.nodes.len());
        let slot = match &kind {
            NodeKind::Group { .. } => ChildSlot::Group,
            NodeKind::Dataset { .. } => ChildSlot::Dataset,
            NodeKind::Link { .. } => ChildSlot::Link,
        };
        self.nodes.push(Builder {
            name: name.to_string(),
            parent: Some(parent),
            attributes: BTreeMap::new(),
            kind,
        });

        if let NodeKind::Group {
            groups,
            datasets,
            links,
        } = &mut self.nodes[parent.0].kind
        {
            let map = match slot {
                ChildSlot::Group => groups,
                ChildSlot::Dataset => datasets,
                ChildSlot::Link => links,
            };
            map.insert(name.to_string(), id);
        }
        Ok(id)
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.add_child(
            parent,
            name,
            NodeKind::Group {
                groups: BTreeMap::new(),
                datasets: BTreeMap::new(),
                links: BTreeMap::new(),
            },
        )
    }

    pub fn add_dataset(
        &mut self,
        parent: NodeId,
        name: &str,
        data: Data,
        dtype: Option<Dtype>,
    ) -> Result<NodeId> {
        self.add_child(parent, name, NodeKind::Dataset { data, dtype })
    }

    pub fn add_link(&mut self, parent: NodeId, name: &str, target: NodeId) -> Result<NodeId> {
        self.add_child(parent, name, NodeKind::Link { target })
    }

    pub fn set_attribute(&mut self, node: NodeId, key: &str, data: Data) {
        self.nodes[node.0].attributes.insert(key.to_string(), data);
    }

    pub fn remove_attribute(&mut self, node: NodeId, key: &str) -> Option<Data> {
        self.nodes[node.0].attributes.remove(key)
    }

    /// Replace a dataset payload. Returns `false` if `node` is not a dataset.
    pub fn set_data(&mut self, node: NodeId, new_data: Data, new_dtype: Option<Dtype>) -> bool {
        match &mut self.nodes[node.0].kind {
            NodeKind::Dataset { data, dtype } => {
                *data = new_data;
                if new_dtype.is_some() {
                    *dtype = new_dtype;
                }
                true
            }
            _ => false,
        }
    }

    pub fn data(&self, node: NodeId) -> Option<&Data> {
        match &self.nodes[node.0].kind {
            NodeKind::Dataset { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn dtype(&self, node: NodeId) -> Option<&Dtype> {
        match &self.nodes[node.0].kind {
            NodeKind::Dataset { dtype, .. } => dtype.as_ref(),
            _ => None,
        }
    }

    /// Named child (group, dataset or link) of a group node.
    pub fn child(&self, node: NodeId, name: &str) -> Option<NodeId> {
        match &self.nodes[node.0].kind {
            NodeKind::Group {
                groups,
                datasets,
                links,
            } => groups
                .get(name)
                .or_else(|| datasets.get(name))
                .or_else(|| links.get(name))
                .copied(),
            _ => None,
        }
    }

    /// All children of a group node: groups, then datasets, then links.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        match &self.nodes[node.0].kind {
            NodeKind::Group {
                groups,
                datasets,
                links,
            } => groups
                .values()
                .chain(datasets.values())
                .chain(links.values())
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Follow link nodes to the builder they point at.
    pub fn resolve_link(&self, mut node: NodeId) -> NodeId {
        let mut hops = 0;
        while let NodeKind::Link { target } = self.nodes[node.0].kind {
            node = target;
            hops += 1;
            if hops > self.nodes.len() {
                break;
            }
        }
        node
    }

    /// Absolute slash-delimited path; the root is `/`.
    pub fn path(&self, node: NodeId) -> String {
        let mut names = Vec::new();
        let mut cur = Some(node);
        while let Some(id) = cur {
            let b = &self.nodes[id.0];
            if b.parent.is_some() {
                names.push(b.name.as_str());
            }
            cur = b.parent;
        }
        names.reverse();
        format!("/{}", names.join("/"))
    }

    /// Walk `relative` (slash-delimited) from `start` through group children.
    /// Links are returned as nodes but never traversed.
    pub fn resolve_relative(&self, start: NodeId, relative: &str) -> Option<NodeId> {
        let mut cur = start;
        for seg in relative.split('/').filter(|s| !s.is_empty()) {
            if self.nodes[cur.0].is_link() {
                return None;
            }
            cur = self.child(cur, seg)?;
        }
        Some(cur)
    }

    pub fn resolve_path(&self, path: &str) -> Option<NodeId> {
        self.resolve_relative(self.root, path)
    }

    pub fn object_id(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].attribute_text(ATTR_OBJECT_ID)
    }

    pub fn data_type(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].attribute_text(ATTR_DATA_TYPE)
    }

    pub fn namespace(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].attribute_text(ATTR_NAMESPACE)
    }

    /// The non-link builder carrying `object_id`.
    pub fn find_by_object_id(&self, object_id: &str) -> Option<NodeId> {
        self.iter()
            .find(|(_, b)| !b.is_link() && b.attribute_text(ATTR_OBJECT_ID) == Some(object_id))
            .map(|(id, _)| id)
    }

    /// Object id -> non-link builder, for repeated lookups. Agrees with
    /// `find_by_object_id`: the first node wins on a repeated id.
    pub fn object_id_index(&self) -> HashMap<&str, NodeId> {
        let mut index = HashMap::new();
        for (id, b) in self.iter().filter(|(_, b)| !b.is_link()) {
            if let Some(oid) = b.attribute_text(ATTR_OBJECT_ID) {
                index.entry(oid).or_insert(id);
            }
        }
        index
    }

    /// Every node path in depth-first order, links rendered as `path -> target`.
    pub fn describe(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let b = &self.nodes[id.0];
            match &b.kind {
                NodeKind::Link { target } => {
                    out.push(format!("{} -> {}", self.path(id), self.path(*target)))
                }
                NodeKind::Dataset { data, dtype } => {
                    let dtype = dtype.as_ref().map(|d| d.to_string()).unwrap_or_default();
                    let shape = match data {
                        Data::Value(v) => format!("{:?}", v.shape()),
                        Data::Reference(_) => "ref".to_string(),
                        Data::References(r) => format!("refs[{}]", r.len()),
                    };
                    out.push(format!("{} [{} {}]", self.path(id), dtype, shape));
                }
                NodeKind::Group { .. } => {
                    let ty = self
                        .data_type(id)
                        .map(|t| format!(" ({t})"))
                        .unwrap_or_default();
                    out.push(format!("{}{}", self.path(id), ty));
                }
            }
            let mut kids = self.children(id);
            kids.reverse();
            stack.extend(kids);
        }
        out
    }
}

#[derive(Clone, Copy)]
enum ChildSlot {
    Group,
    Dataset,
    Link,
}
