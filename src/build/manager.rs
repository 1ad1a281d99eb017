//! Whole-graph build and construct passes.
//!
//! Build: containers -> builder tree. The manager owns the identity cache
//! (object id -> node) so that an object reachable from several places is
//! embedded once, at its containment site, and linked everywhere else.
//! Links and references are recorded while walking and resolved when the
//! pass ends, since the target may be placed later in the walk.
//!
//! Construct: builder tree -> containers. Constructed containers are cached
//! by node, so every link to a node yields the same `ContainerRef`.

use crate::build::builder::{
    ATTR_DATA_TYPE, ATTR_NAMESPACE, ATTR_OBJECT_ID, BuilderTree, Data, NodeId,
};
use crate::build::container::{Container, ContainerRef, ObjectId};
use crate::build::type_map::TypeMap;
use crate::error::{Error, Result};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Where a deferred reference gets written once its targets are placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSlot {
    Attribute(String),
    Data,
}

#[derive(Debug)]
struct PendingLink {
    parent: NodeId,
    name: String,
    target: ObjectId,
}

#[derive(Debug)]
struct PendingRef {
    node: NodeId,
    slot: RefSlot,
    targets: Vec<ObjectId>,
    many: bool,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

pub struct BuildManager<'a> {
    type_map: &'a TypeMap,

    // build pass
    tree: BuilderTree,
    built: HashMap<ObjectId, NodeId>,
    in_progress: HashSet<ObjectId>,
    /// child -> the container that embeds it, for every child whose declared
    /// parent is part of the pass and holds it in a child field.
    embedded_at: HashMap<ObjectId, ObjectId>,
    pending_links: Vec<PendingLink>,
    pending_refs: Vec<PendingRef>,
    roots: HashMap<ObjectId, Rc<BuilderTree>>,

    // construct pass
    constructed: HashMap<NodeId, ContainerRef>,
    by_object_id: HashMap<ObjectId, ContainerRef>,
}

impl<'a> BuildManager<'a> {
    pub fn new(type_map: &'a TypeMap) -> Self {
        Self {
            type_map,
            tree: BuilderTree::default(),
            built: HashMap::new(),
            in_progress: HashSet::new(),
            embedded_at: HashMap::new(),
            pending_links: Vec::new(),
            pending_refs: Vec::new(),
            roots: HashMap::new(),
            constructed: HashMap::new(),
            by_object_id: HashMap::new(),
        }
    }

    pub fn type_map(&self) -> &'a TypeMap {
        self.type_map
    }

    pub(crate) fn tree_mut(&mut self) -> &mut BuilderTree {
        &mut self.tree
    }

    /// Forget every cached tree and container.
    pub fn clear_cache(&mut self) {
        self.roots.clear();
        self.built.clear();
        self.constructed.clear();
        self.by_object_id.clear();
    }

    // ---- build ------------------------------------------------------------

    /// Build the tree rooted at `root`. Building the same root again returns
    /// the cached tree until `clear_cache`.
    pub fn build(&mut self, root: &ContainerRef) -> Result<Rc<BuilderTree>> {
        let (root_id, root_name, class) = {
            let r = root.borrow();
            (r.object_id(), r.name().to_string(), r.class().clone())
        };
        if let Some(tree) = self.roots.get(&root_id) {
            log::debug!("build cache hit for {root_name} ({root_id})");
            return Ok(tree.clone());
        }

        self.reset_pass(root);
        let spec = self.type_map.spec_for_class(&class)?;
        self.tree = if spec.is_group() {
            BuilderTree::new(&root_name)
        } else {
            BuilderTree::new_dataset_root(&root_name)
        };

        let node = self.tree.root();
        self.build_into(root, node)?;
        self.resolve_pending()?;

        log::debug!(
            "built {} ({}): {} nodes, {} objects",
            root_name,
            root_id,
            self.tree.len(),
            self.built.len()
        );
        let tree = Rc::new(std::mem::take(&mut self.tree));
        self.roots.insert(root_id, tree.clone());
        Ok(tree)
    }

    fn reset_pass(&mut self, root: &ContainerRef) {
        self.built.clear();
        self.in_progress.clear();
        self.pending_links.clear();
        self.pending_refs.clear();
        self.embedded_at = containment_sites(root);
    }

    /// Builder node produced for `object_id` by the last build pass.
    pub fn get_builder(&self, object_id: ObjectId) -> Option<NodeId> {
        self.built.get(&object_id).copied()
    }

    fn build_into(&mut self, container: &ContainerRef, node: NodeId) -> Result<()> {
        let (object_id, class) = {
            let c = container.borrow();
            (c.object_id(), c.class().clone())
        };
        self.in_progress.insert(object_id);
        self.built.insert(object_id, node);

        let (namespace, data_type) = self.type_map.data_type_of(&class)?;
        self.tree
            .set_attribute(node, ATTR_DATA_TYPE, Data::Value(Value::Text(data_type)));
        self.tree
            .set_attribute(node, ATTR_NAMESPACE, Data::Value(Value::Text(namespace)));
        self.tree.set_attribute(
            node,
            ATTR_OBJECT_ID,
            Data::Value(Value::Text(object_id.to_string())),
        );

        let mapper = self.type_map.mapper_for_class(&class)?;
        mapper.build(container, self, node)?;

        self.in_progress.remove(&object_id);
        Ok(())
    }

    fn create_node(&mut self, parent: NodeId, name: &str, child: &ContainerRef) -> Result<NodeId> {
        let spec = self.type_map.spec_for_class(child.borrow().class())?;
        if spec.is_group() {
            self.tree.add_group(parent, name)
        } else {
            self.tree
                .add_dataset(parent, name, Data::Value(Value::Array(Vec::new())), None)
        }
    }

    /// Place `child` under `parent_node` as held by `holder`: embedded when
    /// `holder` is its containment site, linked otherwise.
    pub fn build_child(
        &mut self,
        parent_node: NodeId,
        holder: &ContainerRef,
        child: &ContainerRef,
        name: &str,
    ) -> Result<()> {
        let (child_id, contained, type_name) = {
            let c = child.borrow();
            (
                c.object_id(),
                c.is_child_of(holder),
                c.class().name().to_string(),
            )
        };

        if contained && self.in_progress.contains(&child_id) {
            return Err(Error::CircularBuild {
                type_name,
                object_id: child_id.to_string(),
            });
        }

        if let Some(&target) = self.built.get(&child_id) {
            self.tree.add_link(parent_node, name, target)?;
            return Ok(());
        }

        if contained || !self.embedded_at.contains_key(&child_id) {
            if !contained {
                log::debug!("{type_name} {child_id} has no containing parent here, embedding at first use");
            }
            let node = self.create_node(parent_node, name, child)?;
            self.build_into(child, node)
        } else {
            self.pending_links.push(PendingLink {
                parent: parent_node,
                name: name.to_string(),
                target: child_id,
            });
            Ok(())
        }
    }

    /// Link `target` under `parent_node`; the target is never embedded here.
    pub fn add_link_to(&mut self, parent_node: NodeId, name: &str, target: &ContainerRef) -> Result<()> {
        let target_id = target.borrow().object_id();
        match self.built.get(&target_id) {
            Some(&node) => {
                self.tree.add_link(parent_node, name, node)?;
            }
            None => self.pending_links.push(PendingLink {
                parent: parent_node,
                name: name.to_string(),
                target: target_id,
            }),
        }
        Ok(())
    }

    pub fn defer_reference(&mut self, node: NodeId, slot: RefSlot, targets: &[ContainerRef], many: bool) {
        self.pending_refs.push(PendingRef {
            node,
            slot,
            targets: targets.iter().map(|t| t.borrow().object_id()).collect(),
            many,
        });
    }

    fn resolve_pending(&mut self) -> Result<()> {
        for link in std::mem::take(&mut self.pending_links) {
            let Some(&target) = self.built.get(&link.target) else {
                return Err(Error::DanglingLink {
                    path: join_path(&self.tree.path(link.parent), &link.name),
                    target: link.target.to_string(),
                });
            };
            self.tree.add_link(link.parent, &link.name, target)?;
        }

        for r in std::mem::take(&mut self.pending_refs) {
            let mut nodes = Vec::with_capacity(r.targets.len());
            for target in &r.targets {
                match self.built.get(target) {
                    Some(&n) => nodes.push(n),
                    None => {
                        let path = match &r.slot {
                            RefSlot::Attribute(key) => format!("{}@{}", self.tree.path(r.node), key),
                            RefSlot::Data => self.tree.path(r.node),
                        };
                        return Err(Error::DanglingReference {
                            path,
                            object_id: target.to_string(),
                        });
                    }
                }
            }

            let data = match (r.many, nodes.as_slice()) {
                (false, [single]) => Data::Reference(*single),
                _ => Data::References(nodes),
            };
            match r.slot {
                RefSlot::Attribute(key) => self.tree.set_attribute(r.node, &key, data),
                RefSlot::Data => {
                    self.tree.set_data(r.node, data, None);
                }
            }
        }
        Ok(())
    }

    // ---- construct --------------------------------------------------------

    /// Reconstruct the container graph stored in `tree`.
    pub fn construct(&mut self, tree: &BuilderTree) -> Result<ContainerRef> {
        self.constructed.clear();
        let root = self.construct_node(tree, tree.root())?;
        log::debug!("constructed {} containers", self.constructed.len());
        Ok(root)
    }

    /// Container for `node` (links followed), constructing it on first use.
    pub fn construct_node(&mut self, tree: &BuilderTree, node: NodeId) -> Result<ContainerRef> {
        let node = tree.resolve_link(node);
        if let Some(c) = self.constructed.get(&node) {
            return Ok(c.clone());
        }

        let Some(data_type) = tree.data_type(node) else {
            return Err(Error::UntypedBuilder {
                path: tree.path(node),
            });
        };
        let namespace = match tree.namespace(node) {
            Some(ns) => ns,
            None => self
                .type_map
                .namespace_catalog()
                .namespace_of(data_type)
                .ok_or_else(|| Error::unknown_type(data_type))?,
        };
        let class = self.type_map.get_class(namespace, data_type)?;
        let mapper = self.type_map.mapper_for_class(&class)?;

        let object_id = match tree.object_id(node) {
            Some(text) => ObjectId::parse(text).unwrap_or_else(|| {
                log::warn!("{}: unparsable object id {text:?}, assigning a new one", tree.path(node));
                ObjectId::new()
            }),
            None => ObjectId::new(),
        };

        // Cached before the fields are filled so references back to this node
        // resolve to the same instance.
        let container = Container::new_unchecked(class.clone(), tree.get(node).name.clone(), object_id);
        self.constructed.insert(node, container.clone());
        self.by_object_id.insert(object_id, container.clone());

        let fields = mapper.construct(tree, node, &container, self)?;
        class.validate(object_id, &fields)?;
        container.borrow_mut().replace_fields(fields);
        Ok(container)
    }

    /// Container constructed for `object_id` by this manager.
    pub fn get_container(&self, object_id: ObjectId) -> Option<ContainerRef> {
        self.by_object_id.get(&object_id).cloned()
    }
}

/// Every object reachable from `root`, mapped to the container that embeds it.
fn containment_sites(root: &ContainerRef) -> HashMap<ObjectId, ObjectId> {
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut sites = HashMap::new();
    let mut stack = vec![root.clone()];

    while let Some(current) = stack.pop() {
        let c = current.borrow();
        if !seen.insert(c.object_id()) {
            continue;
        }
        for field in c.fields().values() {
            for child in field.children() {
                if Rc::ptr_eq(&child, &current) {
                    continue;
                }
                let ch = child.borrow();
                if ch.is_child_of(&current) {
                    sites.entry(ch.object_id()).or_insert(c.object_id());
                }
            }
            stack.extend(field.targets());
        }
    }
    sites
}
