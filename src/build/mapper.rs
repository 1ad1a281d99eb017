//! Per-type converter between a container and its builder subtree.
//!
//! A mapper binds container field names to spec elements addressed by path:
//! `["attr1"]` is an attribute of the type itself, `["my_data", "attr2"]` an
//! attribute of the untyped dataset `my_data`. The payload of a dataset type
//! lives at the empty path. Default bindings use the joined path as the
//! field name (`my_data_attr2`); `map_spec` overrides them.
//!
//! Nested objects are always handed to the `BuildManager`, which owns the
//! embed-versus-link decision and the identity caches.

use crate::build::builder::{BuilderTree, Data, NodeId};
use crate::build::container::{Container, ContainerRef, Field};
use crate::build::manager::{BuildManager, RefSlot};
use crate::error::{Error, Result};
use crate::spec::{AttributeSpec, DatasetSpec, GroupSpec, LinkSpec, Quantity, TypeSpec};
use crate::value::{Dtype, Shape, Value, shape_matches};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// A spec element reachable from the mapper's type spec.
#[derive(Debug, Clone, Copy)]
pub enum SpecElement<'a> {
    Attribute(&'a AttributeSpec),
    Dataset(&'a DatasetSpec),
    Group(&'a GroupSpec),
    Link(&'a LinkSpec),
    /// The data of a dataset type.
    Payload(&'a DatasetSpec),
}

fn dataset_key(d: &DatasetSpec) -> Option<&str> {
    d.name.as_deref().or(d.data_type())
}

fn group_key(g: &GroupSpec) -> Option<&str> {
    g.name.as_deref().or(g.data_type())
}

fn link_key(l: &LinkSpec) -> &str {
    l.name.as_deref().unwrap_or(&l.target_type)
}

fn child_path(prefix: &[String], key: &str) -> Vec<String> {
    let mut path = prefix.to_vec();
    path.push(key.to_string());
    path
}

#[derive(Debug, Clone)]
pub struct ObjectMapper {
    spec: Rc<TypeSpec>,
    type_name: String,
    spec_to_field: BTreeMap<Vec<String>, String>,
}

impl ObjectMapper {
    /// Default structural mapper: every element binds to the same-named field.
    pub fn new(spec: Rc<TypeSpec>) -> Result<Self> {
        let Some(type_name) = spec.data_type_def().map(str::to_string) else {
            return Err(Error::AnonymousSpec {
                source_name: "object mapper".to_string(),
            });
        };

        let mut mapper = Self {
            spec: spec.clone(),
            type_name,
            spec_to_field: BTreeMap::new(),
        };
        match &*spec {
            TypeSpec::Group(g) => mapper.bind_group(g, &[]),
            TypeSpec::Dataset(d) => {
                mapper.spec_to_field.insert(Vec::new(), "data".to_string());
                mapper.bind_attributes(&d.attributes, &[]);
            }
        }
        Ok(mapper)
    }

    fn bind_default(&mut self, path: Vec<String>) {
        let field = path.join("_");
        self.spec_to_field.insert(path, field);
    }

    fn bind_attributes(&mut self, attrs: &[AttributeSpec], prefix: &[String]) {
        for a in attrs {
            self.bind_default(child_path(prefix, &a.name));
        }
    }

    fn bind_group(&mut self, g: &GroupSpec, prefix: &[String]) {
        self.bind_attributes(&g.attributes, prefix);
        for d in &g.datasets {
            let Some(key) = dataset_key(d) else { continue };
            let path = child_path(prefix, key);
            if d.data_type().is_none() {
                self.bind_attributes(&d.attributes, &path);
            }
            self.bind_default(path);
        }
        for sub in &g.groups {
            let Some(key) = group_key(sub) else { continue };
            let path = child_path(prefix, key);
            if sub.data_type().is_some() {
                self.bind_default(path);
            } else {
                self.bind_group(sub, &path);
            }
        }
        for l in &g.links {
            self.bind_default(child_path(prefix, link_key(l)));
        }
    }

    pub fn spec(&self) -> &Rc<TypeSpec> {
        &self.spec
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The spec element at `path`, if any.
    pub fn element_at(&self, path: &[String]) -> Option<SpecElement<'_>> {
        fn in_group<'a>(g: &'a GroupSpec, path: &[String]) -> Option<SpecElement<'a>> {
            let (seg, rest) = path.split_first()?;
            if rest.is_empty() {
                if let Some(a) = g.get_attribute(seg) {
                    return Some(SpecElement::Attribute(a));
                }
                if let Some(d) = g.datasets.iter().find(|d| dataset_key(d) == Some(seg)) {
                    return Some(SpecElement::Dataset(d));
                }
                if let Some(sub) = g.groups.iter().find(|s| group_key(s) == Some(seg)) {
                    return Some(SpecElement::Group(sub));
                }
                return g
                    .links
                    .iter()
                    .find(|l| link_key(l) == seg)
                    .map(SpecElement::Link);
            }

            if let Some(d) = g.datasets.iter().find(|d| dataset_key(d) == Some(seg)) {
                return match rest {
                    [attr] if d.data_type().is_none() => {
                        d.get_attribute(attr).map(SpecElement::Attribute)
                    }
                    _ => None,
                };
            }
            g.groups
                .iter()
                .find(|s| group_key(s) == Some(seg) && s.data_type().is_none())
                .and_then(|s| in_group(s, rest))
        }

        match &*self.spec {
            TypeSpec::Dataset(d) => match path {
                [] => Some(SpecElement::Payload(d)),
                [attr] => d.get_attribute(attr).map(SpecElement::Attribute),
                _ => None,
            },
            TypeSpec::Group(g) => in_group(g, path),
        }
    }

    /// Bind `field` to the spec element at `spec_path`, replacing both the
    /// element's previous field and the field's previous element.
    pub fn map_spec(&mut self, field: &str, spec_path: &[&str]) -> Result<()> {
        let path: Vec<String> = spec_path.iter().map(|s| s.to_string()).collect();
        if self.element_at(&path).is_none() {
            return Err(Error::UnknownSpecElement {
                type_name: self.type_name.clone(),
                path: spec_path.join("/"),
            });
        }
        self.spec_to_field.retain(|_, f| f != field);
        self.spec_to_field.insert(path, field.to_string());
        Ok(())
    }

    pub fn field_for(&self, spec_path: &[&str]) -> Option<&str> {
        let path: Vec<String> = spec_path.iter().map(|s| s.to_string()).collect();
        self.field_at(&path)
    }

    fn field_at(&self, path: &[String]) -> Option<&str> {
        self.spec_to_field.get(path).map(String::as_str)
    }

    fn element_label(&self, path: &[String]) -> String {
        if path.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}/{}", self.type_name, path.join("/"))
        }
    }

    fn missing(&self, c: &Container, path: &[String], reason: impl Into<String>) -> Error {
        Error::MissingRequiredField {
            type_name: self.type_name.clone(),
            object_id: c.object_id().to_string(),
            field: self
                .field_at(path)
                .map(str::to_string)
                .unwrap_or_else(|| path.join("/")),
            reason: reason.into(),
        }
    }

    fn coerce(&self, value: &Value, dtype: Option<&Dtype>, path: &[String]) -> Result<Value> {
        match dtype {
            None => Ok(value.clone()),
            Some(dtype) => dtype.coerce(value).ok_or_else(|| Error::DtypeMismatch {
                path: self.element_label(path),
                dtype: dtype.to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn check_shape(&self, value: &Value, shape: Option<&Shape>, path: &[String]) -> Result<()> {
        match shape {
            Some(expected) if !shape_matches(expected, &value.shape()) => Err(Error::ShapeMismatch {
                path: self.element_label(path),
                expected: expected.clone(),
                actual: value.shape(),
            }),
            _ => Ok(()),
        }
    }

    fn check_quantity(&self, quantity: Quantity, found: usize, path: &[String]) -> Result<()> {
        if quantity.allows(found) {
            Ok(())
        } else {
            Err(Error::QuantityMismatch {
                path: self.element_label(path),
                expected: quantity.to_string(),
                found,
            })
        }
    }

    // ---- build ------------------------------------------------------------

    /// Fill `node` (already created by the manager) from `container`.
    pub fn build(
        &self,
        container: &ContainerRef,
        manager: &mut BuildManager,
        node: NodeId,
    ) -> Result<()> {
        let c = container.borrow();
        match &*self.spec {
            TypeSpec::Group(g) => self.build_group(&c, container, manager, node, g, &[]),
            TypeSpec::Dataset(d) => {
                self.build_payload(&c, manager, node, d)?;
                self.build_attributes(&c, manager, node, &d.attributes, &[])
            }
        }
    }

    fn build_attributes(
        &self,
        c: &Container,
        manager: &mut BuildManager,
        node: NodeId,
        attrs: &[AttributeSpec],
        prefix: &[String],
    ) -> Result<()> {
        for a in attrs {
            let path = child_path(prefix, &a.name);

            if let Some(fixed) = &a.value {
                let v = self.coerce(fixed, a.dtype.as_ref(), &path)?;
                manager.tree_mut().set_attribute(node, &a.name, Data::Value(v));
                continue;
            }

            let field = self.field_at(&path).and_then(|f| c.field(f));
            match field {
                None => {
                    if let Some(default) = &a.default_value {
                        let v = self.coerce(default, a.dtype.as_ref(), &path)?;
                        manager.tree_mut().set_attribute(node, &a.name, Data::Value(v));
                    } else if a.required {
                        return Err(self.missing(c, &path, "required attribute has no value"));
                    }
                }
                Some(Field::Value(v)) => {
                    if a.dtype.as_ref().is_some_and(Dtype::is_reference) {
                        return Err(self.missing(c, &path, "expected an object reference, got data"));
                    }
                    let v = self.coerce(v, a.dtype.as_ref(), &path)?;
                    self.check_shape(&v, a.shape.as_ref(), &path)?;
                    manager.tree_mut().set_attribute(node, &a.name, Data::Value(v));
                }
                Some(Field::Reference(target)) => {
                    manager.defer_reference(node, RefSlot::Attribute(a.name.clone()), &[target.clone()], false);
                }
                Some(Field::References(targets)) => {
                    manager.defer_reference(node, RefSlot::Attribute(a.name.clone()), targets, true);
                }
                Some(other) => {
                    return Err(self.missing(
                        c,
                        &path,
                        format!("attribute expects data, got {}", other.kind()),
                    ));
                }
            }
        }
        Ok(())
    }

    fn build_payload(
        &self,
        c: &Container,
        manager: &mut BuildManager,
        node: NodeId,
        d: &DatasetSpec,
    ) -> Result<()> {
        let path: Vec<String> = Vec::new();
        match self.field_at(&path).and_then(|f| c.field(f)) {
            Some(Field::Value(v)) => {
                let v = self.coerce(v, d.dtype.as_ref(), &path)?;
                self.check_shape(&v, d.shape.as_ref(), &path)?;
                let dtype = d.dtype.clone().or_else(|| v.infer_dtype());
                manager.tree_mut().set_data(node, Data::Value(v), dtype);
            }
            Some(Field::Reference(target)) => {
                manager.tree_mut().set_data(node, Data::References(Vec::new()), d.dtype.clone());
                manager.defer_reference(node, RefSlot::Data, &[target.clone()], false);
            }
            Some(Field::References(targets)) => {
                manager.tree_mut().set_data(node, Data::References(Vec::new()), d.dtype.clone());
                manager.defer_reference(node, RefSlot::Data, targets, true);
            }
            Some(other) => {
                return Err(self.missing(c, &path, format!("dataset expects data, got {}", other.kind())));
            }
            None => return Err(self.missing(c, &path, "dataset type has no data")),
        }
        Ok(())
    }

    fn build_group(
        &self,
        c: &Container,
        container: &ContainerRef,
        manager: &mut BuildManager,
        node: NodeId,
        g: &GroupSpec,
        prefix: &[String],
    ) -> Result<()> {
        self.build_attributes(c, manager, node, &g.attributes, prefix)?;

        for d in &g.datasets {
            let Some(key) = dataset_key(d) else { continue };
            let path = child_path(prefix, key);
            match d.data_type() {
                Some(ty) => self.build_typed(c, container, manager, node, &path, d.name.as_deref(), ty, d.quantity)?,
                None => self.build_untyped_dataset(c, manager, node, d, &path)?,
            }
        }

        for sub in &g.groups {
            let Some(key) = group_key(sub) else { continue };
            let path = child_path(prefix, key);
            if let Some(ty) = sub.data_type() {
                self.build_typed(c, container, manager, node, &path, sub.name.as_deref(), ty, sub.quantity)?;
                continue;
            }
            let Some(name) = sub.name.as_deref() else { continue };
            if sub.quantity.is_required() || self.has_fields_under(c, &path) {
                let child = manager.tree_mut().add_group(node, name)?;
                self.build_group(c, container, manager, child, sub, &path)?;
            }
        }

        for l in &g.links {
            let path = child_path(prefix, link_key(l));
            let targets = match self.field_at(&path).and_then(|f| c.field(f)) {
                None => Vec::new(),
                Some(Field::Value(_)) => {
                    return Err(self.missing(c, &path, "link expects an object, got data"));
                }
                Some(f) => f.targets(),
            };
            if targets.is_empty() && l.quantity.is_required() {
                return Err(self.missing(c, &path, "required link has no target"));
            }
            self.check_quantity(l.quantity, targets.len(), &path)?;
            for target in &targets {
                let name = match &l.name {
                    Some(n) => n.clone(),
                    None => target.borrow().name().to_string(),
                };
                manager.add_link_to(node, &name, target)?;
            }
        }
        Ok(())
    }

    fn has_fields_under(&self, c: &Container, prefix: &[String]) -> bool {
        self.spec_to_field
            .iter()
            .any(|(path, field)| path.starts_with(prefix) && c.field(field).is_some())
    }

    fn build_untyped_dataset(
        &self,
        c: &Container,
        manager: &mut BuildManager,
        node: NodeId,
        d: &DatasetSpec,
        path: &[String],
    ) -> Result<()> {
        let Some(name) = d.name.as_deref() else {
            return Ok(());
        };

        let ds = match self.field_at(path).and_then(|f| c.field(f)) {
            None if d.quantity.is_required() => {
                return Err(self.missing(c, path, "required dataset has no value"));
            }
            None => return Ok(()),
            Some(Field::Value(v)) => {
                let v = self.coerce(v, d.dtype.as_ref(), path)?;
                self.check_shape(&v, d.shape.as_ref(), path)?;
                let dtype = d.dtype.clone().or_else(|| v.infer_dtype());
                manager.tree_mut().add_dataset(node, name, Data::Value(v), dtype)?
            }
            Some(Field::Reference(target)) => {
                let ds = manager
                    .tree_mut()
                    .add_dataset(node, name, Data::References(Vec::new()), d.dtype.clone())?;
                manager.defer_reference(ds, RefSlot::Data, &[target.clone()], false);
                ds
            }
            Some(Field::References(targets)) => {
                let ds = manager
                    .tree_mut()
                    .add_dataset(node, name, Data::References(Vec::new()), d.dtype.clone())?;
                manager.defer_reference(ds, RefSlot::Data, targets, true);
                ds
            }
            Some(other) => {
                return Err(self.missing(c, path, format!("dataset expects data, got {}", other.kind())));
            }
        };
        self.build_attributes(c, manager, ds, &d.attributes, path)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_typed(
        &self,
        c: &Container,
        container: &ContainerRef,
        manager: &mut BuildManager,
        node: NodeId,
        path: &[String],
        element_name: Option<&str>,
        data_type: &str,
        quantity: Quantity,
    ) -> Result<()> {
        let children = match self.field_at(path).and_then(|f| c.field(f)) {
            None => Vec::new(),
            Some(f @ (Field::Child(_) | Field::Children(_))) => f.children(),
            Some(other) => {
                return Err(self.missing(c, path, format!("expected a {data_type} object, got {}", other.kind())));
            }
        };

        if children.is_empty() && quantity.is_required() {
            return Err(self.missing(c, path, format!("required {data_type} object is absent")));
        }
        self.check_quantity(quantity, children.len(), path)?;

        for child in &children {
            let (namespace, child_type) = manager.type_map().data_type_of(child.borrow().class())?;
            if !manager.type_map().is_sub_type(&namespace, &child_type, data_type) {
                return Err(Error::FieldTypeMismatch {
                    type_name: self.type_name.clone(),
                    field: self.field_at(path).unwrap_or_default().to_string(),
                    expected: data_type.to_string(),
                    got: child_type,
                });
            }
            let name = match element_name {
                Some(n) => n.to_string(),
                None => child.borrow().name().to_string(),
            };
            manager.build_child(node, container, child, &name)?;
        }
        Ok(())
    }

    // ---- construct --------------------------------------------------------

    /// Collect the fields of `container` from the subtree at `node`. Embedded
    /// children get `container` as their parent.
    pub fn construct(
        &self,
        tree: &BuilderTree,
        node: NodeId,
        container: &ContainerRef,
        manager: &mut BuildManager,
    ) -> Result<BTreeMap<String, Field>> {
        let mut fields = BTreeMap::new();
        match &*self.spec {
            TypeSpec::Group(g) => {
                self.construct_group(tree, node, container, g, &[], manager, &mut fields)?;
            }
            TypeSpec::Dataset(d) => {
                if let (Some(field), Some(data)) = (self.field_at(&[]), tree.data(node)) {
                    let value = self.data_to_field(tree, data, manager)?;
                    fields.insert(field.to_string(), value);
                }
                self.construct_attributes(tree, node, &d.attributes, &[], manager, &mut fields)?;
            }
        }
        Ok(fields)
    }

    fn data_to_field(&self, tree: &BuilderTree, data: &Data, manager: &mut BuildManager) -> Result<Field> {
        Ok(match data {
            Data::Value(v) => Field::Value(v.clone()),
            Data::Reference(id) => Field::Reference(manager.construct_node(tree, *id)?),
            Data::References(ids) => Field::References(
                ids.iter()
                    .map(|id| manager.construct_node(tree, *id))
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    fn construct_attributes(
        &self,
        tree: &BuilderTree,
        node: NodeId,
        attrs: &[AttributeSpec],
        prefix: &[String],
        manager: &mut BuildManager,
        fields: &mut BTreeMap<String, Field>,
    ) -> Result<()> {
        for a in attrs {
            let path = child_path(prefix, &a.name);
            let Some(field) = self.field_at(&path) else {
                continue;
            };
            if let Some(data) = tree.get(node).attributes.get(&a.name) {
                let value = self.data_to_field(tree, data, manager)?;
                fields.insert(field.to_string(), value);
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn construct_group(
        &self,
        tree: &BuilderTree,
        node: NodeId,
        container: &ContainerRef,
        g: &GroupSpec,
        prefix: &[String],
        manager: &mut BuildManager,
        fields: &mut BTreeMap<String, Field>,
    ) -> Result<()> {
        self.construct_attributes(tree, node, &g.attributes, prefix, manager, fields)?;

        // Children claimed by name are not offered to unnamed typed elements.
        let named: BTreeSet<&str> = g
            .datasets
            .iter()
            .filter_map(|d| d.name.as_deref())
            .chain(g.groups.iter().filter_map(|s| s.name.as_deref()))
            .chain(g.links.iter().filter_map(|l| l.name.as_deref()))
            .collect();

        for d in &g.datasets {
            let Some(key) = dataset_key(d) else { continue };
            let path = child_path(prefix, key);
            if let Some(ty) = d.data_type() {
                let found = self.typed_candidates(tree, node, d.name.as_deref(), ty, false, &named, manager);
                self.construct_typed(tree, node, container, &path, found, d.quantity, manager, fields)?;
                continue;
            }
            let Some(ds) = d.name.as_deref().and_then(|n| tree.child(node, n)) else {
                continue;
            };
            let ds = tree.resolve_link(ds);
            if let (Some(field), Some(data)) = (self.field_at(&path), tree.data(ds)) {
                let value = self.data_to_field(tree, data, manager)?;
                fields.insert(field.to_string(), value);
            }
            self.construct_attributes(tree, ds, &d.attributes, &path, manager, fields)?;
        }

        for sub in &g.groups {
            let Some(key) = group_key(sub) else { continue };
            let path = child_path(prefix, key);
            if let Some(ty) = sub.data_type() {
                let found = self.typed_candidates(tree, node, sub.name.as_deref(), ty, true, &named, manager);
                self.construct_typed(tree, node, container, &path, found, sub.quantity, manager, fields)?;
                continue;
            }
            if let Some(child) = sub.name.as_deref().and_then(|n| tree.child(node, n)) {
                self.construct_group(tree, child, container, sub, &path, manager, fields)?;
            }
        }

        for l in &g.links {
            let path = child_path(prefix, link_key(l));
            let found: Vec<NodeId> = match l.name.as_deref() {
                Some(name) => tree.child(node, name).into_iter().collect(),
                None => tree
                    .children(node)
                    .into_iter()
                    .filter(|id| tree.get(*id).is_link() && !named.contains(tree.get(*id).name.as_str()))
                    .filter(|id| self.node_is_a(tree, tree.resolve_link(*id), &l.target_type, manager))
                    .collect(),
            };
            self.construct_typed(tree, node, container, &path, found, l.quantity, manager, fields)?;
        }
        Ok(())
    }

    fn node_is_a(&self, tree: &BuilderTree, node: NodeId, base: &str, manager: &BuildManager) -> bool {
        let Some(data_type) = tree.data_type(node) else {
            return false;
        };
        let namespace = tree
            .namespace(node)
            .or_else(|| manager.type_map().namespace_catalog().namespace_of(data_type));
        namespace.is_some_and(|ns| manager.type_map().is_sub_type(ns, data_type, base))
    }

    #[allow(clippy::too_many_arguments)]
    fn typed_candidates(
        &self,
        tree: &BuilderTree,
        node: NodeId,
        name: Option<&str>,
        data_type: &str,
        want_group: bool,
        named: &BTreeSet<&str>,
        manager: &BuildManager,
    ) -> Vec<NodeId> {
        if let Some(name) = name {
            return tree.child(node, name).into_iter().collect();
        }
        tree.children(node)
            .into_iter()
            .filter(|id| !named.contains(tree.get(*id).name.as_str()))
            .filter(|id| {
                let target = tree.resolve_link(*id);
                tree.get(target).is_group() == want_group && self.node_is_a(tree, target, data_type, manager)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn construct_typed(
        &self,
        tree: &BuilderTree,
        node: NodeId,
        container: &ContainerRef,
        path: &[String],
        found: Vec<NodeId>,
        quantity: Quantity,
        manager: &mut BuildManager,
        fields: &mut BTreeMap<String, Field>,
    ) -> Result<()> {
        let Some(field) = self.field_at(path) else {
            return Ok(());
        };
        if found.is_empty() {
            return Ok(());
        }
        self.check_quantity(quantity, found.len(), path)?;

        let mut children = Vec::with_capacity(found.len());
        for id in found {
            let child = manager.construct_node(tree, id)?;
            let embedded = !tree.get(id).is_link() && tree.get(id).parent == Some(node);
            if embedded && !Rc::ptr_eq(&child, container) {
                child.borrow_mut().set_parent(container);
            }
            children.push(child);
        }

        let value = if quantity.is_many() {
            Field::Children(children)
        } else {
            match children.into_iter().next() {
                Some(child) => Field::Child(child),
                None => return Ok(()),
            }
        };
        fields.insert(field.to_string(), value);
        Ok(())
    }
}
