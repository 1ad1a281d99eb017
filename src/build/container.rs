//! Typed in-memory objects and their class declarations.
//!
//! A `ContainerClass` is the representation a data type is bound to: a name,
//! a statically known ancestor chain, and the fields an instance must carry.
//! Instances are created through `ContainerClass::create(..).set(..).finish()`,
//! which is the only place field declarations are checked.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use uuid::Uuid;

pub type ContainerRef = Rc<RefCell<Container>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value held under one field name of a container.
#[derive(Clone)]
pub enum Field {
    Value(Value),
    /// Sub-object; embedded when this container is its parent, linked otherwise.
    Child(ContainerRef),
    Children(Vec<ContainerRef>),
    /// Value-level pointer, stored as an object reference.
    Reference(ContainerRef),
    References(Vec<ContainerRef>),
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Value(_) => FieldKind::Data,
            Field::Child(_) => FieldKind::Child,
            Field::Children(_) => FieldKind::Children,
            Field::Reference(_) => FieldKind::Reference,
            Field::References(_) => FieldKind::References,
        }
    }

    /// Sub-objects held directly by this field (not references).
    pub fn children(&self) -> Vec<ContainerRef> {
        match self {
            Field::Child(c) => vec![c.clone()],
            Field::Children(cs) => cs.clone(),
            _ => Vec::new(),
        }
    }

    /// Every container this field points at, children and references alike.
    pub fn targets(&self) -> Vec<ContainerRef> {
        match self {
            Field::Value(_) => Vec::new(),
            Field::Child(c) | Field::Reference(c) => vec![c.clone()],
            Field::Children(cs) | Field::References(cs) => cs.clone(),
        }
    }
}

// Children are printed by identity only; a full dump could loop through references.
impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn short(c: &ContainerRef) -> String {
            match c.try_borrow() {
                Ok(c) => format!("{}({})", c.name, c.object_id),
                Err(_) => "<borrowed>".to_string(),
            }
        }
        match self {
            Field::Value(v) => write!(f, "Value({v})"),
            Field::Child(c) => write!(f, "Child({})", short(c)),
            Field::Reference(c) => write!(f, "Reference({})", short(c)),
            Field::Children(cs) => {
                let names: Vec<String> = cs.iter().map(short).collect();
                write!(f, "Children({})", names.join(", "))
            }
            Field::References(cs) => {
                let names: Vec<String> = cs.iter().map(short).collect();
                write!(f, "References({})", names.join(", "))
            }
        }
    }
}

impl From<Value> for Field {
    fn from(v: Value) -> Self {
        Field::Value(v)
    }
}

impl From<ContainerRef> for Field {
    fn from(c: ContainerRef) -> Self {
        Field::Child(c)
    }
}

impl From<Vec<ContainerRef>> for Field {
    fn from(cs: Vec<ContainerRef>) -> Self {
        Field::Children(cs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Data,
    Child,
    Children,
    Reference,
    References,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            FieldKind::Data => "data",
            FieldKind::Child => "a child object",
            FieldKind::Children => "a list of child objects",
            FieldKind::Reference => "an object reference",
            FieldKind::References => "a list of object references",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerClass {
    lineage: Vec<String>,
    fields: Vec<FieldDecl>,
    open: bool,
}

impl ContainerClass {
    /// A class that only accepts the fields it declares.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lineage: vec![name.into()],
            fields: Vec::new(),
            open: false,
        }
    }

    /// Derived class: inherits the base's lineage and field declarations.
    pub fn extends(name: impl Into<String>, base: &ContainerClass) -> Self {
        let mut lineage = vec![name.into()];
        lineage.extend(base.lineage.iter().cloned());
        Self {
            lineage,
            fields: base.fields.clone(),
            open: base.open,
        }
    }

    /// A class accepting any field, used for types without a hand-written class.
    pub fn generic(lineage: Vec<String>) -> Self {
        Self {
            lineage,
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.declare(name.into(), kind, true);
        self
    }

    pub fn optional_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.declare(name.into(), kind, false);
        self
    }

    fn declare(&mut self, name: String, kind: FieldKind, required: bool) {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldDecl {
            name,
            kind,
            required,
        });
    }

    pub fn name(&self) -> &str {
        &self.lineage[0]
    }

    /// This class followed by its ancestors, most derived first.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn decl(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn create(self: &Rc<Self>, name: impl Into<String>) -> ContainerInit {
        ContainerInit {
            class: self.clone(),
            name: name.into(),
            object_id: None,
            fields: BTreeMap::new(),
            adopt_children: true,
        }
    }

    /// Check a field map against the declarations.
    pub fn validate(
        &self,
        object_id: ObjectId,
        fields: &BTreeMap<String, Field>,
    ) -> Result<()> {
        for decl in &self.fields {
            match fields.get(&decl.name) {
                None if decl.required => {
                    return Err(Error::MissingRequiredField {
                        type_name: self.name().to_string(),
                        object_id: object_id.to_string(),
                        field: decl.name.clone(),
                        reason: "field not set".to_string(),
                    });
                }
                Some(field) if field.kind() != decl.kind => {
                    return Err(Error::FieldTypeMismatch {
                        type_name: self.name().to_string(),
                        field: decl.name.clone(),
                        expected: decl.kind.to_string(),
                        got: field.kind().to_string(),
                    });
                }
                _ => {}
            }
        }

        if !self.open {
            if let Some(extra) = fields.keys().find(|k| self.decl(k).is_none()) {
                return Err(Error::FieldTypeMismatch {
                    type_name: self.name().to_string(),
                    field: extra.clone(),
                    expected: "a declared field".to_string(),
                    got: "an undeclared field".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Pending container construction; see `ContainerClass::create`.
pub struct ContainerInit {
    class: Rc<ContainerClass>,
    name: String,
    object_id: Option<ObjectId>,
    fields: BTreeMap<String, Field>,
    adopt_children: bool,
}

impl ContainerInit {
    pub fn object_id(mut self, id: ObjectId) -> Self {
        self.object_id = Some(id);
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Field>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set_value(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, Field::Value(value.into()))
    }

    /// Set `field` only when `value` is present.
    pub fn set_opt(self, field: impl Into<String>, value: Option<impl Into<Field>>) -> Self {
        match value {
            Some(v) => self.set(field, v),
            None => self,
        }
    }

    /// Leave the parent of child fields untouched.
    pub fn without_adoption(mut self) -> Self {
        self.adopt_children = false;
        self
    }

    /// Validate the fields and produce the container. Children without a
    /// parent are adopted by the new container.
    pub fn finish(self) -> Result<ContainerRef> {
        let object_id = self.object_id.unwrap_or_default();
        self.class.validate(object_id, &self.fields)?;

        let container = Rc::new(RefCell::new(Container {
            object_id,
            class: self.class,
            name: self.name,
            fields: self.fields,
            parent: Weak::new(),
        }));

        if self.adopt_children {
            let children: Vec<ContainerRef> = container
                .borrow()
                .fields
                .values()
                .flat_map(Field::children)
                .collect();
            for child in children {
                if Rc::ptr_eq(&child, &container) {
                    continue;
                }
                let mut child = child.borrow_mut();
                if child.parent().is_none() {
                    child.set_parent(&container);
                }
            }
        }
        Ok(container)
    }
}

pub struct Container {
    object_id: ObjectId,
    class: Rc<ContainerClass>,
    name: String,
    fields: BTreeMap<String, Field>,
    parent: Weak<RefCell<Container>>,
}

impl Container {
    /// An empty container that skips field validation. Used by the construct
    /// pass, which fills fields before validating them.
    pub(crate) fn new_unchecked(
        class: Rc<ContainerClass>,
        name: String,
        object_id: ObjectId,
    ) -> ContainerRef {
        Rc::new(RefCell::new(Container {
            object_id,
            class,
            name,
            fields: BTreeMap::new(),
            parent: Weak::new(),
        }))
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn class(&self) -> &Rc<ContainerClass> {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &BTreeMap<String, Field> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Field::Value(v)) => Some(v),
            _ => None,
        }
    }

    pub fn child(&self, name: &str) -> Option<ContainerRef> {
        match self.fields.get(name) {
            Some(Field::Child(c)) => Some(c.clone()),
            _ => None,
        }
    }

    /// Replace a field after construction. Declared kinds are still enforced.
    pub fn set_field(&mut self, name: &str, field: Field) -> Result<()> {
        if let Some(decl) = self.class.decl(name) {
            if decl.kind != field.kind() {
                return Err(Error::FieldTypeMismatch {
                    type_name: self.class.name().to_string(),
                    field: name.to_string(),
                    expected: decl.kind.to_string(),
                    got: field.kind().to_string(),
                });
            }
        }
        self.fields.insert(name.to_string(), field);
        Ok(())
    }

    pub(crate) fn replace_fields(&mut self, fields: BTreeMap<String, Field>) {
        self.fields = fields;
    }

    pub fn parent(&self) -> Option<ContainerRef> {
        self.parent.upgrade()
    }

    pub fn set_parent(&mut self, parent: &ContainerRef) {
        self.parent = Rc::downgrade(parent);
    }

    /// `true` if `candidate` is this container's declared parent.
    pub fn is_child_of(&self, candidate: &ContainerRef) -> bool {
        self.parent
            .upgrade()
            .is_some_and(|p| Rc::ptr_eq(&p, candidate))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Container")
            .field("class", &self.class.name())
            .field("name", &self.name)
            .field("object_id", &self.object_id)
            .field("fields", &self.fields)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn foo_class() -> Rc<ContainerClass> {
        Rc::new(
            ContainerClass::new("Foo")
                .field("my_data", FieldKind::Data)
                .field("attr1", FieldKind::Data)
                .optional_field("attr2", FieldKind::Data)
                .optional_field("sub_foo", FieldKind::Child),
        )
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let err = foo_class()
            .create("foo")
            .set_value("my_data", vec![1i64])
            .finish()
            .unwrap_err();
        assert!(matches!(err, Error::MissingRequiredField { ref field, .. } if field == "attr1"));
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let class = foo_class();
        let other = class
            .create("x")
            .set_value("my_data", vec![1i64])
            .set_value("attr1", "a")
            .finish()
            .unwrap();
        let err = class
            .create("foo")
            .set("my_data", other)
            .set_value("attr1", "a")
            .finish()
            .unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch { ref field, .. } if field == "my_data"));
    }

    #[test]
    fn undeclared_field_is_rejected_by_closed_classes() {
        let err = foo_class()
            .create("foo")
            .set_value("my_data", vec![1i64])
            .set_value("attr1", "a")
            .set_value("bogus", 1i64)
            .finish()
            .unwrap_err();
        assert!(matches!(err, Error::FieldTypeMismatch { ref field, .. } if field == "bogus"));
    }

    #[test]
    fn children_are_adopted() {
        let class = foo_class();
        let sub = class
            .create("sub_foo")
            .set_value("my_data", vec![-1i64])
            .set_value("attr1", "OLD")
            .finish()
            .unwrap();
        let foo = class
            .create("foo1")
            .set_value("my_data", vec![1i64, 2, 3])
            .set_value("attr1", "old")
            .set("sub_foo", sub.clone())
            .finish()
            .unwrap();

        assert!(sub.borrow().is_child_of(&foo));
        let via_field = foo.borrow().child("sub_foo").unwrap();
        assert!(Rc::ptr_eq(&via_field, &sub));
        assert_eq!(foo.borrow().value("attr1"), Some(&Value::from("old")));
    }

    #[test]
    fn derived_class_lineage() {
        let base = ContainerClass::new("Base").field("a", FieldKind::Data);
        let derived = ContainerClass::extends("Derived", &base).optional_field("b", FieldKind::Data);
        assert_eq!(derived.lineage(), &["Derived".to_string(), "Base".to_string()]);
        assert!(derived.decl("a").unwrap().required);
        assert_eq!(derived.name(), "Derived");
    }

    #[test]
    fn object_ids_roundtrip_through_text() {
        let id = ObjectId::new();
        assert_eq!(ObjectId::parse(&id.to_string()), Some(id));
        assert_eq!(ObjectId::parse("not-a-uuid"), None);
    }
}
