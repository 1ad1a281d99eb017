//! Schema nodes: groups, datasets, attributes and links.
//!
//! JSON shape of a top-level spec (one of):
//! {
//!   "group": {
//!     "data_type_def": "Foo",
//!     "attributes": [{ "name": "attr1", "dtype": "text" }],
//!     "datasets": [{ "name": "my_data", "dtype": "int", "shape": [null] }],
//!     "groups": [{ "name": "sub_foo", "data_type_inc": "Foo", "quantity": "?" }]
//!   }
//! }
//! { "dataset": { "data_type_def": "Bar", "dtype": "float", ... } }

use crate::value::{Dtype, Shape, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many occurrences of an element are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr", into = "QuantityRepr")]
pub enum Quantity {
    #[default]
    One,
    Optional,
    ZeroOrMany,
    OneOrMany,
    Exact(usize),
}

impl Quantity {
    pub fn is_required(self) -> bool {
        !matches!(self, Quantity::Optional | Quantity::ZeroOrMany)
    }

    /// Elements that may occur more than once map to a list-valued field.
    pub fn is_many(self) -> bool {
        match self {
            Quantity::ZeroOrMany | Quantity::OneOrMany => true,
            Quantity::Exact(n) => n > 1,
            Quantity::One | Quantity::Optional => false,
        }
    }

    pub fn allows(self, count: usize) -> bool {
        match self {
            Quantity::One => count == 1,
            Quantity::Optional => count <= 1,
            Quantity::ZeroOrMany => true,
            Quantity::OneOrMany => count >= 1,
            Quantity::Exact(n) => count == n,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Quantity::One => write!(f, "1"),
            Quantity::Optional => write!(f, "?"),
            Quantity::ZeroOrMany => write!(f, "*"),
            Quantity::OneOrMany => write!(f, "+"),
            Quantity::Exact(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Count(usize),
    Symbol(String),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = String;

    fn try_from(repr: QuantityRepr) -> Result<Self, Self::Error> {
        match repr {
            QuantityRepr::Count(1) => Ok(Quantity::One),
            QuantityRepr::Count(0) => Err("quantity must be at least 1".to_string()),
            QuantityRepr::Count(n) => Ok(Quantity::Exact(n)),
            QuantityRepr::Symbol(s) => match s.as_str() {
                "?" | "zero_or_one" => Ok(Quantity::Optional),
                "*" | "zero_or_many" => Ok(Quantity::ZeroOrMany),
                "+" | "one_or_many" => Ok(Quantity::OneOrMany),
                other => Err(format!("unknown quantity '{other}'")),
            },
        }
    }
}

impl From<Quantity> for QuantityRepr {
    fn from(q: Quantity) -> Self {
        match q {
            Quantity::One => QuantityRepr::Count(1),
            Quantity::Exact(n) => QuantityRepr::Count(n),
            other => QuantityRepr::Symbol(other.to_string()),
        }
    }
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,

    #[serde(default)]
    pub doc: String,

    #[serde(default)]
    pub dtype: Option<Dtype>,

    #[serde(default)]
    pub shape: Option<Shape>,

    #[serde(default = "yes")]
    pub required: bool,

    /// Fixed value written regardless of the container's fields.
    #[serde(default)]
    pub value: Option<Value>,

    #[serde(default)]
    pub default_value: Option<Value>,
}

impl AttributeSpec {
    pub fn new(name: impl Into<String>, dtype: Dtype) -> Self {
        Self {
            name: name.into(),
            doc: String::new(),
            dtype: Some(dtype),
            shape: None,
            required: true,
            value: None,
            default_value: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = Some(shape);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub doc: String,

    #[serde(default)]
    pub data_type_def: Option<String>,

    #[serde(default)]
    pub data_type_inc: Option<String>,

    #[serde(default)]
    pub quantity: Quantity,

    #[serde(default)]
    pub dtype: Option<Dtype>,

    #[serde(default)]
    pub shape: Option<Shape>,

    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

impl DatasetSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// The type this element is an instance of (its own or the one it includes).
    pub fn data_type(&self) -> Option<&str> {
        self.data_type_def.as_deref().or(self.data_type_inc.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub doc: String,

    pub target_type: String,

    #[serde(default)]
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub doc: String,

    #[serde(default)]
    pub data_type_def: Option<String>,

    #[serde(default)]
    pub data_type_inc: Option<String>,

    #[serde(default)]
    pub quantity: Quantity,

    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,

    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,

    #[serde(default)]
    pub groups: Vec<GroupSpec>,

    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

impl GroupSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_dataset(&self, name: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.name.as_deref() == Some(name))
    }

    pub fn get_group(&self, name: &str) -> Option<&GroupSpec> {
        self.groups.iter().find(|g| g.name.as_deref() == Some(name))
    }

    pub fn get_link(&self, name: &str) -> Option<&LinkSpec> {
        self.links.iter().find(|l| l.name.as_deref() == Some(name))
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type_def.as_deref().or(self.data_type_inc.as_deref())
    }
}

/// A registrable spec: a group or dataset that defines a data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeSpec {
    Group(GroupSpec),
    Dataset(DatasetSpec),
}

impl TypeSpec {
    pub fn data_type_def(&self) -> Option<&str> {
        match self {
            TypeSpec::Group(g) => g.data_type_def.as_deref(),
            TypeSpec::Dataset(d) => d.data_type_def.as_deref(),
        }
    }

    pub fn data_type_inc(&self) -> Option<&str> {
        match self {
            TypeSpec::Group(g) => g.data_type_inc.as_deref(),
            TypeSpec::Dataset(d) => d.data_type_inc.as_deref(),
        }
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        match self {
            TypeSpec::Group(g) => &g.attributes,
            TypeSpec::Dataset(d) => &d.attributes,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, TypeSpec::Group(_))
    }

    pub fn as_group(&self) -> Option<&GroupSpec> {
        match self {
            TypeSpec::Group(g) => Some(g),
            TypeSpec::Dataset(_) => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&DatasetSpec> {
        match self {
            TypeSpec::Dataset(d) => Some(d),
            TypeSpec::Group(_) => None,
        }
    }

    /// Nested specs (at any depth) that define their own data type.
    pub fn nested_type_defs(&self) -> Vec<TypeSpec> {
        fn walk(group: &GroupSpec, out: &mut Vec<TypeSpec>) {
            for d in &group.datasets {
                if d.data_type_def.is_some() {
                    out.push(TypeSpec::Dataset(d.clone()));
                }
            }
            for g in &group.groups {
                if g.data_type_def.is_some() {
                    out.push(TypeSpec::Group(g.clone()));
                }
                walk(g, out);
            }
        }

        let mut out = Vec::new();
        if let TypeSpec::Group(g) = self {
            walk(g, &mut out);
        }
        out
    }
}

impl From<GroupSpec> for TypeSpec {
    fn from(g: GroupSpec) -> Self {
        TypeSpec::Group(g)
    }
}

impl From<DatasetSpec> for TypeSpec {
    fn from(d: DatasetSpec) -> Self {
        TypeSpec::Dataset(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn quantity_from_json() {
        let q: Quantity = serde_json::from_str(r#""?""#).unwrap();
        assert_eq!(q, Quantity::Optional);
        let q: Quantity = serde_json::from_str("3").unwrap();
        assert_eq!(q, Quantity::Exact(3));
        let q: Quantity = serde_json::from_str("1").unwrap();
        assert_eq!(q, Quantity::One);
        assert!(serde_json::from_str::<Quantity>(r#""many""#).is_err());
    }

    #[test]
    fn quantity_rules() {
        assert!(Quantity::Optional.allows(0));
        assert!(!Quantity::One.allows(0));
        assert!(Quantity::ZeroOrMany.is_many());
        assert!(!Quantity::Optional.is_required());
        assert!(Quantity::Exact(2).allows(2));
        assert!(!Quantity::Exact(2).allows(1));
    }

    #[test]
    fn group_spec_from_json() {
        let spec: TypeSpec = serde_json::from_str(
            r#"{
                "group": {
                    "data_type_def": "Foo",
                    "attributes": [{ "name": "attr1", "dtype": "text" }],
                    "datasets": [{
                        "name": "my_data",
                        "dtype": "int",
                        "shape": [null],
                        "attributes": [{ "name": "attr2", "dtype": "int", "required": false }]
                    }],
                    "groups": [{ "name": "sub_foo", "data_type_inc": "Foo", "quantity": "?" }]
                }
            }"#,
        )
        .unwrap();

        let group = spec.as_group().unwrap();
        assert_eq!(spec.data_type_def(), Some("Foo"));
        assert!(group.get_attribute("attr1").unwrap().required);
        let my_data = group.get_dataset("my_data").unwrap();
        assert_eq!(my_data.shape, Some(vec![None]));
        assert!(!my_data.get_attribute("attr2").unwrap().required);
        assert_eq!(group.get_group("sub_foo").unwrap().quantity, Quantity::Optional);
    }

    #[test]
    fn nested_type_defs_are_collected() {
        let mut inner = GroupSpec::named("inner");
        inner.data_type_def = Some("Inner".to_string());
        let mut outer = GroupSpec::default();
        outer.data_type_def = Some("Outer".to_string());
        outer.groups.push(inner);

        let nested = TypeSpec::Group(outer).nested_type_defs();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].data_type_def(), Some("Inner"));
    }
}
