//! Payload values and dtype tags shared by specs, containers and builders.
//!
//! A `Value` is a scalar or a (possibly nested) array of scalars, in the shape
//! JSON can carry. `Dtype` is the declared storage type; `Dtype::coerce` is the
//! single place where a value is converted to a declared type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Ordered dimension sizes; `None` leaves a dimension unconstrained.
pub type Shape = Vec<Option<usize>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Value>),
}

impl Value {
    /// Dimension sizes, outermost first. Scalars have an empty shape.
    ///
    /// Ragged arrays report the shape of their first element for inner
    /// dimensions.
    pub fn shape(&self) -> Vec<usize> {
        let mut dims = Vec::new();
        let mut cur = self;
        while let Value::Array(items) = cur {
            dims.push(items.len());
            match items.first() {
                Some(first) => cur = first,
                None => break,
            }
        }
        dims
    }

    /// Dtype inferred from the first scalar leaf. Empty arrays infer nothing.
    pub fn infer_dtype(&self) -> Option<Dtype> {
        match self {
            Value::Bool(_) => Some(Dtype::Bool),
            Value::Int(_) => Some(Dtype::Int64),
            Value::Float(_) => Some(Dtype::Float64),
            Value::Text(_) => Some(Dtype::Text),
            Value::Array(items) => items.first().and_then(Value::infer_dtype),
        }
    }

    /// Convert a JSON value. `null` and objects have no `Value` form.
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// `as i64` saturates at and beyond this bound.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Declared storage type of an attribute or dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DtypeRepr", into = "DtypeRepr")]
pub enum Dtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Any integer or float; values pass through unchanged.
    Numeric,
    Text,
    /// Object reference to a builder of `target_type` (or a subtype).
    Reference { target_type: String },
}

impl Dtype {
    pub fn is_reference(&self) -> bool {
        matches!(self, Dtype::Reference { .. })
    }

    fn int_range(&self) -> Option<(i64, i64)> {
        Some(match self {
            Dtype::Int8 => (i8::MIN as i64, i8::MAX as i64),
            Dtype::Int16 => (i16::MIN as i64, i16::MAX as i64),
            Dtype::Int32 => (i32::MIN as i64, i32::MAX as i64),
            Dtype::Int64 => (i64::MIN, i64::MAX),
            Dtype::UInt8 => (0, u8::MAX as i64),
            Dtype::UInt16 => (0, u16::MAX as i64),
            Dtype::UInt32 => (0, u32::MAX as i64),
            Dtype::UInt64 => (0, i64::MAX),
            _ => return None,
        })
    }

    /// Convert `value` elementwise to this dtype. `None` if any element does
    /// not fit (out of range, fractional float into an integer type, text
    /// into a numeric type, or any value into a reference type).
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if let Value::Array(items) = value {
            return items
                .iter()
                .map(|v| self.coerce(v))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array);
        }

        if let Some((lo, hi)) = self.int_range() {
            let i = match value {
                Value::Int(i) => *i,
                Value::Float(x) if x.fract() == 0.0 && (-TWO_POW_63..TWO_POW_63).contains(x) => {
                    *x as i64
                }
                _ => return None,
            };
            return (lo..=hi).contains(&i).then_some(Value::Int(i));
        }

        match (self, value) {
            (Dtype::Float32, Value::Int(i)) => Some(Value::Float(*i as f32 as f64)),
            (Dtype::Float32, Value::Float(x)) => Some(Value::Float(*x as f32 as f64)),
            (Dtype::Float64, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (Dtype::Float64, Value::Float(x)) => Some(Value::Float(*x)),
            (Dtype::Numeric, Value::Int(_) | Value::Float(_)) => Some(value.clone()),
            (Dtype::Bool, Value::Bool(_)) => Some(value.clone()),
            (Dtype::Text, Value::Text(_)) => Some(value.clone()),
            _ => None,
        }
    }
}

/// `true` when every dimension of `actual` matches the constraint in
/// `expected` (same rank, equal sizes or unconstrained).
pub fn shape_matches(expected: &[Option<usize>], actual: &[usize]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| e.is_none_or(|e| e == *a))
}

fn sized_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(u?int|float)(8|16|32|64)$").expect("static regex"))
}

impl FromStr for Dtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();

        if let Some(caps) = sized_name_re().captures(&name) {
            return match (&caps[1], &caps[2]) {
                ("int", "8") => Ok(Dtype::Int8),
                ("int", "16") => Ok(Dtype::Int16),
                ("int", "32") => Ok(Dtype::Int32),
                ("int", "64") => Ok(Dtype::Int64),
                ("uint", "8") => Ok(Dtype::UInt8),
                ("uint", "16") => Ok(Dtype::UInt16),
                ("uint", "32") => Ok(Dtype::UInt32),
                ("uint", "64") => Ok(Dtype::UInt64),
                ("float", "32") => Ok(Dtype::Float32),
                ("float", "64") => Ok(Dtype::Float64),
                _ => Err(format!("unsupported dtype '{s}'")),
            };
        }

        match name.as_str() {
            "bool" => Ok(Dtype::Bool),
            "short" => Ok(Dtype::Int16),
            "int" => Ok(Dtype::Int32),
            "long" => Ok(Dtype::Int64),
            "uint" => Ok(Dtype::UInt32),
            "float" => Ok(Dtype::Float32),
            "double" => Ok(Dtype::Float64),
            "numeric" => Ok(Dtype::Numeric),
            "text" | "utf" | "utf8" | "utf-8" | "ascii" | "str" => Ok(Dtype::Text),
            _ => Err(format!("unsupported dtype '{s}'")),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Dtype::Bool => "bool",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::UInt8 => "uint8",
            Dtype::UInt16 => "uint16",
            Dtype::UInt32 => "uint32",
            Dtype::UInt64 => "uint64",
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
            Dtype::Numeric => "numeric",
            Dtype::Text => "text",
            Dtype::Reference { target_type } => return write!(f, "object({target_type})"),
        };
        f.write_str(name)
    }
}

/// Serde shape of a dtype: a type name, or `{ "target_type": ..., "reftype": "object" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DtypeRepr {
    Name(String),
    Ref {
        target_type: String,
        #[serde(default = "default_reftype")]
        reftype: String,
    },
}

fn default_reftype() -> String {
    "object".to_string()
}

impl TryFrom<DtypeRepr> for Dtype {
    type Error = String;

    fn try_from(repr: DtypeRepr) -> Result<Self, Self::Error> {
        match repr {
            DtypeRepr::Name(name) => name.parse(),
            DtypeRepr::Ref {
                target_type,
                reftype,
            } => {
                if reftype != "object" {
                    return Err(format!("unsupported reference type '{reftype}'"));
                }
                Ok(Dtype::Reference { target_type })
            }
        }
    }
}

impl From<Dtype> for DtypeRepr {
    fn from(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Reference { target_type } => DtypeRepr::Ref {
                target_type,
                reftype: default_reftype(),
            },
            other => DtypeRepr::Name(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn shape_of_nested_arrays() {
        let v = Value::from(vec![vec![1i64, 2, 3], vec![4, 5, 6]]);
        assert_eq!(v.shape(), vec![2, 3]);
        assert_eq!(Value::Int(3).shape(), Vec::<usize>::new());
        assert_eq!(Value::Array(vec![]).shape(), vec![0]);
    }

    #[test]
    fn parses_dtype_aliases() {
        assert_eq!("int".parse::<Dtype>(), Ok(Dtype::Int32));
        assert_eq!("int8".parse::<Dtype>(), Ok(Dtype::Int8));
        assert_eq!("uint64".parse::<Dtype>(), Ok(Dtype::UInt64));
        assert_eq!("double".parse::<Dtype>(), Ok(Dtype::Float64));
        assert_eq!("text".parse::<Dtype>(), Ok(Dtype::Text));
        assert!("int12".parse::<Dtype>().is_err());
        assert!("complex".parse::<Dtype>().is_err());
    }

    #[test]
    fn dtype_serde_accepts_reference_objects() {
        let d: Dtype = serde_json::from_str(r#"{"target_type": "Foo", "reftype": "object"}"#).unwrap();
        assert_eq!(
            d,
            Dtype::Reference {
                target_type: "Foo".to_string()
            }
        );
        let d: Dtype = serde_json::from_str(r#""float""#).unwrap();
        assert_eq!(d, Dtype::Float32);
        assert_eq!(serde_json::to_string(&Dtype::Int8).unwrap(), r#""int8""#);
    }

    #[test]
    fn coerce_checks_integer_ranges() {
        assert_eq!(Dtype::Int8.coerce(&Value::Int(127)), Some(Value::Int(127)));
        assert_eq!(Dtype::Int8.coerce(&Value::Int(128)), None);
        assert_eq!(Dtype::UInt8.coerce(&Value::Int(-1)), None);
        assert_eq!(Dtype::Int32.coerce(&Value::Float(4.0)), Some(Value::Int(4)));
        assert_eq!(Dtype::Int32.coerce(&Value::Float(4.5)), None);
        assert_eq!(Dtype::Int64.coerce(&Value::Float(1e30)), None);
        assert_eq!(Dtype::Int64.coerce(&Value::Float(-1e30)), None);
        assert_eq!(Dtype::Int64.coerce(&Value::Float(f64::INFINITY)), None);
        assert_eq!(Dtype::Int64.coerce(&Value::Float(-1e18)), Some(Value::Int(-1_000_000_000_000_000_000)));
    }

    #[test]
    fn coerce_is_elementwise() {
        let v = Value::from(vec![6i64, 7]);
        assert_eq!(Dtype::Int8.coerce(&v), Some(v.clone()));
        assert_eq!(
            Dtype::Float64.coerce(&v),
            Some(Value::from(vec![6.0f64, 7.0]))
        );
        assert_eq!(Dtype::Text.coerce(&v), None);
        assert_eq!(Dtype::Int8.coerce(&Value::from(vec![1i64, 300])), None);
    }

    #[test]
    fn shape_constraints() {
        assert!(shape_matches(&[None], &[3]));
        assert!(shape_matches(&[Some(2), None], &[2, 9]));
        assert!(!shape_matches(&[Some(2)], &[3]));
        assert!(!shape_matches(&[None], &[1, 1]));
        assert!(!shape_matches(&[None], &[]));
    }

    #[test]
    fn json_conversion_rejects_null_and_objects() {
        assert_eq!(Value::from_json(&serde_json::json!(null)), None);
        assert_eq!(Value::from_json(&serde_json::json!({"a": 1})), None);
        assert_eq!(
            Value::from_json(&serde_json::json!([[0]])),
            Some(Value::Array(vec![Value::Array(vec![Value::Int(0)])]))
        );
        assert_eq!(Value::from_json(&serde_json::json!(1.5)), Some(Value::Float(1.5)));
    }
}
