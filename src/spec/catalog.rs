//! Registry of data type specs, keyed by `data_type_def`.
//!
//! Specs are stored as registered. `get_spec` flattens the `data_type_inc`
//! chain on every call: fields left unset on the derived spec are taken from
//! its base, and nested elements merge by name with the derived element
//! winning.

use crate::error::{Error, Result};
use crate::spec::types::{AttributeSpec, DatasetSpec, GroupSpec, LinkSpec, TypeSpec};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, Default)]
pub struct SpecCatalog {
    specs: BTreeMap<String, TypeSpec>,
    sources: BTreeMap<String, String>,
}

impl SpecCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `spec` and every nested spec that defines its own type, at
    /// any depth. Nothing is registered unless every type name is new.
    pub fn register_spec(&mut self, spec: impl Into<TypeSpec>, source: &str) -> Result<()> {
        let spec = spec.into();
        if spec.data_type_def().is_none() {
            return Err(Error::AnonymousSpec {
                source_name: source.to_string(),
            });
        }

        let mut batch = spec.nested_type_defs();
        batch.insert(0, spec);

        let mut names: Vec<String> = Vec::with_capacity(batch.len());
        for s in &batch {
            let Some(type_name) = s.data_type_def() else { continue };
            if let Some(prev) = self.sources.get(type_name) {
                return Err(Error::DuplicateType {
                    type_name: type_name.to_string(),
                    source_name: prev.clone(),
                });
            }
            if names.iter().any(|n| n == type_name) {
                return Err(Error::DuplicateType {
                    type_name: type_name.to_string(),
                    source_name: source.to_string(),
                });
            }
            names.push(type_name.to_string());
        }

        for (type_name, s) in names.into_iter().zip(batch) {
            log::debug!("registered spec '{}' from '{}'", type_name, source);
            self.specs.insert(type_name.clone(), s);
            self.sources.insert(type_name, source.to_string());
        }
        Ok(())
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.specs.contains_key(type_name)
    }

    /// The spec exactly as registered, without inherited fields.
    pub fn get_raw_spec(&self, type_name: &str) -> Result<&TypeSpec> {
        self.specs
            .get(type_name)
            .ok_or_else(|| Error::unknown_type(type_name))
    }

    pub fn get_source(&self, type_name: &str) -> Option<&str> {
        self.sources.get(type_name).map(String::as_str)
    }

    /// Distinct sources in registration-name order.
    pub fn get_sources(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.sources.values().map(String::as_str).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// `type_name` followed by its ancestors, most derived first.
    pub fn get_hierarchy(&self, type_name: &str) -> Result<Vec<String>> {
        let mut chain = vec![type_name.to_string()];
        let mut cur = self.get_raw_spec(type_name)?;
        while let Some(base) = cur.data_type_inc() {
            if chain.iter().any(|t| t == base) {
                chain.push(base.to_string());
                return Err(Error::InheritanceCycle(chain));
            }
            chain.push(base.to_string());
            cur = self.get_raw_spec(base)?;
        }
        Ok(chain)
    }

    /// `true` if `type_name` is `base` or inherits from it.
    pub fn is_sub_type(&self, type_name: &str, base: &str) -> bool {
        self.get_hierarchy(type_name)
            .map(|chain| chain.iter().any(|t| t == base))
            .unwrap_or(false)
    }

    /// The inheritance-resolved spec for `type_name`.
    pub fn get_spec(&self, type_name: &str) -> Result<Rc<TypeSpec>> {
        let chain = self.get_hierarchy(type_name)?;

        // Fold from the root ancestor down to the requested type.
        let mut resolved: Option<TypeSpec> = None;
        for name in chain.iter().rev() {
            let spec = self.get_raw_spec(name)?.clone();
            resolved = Some(match resolved {
                None => spec,
                Some(base) => merge_type_spec(base, spec, name)?,
            });
        }

        resolved
            .map(Rc::new)
            .ok_or_else(|| Error::unknown_type(type_name))
    }
}

fn merge_type_spec(base: TypeSpec, derived: TypeSpec, type_name: &str) -> Result<TypeSpec> {
    match (base, derived) {
        (TypeSpec::Group(b), TypeSpec::Group(d)) => Ok(TypeSpec::Group(merge_group(b, d))),
        (TypeSpec::Dataset(b), TypeSpec::Dataset(d)) => Ok(TypeSpec::Dataset(merge_dataset(b, d))),
        (base, _) => Err(Error::SpecKindMismatch {
            type_name: type_name.to_string(),
            base: base.data_type_def().unwrap_or_default().to_string(),
        }),
    }
}

fn merge_group(base: GroupSpec, derived: GroupSpec) -> GroupSpec {
    GroupSpec {
        name: derived.name.or(base.name),
        doc: if derived.doc.is_empty() { base.doc } else { derived.doc },
        data_type_def: derived.data_type_def,
        data_type_inc: derived.data_type_inc,
        quantity: derived.quantity,
        attributes: merge_attributes(base.attributes, derived.attributes),
        datasets: merge_by_key(base.datasets, derived.datasets, |d| {
            d.name.clone().or_else(|| d.data_type().map(str::to_string))
        }),
        groups: merge_by_key(base.groups, derived.groups, |g| {
            g.name.clone().or_else(|| g.data_type().map(str::to_string))
        }),
        links: merge_by_key(base.links, derived.links, |l: &LinkSpec| {
            l.name.clone().or_else(|| Some(l.target_type.clone()))
        }),
    }
}

fn merge_dataset(base: DatasetSpec, derived: DatasetSpec) -> DatasetSpec {
    DatasetSpec {
        name: derived.name.or(base.name),
        doc: if derived.doc.is_empty() { base.doc } else { derived.doc },
        data_type_def: derived.data_type_def,
        data_type_inc: derived.data_type_inc,
        quantity: derived.quantity,
        dtype: derived.dtype.or(base.dtype),
        shape: derived.shape.or(base.shape),
        attributes: merge_attributes(base.attributes, derived.attributes),
    }
}

fn merge_attributes(base: Vec<AttributeSpec>, derived: Vec<AttributeSpec>) -> Vec<AttributeSpec> {
    merge_by_key(base, derived, |a| Some(a.name.clone()))
}

/// Base elements in order, each replaced by the derived element with the same
/// key; derived elements with new keys are appended.
fn merge_by_key<T>(base: Vec<T>, derived: Vec<T>, key: impl Fn(&T) -> Option<String>) -> Vec<T> {
    let mut derived: Vec<Option<T>> = derived.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(base.len() + derived.len());

    for b in base {
        let k = key(&b);
        let overridden = derived.iter_mut().find(|slot| match slot {
            Some(d) => k.is_some() && key(d) == k,
            None => false,
        });
        match overridden {
            Some(slot) => out.extend(slot.take()),
            None => out.push(b),
        }
    }
    out.extend(derived.into_iter().flatten());
    out
}
