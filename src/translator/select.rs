//! The select projector (§4.2).
//!
//! Anonymous-aggregate and constructor projections name their slots with
//! direct member access (`select(t => new { t.P1, t.P2, ... })`); this
//! crate's `Expr` is a
//! predicate/value-comparison language, not a general host-expression
//! evaluator, so projection slots are restricted to direct property
//! references (`Expr::Prop`). A slot built from a richer expression (a
//! nested method call) is rejected with a translation error rather than
//! silently evaluated against a stale stand-in — see DESIGN.md's "Open
//! Question" entry for the projector.

use crate::ast::{Expr, Projection};
use crate::attributes::DirectoryAttributes;
use crate::convert::{self, AttributeValue};
use crate::error::{Error, Result};
use crate::mapping::ClassMap;
use std::collections::HashMap;

/// The attribute set a projection needs loaded, in the order the
/// projection expression referenced them (§4.2 "preserves host-language
/// insertion order").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedProperties {
    /// `(property_name, attribute_name)` pairs, insertion-ordered.
    pub entries: Vec<(String, String)>,
}

impl SelectedProperties {
    pub fn attribute_names(&self) -> Vec<String> {
        self.entries.iter().map(|(_, a)| a.clone()).collect()
    }
}

/// The value a non-identity projection materialises.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectedValue {
    /// `select(t => t.P)`.
    Single(AttributeValue),
    /// `select_many(t => t.P)`: every value of a multi-valued property on
    /// one entry (§4.3 "bounded" — one entry's values, not a cross-entry
    /// flatten).
    Many(Vec<AttributeValue>),
    /// `select(t => new { ... })` / `select(t => new Foo { ... })`: a
    /// heterogeneous attribute-bag return (§9 design note 9b), since the
    /// host environment has no anonymous-type facility.
    Aggregate(HashMap<String, AttributeValue>),
}

fn single_prop_path(expr: &Expr) -> Result<&[String]> {
    match expr {
        Expr::Prop(path) => Ok(path),
        other => Err(Error::Translation(format!(
            "unsupported projection slot: {other:?} is not a direct property reference"
        ))),
    }
}

/// Compute the minimal attribute set a projection needs loaded (§8
/// property 3: projection minimality).
pub fn selected_properties<T>(projection: &Projection, class_map: &ClassMap<T>) -> Result<SelectedProperties> {
    let mut entries = Vec::new();
    match projection {
        Projection::Identity => {
            for p in &class_map.properties {
                entries.push((p.property_name.clone(), p.attribute_name.clone()));
            }
        }
        Projection::Member(path) | Projection::Many(path) => {
            let expr = Expr::Prop(path.clone());
            let name = single_prop_path(&expr)?;
            let prop = resolve(class_map, name)?;
            entries.push((prop.property_name.clone(), prop.attribute_name.clone()));
        }
        Projection::Anonymous(slots) | Projection::Constructor(_, slots) => {
            for (_, expr) in slots {
                let path = single_prop_path(expr)?;
                let prop = resolve(class_map, path)?;
                entries.push((prop.property_name.clone(), prop.attribute_name.clone()));
            }
        }
    }
    Ok(SelectedProperties { entries })
}

fn resolve<'a, T>(class_map: &'a ClassMap<T>, path: &[String]) -> Result<&'a crate::mapping::PropertyMap<T>> {
    if path.len() != 1 {
        return Err(Error::Translation(format!(
            "unsupported projection slot: nested member path {path:?}"
        )));
    }
    class_map
        .property(&path[0])
        .ok_or_else(|| Error::Mapping(format!("property {:?} is not mapped", path[0])))
}

/// Materialise a non-identity projection from a response entry's raw
/// attributes. Identity projections bypass this function entirely: the
/// caller already has the fully materialised `T` and returns it as-is.
pub fn materialize<T>(
    projection: &Projection,
    class_map: &ClassMap<T>,
    attrs: &DirectoryAttributes,
) -> Result<ProjectedValue> {
    match projection {
        Projection::Identity => Err(Error::Translation(
            "identity projections materialise T directly, not through the projector".into(),
        )),
        Projection::Member(path) => {
            let prop = resolve(class_map, path)?;
            let raw = attrs.get(&prop.attribute_name).unwrap_or(&[]);
            let value = decode_property(prop, raw)?;
            Ok(ProjectedValue::Single(value))
        }
        Projection::Many(path) => {
            let prop = resolve(class_map, path)?;
            let raw = attrs.get(&prop.attribute_name).unwrap_or(&[]);
            let values = raw
                .iter()
                .map(|v| convert::decode_one(&prop.converter, v))
                .collect::<Result<Vec<_>>>()?;
            Ok(ProjectedValue::Many(values))
        }
        Projection::Anonymous(slots) | Projection::Constructor(_, slots) => {
            let mut out = HashMap::with_capacity(slots.len());
            for (label, expr) in slots {
                let path = single_prop_path(expr)?;
                let prop = resolve(class_map, path)?;
                let raw = attrs.get(&prop.attribute_name).unwrap_or(&[]);
                out.insert(label.clone(), decode_property(prop, raw)?);
            }
            Ok(ProjectedValue::Aggregate(out))
        }
    }
}

fn decode_property<T>(prop: &crate::mapping::PropertyMap<T>, raw: &[Vec<u8>]) -> Result<AttributeValue> {
    if raw.is_empty() {
        return Ok(AttributeValue::Null);
    }
    if prop.multi_valued {
        convert::decode_multi(&prop.converter, raw)
    } else {
        convert::decode_one(&prop.converter, &raw[0])
    }
}
