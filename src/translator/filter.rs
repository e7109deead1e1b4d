//! The filter translator (§4.1): lowers a predicate subtree into an
//! RFC 4515 filter string, or reports that the predicate is statically
//! false.

use crate::ast::{BitwiseOp, Comparison, Expr, Literal, StringMethod};
use crate::convert::ConverterKind;
use crate::error::{Error, Result};
use crate::escape::{escape, escape_bytes, escape_pattern};
use crate::mapping::ClassMap;

/// Extensible-match OID for a bitwise AND mask test.
const BIT_AND_OID: &str = "1.2.840.113556.1.4.803";
/// Extensible-match OID for a bitwise OR mask test.
const BIT_OR_OID: &str = "1.2.840.113556.1.4.804";

/// Result of translating the `where` predicate tree of a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterTranslation {
    /// The complete filter string, including object-class/category
    /// gating. `None` only when `yield_no_results` is set.
    pub filter: Option<String>,
    /// Set when the predicate is provably false; the command dispatcher
    /// must not contact the server at all (§8 property 6).
    pub yield_no_results: bool,
}

/// A lowered predicate, prior to object-class gating.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Predicate {
    True,
    False,
    Filter(String),
}

/// Translate a `where`-clause predicate (or `None` for no predicate at
/// all) against `class_map`, producing the final gated filter string.
pub fn translate<T>(expr: Option<&Expr>, class_map: &ClassMap<T>) -> Result<FilterTranslation> {
    let predicate = match expr {
        Some(expr) => lower(expr, class_map)?,
        None => Predicate::True,
    };
    match predicate {
        Predicate::False => Ok(FilterTranslation {
            filter: None,
            yield_no_results: true,
        }),
        Predicate::True => Ok(FilterTranslation {
            filter: Some(gate(class_map, None)),
            yield_no_results: false,
        }),
        Predicate::Filter(f) => Ok(FilterTranslation {
            filter: Some(gate(class_map, Some(f))),
            yield_no_results: false,
        }),
    }
}

/// Build an object-class/category gating filter without a `ClassMap<T>`,
/// for the untyped `query(naming_context, scope, object_class?, ...)`
/// overload (§6) that has no mapped type to read gating metadata from.
pub fn gate_untyped(object_classes: &[String], object_category: Option<&str>) -> String {
    let mut terms: Vec<String> = object_classes
        .iter()
        .map(|c| format!("(objectClass={})", escape(c.as_str())))
        .collect();
    if let Some(category) = object_category {
        terms.push(format!("(objectCategory={})", escape(category)));
    }
    match terms.len() {
        0 => "(objectClass=*)".to_owned(),
        1 => terms.into_iter().next().unwrap(),
        _ => format!("(&{})", terms.concat()),
    }
}

fn gate<T>(class_map: &ClassMap<T>, inner: Option<String>) -> String {
    let mut terms: Vec<String> = Vec::new();
    for (class, include) in &class_map.object_classes {
        if *include {
            terms.push(format!("(objectClass={})", escape(class.as_str())));
        }
    }
    if let Some((category, include)) = &class_map.object_category {
        if *include {
            terms.push(format!("(objectCategory={})", escape(category.as_str())));
        }
    }
    if let Some(inner) = inner {
        terms.push(inner);
    }
    match terms.len() {
        0 => "(objectClass=*)".to_owned(),
        1 => terms.into_iter().next().unwrap(),
        _ => format!("(&{})", terms.concat()),
    }
}

fn resolve_attribute<'a, T>(path: &[String], class_map: &'a ClassMap<T>) -> Result<(&'a str, &'a ConverterKind)> {
    if path.len() != 1 {
        return Err(Error::Translation(format!(
            "unsupported predicate: nested member path {path:?} in a filter clause"
        )));
    }
    let prop = class_map.property(&path[0]).ok_or_else(|| {
        Error::Mapping(format!("property {:?} is not mapped", path[0]))
    })?;
    Ok((prop.attribute_name.as_str(), &prop.converter))
}

fn format_literal(converter: &ConverterKind, lit: &Literal) -> Result<String> {
    match (converter, lit) {
        (_, Literal::Null) => Err(Error::Translation("null literal outside of a null comparison".into())),
        (ConverterKind::ByteArray | ConverterKind::Guid | ConverterKind::Sid, Literal::Bytes(b)) => {
            Ok(escape_bytes(b))
        }
        (ConverterKind::Bool, Literal::Bool(b)) => Ok(if *b { "TRUE".to_owned() } else { "FALSE".to_owned() }),
        (ConverterKind::Int64 | ConverterKind::EnumAsInt, Literal::Int(n)) => Ok(n.to_string()),
        (_, Literal::Str(s)) => Ok(escape(s.as_str()).into_owned()),
        (_, Literal::Int(n)) => Ok(n.to_string()),
        (converter, lit) => Err(Error::Translation(format!(
            "literal {lit:?} does not match converter {converter:?}"
        ))),
    }
}

fn lower<T>(expr: &Expr, class_map: &ClassMap<T>) -> Result<Predicate> {
    match expr {
        Expr::Constant(Literal::Bool(b)) => Ok(if *b { Predicate::True } else { Predicate::False }),

        Expr::Compare(op, left, right) => {
            let Expr::Prop(path) = left.as_ref() else {
                return Err(Error::Translation(format!(
                    "unsupported predicate: comparison left-hand side must be a property reference, got {left:?}"
                )));
            };
            let (attr, converter) = resolve_attribute(path, class_map)?;
            let is_null = matches!(right.as_ref(), Expr::Constant(Literal::Null));
            match (op, is_null) {
                (Comparison::Eq, true) => Ok(Predicate::Filter(format!("(!({attr}=*))"))),
                (Comparison::Ne, true) => Ok(Predicate::Filter(format!("({attr}=*)"))),
                (_, true) => Err(Error::Translation(format!(
                    "unsupported predicate: null is only valid with == or !=, attribute {attr}"
                ))),
                (Comparison::Eq, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    Ok(Predicate::Filter(format!("({attr}={})", format_literal(converter, lit)?)))
                }
                (Comparison::Ne, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    Ok(Predicate::Filter(format!("(!({attr}={}))", format_literal(converter, lit)?)))
                }
                (Comparison::Ge, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    Ok(Predicate::Filter(format!("({attr}>={})", format_literal(converter, lit)?)))
                }
                (Comparison::Le, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    Ok(Predicate::Filter(format!("({attr}<={})", format_literal(converter, lit)?)))
                }
                (Comparison::Gt, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    let v = format_literal(converter, lit)?;
                    Ok(Predicate::Filter(format!("(&({attr}>={v})(!({attr}={v})))")))
                }
                (Comparison::Lt, false) => {
                    let Expr::Constant(lit) = right.as_ref() else {
                        return Err(Error::Translation("unsupported predicate: non-constant comparison value".into()));
                    };
                    let v = format_literal(converter, lit)?;
                    Ok(Predicate::Filter(format!("(&({attr}<={v})(!({attr}={v})))")))
                }
            }
        }

        Expr::StringCall(target, method, arg) => {
            let Expr::Prop(path) = target.as_ref() else {
                return Err(Error::Translation(format!(
                    "unsupported predicate: string method target must be a property reference, got {target:?}"
                )));
            };
            let (attr, _) = resolve_attribute(path, class_map)?;
            let filter = match method {
                StringMethod::StartsWith => format!("({attr}={}*)", escape(arg.as_str())),
                StringMethod::EndsWith => format!("({attr}=*{})", escape(arg.as_str())),
                StringMethod::Contains => format!("({attr}=*{}*)", escape(arg.as_str())),
                StringMethod::Matches => format!("({attr}={})", escape_pattern(arg)),
            };
            Ok(Predicate::Filter(filter))
        }

        Expr::AnyOf(target, values) => {
            let Expr::Prop(path) = target.as_ref() else {
                return Err(Error::Translation(format!(
                    "unsupported predicate: any_of target must be a property reference, got {target:?}"
                )));
            };
            let (attr, converter) = resolve_attribute(path, class_map)?;
            if values.is_empty() {
                return Ok(Predicate::False);
            }
            let mut terms = String::new();
            for v in values {
                terms.push_str(&format!("({attr}={})", format_literal(converter, v)?));
            }
            Ok(Predicate::Filter(format!("(|{terms})")))
        }

        Expr::IsNullOrEmpty(target) => {
            let Expr::Prop(path) = target.as_ref() else {
                return Err(Error::Translation(format!(
                    "unsupported predicate: IsNullOrEmpty target must be a property reference, got {target:?}"
                )));
            };
            let (attr, _) = resolve_attribute(path, class_map)?;
            Ok(Predicate::Filter(format!("(!({attr}=*))")))
        }

        Expr::BitwiseTest(target, op, mask) => {
            let Expr::Prop(path) = target.as_ref() else {
                return Err(Error::Translation(format!(
                    "unsupported predicate: bitwise test target must be a property reference, got {target:?}"
                )));
            };
            let (attr, _) = resolve_attribute(path, class_map)?;
            let oid = match op {
                BitwiseOp::And => BIT_AND_OID,
                BitwiseOp::Or => BIT_OR_OID,
            };
            Ok(Predicate::Filter(format!("({attr}:{oid}:={mask})")))
        }

        Expr::And(l, r) => match (lower(l, class_map)?, lower(r, class_map)?) {
            (Predicate::False, _) | (_, Predicate::False) => Ok(Predicate::False),
            (Predicate::True, other) | (other, Predicate::True) => Ok(other),
            (Predicate::Filter(a), Predicate::Filter(b)) => Ok(Predicate::Filter(format!("(&{a}{b})"))),
        },

        Expr::Or(l, r) => match (lower(l, class_map)?, lower(r, class_map)?) {
            (Predicate::True, _) | (_, Predicate::True) => Ok(Predicate::True),
            (Predicate::False, other) | (other, Predicate::False) => Ok(other),
            (Predicate::Filter(a), Predicate::Filter(b)) => Ok(Predicate::Filter(format!("(|{a}{b})"))),
        },

        Expr::Not(inner) => {
            // Constant-fold double negation before recursing, per §4.1.
            if let Expr::Not(innermost) = inner.as_ref() {
                return lower(innermost, class_map);
            }
            match lower(inner, class_map)? {
                Predicate::True => Ok(Predicate::False),
                Predicate::False => Ok(Predicate::True),
                Predicate::Filter(f) => Ok(Predicate::Filter(format!("(!{f})"))),
            }
        }

        Expr::Constant(lit) => Err(Error::Translation(format!(
            "unsupported predicate: bare constant {lit:?} at boolean position"
        ))),

        Expr::Prop(path) => Err(Error::Translation(format!(
            "unsupported predicate: bare property reference {path:?} at boolean position"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::AttributeValue;
    use crate::mapping::{ClassMapBuilder, PropertyMapBuilder};

    struct Widget {
        p1: String,
        p3: Option<String>,
    }

    fn class_map() -> ClassMap<Widget> {
        ClassMapBuilder::new()
            .object_class("widget", true)
            .property(
                PropertyMapBuilder::new(
                    "P1",
                    "x",
                    ConverterKind::Utf8String,
                    |w: &Widget| AttributeValue::Str(w.p1.clone()),
                    |w: &mut Widget, v| {
                        if let AttributeValue::Str(s) = v {
                            w.p1 = s;
                        }
                        Ok(())
                    },
                )
                .build(),
            )
            .property(
                PropertyMapBuilder::new(
                    "P3",
                    "z",
                    ConverterKind::Utf8String,
                    |w: &Widget| match &w.p3 {
                        Some(s) => AttributeValue::Str(s.clone()),
                        None => AttributeValue::Null,
                    },
                    |w: &mut Widget, v| {
                        w.p3 = match v {
                            AttributeValue::Str(s) => Some(s),
                            _ => None,
                        };
                        Ok(())
                    },
                )
                .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn starts_with_and_not_null_example_from_spec() {
        let cm = class_map();
        let expr = Expr::prop("P1").starts_with("al") & Expr::prop("P3").is_not_null();
        let t = translate(Some(&expr), &cm).unwrap();
        assert!(!t.yield_no_results);
        assert_eq!(t.filter.unwrap(), "(&(objectClass=widget)(&(x=al*)(z=*)))");
    }

    #[test]
    fn false_literal_yields_no_results() {
        let cm = class_map();
        let expr = Expr::Constant(Literal::Bool(true)) & Expr::Constant(Literal::Bool(false));
        let t = translate(Some(&expr), &cm).unwrap();
        assert!(t.yield_no_results);
        assert!(t.filter.is_none());
    }

    #[test]
    fn true_or_anything_drops_the_inner_clause() {
        let cm = class_map();
        let expr = Expr::Constant(Literal::Bool(true)) | Expr::prop("P1").eq("x");
        let t = translate(Some(&expr), &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(objectClass=widget)");
    }

    #[test]
    fn double_negation_cancels() {
        let cm = class_map();
        let expr = !(!(Expr::prop("P1").eq("x")));
        let t = translate(Some(&expr), &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(&(objectClass=widget)(x=x))");
    }

    #[test]
    fn strict_greater_than_excludes_equality() {
        let cm = class_map();
        let expr = Expr::prop("P1").gt("m");
        let t = translate(Some(&expr), &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(&(objectClass=widget)(&(x>=m)(!(x=m))))");
    }

    #[test]
    fn any_of_builds_or_clause() {
        let cm = class_map();
        let expr = Expr::prop("P1").any_of(&["a", "b", "c"]);
        let t = translate(Some(&expr), &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(&(objectClass=widget)(|(x=a)(x=b)(x=c)))");
    }

    #[test]
    fn escapes_metacharacters_in_literal_values() {
        let cm = class_map();
        let expr = Expr::prop("P1").eq("a*(b)\\c");
        let t = translate(Some(&expr), &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(&(objectClass=widget)(x=a\\2a\\28b\\29\\5cc))");
    }

    #[test]
    fn nested_member_path_is_unsupported() {
        let cm = class_map();
        let expr = Expr::path(&["Q", "R"]).eq("x");
        assert!(translate(Some(&expr), &cm).is_err());
    }

    #[test]
    fn no_predicate_emits_only_gating() {
        let cm = class_map();
        let t = translate(None, &cm).unwrap();
        assert_eq!(t.filter.unwrap(), "(objectClass=widget)");
    }

    #[test]
    fn gate_untyped_combines_classes_and_category() {
        let filter = gate_untyped(&["person".to_owned(), "user".to_owned()], Some("cat"));
        assert_eq!(filter, "(&(objectClass=person)(objectClass=user)(objectCategory=cat))");
        assert_eq!(gate_untyped(&[], None), "(objectClass=*)");
    }
}
