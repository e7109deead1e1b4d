//! The expression AST (§2 "Expression AST + visitors") that every
//! translator pass walks.
//!
//! The host language has no expression-tree facility of its own (§9
//! "Expression trees"), so this crate defines a small AST plus a
//! query-builder DSL that constructs it (see
//! [`crate::translator::query::QueryBuilder`]). `Expr` is the predicate/
//! value-expression tree; [`Projection`] is the separate, smaller tree
//! the select projector walks.

use std::ops::{BitAnd, BitOr, Not};

/// A constant value appearing in a predicate or projection.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    Null,
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_owned())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<i64> for Literal {
    fn from(n: i64) -> Self {
        Literal::Int(n)
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

/// A string-returning method invoked on a member access, e.g.
/// `t.P.StartsWith("al")`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringMethod {
    StartsWith,
    EndsWith,
    Contains,
    /// Raw filter-substring content; escaped except for `*`.
    Matches,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitwiseOp {
    /// Extensible-match bit-AND mask test (OID `...803`).
    And,
    /// Extensible-match bit-OR mask test (OID `...804`).
    Or,
}

/// A node of the predicate/value-expression tree, rooted at the query's
/// single implicit parameter `t`.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Constant(Literal),
    /// A (possibly nested) member access path on `t`, e.g. `t.P` is
    /// `Prop(["P"])`, `t.Q.R` is `Prop(["Q", "R"])`.
    Prop(Vec<String>),
    Compare(Comparison, Box<Expr>, Box<Expr>),
    StringCall(Box<Expr>, StringMethod, String),
    /// `t.P == any_of(v1, v2, ...)`.
    AnyOf(Box<Expr>, Vec<Literal>),
    /// `string.IsNullOrEmpty(t.P)`.
    IsNullOrEmpty(Box<Expr>),
    BitwiseTest(Box<Expr>, BitwiseOp, i64),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Reference a mapped property of the root variable.
    pub fn prop(name: &str) -> Expr {
        Expr::Prop(vec![name.to_owned()])
    }

    /// Reference a nested member path, e.g. `Expr::path(&["Q", "R"])`
    /// for `t.Q.R`.
    pub fn path(segments: &[&str]) -> Expr {
        Expr::Prop(segments.iter().map(|s| s.to_string()).collect())
    }

    pub fn eq<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Eq, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn ne<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Ne, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn lt<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Lt, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn le<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Le, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn gt<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Gt, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn ge<L: Into<Literal>>(self, value: L) -> Expr {
        Expr::Compare(Comparison::Ge, Box::new(self), Box::new(Expr::Constant(value.into())))
    }

    pub fn is_null(self) -> Expr {
        Expr::Compare(Comparison::Eq, Box::new(self), Box::new(Expr::Constant(Literal::Null)))
    }

    pub fn is_not_null(self) -> Expr {
        Expr::Compare(Comparison::Ne, Box::new(self), Box::new(Expr::Constant(Literal::Null)))
    }

    pub fn starts_with(self, s: &str) -> Expr {
        Expr::StringCall(Box::new(self), StringMethod::StartsWith, s.to_owned())
    }

    pub fn ends_with(self, s: &str) -> Expr {
        Expr::StringCall(Box::new(self), StringMethod::EndsWith, s.to_owned())
    }

    pub fn contains(self, s: &str) -> Expr {
        Expr::StringCall(Box::new(self), StringMethod::Contains, s.to_owned())
    }

    pub fn matches(self, pattern: &str) -> Expr {
        Expr::StringCall(Box::new(self), StringMethod::Matches, pattern.to_owned())
    }

    pub fn any_of<L: Into<Literal> + Clone>(self, values: &[L]) -> Expr {
        Expr::AnyOf(Box::new(self), values.iter().cloned().map(Into::into).collect())
    }

    pub fn is_null_or_empty(self) -> Expr {
        Expr::IsNullOrEmpty(Box::new(self))
    }

    pub fn bit_and(self, mask: i64) -> Expr {
        Expr::BitwiseTest(Box::new(self), BitwiseOp::And, mask)
    }

    pub fn bit_or(self, mask: i64) -> Expr {
        Expr::BitwiseTest(Box::new(self), BitwiseOp::Or, mask)
    }
}

impl BitAnd for Expr {
    type Output = Expr;
    fn bitand(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for Expr {
    type Output = Expr;
    fn bitor(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }
}

impl Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// The result-shape expression the select projector consumes (§4.2).
#[derive(Clone, Debug, PartialEq)]
pub enum Projection {
    /// `t => t`.
    Identity,
    /// `t => t.P`.
    Member(Vec<String>),
    /// `t => t.P` where `P` is multi-valued, flattened to every value of
    /// the single entry rather than across entries (§4.3 `select_many`,
    /// "bounded": one entry's multi-valued attribute, not a cross-entry
    /// SelectMany).
    Many(Vec<String>),
    /// `t => new { A = t.P, B = t.Q.R }`.
    Anonymous(Vec<(String, Expr)>),
    /// `t => new Foo { P = t.P, ... }`.
    Constructor(String, Vec<(String, Expr)>),
}

/// Walks an [`Expr`] tree, depth-first, calling back for every node.
///
/// Translator passes that only care about a subset of node kinds can
/// implement just those callbacks and rely on the provided `walk`
/// default for the rest.
pub trait ExprVisitor {
    fn visit_prop(&mut self, _path: &[String]) {}
    fn visit_constant(&mut self, _lit: &Literal) {}

    fn walk(&mut self, expr: &Expr) {
        match expr {
            Expr::Constant(lit) => self.visit_constant(lit),
            Expr::Prop(path) => self.visit_prop(path),
            Expr::Compare(_, l, r) => {
                self.walk(l);
                self.walk(r);
            }
            Expr::StringCall(e, _, _) => self.walk(e),
            Expr::AnyOf(e, _) => self.walk(e),
            Expr::IsNullOrEmpty(e) => self.walk(e),
            Expr::BitwiseTest(e, _, _) => self.walk(e),
            Expr::And(l, r) | Expr::Or(l, r) => {
                self.walk(l);
                self.walk(r);
            }
            Expr::Not(e) => self.walk(e),
        }
    }
}

/// Collects the root-variable property paths reachable in an `Expr`,
/// used by the select projector for minimality (§8 property 3).
#[derive(Default)]
pub struct PropertyCollector {
    pub paths: Vec<Vec<String>>,
}

impl ExprVisitor for PropertyCollector {
    fn visit_prop(&mut self, path: &[String]) {
        self.paths.push(path.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_overloads_build_and_or_not() {
        let expr = Expr::prop("P1").starts_with("al") & Expr::prop("P3").is_not_null();
        assert!(matches!(expr, Expr::And(_, _)));
        let expr = !expr;
        assert!(matches!(expr, Expr::Not(_)));
    }

    #[test]
    fn property_collector_finds_all_referenced_props() {
        let expr = Expr::prop("P1").eq("x") & Expr::prop("P2").is_not_null();
        let mut collector = PropertyCollector::default();
        collector.walk(&expr);
        assert_eq!(collector.paths, vec![vec!["P1".to_owned()], vec!["P2".to_owned()]]);
    }
}
