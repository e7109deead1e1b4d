//! The top-level query translator (§4.3) and the query-builder DSL that
//! produces the pipeline it consumes.

use crate::ast::{Expr, Projection};
use crate::error::{Error, Result};
use crate::mapping::ClassMap;
use crate::scope::Scope;
use crate::translator::filter;
use std::marker::PhantomData;

/// A caller-supplied control to attach to the request, passed through
/// opaquely (§6 "arbitrary caller-supplied controls").
#[derive(Clone, Debug)]
pub struct ExtraControl {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Vec<u8>>,
}

/// `skip`/`take`/`page` resolved into paging parameters (§3
/// `paging_options`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PagingOptions {
    pub page_size: Option<i32>,
    pub cookie: Option<Vec<u8>>,
    pub skip: usize,
    pub take: Option<usize>,
}

/// Virtual List View target (§3 `vlv_options`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VlvTarget {
    ByOffset { offset: i32, content_count: i32 },
    GreaterThanOrEqual(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VlvOptions {
    pub before_count: i32,
    pub after_count: i32,
    pub target: VlvTarget,
    pub context_id: Option<Vec<u8>>,
}

/// How the command dispatcher should shape the final result (§4.3 "pick
/// result transformer from the terminal operator").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultTransformer {
    List,
    Single,
    SingleOrDefault,
    First,
    FirstOrDefault,
    Last,
    Count,
    LongCount,
    Any,
    All,
}

/// The fully-resolved output of the query translator (§3
/// `QueryCommandOptions`), ready to hand to a [`crate::command::Command`].
#[derive(Clone, Debug)]
pub struct QueryCommandOptions {
    pub filter: String,
    /// `(property_name, attribute_name)`, insertion-ordered.
    pub attributes_to_load: Vec<(String, String)>,
    /// `(attribute_name, reverse)`, in the order `order_by`/`then_by`
    /// clauses appeared.
    pub sorting_options: Option<Vec<(String, bool)>>,
    pub paging_options: Option<PagingOptions>,
    pub vlv_options: Option<VlvOptions>,
    pub controls: Vec<ExtraControl>,
    pub projection: Projection,
    pub yield_no_results: bool,
    pub result_transformer: ResultTransformer,
    pub without_paging: bool,
    pub within_size_limit: bool,
    pub as_no_tracking: bool,
    pub as_dynamic: bool,
    pub naming_context: Option<String>,
    pub scope: Scope,
}

/// A single recognised pipeline operator (§4.3).
#[derive(Clone, Debug)]
pub enum PipelineOp {
    Where(Expr),
    OrderBy(String, bool),
    ThenBy(String, bool),
    Skip(usize),
    Take(usize),
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    Any(Option<Expr>),
    All(Expr),
    Count,
    LongCount,
    Select(Projection),
    /// `select_many(t => t.P)` (§4.3 "bounded": one entry's multi-valued
    /// property, not a cross-entry flatten).
    SelectMany(String),
    IncludeControls(Vec<ExtraControl>),
    WithinSizeLimit,
    Page { size: i32 },
    VirtualListView(VlvOptions),
    WithoutPaging,
    AsNoTracking,
    InNamingContext(String),
    InSubtree,
    AsDynamic,
}

/// Builds a [`PipelineOp`] sequence fluently; `translate` runs the
/// multi-pass translator over it.
pub struct QueryBuilder<T> {
    ops: Vec<PipelineOp>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for QueryBuilder<T> {
    fn default() -> Self {
        QueryBuilder {
            ops: Vec::new(),
            _marker: PhantomData,
        }
    }
}

impl<T> QueryBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.ops.push(PipelineOp::Where(predicate));
        self
    }

    pub fn order_by(mut self, property: &str) -> Self {
        self.ops.push(PipelineOp::OrderBy(property.to_owned(), false));
        self
    }

    pub fn order_by_descending(mut self, property: &str) -> Self {
        self.ops.push(PipelineOp::OrderBy(property.to_owned(), true));
        self
    }

    pub fn then_by(mut self, property: &str) -> Self {
        self.ops.push(PipelineOp::ThenBy(property.to_owned(), false));
        self
    }

    pub fn then_by_descending(mut self, property: &str) -> Self {
        self.ops.push(PipelineOp::ThenBy(property.to_owned(), true));
        self
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.ops.push(PipelineOp::Skip(n));
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.ops.push(PipelineOp::Take(n));
        self
    }

    pub fn first(mut self) -> Self {
        self.ops.push(PipelineOp::First);
        self
    }

    pub fn first_or_default(mut self) -> Self {
        self.ops.push(PipelineOp::FirstOrDefault);
        self
    }

    pub fn single(mut self) -> Self {
        self.ops.push(PipelineOp::Single);
        self
    }

    pub fn single_or_default(mut self) -> Self {
        self.ops.push(PipelineOp::SingleOrDefault);
        self
    }

    pub fn last(mut self) -> Self {
        self.ops.push(PipelineOp::Last);
        self
    }

    pub fn any(mut self) -> Self {
        self.ops.push(PipelineOp::Any(None));
        self
    }

    pub fn any_where(mut self, predicate: Expr) -> Self {
        self.ops.push(PipelineOp::Any(Some(predicate)));
        self
    }

    pub fn all(mut self, predicate: Expr) -> Self {
        self.ops.push(PipelineOp::All(predicate));
        self
    }

    pub fn count(mut self) -> Self {
        self.ops.push(PipelineOp::Count);
        self
    }

    pub fn long_count(mut self) -> Self {
        self.ops.push(PipelineOp::LongCount);
        self
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.ops.push(PipelineOp::Select(projection));
        self
    }

    pub fn select_many(mut self, property: &str) -> Self {
        self.ops.push(PipelineOp::SelectMany(property.to_owned()));
        self
    }

    pub fn include_controls(mut self, controls: Vec<ExtraControl>) -> Self {
        self.ops.push(PipelineOp::IncludeControls(controls));
        self
    }

    pub fn within_size_limit(mut self) -> Self {
        self.ops.push(PipelineOp::WithinSizeLimit);
        self
    }

    pub fn page(mut self, size: i32) -> Self {
        self.ops.push(PipelineOp::Page { size });
        self
    }

    pub fn virtual_list_view(mut self, vlv: VlvOptions) -> Self {
        self.ops.push(PipelineOp::VirtualListView(vlv));
        self
    }

    pub fn without_paging(mut self) -> Self {
        self.ops.push(PipelineOp::WithoutPaging);
        self
    }

    pub fn as_no_tracking(mut self) -> Self {
        self.ops.push(PipelineOp::AsNoTracking);
        self
    }

    pub fn in_naming_context(mut self, dn: &str) -> Self {
        self.ops.push(PipelineOp::InNamingContext(dn.to_owned()));
        self
    }

    pub fn in_subtree(mut self) -> Self {
        self.ops.push(PipelineOp::InSubtree);
        self
    }

    pub fn as_dynamic(mut self) -> Self {
        self.ops.push(PipelineOp::AsDynamic);
        self
    }

    pub fn into_ops(self) -> Vec<PipelineOp> {
        self.ops
    }
}

fn attribute_name_for<T>(class_map: &ClassMap<T>, property: &str) -> Result<String> {
    class_map
        .property(property)
        .map(|p| p.attribute_name.clone())
        .ok_or_else(|| Error::Mapping(format!("property {property:?} is not mapped")))
}

/// Run the multi-pass translator over a pipeline, producing the
/// resolved [`QueryCommandOptions`].
pub fn translate<T>(
    mut ops: Vec<PipelineOp>,
    class_map: &ClassMap<T>,
    default_naming_context: Option<&str>,
) -> Result<QueryCommandOptions> {
    // Rewrite `any(pred)` to `where(pred).take(1)` with an `Any(None)`
    // terminal marker, per §4.3. `all(pred)` is rewritten in the main
    // pass below instead, since it needs to negate the predicate once
    // it has been folded into `combined_predicate`.
    if let Some(index) = ops.iter().position(|op| matches!(op, PipelineOp::Any(Some(_)))) {
        let PipelineOp::Any(Some(pred)) = ops.remove(index) else {
            unreachable!()
        };
        ops.insert(index, PipelineOp::Where(pred));
        ops.push(PipelineOp::Any(None));
    }
    let mut combined_predicate: Option<Expr> = None;
    let mut sort_keys: Vec<(String, bool)> = Vec::new();
    let mut skip: usize = 0;
    let mut take: Option<usize> = None;
    let mut page_size: Option<i32> = None;
    let mut vlv: Option<VlvOptions> = None;
    let mut controls: Vec<ExtraControl> = Vec::new();
    let mut without_paging = false;
    let mut within_size_limit = false;
    let mut as_no_tracking = false;
    let mut as_dynamic = false;
    let mut naming_context = default_naming_context.map(str::to_owned);
    let mut scope = Scope::Subtree;
    let mut projection: Option<Projection> = None;
    let mut transformer = ResultTransformer::List;

    for op in ops {
        match op {
            PipelineOp::Where(expr) => {
                combined_predicate = Some(match combined_predicate {
                    Some(existing) => existing & expr,
                    None => expr,
                });
            }
            PipelineOp::OrderBy(prop, rev) | PipelineOp::ThenBy(prop, rev) => {
                sort_keys.push((attribute_name_for(class_map, &prop)?, rev));
            }
            PipelineOp::Skip(n) => skip = n,
            PipelineOp::Take(n) => take = Some(n),
            PipelineOp::First => {
                transformer = ResultTransformer::First;
                take.get_or_insert(1);
            }
            PipelineOp::FirstOrDefault => {
                transformer = ResultTransformer::FirstOrDefault;
                take.get_or_insert(1);
            }
            PipelineOp::Single => transformer = ResultTransformer::Single,
            PipelineOp::SingleOrDefault => transformer = ResultTransformer::SingleOrDefault,
            PipelineOp::Last => transformer = ResultTransformer::Last,
            PipelineOp::Any(None) => {
                transformer = ResultTransformer::Any;
                take = Some(1);
            }
            PipelineOp::Any(Some(_)) => unreachable!("rewritten above"),
            PipelineOp::All(pred) => {
                transformer = ResultTransformer::All;
                combined_predicate = Some(match combined_predicate {
                    Some(existing) => existing & !pred,
                    None => !pred,
                });
                take = Some(1);
            }
            PipelineOp::Count => transformer = ResultTransformer::Count,
            PipelineOp::LongCount => transformer = ResultTransformer::LongCount,
            PipelineOp::Select(p) => projection = Some(p),
            PipelineOp::SelectMany(prop) => projection = Some(Projection::Many(vec![prop])),
            PipelineOp::IncludeControls(cs) => controls.extend(cs),
            PipelineOp::WithinSizeLimit => within_size_limit = true,
            PipelineOp::Page { size } => page_size = Some(size),
            PipelineOp::VirtualListView(spec) => vlv = Some(spec),
            PipelineOp::WithoutPaging => without_paging = true,
            PipelineOp::AsNoTracking => as_no_tracking = true,
            PipelineOp::InNamingContext(dn) => naming_context = Some(dn),
            PipelineOp::InSubtree => scope = Scope::Subtree,
            PipelineOp::AsDynamic => as_dynamic = true,
        }
    }

    if sort_keys.len() > 1 && vlv.is_some() {
        return Err(Error::Translation(
            "at most one sort control may be emitted per query; a VLV query already carries its own sort key".into(),
        ));
    }

    let translation = filter::translate(combined_predicate.as_ref(), class_map)?;

    // Precedence: explicit VLV > explicit page > implicit server paging.
    // Skip is applied before take regardless of which path is chosen.
    let paging_options = if vlv.is_none() && !without_paging {
        Some(PagingOptions {
            page_size,
            cookie: None,
            skip,
            take,
        })
    } else if skip > 0 || take.is_some() {
        Some(PagingOptions {
            page_size,
            cookie: None,
            skip,
            take,
        })
    } else {
        None
    };

    let projection = projection.unwrap_or(Projection::Identity);
    let attributes_to_load = crate::translator::select::selected_properties(&projection, class_map)?
        .entries;

    Ok(QueryCommandOptions {
        filter: translation.filter.unwrap_or_default(),
        attributes_to_load,
        sorting_options: if sort_keys.is_empty() { None } else { Some(sort_keys) },
        paging_options,
        vlv_options: vlv,
        controls,
        projection,
        yield_no_results: translation.yield_no_results,
        result_transformer: transformer,
        without_paging,
        within_size_limit,
        as_no_tracking,
        as_dynamic,
        naming_context,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{AttributeValue, ConverterKind};
    use crate::mapping::{ClassMapBuilder, PropertyMapBuilder};

    struct Widget {
        p1: String,
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
            .build()
            .unwrap()
    }

    #[test]
    fn single_or_default_keeps_transformer() {
        let cm = class_map();
        let ops = QueryBuilder::<Widget>::new()
            .filter(Expr::prop("P1").eq("x"))
            .single_or_default()
            .into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        assert_eq!(opts.result_transformer, ResultTransformer::SingleOrDefault);
        assert_eq!(opts.filter, "(&(objectClass=widget)(x=x))");
    }

    #[test]
    fn paged_count_has_no_explicit_take() {
        let cm = class_map();
        let ops = QueryBuilder::<Widget>::new().count().into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        assert_eq!(opts.result_transformer, ResultTransformer::Count);
        assert!(opts.paging_options.unwrap().take.is_none());
    }

    #[test]
    fn all_rewrites_to_negated_where_with_take_one() {
        let cm = class_map();
        let ops = QueryBuilder::<Widget>::new().all(Expr::prop("P1").eq("x")).into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        assert_eq!(opts.result_transformer, ResultTransformer::All);
        assert_eq!(opts.filter, "(&(objectClass=widget)(!(x=x)))");
        assert_eq!(opts.paging_options.unwrap().take, Some(1));
    }

    #[test]
    fn vlv_and_multiple_sort_keys_conflict() {
        let cm = class_map();
        let ops = QueryBuilder::<Widget>::new()
            .order_by("P1")
            .then_by("P1")
            .virtual_list_view(VlvOptions {
                before_count: 0,
                after_count: 10,
                target: VlvTarget::ByOffset { offset: 1, content_count: 0 },
                context_id: None,
            })
            .into_ops();
        assert!(translate(ops, &cm, None).is_err());
    }
}
