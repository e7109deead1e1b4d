//! The command dispatcher (§4.4): turns a resolved
//! [`QueryCommandOptions`] (or a direct write/DN/range request) into
//! wire traffic, running the common pre-flight steps first.

use crate::attributes::DirectoryAttributes;
use crate::connection::{DirectoryConnection, WireRequest};
use crate::controls::{self, control_kind};
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::mapping::ClassMap;
use crate::paging::{self, PagedSearch};
use crate::scope::Scope;
use crate::translator::query::{QueryCommandOptions, ResultTransformer};
use ldap3::controls::RawControl;
use ldap3::{Mod, SearchEntry};
use std::collections::HashMap;

/// Knobs that come from `DirectoryContextOptions` rather than from any
/// single query (§4.9).
#[derive(Clone, Copy, Debug)]
pub struct DispatchSettings {
    pub paging_enabled: bool,
    pub server_max_page_size: i32,
}

/// A response entry prior to type-level materialisation: its DN plus
/// its raw attribute bag.
#[derive(Clone, Debug)]
pub struct Entry {
    pub dn: String,
    pub attrs: DirectoryAttributes,
}

/// The shaped result of running a query, before type-level
/// materialisation (which belongs to `DirectoryContext`, since it needs
/// the projector and the mapped type `T`).
#[derive(Clone, Debug)]
pub enum QueryOutcome {
    List(Vec<Entry>),
    Single(Entry),
    SingleOrDefault(Option<Entry>),
    First(Entry),
    FirstOrDefault(Option<Entry>),
    Last(Entry),
    Count(i64),
    LongCount(i64),
    Any(bool),
    All(bool),
}

/// No-result short circuit: when the translator proved the predicate
/// false, `execute` returns the transformer's zero value without a
/// network call (§8 property 6). `Single`/`First`/`Last` have no zero
/// value — an empty result set is exactly their failure case — so those
/// still surface `no_result`.
fn zero_value_for_empty_query(transformer: ResultTransformer, filter: &str) -> Result<QueryOutcome> {
    match transformer {
        ResultTransformer::List => Ok(QueryOutcome::List(Vec::new())),
        ResultTransformer::Single => Err(Error::NoResult(filter.to_owned())),
        ResultTransformer::SingleOrDefault => Ok(QueryOutcome::SingleOrDefault(None)),
        ResultTransformer::First => Err(Error::NoResult(filter.to_owned())),
        ResultTransformer::FirstOrDefault => Ok(QueryOutcome::FirstOrDefault(None)),
        ResultTransformer::Last => Err(Error::NoResult(filter.to_owned())),
        ResultTransformer::Count => Ok(QueryOutcome::Count(0)),
        ResultTransformer::LongCount => Ok(QueryOutcome::LongCount(0)),
        ResultTransformer::Any => Ok(QueryOutcome::Any(false)),
        ResultTransformer::All => Ok(QueryOutcome::All(true)),
    }
}

fn resolve_naming_context<T>(
    explicit: &Option<String>,
    class_map: &ClassMap<T>,
) -> Result<String> {
    explicit
        .clone()
        .or_else(|| class_map.naming_context.clone())
        .ok_or_else(|| Error::InvalidArgument("no naming context supplied and the mapping has none".into()))
}

fn reject_duplicate_controls(controls: &[RawControl]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for c in controls {
        if !seen.insert(control_kind(c)) {
            return Err(Error::Translation(format!("duplicate control: {}", control_kind(c))));
        }
    }
    Ok(())
}

fn entry_to_attributes(entry: SearchEntry) -> (String, DirectoryAttributes) {
    let mut raw: HashMap<String, Vec<Vec<u8>>> = HashMap::new();
    for (name, values) in entry.attrs {
        raw.insert(name, values.into_iter().map(String::into_bytes).collect());
    }
    for (name, values) in entry.bin_attrs {
        raw.insert(name, values);
    }
    (entry.dn, DirectoryAttributes::from_response(raw))
}

fn shape_outcome(entries: Vec<Entry>, transformer: ResultTransformer, filter: &str) -> Result<QueryOutcome> {
    match transformer {
        ResultTransformer::List => Ok(QueryOutcome::List(entries)),
        ResultTransformer::Single => {
            let mut it = entries.into_iter();
            match (it.next(), it.next()) {
                (None, _) => Err(Error::NoResult(filter.to_owned())),
                (Some(_), Some(_)) => Err(Error::MultipleResults(filter.to_owned())),
                (Some(only), None) => Ok(QueryOutcome::Single(only)),
            }
        }
        ResultTransformer::SingleOrDefault => {
            let mut it = entries.into_iter();
            match (it.next(), it.next()) {
                (None, _) => Ok(QueryOutcome::SingleOrDefault(None)),
                (Some(_), Some(_)) => Err(Error::MultipleResults(filter.to_owned())),
                (Some(only), None) => Ok(QueryOutcome::SingleOrDefault(Some(only))),
            }
        }
        ResultTransformer::First => entries
            .into_iter()
            .next()
            .map(QueryOutcome::First)
            .ok_or_else(|| Error::NoResult(filter.to_owned())),
        ResultTransformer::FirstOrDefault => Ok(QueryOutcome::FirstOrDefault(entries.into_iter().next())),
        ResultTransformer::Last => entries
            .into_iter()
            .last()
            .map(QueryOutcome::Last)
            .ok_or_else(|| Error::NoResult(filter.to_owned())),
        ResultTransformer::Count => Ok(QueryOutcome::Count(entries.len() as i64)),
        ResultTransformer::LongCount => Ok(QueryOutcome::LongCount(entries.len() as i64)),
        ResultTransformer::Any => Ok(QueryOutcome::Any(!entries.is_empty())),
        ResultTransformer::All => Ok(QueryOutcome::All(entries.is_empty())),
    }
}

/// Run a translated query against `conn` (§4.4 pre-flight steps 1–7).
///
/// `subtype_discriminated` should be true when the mapping has
/// `sub_type_mappings` and no catch-all, per pre-flight step 4.
#[allow(clippy::too_many_arguments)]
pub async fn execute_query<T, C: DirectoryConnection + ?Sized>(
    conn: &C,
    class_map: &ClassMap<T>,
    opts: &QueryCommandOptions,
    scope: Scope,
    subtype_discriminated: bool,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<QueryOutcome> {
    let base = resolve_naming_context(&opts.naming_context, class_map)?;

    let mut extra_controls = opts.controls.iter().map(build_extra_control).collect::<Vec<_>>();
    if let Some(keys) = &opts.sorting_options {
        extra_controls.push(controls::ServerSideSort { keys: keys.clone() }.into());
    }
    let small_page = matches!(
        opts.result_transformer,
        ResultTransformer::SingleOrDefault | ResultTransformer::FirstOrDefault | ResultTransformer::Single | ResultTransformer::First
    );
    reject_duplicate_controls(&extra_controls)?;

    if opts.yield_no_results {
        return zero_value_for_empty_query(opts.result_transformer, &opts.filter);
    }

    let mut attrs = opts
        .attributes_to_load
        .iter()
        .map(|(_, attr)| attr.clone())
        .collect::<Vec<_>>();
    if subtype_discriminated && !attrs.iter().any(|a| a.eq_ignore_ascii_case("objectClass")) {
        attrs.push("objectClass".to_owned());
    }

    if logger.trace_enabled() {
        logger.trace(&format!("dispatching query filter={:?} base={:?}", opts.filter, base));
    }

    let paging_options = if small_page && !opts.without_paging {
        Some(crate::translator::query::PagingOptions {
            page_size: Some(2),
            cookie: None,
            skip: opts.paging_options.as_ref().map(|p| p.skip).unwrap_or(0),
            take: opts.paging_options.as_ref().and_then(|p| p.take),
        })
    } else {
        opts.paging_options.clone()
    };

    let entries = paging::run(
        conn,
        PagedSearch {
            base: &base,
            scope: scope.into(),
            filter: &opts.filter,
            attrs: &attrs,
            extra_controls,
        },
        paging_options.as_ref(),
        settings.paging_enabled && !opts.without_paging,
        settings.server_max_page_size,
        opts.within_size_limit,
        logger,
    )
    .await
    .map_err(|e| {
        logger.error("query failed", Some(&e));
        e
    })?;

    let entries: Vec<Entry> = entries
        .into_iter()
        .map(|e| {
            let (dn, attrs) = entry_to_attributes(e);
            Entry { dn, attrs }
        })
        .collect();
    shape_outcome(entries, opts.result_transformer, &opts.filter)
}

/// Synchronous counterpart of [`execute_query`] (§9 "derive a blocking
/// wrapper"), built the same way `paging::run_sync` mirrors `paging::run`.
#[allow(clippy::too_many_arguments)]
pub fn execute_query_sync<T, C: DirectoryConnection + ?Sized>(
    conn: &C,
    class_map: &ClassMap<T>,
    opts: &QueryCommandOptions,
    scope: Scope,
    subtype_discriminated: bool,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<QueryOutcome> {
    let base = resolve_naming_context(&opts.naming_context, class_map)?;

    let mut extra_controls = opts.controls.iter().map(build_extra_control).collect::<Vec<_>>();
    if let Some(keys) = &opts.sorting_options {
        extra_controls.push(controls::ServerSideSort { keys: keys.clone() }.into());
    }
    let small_page = matches!(
        opts.result_transformer,
        ResultTransformer::SingleOrDefault | ResultTransformer::FirstOrDefault | ResultTransformer::Single | ResultTransformer::First
    );
    reject_duplicate_controls(&extra_controls)?;

    if opts.yield_no_results {
        return zero_value_for_empty_query(opts.result_transformer, &opts.filter);
    }

    let mut attrs = opts
        .attributes_to_load
        .iter()
        .map(|(_, attr)| attr.clone())
        .collect::<Vec<_>>();
    if subtype_discriminated && !attrs.iter().any(|a| a.eq_ignore_ascii_case("objectClass")) {
        attrs.push("objectClass".to_owned());
    }

    if logger.trace_enabled() {
        logger.trace(&format!("dispatching query filter={:?} base={:?}", opts.filter, base));
    }

    let paging_options = if small_page && !opts.without_paging {
        Some(crate::translator::query::PagingOptions {
            page_size: Some(2),
            cookie: None,
            skip: opts.paging_options.as_ref().map(|p| p.skip).unwrap_or(0),
            take: opts.paging_options.as_ref().and_then(|p| p.take),
        })
    } else {
        opts.paging_options.clone()
    };

    let entries = paging::run_sync(
        conn,
        PagedSearch {
            base: &base,
            scope: scope.into(),
            filter: &opts.filter,
            attrs: &attrs,
            extra_controls,
        },
        paging_options.as_ref(),
        settings.paging_enabled && !opts.without_paging,
        settings.server_max_page_size,
        opts.within_size_limit,
        logger,
    )
    .map_err(|e| {
        logger.error("query failed", Some(&e));
        e
    })?;

    let entries: Vec<Entry> = entries
        .into_iter()
        .map(|e| {
            let (dn, attrs) = entry_to_attributes(e);
            Entry { dn, attrs }
        })
        .collect();
    shape_outcome(entries, opts.result_transformer, &opts.filter)
}

/// `GetByDn`: a base-scope search for a single entry.
pub async fn get_by_dn<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attrs: &[String],
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Option<Entry>> {
    let entries = paging::run(
        conn,
        PagedSearch {
            base: dn,
            scope: ldap3::Scope::Base,
            filter: "(objectClass=*)",
            attrs,
            extra_controls: vec![],
        },
        None,
        false,
        settings.server_max_page_size,
        false,
        logger,
    )
    .await?;
    Ok(entries.into_iter().next().map(|e| {
        let (dn, attrs) = entry_to_attributes(e);
        Entry { dn, attrs }
    }))
}

/// Synchronous counterpart of [`get_by_dn`].
pub fn get_by_dn_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attrs: &[String],
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Option<Entry>> {
    let entries = paging::run_sync(
        conn,
        PagedSearch {
            base: dn,
            scope: ldap3::Scope::Base,
            filter: "(objectClass=*)",
            attrs,
            extra_controls: vec![],
        },
        None,
        false,
        settings.server_max_page_size,
        false,
        logger,
    )?;
    Ok(entries.into_iter().next().map(|e| {
        let (dn, attrs) = entry_to_attributes(e);
        Entry { dn, attrs }
    }))
}

/// Untyped `query(naming_context, scope, object_class?, object_classes?,
/// object_category?)` (§6): a subtree/one-level/base search gated only by
/// object-class/category, with no `ClassMap<T>` to materialise against.
#[allow(clippy::too_many_arguments)]
pub async fn search_entries<C: DirectoryConnection + ?Sized>(
    conn: &C,
    base: &str,
    scope: Scope,
    object_classes: &[String],
    object_category: Option<&str>,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Vec<Entry>> {
    let filter = crate::translator::filter::gate_untyped(object_classes, object_category);
    if logger.trace_enabled() {
        logger.trace(&format!("search_entries base={base:?} filter={filter:?}"));
    }
    let entries = paging::run(
        conn,
        PagedSearch {
            base,
            scope: scope.into(),
            filter: &filter,
            attrs: &[],
            extra_controls: vec![],
        },
        None,
        settings.paging_enabled,
        settings.server_max_page_size,
        false,
        logger,
    )
    .await?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let (dn, attrs) = entry_to_attributes(e);
            Entry { dn, attrs }
        })
        .collect())
}

/// `AddRequest`.
pub async fn add<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attrs: Vec<(String, Vec<Vec<u8>>)>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("add dn={dn:?}"));
    }
    conn.send_request(WireRequest::Add { dn: dn.to_owned(), attrs, controls })
        .await?
        .into_success()?;
    Ok(())
}

/// Synchronous counterpart of [`add`].
pub fn add_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attrs: Vec<(String, Vec<Vec<u8>>)>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("add dn={dn:?}"));
    }
    conn.send_request_sync(WireRequest::Add { dn: dn.to_owned(), attrs, controls })?.into_success()?;
    Ok(())
}

/// `ModifyRequest`.
pub async fn modify<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    mods: Vec<Mod<Vec<u8>>>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if mods.is_empty() {
        return Ok(());
    }
    if logger.trace_enabled() {
        logger.trace(&format!("modify dn={dn:?} mod_count={}", mods.len()));
    }
    conn.send_request(WireRequest::Modify { dn: dn.to_owned(), mods, controls })
        .await?
        .into_success()?;
    Ok(())
}

/// Synchronous counterpart of [`modify`].
pub fn modify_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    mods: Vec<Mod<Vec<u8>>>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if mods.is_empty() {
        return Ok(());
    }
    if logger.trace_enabled() {
        logger.trace(&format!("modify dn={dn:?} mod_count={}", mods.len()));
    }
    conn.send_request_sync(WireRequest::Modify { dn: dn.to_owned(), mods, controls })?.into_success()?;
    Ok(())
}

/// `DeleteRequest`.
pub async fn delete<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("delete dn={dn:?}"));
    }
    conn.send_request(WireRequest::Delete { dn: dn.to_owned(), controls })
        .await?
        .into_success()?;
    Ok(())
}

/// Synchronous counterpart of [`delete`].
pub fn delete_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<()> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("delete dn={dn:?}"));
    }
    conn.send_request_sync(WireRequest::Delete { dn: dn.to_owned(), controls })?.into_success()?;
    Ok(())
}

/// `ModifyDnRequest`: move and/or rename, returning the new DN.
pub async fn modify_dn<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    new_rdn: &str,
    delete_old_rdn: bool,
    new_superior: Option<&str>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<String> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("modify_dn dn={dn:?} new_rdn={new_rdn:?} new_superior={new_superior:?}"));
    }
    conn.send_request(WireRequest::ModifyDn {
        dn: dn.to_owned(),
        new_rdn: new_rdn.to_owned(),
        delete_old_rdn,
        new_superior: new_superior.map(str::to_owned),
        controls,
    })
    .await?
    .into_success()?;
    let superior = new_superior.map(str::to_owned).or_else(|| crate::dn::parent(dn));
    Ok(crate::dn::join(new_rdn, superior.as_deref()))
}

/// Synchronous counterpart of [`modify_dn`].
pub fn modify_dn_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    new_rdn: &str,
    delete_old_rdn: bool,
    new_superior: Option<&str>,
    controls: Vec<RawControl>,
    logger: &dyn Logger,
) -> Result<String> {
    reject_duplicate_controls(&controls)?;
    if logger.trace_enabled() {
        logger.trace(&format!("modify_dn dn={dn:?} new_rdn={new_rdn:?} new_superior={new_superior:?}"));
    }
    conn.send_request_sync(WireRequest::ModifyDn {
        dn: dn.to_owned(),
        new_rdn: new_rdn.to_owned(),
        delete_old_rdn,
        new_superior: new_superior.map(str::to_owned),
        controls,
    })?
    .into_success()?;
    let superior = new_superior.map(str::to_owned).or_else(|| crate::dn::parent(dn));
    Ok(crate::dn::join(new_rdn, superior.as_deref()))
}

/// `RangeRetrieval`: walk `attr;range=N-M` chunks until the server signals
/// the final chunk with a `*` upper bound.
pub async fn retrieve_ranges<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attribute_name: &str,
    start: u32,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Vec<Vec<u8>>> {
    let mut values = Vec::new();
    let mut offset = start;
    loop {
        let ranged_name = format!("{attribute_name};range={offset}-*");
        let entries = paging::run(
            conn,
            PagedSearch {
                base: dn,
                scope: ldap3::Scope::Base,
                filter: "(objectClass=*)",
                attrs: &[ranged_name.clone()],
                extra_controls: vec![],
            },
            None,
            false,
            settings.server_max_page_size,
            false,
            logger,
        )
        .await?;
        let Some(entry) = entries.into_iter().next() else {
            break;
        };
        let (_, attrs) = entry_to_attributes(entry);
        let found = attrs
            .iter()
            .find(|(name, _)| name.split(';').next().unwrap_or(name).eq_ignore_ascii_case(attribute_name))
            .map(|(name, raw)| (name.to_owned(), raw.to_vec()));
        let Some((name, raw)) = found else {
            break;
        };
        let is_final = name.ends_with("-*");
        values.extend(raw);
        if is_final {
            break;
        }
        offset += values.len() as u32;
    }
    Ok(values)
}

/// Synchronous counterpart of [`retrieve_ranges`].
pub fn retrieve_ranges_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    dn: &str,
    attribute_name: &str,
    start: u32,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Vec<Vec<u8>>> {
    let mut values = Vec::new();
    let mut offset = start;
    loop {
        let ranged_name = format!("{attribute_name};range={offset}-*");
        let entries = paging::run_sync(
            conn,
            PagedSearch {
                base: dn,
                scope: ldap3::Scope::Base,
                filter: "(objectClass=*)",
                attrs: &[ranged_name.clone()],
                extra_controls: vec![],
            },
            None,
            false,
            settings.server_max_page_size,
            false,
            logger,
        )?;
        let Some(entry) = entries.into_iter().next() else {
            break;
        };
        let (_, attrs) = entry_to_attributes(entry);
        let found = attrs
            .iter()
            .find(|(name, _)| name.split(';').next().unwrap_or(name).eq_ignore_ascii_case(attribute_name))
            .map(|(name, raw)| (name.to_owned(), raw.to_vec()));
        let Some((name, raw)) = found else {
            break;
        };
        let is_final = name.ends_with("-*");
        values.extend(raw);
        if is_final {
            break;
        }
        offset += values.len() as u32;
    }
    Ok(values)
}

/// Synchronous counterpart of [`search_entries`].
pub fn search_entries_sync<C: DirectoryConnection + ?Sized>(
    conn: &C,
    base: &str,
    scope: Scope,
    object_classes: &[String],
    object_category: Option<&str>,
    settings: DispatchSettings,
    logger: &dyn Logger,
) -> Result<Vec<Entry>> {
    let filter = crate::translator::filter::gate_untyped(object_classes, object_category);
    if logger.trace_enabled() {
        logger.trace(&format!("search_entries base={base:?} filter={filter:?}"));
    }
    let entries = paging::run_sync(
        conn,
        PagedSearch {
            base,
            scope: scope.into(),
            filter: &filter,
            attrs: &[],
            extra_controls: vec![],
        },
        None,
        settings.paging_enabled,
        settings.server_max_page_size,
        false,
        logger,
    )?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let (dn, attrs) = entry_to_attributes(e);
            Entry { dn, attrs }
        })
        .collect())
}

fn build_extra_control(control: &crate::translator::query::ExtraControl) -> RawControl {
    RawControl {
        ctype: control.oid.clone(),
        crit: control.critical,
        val: control.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::connection::{entry, RecordingConnection};
    use crate::convert::{AttributeValue, ConverterKind};
    use crate::logger::NullLogger;
    use crate::mapping::{ClassMapBuilder, PropertyMapBuilder};
    use crate::translator::query::{translate, QueryBuilder};

    struct Widget {
        name: String,
    }

    fn class_map() -> ClassMap<Widget> {
        ClassMapBuilder::new()
            .naming_context("ou=widgets,dc=example,dc=com")
            .object_class("widget", true)
            .property(
                PropertyMapBuilder::new(
                    "Name",
                    "cn",
                    ConverterKind::Utf8String,
                    |w: &Widget| AttributeValue::Str(w.name.clone()),
                    |w: &mut Widget, v| {
                        if let AttributeValue::Str(s) = v {
                            w.name = s;
                        }
                        Ok(())
                    },
                )
                .build(),
            )
            .build()
            .unwrap()
    }

    fn settings() -> DispatchSettings {
        DispatchSettings { paging_enabled: true, server_max_page_size: 500 }
    }

    #[tokio::test]
    async fn no_result_short_circuit_makes_no_network_call() {
        let cm = class_map();
        let conn = RecordingConnection::new();
        let ops = QueryBuilder::<Widget>::new()
            .filter(Expr::Constant(crate::ast::Literal::Bool(false)))
            .into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        let outcome = execute_query(&conn, &cm, &opts, Scope::Subtree, false, settings(), &NullLogger).await.unwrap();
        assert!(matches!(outcome, QueryOutcome::List(v) if v.is_empty()));
        assert!(conn.requests().is_empty());
    }

    #[tokio::test]
    async fn single_or_default_rejects_multiple_entries() {
        let cm = class_map();
        let conn = RecordingConnection::new();
        conn.push_search(vec![entry("cn=a", &[]), entry("cn=b", &[])], None);
        let ops = QueryBuilder::<Widget>::new().single_or_default().into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        let err = execute_query(&conn, &cm, &opts, Scope::Subtree, false, settings(), &NullLogger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MultipleResults(_)));
    }

    #[tokio::test]
    async fn duplicate_controls_are_rejected_before_dispatch() {
        let cm = class_map();
        let conn = RecordingConnection::new();
        let ops = QueryBuilder::<Widget>::new()
            .include_controls(vec![
                crate::translator::query::ExtraControl { oid: "1.2.3".into(), critical: false, value: None },
                crate::translator::query::ExtraControl { oid: "1.2.3".into(), critical: false, value: None },
            ])
            .into_ops();
        let opts = translate(ops, &cm, None).unwrap();
        let err = execute_query(&conn, &cm, &opts, Scope::Subtree, false, settings(), &NullLogger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Translation(_)));
        assert!(conn.requests().is_empty());
    }
}
