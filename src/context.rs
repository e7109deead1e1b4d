//! `DirectoryContext` (§6): the public entry point that ties the mapping
//! registry, the query translator, and the command dispatcher together
//! behind a single façade, the way the collaborator transport's
//! `LdapConn`/`LdapConnAsync` sit in front of its lower-level `conn`,
//! `search`, and `modify` modules.

use crate::ast::Projection;
use crate::attributes::DirectoryAttributes;
use crate::change_tracker;
use crate::command::{self, DispatchSettings, Entry};
use crate::connection::{DirectoryConnection, WireRequest, WireResponse};
use crate::convert::AttributeValue;
use crate::error::{Error, Result};
use crate::logger::{Logger, NullLogger};
use crate::mapping::{self, ClassMap, DirectoryMapped};
use crate::translator::query::{translate, PipelineOp, QueryCommandOptions};
use crate::translator::select::{self, ProjectedValue};
use ldap3::controls::RawControl;
use ldap3::Mod;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Collaborator that hands out and reclaims `DirectoryConnection`s (§6
/// "connection factory").
///
/// `release` defaults to a no-op; pooled implementations override it to
/// return the connection to the pool instead of dropping it.
pub trait ConnectionFactory: Send + Sync {
    fn get(&self) -> Result<Arc<dyn DirectoryConnection>>;

    fn release(&self, _conn: Arc<dyn DirectoryConnection>) {}
}

/// A [`ConnectionFactory`] that always hands back the same connection.
/// Fits a single persistent `LdapConn`, and is what the test suite and
/// single-connection deployments use.
pub struct SingleConnectionFactory {
    conn: Arc<dyn DirectoryConnection>,
}

impl SingleConnectionFactory {
    pub fn new(conn: Arc<dyn DirectoryConnection>) -> Self {
        SingleConnectionFactory { conn }
    }
}

impl ConnectionFactory for SingleConnectionFactory {
    fn get(&self) -> Result<Arc<dyn DirectoryConnection>> {
        Ok(self.conn.clone())
    }
}

/// Process/deployment-level configuration (§4.9), distinct from the
/// per-query state `QueryCommandOptions` carries: default naming
/// context, paging defaults, timeout, and the connection collaborator.
pub struct DirectoryContextOptions {
    pub default_naming_context: Option<String>,
    pub paging_enabled: bool,
    pub server_max_page_size: i32,
    pub default_timeout: Option<Duration>,
    pub connection_factory: Arc<dyn ConnectionFactory>,
    pub registry_key: String,
    pre_delete: Option<Arc<dyn Fn(&str) -> Result<()> + Send + Sync>>,
    post_delete: Option<Arc<dyn Fn(&str) -> Result<()> + Send + Sync>>,
}

impl DirectoryContextOptions {
    pub fn new(connection_factory: Arc<dyn ConnectionFactory>) -> Self {
        DirectoryContextOptions {
            default_naming_context: None,
            paging_enabled: true,
            server_max_page_size: 500,
            default_timeout: None,
            connection_factory,
            registry_key: mapping::DEFAULT_REGISTRY_KEY.to_owned(),
            pre_delete: None,
            post_delete: None,
        }
    }

    /// Listener invoked with the target DN before a `delete` request is
    /// sent (§7 "Lifecycle listeners"). `delete` is untyped, so unlike
    /// add/update's listeners (carried on `ClassMap<T>`) this one has no
    /// type to hang off and lives on the context options instead.
    pub fn pre_delete(mut self, listener: impl Fn(&str) -> Result<()> + Send + Sync + 'static) -> Self {
        self.pre_delete = Some(Arc::new(listener));
        self
    }

    pub fn post_delete(mut self, listener: impl Fn(&str) -> Result<()> + Send + Sync + 'static) -> Self {
        self.post_delete = Some(Arc::new(listener));
        self
    }

    pub fn naming_context(mut self, dn: &str) -> Self {
        self.default_naming_context = Some(dn.to_owned());
        self
    }

    pub fn server_max_page_size(mut self, n: i32) -> Self {
        self.server_max_page_size = n;
        self
    }

    pub fn without_paging(mut self) -> Self {
        self.paging_enabled = false;
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.default_timeout = Some(d);
        self
    }

    /// Use a non-default mapping registry, for hosts that run more than
    /// one `DirectoryContext` against different schemas (§4.7
    /// `ChangeMapper`).
    pub fn registry_key(mut self, key: &str) -> Self {
        self.registry_key = key.to_owned();
        self
    }
}

/// A materialised entry paired with the bookkeeping `update`/
/// `update_and_get` need: its DN and, unless `as_no_tracking` was set, a
/// change-tracking snapshot (§3 "entry lifecycle").
#[derive(Clone, Debug)]
pub struct TrackedEntry<T> {
    pub dn: String,
    pub value: T,
    attrs: DirectoryAttributes,
}

impl<T> std::ops::Deref for TrackedEntry<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for TrackedEntry<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// The typed payload of one query result row, shaped by the query's
/// projection (§4.2): an identity projection yields a full `TrackedEntry`,
/// a `select(t => t.P)` yields a single value, and a `select(t => new {
/// ... })` yields the heterogeneous aggregate the host has no anonymous
/// type to carry.
#[derive(Clone, Debug)]
pub enum EntryValue<T> {
    Entry(TrackedEntry<T>),
    Member(AttributeValue),
    /// `select_many(t => t.P)` result for one entry (§4.3 "bounded").
    Many(Vec<AttributeValue>),
    Aggregate(HashMap<String, AttributeValue>),
    /// An `as_dynamic` entry (§9 "dynamic entries are always tracked"):
    /// the class map is bypassed entirely, so this carries the DN and
    /// raw attribute bag rather than a materialised `T`. Not
    /// parameterised over `T` since nothing here was decoded against it.
    Dynamic(String, DirectoryAttributes),
}

/// The shaped, type-level result of running a query (mirrors
/// [`command::QueryOutcome`], but with [`EntryValue`] payloads).
#[derive(Clone, Debug)]
pub enum QueryResult<T> {
    List(Vec<EntryValue<T>>),
    Single(EntryValue<T>),
    SingleOrDefault(Option<EntryValue<T>>),
    First(EntryValue<T>),
    FirstOrDefault(Option<EntryValue<T>>),
    Last(EntryValue<T>),
    Count(i64),
    LongCount(i64),
    Any(bool),
    All(bool),
}

/// A value a ranged multi-valued attribute can be decoded into (§6
/// "Range": `V ∈ {string, byte[]}`).
pub trait RangeValue: Sized {
    fn from_raw(raw: Vec<u8>) -> Result<Self>;
}

impl RangeValue for String {
    fn from_raw(raw: Vec<u8>) -> Result<Self> {
        String::from_utf8(raw).map_err(|e| Error::Translation(format!("non-UTF-8 ranged value: {e}")))
    }
}

impl RangeValue for Vec<u8> {
    fn from_raw(raw: Vec<u8>) -> Result<Self> {
        Ok(raw)
    }
}

fn dn_of<T>(instance: &T, class_map: &ClassMap<T>) -> Result<String> {
    let prop = class_map
        .properties
        .iter()
        .find(|p| p.is_distinguished_name)
        .ok_or_else(|| Error::Mapping("no property is marked as the distinguished name".into()))?;
    match prop.get(instance) {
        AttributeValue::Dn(dn) | AttributeValue::Str(dn) => Ok(dn),
        other => Err(Error::Mapping(format!(
            "{:?} did not produce a string DN (got {other:?})",
            prop.property_name
        ))),
    }
}

/// Turn a raw response [`Entry`] into a `T`, resolving the subtype via
/// `objectClass` first, decoding every mapped property, and handing any
/// leftover attributes to the catch-all sink if one is registered (§4.7
/// "sub-type discrimination", §3 "catch-all").
fn materialize_entry<T: DirectoryMapped + Default>(
    entry: Entry,
    class_map: &ClassMap<T>,
    as_no_tracking: bool,
) -> Result<TrackedEntry<T>> {
    let object_classes: Vec<String> = entry
        .attrs
        .get("objectClass")
        .map(|values| values.iter().map(|v| String::from_utf8_lossy(v).into_owned()).collect())
        .unwrap_or_default();
    let resolved = class_map.resolve_sub_type(&object_classes);

    let mut value = T::default();
    let mut consumed: HashSet<String> = HashSet::new();
    for prop in &resolved.properties {
        if prop.is_distinguished_name {
            prop.set(&mut value, AttributeValue::Dn(entry.dn.clone()))?;
            continue;
        }
        consumed.insert(prop.attribute_name.to_ascii_lowercase());
        let raw = entry.attrs.get(&prop.attribute_name).unwrap_or(&[]);
        prop.decode_into(&mut value, raw)?;
    }

    if resolved.has_catch_all() {
        let mut leftover = DirectoryAttributes::new();
        for (name, values) in entry.attrs.iter() {
            let base = name.split(';').next().unwrap_or(name);
            if !consumed.contains(&base.to_ascii_lowercase()) {
                leftover.set(name, values.to_vec());
            }
        }
        resolved.apply_catch_all(&mut value, leftover);
    }

    let mut attrs = entry.attrs;
    if as_no_tracking {
        attrs.discard_snapshot();
    }
    Ok(TrackedEntry { dn: entry.dn, value, attrs })
}

fn shape_typed<T: DirectoryMapped + Default>(
    outcome: command::QueryOutcome,
    opts: &QueryCommandOptions,
    class_map: &ClassMap<T>,
) -> Result<QueryResult<T>> {
    let to_value = |e: Entry| -> Result<EntryValue<T>> {
        if opts.as_dynamic {
            // Dynamic entries bypass the class map entirely and are
            // always tracked, regardless of `as_no_tracking` (§9).
            return Ok(EntryValue::Dynamic(e.dn, e.attrs));
        }
        match &opts.projection {
            Projection::Identity => Ok(EntryValue::Entry(materialize_entry(e, class_map, opts.as_no_tracking)?)),
            projection => match select::materialize(projection, class_map, &e.attrs)? {
                ProjectedValue::Single(v) => Ok(EntryValue::Member(v)),
                ProjectedValue::Many(vs) => Ok(EntryValue::Many(vs)),
                ProjectedValue::Aggregate(m) => Ok(EntryValue::Aggregate(m)),
            },
        }
    };

    Ok(match outcome {
        command::QueryOutcome::List(entries) => {
            QueryResult::List(entries.into_iter().map(to_value).collect::<Result<Vec<_>>>()?)
        }
        command::QueryOutcome::Single(e) => QueryResult::Single(to_value(e)?),
        command::QueryOutcome::SingleOrDefault(e) => QueryResult::SingleOrDefault(e.map(to_value).transpose()?),
        command::QueryOutcome::First(e) => QueryResult::First(to_value(e)?),
        command::QueryOutcome::FirstOrDefault(e) => QueryResult::FirstOrDefault(e.map(to_value).transpose()?),
        command::QueryOutcome::Last(e) => QueryResult::Last(to_value(e)?),
        command::QueryOutcome::Count(n) => QueryResult::Count(n),
        command::QueryOutcome::LongCount(n) => QueryResult::LongCount(n),
        command::QueryOutcome::Any(b) => QueryResult::Any(b),
        command::QueryOutcome::All(b) => QueryResult::All(b),
    })
}

/// The façade a host application programs against: one `DirectoryContext`
/// per mapping registry/connection pair, cheap to clone (it is just
/// configuration plus an `Arc`'d factory).
pub struct DirectoryContext {
    options: DirectoryContextOptions,
    logger: Arc<dyn Logger>,
}

impl DirectoryContext {
    pub fn new(options: DirectoryContextOptions) -> Self {
        DirectoryContext { options, logger: Arc::new(NullLogger) }
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            paging_enabled: self.options.paging_enabled,
            server_max_page_size: self.options.server_max_page_size,
        }
    }

    fn class_map<T: DirectoryMapped>(&self) -> Result<Arc<ClassMap<T>>> {
        mapping::registry(&self.options.registry_key).class_map::<T>()
    }

    fn connection(&self) -> Result<Arc<dyn DirectoryConnection>> {
        self.options.connection_factory.get()
    }

    fn release(&self, conn: Arc<dyn DirectoryConnection>) {
        self.options.connection_factory.release(conn);
    }

    /// `query<T>`: run a builder-composed pipeline against `T`'s mapping.
    pub async fn query<T: DirectoryMapped + Default>(&self, ops: Vec<PipelineOp>) -> Result<QueryResult<T>> {
        let class_map = self.class_map::<T>()?;
        let opts = translate(ops, &class_map, self.options.default_naming_context.as_deref())?;
        let conn = self.connection()?;
        let subtype_discriminated = !class_map.sub_type_mappings.is_empty() && !class_map.has_catch_all();
        let outcome = command::execute_query(
            conn.as_ref(),
            &class_map,
            &opts,
            opts.scope,
            subtype_discriminated,
            self.dispatch_settings(),
            self.logger.as_ref(),
        )
        .await;
        self.release(conn);
        shape_typed(outcome?, &opts, &class_map)
    }

    /// `get_by_dn<T>`: a base-scope lookup, materialised as `T`.
    pub async fn get_by_dn<T: DirectoryMapped + Default>(&self, dn: &str) -> Result<Option<TrackedEntry<T>>> {
        let class_map = self.class_map::<T>()?;
        let mut attrs: Vec<String> = class_map
            .properties
            .iter()
            .filter(|p| !p.is_distinguished_name)
            .map(|p| p.attribute_name.clone())
            .collect();
        if !class_map.sub_type_mappings.is_empty() {
            attrs.push("objectClass".to_owned());
        }
        let conn = self.connection()?;
        let entry = command::get_by_dn(conn.as_ref(), dn, &attrs, self.dispatch_settings(), self.logger.as_ref()).await;
        self.release(conn);
        entry?.map(|e| materialize_entry(e, &class_map, false)).transpose()
    }

    /// `get_by_dn(dn, attrs…)`: an untyped lookup of caller-chosen
    /// attributes.
    pub async fn get_entry_by_dn(&self, dn: &str, attrs: &[String]) -> Result<Option<Entry>> {
        let conn = self.connection()?;
        let entry = command::get_by_dn(conn.as_ref(), dn, attrs, self.dispatch_settings(), self.logger.as_ref()).await;
        self.release(conn);
        entry
    }

    /// `query(naming_context, scope, object_class?, object_classes?,
    /// object_category?)` (§6): an untyped search, gated only by
    /// object-class/category, with no mapped type to materialise into.
    pub async fn query_entries(
        &self,
        naming_context: &str,
        scope: crate::scope::Scope,
        object_classes: &[String],
        object_category: Option<&str>,
    ) -> Result<Vec<Entry>> {
        let conn = self.connection()?;
        let result = command::search_entries(
            conn.as_ref(),
            naming_context,
            scope,
            object_classes,
            object_category,
            self.dispatch_settings(),
            self.logger.as_ref(),
        )
        .await;
        self.release(conn);
        result
    }

    /// `list_server_attributes(attrs…)`: reads operational attributes off
    /// the RootDSE (the zero-length-DN, base-scope pseudo-entry).
    pub async fn list_server_attributes(&self, attrs: &[String]) -> Result<DirectoryAttributes> {
        let conn = self.connection()?;
        let entry = command::get_by_dn(conn.as_ref(), "", attrs, self.dispatch_settings(), self.logger.as_ref()).await;
        self.release(conn);
        Ok(entry?.map(|e| e.attrs).unwrap_or_default())
    }

    /// `add<T>`: add an entry whose DN comes from `T`'s distinguished-name
    /// property.
    pub async fn add<T: DirectoryMapped>(&self, instance: &T) -> Result<()> {
        let class_map = self.class_map::<T>()?;
        class_map.notify_pre_add(instance)?;
        let dn = dn_of(instance, &class_map)?;
        let attrs = change_tracker::additions_for(instance, &class_map)?;
        let conn = self.connection()?;
        let result = command::add(conn.as_ref(), &dn, attrs, Vec::new(), self.logger.as_ref()).await;
        self.release(conn);
        result?;
        class_map.notify_post_add(instance)
    }

    /// `add_and_get<T>`: add, then re-read the entry back (picking up
    /// server-assigned attributes such as `whenCreated`).
    pub async fn add_and_get<T: DirectoryMapped + Default>(&self, instance: &T) -> Result<TrackedEntry<T>> {
        self.add(instance).await?;
        let class_map = self.class_map::<T>()?;
        let dn = dn_of(instance, &class_map)?;
        self.get_by_dn::<T>(&dn).await?.ok_or(Error::NoResult(dn))
    }

    /// `add_entry`: add an untyped attribute bag under `dn`.
    pub async fn add_entry(&self, dn: &str, attrs: Vec<(String, Vec<Vec<u8>>)>, controls: Vec<RawControl>) -> Result<()> {
        let conn = self.connection()?;
        let result = command::add(conn.as_ref(), dn, attrs, controls, self.logger.as_ref()).await;
        self.release(conn);
        result
    }

    /// `update<T>`: diff `entry.value` against its tracked snapshot and
    /// send the minimal modification list (§4.6). A no-op diff sends no
    /// request at all.
    pub async fn update<T: DirectoryMapped>(&self, entry: &TrackedEntry<T>) -> Result<()> {
        let class_map = self.class_map::<T>()?;
        let mods = change_tracker::diff(&entry.value, &class_map, &entry.attrs)?;
        if mods.is_empty() {
            return Ok(());
        }
        class_map.notify_pre_update(&entry.value)?;
        let conn = self.connection()?;
        let result = command::modify(conn.as_ref(), &entry.dn, mods, Vec::new(), self.logger.as_ref()).await;
        self.release(conn);
        result?;
        class_map.notify_post_update(&entry.value)
    }

    /// `update_and_get<T>`: update, then re-read the entry back.
    pub async fn update_and_get<T: DirectoryMapped + Default>(&self, entry: &TrackedEntry<T>) -> Result<TrackedEntry<T>> {
        self.update(entry).await?;
        self.get_by_dn::<T>(&entry.dn).await?.ok_or_else(|| Error::NoResult(entry.dn.clone()))
    }

    /// `update_entry`: send a caller-built modification list directly.
    pub async fn update_entry(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>, controls: Vec<RawControl>) -> Result<()> {
        let conn = self.connection()?;
        let result = command::modify(conn.as_ref(), dn, mods, controls, self.logger.as_ref()).await;
        self.release(conn);
        result
    }

    /// `delete(dn, controls…)`.
    pub async fn delete(&self, dn: &str, controls: Vec<RawControl>) -> Result<()> {
        if let Some(listener) = &self.options.pre_delete {
            listener(dn)?;
        }
        let conn = self.connection()?;
        let result = command::delete(conn.as_ref(), dn, controls, self.logger.as_ref()).await;
        self.release(conn);
        result?;
        if let Some(listener) = &self.options.post_delete {
            listener(dn)?;
        }
        Ok(())
    }

    /// `add_attribute(dn, name, value?, controls)`.
    pub async fn add_attribute(&self, dn: &str, name: &str, value: Option<Vec<u8>>, controls: Vec<RawControl>) -> Result<()> {
        let mut values = HashSet::new();
        if let Some(v) = value {
            values.insert(v);
        }
        self.update_entry(dn, vec![Mod::Add(name.to_owned().into(), values)], controls).await
    }

    /// `delete_attribute(dn, name, value?, controls)`: omitting `value`
    /// deletes every value of `name`.
    pub async fn delete_attribute(&self, dn: &str, name: &str, value: Option<Vec<u8>>, controls: Vec<RawControl>) -> Result<()> {
        let mut values = HashSet::new();
        if let Some(v) = value {
            values.insert(v);
        }
        self.update_entry(dn, vec![Mod::Delete(name.to_owned().into(), values)], controls).await
    }

    /// `move_entry(current_dn, new_naming_context, delete_old_rdn?, controls…) → new_dn`.
    pub async fn move_entry(
        &self,
        current_dn: &str,
        new_naming_context: &str,
        delete_old_rdn: bool,
        controls: Vec<RawControl>,
    ) -> Result<String> {
        let rdn = crate::dn::rdn(current_dn)
            .ok_or_else(|| Error::InvalidArgument(format!("{current_dn:?} has no RDN component")))?
            .to_owned();
        let conn = self.connection()?;
        let result = command::modify_dn(
            conn.as_ref(),
            current_dn,
            &rdn,
            delete_old_rdn,
            Some(new_naming_context),
            controls,
            self.logger.as_ref(),
        )
        .await;
        self.release(conn);
        result
    }

    /// `rename_entry(current_dn, new_name, delete_old_rdn?, controls…) → new_dn`.
    pub async fn rename_entry(&self, current_dn: &str, new_name: &str, delete_old_rdn: bool, controls: Vec<RawControl>) -> Result<String> {
        let conn = self.connection()?;
        let result = command::modify_dn(conn.as_ref(), current_dn, new_name, delete_old_rdn, None, controls, self.logger.as_ref()).await;
        self.release(conn);
        result
    }

    /// `retrieve_ranges<V>(dn, attribute_name, start=0) → list<V>`.
    pub async fn retrieve_ranges<V: RangeValue>(&self, dn: &str, attribute_name: &str, start: u32) -> Result<Vec<V>> {
        let conn = self.connection()?;
        let raw = command::retrieve_ranges(conn.as_ref(), dn, attribute_name, start, self.dispatch_settings(), self.logger.as_ref()).await;
        self.release(conn);
        raw?.into_iter().map(V::from_raw).collect()
    }

    /// `send_request(req)`: escape hatch for operations the typed API
    /// doesn't cover.
    pub async fn send_request(&self, request: WireRequest) -> Result<WireResponse> {
        let conn = self.connection()?;
        let result = conn.send_request(request).await;
        self.release(conn);
        result
    }

    // --- Blocking counterparts (§9 "expose a single async-first API and
    // derive a blocking wrapper"). Each mirrors its `async fn` above,
    // built on `command.rs`'s `_sync` dispatch functions rather than on
    // `tokio::runtime::Runtime::block_on`, so a blocking caller never
    // needs a Tokio runtime in scope at all. ---

    pub fn query_sync<T: DirectoryMapped + Default>(&self, ops: Vec<PipelineOp>) -> Result<QueryResult<T>> {
        let class_map = self.class_map::<T>()?;
        let opts = translate(ops, &class_map, self.options.default_naming_context.as_deref())?;
        let conn = self.connection()?;
        let subtype_discriminated = !class_map.sub_type_mappings.is_empty() && !class_map.has_catch_all();
        let outcome = command::execute_query_sync(
            conn.as_ref(),
            &class_map,
            &opts,
            opts.scope,
            subtype_discriminated,
            self.dispatch_settings(),
            self.logger.as_ref(),
        );
        self.release(conn);
        shape_typed(outcome?, &opts, &class_map)
    }

    pub fn get_by_dn_sync<T: DirectoryMapped + Default>(&self, dn: &str) -> Result<Option<TrackedEntry<T>>> {
        let class_map = self.class_map::<T>()?;
        let mut attrs: Vec<String> = class_map
            .properties
            .iter()
            .filter(|p| !p.is_distinguished_name)
            .map(|p| p.attribute_name.clone())
            .collect();
        if !class_map.sub_type_mappings.is_empty() {
            attrs.push("objectClass".to_owned());
        }
        let conn = self.connection()?;
        let entry = command::get_by_dn_sync(conn.as_ref(), dn, &attrs, self.dispatch_settings(), self.logger.as_ref());
        self.release(conn);
        entry?.map(|e| materialize_entry(e, &class_map, false)).transpose()
    }

    pub fn get_entry_by_dn_sync(&self, dn: &str, attrs: &[String]) -> Result<Option<Entry>> {
        let conn = self.connection()?;
        let entry = command::get_by_dn_sync(conn.as_ref(), dn, attrs, self.dispatch_settings(), self.logger.as_ref());
        self.release(conn);
        entry
    }

    pub fn query_entries_sync(
        &self,
        naming_context: &str,
        scope: crate::scope::Scope,
        object_classes: &[String],
        object_category: Option<&str>,
    ) -> Result<Vec<Entry>> {
        let conn = self.connection()?;
        let result = command::search_entries_sync(
            conn.as_ref(),
            naming_context,
            scope,
            object_classes,
            object_category,
            self.dispatch_settings(),
            self.logger.as_ref(),
        );
        self.release(conn);
        result
    }

    pub fn list_server_attributes_sync(&self, attrs: &[String]) -> Result<DirectoryAttributes> {
        let conn = self.connection()?;
        let entry = command::get_by_dn_sync(conn.as_ref(), "", attrs, self.dispatch_settings(), self.logger.as_ref());
        self.release(conn);
        Ok(entry?.map(|e| e.attrs).unwrap_or_default())
    }

    pub fn add_sync<T: DirectoryMapped>(&self, instance: &T) -> Result<()> {
        let class_map = self.class_map::<T>()?;
        class_map.notify_pre_add(instance)?;
        let dn = dn_of(instance, &class_map)?;
        let attrs = change_tracker::additions_for(instance, &class_map)?;
        let conn = self.connection()?;
        let result = command::add_sync(conn.as_ref(), &dn, attrs, Vec::new(), self.logger.as_ref());
        self.release(conn);
        result?;
        class_map.notify_post_add(instance)
    }

    pub fn add_and_get_sync<T: DirectoryMapped + Default>(&self, instance: &T) -> Result<TrackedEntry<T>> {
        self.add_sync(instance)?;
        let class_map = self.class_map::<T>()?;
        let dn = dn_of(instance, &class_map)?;
        self.get_by_dn_sync::<T>(&dn)?.ok_or(Error::NoResult(dn))
    }

    pub fn add_entry_sync(&self, dn: &str, attrs: Vec<(String, Vec<Vec<u8>>)>, controls: Vec<RawControl>) -> Result<()> {
        let conn = self.connection()?;
        let result = command::add_sync(conn.as_ref(), dn, attrs, controls, self.logger.as_ref());
        self.release(conn);
        result
    }

    pub fn update_sync<T: DirectoryMapped>(&self, entry: &TrackedEntry<T>) -> Result<()> {
        let class_map = self.class_map::<T>()?;
        let mods = change_tracker::diff(&entry.value, &class_map, &entry.attrs)?;
        if mods.is_empty() {
            return Ok(());
        }
        class_map.notify_pre_update(&entry.value)?;
        let conn = self.connection()?;
        let result = command::modify_sync(conn.as_ref(), &entry.dn, mods, Vec::new(), self.logger.as_ref());
        self.release(conn);
        result?;
        class_map.notify_post_update(&entry.value)
    }

    pub fn update_and_get_sync<T: DirectoryMapped + Default>(&self, entry: &TrackedEntry<T>) -> Result<TrackedEntry<T>> {
        self.update_sync(entry)?;
        self.get_by_dn_sync::<T>(&entry.dn)?.ok_or_else(|| Error::NoResult(entry.dn.clone()))
    }

    pub fn update_entry_sync(&self, dn: &str, mods: Vec<Mod<Vec<u8>>>, controls: Vec<RawControl>) -> Result<()> {
        let conn = self.connection()?;
        let result = command::modify_sync(conn.as_ref(), dn, mods, controls, self.logger.as_ref());
        self.release(conn);
        result
    }

    pub fn delete_sync(&self, dn: &str, controls: Vec<RawControl>) -> Result<()> {
        if let Some(listener) = &self.options.pre_delete {
            listener(dn)?;
        }
        let conn = self.connection()?;
        let result = command::delete_sync(conn.as_ref(), dn, controls, self.logger.as_ref());
        self.release(conn);
        result?;
        if let Some(listener) = &self.options.post_delete {
            listener(dn)?;
        }
        Ok(())
    }

    pub fn add_attribute_sync(&self, dn: &str, name: &str, value: Option<Vec<u8>>, controls: Vec<RawControl>) -> Result<()> {
        let mut values = HashSet::new();
        if let Some(v) = value {
            values.insert(v);
        }
        self.update_entry_sync(dn, vec![Mod::Add(name.to_owned().into(), values)], controls)
    }

    pub fn delete_attribute_sync(&self, dn: &str, name: &str, value: Option<Vec<u8>>, controls: Vec<RawControl>) -> Result<()> {
        let mut values = HashSet::new();
        if let Some(v) = value {
            values.insert(v);
        }
        self.update_entry_sync(dn, vec![Mod::Delete(name.to_owned().into(), values)], controls)
    }

    pub fn move_entry_sync(&self, current_dn: &str, new_naming_context: &str, delete_old_rdn: bool, controls: Vec<RawControl>) -> Result<String> {
        let rdn = crate::dn::rdn(current_dn)
            .ok_or_else(|| Error::InvalidArgument(format!("{current_dn:?} has no RDN component")))?
            .to_owned();
        let conn = self.connection()?;
        let result = command::modify_dn_sync(
            conn.as_ref(),
            current_dn,
            &rdn,
            delete_old_rdn,
            Some(new_naming_context),
            controls,
            self.logger.as_ref(),
        );
        self.release(conn);
        result
    }

    pub fn rename_entry_sync(&self, current_dn: &str, new_name: &str, delete_old_rdn: bool, controls: Vec<RawControl>) -> Result<String> {
        let conn = self.connection()?;
        let result = command::modify_dn_sync(conn.as_ref(), current_dn, new_name, delete_old_rdn, None, controls, self.logger.as_ref());
        self.release(conn);
        result
    }

    pub fn retrieve_ranges_sync<V: RangeValue>(&self, dn: &str, attribute_name: &str, start: u32) -> Result<Vec<V>> {
        let conn = self.connection()?;
        let raw = command::retrieve_ranges_sync(conn.as_ref(), dn, attribute_name, start, self.dispatch_settings(), self.logger.as_ref());
        self.release(conn);
        raw?.into_iter().map(V::from_raw).collect()
    }

    /// `send_request` escape hatch, blocking.
    pub fn send_request_sync(&self, request: WireRequest) -> Result<WireResponse> {
        let conn = self.connection()?;
        let result = conn.send_request_sync(request);
        self.release(conn);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::connection::{entry, RecordingConnection};
    use crate::convert::ConverterKind;
    use crate::mapping::{ClassMapBuilder, PropertyMapBuilder};
    use crate::translator::query::QueryBuilder;

    #[derive(Default)]
    struct Widget {
        dn: String,
        name: String,
    }

    impl DirectoryMapped for Widget {
        fn build_class_map() -> Result<ClassMap<Widget>> {
            ClassMapBuilder::new()
                .naming_context("ou=widgets,dc=example,dc=com")
                .object_class("widget", true)
                .property(
                    PropertyMapBuilder::new(
                        "Dn",
                        "distinguishedName",
                        ConverterKind::DistinguishedName,
                        |w: &Widget| AttributeValue::Dn(w.dn.clone()),
                        |w: &mut Widget, v| {
                            if let AttributeValue::Dn(dn) = v {
                                w.dn = dn;
                            }
                            Ok(())
                        },
                    )
                    .distinguished_name()
                    .build(),
                )
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
        }
    }

    fn context(conn: RecordingConnection, registry_key: &str) -> DirectoryContext {
        let options = DirectoryContextOptions::new(Arc::new(SingleConnectionFactory::new(Arc::new(conn)))).registry_key(registry_key);
        DirectoryContext::new(options)
    }

    #[tokio::test]
    async fn query_materializes_entries_with_dn_and_snapshot() {
        let conn = RecordingConnection::new();
        conn.push_search(vec![entry("cn=alice,ou=widgets,dc=example,dc=com", &[("cn", vec!["alice"])])], None);
        let ctx = context(conn, "context-tests-query");
        let ops = QueryBuilder::<Widget>::new().filter(Expr::prop("Name").eq("alice")).into_ops();
        let result = ctx.query::<Widget>(ops).await.unwrap();
        let QueryResult::List(mut rows) = result else { panic!("expected a list") };
        assert_eq!(rows.len(), 1);
        let EntryValue::Entry(tracked) = rows.remove(0) else { panic!("expected an entry") };
        assert_eq!(tracked.dn, "cn=alice,ou=widgets,dc=example,dc=com");
        assert_eq!(tracked.value.name, "alice");
    }

    #[tokio::test]
    async fn update_with_no_changes_sends_no_request() {
        let conn = RecordingConnection::new();
        let ctx = context(conn, "context-tests-update");
        let tracked = TrackedEntry {
            dn: "cn=alice,ou=widgets,dc=example,dc=com".to_owned(),
            value: Widget { dn: "cn=alice,ou=widgets,dc=example,dc=com".to_owned(), name: "alice".to_owned() },
            attrs: DirectoryAttributes::from_response({
                let mut m = std::collections::HashMap::new();
                m.insert("cn".to_owned(), vec![b"alice".to_vec()]);
                m
            }),
        };
        ctx.update(&tracked).await.unwrap();
    }

    #[tokio::test]
    async fn add_and_get_reads_back_the_new_entry() {
        let conn = RecordingConnection::new();
        conn.push_ok();
        conn.push_search(vec![entry("cn=bob,ou=widgets,dc=example,dc=com", &[("cn", vec!["bob"])])], None);
        let ctx = context(conn, "context-tests-add");
        let widget = Widget { dn: "cn=bob,ou=widgets,dc=example,dc=com".to_owned(), name: "bob".to_owned() };
        let tracked = ctx.add_and_get(&widget).await.unwrap();
        assert_eq!(tracked.value.name, "bob");
    }

    #[test]
    fn query_sync_materializes_without_a_tokio_runtime() {
        let conn = RecordingConnection::new();
        conn.push_search(vec![entry("cn=carol,ou=widgets,dc=example,dc=com", &[("cn", vec!["carol"])])], None);
        let ctx = context(conn, "context-tests-query-sync");
        let ops = QueryBuilder::<Widget>::new().filter(Expr::prop("Name").eq("carol")).into_ops();
        let result = ctx.query_sync::<Widget>(ops).unwrap();
        let QueryResult::List(mut rows) = result else { panic!("expected a list") };
        let EntryValue::Entry(tracked) = rows.remove(0) else { panic!("expected an entry") };
        assert_eq!(tracked.value.name, "carol");
    }

    #[test]
    fn as_dynamic_bypasses_the_class_map() {
        let conn = RecordingConnection::new();
        conn.push_search(vec![entry("cn=dana,ou=widgets,dc=example,dc=com", &[("cn", vec!["dana"])])], None);
        let ctx = context(conn, "context-tests-dynamic");
        let ops = QueryBuilder::<Widget>::new().as_dynamic().into_ops();
        let result = ctx.query_sync::<Widget>(ops).unwrap();
        let QueryResult::List(mut rows) = result else { panic!("expected a list") };
        let EntryValue::Dynamic(dn, attrs) = rows.remove(0) else { panic!("expected a dynamic entry") };
        assert_eq!(dn, "cn=dana,ou=widgets,dc=example,dc=com");
        assert_eq!(attrs.get("cn").unwrap(), &[b"dana".to_vec()]);
    }
}
