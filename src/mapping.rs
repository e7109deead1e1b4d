//! The mapping registry (§4.7) and the `ClassMap<T>`/`PropertyMap<T>`
//! data model (§3).
//!
//! The source environment scans attribute annotations via runtime
//! reflection (§9 "Host reflection → explicit registration"). This
//! environment has neither runtime reflection nor a stable proc-macro
//! dependency in the collaborator stack to derive one, so every mapped
//! type implements [`DirectoryMapped`] and builds its own `ClassMap` with
//! [`ClassMapBuilder`], the same "construct an immutable description with
//! a builder" idiom the collaborator transport crate uses for connection
//! settings.

use crate::attributes::DirectoryAttributes;
use crate::convert::{self, AttributeValue, ConverterKind};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

/// When a mapped property is writable from this crate's perspective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOnly {
    Never,
    OnAdd,
    OnUpdate,
    Always,
}

type Getter<T> = Arc<dyn Fn(&T) -> AttributeValue + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, AttributeValue) -> Result<()> + Send + Sync>;
type CatchAllGetter<T> = Arc<dyn Fn(&T) -> DirectoryAttributes + Send + Sync>;
type CatchAllSetter<T> = Arc<dyn Fn(&mut T, DirectoryAttributes) + Send + Sync>;
/// A lifecycle listener invoked around `add`/`update` (§7 "Lifecycle
/// listeners"). Listeners observe and may veto by returning `Err`; since
/// `add`/`update` take `&T` rather than `&mut T`, listeners here are
/// validation/audit hooks, not entry mutators (see DESIGN.md's Open
/// Question for this restriction).
type Listener<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// A single mapped property: its LDAP attribute name, converter, and the
/// accessor pair used to move values to and from the host type.
pub struct PropertyMap<T> {
    pub property_name: String,
    pub attribute_name: String,
    pub converter: ConverterKind,
    pub multi_valued: bool,
    pub read_only: ReadOnly,
    pub is_distinguished_name: bool,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> PropertyMap<T> {
    pub fn get(&self, instance: &T) -> AttributeValue {
        (self.get)(instance)
    }

    pub fn set(&self, instance: &mut T, value: AttributeValue) -> Result<()> {
        (self.set)(instance, value)
    }

    /// Encode the property's current value to raw LDAP attribute values.
    pub fn encode(&self, instance: &T) -> Result<Vec<Vec<u8>>> {
        match self.get(instance) {
            AttributeValue::Null => Ok(Vec::new()),
            AttributeValue::Multi(values) => values
                .iter()
                .map(|v| convert::encode_one(&self.converter, v))
                .collect(),
            single => Ok(vec![convert::encode_one(&self.converter, &single)?]),
        }
    }

    /// Decode raw LDAP attribute values and write them into `instance`.
    pub fn decode_into(&self, instance: &mut T, raw: &[Vec<u8>]) -> Result<()> {
        let value = if raw.is_empty() {
            AttributeValue::Null
        } else if self.multi_valued {
            convert::decode_multi(&self.converter, raw)?
        } else {
            convert::decode_one(&self.converter, &raw[0])?
        };
        self.set(instance, value)
    }
}

/// A fluent builder for a single [`PropertyMap`].
pub struct PropertyMapBuilder<T> {
    property_name: String,
    attribute_name: String,
    converter: ConverterKind,
    multi_valued: bool,
    read_only: ReadOnly,
    is_distinguished_name: bool,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> PropertyMapBuilder<T> {
    pub fn new(
        property_name: &str,
        attribute_name: &str,
        converter: ConverterKind,
        get: impl Fn(&T) -> AttributeValue + Send + Sync + 'static,
        set: impl Fn(&mut T, AttributeValue) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        PropertyMapBuilder {
            property_name: property_name.to_owned(),
            attribute_name: attribute_name.to_owned(),
            converter,
            multi_valued: false,
            read_only: ReadOnly::Never,
            is_distinguished_name: false,
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn read_only(mut self, when: ReadOnly) -> Self {
        self.read_only = when;
        self
    }

    pub fn distinguished_name(mut self) -> Self {
        self.is_distinguished_name = true;
        self.read_only = ReadOnly::Always;
        self
    }

    pub fn build(self) -> PropertyMap<T> {
        PropertyMap {
            property_name: self.property_name,
            attribute_name: self.attribute_name,
            converter: self.converter,
            multi_valued: self.multi_valued,
            read_only: self.read_only,
            is_distinguished_name: self.is_distinguished_name,
            get: self.get,
            set: self.set,
        }
    }
}

/// An immutable, per-type description of how a host type binds to
/// directory schema (§3 `ClassMap<T>`).
pub struct ClassMap<T> {
    pub naming_context: Option<String>,
    /// Object classes in declared order, with their include-in-filter flag.
    pub object_classes: Vec<(String, bool)>,
    pub object_category: Option<(String, bool)>,
    pub without_sub_type_mapping: bool,
    /// Attribute name for the DN property; `None` only if no property on
    /// `T` is marked as the DN.
    pub dn_attribute_name: Option<String>,
    pub properties: Vec<PropertyMap<T>>,
    catch_all: Option<(CatchAllGetter<T>, CatchAllSetter<T>)>,
    /// More specific maps keyed by an object-class signature, consulted
    /// when a response entry's `objectClass` values indicate a subtype.
    pub sub_type_mappings: HashMap<String, Box<ClassMap<T>>>,
    pre_add: Option<Listener<T>>,
    post_add: Option<Listener<T>>,
    pre_update: Option<Listener<T>>,
    post_update: Option<Listener<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ClassMap<T> {
    pub fn property(&self, name: &str) -> Option<&PropertyMap<T>> {
        self.properties.iter().find(|p| p.property_name == name)
    }

    pub fn notify_pre_add(&self, instance: &T) -> Result<()> {
        self.pre_add.as_ref().map_or(Ok(()), |f| f(instance))
    }

    pub fn notify_post_add(&self, instance: &T) -> Result<()> {
        self.post_add.as_ref().map_or(Ok(()), |f| f(instance))
    }

    pub fn notify_pre_update(&self, instance: &T) -> Result<()> {
        self.pre_update.as_ref().map_or(Ok(()), |f| f(instance))
    }

    pub fn notify_post_update(&self, instance: &T) -> Result<()> {
        self.post_update.as_ref().map_or(Ok(()), |f| f(instance))
    }

    pub fn has_catch_all(&self) -> bool {
        self.catch_all.is_some()
    }

    pub fn apply_catch_all(&self, instance: &mut T, leftover: DirectoryAttributes) {
        if let Some((_, set)) = &self.catch_all {
            set(instance, leftover);
        }
    }

    pub fn catch_all_attributes(&self, instance: &T) -> Option<DirectoryAttributes> {
        self.catch_all.as_ref().map(|(get, _)| get(instance))
    }

    /// Resolve the most specific `ClassMap` for a response entry given
    /// its `objectClass` values, falling back to `self`.
    pub fn resolve_sub_type(&self, object_classes: &[String]) -> &ClassMap<T> {
        if self.without_sub_type_mapping {
            return self;
        }
        for signature in object_classes {
            if let Some(sub) = self.sub_type_mappings.get(signature) {
                return sub;
            }
        }
        self
    }
}

/// A fluent builder for [`ClassMap`].
pub struct ClassMapBuilder<T> {
    naming_context: Option<String>,
    object_classes: Vec<(String, bool)>,
    object_category: Option<(String, bool)>,
    without_sub_type_mapping: bool,
    dn_attribute_name: Option<String>,
    properties: Vec<PropertyMap<T>>,
    catch_all: Option<(CatchAllGetter<T>, CatchAllSetter<T>)>,
    sub_type_mappings: HashMap<String, Box<ClassMap<T>>>,
    pre_add: Option<Listener<T>>,
    post_add: Option<Listener<T>>,
    pre_update: Option<Listener<T>>,
    post_update: Option<Listener<T>>,
}

impl<T> Default for ClassMapBuilder<T> {
    fn default() -> Self {
        ClassMapBuilder {
            naming_context: None,
            object_classes: Vec::new(),
            object_category: None,
            without_sub_type_mapping: false,
            dn_attribute_name: None,
            properties: Vec::new(),
            catch_all: None,
            sub_type_mappings: HashMap::new(),
            pre_add: None,
            post_add: None,
            pre_update: None,
            post_update: None,
        }
    }
}

impl<T> ClassMapBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn naming_context(mut self, dn_suffix: &str) -> Self {
        self.naming_context = Some(dn_suffix.to_owned());
        self
    }

    pub fn object_class(mut self, class: &str, include_in_filter: bool) -> Self {
        self.object_classes.push((class.to_owned(), include_in_filter));
        self
    }

    pub fn object_category(mut self, category: &str, include_in_filter: bool) -> Self {
        self.object_category = Some((category.to_owned(), include_in_filter));
        self
    }

    pub fn without_sub_type_mapping(mut self) -> Self {
        self.without_sub_type_mapping = true;
        self
    }

    /// Register the DN property; defaults the attribute name to
    /// `distinguishedName` unless overridden via `attribute_name`.
    pub fn dn_property(mut self, attribute_name: Option<&str>) -> Self {
        self.dn_attribute_name = Some(attribute_name.unwrap_or("distinguishedName").to_owned());
        self
    }

    pub fn property(mut self, property: PropertyMap<T>) -> Self {
        self.properties.push(property);
        self
    }

    pub fn catch_all(
        mut self,
        get: impl Fn(&T) -> DirectoryAttributes + Send + Sync + 'static,
        set: impl Fn(&mut T, DirectoryAttributes) + Send + Sync + 'static,
    ) -> Self {
        self.catch_all = Some((Arc::new(get), Arc::new(set)));
        self
    }

    pub fn sub_type(mut self, signature: &str, map: ClassMap<T>) -> Self {
        self.sub_type_mappings.insert(signature.to_owned(), Box::new(map));
        self
    }

    pub fn pre_add(mut self, listener: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.pre_add = Some(Arc::new(listener));
        self
    }

    pub fn post_add(mut self, listener: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.post_add = Some(Arc::new(listener));
        self
    }

    pub fn pre_update(mut self, listener: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.pre_update = Some(Arc::new(listener));
        self
    }

    pub fn post_update(mut self, listener: impl Fn(&T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.post_update = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> Result<ClassMap<T>> {
        for p in &self.properties {
            if p.attribute_name.is_empty() {
                return Err(Error::Mapping(format!(
                    "property {:?} has an empty attribute name",
                    p.property_name
                )));
            }
        }
        Ok(ClassMap {
            naming_context: self.naming_context,
            object_classes: self.object_classes,
            object_category: self.object_category,
            without_sub_type_mapping: self.without_sub_type_mapping,
            dn_attribute_name: self.dn_attribute_name,
            properties: self.properties,
            catch_all: self.catch_all,
            sub_type_mappings: self.sub_type_mappings,
            pre_add: self.pre_add,
            post_add: self.post_add,
            pre_update: self.pre_update,
            post_update: self.post_update,
            _marker: PhantomData,
        })
    }
}

/// A host type that can describe its own directory mapping.
///
/// Implementations build their `ClassMap` once; [`MappingRegistry`]
/// caches the result behind `TypeId` lookup so the registry key acts as
/// the stand-in for the source environment's runtime `Type` handle.
pub trait DirectoryMapped: Sized + Send + Sync + 'static {
    fn build_class_map() -> Result<ClassMap<Self>>;
}

/// A read-mostly, keyed set of per-type `ClassMap`s.
///
/// Registration (`register`) takes a write lock; lookups
/// (`class_map`) take a read lock, so concurrent readers never block
/// each other, matching §5's concurrency contract for the mapping layer.
#[derive(Default)]
pub struct MappingRegistry {
    maps: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        MappingRegistry::default()
    }

    /// Register `T`. Fails if `T` is already mapped in this registry.
    pub fn register<T: DirectoryMapped>(&self) -> Result<()> {
        let id = TypeId::of::<T>();
        {
            let maps = self.maps.read().unwrap();
            if maps.contains_key(&id) {
                return Err(Error::Mapping(format!(
                    "type {} is already mapped",
                    std::any::type_name::<T>()
                )));
            }
        }
        let class_map = T::build_class_map()?;
        let mut maps = self.maps.write().unwrap();
        if maps.contains_key(&id) {
            return Err(Error::Mapping(format!(
                "type {} is already mapped",
                std::any::type_name::<T>()
            )));
        }
        maps.insert(id, Arc::new(class_map));
        Ok(())
    }

    /// Fetch the registered `ClassMap<T>`, registering it on first use.
    pub fn class_map<T: DirectoryMapped>(&self) -> Result<Arc<ClassMap<T>>> {
        {
            let maps = self.maps.read().unwrap();
            if let Some(any) = maps.get(&TypeId::of::<T>()) {
                return any
                    .clone()
                    .downcast::<ClassMap<T>>()
                    .map_err(|_| Error::Mapping("mapping registry type mismatch".into()));
            }
        }
        self.register::<T>()?;
        self.class_map::<T>()
    }
}

lazy_static! {
    static ref REGISTRIES: RwLock<HashMap<String, Arc<MappingRegistry>>> = RwLock::new(HashMap::new());
}

/// The default registry key (`""`), used when a `DirectoryContext` is
/// not configured with an explicit key.
pub const DEFAULT_REGISTRY_KEY: &str = "";

/// Atomically swap the active registry under `key` (§4.7 `ChangeMapper`).
pub fn change_mapper(key: &str, registry: MappingRegistry) {
    REGISTRIES
        .write()
        .unwrap()
        .insert(key.to_owned(), Arc::new(registry));
}

/// Fetch (creating if absent) the registry active under `key`.
pub fn registry(key: &str) -> Arc<MappingRegistry> {
    {
        let registries = REGISTRIES.read().unwrap();
        if let Some(r) = registries.get(key) {
            return r.clone();
        }
    }
    let mut registries = REGISTRIES.write().unwrap();
    registries
        .entry(key.to_owned())
        .or_insert_with(|| Arc::new(MappingRegistry::new()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Person {
        cn: String,
        dn: String,
    }

    impl DirectoryMapped for Person {
        fn build_class_map() -> Result<ClassMap<Person>> {
            ClassMapBuilder::new()
                .naming_context("ou=people,dc=example,dc=com")
                .object_class("person", true)
                .dn_property(None)
                .property(
                    PropertyMapBuilder::new(
                        "Cn",
                        "cn",
                        ConverterKind::Utf8String,
                        |p: &Person| AttributeValue::Str(p.cn.clone()),
                        |p: &mut Person, v| {
                            if let AttributeValue::Str(s) = v {
                                p.cn = s;
                            }
                            Ok(())
                        },
                    )
                    .build(),
                )
                .build()
        }
    }

    #[test]
    fn double_registration_fails() {
        let reg = MappingRegistry::new();
        reg.register::<Person>().unwrap();
        let err = reg.register::<Person>().unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }

    #[test]
    fn class_map_auto_registers_on_first_use() {
        let reg = MappingRegistry::new();
        let map = reg.class_map::<Person>().unwrap();
        assert_eq!(map.object_classes, vec![("person".to_owned(), true)]);
    }

    #[test]
    fn empty_attribute_name_is_rejected() {
        let built: Result<ClassMap<Person>> = ClassMapBuilder::new()
            .property(
                PropertyMapBuilder::new(
                    "Cn",
                    "",
                    ConverterKind::Utf8String,
                    |p: &Person| AttributeValue::Str(p.cn.clone()),
                    |_p: &mut Person, _v| Ok(()),
                )
                .build(),
            )
            .build();
        assert!(built.is_err());
    }
}
