//! The change tracker (§4.6): diffs a materialised entry's current
//! property values against its snapshot and emits a minimal
//! modification list.

use crate::attributes::DirectoryAttributes;
use crate::error::{Error, Result};
use crate::mapping::{ClassMap, ReadOnly};
use ldap3::Mod;
use std::collections::HashSet;

/// Which modification phase a diff is being computed for; controls
/// which `read_only` properties are excluded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Add,
    Update,
}

fn excluded(read_only: ReadOnly, phase: Phase) -> bool {
    match (read_only, phase) {
        (ReadOnly::Never, _) => false,
        (ReadOnly::Always, _) => true,
        (ReadOnly::OnAdd, Phase::Add) => true,
        (ReadOnly::OnAdd, Phase::Update) => false,
        (ReadOnly::OnUpdate, Phase::Update) => true,
        (ReadOnly::OnUpdate, Phase::Add) => false,
    }
}

/// Build the full attribute set for `Add` requests: every non-null
/// mapped property not excluded for the add phase (§3 "Entry lifecycle").
pub fn additions_for<T>(instance: &T, class_map: &ClassMap<T>) -> Result<Vec<(String, Vec<Vec<u8>>)>> {
    let mut attrs = Vec::new();
    for prop in &class_map.properties {
        if prop.is_distinguished_name || excluded(prop.read_only, Phase::Add) {
            continue;
        }
        let encoded = prop.encode(instance)?;
        if !encoded.is_empty() {
            attrs.push((prop.attribute_name.clone(), encoded));
        }
    }
    Ok(attrs)
}

/// Diff a materialised entry against its snapshot, producing the
/// minimal modification list for `ModifyRequest` (§8 property 4).
///
/// Errors with [`Error::UntrackedUpdate`] if `attrs` carries no snapshot
/// (§4.6 "if tracking was disabled").
pub fn diff<T>(instance: &T, class_map: &ClassMap<T>, attrs: &DirectoryAttributes) -> Result<Vec<Mod<Vec<u8>>>> {
    let Some(snapshot) = attrs.snapshot() else {
        return Err(Error::UntrackedUpdate);
    };
    let mut mods = Vec::new();
    for prop in &class_map.properties {
        if prop.is_distinguished_name || excluded(prop.read_only, Phase::Update) {
            continue;
        }
        let original = snapshot.get(&prop.attribute_name).cloned().unwrap_or_default();
        let current = prop.encode(instance)?;
        if original == current {
            continue;
        }
        if prop.multi_valued {
            mods.extend(multi_valued_diff(&prop.attribute_name, &original, &current));
        } else {
            mods.push(single_valued_diff(&prop.attribute_name, &original, &current));
        }
    }
    Ok(mods)
}

fn single_valued_diff(attr: &str, original: &[Vec<u8>], current: &[Vec<u8>]) -> Mod<Vec<u8>> {
    let name = attr.as_bytes().to_vec();
    if original.is_empty() {
        Mod::Add(name, current.iter().cloned().collect())
    } else if current.is_empty() {
        Mod::Delete(name, HashSet::new())
    } else {
        Mod::Replace(name, current.iter().cloned().collect())
    }
}

/// Multi-valued attributes diff by set difference rather than a full
/// replace, to reduce replication cost (§4.6).
fn multi_valued_diff(attr: &str, original: &[Vec<u8>], current: &[Vec<u8>]) -> Vec<Mod<Vec<u8>>> {
    let name = attr.as_bytes().to_vec();
    if original.is_empty() {
        return vec![Mod::Add(name, current.iter().cloned().collect())];
    }
    if current.is_empty() {
        return vec![Mod::Delete(name, HashSet::new())];
    }
    let original_set: HashSet<&Vec<u8>> = original.iter().collect();
    let current_set: HashSet<&Vec<u8>> = current.iter().collect();
    let added: HashSet<Vec<u8>> = current_set.difference(&original_set).map(|v| (*v).clone()).collect();
    let removed: HashSet<Vec<u8>> = original_set.difference(&current_set).map(|v| (*v).clone()).collect();
    let mut mods = Vec::new();
    if !added.is_empty() {
        mods.push(Mod::Add(name.clone(), added));
    }
    if !removed.is_empty() {
        mods.push(Mod::Delete(name, removed));
    }
    mods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{AttributeValue, ConverterKind};
    use crate::mapping::{ClassMapBuilder, PropertyMapBuilder};
    use std::collections::HashMap;

    struct Widget {
        name: String,
        tags: Vec<String>,
    }

    fn class_map() -> ClassMap<Widget> {
        ClassMapBuilder::new()
            .dn_property(None)
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
            .property(
                PropertyMapBuilder::new(
                    "Tags",
                    "tag",
                    ConverterKind::Utf8String,
                    |w: &Widget| AttributeValue::Multi(w.tags.iter().cloned().map(AttributeValue::Str).collect()),
                    |w: &mut Widget, v| {
                        if let AttributeValue::Multi(vs) = v {
                            w.tags = vs
                                .into_iter()
                                .filter_map(|v| if let AttributeValue::Str(s) = v { Some(s) } else { None })
                                .collect();
                        }
                        Ok(())
                    },
                )
                .multi_valued()
                .build(),
            )
            .build()
            .unwrap()
    }

    fn attrs_with_snapshot(cn: &str, tags: &[&str]) -> DirectoryAttributes {
        let mut raw = HashMap::new();
        raw.insert("cn".to_owned(), vec![cn.as_bytes().to_vec()]);
        raw.insert("tag".to_owned(), tags.iter().map(|t| t.as_bytes().to_vec()).collect());
        DirectoryAttributes::from_response(raw)
    }

    #[test]
    fn unchanged_property_produces_no_modification() {
        let cm = class_map();
        let attrs = attrs_with_snapshot("alice", &["a", "b"]);
        let w = Widget { name: "alice".to_owned(), tags: vec!["a".to_owned(), "b".to_owned()] };
        let mods = diff(&w, &cm, &attrs).unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn changed_single_valued_property_emits_replace() {
        let cm = class_map();
        let attrs = attrs_with_snapshot("alice", &[]);
        let w = Widget { name: "bob".to_owned(), tags: vec![] };
        let mods = diff(&w, &cm, &attrs).unwrap();
        assert_eq!(mods.len(), 1);
        assert!(matches!(&mods[0], Mod::Replace(attr, _) if attr == b"cn"));
    }

    #[test]
    fn multi_valued_diff_emits_add_and_delete_not_replace() {
        let cm = class_map();
        let attrs = attrs_with_snapshot("alice", &["a", "b"]);
        let w = Widget { name: "alice".to_owned(), tags: vec!["b".to_owned(), "c".to_owned()] };
        let mods = diff(&w, &cm, &attrs).unwrap();
        assert_eq!(mods.len(), 2);
        assert!(mods.iter().any(|m| matches!(m, Mod::Add(attr, vs) if attr == b"tag" && vs.contains(&b"c".to_vec()))));
        assert!(mods.iter().any(|m| matches!(m, Mod::Delete(attr, vs) if attr == b"tag" && vs.contains(&b"a".to_vec()))));
    }

    #[test]
    fn untracked_attributes_fail_with_untracked_update() {
        let cm = class_map();
        let attrs = DirectoryAttributes::new();
        let w = Widget { name: "alice".to_owned(), tags: vec![] };
        assert!(matches!(diff(&w, &cm, &attrs), Err(Error::UntrackedUpdate)));
    }
}
