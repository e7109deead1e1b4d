//! Untyped attribute bags (§3 `DirectoryAttributes`).
//!
//! Grounded on the collaborator transport's `SearchEntry`, which already
//! represents a response entry as an object name plus a
//! `HashMap<String, Vec<Vec<u8>>>` of attribute values; this type adds
//! case-insensitive lookup and ranged-attribute bookkeeping on top.

use std::collections::HashMap;

/// Parse the `attr;range=N-M` suffix convention used for AD range
/// retrieval. Returns `(base_name, start, end)` where `end` is `None` for
/// the `*` (final-chunk) marker.
fn parse_range_suffix(name: &str) -> Option<(&str, u32, Option<u32>)> {
    let (base, suffix) = name.split_once(";range=")?;
    let (start, end) = suffix.split_once('-')?;
    let start: u32 = start.parse().ok()?;
    let end = if end == "*" {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((base, start, end))
}

#[derive(Clone, Debug, Default)]
struct AttributeEntry {
    /// The name as it appeared on the wire, e.g. `member;range=0-1499`.
    original_name: String,
    values: Vec<Vec<u8>>,
}

/// An untyped, case-insensitively-keyed bag of LDAP attribute values.
///
/// Used directly when no mapped type `T` is supplied to a query, and as
/// the intermediate representation every materialiser reads from
/// regardless of whether the final result is typed.
#[derive(Clone, Debug, Default)]
pub struct DirectoryAttributes {
    by_lower_name: HashMap<String, AttributeEntry>,
    /// Snapshot of values at materialisation time, for change tracking.
    /// Absent for freshly-constructed (not server-derived) instances.
    snapshot: Option<HashMap<String, Vec<Vec<u8>>>>,
}

impl DirectoryAttributes {
    /// An empty attribute bag with no change-tracking snapshot.
    pub fn new() -> Self {
        DirectoryAttributes {
            by_lower_name: HashMap::new(),
            snapshot: None,
        }
    }

    /// Build from a server response entry's attribute map, taking a
    /// snapshot for later diffing.
    pub fn from_response(entries: HashMap<String, Vec<Vec<u8>>>) -> Self {
        let mut attrs = DirectoryAttributes::new();
        for (name, values) in entries {
            attrs.insert_raw(name, values);
        }
        attrs.snapshot = Some(attrs.current_raw_map());
        attrs
    }

    fn current_raw_map(&self) -> HashMap<String, Vec<Vec<u8>>> {
        self.by_lower_name
            .values()
            .map(|e| (e.original_name.clone(), e.values.clone()))
            .collect()
    }

    fn insert_raw(&mut self, name: String, values: Vec<Vec<u8>>) {
        let lower = base_name(&name).to_ascii_lowercase();
        self.by_lower_name.insert(
            lower,
            AttributeEntry {
                original_name: name,
                values,
            },
        );
    }

    /// Set (replace) an attribute's values.
    pub fn set(&mut self, name: &str, values: Vec<Vec<u8>>) {
        self.insert_raw(name.to_owned(), values);
    }

    /// Remove an attribute entirely.
    pub fn remove(&mut self, name: &str) {
        self.by_lower_name.remove(&name.to_ascii_lowercase());
    }

    /// Raw byte values for an attribute, case-insensitively, ignoring any
    /// `;range=` suffix that was present on the wire.
    pub fn get(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.by_lower_name
            .get(&name.to_ascii_lowercase())
            .map(|e| e.values.as_slice())
    }

    /// Whether the attribute is present (regardless of whether its value
    /// list is empty).
    pub fn contains(&self, name: &str) -> bool {
        self.by_lower_name.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterate over `(attribute_name, values)`, yielding the name as it
    /// originally appeared (including any range suffix).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.by_lower_name
            .values()
            .map(|e| (e.original_name.as_str(), e.values.as_slice()))
    }

    /// True if this bag was materialised from a server response and can
    /// therefore be diffed by the change tracker.
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The attribute map as it was at materialisation time.
    pub fn snapshot(&self) -> Option<&HashMap<String, Vec<Vec<u8>>>> {
        self.snapshot.as_ref()
    }

    /// The attribute map as it stands now.
    pub fn current(&self) -> HashMap<String, Vec<Vec<u8>>> {
        self.current_raw_map()
    }

    /// Refresh the change-tracking snapshot to the current values,
    /// e.g. after a successful update.
    pub fn refresh_snapshot(&mut self) {
        self.snapshot = Some(self.current_raw_map());
    }

    /// Discard the change-tracking snapshot, e.g. for entries
    /// materialised with `as_no_tracking`.
    pub fn discard_snapshot(&mut self) {
        self.snapshot = None;
    }
}

fn base_name(name: &str) -> &str {
    parse_range_suffix(name).map(|(b, _, _)| b).unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut attrs = DirectoryAttributes::new();
        attrs.set("CN", vec![b"alice".to_vec()]);
        assert_eq!(attrs.get("cn").unwrap(), &[b"alice".to_vec()]);
    }

    #[test]
    fn ranged_suffix_is_preserved_but_keyed_by_base_name() {
        let mut attrs = DirectoryAttributes::new();
        attrs.set("member;range=0-1499", vec![b"cn=a".to_vec()]);
        assert!(attrs.contains("member"));
        let (name, _) = attrs.iter().next().unwrap();
        assert_eq!(name, "member;range=0-1499");
    }

    #[test]
    fn from_response_takes_a_snapshot() {
        let mut raw = HashMap::new();
        raw.insert("cn".to_owned(), vec![b"alice".to_vec()]);
        let attrs = DirectoryAttributes::from_response(raw);
        assert!(attrs.has_snapshot());
        assert_eq!(attrs.snapshot().unwrap().get("cn").unwrap().len(), 1);
    }

    #[test]
    fn fresh_bag_has_no_snapshot() {
        let attrs = DirectoryAttributes::new();
        assert!(!attrs.has_snapshot());
    }
}
