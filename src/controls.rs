//! Server-side controls this crate can emit (§6 "Controls emitted").
//!
//! `ldap3::controls::PagedResults` already exists upstream and is used
//! as-is. The others have no upstream implementation, so they are BER-
//! encoded here with `lber`, the same ASN.1 primitive crate the
//! collaborator transport's own control implementations (e.g. its
//! `PagedResults`) are built on — see `paged_results.rs` in that crate's
//! `controls_impl` module for the idiom this follows.

use lber::common::TagClass;
use lber::structures::{ASNTag, Boolean, Integer, OctetString, Sequence, Tag};
use lber::write;
use ldap3::controls::RawControl;
use bytes::BytesMut;

pub const SERVER_SIDE_SORT_OID: &str = "1.2.840.113556.1.4.473";
pub const VLV_REQUEST_OID: &str = "2.16.840.1.113730.3.4.9";
pub const VLV_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.10";
pub const DIR_SYNC_OID: &str = "1.2.840.113556.1.4.841";
pub const TREE_DELETE_OID: &str = "1.2.840.113556.1.4.805";
pub const SHOW_DELETED_OID: &str = "1.2.840.113556.1.4.417";

fn encode(tag: Tag) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64);
    write::encode_into(&mut buf, tag.into_structure()).expect("encoded");
    Vec::from(&buf[..])
}

fn context_boolean(id: u64, inner: bool) -> Tag {
    Tag::Boolean(Boolean {
        class: TagClass::Context,
        id,
        inner,
    })
}

/// Server-Side Sorting request control ([RFC 2891](https://tools.ietf.org/html/rfc2891)).
///
/// Limited to the default ordering rule and ascending/descending by
/// attribute type: this crate's sort keys come only from `order_by`/
/// `then_by` clauses, which never specify a matching rule.
#[derive(Clone, Debug)]
pub struct ServerSideSort {
    /// `(attribute_type, reverse_order)` pairs, in priority order.
    pub keys: Vec<(String, bool)>,
}

impl From<ServerSideSort> for RawControl {
    fn from(sort: ServerSideSort) -> RawControl {
        let keys = sort
            .keys
            .into_iter()
            .map(|(attr, reverse)| {
                Tag::Sequence(Sequence {
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: attr.into_bytes(),
                            ..Default::default()
                        }),
                        context_boolean(1, reverse),
                    ],
                    ..Default::default()
                })
            })
            .collect();
        let val = encode(Tag::Sequence(Sequence {
            inner: keys,
            ..Default::default()
        }));
        RawControl {
            ctype: SERVER_SIDE_SORT_OID.to_owned(),
            crit: false,
            val: Some(val),
        }
    }
}

/// A Virtual List View request's target window, anchored either by
/// absolute offset or by the first entry greater than or equal to an
/// assertion value.
#[derive(Clone, Debug)]
pub enum VlvTarget {
    ByOffset { offset: i32, content_count: i32 },
    GreaterThanOrEqual(Vec<u8>),
}

/// VLV request control (draft-ietf-ldapext-ldapv3-vlv).
#[derive(Clone, Debug)]
pub struct Vlv {
    pub before_count: i32,
    pub after_count: i32,
    pub target: VlvTarget,
    pub context_id: Option<Vec<u8>>,
}

impl From<Vlv> for RawControl {
    fn from(vlv: Vlv) -> RawControl {
        let mut inner = vec![
            Tag::Integer(Integer { inner: vlv.before_count as i64, ..Default::default() }),
            Tag::Integer(Integer { inner: vlv.after_count as i64, ..Default::default() }),
        ];
        inner.push(match vlv.target {
            VlvTarget::ByOffset { offset, content_count } => Tag::Sequence(Sequence {
                class: TagClass::Context,
                id: 0,
                inner: vec![
                    Tag::Integer(Integer { inner: offset as i64, ..Default::default() }),
                    Tag::Integer(Integer { inner: content_count as i64, ..Default::default() }),
                ],
            }),
            VlvTarget::GreaterThanOrEqual(assertion) => Tag::OctetString(OctetString {
                class: TagClass::Context,
                id: 1,
                inner: assertion,
            }),
        });
        if let Some(context_id) = vlv.context_id {
            inner.push(Tag::OctetString(OctetString {
                inner: context_id,
                ..Default::default()
            }));
        }
        let val = encode(Tag::Sequence(Sequence {
            inner,
            ..Default::default()
        }));
        RawControl {
            ctype: VLV_REQUEST_OID.to_owned(),
            crit: true,
            val: Some(val),
        }
    }
}

/// DirSync request control.
#[derive(Clone, Debug)]
pub struct DirSync {
    pub flags: i64,
    pub max_attr_count: i64,
    pub cookie: Vec<u8>,
}

impl From<DirSync> for RawControl {
    fn from(dir_sync: DirSync) -> RawControl {
        let val = encode(Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer { inner: dir_sync.flags, ..Default::default() }),
                Tag::Integer(Integer { inner: dir_sync.max_attr_count, ..Default::default() }),
                Tag::OctetString(OctetString { inner: dir_sync.cookie, ..Default::default() }),
            ],
            ..Default::default()
        }));
        RawControl {
            ctype: DIR_SYNC_OID.to_owned(),
            crit: true,
            val: Some(val),
        }
    }
}

/// Tree-Delete request control: no value, signals the server to delete a
/// non-leaf subtree in a single `Delete` request.
pub fn tree_delete() -> RawControl {
    RawControl {
        ctype: TREE_DELETE_OID.to_owned(),
        crit: true,
        val: None,
    }
}

/// Show-Deleted request control: includes tombstoned entries in search
/// results that would otherwise be filtered out.
pub fn show_deleted() -> RawControl {
    RawControl {
        ctype: SHOW_DELETED_OID.to_owned(),
        crit: false,
        val: None,
    }
}

/// The OID of a [`RawControl`], used by the command dispatcher to reject
/// duplicate controls of the same kind (§4.4 pre-flight step 2).
pub fn control_kind(control: &RawControl) -> &str {
    &control.ctype
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_side_sort_encodes_a_value() {
        let raw: RawControl = ServerSideSort { keys: vec![("cn".to_owned(), false)] }.into();
        assert_eq!(raw.ctype, SERVER_SIDE_SORT_OID);
        assert!(raw.val.is_some());
        assert!(!raw.crit);
    }

    #[test]
    fn tree_delete_has_no_value_and_is_critical() {
        let raw = tree_delete();
        assert!(raw.val.is_none());
        assert!(raw.crit);
    }

    #[test]
    fn vlv_by_offset_encodes_a_value() {
        let raw: RawControl = Vlv {
            before_count: 0,
            after_count: 9,
            target: VlvTarget::ByOffset { offset: 1, content_count: 0 },
            context_id: None,
        }
        .into();
        assert_eq!(raw.ctype, VLV_REQUEST_OID);
        assert!(raw.val.is_some());
    }
}
