//! Distinguished-name parsing helpers for `move_entry`/`rename_entry`
//! (§6 "DN" entry points).
//!
//! Only as much RFC 4514 structure as the move/rename API needs: split
//! a DN into its leading RDN and its parent, recognising `\,`-escaped
//! commas so a literal comma inside an attribute value is not mistaken
//! for a component separator.

/// Split `dn` into `(leading_rdn, parent)`. `parent` is `None` for a
/// single-component DN (no comma outside an escape).
pub fn split_rdn(dn: &str) -> Option<(&str, Option<&str>)> {
    let bytes = dn.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b',' => {
                let rdn = &dn[..i];
                let parent = dn[i + 1..].trim_start();
                return Some((rdn, if parent.is_empty() { None } else { Some(parent) }));
            }
            _ => i += 1,
        }
    }
    if dn.is_empty() {
        None
    } else {
        Some((dn, None))
    }
}

/// The parent DN, or `None` if `dn` has no parent component.
pub fn parent(dn: &str) -> Option<String> {
    split_rdn(dn).and_then(|(_, parent)| parent.map(str::to_owned))
}

/// The leading RDN component.
pub fn rdn(dn: &str) -> Option<&str> {
    split_rdn(dn).map(|(rdn, _)| rdn)
}

/// Join an RDN and a superior DN into a full DN, matching what
/// `ModifyDnRequest` computes server-side when `new_superior` is given.
pub fn join(rdn: &str, superior: Option<&str>) -> String {
    match superior {
        Some(superior) if !superior.is_empty() => format!("{rdn},{superior}"),
        _ => rdn.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_rdn_from_parent() {
        let (rdn, parent) = split_rdn("cn=alice,ou=people,dc=example,dc=com").unwrap();
        assert_eq!(rdn, "cn=alice");
        assert_eq!(parent, Some("ou=people,dc=example,dc=com"));
    }

    #[test]
    fn escaped_comma_is_not_a_separator() {
        let (rdn, parent) = split_rdn("cn=Smith\\, Jane,ou=people,dc=example,dc=com").unwrap();
        assert_eq!(rdn, "cn=Smith\\, Jane");
        assert_eq!(parent, Some("ou=people,dc=example,dc=com"));
    }

    #[test]
    fn single_component_dn_has_no_parent() {
        assert_eq!(split_rdn("dc=com"), Some(("dc=com", None)));
    }

    #[test]
    fn join_round_trips_split() {
        let dn = "cn=alice,ou=people,dc=example,dc=com";
        let (rdn, parent) = split_rdn(dn).unwrap();
        assert_eq!(join(rdn, parent), dn);
    }
}
