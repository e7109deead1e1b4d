//! RFC 4515 filter-value escaping and RFC 4514 DN-component escaping.
//!
//! `ldap_escape` is carried over verbatim in behaviour (and nearly verbatim
//! in implementation) from the collaborator transport crate's own
//! `util::ldap_escape`, since both this crate and the wire layer must agree
//! on the same escaping rules for the filter strings this crate hands the
//! wire layer as plain text.

use std::borrow::Cow;

/// Escape a filter literal per [RFC 4515 §3](https://tools.ietf.org/html/rfc4515#section-3).
///
/// `\`, `*`, `(`, `)` and NUL are replaced by `\HH`, the two-digit hex
/// encoding of the byte. All other bytes, including multi-byte UTF-8
/// sequences, pass through unchanged: RFC 4515 only mandates escaping of
/// the five metacharacters.
pub fn escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(c: u8) -> bool {
        c == b'\\' || c == b'*' || c == b'(' || c == b')' || c == 0
    }

    #[inline]
    fn xdigit(c: u8) -> u8 {
        c + if c < 10 { b'0' } else { b'a' - 10 }
    }

    let lit = lit.into();
    let mut output: Option<Vec<u8>> = None;
    for (i, &c) in lit.as_bytes().iter().enumerate() {
        if needs_escape(c) {
            if output.is_none() {
                let mut buf = Vec::with_capacity(lit.len() + 12);
                buf.extend(lit[..i].as_bytes());
                output = Some(buf);
            }
            let output = output.as_mut().unwrap();
            output.push(b'\\');
            output.push(xdigit(c >> 4));
            output.push(xdigit(c & 0xF));
        } else if let Some(output) = output.as_mut() {
            output.push(c);
        }
    }
    match output {
        // Safe: we started from valid UTF-8 and only ever substituted
        // single ASCII bytes with ASCII byte sequences.
        Some(output) => Cow::Owned(unsafe { String::from_utf8_unchecked(output) }),
        None => lit,
    }
}

/// Escape every byte of a binary attribute value as `\HH`, per the
/// convention used for binary-syntax attributes (e.g. `objectGUID`,
/// `objectSid`) in filter equality clauses.
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for b in bytes {
        out.push('\\');
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Escape a literal used inside a `Matches` raw-filter fragment: every
/// metacharacter except `*` (which the caller controls directly as a
/// wildcard marker) is escaped.
pub fn escape_pattern(lit: &str) -> String {
    let mut out = String::with_capacity(lit.len());
    for c in lit.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

/// Escape the special characters of [RFC 4514](https://tools.ietf.org/html/rfc4514)
/// in a DN component (an RDN attribute value).
///
/// Carried over from the collaborator's `util::dn_escape`.
pub fn dn_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    #[inline]
    fn needs_escape(i: usize, len: usize, c: u8) -> bool {
        matches!(c, b'"' | b'+' | b',' | b';' | b'<' | b'>' | b'\\')
            || (i == 0 && (c == b'#' || c == b' '))
            || (i == len - 1 && c == b' ')
    }

    let lit = lit.into();
    let len = lit.len();
    let mut output: Option<Vec<u8>> = None;
    for (i, &c) in lit.as_bytes().iter().enumerate() {
        if needs_escape(i, len, c) {
            if output.is_none() {
                let mut buf = Vec::with_capacity(len + 4);
                buf.extend(lit[..i].as_bytes());
                output = Some(buf);
            }
            output.as_mut().unwrap().push(b'\\');
            output.as_mut().unwrap().push(c);
        } else if let Some(output) = output.as_mut() {
            output.push(c);
        }
    }
    match output {
        Some(output) => Cow::Owned(unsafe { String::from_utf8_unchecked(output) }),
        None => lit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_all_metacharacters() {
        let s = "a\\b*c(d)e\0f";
        let escaped = escape(s);
        assert_eq!(escaped, "a\\5cb\\2ac\\28d\\29e\\00f");
    }

    #[test]
    fn leaves_plain_strings_unallocated() {
        let s = "plainvalue";
        assert!(matches!(escape(s), Cow::Borrowed(_)));
    }

    #[test]
    fn escape_is_injective_enough_to_round_trip_len() {
        for s in ["", "no-specials", "(evil)", "a*b", "back\\slash"] {
            let escaped = escape(s);
            // Every literal metacharacter became a 3-byte sequence; the
            // unescaped form never appears in the output.
            assert!(!escaped.contains('('));
            assert!(!escaped.contains(')'));
        }
    }
}
