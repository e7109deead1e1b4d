//! Bidirectional conversion between raw LDAP values (UTF-8 byte strings,
//! or opaque bytes for binary-syntax attributes) and typed host values
//! (§2 "Attribute converters").
//!
//! Property maps hold no Rust generics over the host type's own field
//! type; instead every converted value passes through [`AttributeValue`],
//! a small closed sum type. This keeps [`crate::mapping::PropertyMap`]
//! plain data (buildable, comparable, storable in a registry) instead of
//! a trait-object zoo, the same trade-off the host language's runtime
//! `object`-typed property getters make implicitly.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use uuid::Uuid;

/// A decoded or to-be-encoded property value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    /// An enum discriminant stored as its integer value.
    EnumInt(i64),
    Bytes(Vec<u8>),
    Guid(Uuid),
    /// Raw SID bytes (binary form per MS-DTYP), kept opaque; use
    /// [`sid_to_string`]/[`sid_from_string`] to move to/from the textual
    /// `S-1-...` form.
    Sid(Vec<u8>),
    Dn(String),
    /// A multi-valued attribute; each element was decoded independently.
    Multi(Vec<AttributeValue>),
    Null,
}

/// How a property's raw attribute values should be interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConverterKind {
    Utf8String,
    Int64,
    /// `"TRUE"`/`"FALSE"`, case-insensitive, per the LDAP boolean syntax.
    Bool,
    /// Generalized time (`YYYYMMDDHHMMSSZ` by default) formatted/parsed
    /// with the given `chrono` strftime pattern.
    GeneralizedTime(String),
    /// Windows FILETIME: 100-nanosecond intervals since 1601-01-01.
    FileTime,
    EnumAsInt,
    ByteArray,
    Guid,
    Sid,
    DistinguishedName,
}

const FILETIME_EPOCH_DIFF_100NS: i64 = 116_444_736_000_000_000;

/// Decode a single raw LDAP value according to `kind`.
pub fn decode_one(kind: &ConverterKind, raw: &[u8]) -> Result<AttributeValue> {
    match kind {
        ConverterKind::Utf8String => Ok(AttributeValue::Str(
            String::from_utf8(raw.to_vec())
                .map_err(|e| Error::Mapping(format!("invalid UTF-8 attribute value: {e}")))?,
        )),
        ConverterKind::Int64 => {
            let s = std::str::from_utf8(raw)
                .map_err(|e| Error::Mapping(format!("invalid UTF-8 integer value: {e}")))?;
            let n: i64 = s
                .parse()
                .map_err(|e| Error::Mapping(format!("invalid integer value {s:?}: {e}")))?;
            Ok(AttributeValue::Int(n))
        }
        ConverterKind::Bool => {
            let s = std::str::from_utf8(raw).unwrap_or_default();
            match s.eq_ignore_ascii_case("TRUE") {
                true => Ok(AttributeValue::Bool(true)),
                false if s.eq_ignore_ascii_case("FALSE") => Ok(AttributeValue::Bool(false)),
                false => Err(Error::Mapping(format!("invalid boolean value {s:?}"))),
            }
        }
        ConverterKind::GeneralizedTime(pattern) => {
            let s = std::str::from_utf8(raw)
                .map_err(|e| Error::Mapping(format!("invalid UTF-8 timestamp value: {e}")))?;
            let naive = NaiveDateTime::parse_from_str(s, pattern)
                .map_err(|e| Error::Mapping(format!("invalid timestamp {s:?}: {e}")))?;
            Ok(AttributeValue::Timestamp(Utc.from_utc_datetime(&naive)))
        }
        ConverterKind::FileTime => {
            let s = std::str::from_utf8(raw).unwrap_or_default();
            let ticks: i64 = s
                .parse()
                .map_err(|e| Error::Mapping(format!("invalid FILETIME value {s:?}: {e}")))?;
            let unix_100ns = ticks - FILETIME_EPOCH_DIFF_100NS;
            let secs = unix_100ns.div_euclid(10_000_000);
            let nanos = unix_100ns.rem_euclid(10_000_000) * 100;
            let dt = DateTime::<Utc>::from_timestamp(secs, nanos as u32)
                .ok_or_else(|| Error::Mapping(format!("FILETIME {ticks} out of range")))?;
            Ok(AttributeValue::Timestamp(dt))
        }
        ConverterKind::EnumAsInt => {
            let s = std::str::from_utf8(raw).unwrap_or_default();
            let n: i64 = s
                .parse()
                .map_err(|e| Error::Mapping(format!("invalid enum value {s:?}: {e}")))?;
            Ok(AttributeValue::EnumInt(n))
        }
        ConverterKind::ByteArray => Ok(AttributeValue::Bytes(raw.to_vec())),
        ConverterKind::Guid => {
            let bytes: [u8; 16] = raw
                .try_into()
                .map_err(|_| Error::Mapping(format!("GUID must be 16 bytes, got {}", raw.len())))?;
            Ok(AttributeValue::Guid(Uuid::from_bytes_le(bytes)))
        }
        ConverterKind::Sid => Ok(AttributeValue::Sid(raw.to_vec())),
        ConverterKind::DistinguishedName => Ok(AttributeValue::Dn(
            String::from_utf8(raw.to_vec())
                .map_err(|e| Error::Mapping(format!("invalid UTF-8 DN value: {e}")))?,
        )),
    }
}

/// Decode a multi-valued attribute. A single-valued property should call
/// [`decode_one`] on `raw[0]` instead.
pub fn decode_multi(kind: &ConverterKind, raw: &[Vec<u8>]) -> Result<AttributeValue> {
    let values: Result<Vec<_>> = raw.iter().map(|v| decode_one(kind, v)).collect();
    Ok(AttributeValue::Multi(values?))
}

/// Encode a single value back to its raw LDAP wire representation.
pub fn encode_one(kind: &ConverterKind, value: &AttributeValue) -> Result<Vec<u8>> {
    match (kind, value) {
        (ConverterKind::Utf8String, AttributeValue::Str(s)) => Ok(s.clone().into_bytes()),
        (ConverterKind::Int64, AttributeValue::Int(n)) => Ok(n.to_string().into_bytes()),
        (ConverterKind::Bool, AttributeValue::Bool(b)) => {
            Ok(if *b { b"TRUE".to_vec() } else { b"FALSE".to_vec() })
        }
        (ConverterKind::GeneralizedTime(pattern), AttributeValue::Timestamp(ts)) => {
            Ok(ts.format(pattern).to_string().into_bytes())
        }
        (ConverterKind::FileTime, AttributeValue::Timestamp(ts)) => {
            let unix_100ns = ts.timestamp() * 10_000_000 + i64::from(ts.timestamp_subsec_nanos() / 100);
            Ok((unix_100ns + FILETIME_EPOCH_DIFF_100NS).to_string().into_bytes())
        }
        (ConverterKind::EnumAsInt, AttributeValue::EnumInt(n)) => Ok(n.to_string().into_bytes()),
        (ConverterKind::ByteArray, AttributeValue::Bytes(b)) => Ok(b.clone()),
        (ConverterKind::Guid, AttributeValue::Guid(u)) => Ok(u.to_bytes_le().to_vec()),
        (ConverterKind::Sid, AttributeValue::Sid(b)) => Ok(b.clone()),
        (ConverterKind::DistinguishedName, AttributeValue::Dn(s)) => Ok(s.clone().into_bytes()),
        (kind, value) => Err(Error::Mapping(format!(
            "value {value:?} does not match converter {kind:?}"
        ))),
    }
}

/// Render a binary SID (MS-DTYP `SID`) as its canonical `S-R-I-S...` text form.
pub fn sid_to_string(sid: &[u8]) -> Result<String> {
    if sid.len() < 8 {
        return Err(Error::Mapping("SID too short".into()));
    }
    let revision = sid[0];
    let sub_authority_count = sid[1] as usize;
    let mut identifier_authority: u64 = 0;
    for &b in &sid[2..8] {
        identifier_authority = (identifier_authority << 8) | b as u64;
    }
    if sid.len() != 8 + sub_authority_count * 4 {
        return Err(Error::Mapping("SID length does not match sub-authority count".into()));
    }
    let mut out = format!("S-{revision}-{identifier_authority}");
    for chunk in sid[8..].chunks_exact(4) {
        let sub_authority = u32::from_le_bytes(chunk.try_into().unwrap());
        out.push('-');
        out.push_str(&sub_authority.to_string());
    }
    Ok(out)
}

/// Parse a canonical `S-R-I-S...` SID string into its binary form.
pub fn sid_from_string(s: &str) -> Result<Vec<u8>> {
    let mut parts = s.split('-');
    if parts.next() != Some("S") {
        return Err(Error::Mapping(format!("not a SID: {s:?}")));
    }
    let revision: u8 = parts
        .next()
        .ok_or_else(|| Error::Mapping(format!("not a SID: {s:?}")))?
        .parse()
        .map_err(|_| Error::Mapping(format!("invalid SID revision in {s:?}")))?;
    let identifier_authority: u64 = parts
        .next()
        .ok_or_else(|| Error::Mapping(format!("not a SID: {s:?}")))?
        .parse()
        .map_err(|_| Error::Mapping(format!("invalid SID authority in {s:?}")))?;
    let sub_authorities: Result<Vec<u32>> = parts
        .map(|p| {
            p.parse()
                .map_err(|_| Error::Mapping(format!("invalid SID sub-authority in {s:?}")))
        })
        .collect();
    let sub_authorities = sub_authorities?;

    let mut out = Vec::with_capacity(8 + sub_authorities.len() * 4);
    out.push(revision);
    out.push(sub_authorities.len() as u8);
    out.extend_from_slice(&identifier_authority.to_be_bytes()[2..]);
    for sub in sub_authorities {
        out.extend_from_slice(&sub.to_le_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips() {
        let raw = b"42";
        let v = decode_one(&ConverterKind::Int64, raw).unwrap();
        assert_eq!(v, AttributeValue::Int(42));
        assert_eq!(encode_one(&ConverterKind::Int64, &v).unwrap(), raw);
    }

    #[test]
    fn bool_is_case_insensitive_on_decode_canonical_on_encode() {
        assert_eq!(
            decode_one(&ConverterKind::Bool, b"true").unwrap(),
            AttributeValue::Bool(true)
        );
        assert_eq!(
            encode_one(&ConverterKind::Bool, &AttributeValue::Bool(true)).unwrap(),
            b"TRUE"
        );
    }

    #[test]
    fn generalized_time_round_trips() {
        let kind = ConverterKind::GeneralizedTime("%Y%m%d%H%M%SZ".to_owned());
        let v = decode_one(&kind, b"20240102030405Z").unwrap();
        let AttributeValue::Timestamp(ts) = v.clone() else {
            panic!("expected timestamp")
        };
        assert_eq!(ts.format("%Y%m%d%H%M%SZ").to_string(), "20240102030405Z");
        assert_eq!(encode_one(&kind, &v).unwrap(), b"20240102030405Z");
    }

    #[test]
    fn filetime_epoch_round_trips() {
        // FILETIME 0 is 1601-01-01T00:00:00Z.
        let v = decode_one(&ConverterKind::FileTime, b"0").unwrap();
        assert_eq!(
            v,
            AttributeValue::Timestamp(Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn sid_round_trips() {
        let s = "S-1-5-21-3623811015-3361044348-30300820-1013";
        let bytes = sid_from_string(s).unwrap();
        assert_eq!(sid_to_string(&bytes).unwrap(), s);
    }

    #[test]
    fn guid_round_trips() {
        let u = Uuid::new_v4();
        let bytes = u.to_bytes_le().to_vec();
        let v = decode_one(&ConverterKind::Guid, &bytes).unwrap();
        assert_eq!(v, AttributeValue::Guid(u));
        assert_eq!(encode_one(&ConverterKind::Guid, &v).unwrap(), bytes);
    }
}
