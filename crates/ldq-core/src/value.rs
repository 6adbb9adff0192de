//! Raw and typed attribute values.
//!
//! The directory transports every attribute as one or more byte strings;
//! `RawValue` keeps the text/binary split the wire library reports. The
//! typed side of a property map works in `AttributeValue`, which carries the
//! host representations the converters understand.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{DirectoryError, DirectoryResult};

/// A single attribute value as transported by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawValue {
    /// A UTF-8 string value.
    Text(String),
    /// A value that is not valid UTF-8 (objectGUID, objectSid, photos, ...).
    Binary(Vec<u8>),
}

impl RawValue {
    /// The value as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    /// The value as bytes, regardless of variant.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(b) => b,
        }
    }

    /// Consume the value into bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.into_bytes(),
            Self::Binary(b) => b,
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

/// A typed host-side attribute value.
///
/// `List` is only ever one level deep: a multi-valued attribute is a list of
/// scalar values.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Absent / null.
    Null,
    /// A string value.
    Text(String),
    /// A signed integer value.
    Integer(i64),
    /// A boolean value.
    Boolean(bool),
    /// A point in time.
    Timestamp(DateTime<Utc>),
    /// An opaque byte value.
    Binary(Vec<u8>),
    /// A GUID (AD `objectGUID` layout on the wire).
    Guid(Uuid),
    /// A Windows security identifier.
    Sid(Sid),
    /// A distinguished name.
    Dn(String),
    /// A multi-valued attribute.
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Whether the value is null or an empty list.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::List(values) => values.is_empty(),
            _ => false,
        }
    }

    /// The value as a string slice, for text-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Dn(s) => Some(s),
            _ => None,
        }
    }

    /// The value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// The value as a boolean, if it is one.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// A short tag naming the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
            Self::Binary(_) => "binary",
            Self::Guid(_) => "guid",
            Self::Sid(_) => "sid",
            Self::Dn(_) => "dn",
            Self::List(_) => "list",
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<Uuid> for AttributeValue {
    fn from(value: Uuid) -> Self {
        Self::Guid(value)
    }
}

impl From<Sid> for AttributeValue {
    fn from(value: Sid) -> Self {
        Self::Sid(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value)
    }
}

impl<V: Into<AttributeValue>> From<Option<V>> for AttributeValue {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

impl AttributeValue {
    /// Build a multi-valued attribute from scalar values.
    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// A Windows security identifier (`objectSid`).
///
/// Binary layout: revision (1 byte), sub-authority count (1 byte), identifier
/// authority (6 bytes, big-endian), then each sub-authority as a
/// little-endian u32.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid {
    /// SID revision, 1 in practice.
    pub revision: u8,
    /// The 48-bit identifier authority.
    pub identifier_authority: u64,
    /// Sub-authorities (RID chain).
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    /// Parse the binary `objectSid` representation.
    pub fn from_bytes(bytes: &[u8]) -> DirectoryResult<Self> {
        if bytes.len() < 8 {
            return Err(DirectoryError::mapping(format!(
                "SID value too short: {} bytes",
                bytes.len()
            )));
        }
        let revision = bytes[0];
        let count = bytes[1] as usize;
        if bytes.len() != 8 + count * 4 {
            return Err(DirectoryError::mapping(format!(
                "SID value length {} does not match sub-authority count {count}",
                bytes.len()
            )));
        }
        let mut identifier_authority = 0u64;
        for b in &bytes[2..8] {
            identifier_authority = (identifier_authority << 8) | u64::from(*b);
        }
        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            revision,
            identifier_authority,
            sub_authorities,
        })
    }

    /// Encode to the binary `objectSid` representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.sub_authorities.len() * 4);
        out.push(self.revision);
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.identifier_authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    /// Parse the `S-1-5-21-...` string form.
    pub fn parse(value: &str) -> DirectoryResult<Self> {
        let invalid = || DirectoryError::mapping(format!("malformed SID string '{value}'"));
        let mut parts = value.split('-');
        if parts.next() != Some("S") {
            return Err(invalid());
        }
        let revision = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let identifier_authority = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let sub_authorities = parts
            .map(|p| p.parse().map_err(|_| invalid()))
            .collect::<DirectoryResult<Vec<u32>>>()?;
        Ok(Self {
            revision,
            identifier_authority,
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.identifier_authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sid_round_trip() {
        let sid = Sid::parse("S-1-5-21-3623811015-3361044348-30300820-1013").unwrap();
        assert_eq!(sid.revision, 1);
        assert_eq!(sid.identifier_authority, 5);
        assert_eq!(sid.sub_authorities.len(), 4);

        let bytes = sid.to_bytes();
        let parsed = Sid::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, sid);
        assert_eq!(
            parsed.to_string(),
            "S-1-5-21-3623811015-3361044348-30300820-1013"
        );
    }

    #[test]
    fn test_sid_rejects_truncated_value() {
        assert!(Sid::from_bytes(&[1, 4, 0, 0]).is_err());
        // Count says 2 sub-authorities, payload carries 1.
        assert!(Sid::from_bytes(&[1, 2, 0, 0, 0, 0, 0, 5, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_null_detection() {
        assert!(AttributeValue::Null.is_null());
        assert!(AttributeValue::List(vec![]).is_null());
        assert!(!AttributeValue::Text(String::new()).is_null());
    }

    #[test]
    fn test_option_conversion() {
        let none: Option<&str> = None;
        assert_eq!(AttributeValue::from(none), AttributeValue::Null);
        assert_eq!(
            AttributeValue::from(Some("x")),
            AttributeValue::Text("x".into())
        );
    }
}
