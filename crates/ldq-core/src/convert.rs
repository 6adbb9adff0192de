//! Attribute conversion between wire values and typed host values.
//!
//! Every mapped property declares an [`AttributeSyntax`]; the two functions
//! here, [`encode`] and [`decode`], are the single place where wire
//! representations are produced and consumed. Directory booleans are the
//! literal strings `TRUE`/`FALSE`; timestamps are either Windows FILETIME
//! integers (100-nanosecond intervals since 1601-01-01 UTC) or generalized
//! time rendered with a caller-supplied pattern.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::error::{DirectoryError, DirectoryResult};
use crate::value::{AttributeValue, RawValue, Sid};

/// The declared directory syntax of a mapped property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeSyntax {
    /// Plain UTF-8 text.
    Text,
    /// Decimal integer text.
    Integer,
    /// `TRUE` / `FALSE` boolean text.
    Boolean,
    /// Windows FILETIME integer text (`accountExpires`, `pwdLastSet`, ...).
    FileTime,
    /// Generalized time text formatted with the given chrono pattern
    /// (`whenCreated`, `whenChanged`, ...).
    GeneralizedTime { format: String },
    /// Raw bytes.
    Binary,
    /// GUID in AD `objectGUID` byte order.
    Guid,
    /// Windows security identifier bytes.
    Sid,
    /// A distinguished name.
    Dn,
}

impl AttributeSyntax {
    /// Generalized time with the RFC 4517 whole-second pattern AD uses.
    pub fn generalized_time() -> Self {
        Self::GeneralizedTime {
            format: "%Y%m%d%H%M%S%.fZ".to_owned(),
        }
    }

    /// Whether filter assertions for this syntax must hex-escape every byte.
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary | Self::Guid | Self::Sid)
    }
}

/// The FILETIME epoch, 1601-01-01T00:00:00Z.
fn filetime_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap()
}

/// Convert a timestamp into a FILETIME tick count.
pub fn to_filetime(value: DateTime<Utc>) -> DirectoryResult<i64> {
    let micros = (value - filetime_epoch())
        .num_microseconds()
        .ok_or_else(|| DirectoryError::mapping("timestamp out of FILETIME range"))?;
    micros
        .checked_mul(10)
        .ok_or_else(|| DirectoryError::mapping("timestamp out of FILETIME range"))
}

/// Convert a FILETIME tick count into a timestamp.
pub fn from_filetime(ticks: i64) -> DateTime<Utc> {
    filetime_epoch() + Duration::microseconds(ticks / 10)
}

/// Encode one typed value into its wire representation.
///
/// `List` values are handled by [`encode_values`]; passing one here is a
/// mapping error.
pub fn encode(syntax: &AttributeSyntax, value: &AttributeValue) -> DirectoryResult<RawValue> {
    let mismatch = || {
        DirectoryError::mapping(format!(
            "cannot store a {} value as {syntax:?}",
            value.kind()
        ))
    };
    match (syntax, value) {
        (_, AttributeValue::Null) => Err(DirectoryError::mapping("cannot encode a null value")),
        (_, AttributeValue::List(_)) => Err(mismatch()),

        (AttributeSyntax::Text, AttributeValue::Text(s)) => Ok(RawValue::Text(s.clone())),
        (AttributeSyntax::Text, AttributeValue::Integer(i)) => Ok(RawValue::Text(i.to_string())),

        (AttributeSyntax::Dn, AttributeValue::Dn(s) | AttributeValue::Text(s)) => {
            Ok(RawValue::Text(s.clone()))
        }

        (AttributeSyntax::Integer, AttributeValue::Integer(i)) => Ok(RawValue::Text(i.to_string())),
        (AttributeSyntax::Integer, AttributeValue::Boolean(b)) => {
            Ok(RawValue::Text(i64::from(*b).to_string()))
        }

        (AttributeSyntax::Boolean, AttributeValue::Boolean(b)) => Ok(RawValue::Text(
            if *b { "TRUE" } else { "FALSE" }.to_owned(),
        )),

        (AttributeSyntax::FileTime, AttributeValue::Timestamp(ts)) => {
            Ok(RawValue::Text(to_filetime(*ts)?.to_string()))
        }
        (AttributeSyntax::GeneralizedTime { format }, AttributeValue::Timestamp(ts)) => {
            Ok(RawValue::Text(ts.naive_utc().format(format).to_string()))
        }

        (AttributeSyntax::Binary, AttributeValue::Binary(b)) => Ok(RawValue::Binary(b.clone())),
        (AttributeSyntax::Guid, AttributeValue::Guid(g)) => {
            Ok(RawValue::Binary(g.to_bytes_le().to_vec()))
        }
        (AttributeSyntax::Sid, AttributeValue::Sid(s)) => Ok(RawValue::Binary(s.to_bytes())),
        // Callers are allowed to hand string forms for the binary syntaxes.
        (AttributeSyntax::Guid, AttributeValue::Text(s)) => {
            let guid = Uuid::parse_str(s)
                .map_err(|_| DirectoryError::mapping(format!("malformed GUID '{s}'")))?;
            Ok(RawValue::Binary(guid.to_bytes_le().to_vec()))
        }
        (AttributeSyntax::Sid, AttributeValue::Text(s)) => {
            Ok(RawValue::Binary(Sid::parse(s)?.to_bytes()))
        }

        _ => Err(mismatch()),
    }
}

/// Encode a typed value into zero or more wire values.
///
/// Null yields an empty set; a list yields one wire value per element.
pub fn encode_values(
    syntax: &AttributeSyntax,
    value: &AttributeValue,
) -> DirectoryResult<Vec<RawValue>> {
    match value {
        AttributeValue::Null => Ok(Vec::new()),
        AttributeValue::List(values) => values.iter().map(|v| encode(syntax, v)).collect(),
        other => Ok(vec![encode(syntax, other)?]),
    }
}

/// Decode one wire value into its typed representation.
pub fn decode(syntax: &AttributeSyntax, raw: &RawValue) -> DirectoryResult<AttributeValue> {
    let text = |raw: &RawValue| -> DirectoryResult<String> {
        raw.as_text()
            .map(str::to_owned)
            .ok_or_else(|| DirectoryError::mapping(format!("expected text for {syntax:?}")))
    };
    match syntax {
        AttributeSyntax::Text => Ok(AttributeValue::Text(text(raw)?)),
        AttributeSyntax::Dn => Ok(AttributeValue::Dn(text(raw)?)),
        AttributeSyntax::Integer => {
            let s = text(raw)?;
            let i = s
                .parse::<i64>()
                .map_err(|_| DirectoryError::mapping(format!("malformed integer '{s}'")))?;
            Ok(AttributeValue::Integer(i))
        }
        AttributeSyntax::Boolean => match text(raw)?.as_str() {
            "TRUE" => Ok(AttributeValue::Boolean(true)),
            "FALSE" => Ok(AttributeValue::Boolean(false)),
            other => Err(DirectoryError::mapping(format!(
                "malformed boolean '{other}'"
            ))),
        },
        AttributeSyntax::FileTime => {
            let s = text(raw)?;
            let ticks = s
                .parse::<i64>()
                .map_err(|_| DirectoryError::mapping(format!("malformed FILETIME '{s}'")))?;
            Ok(AttributeValue::Timestamp(from_filetime(ticks)))
        }
        AttributeSyntax::GeneralizedTime { format } => {
            let s = text(raw)?;
            let parsed = NaiveDateTime::parse_from_str(&s, format).map_err(|_| {
                DirectoryError::mapping(format!("malformed generalized time '{s}'"))
            })?;
            Ok(AttributeValue::Timestamp(parsed.and_utc()))
        }
        AttributeSyntax::Binary => Ok(AttributeValue::Binary(raw.as_bytes().to_vec())),
        AttributeSyntax::Guid => match raw {
            RawValue::Binary(bytes) => {
                let array: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    DirectoryError::mapping(format!("GUID value has {} bytes", bytes.len()))
                })?;
                Ok(AttributeValue::Guid(Uuid::from_bytes_le(array)))
            }
            RawValue::Text(s) => {
                let guid = Uuid::parse_str(s)
                    .map_err(|_| DirectoryError::mapping(format!("malformed GUID '{s}'")))?;
                Ok(AttributeValue::Guid(guid))
            }
        },
        AttributeSyntax::Sid => match raw {
            RawValue::Binary(bytes) => Ok(AttributeValue::Sid(Sid::from_bytes(bytes)?)),
            RawValue::Text(s) => Ok(AttributeValue::Sid(Sid::parse(s)?)),
        },
    }
}

/// Decode a whole value set: absent → null, one → scalar, many → list.
pub fn decode_values(
    syntax: &AttributeSyntax,
    raw: &[RawValue],
) -> DirectoryResult<AttributeValue> {
    match raw {
        [] => Ok(AttributeValue::Null),
        [single] => decode(syntax, single),
        many => Ok(AttributeValue::List(
            many.iter()
                .map(|v| decode(syntax, v))
                .collect::<DirectoryResult<_>>()?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_wire_form() {
        let raw = encode(&AttributeSyntax::Boolean, &AttributeValue::Boolean(true)).unwrap();
        assert_eq!(raw, RawValue::Text("TRUE".into()));
        assert_eq!(
            decode(&AttributeSyntax::Boolean, &RawValue::Text("FALSE".into())).unwrap(),
            AttributeValue::Boolean(false)
        );
        assert!(decode(&AttributeSyntax::Boolean, &RawValue::Text("yes".into())).is_err());
    }

    #[test]
    fn test_filetime_round_trip() {
        let ts = Utc.with_ymd_and_hms(2021, 6, 15, 12, 30, 45).unwrap();
        let ticks = to_filetime(ts).unwrap();
        assert_eq!(from_filetime(ticks), ts);

        // 2017-02-10T00:00:00Z as a FILETIME tick count.
        let raw = RawValue::Text("131311584000000000".into());
        let decoded = decode(&AttributeSyntax::FileTime, &raw).unwrap();
        match decoded {
            AttributeValue::Timestamp(t) => assert_eq!(t.timestamp(), 1_486_684_800),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_generalized_time_pattern() {
        let syntax = AttributeSyntax::GeneralizedTime {
            format: "%Y%m%d%H%M%SZ".into(),
        };
        let ts = Utc.with_ymd_and_hms(2013, 5, 16, 20, 5, 20).unwrap();
        let raw = encode(&syntax, &AttributeValue::Timestamp(ts)).unwrap();
        assert_eq!(raw, RawValue::Text("20130516200520Z".into()));
        assert_eq!(
            decode(&syntax, &raw).unwrap(),
            AttributeValue::Timestamp(ts)
        );
    }

    #[test]
    fn test_guid_uses_little_endian_layout() {
        let guid = Uuid::parse_str("01234567-89ab-cdef-0123-456789abcdef").unwrap();
        let raw = encode(&AttributeSyntax::Guid, &AttributeValue::Guid(guid)).unwrap();
        match &raw {
            RawValue::Binary(bytes) => {
                // The first field is stored little-endian on the wire.
                assert_eq!(&bytes[..4], &[0x67, 0x45, 0x23, 0x01]);
            }
            RawValue::Text(_) => panic!("GUID must encode as binary"),
        }
        assert_eq!(
            decode(&AttributeSyntax::Guid, &raw).unwrap(),
            AttributeValue::Guid(guid)
        );
    }

    #[test]
    fn test_multi_valued_round_trip() {
        let value = AttributeValue::list(["a", "b"]);
        let raw = encode_values(&AttributeSyntax::Text, &value).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(decode_values(&AttributeSyntax::Text, &raw).unwrap(), value);
        assert_eq!(
            decode_values(&AttributeSyntax::Text, &[]).unwrap(),
            AttributeValue::Null
        );
    }
}
