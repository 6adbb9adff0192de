//! Request and response controls.
//!
//! The engine emits controls as raw OID/value pairs; the values are BER
//! structures built with the wire library's ASN.1 types. Response parsing
//! is tolerant: a malformed control value surfaces as a connection error
//! naming the control.

use ldap3::asn1::{
    parse_tag, write, ASNTag, Integer, OctetString, Sequence, StructureTag, Tag, TagClass, PL,
};

use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_query::options::{DirectoryControl, SortKey, VirtualListViewOptions};

/// Simple paged results, RFC 2696.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
/// Server-side sort request, RFC 2891.
pub const SORT_REQUEST_OID: &str = "1.2.840.113556.1.4.473";
/// Server-side sort response.
pub const SORT_RESPONSE_OID: &str = "1.2.840.113556.1.4.474";
/// Virtual list view request.
pub const VLV_REQUEST_OID: &str = "2.16.840.1.113730.3.4.9";
/// Virtual list view response.
pub const VLV_RESPONSE_OID: &str = "2.16.840.1.113730.3.4.10";
/// DirSync change retrieval.
pub const DIRSYNC_OID: &str = "1.2.840.113556.1.4.841";
/// Delete a whole subtree with one delete request.
pub const TREE_DELETE_OID: &str = "1.2.840.113556.1.4.805";
/// Include tombstoned entries in search results.
pub const SHOW_DELETED_OID: &str = "1.2.840.113556.1.4.417";

fn encode(tag: Tag, control: &str) -> DirectoryResult<Vec<u8>> {
    let mut buffer = bytes::BytesMut::new();
    write::encode_into(&mut buffer, tag.into_structure())
        .map_err(|_| DirectoryError::connection(format!("failed to encode {control} control")))?;
    Ok(buffer.to_vec())
}

fn integer(value: i64) -> Tag {
    Tag::Integer(Integer {
        inner: value,
        ..Default::default()
    })
}

fn octet_string(value: Vec<u8>) -> Tag {
    Tag::OctetString(OctetString {
        inner: value,
        ..Default::default()
    })
}

fn sequence(inner: Vec<Tag>) -> Tag {
    Tag::Sequence(Sequence {
        inner,
        ..Default::default()
    })
}

/// Build a paged-results request control.
pub fn paged_results(size: u32, cookie: &[u8]) -> DirectoryResult<DirectoryControl> {
    let value = encode(
        sequence(vec![integer(i64::from(size)), octet_string(cookie.to_vec())]),
        "paged-results",
    )?;
    Ok(DirectoryControl::with_value(PAGED_RESULTS_OID, true, value))
}

/// Size and cookie carried by a paged-results response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResponse {
    /// Server's estimate of the total result size; 0 when unknown.
    pub size: u32,
    /// Cookie to echo for the next page; empty when exhausted.
    pub cookie: Vec<u8>,
}

/// Parse the paged-results response control out of a control list.
pub fn parse_paged_response(
    controls: &[DirectoryControl],
) -> DirectoryResult<Option<PagedResponse>> {
    let Some(control) = controls.iter().find(|c| c.oid == PAGED_RESULTS_OID) else {
        return Ok(None);
    };
    let mut parts = constructed_value(control, "paged-results")?.into_iter();
    let size = next_integer(&mut parts, "paged-results")?;
    let cookie = next_octets(&mut parts, "paged-results")?;
    Ok(Some(PagedResponse {
        size: size.max(0) as u32,
        cookie,
    }))
}

/// Build a server-side sort request control (non-critical).
pub fn server_sort(keys: &[SortKey]) -> DirectoryResult<DirectoryControl> {
    let key_list = keys
        .iter()
        .map(|key| {
            let mut inner = vec![octet_string(key.attribute.clone().into_bytes())];
            if key.reverse {
                inner.push(Tag::StructureTag(StructureTag {
                    class: TagClass::Context,
                    id: 1,
                    payload: PL::P(vec![0xff]),
                }));
            }
            sequence(inner)
        })
        .collect();
    let value = encode(sequence(key_list), "server-sort")?;
    Ok(DirectoryControl::with_value(SORT_REQUEST_OID, false, value))
}

/// Build a virtual-list-view request control targeting an offset.
pub fn virtual_list_view(options: &VirtualListViewOptions) -> DirectoryResult<DirectoryControl> {
    let target = Tag::StructureTag(StructureTag {
        class: TagClass::Context,
        id: 0,
        payload: PL::C(vec![
            integer(i64::from(options.offset)).into_structure(),
            integer(i64::from(options.content_count)).into_structure(),
        ]),
    });
    let value = encode(
        sequence(vec![
            integer(i64::from(options.before_count)),
            integer(i64::from(options.after_count)),
            target,
        ]),
        "virtual-list-view",
    )?;
    Ok(DirectoryControl::with_value(VLV_REQUEST_OID, true, value))
}

/// Positions reported by a virtual-list-view response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlvResponse {
    /// One-based position of the target entry.
    pub target_position: u32,
    /// Server's content count.
    pub content_count: u32,
    /// VLV result code; 0 is success.
    pub result: u32,
}

/// Parse the virtual-list-view response control out of a control list.
pub fn parse_vlv_response(controls: &[DirectoryControl]) -> DirectoryResult<Option<VlvResponse>> {
    let Some(control) = controls.iter().find(|c| c.oid == VLV_RESPONSE_OID) else {
        return Ok(None);
    };
    let mut parts = constructed_value(control, "virtual-list-view")?.into_iter();
    let target_position = next_integer(&mut parts, "virtual-list-view")?;
    let content_count = next_integer(&mut parts, "virtual-list-view")?;
    let result = next_integer(&mut parts, "virtual-list-view")?;
    Ok(Some(VlvResponse {
        target_position: target_position.max(0) as u32,
        content_count: content_count.max(0) as u32,
        result: result.max(0) as u32,
    }))
}

/// DirSync behaviour flags; `LDAP_DIRSYNC_INCREMENTAL_VALUES` by default.
pub const DIRSYNC_INCREMENTAL_VALUES: i64 = 0x8000_0000;
/// DirSync flag: return only objects the caller has rights to see.
pub const DIRSYNC_OBJECT_SECURITY: i64 = 0x1;

/// Build a DirSync request control.
pub fn dir_sync(flags: i64, max_bytes: i64, cookie: &[u8]) -> DirectoryResult<DirectoryControl> {
    let value = encode(
        sequence(vec![
            integer(flags),
            integer(max_bytes),
            octet_string(cookie.to_vec()),
        ]),
        "dirsync",
    )?;
    Ok(DirectoryControl::with_value(DIRSYNC_OID, true, value))
}

/// State carried by a DirSync response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirSyncResponse {
    /// Whether more changes are pending.
    pub more_results: bool,
    /// Cookie to echo on the next poll.
    pub cookie: Vec<u8>,
}

/// Parse the DirSync response control out of a control list.
pub fn parse_dir_sync_response(
    controls: &[DirectoryControl],
) -> DirectoryResult<Option<DirSyncResponse>> {
    let Some(control) = controls.iter().find(|c| c.oid == DIRSYNC_OID) else {
        return Ok(None);
    };
    let mut parts = constructed_value(control, "dirsync")?.into_iter();
    let more = next_integer(&mut parts, "dirsync")?;
    let _unused = next_integer(&mut parts, "dirsync")?;
    let cookie = next_octets(&mut parts, "dirsync")?;
    Ok(Some(DirSyncResponse {
        more_results: more != 0,
        cookie,
    }))
}

/// Build the tree-delete control.
pub fn tree_delete() -> DirectoryControl {
    DirectoryControl::new(TREE_DELETE_OID, true)
}

/// Build the show-deleted control.
pub fn show_deleted() -> DirectoryControl {
    DirectoryControl::new(SHOW_DELETED_OID, false)
}

fn malformed(control: &str) -> DirectoryError {
    DirectoryError::connection(format!("malformed {control} response control"))
}

fn constructed_value(
    control: &DirectoryControl,
    name: &str,
) -> DirectoryResult<Vec<StructureTag>> {
    let value = control.value.as_deref().ok_or_else(|| malformed(name))?;
    let (_, tag) = parse_tag(value).map_err(|_| malformed(name))?;
    tag.expect_constructed().ok_or_else(|| malformed(name))
}

fn next_integer(
    parts: &mut impl Iterator<Item = StructureTag>,
    name: &str,
) -> DirectoryResult<i64> {
    let bytes = parts
        .next()
        .and_then(StructureTag::expect_primitive)
        .ok_or_else(|| malformed(name))?;
    Ok(ber_integer(&bytes))
}

fn next_octets(
    parts: &mut impl Iterator<Item = StructureTag>,
    name: &str,
) -> DirectoryResult<Vec<u8>> {
    parts
        .next()
        .and_then(StructureTag::expect_primitive)
        .ok_or_else(|| malformed(name))
}

/// Decode a big-endian two's-complement BER integer payload.
fn ber_integer(bytes: &[u8]) -> i64 {
    let mut value: i64 = if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        -1
    } else {
        0
    };
    for b in bytes {
        value = (value << 8) | i64::from(*b);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_results_round_trip() {
        let control = paged_results(500, b"abc").unwrap();
        assert_eq!(control.oid, PAGED_RESULTS_OID);
        // SEQ { INTEGER 500, OCTET STRING "abc" }
        assert_eq!(
            control.value.as_deref().unwrap(),
            &[0x30, 0x09, 0x02, 0x02, 0x01, 0xf4, 0x04, 0x03, b'a', b'b', b'c'][..]
        );

        let parsed = parse_paged_response(&[control]).unwrap().unwrap();
        assert_eq!(parsed.size, 500);
        assert_eq!(parsed.cookie, b"abc");
    }

    #[test]
    fn test_paged_response_absent() {
        assert!(parse_paged_response(&[]).unwrap().is_none());
    }

    #[test]
    fn test_server_sort_wire_form() {
        let keys = vec![
            SortKey {
                attribute: "sn".into(),
                reverse: false,
            },
            SortKey {
                attribute: "cn".into(),
                reverse: true,
            },
        ];
        let control = server_sort(&keys).unwrap();
        assert!(!control.critical);
        // SEQ { SEQ { OCTET "sn" }, SEQ { OCTET "cn", [1] TRUE } }
        assert_eq!(
            control.value.as_deref().unwrap(),
            &[
                0x30, 0x0f, //
                0x30, 0x04, 0x04, 0x02, b's', b'n', //
                0x30, 0x07, 0x04, 0x02, b'c', b'n', 0x81, 0x01, 0xff,
            ][..]
        );
    }

    #[test]
    fn test_vlv_request_targets_offset() {
        let control = virtual_list_view(&VirtualListViewOptions::window(101, 25)).unwrap();
        assert_eq!(control.oid, VLV_REQUEST_OID);
        // SEQ { INTEGER 0, INTEGER 24, [0] { INTEGER 101, INTEGER 0 } }
        assert_eq!(
            control.value.as_deref().unwrap(),
            &[
                0x30, 0x0e, //
                0x02, 0x01, 0x00, //
                0x02, 0x01, 0x18, //
                0xa0, 0x06, 0x02, 0x01, 0x65, 0x02, 0x01, 0x00,
            ][..]
        );
    }

    #[test]
    fn test_dirsync_round_trip() {
        let control = dir_sync(DIRSYNC_INCREMENTAL_VALUES, 0x10000, b"tok").unwrap();
        let response = DirectoryControl::with_value(
            DIRSYNC_OID,
            true,
            // SEQ { INTEGER 1, INTEGER 0, OCTET STRING "tok2" }
            vec![
                0x30, 0x0c, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x04, 0x04, b't', b'o', b'k',
                b'2',
            ],
        );
        assert_eq!(control.oid, DIRSYNC_OID);
        let parsed = parse_dir_sync_response(&[response]).unwrap().unwrap();
        assert!(parsed.more_results);
        assert_eq!(parsed.cookie, b"tok2");
    }

    #[test]
    fn test_ber_integer_signs() {
        assert_eq!(ber_integer(&[0x00]), 0);
        assert_eq!(ber_integer(&[0x01, 0xf4]), 500);
        assert_eq!(ber_integer(&[0xff]), -1);
        assert_eq!(ber_integer(&[0x00, 0xff]), 255);
    }
}
