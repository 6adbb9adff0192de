//! RFC 4515 / RFC 4514 value escaping.
//!
//! Filter assertion values escape `\ * ( )` and NUL as `\HH` pairs; binary
//! attribute values hex-escape every byte. DN attribute values follow the
//! different RFC 4514 rules used when composing RDNs.

use ldq_core::error::{DirectoryError, DirectoryResult};

/// Escape a text assertion value for use inside a filter (RFC 4515 §3).
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}

/// Escape a raw-match pattern: metacharacters are escaped, `*` survives.
pub fn escape_match_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '\\' => out.push_str("\\5c"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}

/// Hex-escape every byte of a binary assertion value.
pub fn escape_binary(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for b in value {
        out.push('\\');
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Undo [`escape_filter_value`], decoding `\HH` pairs back to bytes.
pub fn unescape_filter_value(value: &str) -> DirectoryResult<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut chars = value.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            let mut buffer = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
            continue;
        }
        let pair = value
            .get(i + 1..i + 3)
            .ok_or_else(|| DirectoryError::invalid_argument("truncated escape sequence"))?;
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|_| DirectoryError::invalid_argument(format!("bad escape '\\{pair}'")))?;
        bytes.push(byte);
        chars.next();
        chars.next();
    }
    String::from_utf8(bytes)
        .map_err(|_| DirectoryError::invalid_argument("escaped value is not UTF-8"))
}

/// Escape an attribute value for use inside an RDN (RFC 4514).
///
/// Leading/trailing spaces and a leading `#` are hex-escaped; the special
/// characters `, + " \ < > ; =` take a backslash prefix; NUL is hex-escaped.
pub fn escape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ' ' if i == 0 || i == last => out.push_str("\\20"),
            '#' if i == 0 => out.push_str("\\23"),
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '\0' => out.push_str("\\00"),
            other => out.push(other),
        }
    }
    out
}
