//! Range retrieval for very large multi-valued attributes.
//!
//! Directories cap how many values of one attribute a single search may
//! return; the remainder is fetched by asking for `attr;range=N-*` and
//! following the `attr;range=N-M` names the server answers with until it
//! marks the final block with `M = *`.

use tracing::debug;

use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::value::RawValue;
use ldq_query::filter::MATCH_ALL_FILTER;
use ldq_query::options::SearchScope;

use crate::connection::{DirectoryConnection, SearchRequest};

/// A value type range retrieval can produce.
pub trait RangeValue: Sized {
    /// Convert one raw value.
    fn from_raw(raw: &RawValue) -> DirectoryResult<Self>;
}

impl RangeValue for String {
    fn from_raw(raw: &RawValue) -> DirectoryResult<Self> {
        raw.as_text()
            .map(str::to_owned)
            .ok_or_else(|| DirectoryError::mapping("range value is not UTF-8 text"))
    }
}

impl RangeValue for Vec<u8> {
    fn from_raw(raw: &RawValue) -> DirectoryResult<Self> {
        Ok(raw.as_bytes().to_vec())
    }
}

/// Fetch all values of `attribute` on `dn`, starting at index `start`.
pub(crate) async fn retrieve(
    connection: &mut dyn DirectoryConnection,
    dn: &str,
    attribute: &str,
    start: u32,
) -> DirectoryResult<Vec<RawValue>> {
    if dn.trim().is_empty() {
        return Err(DirectoryError::invalid_argument("blank distinguished name"));
    }
    if attribute.trim().is_empty() {
        return Err(DirectoryError::invalid_argument("blank attribute name"));
    }

    let mut next = start;
    let mut values: Vec<RawValue> = Vec::new();
    let mut requests = 0usize;
    loop {
        let ranged_name = format!("{attribute};range={next}-*");
        let request = SearchRequest {
            base_dn: dn.to_owned(),
            scope: SearchScope::Base,
            filter: MATCH_ALL_FILTER.to_owned(),
            attributes: vec![ranged_name],
            controls: Vec::new(),
        };
        let response = connection.search(request).await?;
        response.result.success()?;
        requests += 1;

        let Some(entry) = response.entries.into_iter().next() else {
            break;
        };
        let Some((name, block)) = entry
            .get_ranged(attribute)
            .map(|(name, block)| (name.to_owned(), block.to_vec()))
        else {
            break;
        };
        values.extend(block);

        match block_end(&name) {
            // The server marked the final block.
            None => break,
            Some(end) => next = end + 1,
        }
    }

    debug!(dn, attribute, requests, values = values.len(), "range retrieval complete");
    Ok(values)
}

/// The inclusive end index of a ranged attribute name, `None` for the final
/// (`attr;range=N-*`) block or a plain attribute name.
fn block_end(name: &str) -> Option<u32> {
    let (_, range) = name.split_once(";range=")?;
    let (_, end) = range.split_once('-')?;
    end.parse().ok()
}
