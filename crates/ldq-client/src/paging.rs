//! The paged-retrieval driver.
//!
//! One loop owns the paged-results cookie protocol: attach the control,
//! collect a page, echo the returned cookie, stop when the cookie is empty
//! or the caller's `take` is satisfied. Pages are strictly sequential; page
//! N+1 is only requested after page N returned.

use tracing::debug;

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_query::options::{PageOptions, SizeLimitMode};

use crate::commands::push_control;
use crate::connection::{DirectoryConnection, SearchRequest, SIZE_LIMIT_EXCEEDED};
use crate::controls;

/// Inputs the driver needs beyond the request itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PagingEnv {
    /// The server-enforced maximum page size.
    pub max_page_size: u32,
    /// Whether the paged-results control may be attached at all.
    pub use_paging: bool,
    /// Size-limit handling.
    pub size_limit_mode: SizeLimitMode,
}

/// Run a search to completion, paging as configured, and apply skip/take.
pub(crate) async fn run_search(
    connection: &mut dyn DirectoryConnection,
    request: &SearchRequest,
    page: Option<&PageOptions>,
    env: PagingEnv,
) -> DirectoryResult<Vec<DirectoryAttributes>> {
    let skip = page.and_then(|p| p.skip).unwrap_or(0);
    let take = page.and_then(|p| p.take);

    let mut entries = if env.use_paging {
        let page_size = page
            .and_then(|p| p.page_size)
            .unwrap_or(env.max_page_size)
            .min(env.max_page_size);
        let wanted = take.map(|t| skip + t);
        collect_pages(connection, request, page_size, wanted, env.size_limit_mode).await?
    } else {
        let response = connection.search(request.clone()).await?;
        match response.result.code {
            0 => response.entries,
            SIZE_LIMIT_EXCEEDED if env.size_limit_mode == SizeLimitMode::Partial => {
                response.entries
            }
            SIZE_LIMIT_EXCEEDED => {
                return Err(DirectoryError::SizeLimitExceeded {
                    retrieved: response.entries.len(),
                })
            }
            _ => {
                response.result.success()?;
                unreachable!("non-zero code handled above")
            }
        }
    };

    if skip > 0 {
        entries.drain(..skip.min(entries.len()));
    }
    if let Some(take) = take {
        entries.truncate(take);
    }
    Ok(entries)
}

/// Drive the cookie loop until exhaustion or `wanted` entries accumulated.
async fn collect_pages(
    connection: &mut dyn DirectoryConnection,
    request: &SearchRequest,
    page_size: u32,
    wanted: Option<usize>,
    size_limit_mode: SizeLimitMode,
) -> DirectoryResult<Vec<DirectoryAttributes>> {
    let mut entries: Vec<DirectoryAttributes> = Vec::new();
    let mut cookie: Vec<u8> = Vec::new();
    let mut pages = 0usize;

    loop {
        let mut paged_request = request.clone();
        push_control(
            &mut paged_request.controls,
            controls::paged_results(page_size, &cookie)?,
        )?;
        let response = connection.search(paged_request).await?;
        pages += 1;

        match response.result.code {
            0 => entries.extend(response.entries),
            SIZE_LIMIT_EXCEEDED => {
                entries.extend(response.entries);
                if size_limit_mode == SizeLimitMode::Partial {
                    debug!(retrieved = entries.len(), pages, "size limit tripped, returning partial result");
                    return Ok(entries);
                }
                return Err(DirectoryError::SizeLimitExceeded {
                    retrieved: entries.len(),
                });
            }
            _ => {
                response.result.success()?;
            }
        }

        let paged = controls::parse_paged_response(&response.controls)?;
        let next_cookie = match paged {
            Some(paged) if !paged.cookie.is_empty() => paged.cookie,
            _ => break,
        };
        if wanted.is_some_and(|w| entries.len() >= w) {
            break;
        }
        cookie = next_cookie;
    }

    debug!(retrieved = entries.len(), pages, "paged search complete");
    Ok(entries)
}
