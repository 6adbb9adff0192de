//! The command set.
//!
//! Every operation the context performs is one variant of [`Command`] with a
//! single `execute`. Query variants share the pre-flight sequence: resolve
//! the search base, reject duplicate controls, honour the no-result short
//! circuit, inject `objectClass` for sub-type discrimination, and attach
//! sort and paging controls before anything touches the connection.

use tracing::{debug, trace};

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::value::RawValue;
use ldq_query::filter::MATCH_ALL_FILTER;
use ldq_query::options::{DirectoryControl, QueryCommandOptions, ResultTransformer, SearchScope};

use crate::connection::{
    AddRequest, DeleteRequest, DirectoryConnection, DirectoryRequest, ModifyDnRequest,
    ModifyRequest, OperationResult, SearchRequest,
};
use crate::controls;
use crate::paging::{self, PagingEnv};
use crate::range;

/// Page size attached to first/single lookups: one entry to return, one to
/// prove non-uniqueness.
const SINGLE_RESULT_PAGE_SIZE: u32 = 2;

/// Attribute list requesting no attributes at all (RFC 4511 §4.5.1.8).
pub(crate) const NO_ATTRIBUTES: &str = "1.1";

/// Defaults a command inherits from the context.
#[derive(Debug, Clone)]
pub struct ExecutionEnv {
    /// Search base when neither the query nor the mapping names one.
    pub default_naming_context: Option<String>,
    /// Default search scope.
    pub default_scope: SearchScope,
    /// Server-enforced maximum page size.
    pub max_page_size: u32,
    /// Whether implicit paging is enabled.
    pub paging_enabled: bool,
}

/// The closed set of operations the engine performs.
#[derive(Debug, Clone)]
pub enum Command {
    /// A query returning its full (possibly paged) result list.
    StandardQuery { options: QueryCommandOptions },
    /// A query returning at most the first entry.
    FirstOrDefault { options: QueryCommandOptions },
    /// A query returning the only entry.
    SingleOrDefault { options: QueryCommandOptions },
    /// A query returning the entry count across all pages.
    CountQuery { options: QueryCommandOptions },
    /// A query answering a boolean any/all question.
    AnyQuery { options: QueryCommandOptions },
    /// A base-scope read of one entry.
    GetByDn { dn: String, attributes: Vec<String> },
    /// One explicit page with its continuation cookie.
    PagedQuery { options: QueryCommandOptions },
    /// A virtual-list-view window.
    VirtualListViewQuery { options: QueryCommandOptions },
    /// An untyped query returning raw attribute bags.
    DynamicQuery { options: QueryCommandOptions },
    /// Create an entry.
    Add { request: AddRequest },
    /// Modify an entry.
    Modify { request: ModifyRequest },
    /// Delete an entry.
    Delete { request: DeleteRequest },
    /// Move or rename an entry.
    ModifyDn { request: ModifyDnRequest },
    /// Walk an `attr;range=N-M` retrieval to completion.
    RangeRetrieval {
        dn: String,
        attribute: String,
        start: u32,
    },
}

/// What a command produced.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Entries in server order.
    Entries(Vec<DirectoryAttributes>),
    /// Zero or one entry.
    Entry(Option<DirectoryAttributes>),
    /// An entry count.
    Count(u64),
    /// An any/all answer.
    Bool(bool),
    /// One page plus the cookie for the next.
    Page {
        entries: Vec<DirectoryAttributes>,
        cookie: Vec<u8>,
    },
    /// Raw values from a range retrieval.
    Values(Vec<RawValue>),
    /// A mutation's result summary.
    Done(OperationResult),
}

impl Command {
    /// Pick the query variant for a translated pipeline.
    pub fn from_query(options: QueryCommandOptions) -> Self {
        if options.vlv.is_some() {
            return Self::VirtualListViewQuery { options };
        }
        match options.transformer {
            ResultTransformer::First | ResultTransformer::FirstOrDefault => {
                Self::FirstOrDefault { options }
            }
            ResultTransformer::Single | ResultTransformer::SingleOrDefault => {
                Self::SingleOrDefault { options }
            }
            ResultTransformer::Count => Self::CountQuery { options },
            ResultTransformer::Any | ResultTransformer::All => Self::AnyQuery { options },
            ResultTransformer::List | ResultTransformer::Last => {
                if options
                    .paging
                    .as_ref()
                    .is_some_and(|p| p.page_size.is_some())
                {
                    Self::PagedQuery { options }
                } else if options.dynamic {
                    Self::DynamicQuery { options }
                } else {
                    Self::StandardQuery { options }
                }
            }
        }
    }

    /// Execute against a connection.
    pub async fn execute(
        self,
        connection: &mut dyn DirectoryConnection,
        env: &ExecutionEnv,
    ) -> DirectoryResult<CommandOutcome> {
        match self {
            Self::StandardQuery { options } | Self::DynamicQuery { options } => {
                let Some(request) = prepare(&options, env)? else {
                    return Ok(CommandOutcome::Entries(Vec::new()));
                };
                let entries = paging::run_search(
                    connection,
                    &request,
                    options.paging.as_ref(),
                    paging_env(&options, env),
                )
                .await?;
                Ok(CommandOutcome::Entries(entries))
            }

            Self::FirstOrDefault { options } | Self::SingleOrDefault { options } => {
                let single = matches!(
                    options.transformer,
                    ResultTransformer::Single | ResultTransformer::SingleOrDefault
                );
                let or_default = matches!(
                    options.transformer,
                    ResultTransformer::FirstOrDefault | ResultTransformer::SingleOrDefault
                );
                let Some(mut request) = prepare(&options, env)? else {
                    return if or_default {
                        Ok(CommandOutcome::Entry(None))
                    } else {
                        Err(DirectoryError::NoResult {
                            filter: options.filter.clone(),
                        })
                    };
                };
                if !options.without_paging {
                    push_control(
                        &mut request.controls,
                        controls::paged_results(SINGLE_RESULT_PAGE_SIZE, &[])?,
                    )?;
                }
                let response = connection.search(request).await?;
                response.result.success()?;
                let mut entries = response.entries;
                if single && entries.len() > 1 {
                    return Err(DirectoryError::MultipleResults {
                        filter: options.filter.clone(),
                    });
                }
                match (entries.is_empty(), or_default) {
                    (true, true) => Ok(CommandOutcome::Entry(None)),
                    (true, false) => Err(DirectoryError::NoResult {
                        filter: options.filter.clone(),
                    }),
                    (false, _) => Ok(CommandOutcome::Entry(Some(entries.remove(0)))),
                }
            }

            Self::CountQuery { options } => {
                let Some(mut request) = prepare(&options, env)? else {
                    return Ok(CommandOutcome::Count(0));
                };
                request.attributes = vec![NO_ATTRIBUTES.to_owned()];
                let entries = paging::run_search(
                    connection,
                    &request,
                    options.paging.as_ref(),
                    paging_env(&options, env),
                )
                .await?;
                Ok(CommandOutcome::Count(entries.len() as u64))
            }

            Self::AnyQuery { options } => {
                let negated = options.transformer == ResultTransformer::All;
                let Some(mut request) = prepare(&options, env)? else {
                    // No entry can match: any → false, all → true.
                    return Ok(CommandOutcome::Bool(negated));
                };
                request.attributes = vec![NO_ATTRIBUTES.to_owned()];
                let entries = paging::run_search(
                    connection,
                    &request,
                    options.paging.as_ref(),
                    paging_env(&options, env),
                )
                .await?;
                let matched = !entries.is_empty();
                Ok(CommandOutcome::Bool(if negated { !matched } else { matched }))
            }

            // A blank DN is legal here: the rootDSE read uses an empty base.
            Self::GetByDn { dn, attributes } => {
                let request = SearchRequest {
                    base_dn: dn,
                    scope: SearchScope::Base,
                    filter: MATCH_ALL_FILTER.to_owned(),
                    attributes,
                    controls: Vec::new(),
                };
                trace_request(&request);
                let response = connection.search(request).await?;
                response.result.success()?;
                Ok(CommandOutcome::Entry(response.entries.into_iter().next()))
            }

            Self::PagedQuery { options } => {
                let Some(mut request) = prepare(&options, env)? else {
                    return Ok(CommandOutcome::Page {
                        entries: Vec::new(),
                        cookie: Vec::new(),
                    });
                };
                let page = options.paging.clone().unwrap_or_default();
                let size = page
                    .page_size
                    .unwrap_or(env.max_page_size)
                    .min(env.max_page_size);
                push_control(
                    &mut request.controls,
                    controls::paged_results(size, &page.cookie)?,
                )?;
                let response = connection.search(request).await?;
                response.result.success()?;
                let cookie = controls::parse_paged_response(&response.controls)?
                    .map(|p| p.cookie)
                    .unwrap_or_default();
                Ok(CommandOutcome::Page {
                    entries: response.entries,
                    cookie,
                })
            }

            Self::VirtualListViewQuery { options } => {
                let Some(mut request) = prepare(&options, env)? else {
                    return Ok(CommandOutcome::Entries(Vec::new()));
                };
                let vlv = options.vlv.as_ref().ok_or_else(|| {
                    DirectoryError::translation("virtual-list-view command without view options")
                })?;
                push_control(&mut request.controls, controls::virtual_list_view(vlv)?)?;
                let response = connection.search(request).await?;
                response.result.success()?;
                if let Some(view) = controls::parse_vlv_response(&response.controls)? {
                    if view.result != 0 {
                        return Err(DirectoryError::Operation {
                            code: view.result,
                            matched_dn: String::new(),
                            message: "virtual list view failed".to_owned(),
                        });
                    }
                }
                Ok(CommandOutcome::Entries(response.entries))
            }

            Self::Add { request } => {
                check_duplicate_controls(&request.controls)?;
                debug!(dn = %request.dn, attributes = request.attributes.len(), "adding entry");
                let result = connection.operation(DirectoryRequest::Add(request)).await?;
                result.success()?;
                Ok(CommandOutcome::Done(result))
            }

            Self::Modify { request } => {
                check_duplicate_controls(&request.controls)?;
                debug!(dn = %request.dn, operations = request.operations.len(), "modifying entry");
                let result = connection
                    .operation(DirectoryRequest::Modify(request))
                    .await?;
                result.success()?;
                Ok(CommandOutcome::Done(result))
            }

            Self::Delete { request } => {
                check_duplicate_controls(&request.controls)?;
                debug!(dn = %request.dn, "deleting entry");
                let result = connection
                    .operation(DirectoryRequest::Delete(request))
                    .await?;
                result.success()?;
                Ok(CommandOutcome::Done(result))
            }

            Self::ModifyDn { request } => {
                check_duplicate_controls(&request.controls)?;
                debug!(dn = %request.dn, new_rdn = %request.new_rdn, "moving entry");
                let result = connection
                    .operation(DirectoryRequest::ModifyDn(request))
                    .await?;
                result.success()?;
                Ok(CommandOutcome::Done(result))
            }

            Self::RangeRetrieval {
                dn,
                attribute,
                start,
            } => {
                let values = range::retrieve(connection, &dn, &attribute, start).await?;
                Ok(CommandOutcome::Values(values))
            }
        }
    }
}

/// Shared query pre-flight. Returns `None` on the no-result short circuit.
fn prepare(
    options: &QueryCommandOptions,
    env: &ExecutionEnv,
) -> DirectoryResult<Option<SearchRequest>> {
    let base_dn = options
        .naming_context
        .clone()
        .or_else(|| env.default_naming_context.clone())
        .ok_or_else(|| {
            DirectoryError::mapping("no naming context: neither the query nor the mapping names one")
        })?;

    if options.yield_no_results {
        debug!(filter = %options.filter, "predicate is statically false, skipping the server");
        return Ok(None);
    }

    let mut attributes = options.attribute_names();
    if options.inject_object_class
        && !attributes.iter().any(|a| a.eq_ignore_ascii_case("objectClass"))
    {
        attributes.push("objectClass".to_owned());
    }

    let mut request_controls: Vec<DirectoryControl> = Vec::new();
    for control in &options.controls {
        push_control(&mut request_controls, control.clone())?;
    }
    if !options.sorting.is_empty() {
        push_control(&mut request_controls, controls::server_sort(&options.sorting)?)?;
    }

    let request = SearchRequest {
        base_dn,
        scope: options.scope.unwrap_or(env.default_scope),
        filter: options.filter.clone(),
        attributes,
        controls: request_controls,
    };
    trace_request(&request);
    Ok(Some(request))
}

fn paging_env(options: &QueryCommandOptions, env: &ExecutionEnv) -> PagingEnv {
    PagingEnv {
        max_page_size: env.max_page_size,
        use_paging: env.paging_enabled && !options.without_paging,
        size_limit_mode: options.size_limit_mode,
    }
}

/// Append a control, rejecting a second control of the same kind.
pub(crate) fn push_control(
    controls: &mut Vec<DirectoryControl>,
    control: DirectoryControl,
) -> DirectoryResult<()> {
    if controls.iter().any(|c| c.oid == control.oid) {
        return Err(DirectoryError::translation(format!(
            "duplicate control: {}",
            control.oid
        )));
    }
    controls.push(control);
    Ok(())
}

fn check_duplicate_controls(controls: &[DirectoryControl]) -> DirectoryResult<()> {
    for (i, control) in controls.iter().enumerate() {
        if controls[..i].iter().any(|c| c.oid == control.oid) {
            return Err(DirectoryError::translation(format!(
                "duplicate control: {}",
                control.oid
            )));
        }
    }
    Ok(())
}

fn trace_request(request: &SearchRequest) {
    trace!(
        base_dn = %request.base_dn,
        filter = %request.filter,
        attributes = ?request.attributes,
        controls = request.controls.len(),
        "sending search request"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_control_rejects_duplicates() {
        let mut list = Vec::new();
        push_control(&mut list, controls::tree_delete()).unwrap();
        let err = push_control(&mut list, controls::tree_delete()).unwrap_err();
        assert!(err.to_string().contains("duplicate control"));
    }

    #[test]
    fn test_from_query_picks_the_variant() {
        let mut options = QueryCommandOptions::default();
        assert!(matches!(
            Command::from_query(options.clone()),
            Command::StandardQuery { .. }
        ));

        options.transformer = ResultTransformer::Count;
        assert!(matches!(
            Command::from_query(options.clone()),
            Command::CountQuery { .. }
        ));

        options.transformer = ResultTransformer::List;
        options.dynamic = true;
        assert!(matches!(
            Command::from_query(options.clone()),
            Command::DynamicQuery { .. }
        ));

        options.dynamic = false;
        options.paging = Some(ldq_query::options::PageOptions {
            page_size: Some(100),
            ..Default::default()
        });
        assert!(matches!(
            Command::from_query(options.clone()),
            Command::PagedQuery { .. }
        ));

        options.vlv = Some(ldq_query::options::VirtualListViewOptions::window(1, 10));
        assert!(matches!(
            Command::from_query(options),
            Command::VirtualListViewQuery { .. }
        ));
    }
}
