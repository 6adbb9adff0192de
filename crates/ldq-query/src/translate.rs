//! The top-level query translator.
//!
//! A query arrives as an ordered pipeline of operators. Translation runs in
//! passes over the pipeline: predicates fold by AND into one filter,
//! ordering folds into at most one sort control, paging instructions
//! resolve by precedence (virtual list view over an explicit page over
//! implicit server paging), controls and flags are gathered, the projection
//! is extracted last and the terminal operator picks the result
//! transformer.

use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::map::{AttributeResolver, ClassDescriptor, DynamicResolver};

use crate::ast::Expression;
use crate::filter::{gate_filter, translate_predicate};
use crate::options::{
    DirectoryControl, PageOptions, QueryCommandOptions, ResultTransformer, SearchScope,
    SizeLimitMode, SortKey, VirtualListViewOptions,
};
use crate::projection::{self, Projection};

/// One operator in a query pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOp {
    /// Restrict the result set.
    Where(Expression),
    /// Primary sort key.
    OrderBy { property: String, descending: bool },
    /// Secondary sort key.
    ThenBy { property: String, descending: bool },
    /// Discard the first `n` entries.
    Skip(usize),
    /// Return at most `n` entries.
    Take(usize),
    /// Request exactly one page of the given size.
    Page { size: u32, cookie: Option<Vec<u8>> },
    /// Request a virtual-list-view window.
    VirtualListView(VirtualListViewOptions),
    /// Suppress the implicit paged-results control.
    WithoutPaging,
    /// Materialise without change tracking.
    NoTracking,
    /// Root the search under an explicit DN.
    NamingContext(String),
    /// Override the search scope.
    Scope(SearchScope),
    /// Attach a caller-supplied control.
    IncludeControl(DirectoryControl),
    /// Return partial results when the server size limit trips.
    WithinSizeLimit,
    /// Shape the result.
    Select(Projection),
    /// Load only these attributes (dynamic queries).
    LoadAttributes(Vec<String>),
    /// Return raw attribute bags.
    AsDynamic,
    /// Terminal fold.
    Terminal(TerminalOp),
}

/// Terminal pipeline operators.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOp {
    First { or_default: bool },
    Single { or_default: bool },
    Last,
    Count,
    Any { predicate: Option<Expression> },
    All { predicate: Expression },
}

/// An ordered query pipeline.
#[derive(Debug, Clone, Default)]
pub struct QueryPipeline {
    /// Operators in application order.
    pub ops: Vec<QueryOp>,
}

impl QueryPipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operator.
    pub fn push(&mut self, op: QueryOp) {
        self.ops.push(op);
    }
}

/// What the translator resolves members and gating against.
pub struct TranslationContext<'a> {
    /// Class descriptor of the mapped type; `None` on the dynamic path.
    pub descriptor: Option<&'a ClassDescriptor>,
}

impl<'a> TranslationContext<'a> {
    /// Typed translation against a class descriptor.
    pub fn typed(descriptor: &'a ClassDescriptor) -> Self {
        Self {
            descriptor: Some(descriptor),
        }
    }

    /// Dynamic translation; member names are attribute names.
    pub fn dynamic() -> Self {
        Self { descriptor: None }
    }

    fn resolver(&self) -> &dyn AttributeResolver {
        match self.descriptor {
            Some(descriptor) => descriptor,
            None => &DynamicResolver,
        }
    }
}

/// Translate a pipeline into command options.
pub fn translate(
    pipeline: &QueryPipeline,
    context: &TranslationContext<'_>,
) -> DirectoryResult<QueryCommandOptions> {
    let mut options = QueryCommandOptions {
        tracking: true,
        ..QueryCommandOptions::default()
    };

    // Pass 1: fold predicates by AND, terminal any/all contributing theirs.
    let mut predicates: Vec<Expression> = Vec::new();
    let mut terminal: Option<TerminalOp> = None;
    for op in &pipeline.ops {
        match op {
            QueryOp::Where(predicate) => predicates.push(predicate.clone()),
            QueryOp::Terminal(t) => {
                if terminal.is_some() {
                    return Err(DirectoryError::translation(
                        "more than one terminal operator in the pipeline",
                    ));
                }
                terminal = Some(t.clone());
            }
            _ => {}
        }
    }
    let mut implicit_take: Option<usize> = None;
    match &terminal {
        Some(TerminalOp::Any { predicate }) => {
            if let Some(predicate) = predicate {
                predicates.push(predicate.clone());
            }
            implicit_take = Some(1);
        }
        Some(TerminalOp::All { predicate }) => {
            predicates.push(predicate.clone().not());
            implicit_take = Some(1);
        }
        _ => {}
    }
    let combined = predicates.into_iter().reduce(Expression::and);
    let translated = match &combined {
        Some(predicate) => translate_predicate(predicate, context.resolver())?,
        None => crate::filter::TranslatedFilter {
            filter: None,
            yield_no_results: false,
        },
    };
    options.yield_no_results = translated.yield_no_results;
    options.filter = gate_filter(translated.filter.as_deref(), context.descriptor);

    // Pass 2: ordering. One sort control; the first OrderBy anchors it.
    for op in &pipeline.ops {
        match op {
            QueryOp::OrderBy {
                property,
                descending,
            } => {
                if !options.sorting.is_empty() {
                    return Err(DirectoryError::translation(
                        "duplicate control: a sort control is already defined",
                    ));
                }
                options.sorting.push(SortKey {
                    attribute: resolve_sort_attribute(context, property)?,
                    reverse: *descending,
                });
            }
            QueryOp::ThenBy {
                property,
                descending,
            } => {
                if options.sorting.is_empty() {
                    return Err(DirectoryError::translation(
                        "then_by requires a preceding order_by",
                    ));
                }
                options.sorting.push(SortKey {
                    attribute: resolve_sort_attribute(context, property)?,
                    reverse: *descending,
                });
            }
            _ => {}
        }
    }

    // Pass 3: paging precedence - virtual list view, explicit page,
    // implicit server paging. Skip always precedes take.
    let mut page = PageOptions::default();
    for op in &pipeline.ops {
        match op {
            QueryOp::Skip(n) => page.skip = Some(page.skip.unwrap_or(0) + n),
            QueryOp::Take(n) => {
                page.take = Some(page.take.map_or(*n, |existing| existing.min(*n)));
            }
            QueryOp::Page { size, cookie } => {
                page.page_size = Some(*size);
                if let Some(cookie) = cookie {
                    page.cookie = cookie.clone();
                }
            }
            QueryOp::VirtualListView(vlv) => {
                if options.vlv.is_some() {
                    return Err(DirectoryError::translation(
                        "duplicate control: a virtual-list-view control is already defined",
                    ));
                }
                options.vlv = Some(vlv.clone());
            }
            _ => {}
        }
    }
    if let Some(n) = implicit_take {
        page.take = Some(page.take.map_or(n, |existing| existing.min(n)));
    }
    if let Some(vlv) = &mut options.vlv {
        if options.sorting.is_empty() {
            return Err(DirectoryError::translation(
                "a virtual list view requires server-side ordering",
            ));
        }
        // The smarter skip path: fold it into the view offset.
        if let Some(skip) = page.skip.take() {
            if vlv.offset <= 1 {
                vlv.offset = skip as u32 + 1;
            }
        }
        if !page.is_empty() && page.page_size.is_some() {
            return Err(DirectoryError::translation(
                "an explicit page cannot combine with a virtual list view",
            ));
        }
    } else if !page.is_empty() {
        options.paging = Some(page);
    }

    // Pass 4: controls and flags.
    for op in &pipeline.ops {
        match op {
            QueryOp::IncludeControl(control) => options.controls.push(control.clone()),
            QueryOp::WithoutPaging => options.without_paging = true,
            QueryOp::WithinSizeLimit => options.size_limit_mode = SizeLimitMode::Partial,
            QueryOp::NoTracking => options.tracking = false,
            QueryOp::NamingContext(dn) => options.naming_context = Some(dn.clone()),
            QueryOp::Scope(scope) => options.scope = Some(*scope),
            QueryOp::AsDynamic => options.dynamic = true,
            _ => {}
        }
    }
    // The caller's naming context wins; the mapping's is the fallback.
    if options.naming_context.is_none() {
        options.naming_context = context
            .descriptor
            .and_then(|descriptor| descriptor.naming_context.clone());
    }

    // Pass 5: projection last.
    let mut load_attributes: Option<Vec<String>> = None;
    for op in &pipeline.ops {
        match op {
            QueryOp::Select(projection) => {
                if options.projection.is_some() {
                    return Err(DirectoryError::translation(
                        "a query supports at most one select",
                    ));
                }
                options.projection = Some(projection.clone());
            }
            QueryOp::LoadAttributes(attributes) => {
                load_attributes = Some(attributes.clone());
            }
            _ => {}
        }
    }
    if options.dynamic && options.projection.is_some() {
        return Err(DirectoryError::translation(
            "a dynamic query cannot carry a select projection",
        ));
    }
    options.attributes_to_load = match (&options.projection, context.descriptor) {
        (Some(projection), Some(descriptor)) => {
            projection::analyze(projection, descriptor)?.selected
        }
        (Some(_), None) => {
            return Err(DirectoryError::translation(
                "projections require a mapped type",
            ))
        }
        (None, Some(descriptor)) => descriptor.all_attributes(),
        (None, None) => load_attributes
            .unwrap_or_default()
            .into_iter()
            .map(|attribute| (attribute.clone(), attribute))
            .collect(),
    };
    if let Some(descriptor) = context.descriptor {
        options.inject_object_class = descriptor.has_sub_types() && !descriptor.has_catch_all;
    }

    tracing::debug!(
        filter = %options.filter,
        attributes = options.attributes_to_load.len(),
        yield_no_results = options.yield_no_results,
        "translated query pipeline"
    );

    // Pass 6: terminal transformer.
    options.transformer = match terminal {
        None => ResultTransformer::List,
        Some(TerminalOp::First { or_default: false }) => ResultTransformer::First,
        Some(TerminalOp::First { or_default: true }) => ResultTransformer::FirstOrDefault,
        Some(TerminalOp::Single { or_default: false }) => ResultTransformer::Single,
        Some(TerminalOp::Single { or_default: true }) => ResultTransformer::SingleOrDefault,
        Some(TerminalOp::Last) => ResultTransformer::Last,
        Some(TerminalOp::Count) => ResultTransformer::Count,
        Some(TerminalOp::Any { .. }) => ResultTransformer::Any,
        Some(TerminalOp::All { .. }) => ResultTransformer::All,
    };

    Ok(options)
}

fn resolve_sort_attribute(
    context: &TranslationContext<'_>,
    property: &str,
) -> DirectoryResult<String> {
    Ok(context.resolver().resolve(property)?.attribute)
}
