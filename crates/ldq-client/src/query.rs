//! Typed and dynamic query builders.
//!
//! [`DirectoryQuery`] is the fluent pipeline over a mapped type; it borrows
//! the context and executes on its terminal operators. `select` moves the
//! query into a [`ProjectedQuery`] whose terminals yield values or rows
//! instead of entities. [`DynamicQuery`] is the untyped path: members are
//! attribute names and results are raw attribute bags.

use std::marker::PhantomData;
use std::sync::Arc;

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::convert;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::map::ClassMap;
use ldq_core::registry::DirectoryEntity;
use ldq_core::tracking::Tracked;
use ldq_core::value::AttributeValue;
use ldq_query::ast::{prop, Expression};
use ldq_query::options::{
    DirectoryControl, QueryCommandOptions, SearchScope, VirtualListViewOptions,
};
use ldq_query::projection::{self, ProjectedRow, Projection};
use ldq_query::translate::{translate, QueryOp, QueryPipeline, TerminalOp, TranslationContext};

use crate::commands::{Command, CommandOutcome};
use crate::context::DirectoryContext;

/// A fluent query over a mapped type.
pub struct DirectoryQuery<'a, T: DirectoryEntity> {
    context: &'a DirectoryContext,
    pipeline: QueryPipeline,
    _entity: PhantomData<fn() -> T>,
}

impl<'a, T: DirectoryEntity> DirectoryQuery<'a, T> {
    pub(crate) fn new(context: &'a DirectoryContext) -> Self {
        Self {
            context,
            pipeline: QueryPipeline::new(),
            _entity: PhantomData,
        }
    }

    fn push(mut self, op: QueryOp) -> Self {
        self.pipeline.push(op);
        self
    }

    /// Restrict the result set; multiple filters fold by AND.
    pub fn filter(self, predicate: Expression) -> Self {
        self.push(QueryOp::Where(predicate))
    }

    /// Sort ascending by a property.
    pub fn order_by(self, property: impl Into<String>) -> Self {
        self.push(QueryOp::OrderBy {
            property: property.into(),
            descending: false,
        })
    }

    /// Sort descending by a property.
    pub fn order_by_descending(self, property: impl Into<String>) -> Self {
        self.push(QueryOp::OrderBy {
            property: property.into(),
            descending: true,
        })
    }

    /// Add a secondary ascending sort key.
    pub fn then_by(self, property: impl Into<String>) -> Self {
        self.push(QueryOp::ThenBy {
            property: property.into(),
            descending: false,
        })
    }

    /// Add a secondary descending sort key.
    pub fn then_by_descending(self, property: impl Into<String>) -> Self {
        self.push(QueryOp::ThenBy {
            property: property.into(),
            descending: true,
        })
    }

    /// Discard the first `n` entries.
    pub fn skip(self, n: usize) -> Self {
        self.push(QueryOp::Skip(n))
    }

    /// Return at most `n` entries.
    pub fn take(self, n: usize) -> Self {
        self.push(QueryOp::Take(n))
    }

    /// Request one explicit page.
    pub fn page(self, size: u32) -> Self {
        self.push(QueryOp::Page { size, cookie: None })
    }

    /// Request the page following a previously returned cookie.
    pub fn page_with_cookie(self, size: u32, cookie: Vec<u8>) -> Self {
        self.push(QueryOp::Page {
            size,
            cookie: Some(cookie),
        })
    }

    /// Request a virtual-list-view window; requires an order_by.
    pub fn virtual_list_view(self, options: VirtualListViewOptions) -> Self {
        self.push(QueryOp::VirtualListView(options))
    }

    /// Suppress the implicit paged-results control.
    pub fn without_paging(self) -> Self {
        self.push(QueryOp::WithoutPaging)
    }

    /// Materialise without change tracking.
    pub fn as_no_tracking(self) -> Self {
        self.push(QueryOp::NoTracking)
    }

    /// Root the search under an explicit DN.
    pub fn in_naming_context(self, dn: impl Into<String>) -> Self {
        self.push(QueryOp::NamingContext(dn.into()))
    }

    /// Search the whole subtree under the given DN.
    pub fn in_subtree(self, dn: impl Into<String>) -> Self {
        self.push(QueryOp::NamingContext(dn.into()))
            .push(QueryOp::Scope(SearchScope::Subtree))
    }

    /// Override the search scope.
    pub fn scoped(self, scope: SearchScope) -> Self {
        self.push(QueryOp::Scope(scope))
    }

    /// Attach a caller-supplied control.
    pub fn include_control(self, control: DirectoryControl) -> Self {
        self.push(QueryOp::IncludeControl(control))
    }

    /// Return partial results when the server size limit trips.
    pub fn within_size_limit(self) -> Self {
        self.push(QueryOp::WithinSizeLimit)
    }

    /// Shape the result with a projection.
    pub fn select(self, projection: Projection) -> ProjectedQuery<'a, T> {
        ProjectedQuery {
            inner: self.push(QueryOp::Select(projection)),
            flatten: false,
        }
    }

    /// Project a single property.
    pub fn select_member(self, property: impl Into<String>) -> ProjectedQuery<'a, T> {
        self.select(Projection::Member(property.into()))
    }

    /// Project a multi-valued property, flattening values across entries.
    pub fn select_many(self, property: impl Into<String>) -> ProjectedQuery<'a, T> {
        let mut projected = self.select(Projection::Member(property.into()));
        projected.flatten = true;
        projected
    }

    /// Return raw attribute bags instead of materialised entities.
    pub fn as_dynamic(self) -> DynamicResults<'a, T> {
        DynamicResults {
            inner: self.push(QueryOp::AsDynamic),
        }
    }

    fn prepare(&self) -> DirectoryResult<(Arc<ClassMap<T>>, QueryCommandOptions)> {
        let map = self.context.mapper().get_or_register::<T>()?;
        let options = translate(
            &self.pipeline,
            &TranslationContext::typed(map.descriptor()),
        )?;
        Ok((map, options))
    }

    async fn run_entries(
        &self,
        options: QueryCommandOptions,
    ) -> DirectoryResult<Vec<DirectoryAttributes>> {
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Entries(entries) => Ok(entries),
            CommandOutcome::Page { entries, .. } => Ok(entries),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    fn materialize(
        map: &ClassMap<T>,
        tracking: bool,
        attrs: &DirectoryAttributes,
    ) -> DirectoryResult<Tracked<T>> {
        if tracking {
            map.materialize_tracked(attrs)
        } else {
            Ok(Tracked::untracked(map.materialize(attrs)?, attrs.dn()))
        }
    }

    /// Execute and materialise the full result list.
    pub async fn to_vec(self) -> DirectoryResult<Vec<Tracked<T>>> {
        let (map, options) = self.prepare()?;
        let tracking = options.tracking;
        let entries = self.run_entries(options).await?;
        entries
            .iter()
            .map(|attrs| Self::materialize(&map, tracking, attrs))
            .collect()
    }

    /// Execute one explicit page; returns the entries and the cookie to
    /// pass to [`page_with_cookie`](Self::page_with_cookie).
    pub async fn to_page(self) -> DirectoryResult<(Vec<Tracked<T>>, Vec<u8>)> {
        let (map, options) = self.prepare()?;
        let tracking = options.tracking;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Page { entries, cookie } => {
                let materialised = entries
                    .iter()
                    .map(|attrs| Self::materialize(&map, tracking, attrs))
                    .collect::<DirectoryResult<Vec<_>>>()?;
                Ok((materialised, cookie))
            }
            CommandOutcome::Entries(entries) => {
                let materialised = entries
                    .iter()
                    .map(|attrs| Self::materialize(&map, tracking, attrs))
                    .collect::<DirectoryResult<Vec<_>>>()?;
                Ok((materialised, Vec::new()))
            }
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    async fn run_entry(
        mut self,
        terminal: TerminalOp,
    ) -> DirectoryResult<Option<Tracked<T>>> {
        self.pipeline.push(QueryOp::Terminal(terminal));
        let (map, options) = self.prepare()?;
        let tracking = options.tracking;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Entry(Some(attrs)) => {
                Ok(Some(Self::materialize(&map, tracking, &attrs)?))
            }
            CommandOutcome::Entry(None) => Ok(None),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    /// The first entry; fails `no_result` when nothing matched.
    pub async fn first(self) -> DirectoryResult<Tracked<T>> {
        let result = self.run_entry(TerminalOp::First { or_default: false }).await?;
        result.ok_or_else(|| DirectoryError::connection("first produced no entry"))
    }

    /// The first entry, if any.
    pub async fn first_or_default(self) -> DirectoryResult<Option<Tracked<T>>> {
        self.run_entry(TerminalOp::First { or_default: true }).await
    }

    /// Exactly one entry; fails `no_result` or `multiple_results`.
    pub async fn single(self) -> DirectoryResult<Tracked<T>> {
        let result = self.run_entry(TerminalOp::Single { or_default: false }).await?;
        result.ok_or_else(|| DirectoryError::connection("single produced no entry"))
    }

    /// At most one entry; fails `multiple_results` when several matched.
    pub async fn single_or_default(self) -> DirectoryResult<Option<Tracked<T>>> {
        self.run_entry(TerminalOp::Single { or_default: true }).await
    }

    /// The last entry of the full result; evaluated client-side because the
    /// protocol has no server-side equivalent.
    pub async fn last(mut self) -> DirectoryResult<Tracked<T>> {
        self.pipeline.push(QueryOp::Terminal(TerminalOp::Last));
        let (map, options) = self.prepare()?;
        let tracking = options.tracking;
        let filter = options.filter.clone();
        let entries = self.run_entries(options).await?;
        match entries.last() {
            Some(attrs) => Self::materialize(&map, tracking, attrs),
            None => Err(DirectoryError::NoResult { filter }),
        }
    }

    /// The number of matching entries across all pages.
    pub async fn count(mut self) -> DirectoryResult<u64> {
        self.pipeline.push(QueryOp::Terminal(TerminalOp::Count));
        let (_, options) = self.prepare()?;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Count(count) => Ok(count),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    /// Whether any entry matches the query.
    pub async fn any(self) -> DirectoryResult<bool> {
        self.run_bool(TerminalOp::Any { predicate: None }).await
    }

    /// Whether any entry matches the query and the given predicate.
    pub async fn any_where(self, predicate: Expression) -> DirectoryResult<bool> {
        self.run_bool(TerminalOp::Any {
            predicate: Some(predicate),
        })
        .await
    }

    /// Whether every matching entry satisfies the predicate.
    pub async fn all(self, predicate: Expression) -> DirectoryResult<bool> {
        self.run_bool(TerminalOp::All { predicate }).await
    }

    async fn run_bool(mut self, terminal: TerminalOp) -> DirectoryResult<bool> {
        self.pipeline.push(QueryOp::Terminal(terminal));
        let (_, options) = self.prepare()?;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Bool(value) => Ok(value),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }
}

/// A query whose result shape is a projection.
pub struct ProjectedQuery<'a, T: DirectoryEntity> {
    inner: DirectoryQuery<'a, T>,
    flatten: bool,
}

impl<T: DirectoryEntity> ProjectedQuery<'_, T> {
    fn projection(&self) -> DirectoryResult<Projection> {
        self.inner
            .pipeline
            .ops
            .iter()
            .find_map(|op| match op {
                QueryOp::Select(projection) => Some(projection.clone()),
                _ => None,
            })
            .ok_or_else(|| DirectoryError::translation("projected query without a select"))
    }

    /// Execute and return one row per entry.
    pub async fn to_rows(self) -> DirectoryResult<Vec<ProjectedRow>> {
        let projection = self.projection()?;
        let (map, options) = self.inner.prepare()?;
        let entries = self.inner.run_entries(options).await?;
        let descriptor = Arc::clone(map.descriptor());
        entries
            .iter()
            .map(|attrs| row_for(&projection, &descriptor, attrs))
            .collect()
    }

    /// Execute and return one value per entry (member projections); with
    /// `select_many`, multi-valued attributes flatten into the output.
    pub async fn to_values(self) -> DirectoryResult<Vec<AttributeValue>> {
        let flatten = self.flatten;
        let projection = self.projection()?;
        let member = match &projection {
            Projection::Member(name) => name.clone(),
            _ => {
                return Err(DirectoryError::translation(
                    "to_values requires a single-member projection",
                ))
            }
        };
        let (map, options) = self.inner.prepare()?;
        let entries = self.inner.run_entries(options).await?;
        let descriptor = Arc::clone(map.descriptor());
        let property = descriptor.property(&member)?;

        let mut values = Vec::with_capacity(entries.len());
        for attrs in &entries {
            let value = match attrs.get(&property.attribute) {
                Some(raw) if !raw.is_empty() => convert::decode_values(&property.syntax, raw)?,
                _ => AttributeValue::Null,
            };
            match (flatten, value) {
                (true, AttributeValue::List(list)) => values.extend(list),
                (true, AttributeValue::Null) => {}
                (_, value) => values.push(value),
            }
        }
        Ok(values)
    }

    /// The first row, if any entry matched.
    pub async fn first_row(self) -> DirectoryResult<Option<ProjectedRow>> {
        let projection = self.projection()?;
        let mut inner = self.inner;
        inner
            .pipeline
            .push(QueryOp::Terminal(TerminalOp::First { or_default: true }));
        let (map, options) = inner.prepare()?;
        match inner
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Entry(Some(attrs)) => {
                let descriptor = Arc::clone(map.descriptor());
                Ok(Some(row_for(&projection, &descriptor, &attrs)?))
            }
            CommandOutcome::Entry(None) => Ok(None),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }
}

fn row_for(
    projection: &Projection,
    descriptor: &ldq_core::map::ClassDescriptor,
    attrs: &DirectoryAttributes,
) -> DirectoryResult<ProjectedRow> {
    let member_value = |name: &str| -> Option<AttributeValue> {
        let property = descriptor.property(name).ok()?;
        let raw = attrs.get(&property.attribute)?;
        if raw.is_empty() {
            return None;
        }
        convert::decode_values(&property.syntax, raw).ok()
    };
    match projection {
        Projection::Aggregate(slots) => projection::project_row(slots, &member_value),
        Projection::Member(name) => {
            let value = member_value(name).unwrap_or(AttributeValue::Null);
            Ok(ProjectedRow::new(vec![(name.clone(), value)]))
        }
        Projection::Identity => Err(DirectoryError::translation(
            "identity projections materialise entities, not rows",
        )),
    }
}

/// Raw-bag terminals for a typed query that opted out of materialisation.
pub struct DynamicResults<'a, T: DirectoryEntity> {
    inner: DirectoryQuery<'a, T>,
}

impl<T: DirectoryEntity> DynamicResults<'_, T> {
    /// Execute and return raw attribute bags.
    pub async fn to_vec(self) -> DirectoryResult<Vec<DirectoryAttributes>> {
        let (_, options) = self.inner.prepare()?;
        self.inner.run_entries(options).await
    }
}

/// An untyped query rooted at an explicit naming context.
pub struct DynamicQuery<'a> {
    context: &'a DirectoryContext,
    pipeline: QueryPipeline,
}

impl<'a> DynamicQuery<'a> {
    pub(crate) fn new(context: &'a DirectoryContext, naming_context: impl Into<String>) -> Self {
        let mut pipeline = QueryPipeline::new();
        pipeline.push(QueryOp::NamingContext(naming_context.into()));
        Self { context, pipeline }
    }

    fn push(mut self, op: QueryOp) -> Self {
        self.pipeline.push(op);
        self
    }

    /// Restrict the result set; members are attribute names.
    pub fn filter(self, predicate: Expression) -> Self {
        self.push(QueryOp::Where(predicate))
    }

    /// Require an objectClass value.
    pub fn object_class(self, class: impl Into<String>) -> Self {
        let class = class.into();
        self.push(QueryOp::Where(prop("objectClass").eq(class)))
    }

    /// Require several objectClass values.
    pub fn object_classes<I, S>(self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        classes
            .into_iter()
            .fold(self, |query, class| query.object_class(class))
    }

    /// Require an objectCategory value.
    pub fn object_category(self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.push(QueryOp::Where(prop("objectCategory").eq(category)))
    }

    /// Override the search scope.
    pub fn scoped(self, scope: SearchScope) -> Self {
        self.push(QueryOp::Scope(scope))
    }

    /// Load only the named attributes.
    pub fn attributes<I, S>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = attributes.into_iter().map(Into::into).collect();
        self.push(QueryOp::LoadAttributes(list))
    }

    /// Sort ascending by an attribute.
    pub fn order_by(self, attribute: impl Into<String>) -> Self {
        self.push(QueryOp::OrderBy {
            property: attribute.into(),
            descending: false,
        })
    }

    /// Discard the first `n` entries.
    pub fn skip(self, n: usize) -> Self {
        self.push(QueryOp::Skip(n))
    }

    /// Return at most `n` entries.
    pub fn take(self, n: usize) -> Self {
        self.push(QueryOp::Take(n))
    }

    /// Request one explicit page.
    pub fn page(self, size: u32) -> Self {
        self.push(QueryOp::Page { size, cookie: None })
    }

    /// Attach a caller-supplied control.
    pub fn include_control(self, control: DirectoryControl) -> Self {
        self.push(QueryOp::IncludeControl(control))
    }

    /// Return partial results when the server size limit trips.
    pub fn within_size_limit(self) -> Self {
        self.push(QueryOp::WithinSizeLimit)
    }

    /// Suppress the implicit paged-results control.
    pub fn without_paging(self) -> Self {
        self.push(QueryOp::WithoutPaging)
    }

    fn options(&self) -> DirectoryResult<QueryCommandOptions> {
        let mut pipeline = self.pipeline.clone();
        pipeline.push(QueryOp::AsDynamic);
        translate(&pipeline, &TranslationContext::dynamic())
    }

    /// Execute and return the attribute bags.
    pub async fn to_vec(self) -> DirectoryResult<Vec<DirectoryAttributes>> {
        let options = self.options()?;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Entries(entries) => Ok(entries),
            CommandOutcome::Page { entries, .. } => Ok(entries),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    /// The first bag, if any.
    pub async fn first_or_default(mut self) -> DirectoryResult<Option<DirectoryAttributes>> {
        self.pipeline
            .push(QueryOp::Terminal(TerminalOp::First { or_default: true }));
        let options = self.options()?;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Entry(entry) => Ok(entry),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }

    /// The number of matching entries across all pages.
    pub async fn count(mut self) -> DirectoryResult<u64> {
        self.pipeline.push(QueryOp::Terminal(TerminalOp::Count));
        let options = self.options()?;
        match self
            .context
            .run_command(Command::from_query(options))
            .await?
        {
            CommandOutcome::Count(count) => Ok(count),
            outcome => Err(unexpected_outcome(outcome)),
        }
    }
}

fn unexpected_outcome(outcome: CommandOutcome) -> DirectoryError {
    DirectoryError::connection(format!(
        "command produced an unexpected outcome: {outcome:?}"
    ))
}
