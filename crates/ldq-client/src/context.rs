//! The directory context: the engine's public API surface.
//!
//! A context owns its configuration, a connection factory and a mapping
//! registry. The factory's connection is scoped to the context: opened
//! lazily on the first command, reused by every command after it, and
//! released when the context is disposed. Read operations go through the
//! query builders; write operations diff change-tracked entries into
//! minimal modification lists and run the lifecycle listeners around every
//! wire call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use ldq_core::attributes::DirectoryAttributes;
use ldq_core::error::{DirectoryError, DirectoryResult};
use ldq_core::map::WritePhase;
use ldq_core::registry::DirectoryEntity;
use ldq_core::registry::DirectoryMapper;
use ldq_core::tracking::{ModificationOp, Tracked};
use ldq_core::value::RawValue;
use ldq_query::escape::escape_dn_value;
use ldq_query::options::DirectoryControl;

use crate::commands::{Command, CommandOutcome, ExecutionEnv};
use crate::config::DirectoryConfig;
use crate::connection::{
    AddRequest, ConnectionFactory, DeleteRequest, DirectoryRequest, DirectoryResponse,
    LdapConnectionFactory, ModifyDnRequest, ModifyRequest,
};
use crate::listener::DirectoryEventListener;
use crate::query::{DirectoryQuery, DynamicQuery};
use crate::range::RangeValue;

/// The engine's entry point.
pub struct DirectoryContext {
    config: DirectoryConfig,
    factory: Arc<dyn ConnectionFactory>,
    mapper: Arc<DirectoryMapper>,
    listeners: Vec<Arc<dyn DirectoryEventListener>>,
    in_flight: Arc<AtomicUsize>,
}

impl DirectoryContext {
    /// A context connecting with the given configuration.
    pub fn new(config: DirectoryConfig) -> Self {
        let factory = Arc::new(LdapConnectionFactory::new(config.clone()));
        Self::with_factory(config, factory)
    }

    /// A context using a caller-supplied connection factory.
    pub fn with_factory(config: DirectoryConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            mapper: Arc::new(DirectoryMapper::new()),
            listeners: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the mapping registry handle.
    pub fn with_mapper(mut self, mapper: Arc<DirectoryMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Register a lifecycle listener.
    pub fn with_listener(mut self, listener: Arc<dyn DirectoryEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// The context's mapping registry.
    pub fn mapper(&self) -> &Arc<DirectoryMapper> {
        &self.mapper
    }

    /// The context's configuration.
    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Tear the context down, releasing the factory's cached connection.
    ///
    /// Fails `disposed_in_use` while a request is in flight. A context
    /// dropped without an explicit dispose releases its connection on a
    /// best-effort basis.
    pub async fn dispose(self) -> DirectoryResult<()> {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return Err(DirectoryError::DisposedInUse);
        }
        self.factory.shutdown().await;
        Ok(())
    }

    pub(crate) fn env(&self) -> ExecutionEnv {
        ExecutionEnv {
            default_naming_context: self.config.naming_context.clone(),
            default_scope: self.config.scope,
            max_page_size: self.config.max_page_size,
            paging_enabled: self.config.paging_enabled,
        }
    }

    pub(crate) async fn run_command(&self, command: Command) -> DirectoryResult<CommandOutcome> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.run_command_inner(command).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn run_command_inner(&self, command: Command) -> DirectoryResult<CommandOutcome> {
        let mut connection = self.factory.open().await?;
        let result = command.execute(connection.as_mut(), &self.env()).await;
        self.factory.release(connection).await;
        result
    }

    // ---- reads -----------------------------------------------------------

    /// Start a typed query.
    pub fn query<T: DirectoryEntity>(&self) -> DirectoryQuery<'_, T> {
        DirectoryQuery::new(self)
    }

    /// Start an untyped query rooted under `naming_context`.
    pub fn dynamic_query(&self, naming_context: impl Into<String>) -> DynamicQuery<'_> {
        DynamicQuery::new(self, naming_context)
    }

    /// Read one entry by DN and materialise it, change-tracked.
    pub async fn get_by_dn<T: DirectoryEntity>(&self, dn: &str) -> DirectoryResult<Tracked<T>> {
        require_dn(dn)?;
        let map = self.mapper.get_or_register::<T>()?;
        let descriptor = map.descriptor();
        let mut attributes: Vec<String> = descriptor
            .all_attributes()
            .into_iter()
            .map(|(_, attribute)| attribute)
            .collect();
        if descriptor.has_sub_types() && !descriptor.has_catch_all {
            attributes.push("objectClass".to_owned());
        }
        let outcome = self
            .run_command(Command::GetByDn {
                dn: dn.to_owned(),
                attributes,
            })
            .await?;
        match outcome {
            CommandOutcome::Entry(Some(attrs)) => map.materialize_tracked(&attrs),
            CommandOutcome::Entry(None) => Err(DirectoryError::NoResult {
                filter: format!("base {dn}"),
            }),
            outcome => Err(unexpected(outcome)),
        }
    }

    /// Read one entry by DN as a raw attribute bag.
    pub async fn get_attributes_by_dn(
        &self,
        dn: &str,
        attributes: &[&str],
    ) -> DirectoryResult<DirectoryAttributes> {
        require_dn(dn)?;
        let outcome = self
            .run_command(Command::GetByDn {
                dn: dn.to_owned(),
                attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
            })
            .await?;
        match outcome {
            CommandOutcome::Entry(Some(attrs)) => Ok(attrs),
            CommandOutcome::Entry(None) => Err(DirectoryError::NoResult {
                filter: format!("base {dn}"),
            }),
            outcome => Err(unexpected(outcome)),
        }
    }

    /// Read the rootDSE.
    pub async fn list_server_attributes(
        &self,
        attributes: &[&str],
    ) -> DirectoryResult<DirectoryAttributes> {
        let outcome = self
            .run_command(Command::GetByDn {
                dn: String::new(),
                attributes: attributes.iter().map(|a| (*a).to_owned()).collect(),
            })
            .await?;
        match outcome {
            CommandOutcome::Entry(Some(attrs)) => Ok(attrs),
            CommandOutcome::Entry(None) => Err(DirectoryError::NoResult {
                filter: "rootDSE".to_owned(),
            }),
            outcome => Err(unexpected(outcome)),
        }
    }

    /// Fetch all values of a very large multi-valued attribute.
    pub async fn retrieve_ranges<V: RangeValue>(
        &self,
        dn: &str,
        attribute: &str,
        start: u32,
    ) -> DirectoryResult<Vec<V>> {
        let outcome = self
            .run_command(Command::RangeRetrieval {
                dn: dn.to_owned(),
                attribute: attribute.to_owned(),
                start,
            })
            .await?;
        match outcome {
            CommandOutcome::Values(values) => values.iter().map(V::from_raw).collect(),
            outcome => Err(unexpected(outcome)),
        }
    }

    /// Send a raw request, bypassing translation and materialisation.
    pub async fn send_request(
        &self,
        request: DirectoryRequest,
    ) -> DirectoryResult<DirectoryResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = async {
            let mut connection = self.factory.open().await?;
            let response = connection.send(request).await;
            self.factory.release(connection).await;
            response
        }
        .await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    // ---- writes ----------------------------------------------------------

    /// Create an entry from a mapped entity. The entity's DN property must
    /// be set; the mapping's object classes are added automatically.
    pub async fn add<T: DirectoryEntity>(&self, entity: &T) -> DirectoryResult<()> {
        self.add_with_controls(entity, Vec::new()).await
    }

    /// [`add`](Self::add) with request controls.
    pub async fn add_with_controls<T: DirectoryEntity>(
        &self,
        entity: &T,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        let map = self.mapper.get_or_register::<T>()?;
        let dn = map.dn_of(entity).ok_or_else(|| {
            DirectoryError::invalid_argument("entity has no distinguished name set")
        })?;
        require_dn(&dn)?;

        let mut attributes: Vec<(String, Vec<RawValue>)> = map
            .write_values(entity, WritePhase::Add)?
            .into_iter()
            .filter(|(_, values)| !values.is_empty())
            .collect();
        let classes = &map.descriptor().object_classes;
        if !classes.is_empty() {
            attributes.insert(
                0,
                (
                    "objectClass".to_owned(),
                    classes.iter().cloned().map(RawValue::Text).collect(),
                ),
            );
        }

        for listener in &self.listeners {
            listener.before_add(&dn, &attributes).await?;
        }
        self.run_command(Command::Add {
            request: AddRequest {
                dn: dn.clone(),
                attributes,
                controls,
            },
        })
        .await?;
        for listener in &self.listeners {
            listener.after_add(&dn).await?;
        }
        Ok(())
    }

    /// Create an entry and read it back, change-tracked.
    pub async fn add_and_get<T: DirectoryEntity>(&self, entity: &T) -> DirectoryResult<Tracked<T>> {
        self.add(entity).await?;
        let map = self.mapper.get_or_register::<T>()?;
        let dn = map
            .dn_of(entity)
            .ok_or_else(|| DirectoryError::invalid_argument("entity has no distinguished name"))?;
        self.get_by_dn(&dn).await
    }

    /// Create an entry from a raw attribute bag.
    pub async fn add_entry(
        &self,
        entry: &DirectoryAttributes,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        require_dn(entry.dn())?;
        let attributes: Vec<(String, Vec<RawValue>)> = entry
            .entries()
            .iter()
            .filter(|e| !e.values.is_empty())
            .map(|e| (e.name.clone(), e.values.clone()))
            .collect();
        let dn = entry.dn().to_owned();
        for listener in &self.listeners {
            listener.before_add(&dn, &attributes).await?;
        }
        self.run_command(Command::Add {
            request: AddRequest {
                dn: dn.clone(),
                attributes,
                controls,
            },
        })
        .await?;
        for listener in &self.listeners {
            listener.after_add(&dn).await?;
        }
        Ok(())
    }

    /// Write a change-tracked entity's modifications back.
    ///
    /// A no-op when nothing changed. Fails `untracked_update` when the entry
    /// carries no snapshot.
    pub async fn update<T: DirectoryEntity>(&self, entry: &mut Tracked<T>) -> DirectoryResult<()> {
        self.update_with_controls(entry, Vec::new()).await
    }

    /// [`update`](Self::update) with request controls.
    pub async fn update_with_controls<T: DirectoryEntity>(
        &self,
        entry: &mut Tracked<T>,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        let map = self.mapper.get_or_register::<T>()?;
        let operations = entry.changes(&map)?;
        if operations.is_empty() {
            debug!(dn = %entry.dn(), "update skipped, no modifications");
            return Ok(());
        }
        let dn = entry.dn().to_owned();
        for listener in &self.listeners {
            listener.before_update(&dn, &operations).await?;
        }
        self.run_command(Command::Modify {
            request: ModifyRequest {
                dn: dn.clone(),
                operations,
                controls,
            },
        })
        .await?;
        entry.commit_changes(&map)?;
        for listener in &self.listeners {
            listener.after_update(&dn).await?;
        }
        Ok(())
    }

    /// Update an entity and read the resulting entry back.
    pub async fn update_and_get<T: DirectoryEntity>(
        &self,
        entry: &mut Tracked<T>,
    ) -> DirectoryResult<Tracked<T>> {
        self.update(entry).await?;
        self.get_by_dn(entry.dn()).await
    }

    /// Write a tracked attribute bag's modifications back.
    pub async fn update_entry(
        &self,
        entry: &mut DirectoryAttributes,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        let operations = entry.changes()?;
        if operations.is_empty() {
            return Ok(());
        }
        let dn = entry.dn().to_owned();
        for listener in &self.listeners {
            listener.before_update(&dn, &operations).await?;
        }
        self.run_command(Command::Modify {
            request: ModifyRequest {
                dn: dn.clone(),
                operations,
                controls,
            },
        })
        .await?;
        entry.commit_changes();
        for listener in &self.listeners {
            listener.after_update(&dn).await?;
        }
        Ok(())
    }

    /// Delete an entry.
    pub async fn delete(&self, dn: &str, controls: Vec<DirectoryControl>) -> DirectoryResult<()> {
        require_dn(dn)?;
        for listener in &self.listeners {
            listener.before_delete(dn).await?;
        }
        self.run_command(Command::Delete {
            request: DeleteRequest {
                dn: dn.to_owned(),
                controls,
            },
        })
        .await?;
        for listener in &self.listeners {
            listener.after_delete(dn).await?;
        }
        Ok(())
    }

    /// Add one value to an attribute of an entry.
    pub async fn add_attribute(
        &self,
        dn: &str,
        attribute: &str,
        value: RawValue,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        require_dn(dn)?;
        self.run_command(Command::Modify {
            request: ModifyRequest {
                dn: dn.to_owned(),
                operations: vec![ModificationOp::Add {
                    attribute: attribute.to_owned(),
                    values: vec![value],
                }],
                controls,
            },
        })
        .await?;
        Ok(())
    }

    /// Delete one value of an attribute, or the whole attribute when no
    /// value is given.
    pub async fn delete_attribute(
        &self,
        dn: &str,
        attribute: &str,
        value: Option<RawValue>,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<()> {
        require_dn(dn)?;
        self.run_command(Command::Modify {
            request: ModifyRequest {
                dn: dn.to_owned(),
                operations: vec![ModificationOp::Delete {
                    attribute: attribute.to_owned(),
                    values: value.into_iter().collect(),
                }],
                controls,
            },
        })
        .await?;
        Ok(())
    }

    /// Move an entry under a new parent, keeping its RDN. Returns the new
    /// DN.
    pub async fn move_entry(
        &self,
        current_dn: &str,
        new_naming_context: &str,
        delete_old_rdn: Option<bool>,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<String> {
        require_dn(current_dn)?;
        require_dn(new_naming_context)?;
        let (rdn, _) = split_first_rdn(current_dn)?;
        self.run_command(Command::ModifyDn {
            request: ModifyDnRequest {
                dn: current_dn.to_owned(),
                new_rdn: rdn.clone(),
                delete_old_rdn: delete_old_rdn.unwrap_or(true),
                new_parent: Some(new_naming_context.to_owned()),
                controls,
            },
        })
        .await?;
        Ok(format!("{rdn},{new_naming_context}"))
    }

    /// Rename an entry in place. Returns the new DN.
    pub async fn rename_entry(
        &self,
        current_dn: &str,
        new_name: &str,
        delete_old_rdn: Option<bool>,
        controls: Vec<DirectoryControl>,
    ) -> DirectoryResult<String> {
        require_dn(current_dn)?;
        if new_name.trim().is_empty() {
            return Err(DirectoryError::invalid_argument("blank entry name"));
        }
        let (rdn, parent) = split_first_rdn(current_dn)?;
        let attribute = rdn_attribute_type(&rdn)?;
        let new_rdn = format!("{attribute}={}", escape_dn_value(new_name));
        self.run_command(Command::ModifyDn {
            request: ModifyDnRequest {
                dn: current_dn.to_owned(),
                new_rdn: new_rdn.clone(),
                delete_old_rdn: delete_old_rdn.unwrap_or(true),
                new_parent: None,
                controls,
            },
        })
        .await?;
        Ok(match parent {
            Some(parent) => format!("{new_rdn},{parent}"),
            None => new_rdn,
        })
    }
}

fn require_dn(dn: &str) -> DirectoryResult<()> {
    if dn.trim().is_empty() {
        return Err(DirectoryError::invalid_argument("blank distinguished name"));
    }
    Ok(())
}

/// Split a DN into its first RDN and the remainder, honouring escapes.
fn split_first_rdn(dn: &str) -> DirectoryResult<(String, Option<String>)> {
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' => {
                let rdn = dn[..i].trim();
                let parent = dn[i + 1..].trim();
                if rdn.is_empty() || parent.is_empty() {
                    return Err(DirectoryError::invalid_argument(format!(
                        "malformed distinguished name '{dn}'"
                    )));
                }
                return Ok((rdn.to_owned(), Some(parent.to_owned())));
            }
            _ => {}
        }
    }
    Ok((dn.trim().to_owned(), None))
}

/// The attribute type of an RDN (`cn` in `cn=x`).
fn rdn_attribute_type(rdn: &str) -> DirectoryResult<String> {
    rdn.split_once('=')
        .map(|(attribute, _)| attribute.trim().to_owned())
        .filter(|attribute| !attribute.is_empty())
        .ok_or_else(|| DirectoryError::invalid_argument(format!("malformed RDN '{rdn}'")))
}

fn unexpected(outcome: CommandOutcome) -> DirectoryError {
    DirectoryError::connection(format!(
        "command produced an unexpected outcome: {outcome:?}"
    ))
}
