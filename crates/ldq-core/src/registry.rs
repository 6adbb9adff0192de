//! Mapping registries.
//!
//! A [`DirectoryMapper`] holds the class maps for a set of types, keyed by
//! type identity. Registration is write-once per type; lookups are cheap
//! shared reads. [`MapperRegistry`] keeps named mappers (default key `""`)
//! and lets a whole mapper be swapped atomically.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{DirectoryError, DirectoryResult};
use crate::map::ClassMap;

/// A type that can describe its own class map.
pub trait DirectoryEntity: Send + Sync + Sized + 'static {
    /// Build the class map binding this type to directory schema.
    fn class_map() -> DirectoryResult<ClassMap<Self>>;

    /// The host type name used in mapping diagnostics.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Class maps for a set of types, keyed by type identity.
#[derive(Default)]
pub struct DirectoryMapper {
    maps: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl DirectoryMapper {
    /// Create an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class map for `T`.
    ///
    /// Fails with `already_mapped` when `T` is registered; a map, once
    /// published, never changes.
    pub fn register<T: Send + Sync + 'static>(&self, map: ClassMap<T>) -> DirectoryResult<()> {
        let mut maps = self.maps.write().expect("mapper lock poisoned");
        let type_id = TypeId::of::<T>();
        if maps.contains_key(&type_id) {
            return Err(DirectoryError::AlreadyMapped {
                type_name: map.descriptor().type_name.clone(),
            });
        }
        tracing::debug!(type_name = %map.descriptor().type_name, "registering class map");
        maps.insert(type_id, Arc::new(Arc::new(map)));
        Ok(())
    }

    /// Look up the map for `T`, registering it through [`DirectoryEntity`]
    /// on first use.
    pub fn get_or_register<T: DirectoryEntity>(&self) -> DirectoryResult<Arc<ClassMap<T>>> {
        if let Some(map) = self.get::<T>() {
            return Ok(map);
        }
        let map = T::class_map()?;
        // Another thread may have won the race; that registration stands.
        match self.register(map) {
            Ok(()) | Err(DirectoryError::AlreadyMapped { .. }) => {}
            Err(e) => return Err(e),
        }
        self.get::<T>().ok_or_else(|| {
            DirectoryError::mapping(format!("type '{}' failed to register", T::type_name()))
        })
    }

    /// Register `T` with attribute-name overrides replacing the declared
    /// names.
    pub fn register_with_overrides<T: DirectoryEntity>(
        &self,
        overrides: &[(&str, &str)],
    ) -> DirectoryResult<()> {
        let map = T::class_map()?.with_attribute_overrides(overrides)?;
        self.register(map)
    }

    /// Look up the map for `T`, if registered.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<ClassMap<T>>> {
        let maps = self.maps.read().expect("mapper lock poisoned");
        maps.get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Arc<ClassMap<T>>>())
            .cloned()
    }

    /// Look up the map for `T`, failing with a mapping error when absent.
    pub fn require<T: Send + Sync + 'static>(&self) -> DirectoryResult<Arc<ClassMap<T>>> {
        self.get::<T>().ok_or_else(|| {
            DirectoryError::mapping(format!(
                "type '{}' has no registered class map",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.maps.read().expect("mapper lock poisoned").len()
    }

    /// Whether no types are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named mappers with atomic replacement.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: RwLock<HashMap<String, Arc<DirectoryMapper>>>,
}

/// The key of the default mapper.
pub const DEFAULT_MAPPER: &str = "";

impl MapperRegistry {
    /// Create a registry holding only an empty default mapper.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::default();
        registry
            .mappers
            .write()
            .expect("registry lock poisoned")
            .insert(DEFAULT_MAPPER.to_owned(), Arc::new(DirectoryMapper::new()));
        registry
    }

    /// The mapper registered under `key`, creating an empty one on first
    /// use.
    pub fn mapper(&self, key: &str) -> Arc<DirectoryMapper> {
        if let Some(mapper) = self
            .mappers
            .read()
            .expect("registry lock poisoned")
            .get(key)
        {
            return Arc::clone(mapper);
        }
        let mut mappers = self.mappers.write().expect("registry lock poisoned");
        Arc::clone(
            mappers
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(DirectoryMapper::new())),
        )
    }

    /// The default mapper.
    pub fn default_mapper(&self) -> Arc<DirectoryMapper> {
        self.mapper(DEFAULT_MAPPER)
    }

    /// Atomically replace the mapper registered under `key`.
    ///
    /// Readers holding the previous mapper keep using it; new lookups see
    /// the replacement.
    pub fn change_mapper(&self, key: &str, mapper: Arc<DirectoryMapper>) {
        self.mappers
            .write()
            .expect("registry lock poisoned")
            .insert(key.to_owned(), mapper);
    }
}
