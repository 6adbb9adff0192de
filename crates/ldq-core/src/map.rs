//! Class maps: binding host types to directory schema.
//!
//! A [`ClassMap`] describes how one host type lives in the directory: its
//! naming context, object classes, and one [`PropertyMap`] per mapped
//! property carrying the attribute name, declared syntax and an accessor
//! pair. Maps are built once through [`ClassMapBuilder`], validated, and
//! immutable afterwards.
//!
//! The query translator never sees the generic map; it works against the
//! non-generic [`ClassDescriptor`] view, which carries everything filter and
//! projection lowering need.

use std::collections::HashMap;
use std::sync::Arc;

use crate::attributes::DirectoryAttributes;
use crate::convert::{self, AttributeSyntax};
use crate::error::{DirectoryError, DirectoryResult};
use crate::tracking::Tracked;
use crate::value::{AttributeValue, RawValue};

/// Default attribute holding the entry DN.
pub const DEFAULT_DN_ATTRIBUTE: &str = "distinguishedName";

/// When a property must not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadOnly {
    /// Writable in every phase.
    #[default]
    Never,
    /// Excluded from add requests.
    OnAdd,
    /// Excluded from modification lists.
    OnUpdate,
    /// Never written.
    Always,
}

/// The write phase a value extraction is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// Building an add request.
    Add,
    /// Building a modification list.
    Update,
}

impl ReadOnly {
    fn excludes(self, phase: WritePhase) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::OnAdd => phase == WritePhase::Add,
            Self::OnUpdate => phase == WritePhase::Update,
        }
    }
}

/// The non-generic description of one mapped property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    /// Host property name.
    pub name: String,
    /// Directory attribute name.
    pub attribute: String,
    /// Declared syntax, selecting the converter.
    pub syntax: AttributeSyntax,
    /// Write-phase exclusion.
    pub read_only: ReadOnly,
    /// Whether this property holds the entry DN.
    pub is_distinguished_name: bool,
}

/// A resolved member reference: the attribute to query and its syntax.
#[derive(Debug, Clone)]
pub struct ResolvedAttribute {
    /// Directory attribute name.
    pub attribute: String,
    /// Declared syntax of the member.
    pub syntax: AttributeSyntax,
}

/// Resolves expression members to directory attributes.
///
/// The typed path resolves through a [`ClassDescriptor`]; the dynamic path
/// treats every member name as a text attribute.
pub trait AttributeResolver {
    /// Resolve a member name, failing with a mapping error when unmapped.
    fn resolve(&self, member: &str) -> DirectoryResult<ResolvedAttribute>;
}

/// Member names are attribute names; everything is text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicResolver;

impl AttributeResolver for DynamicResolver {
    fn resolve(&self, member: &str) -> DirectoryResult<ResolvedAttribute> {
        if member.trim().is_empty() {
            return Err(DirectoryError::mapping("blank attribute name"));
        }
        Ok(ResolvedAttribute {
            attribute: member.to_owned(),
            syntax: AttributeSyntax::Text,
        })
    }
}

/// Non-generic view of a class map, consumed by the query translator.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    /// Host type name, for diagnostics.
    pub type_name: String,
    /// DN suffix searches are rooted under when the caller names none.
    pub naming_context: Option<String>,
    /// Object classes of the mapped type, most general first.
    pub object_classes: Vec<String>,
    /// Whether the object classes gate every emitted filter.
    pub include_object_classes: bool,
    /// Optional objectCategory value.
    pub object_category: Option<String>,
    /// Whether the category gates every emitted filter.
    pub include_object_category: bool,
    /// Suppresses sub-type discrimination even when sub-maps exist.
    pub without_sub_type_mapping: bool,
    /// Whether a catch-all property absorbs unmapped attributes.
    pub has_catch_all: bool,
    /// Object classes of registered sub-type maps.
    pub sub_type_classes: Vec<String>,
    /// Mapped properties in registration order.
    pub properties: Vec<PropertyDescriptor>,
}

impl ClassDescriptor {
    /// Look up a mapped property by host name.
    pub fn property(&self, name: &str) -> DirectoryResult<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                DirectoryError::mapping(format!(
                    "property '{name}' is not mapped on type '{}'",
                    self.type_name
                ))
            })
    }

    /// The attribute carrying the DN, `distinguishedName` when unmapped.
    pub fn dn_attribute(&self) -> &str {
        self.properties
            .iter()
            .find(|p| p.is_distinguished_name)
            .map(|p| p.attribute.as_str())
            .unwrap_or(DEFAULT_DN_ATTRIBUTE)
    }

    /// Whether sub-type discrimination is active.
    pub fn has_sub_types(&self) -> bool {
        !self.without_sub_type_mapping && !self.sub_type_classes.is_empty()
    }

    /// The full property → attribute load list, in registration order.
    pub fn all_attributes(&self) -> Vec<(String, String)> {
        self.properties
            .iter()
            .map(|p| (p.name.clone(), p.attribute.clone()))
            .collect()
    }
}

impl AttributeResolver for ClassDescriptor {
    fn resolve(&self, member: &str) -> DirectoryResult<ResolvedAttribute> {
        let property = self.property(member)?;
        Ok(ResolvedAttribute {
            attribute: property.attribute.clone(),
            syntax: property.syntax.clone(),
        })
    }
}

/// Accessor pair for one mapped property.
pub struct PropertyAccessor<T> {
    /// Read the property; null when unset.
    pub get: fn(&T) -> AttributeValue,
    /// Write the property from a decoded value.
    pub set: fn(&mut T, AttributeValue) -> DirectoryResult<()>,
}

/// One mapped property: descriptor plus accessors. Built by callers,
/// consumed by [`ClassMapBuilder::property`].
pub struct PropertyMap<T> {
    descriptor: PropertyDescriptor,
    accessor: PropertyAccessor<T>,
}

impl<T> PropertyMap<T> {
    /// Map a host property onto a directory attribute.
    pub fn new(
        name: impl Into<String>,
        attribute: impl Into<String>,
        syntax: AttributeSyntax,
        get: fn(&T) -> AttributeValue,
        set: fn(&mut T, AttributeValue) -> DirectoryResult<()>,
    ) -> Self {
        Self {
            descriptor: PropertyDescriptor {
                name: name.into(),
                attribute: attribute.into(),
                syntax,
                read_only: ReadOnly::Never,
                is_distinguished_name: false,
            },
            accessor: PropertyAccessor { get, set },
        }
    }

    /// Restrict the phases this property is written in.
    pub fn read_only(mut self, read_only: ReadOnly) -> Self {
        self.descriptor.read_only = read_only;
        self
    }

    /// Mark this property as the DN holder. Implies string typing and
    /// excludes it from every write.
    pub fn distinguished_name(mut self) -> Self {
        self.descriptor.is_distinguished_name = true;
        self
    }
}

/// A sub-type mapping: entries carrying the object class materialise through
/// the given function instead of the base map.
pub struct SubTypeMap<T> {
    object_class: String,
    materialize: fn(&DirectoryAttributes) -> DirectoryResult<T>,
}

/// Immutable binding of a host type to directory schema.
pub struct ClassMap<T> {
    descriptor: Arc<ClassDescriptor>,
    new_instance: fn() -> T,
    accessors: Vec<PropertyAccessor<T>>,
    catch_all: Option<fn(&mut T, &DirectoryAttributes) -> DirectoryResult<()>>,
    sub_types: Vec<SubTypeMap<T>>,
}

impl<T> ClassMap<T> {
    /// Start building a map for `type_name`.
    pub fn builder(type_name: impl Into<String>, new_instance: fn() -> T) -> ClassMapBuilder<T> {
        ClassMapBuilder {
            type_name: type_name.into(),
            new_instance,
            naming_context: None,
            object_classes: Vec::new(),
            include_object_classes: true,
            object_category: None,
            include_object_category: true,
            without_sub_type_mapping: false,
            properties: Vec::new(),
            catch_all: None,
            sub_types: Vec::new(),
        }
    }

    /// The translator-facing view of this map.
    pub fn descriptor(&self) -> &Arc<ClassDescriptor> {
        &self.descriptor
    }

    /// Materialise an entity from a server entry.
    ///
    /// When sub-type maps are registered and the entry's `objectClass`
    /// values name one, that map's materialiser takes over.
    pub fn materialize(&self, attrs: &DirectoryAttributes) -> DirectoryResult<T> {
        if self.descriptor.has_sub_types() {
            if let Some(classes) = attrs.get("objectClass") {
                for sub in &self.sub_types {
                    let matched = classes.iter().any(|v| {
                        v.as_text()
                            .is_some_and(|c| c.eq_ignore_ascii_case(&sub.object_class))
                    });
                    if matched {
                        return (sub.materialize)(attrs);
                    }
                }
            }
        }

        let mut entity = (self.new_instance)();
        for (descriptor, accessor) in self.descriptor.properties.iter().zip(&self.accessors) {
            if descriptor.is_distinguished_name {
                (accessor.set)(&mut entity, AttributeValue::Dn(attrs.dn().to_owned()))?;
                continue;
            }
            let Some(values) = attrs.get(&descriptor.attribute) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let value = convert::decode_values(&descriptor.syntax, values).map_err(|e| {
                DirectoryError::mapping(format!(
                    "attribute '{}' on '{}': {e}",
                    descriptor.attribute, self.descriptor.type_name
                ))
            })?;
            (accessor.set)(&mut entity, value)?;
        }
        if let Some(catch_all) = self.catch_all {
            catch_all(&mut entity, attrs)?;
        }
        Ok(entity)
    }

    /// Materialise and snapshot, producing a change-tracked entry.
    pub fn materialize_tracked(
        &self,
        attrs: &DirectoryAttributes,
    ) -> DirectoryResult<Tracked<T>> {
        let entity = self.materialize(attrs)?;
        let snapshot: HashMap<String, Vec<RawValue>> = self
            .write_values(&entity, WritePhase::Update)?
            .into_iter()
            .map(|(name, values)| (name.to_ascii_lowercase(), values))
            .collect();
        Ok(Tracked::new(entity, attrs.dn(), snapshot))
    }

    /// Extract the writable attribute values of an entity for a phase.
    ///
    /// Null properties come back with an empty value set so the update diff
    /// can see deletions; the add path drops the empties.
    pub fn write_values(
        &self,
        entity: &T,
        phase: WritePhase,
    ) -> DirectoryResult<Vec<(String, Vec<RawValue>)>> {
        let mut out = Vec::new();
        for (descriptor, accessor) in self.descriptor.properties.iter().zip(&self.accessors) {
            if descriptor.is_distinguished_name || descriptor.read_only.excludes(phase) {
                continue;
            }
            let value = (accessor.get)(entity);
            let raw = convert::encode_values(&descriptor.syntax, &value).map_err(|e| {
                DirectoryError::mapping(format!(
                    "attribute '{}' on '{}': {e}",
                    descriptor.attribute, self.descriptor.type_name
                ))
            })?;
            out.push((descriptor.attribute.clone(), raw));
        }
        Ok(out)
    }

    /// Rebind mapped properties to different attribute names.
    ///
    /// Used when one type serves directories whose schemas disagree on
    /// attribute naming; the override replaces the declared name wholesale.
    pub fn with_attribute_overrides(
        mut self,
        overrides: &[(&str, &str)],
    ) -> DirectoryResult<ClassMap<T>> {
        let mut descriptor = (*self.descriptor).clone();
        for (property, attribute) in overrides {
            if attribute.trim().is_empty() {
                return Err(DirectoryError::mapping(format!(
                    "override for property '{property}' on '{}' has a blank attribute name",
                    descriptor.type_name
                )));
            }
            let target = descriptor
                .properties
                .iter_mut()
                .find(|p| p.name == *property)
                .ok_or_else(|| {
                    DirectoryError::mapping(format!(
                        "property '{property}' is not mapped on type '{}'",
                        descriptor.type_name
                    ))
                })?;
            target.attribute = (*attribute).to_owned();
        }
        self.descriptor = Arc::new(descriptor);
        Ok(self)
    }

    /// Read the entity's DN property, when one is mapped and set.
    pub fn dn_of(&self, entity: &T) -> Option<String> {
        for (descriptor, accessor) in self.descriptor.properties.iter().zip(&self.accessors) {
            if descriptor.is_distinguished_name {
                let value = (accessor.get)(entity);
                return value.as_str().map(str::to_owned);
            }
        }
        None
    }
}

/// Builder for [`ClassMap`]; validates on [`build`](Self::build).
pub struct ClassMapBuilder<T> {
    type_name: String,
    new_instance: fn() -> T,
    naming_context: Option<String>,
    object_classes: Vec<String>,
    include_object_classes: bool,
    object_category: Option<String>,
    include_object_category: bool,
    without_sub_type_mapping: bool,
    properties: Vec<PropertyMap<T>>,
    catch_all: Option<fn(&mut T, &DirectoryAttributes) -> DirectoryResult<()>>,
    sub_types: Vec<SubTypeMap<T>>,
}

impl<T> ClassMapBuilder<T> {
    /// Root searches for this type under the given DN.
    pub fn naming_context(mut self, dn: impl Into<String>) -> Self {
        self.naming_context = Some(dn.into());
        self
    }

    /// Add an object class.
    pub fn object_class(mut self, class: impl Into<String>) -> Self {
        self.object_classes.push(class.into());
        self
    }

    /// Control whether object classes gate emitted filters.
    pub fn include_object_classes(mut self, include: bool) -> Self {
        self.include_object_classes = include;
        self
    }

    /// Set the objectCategory.
    pub fn object_category(mut self, category: impl Into<String>) -> Self {
        self.object_category = Some(category.into());
        self
    }

    /// Control whether the category gates emitted filters.
    pub fn include_object_category(mut self, include: bool) -> Self {
        self.include_object_category = include;
        self
    }

    /// Suppress sub-type discrimination.
    pub fn without_sub_type_mapping(mut self) -> Self {
        self.without_sub_type_mapping = true;
        self
    }

    /// Add a mapped property.
    pub fn property(mut self, property: PropertyMap<T>) -> Self {
        self.properties.push(property);
        self
    }

    /// Route unmapped attributes into a catch-all property.
    pub fn catch_all(mut self, set: fn(&mut T, &DirectoryAttributes) -> DirectoryResult<()>) -> Self {
        self.catch_all = Some(set);
        self
    }

    /// Register a more specific materialiser for entries carrying the given
    /// object class.
    pub fn sub_type(
        mut self,
        object_class: impl Into<String>,
        materialize: fn(&DirectoryAttributes) -> DirectoryResult<T>,
    ) -> Self {
        self.sub_types.push(SubTypeMap {
            object_class: object_class.into(),
            materialize,
        });
        self
    }

    /// Validate and freeze the map.
    pub fn build(self) -> DirectoryResult<ClassMap<T>> {
        let mut dn_count = 0usize;
        for property in &self.properties {
            if property.descriptor.attribute.trim().is_empty() {
                return Err(DirectoryError::mapping(format!(
                    "property '{}' on '{}' has a blank attribute name",
                    property.descriptor.name, self.type_name
                )));
            }
            if property.descriptor.is_distinguished_name {
                dn_count += 1;
                let string_typed = matches!(
                    property.descriptor.syntax,
                    AttributeSyntax::Text | AttributeSyntax::Dn
                );
                if !string_typed {
                    return Err(DirectoryError::mapping(format!(
                        "distinguished-name property '{}' on '{}' must be string-typed",
                        property.descriptor.name, self.type_name
                    )));
                }
            }
        }
        if dn_count > 1 {
            return Err(DirectoryError::mapping(format!(
                "type '{}' maps more than one distinguished-name property",
                self.type_name
            )));
        }

        let (descriptors, accessors): (Vec<_>, Vec<_>) = self
            .properties
            .into_iter()
            .map(|p| (p.descriptor, p.accessor))
            .unzip();

        let descriptor = ClassDescriptor {
            type_name: self.type_name,
            naming_context: self.naming_context,
            object_classes: self.object_classes,
            include_object_classes: self.include_object_classes,
            object_category: self.object_category,
            include_object_category: self.include_object_category,
            without_sub_type_mapping: self.without_sub_type_mapping,
            has_catch_all: self.catch_all.is_some(),
            sub_type_classes: self.sub_types.iter().map(|s| s.object_class.clone()).collect(),
            properties: descriptors,
        };

        Ok(ClassMap {
            descriptor: Arc::new(descriptor),
            new_instance: self.new_instance,
            accessors,
            catch_all: self.catch_all,
            sub_types: self.sub_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::ReadOnly;

    #[derive(Debug, Default, PartialEq)]
    struct Person {
        dn: Option<String>,
        name: Option<String>,
        age: Option<i64>,
        badge: Option<String>,
    }

    fn person_map() -> ClassMap<Person> {
        ClassMap::builder("Person", Person::default)
            .naming_context("ou=people,dc=example,dc=com")
            .object_class("person")
            .property(
                PropertyMap::new(
                    "Dn",
                    "distinguishedName",
                    AttributeSyntax::Dn,
                    |p: &Person| AttributeValue::from(p.dn.clone()),
                    |p, v| {
                        p.dn = v.as_str().map(str::to_owned);
                        Ok(())
                    },
                )
                .distinguished_name(),
            )
            .property(PropertyMap::new(
                "Name",
                "cn",
                AttributeSyntax::Text,
                |p: &Person| AttributeValue::from(p.name.clone()),
                |p, v| {
                    p.name = v.as_str().map(str::to_owned);
                    Ok(())
                },
            ))
            .property(PropertyMap::new(
                "Age",
                "age",
                AttributeSyntax::Integer,
                |p: &Person| AttributeValue::from(p.age),
                |p, v| {
                    p.age = v.as_integer();
                    Ok(())
                },
            ))
            .property(
                PropertyMap::new(
                    "Badge",
                    "employeeID",
                    AttributeSyntax::Text,
                    |p: &Person| AttributeValue::from(p.badge.clone()),
                    |p, v| {
                        p.badge = v.as_str().map(str::to_owned);
                        Ok(())
                    },
                )
                .read_only(ReadOnly::OnUpdate),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_materialize_sets_mapped_properties() {
        let map = person_map();
        let mut attrs = DirectoryAttributes::new("cn=Ada,ou=people,dc=example,dc=com");
        attrs.set_string("cn", "Ada");
        attrs.set_string("age", "36");

        let person = map.materialize(&attrs).unwrap();
        assert_eq!(person.dn.as_deref(), Some("cn=Ada,ou=people,dc=example,dc=com"));
        assert_eq!(person.name.as_deref(), Some("Ada"));
        assert_eq!(person.age, Some(36));
        assert_eq!(person.badge, None);
    }

    #[test]
    fn test_write_values_honours_phase_exclusions() {
        let map = person_map();
        let person = Person {
            dn: Some("cn=Ada,ou=people,dc=example,dc=com".into()),
            name: Some("Ada".into()),
            age: Some(36),
            badge: Some("B-1".into()),
        };

        let add = map.write_values(&person, WritePhase::Add).unwrap();
        assert!(add.iter().any(|(a, _)| a == "employeeID"));
        assert!(!add.iter().any(|(a, _)| a == "distinguishedName"));

        let update = map.write_values(&person, WritePhase::Update).unwrap();
        assert!(!update.iter().any(|(a, _)| a == "employeeID"));
    }

    #[test]
    fn test_tracked_diff_is_minimal() {
        let map = person_map();
        let mut attrs = DirectoryAttributes::new("cn=Ada,ou=people,dc=example,dc=com");
        attrs.set_string("cn", "Ada");
        attrs.set_string("age", "36");

        let mut entry = map.materialize_tracked(&attrs).unwrap();
        entry.age = Some(37);

        let changes = entry.changes(&map).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].attribute(), "age");
    }

    #[test]
    fn test_builder_rejects_blank_attribute() {
        let result = ClassMap::builder("Person", Person::default)
            .property(PropertyMap::new(
                "Name",
                "  ",
                AttributeSyntax::Text,
                |p: &Person| AttributeValue::from(p.name.clone()),
                |p, v| {
                    p.name = v.as_str().map(str::to_owned);
                    Ok(())
                },
            ))
            .build();
        assert!(matches!(result, Err(DirectoryError::Mapping { .. })));
    }

    #[test]
    fn test_sub_type_dispatch() {
        fn contractor(attrs: &DirectoryAttributes) -> DirectoryResult<Person> {
            Ok(Person {
                dn: Some(attrs.dn().to_owned()),
                name: attrs.get_string("cn").map(str::to_owned),
                age: None,
                badge: Some("contractor".into()),
            })
        }

        let map = ClassMap::builder("Person", Person::default)
            .object_class("person")
            .property(PropertyMap::new(
                "Name",
                "cn",
                AttributeSyntax::Text,
                |p: &Person| AttributeValue::from(p.name.clone()),
                |p, v| {
                    p.name = v.as_str().map(str::to_owned);
                    Ok(())
                },
            ))
            .sub_type("contractor", contractor)
            .build()
            .unwrap();

        let mut attrs = DirectoryAttributes::new("cn=Bob,dc=example,dc=com");
        attrs.set(
            "objectClass",
            vec![
                RawValue::Text("person".into()),
                RawValue::Text("contractor".into()),
            ],
        );
        attrs.set_string("cn", "Bob");

        let person = map.materialize(&attrs).unwrap();
        assert_eq!(person.badge.as_deref(), Some("contractor"));
    }
}
