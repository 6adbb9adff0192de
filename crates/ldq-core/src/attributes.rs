//! Untyped directory entries.
//!
//! [`DirectoryAttributes`] is the attribute bag used when no mapped type is
//! in play: dynamic queries, rootDSE reads, and the raw add/update entry
//! points all speak it. Attribute names compare case-insensitively and keep
//! the case the server (or caller) used. Ranged attribute names
//! (`member;range=0-1499`) are stored verbatim.

use std::collections::HashMap;

use crate::error::{DirectoryError, DirectoryResult};
use crate::tracking::{diff_values, ModificationOp};
use crate::value::RawValue;

/// One named attribute with its values, in server order.
#[derive(Debug, Clone)]
pub struct AttributeEntry {
    /// The attribute name as delivered, range suffix included.
    pub name: String,
    /// The attribute values.
    pub values: Vec<RawValue>,
}

/// A case-insensitive, order-preserving attribute bag for one entry.
#[derive(Debug, Clone, Default)]
pub struct DirectoryAttributes {
    dn: String,
    entries: Vec<AttributeEntry>,
    index: HashMap<String, usize>,
    original: Option<HashMap<String, Vec<RawValue>>>,
}

impl DirectoryAttributes {
    /// Create an empty bag for the given distinguished name.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// The entry's distinguished name.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Replace the distinguished name.
    pub fn set_dn(&mut self, dn: impl Into<String>) {
        self.dn = dn.into();
    }

    /// Attribute names in insertion order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of attributes present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag holds no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All attributes in insertion order.
    pub fn entries(&self) -> &[AttributeEntry] {
        &self.entries
    }

    /// Values of an attribute, matched case-insensitively on the exact name.
    pub fn get(&self, name: &str) -> Option<&[RawValue]> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&i| self.entries[i].values.as_slice())
    }

    /// First value of an attribute as text.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name)?.first()?.as_text()
    }

    /// All values of an attribute as text, skipping non-UTF-8 values.
    pub fn get_strings(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .into_iter()
            .flatten()
            .filter_map(RawValue::as_text)
            .collect()
    }

    /// First value of an attribute as bytes.
    pub fn get_binary(&self, name: &str) -> Option<&[u8]> {
        self.get(name)?.first().map(RawValue::as_bytes)
    }

    /// Find an attribute by its base name, tolerating a range suffix.
    ///
    /// Returns the stored (possibly ranged) name together with the values.
    pub fn get_ranged(&self, base_name: &str) -> Option<(&str, &[RawValue])> {
        if let Some(&i) = self.index.get(&base_name.to_ascii_lowercase()) {
            let entry = &self.entries[i];
            return Some((entry.name.as_str(), entry.values.as_slice()));
        }
        let prefix = format!("{};range=", base_name.to_ascii_lowercase());
        self.index
            .iter()
            .find(|(key, _)| key.starts_with(&prefix))
            .map(|(_, &i)| {
                let entry = &self.entries[i];
                (entry.name.as_str(), entry.values.as_slice())
            })
    }

    /// Set (or replace) an attribute's values.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<RawValue>) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].values = values,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push(AttributeEntry { name, values });
            }
        }
    }

    /// Set an attribute to a single text value.
    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, vec![RawValue::Text(value.into())]);
    }

    /// Remove an attribute's values, leaving a deletion marker for the diff.
    pub fn clear(&mut self, name: &str) {
        let key = name.to_ascii_lowercase();
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].values.clear();
        } else {
            self.set(name.to_owned(), Vec::new());
        }
    }

    /// Take a snapshot of the current values as the change-tracking
    /// baseline. Called when the bag is materialised from a server response.
    pub fn enable_tracking(&mut self) {
        self.original = Some(self.snapshot());
    }

    /// Whether the bag carries an original-value snapshot.
    pub fn is_tracked(&self) -> bool {
        self.original.is_some()
    }

    /// Compute the minimal modification list against the snapshot.
    ///
    /// Fails with an untracked-update error when no snapshot was taken.
    pub fn changes(&self) -> DirectoryResult<Vec<ModificationOp>> {
        let original = self.original.as_ref().ok_or(DirectoryError::UntrackedUpdate {
            dn: self.dn.clone(),
        })?;
        let current: Vec<(String, Vec<RawValue>)> = self
            .entries
            .iter()
            .map(|e| (e.name.clone(), e.values.clone()))
            .collect();
        Ok(diff_values(original, &current))
    }

    /// Refresh the snapshot after a successful update.
    pub fn commit_changes(&mut self) {
        if self.original.is_some() {
            self.original = Some(self.snapshot());
        }
    }

    fn snapshot(&self) -> HashMap<String, Vec<RawValue>> {
        self.entries
            .iter()
            .map(|e| (e.name.to_ascii_lowercase(), e.values.clone()))
            .collect()
    }
}
