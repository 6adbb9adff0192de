//! Change tracking for materialised entries.
//!
//! Entries keep a snapshot of their original attribute values taken at
//! materialisation time. On update the snapshot is diffed against the
//! current state to produce the smallest modification list the server needs
//! to see: multi-valued attributes diff as sets so replication ships the
//! added and removed values, not the whole list.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use crate::error::{DirectoryError, DirectoryResult};
use crate::map::{ClassMap, WritePhase};
use crate::value::RawValue;

/// One attribute modification to send to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModificationOp {
    /// Add the given values to an attribute.
    Add {
        attribute: String,
        values: Vec<RawValue>,
    },
    /// Delete the given values; an empty set deletes the whole attribute.
    Delete {
        attribute: String,
        values: Vec<RawValue>,
    },
    /// Replace all values of an attribute.
    Replace {
        attribute: String,
        values: Vec<RawValue>,
    },
}

impl ModificationOp {
    /// The attribute this operation touches.
    pub fn attribute(&self) -> &str {
        match self {
            Self::Add { attribute, .. }
            | Self::Delete { attribute, .. }
            | Self::Replace { attribute, .. } => attribute,
        }
    }
}

/// Diff current attribute state against an original snapshot.
///
/// `original` is keyed by lowercased attribute name; `current` carries the
/// names to emit. Attributes absent from `current` are untouched - deletion
/// is expressed by an empty current value set.
pub fn diff_values(
    original: &HashMap<String, Vec<RawValue>>,
    current: &[(String, Vec<RawValue>)],
) -> Vec<ModificationOp> {
    let mut ops = Vec::new();
    for (attribute, values) in current {
        let before = original
            .get(&attribute.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match (before.is_empty(), values.is_empty()) {
            (true, true) => {}
            (true, false) => ops.push(ModificationOp::Add {
                attribute: attribute.clone(),
                values: values.clone(),
            }),
            (false, true) => ops.push(ModificationOp::Delete {
                attribute: attribute.clone(),
                values: Vec::new(),
            }),
            (false, false) => {
                if before.len() <= 1 && values.len() <= 1 {
                    if before != values.as_slice() {
                        ops.push(ModificationOp::Replace {
                            attribute: attribute.clone(),
                            values: values.clone(),
                        });
                    }
                } else {
                    let before_set: HashSet<&RawValue> = before.iter().collect();
                    let after_set: HashSet<&RawValue> = values.iter().collect();
                    let added: Vec<RawValue> = values
                        .iter()
                        .filter(|v| !before_set.contains(*v))
                        .cloned()
                        .collect();
                    let removed: Vec<RawValue> = before
                        .iter()
                        .filter(|v| !after_set.contains(*v))
                        .cloned()
                        .collect();
                    if !added.is_empty() {
                        ops.push(ModificationOp::Add {
                            attribute: attribute.clone(),
                            values: added,
                        });
                    }
                    if !removed.is_empty() {
                        ops.push(ModificationOp::Delete {
                            attribute: attribute.clone(),
                            values: removed,
                        });
                    }
                }
            }
        }
    }
    ops
}

/// A materialised entity together with its change-tracking state.
///
/// Dereferences to the entity so callers mutate fields directly; the
/// snapshot stays behind for the diff.
#[derive(Debug)]
pub struct Tracked<T> {
    entity: T,
    dn: String,
    original: Option<HashMap<String, Vec<RawValue>>>,
}

impl<T> Tracked<T> {
    /// Wrap a freshly materialised entity with its original-value snapshot.
    pub fn new(entity: T, dn: impl Into<String>, original: HashMap<String, Vec<RawValue>>) -> Self {
        Self {
            entity,
            dn: dn.into(),
            original: Some(original),
        }
    }

    /// Wrap an entity without tracking (the `as_no_tracking` path).
    pub fn untracked(entity: T, dn: impl Into<String>) -> Self {
        Self {
            entity,
            dn: dn.into(),
            original: None,
        }
    }

    /// The entry's distinguished name.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Whether an original-value snapshot is present.
    pub fn is_tracked(&self) -> bool {
        self.original.is_some()
    }

    /// Unwrap into the bare entity.
    pub fn into_inner(self) -> T {
        self.entity
    }

    /// Compute the modification list for this entry.
    ///
    /// Read-only-on-update and distinguished-name properties never appear.
    /// Fails with an untracked-update error when no snapshot exists.
    pub fn changes(&self, map: &ClassMap<T>) -> DirectoryResult<Vec<ModificationOp>> {
        let original = self.original.as_ref().ok_or(DirectoryError::UntrackedUpdate {
            dn: self.dn.clone(),
        })?;
        let current = map.write_values(&self.entity, WritePhase::Update)?;
        Ok(diff_values(original, &current))
    }

    /// Refresh the snapshot after a successful update.
    pub fn commit_changes(&mut self, map: &ClassMap<T>) -> DirectoryResult<()> {
        if self.original.is_some() {
            let current = map.write_values(&self.entity, WritePhase::Update)?;
            self.original = Some(
                current
                    .into_iter()
                    .map(|(name, values)| (name.to_ascii_lowercase(), values))
                    .collect(),
            );
        }
        Ok(())
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.entity
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(values: &[&str]) -> Vec<RawValue> {
        values.iter().map(|v| RawValue::Text((*v).into())).collect()
    }

    fn original(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<RawValue>> {
        pairs
            .iter()
            .map(|(name, values)| (name.to_ascii_lowercase(), text(values)))
            .collect()
    }

    #[test]
    fn test_single_valued_replace() {
        let before = original(&[("title", &["intern"])]);
        let ops = diff_values(&before, &[("title".into(), text(&["engineer"]))]);
        assert_eq!(
            ops,
            vec![ModificationOp::Replace {
                attribute: "title".into(),
                values: text(&["engineer"]),
            }]
        );
    }

    #[test]
    fn test_unchanged_attribute_is_absent() {
        let before = original(&[("title", &["intern"]), ("sn", &["Doe"])]);
        let ops = diff_values(
            &before,
            &[
                ("title".into(), text(&["intern"])),
                ("sn".into(), text(&["Doe"])),
            ],
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn test_multi_valued_set_difference() {
        let before = original(&[("member", &["cn=a", "cn=b", "cn=c"])]);
        let ops = diff_values(&before, &[("member".into(), text(&["cn=b", "cn=c", "cn=d"]))]);
        assert_eq!(ops.len(), 2);
        assert_eq!(
            ops[0],
            ModificationOp::Add {
                attribute: "member".into(),
                values: text(&["cn=d"]),
            }
        );
        assert_eq!(
            ops[1],
            ModificationOp::Delete {
                attribute: "member".into(),
                values: text(&["cn=a"]),
            }
        );
    }

    #[test]
    fn test_add_and_delete_whole_attribute() {
        let before = original(&[("mobile", &["+1555"])]);
        let ops = diff_values(
            &before,
            &[
                ("mobile".into(), Vec::new()),
                ("title".into(), text(&["engineer"])),
            ],
        );
        assert_eq!(
            ops,
            vec![
                ModificationOp::Delete {
                    attribute: "mobile".into(),
                    values: Vec::new(),
                },
                ModificationOp::Add {
                    attribute: "title".into(),
                    values: text(&["engineer"]),
                },
            ]
        );
    }
}
