//! Property tree and merge/diff engine
//!
//! A tree holds the current values of one section plus their metadata. Merging
//! an update returns only what actually changed, with deletions reported as
//! `Null`.

use crate::error::Result;
use crate::metadata::{Metadata, MetadataNode};
use crate::validation::Limits;
use crate::value::{PropertyMap, PropertyValue};

/// Values of one twin section and their per-field metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyTree {
    values: PropertyMap,
    metadata: MetadataNode,
}

impl PropertyTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &PropertyMap {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Metadata root; its own entry is the section-level metadata
    pub fn metadata(&self) -> &MetadataNode {
        &self.metadata
    }

    /// Overlay a `$metadata` object; returns the top-level keys whose metadata changed.
    pub(crate) fn overlay_metadata(&mut self, incoming: &PropertyMap) -> Vec<String> {
        self.metadata.overlay(incoming, &self.values)
    }

    /// Deep copy of the values, or `None` if the tree holds nothing
    pub fn snapshot(&self) -> Option<PropertyMap> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.clone())
        }
    }

    /// Validate `updates`, then merge them in and return the diff.
    ///
    /// With a `stamp`, every created or changed field records it as metadata.
    pub fn merge(
        &mut self,
        updates: &PropertyMap,
        limits: &Limits,
        stamp: Option<&Metadata>,
    ) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_merge(updates, stamp))
    }

    /// Validate `updates`, then replace the whole tree with them.
    ///
    /// The diff is always `updates` itself, `Null` entries included.
    pub fn reset(
        &mut self,
        updates: &PropertyMap,
        limits: &Limits,
        stamp: Option<&Metadata>,
    ) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_reset(updates, stamp))
    }

    /// Merge already validated updates
    pub(crate) fn apply_merge(
        &mut self,
        updates: &PropertyMap,
        stamp: Option<&Metadata>,
    ) -> PropertyMap {
        merge_level(&mut self.values, &mut self.metadata, updates, stamp)
    }

    /// Reset with already validated updates
    pub(crate) fn apply_reset(
        &mut self,
        updates: &PropertyMap,
        stamp: Option<&Metadata>,
    ) -> PropertyMap {
        self.values.clear();
        self.metadata.children.clear();
        merge_level(&mut self.values, &mut self.metadata, updates, stamp)
    }
}

fn merge_level(
    values: &mut PropertyMap,
    metadata: &mut MetadataNode,
    updates: &PropertyMap,
    stamp: Option<&Metadata>,
) -> PropertyMap {
    let mut diff = PropertyMap::new();

    for (key, update) in updates {
        if update.is_null() {
            values.remove(key);
            metadata.children.remove(key);
            diff.insert(key.clone(), PropertyValue::Null);
            continue;
        }

        if let (PropertyValue::Map(incoming), Some(PropertyValue::Map(current))) =
            (update, values.get_mut(key))
        {
            let node = metadata.children.entry(key.clone()).or_default();
            let nested = merge_level(current, node, incoming, stamp);
            if !nested.is_empty() {
                if let Some(stamp) = stamp {
                    node.metadata = Some(stamp.clone());
                }
                diff.insert(key.clone(), PropertyValue::Map(nested));
            }
            if node.is_empty() {
                metadata.children.remove(key);
            }
            continue;
        }

        let stored = update.without_nulls();
        if values.get(key) == Some(&stored) {
            continue;
        }
        match stamp {
            Some(stamp) => {
                metadata
                    .children
                    .insert(key.clone(), MetadataNode::stamped(&stored, stamp));
            }
            None => {
                metadata.children.remove(key);
            }
        }
        values.insert(key.clone(), stored);
        diff.insert(key.clone(), update.clone());
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TwinError;
    use crate::props;

    fn tree_with(values: PropertyMap) -> PropertyTree {
        let mut tree = PropertyTree::new();
        tree.merge(&values, &Limits::default(), None).unwrap();
        tree
    }

    #[test]
    fn test_merge_reports_only_changes() {
        let mut tree = tree_with(props! { "key1" => "value1", "key2" => 1234 });
        let diff = tree
            .merge(&props! { "key1" => "value1", "key2" => 4321 }, &Limits::default(), None)
            .unwrap();
        assert_eq!(diff, props! { "key2" => 4321 });
    }

    #[test]
    fn test_partial_nested_diff() {
        let mut tree = tree_with(props! { "tag1" => props! { "A" => "1", "B" => "2" } });
        let diff = tree
            .merge(&props! { "tag1" => props! { "A" => "9" } }, &Limits::default(), None)
            .unwrap();
        assert_eq!(diff, props! { "tag1" => props! { "A" => "9" } });
        assert_eq!(
            tree.values(),
            &props! { "tag1" => props! { "A" => "9", "B" => "2" } }
        );
    }

    #[test]
    fn test_delete_is_always_reported() {
        let mut tree = tree_with(props! { "keep" => 1 });
        let diff = tree
            .merge(&props! { "never_there" => PropertyValue::Null }, &Limits::default(), None)
            .unwrap();
        assert_eq!(diff, props! { "never_there" => PropertyValue::Null });
        assert!(tree.get("never_there").is_none());
        assert_eq!(tree.get("keep"), Some(&PropertyValue::from(1)));
    }

    #[test]
    fn test_type_change_replaces_whole_value() {
        let mut tree = tree_with(props! { "k" => "scalar" });
        let update = props! { "k" => props! { "inner" => 1, "gone" => PropertyValue::Null } };
        let diff = tree.merge(&update, &Limits::default(), None).unwrap();
        assert_eq!(diff, update);
        assert_eq!(tree.get("k"), Some(&PropertyValue::from(props! { "inner" => 1 })));
    }

    #[test]
    fn test_invalid_update_leaves_tree_untouched() {
        let mut tree = tree_with(props! { "a" => 1 });
        let err = tree
            .merge(&props! { "a" => 2, "bad.key" => 3 }, &Limits::default(), None)
            .unwrap_err();
        assert!(matches!(err, TwinError::InvalidKey { .. }));
        assert_eq!(tree.values(), &props! { "a" => 1 });
    }

    #[test]
    fn test_reset_returns_input() {
        let mut tree = tree_with(props! { "old" => true });
        let update = props! { "new" => 1, "drop" => PropertyValue::Null };
        assert_eq!(tree.reset(&update, &Limits::default(), None).unwrap(), update);
        assert_eq!(tree.reset(&update, &Limits::default(), None).unwrap(), update);
        assert_eq!(tree.snapshot(), Some(props! { "new" => 1 }));
    }

    #[test]
    fn test_snapshot_of_empty_tree() {
        assert_eq!(PropertyTree::new().snapshot(), None);
    }

    #[test]
    fn test_stamp_only_changed_fields() {
        let first = Metadata::now(Some(1));
        let mut tree = PropertyTree::new();
        tree.merge(
            &props! { "a" => 1, "nested" => props! { "x" => 1, "y" => 2 } },
            &Limits::default(),
            Some(&first),
        )
        .unwrap();

        let second = Metadata::now(Some(2));
        tree.merge(
            &props! { "nested" => props! { "y" => 3 } },
            &Limits::default(),
            Some(&second),
        )
        .unwrap();

        let root = tree.metadata();
        assert_eq!(root.child("a").and_then(|n| n.metadata()), Some(&first));
        let nested = root.child("nested").unwrap();
        assert_eq!(nested.metadata(), Some(&second));
        assert_eq!(nested.child("x").and_then(|n| n.metadata()), Some(&first));
        assert_eq!(nested.child("y").and_then(|n| n.metadata()), Some(&second));
    }
}
