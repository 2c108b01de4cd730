//! Desired/reported property containers and the tags container

use crate::codec::SectionDocument;
use crate::dispatch::Section;
use crate::error::Result;
use crate::metadata::{Metadata, MetadataNode};
use crate::tree::PropertyTree;
use crate::validation::Limits;
use crate::value::PropertyMap;
use tracing::{debug, trace};

/// A versioned property tree with optional metadata tracking
///
/// The version only ever comes from a service document; local updates never
/// bump it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyContainer {
    section: Section,
    tree: PropertyTree,
    version: Option<i64>,
    metadata_enabled: bool,
}

impl PropertyContainer {
    pub fn new(section: Section) -> Self {
        Self {
            section,
            tree: PropertyTree::new(),
            version: None,
            metadata_enabled: false,
        }
    }

    pub fn section(&self) -> Section {
        self.section
    }

    pub fn tree(&self) -> &PropertyTree {
        &self.tree
    }

    pub fn version(&self) -> Option<i64> {
        self.version
    }

    pub fn metadata_enabled(&self) -> bool {
        self.metadata_enabled
    }

    /// Start stamping changed fields. There is no way back.
    pub fn enable_metadata(&mut self) {
        self.metadata_enabled = true;
    }

    pub fn snapshot(&self) -> Option<PropertyMap> {
        self.tree.snapshot()
    }

    /// Metadata recorded for a top-level key
    pub fn metadata(&self, key: &str) -> Option<&Metadata> {
        self.tree.metadata().child(key).and_then(MetadataNode::metadata)
    }

    /// Metadata recorded for the section as a whole
    pub fn section_metadata(&self) -> Option<&Metadata> {
        self.tree.metadata().metadata()
    }

    /// Merge a partial update and return what changed
    pub fn update(&mut self, updates: &PropertyMap, limits: &Limits) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_update(updates))
    }

    /// Replace the contents and return the new contents as the diff
    pub fn reset(&mut self, updates: &PropertyMap, limits: &Limits) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_reset(updates))
    }

    pub(crate) fn apply_update(&mut self, updates: &PropertyMap) -> PropertyMap {
        let stamp = self.stamp();
        let diff = self.tree.apply_merge(updates, stamp.as_ref());
        log_diff(self.section, &diff);
        diff
    }

    pub(crate) fn apply_reset(&mut self, updates: &PropertyMap) -> PropertyMap {
        let stamp = self.stamp();
        let diff = self.tree.apply_reset(updates, stamp.as_ref());
        debug!(section = %self.section, changed = diff.len(), "reset properties");
        diff
    }

    /// Check a parsed service document without applying it
    pub(crate) fn validate_document(doc: &SectionDocument, limits: &Limits) -> Result<()> {
        limits.validate_map(&doc.values, false)?;
        if let Some(metadata) = &doc.metadata {
            limits.validate_map(metadata, true)?;
        }
        Ok(())
    }

    /// Apply a validated service document: version, values, then `$metadata`.
    ///
    /// With metadata enabled, a key whose metadata changed is reported with its
    /// current value even when the value itself did not change.
    pub(crate) fn apply_document(&mut self, doc: &SectionDocument) -> PropertyMap {
        if doc.version.is_some() {
            self.version = doc.version;
        }

        let stamp = self.stamp();
        let mut diff = self.tree.apply_merge(&doc.values, stamp.as_ref());

        if let Some(incoming) = &doc.metadata {
            let changed = self.tree.overlay_metadata(incoming);
            if self.metadata_enabled {
                for key in changed {
                    if diff.contains_key(&key) {
                        continue;
                    }
                    if let Some(value) = self.tree.get(&key) {
                        diff.insert(key, value.clone());
                    }
                }
            }
        }

        log_diff(self.section, &diff);
        diff
    }

    fn stamp(&self) -> Option<Metadata> {
        self.metadata_enabled.then(|| Metadata::now(self.version))
    }
}

/// Un-versioned property tree for device tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsContainer {
    tree: PropertyTree,
}

impl TagsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &PropertyTree {
        &self.tree
    }

    pub fn snapshot(&self) -> Option<PropertyMap> {
        self.tree.snapshot()
    }

    pub fn update(&mut self, updates: &PropertyMap, limits: &Limits) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_update(updates))
    }

    pub fn reset(&mut self, updates: &PropertyMap, limits: &Limits) -> Result<PropertyMap> {
        limits.validate_map(updates, false)?;
        Ok(self.apply_reset(updates))
    }

    pub(crate) fn apply_update(&mut self, updates: &PropertyMap) -> PropertyMap {
        let diff = self.tree.apply_merge(updates, None);
        log_diff(Section::Tags, &diff);
        diff
    }

    pub(crate) fn apply_reset(&mut self, updates: &PropertyMap) -> PropertyMap {
        let diff = self.tree.apply_reset(updates, None);
        debug!(section = %Section::Tags, changed = diff.len(), "reset tags");
        diff
    }
}

fn log_diff(section: Section, diff: &PropertyMap) {
    if diff.is_empty() {
        trace!(%section, "merge changed nothing");
    } else {
        debug!(%section, changed = diff.len(), "merged properties");
    }
}
