//! Per-field update metadata
//!
//! Metadata mirrors the shape of the property tree it annotates: every node
//! may carry a `$lastUpdated` timestamp and `$lastUpdatedVersion`, and map
//! values carry one child node per key.

use crate::value::{PropertyMap, PropertyValue};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::collections::BTreeMap;
use tracing::warn;

pub const METADATA_TAG: &str = "$metadata";
pub const LAST_UPDATED_TAG: &str = "$lastUpdated";
pub const LAST_UPDATED_VERSION_TAG: &str = "$lastUpdatedVersion";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse `yyyy-MM-ddTHH:mm:ss[.fraction]Z`, truncating the fraction to milliseconds.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let body = text.strip_suffix('Z')?;
    NaiveDateTime::parse_from_str(body, TIMESTAMP_PARSE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().trunc_subsecs(3))
}

/// Format as `yyyy-MM-ddTHH:mm:ss.SSSZ`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// When a field was last updated, and by which document version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    last_updated: DateTime<Utc>,
    last_updated_version: Option<i64>,
}

impl Metadata {
    pub fn new(last_updated: DateTime<Utc>, last_updated_version: Option<i64>) -> Self {
        Self {
            last_updated: last_updated.trunc_subsecs(3),
            last_updated_version,
        }
    }

    /// Stamp for a change happening now
    pub fn now(last_updated_version: Option<i64>) -> Self {
        Self::new(Utc::now(), last_updated_version)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn last_updated_version(&self) -> Option<i64> {
        self.last_updated_version
    }

    /// Read `$lastUpdated`/`$lastUpdatedVersion` markers from a metadata object.
    fn from_markers(key: &str, markers: &PropertyMap) -> Markers {
        let Some(raw) = markers.get(LAST_UPDATED_TAG) else {
            return Markers::Absent;
        };
        let Some(last_updated) = raw.as_str().and_then(parse_timestamp) else {
            warn!(key, value = %raw, "dropping malformed metadata timestamp");
            return Markers::Malformed;
        };
        let version = markers
            .get(LAST_UPDATED_VERSION_TAG)
            .and_then(|v| match v {
                PropertyValue::Integer(i) => Some(*i),
                PropertyValue::Float(f) if f.into_inner().fract() == 0.0 => {
                    Some(f.into_inner() as i64)
                }
                _ => None,
            });
        Markers::Valid(Self::new(last_updated, version))
    }

    fn write_markers(&self, out: &mut PropertyMap) {
        out.insert(
            LAST_UPDATED_TAG.to_string(),
            format_timestamp(&self.last_updated).into(),
        );
        if let Some(version) = self.last_updated_version {
            out.insert(LAST_UPDATED_VERSION_TAG.to_string(), version.into());
        }
    }
}

/// Outcome of reading the markers of one metadata object
#[derive(Debug, PartialEq, Eq)]
enum Markers {
    Absent,
    Malformed,
    Valid(Metadata),
}

/// Metadata for one node of a property tree and its children
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataNode {
    pub(crate) metadata: Option<Metadata>,
    pub(crate) children: BTreeMap<String, MetadataNode>,
}

impl MetadataNode {
    /// Node for a freshly written value; nested maps are stamped all the way down.
    pub(crate) fn stamped(value: &PropertyValue, stamp: &Metadata) -> Self {
        let children = match value {
            PropertyValue::Map(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Self::stamped(v, stamp)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            metadata: Some(stamp.clone()),
            children,
        }
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn child(&self, key: &str) -> Option<&MetadataNode> {
        self.children.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.children.is_empty()
    }

    /// Render as a `$metadata` object
    pub fn to_map(&self) -> PropertyMap {
        let mut out = PropertyMap::new();
        if let Some(metadata) = &self.metadata {
            metadata.write_markers(&mut out);
        }
        for (key, child) in &self.children {
            out.insert(key.clone(), child.to_map().into());
        }
        out
    }

    /// Overlay an incoming `$metadata` object onto this root node.
    ///
    /// Only keys present in `values` are taken. Returns the top-level keys
    /// whose metadata changed.
    pub(crate) fn overlay(&mut self, incoming: &PropertyMap, values: &PropertyMap) -> Vec<String> {
        match Metadata::from_markers(METADATA_TAG, incoming) {
            Markers::Valid(metadata) => self.metadata = Some(metadata),
            Markers::Malformed => self.metadata = None,
            Markers::Absent => {}
        }

        let mut changed = Vec::new();
        for (key, entry) in incoming {
            if key.starts_with('$') {
                continue;
            }
            let (Some(value), PropertyValue::Map(markers)) = (values.get(key), entry) else {
                warn!(key = %key, "ignoring metadata for a key that is not present");
                continue;
            };
            if self.overlay_child(key, markers, value) {
                changed.push(key.clone());
            }
        }
        changed
    }

    fn overlay_child(&mut self, key: &str, markers: &PropertyMap, value: &PropertyValue) -> bool {
        let mut node = self.children.remove(key).unwrap_or_default();
        let changed = node.overlay_value(key, markers, value);
        if !node.is_empty() {
            self.children.insert(key.to_string(), node);
        }
        changed
    }

    fn overlay_value(&mut self, key: &str, markers: &PropertyMap, value: &PropertyValue) -> bool {
        // A malformed timestamp leaves the field without metadata
        let incoming = match Metadata::from_markers(key, markers) {
            Markers::Valid(metadata) => Some(metadata),
            Markers::Malformed => None,
            Markers::Absent => self.metadata.clone(),
        };
        let mut changed = incoming != self.metadata;
        self.metadata = incoming;

        let PropertyValue::Map(map) = value else {
            return changed;
        };
        for (child_key, entry) in markers {
            if child_key.starts_with('$') {
                continue;
            }
            match (map.get(child_key), entry) {
                (Some(child_value), PropertyValue::Map(child_markers)) => {
                    changed |= self.overlay_child(child_key, child_markers, child_value);
                }
                _ => warn!(key = %child_key, "ignoring metadata for a key that is not present"),
            }
        }
        changed
    }
}
