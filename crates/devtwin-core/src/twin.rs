//! Device twin facade
//!
//! Ties the property containers, tags, management fields and callbacks
//! together. Every operation validates its whole input before touching state,
//! applies the change, and only then notifies listeners.

use crate::codec::{self, DESIRED_TAG, REPORTED_TAG};
use crate::config::TwinConfig;
use crate::container::{PropertyContainer, TagsContainer};
use crate::dispatch::{CallbackDispatcher, ChangeCallback, Section};
use crate::error::{Result, TwinError};
use crate::management::{ConnectionState, DeviceManagementFields, TwinStatus};
use crate::metadata::Metadata;
use crate::validation::Limits;
use crate::value::PropertyMap;
use tracing::debug;

/// Client-side model of one device twin
///
/// Not internally synchronized; callers sharing a twin across threads must
/// serialize access themselves.
#[derive(Debug)]
pub struct DeviceTwin {
    config: TwinConfig,
    limits: Limits,
    management: DeviceManagementFields,
    desired: PropertyContainer,
    reported: PropertyContainer,
    tags: Option<TagsContainer>,
    callbacks: CallbackDispatcher,
}

impl Default for DeviceTwin {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTwin {
    /// Create an empty twin with metadata and tags disabled
    pub fn new() -> Self {
        Self::with_config(TwinConfig::default())
    }

    pub fn with_config(config: TwinConfig) -> Self {
        let mut twin = Self {
            limits: config.limits(),
            config: TwinConfig {
                metadata: false,
                tags: false,
                ..config.clone()
            },
            management: DeviceManagementFields::new(),
            desired: PropertyContainer::new(Section::Desired),
            reported: PropertyContainer::new(Section::Reported),
            tags: None,
            callbacks: CallbackDispatcher::new(),
        };
        if config.metadata {
            twin.enable_metadata();
        }
        if config.tags {
            twin.enable_tags();
        }
        twin
    }

    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    /// Track `$metadata` on desired and reported properties from now on
    pub fn enable_metadata(&mut self) {
        self.config.metadata = true;
        self.desired.enable_metadata();
        self.reported.enable_metadata();
    }

    /// Turn on the tags collection. Enabling twice keeps the existing tags.
    pub fn enable_tags(&mut self) {
        self.config.tags = true;
        if self.tags.is_none() {
            self.tags = Some(TagsContainer::new());
        }
    }

    pub fn metadata_enabled(&self) -> bool {
        self.config.metadata
    }

    pub fn tags_enabled(&self) -> bool {
        self.tags.is_some()
    }

    // Callbacks

    pub fn set_desired_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&PropertyMap) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.set(Section::Desired, Some(Box::new(callback)));
    }

    pub fn set_reported_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&PropertyMap) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.set(Section::Reported, Some(Box::new(callback)));
    }

    pub fn set_tags_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&PropertyMap) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.set(Section::Tags, Some(Box::new(callback)));
    }

    /// Replace or, with `None`, clear the listener for a section
    pub fn set_callback(&mut self, section: Section, callback: Option<ChangeCallback>) {
        self.callbacks.set(section, callback);
    }

    // Property updates

    /// Merge into desired properties; returns the diff as JSON, or `None` if nothing changed
    pub fn update_desired_property(&mut self, properties: &PropertyMap) -> Result<Option<String>> {
        let diff = self.desired.update(properties, &self.limits)?;
        self.finish_update(Section::Desired, diff)
    }

    /// Merge into reported properties; returns the diff as JSON, or `None` if nothing changed
    pub fn update_reported_property(&mut self, properties: &PropertyMap) -> Result<Option<String>> {
        let diff = self.reported.update(properties, &self.limits)?;
        self.finish_update(Section::Reported, diff)
    }

    /// Replace desired properties; the returned JSON is the new content
    pub fn reset_desired_property(&mut self, properties: &PropertyMap) -> Result<String> {
        let diff = self.desired.reset(properties, &self.limits)?;
        self.finish_reset(Section::Desired, diff)
    }

    /// Replace reported properties; the returned JSON is the new content
    pub fn reset_reported_property(&mut self, properties: &PropertyMap) -> Result<String> {
        let diff = self.reported.reset(properties, &self.limits)?;
        self.finish_reset(Section::Reported, diff)
    }

    pub fn update_tags(&mut self, tags: &PropertyMap) -> Result<Option<String>> {
        let limits = self.limits;
        let diff = self.tags_mut()?.update(tags, &limits)?;
        self.finish_update(Section::Tags, diff)
    }

    pub fn reset_tags(&mut self, tags: &PropertyMap) -> Result<String> {
        let limits = self.limits;
        let diff = self.tags_mut()?.reset(tags, &limits)?;
        self.finish_reset(Section::Tags, diff)
    }

    /// Merge any of the three sections in one call.
    ///
    /// `None` and empty maps leave their section alone; passing `None` for all
    /// three fails with [`TwinError::NoChange`]. Returns the twin JSON with the
    /// per-section diffs, or `None` when nothing changed.
    pub fn update_twin(
        &mut self,
        desired: Option<&PropertyMap>,
        reported: Option<&PropertyMap>,
        tags: Option<&PropertyMap>,
    ) -> Result<Option<String>> {
        if desired.is_none() && reported.is_none() && tags.is_none() {
            return Err(TwinError::NoChange);
        }
        if tags.is_some() && self.tags.is_none() {
            return Err(TwinError::FeatureDisabled("tags"));
        }
        for map in [desired, reported, tags].into_iter().flatten() {
            self.limits.validate_map(map, false)?;
        }

        let desired_diff = match desired {
            Some(map) if !map.is_empty() => self.desired.apply_update(map),
            _ => PropertyMap::new(),
        };
        let reported_diff = match reported {
            Some(map) if !map.is_empty() => self.reported.apply_update(map),
            _ => PropertyMap::new(),
        };
        let tags_diff = match (tags, self.tags.as_mut()) {
            (Some(map), Some(container)) if !map.is_empty() => container.apply_update(map),
            _ => PropertyMap::new(),
        };

        if desired_diff.is_empty() && reported_diff.is_empty() && tags_diff.is_empty() {
            return Ok(None);
        }

        let json = codec::encode_twin_diff(
            &self.management,
            &desired_diff,
            &reported_diff,
            self.tags.as_ref().map(|_| &tags_diff),
        )?;
        self.notify_all(&desired_diff, &reported_diff, &tags_diff)?;
        Ok(Some(json))
    }

    /// Apply a twin document received from the service.
    ///
    /// Accepts the full shape and the properties-only shape. Tags in the
    /// document are ignored unless tags are enabled.
    pub fn update_twin_json(&mut self, json: &str) -> Result<()> {
        let doc = codec::parse_twin(json)?;

        if let Some(desired) = &doc.desired {
            PropertyContainer::validate_document(desired, &self.limits)?;
        }
        if let Some(reported) = &doc.reported {
            PropertyContainer::validate_document(reported, &self.limits)?;
        }
        let tags = match (doc.tags, self.tags.is_some()) {
            (Some(tags), true) => {
                self.limits.validate_map(&tags, false)?;
                Some(tags)
            }
            (Some(_), false) => {
                debug!("ignoring tags in twin document; tags are not enabled");
                None
            }
            (None, _) => None,
        };

        if let Some(management) = doc.management {
            self.management.merge_from(management);
        }
        let desired_diff = doc
            .desired
            .map(|section| self.desired.apply_document(&section))
            .unwrap_or_default();
        let reported_diff = doc
            .reported
            .map(|section| self.reported.apply_document(&section))
            .unwrap_or_default();
        let tags_diff = match (tags, self.tags.as_mut()) {
            (Some(tags), Some(container)) => container.apply_update(&tags),
            _ => PropertyMap::new(),
        };

        debug!(
            shape = ?doc.shape,
            desired = desired_diff.len(),
            reported = reported_diff.len(),
            tags = tags_diff.len(),
            "applied twin document"
        );
        self.notify_all(&desired_diff, &reported_diff, &tags_diff)
    }

    /// Apply a bare desired property object, `$version` and `$metadata` included
    pub fn update_desired_property_json(&mut self, json: &str) -> Result<()> {
        let doc = codec::parse_section_json(DESIRED_TAG, json)?;
        PropertyContainer::validate_document(&doc, &self.limits)?;
        let diff = self.desired.apply_document(&doc);
        self.callbacks.dispatch(Section::Desired, &diff)
    }

    /// Apply a bare reported property object, `$version` and `$metadata` included
    pub fn update_reported_property_json(&mut self, json: &str) -> Result<()> {
        let doc = codec::parse_section_json(REPORTED_TAG, json)?;
        PropertyContainer::validate_document(&doc, &self.limits)?;
        let diff = self.reported.apply_document(&doc);
        self.callbacks.dispatch(Section::Reported, &diff)
    }

    // Management fields

    /// Set the device id and status; returns the twin JSON, or `None` if nothing changed
    pub fn update_device_manager(
        &mut self,
        device_id: &str,
        status: Option<TwinStatus>,
        status_reason: Option<&str>,
    ) -> Result<Option<String>> {
        if !self.management.update(device_id, status, status_reason)? {
            return Ok(None);
        }
        self.to_json().map(Some)
    }

    pub fn set_device_id(&mut self, device_id: &str) -> Result<()> {
        self.management.set_device_id(device_id)
    }

    pub fn set_etag(&mut self, etag: &str) -> Result<()> {
        self.management.set_etag(etag)
    }

    pub fn management(&self) -> &DeviceManagementFields {
        &self.management
    }

    pub fn device_id(&self) -> Option<&str> {
        self.management.device_id.as_deref()
    }

    pub fn generation_id(&self) -> Option<&str> {
        self.management.generation_id.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.management.etag.as_deref()
    }

    /// Twin version from the registry
    pub fn version(&self) -> Option<i64> {
        self.management.version
    }

    pub fn status(&self) -> Option<TwinStatus> {
        self.management.status
    }

    pub fn status_reason(&self) -> Option<&str> {
        self.management.status_reason.as_deref()
    }

    pub fn status_updated_time(&self) -> Option<&str> {
        self.management.status_updated_time.as_deref()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.management.connection_state
    }

    pub fn connection_state_updated_time(&self) -> Option<&str> {
        self.management.connection_state_updated_time.as_deref()
    }

    pub fn last_activity_time(&self) -> Option<&str> {
        self.management.last_activity_time.as_deref()
    }

    // Property getters

    pub fn desired(&self) -> &PropertyContainer {
        &self.desired
    }

    pub fn reported(&self) -> &PropertyContainer {
        &self.reported
    }

    /// Copy of the desired properties, or `None` if there are none
    pub fn desired_property_map(&self) -> Option<PropertyMap> {
        self.desired.snapshot()
    }

    /// Copy of the reported properties, or `None` if there are none
    pub fn reported_property_map(&self) -> Option<PropertyMap> {
        self.reported.snapshot()
    }

    pub fn tags_map(&self) -> Result<Option<PropertyMap>> {
        self.tags
            .as_ref()
            .map(TagsContainer::snapshot)
            .ok_or(TwinError::FeatureDisabled("tags"))
    }

    pub fn desired_property_version(&self) -> Option<i64> {
        self.desired.version()
    }

    pub fn reported_property_version(&self) -> Option<i64> {
        self.reported.version()
    }

    /// Metadata of a top-level desired key; fails when metadata is disabled
    pub fn desired_metadata(&self, key: &str) -> Result<Option<&Metadata>> {
        self.require_metadata()?;
        Ok(self.desired.metadata(key))
    }

    pub fn reported_metadata(&self, key: &str) -> Result<Option<&Metadata>> {
        self.require_metadata()?;
        Ok(self.reported.metadata(key))
    }

    /// The whole twin in full document shape
    pub fn to_json(&self) -> Result<String> {
        codec::encode_twin(
            &self.management,
            &self.desired,
            &self.reported,
            self.tags.as_ref(),
        )
    }

    fn require_metadata(&self) -> Result<()> {
        if self.config.metadata {
            Ok(())
        } else {
            Err(TwinError::FeatureDisabled("metadata"))
        }
    }

    fn tags_mut(&mut self) -> Result<&mut TagsContainer> {
        self.tags.as_mut().ok_or(TwinError::FeatureDisabled("tags"))
    }

    fn finish_update(&mut self, section: Section, diff: PropertyMap) -> Result<Option<String>> {
        if diff.is_empty() {
            return Ok(None);
        }
        let json = codec::encode_map(&diff)?;
        self.callbacks.dispatch(section, &diff)?;
        Ok(Some(json))
    }

    fn finish_reset(&mut self, section: Section, diff: PropertyMap) -> Result<String> {
        let json = codec::encode_map(&diff)?;
        self.callbacks.dispatch(section, &diff)?;
        Ok(json)
    }

    fn notify_all(
        &mut self,
        desired: &PropertyMap,
        reported: &PropertyMap,
        tags: &PropertyMap,
    ) -> Result<()> {
        self.callbacks.dispatch(Section::Desired, desired)?;
        self.callbacks.dispatch(Section::Reported, reported)?;
        self.callbacks.dispatch(Section::Tags, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    #[test]
    fn test_update_and_noop() {
        let mut twin = DeviceTwin::new();
        let json = twin
            .update_desired_property(&props! { "key1" => "value1", "key2" => 1234 })
            .unwrap();
        assert_eq!(json.as_deref(), Some(r#"{"key1":"value1","key2":1234}"#));

        let again = twin
            .update_desired_property(&props! { "key1" => "value1" })
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn test_reset_of_empty_map() {
        let mut twin = DeviceTwin::new();
        twin.update_reported_property(&props! { "a" => 1 }).unwrap();
        assert_eq!(twin.reset_reported_property(&PropertyMap::new()).unwrap(), "{}");
        assert!(twin.reported_property_map().is_none());
    }

    #[test]
    fn test_tags_disabled() {
        let mut twin = DeviceTwin::new();
        assert!(matches!(
            twin.update_tags(&props! { "t" => 1 }),
            Err(TwinError::FeatureDisabled("tags"))
        ));
        assert!(twin.tags_map().is_err());

        twin.enable_tags();
        twin.update_tags(&props! { "t" => 1 }).unwrap();
        twin.enable_tags();
        assert_eq!(twin.tags_map().unwrap(), Some(props! { "t" => 1 }));
    }

    #[test]
    fn test_metadata_getters_disabled() {
        let mut twin = DeviceTwin::new();
        twin.update_reported_property(&props! { "a" => 1 }).unwrap();
        assert!(matches!(
            twin.reported_metadata("a"),
            Err(TwinError::FeatureDisabled("metadata"))
        ));
        assert!(matches!(
            twin.desired_metadata("a"),
            Err(TwinError::FeatureDisabled("metadata"))
        ));

        twin.enable_metadata();
        assert!(twin.reported_metadata("a").unwrap().is_none());
        twin.update_reported_property(&props! { "a" => 2 }).unwrap();
        assert!(twin.reported_metadata("a").unwrap().is_some());
    }

    #[test]
    fn test_with_config_enables_features() {
        let twin = DeviceTwin::with_config(TwinConfig {
            metadata: true,
            tags: true,
            ..TwinConfig::default()
        });
        assert!(twin.metadata_enabled());
        assert!(twin.tags_enabled());
        assert!(twin.desired().metadata_enabled());
    }

    #[test]
    fn test_update_twin_requires_a_map() {
        let mut twin = DeviceTwin::new();
        assert!(matches!(
            twin.update_twin(None, None, None),
            Err(TwinError::NoChange)
        ));
        assert_eq!(
            twin.update_twin(Some(&PropertyMap::new()), None, None).unwrap(),
            None
        );
    }
}
