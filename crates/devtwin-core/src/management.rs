//! Device management fields carried at the top of a twin document

use crate::error::{Result, TwinError};
use crate::metadata::format_timestamp;
use crate::validation::validate_device_id;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted status reason
pub const MAX_STATUS_REASON_LENGTH: usize = 128;

/// Whether the device may connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwinStatus {
    Enabled,
    Disabled,
}

/// Last known connection state of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl fmt::Display for TwinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for TwinStatus {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enabled" => Ok(Self::Enabled),
            "disabled" => Ok(Self::Disabled),
            other => Err(TwinError::InvalidArgument(format!("unknown status '{other}'"))),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl FromStr for ConnectionState {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connected" => Ok(Self::Connected),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(TwinError::InvalidArgument(format!(
                "unknown connection state '{other}'"
            ))),
        }
    }
}

/// Registry fields of a twin
///
/// Times are kept as the text the service sent, except `statusUpdatedTime`
/// which is stamped locally on a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceManagementFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    #[serde(default, rename = "etag", alias = "eTag", skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TwinStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_updated_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<ConnectionState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state_updated_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_time: Option<String>,
}

impl DeviceManagementFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device id and, when it changes, the status.
    ///
    /// A status change away from a stored status needs a reason. Nothing is
    /// touched unless every check passes. Returns whether anything changed.
    pub fn update(
        &mut self,
        device_id: &str,
        status: Option<TwinStatus>,
        status_reason: Option<&str>,
    ) -> Result<bool> {
        validate_device_id(device_id)?;
        if let Some(reason) = status_reason {
            if reason.chars().count() > MAX_STATUS_REASON_LENGTH {
                return Err(TwinError::InvalidArgument(format!(
                    "status reason is longer than {MAX_STATUS_REASON_LENGTH} characters"
                )));
            }
        }

        let new_status = match (status, self.status) {
            (Some(new), Some(old)) if new != old => {
                if status_reason.is_none() {
                    return Err(TwinError::MissingReason);
                }
                Some(new)
            }
            (Some(new), None) => Some(new),
            _ => None,
        };

        let mut changed = false;
        if let Some(new) = new_status {
            self.status = Some(new);
            if let Some(reason) = status_reason {
                self.status_reason = Some(reason.to_string());
            }
            self.status_updated_time = Some(format_timestamp(&Utc::now()));
            changed = true;
        }
        if self.device_id.as_deref() != Some(device_id) {
            self.device_id = Some(device_id.to_string());
            changed = true;
        }
        Ok(changed)
    }

    pub fn set_device_id(&mut self, device_id: &str) -> Result<()> {
        validate_device_id(device_id)?;
        self.device_id = Some(device_id.to_string());
        Ok(())
    }

    pub fn set_etag(&mut self, etag: &str) -> Result<()> {
        if etag.is_empty() {
            return Err(TwinError::InvalidArgument("etag is empty".into()));
        }
        self.etag = Some(etag.to_string());
        Ok(())
    }

    /// Take every field present in `patch`; absent fields keep their value.
    pub(crate) fn merge_from(&mut self, patch: DeviceManagementFields) {
        fn take<T>(slot: &mut Option<T>, incoming: Option<T>) {
            if incoming.is_some() {
                *slot = incoming;
            }
        }

        take(&mut self.device_id, patch.device_id);
        take(&mut self.generation_id, patch.generation_id);
        take(&mut self.etag, patch.etag);
        take(&mut self.version, patch.version);
        take(&mut self.status, patch.status);
        take(&mut self.status_reason, patch.status_reason);
        take(&mut self.status_updated_time, patch.status_updated_time);
        take(&mut self.connection_state, patch.connection_state);
        take(
            &mut self.connection_state_updated_time,
            patch.connection_state_updated_time,
        );
        take(&mut self.last_activity_time, patch.last_activity_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_status_needs_no_reason() {
        let mut fields = DeviceManagementFields::new();
        assert!(fields.update("Device1", Some(TwinStatus::Enabled), None).unwrap());
        assert_eq!(fields.status, Some(TwinStatus::Enabled));
        assert!(fields.status_updated_time.is_some());
        assert!(fields.status_reason.is_none());
    }

    #[test]
    fn test_status_change_requires_reason() {
        let mut fields = DeviceManagementFields::new();
        fields.update("Device1", Some(TwinStatus::Enabled), None).unwrap();

        let err = fields
            .update("Device2", Some(TwinStatus::Disabled), None)
            .unwrap_err();
        assert!(matches!(err, TwinError::MissingReason));
        assert_eq!(fields.status, Some(TwinStatus::Enabled));
        assert_eq!(fields.device_id.as_deref(), Some("Device1"));

        assert!(fields
            .update("Device1", Some(TwinStatus::Disabled), Some("maintenance"))
            .unwrap());
        assert_eq!(fields.status_reason.as_deref(), Some("maintenance"));
    }

    #[test]
    fn test_noop_update() {
        let mut fields = DeviceManagementFields::new();
        fields.update("Device1", Some(TwinStatus::Enabled), None).unwrap();
        let stamped = fields.status_updated_time.clone();
        assert!(!fields.update("Device1", Some(TwinStatus::Enabled), None).unwrap());
        assert_eq!(fields.status_updated_time, stamped);
    }

    #[test]
    fn test_reason_too_long() {
        let mut fields = DeviceManagementFields::new();
        let reason = "r".repeat(129);
        assert!(matches!(
            fields.update("Device1", Some(TwinStatus::Enabled), Some(&reason)),
            Err(TwinError::InvalidArgument(_))
        ));
        assert!(fields.device_id.is_none());
    }

    #[test]
    fn test_serde_names() {
        let fields: DeviceManagementFields = serde_json::from_str(
            r#"{"deviceId":"d1","eTag":"AAAA","status":"disabled","connectionState":"connected"}"#,
        )
        .unwrap();
        assert_eq!(fields.etag.as_deref(), Some("AAAA"));
        assert_eq!(fields.connection_state, Some(ConnectionState::Connected));

        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "deviceId": "d1",
                "etag": "AAAA",
                "status": "disabled",
                "connectionState": "connected",
            })
        );

        assert!(serde_json::from_str::<DeviceManagementFields>(r#"{"status":"Enabled"}"#).is_err());
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut fields = DeviceManagementFields {
            device_id: Some("d1".into()),
            etag: Some("old".into()),
            ..Default::default()
        };
        fields.merge_from(DeviceManagementFields {
            etag: Some("new".into()),
            version: Some(3),
            ..Default::default()
        });
        assert_eq!(fields.device_id.as_deref(), Some("d1"));
        assert_eq!(fields.etag.as_deref(), Some("new"));
        assert_eq!(fields.version, Some(3));
    }
}
