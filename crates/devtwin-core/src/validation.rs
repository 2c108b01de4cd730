//! Validation of keys, values and map shapes
//!
//! Everything here is pure. Callers validate a whole update before touching
//! any state so that a rejected update leaves the twin unchanged.

use crate::config::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_KEY_LENGTH};
use crate::error::{Result, TwinError};
use crate::value::{PropertyMap, PropertyValue};

/// Prefix reserved for metadata markers such as `$version` or `$metadata`
pub const METADATA_PREFIX: char = '$';

/// Longest accepted device identifier
pub const MAX_DEVICE_ID_LENGTH: usize = 128;

const ILLEGAL_KEY_CHARS: [char; 3] = ['$', '.', ' '];
const DEVICE_ID_SYMBOLS: &str = "-:.+%_#*?!(),=@;$'";

/// Size and nesting limits applied to every key and value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_depth: usize,
    pub max_key_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
        }
    }
}

impl Limits {
    /// Check a single key.
    ///
    /// `$` is only accepted when `allow_metadata` is set, for markers such as
    /// `$lastUpdated`.
    pub fn validate_key(&self, key: &str, allow_metadata: bool) -> Result<()> {
        if key.is_empty() {
            return Err(TwinError::invalid_key(key, "key is empty"));
        }
        if key.chars().count() > self.max_key_length {
            return Err(TwinError::invalid_key(
                key,
                format!("longer than {} characters", self.max_key_length),
            ));
        }
        if key.chars().any(char::is_control) {
            return Err(TwinError::invalid_key(key, "contains a control character"));
        }
        let illegal = key
            .chars()
            .find(|c| ILLEGAL_KEY_CHARS.contains(c) && !(allow_metadata && *c == METADATA_PREFIX));
        if let Some(c) = illegal {
            return Err(TwinError::invalid_key(
                key,
                format!("contains illegal character '{c}'"),
            ));
        }
        Ok(())
    }

    /// Check a value stored under `key`, allowing `depth_remaining` further map levels.
    ///
    /// In a metadata context a map made only of `$` markers may sit one level
    /// past the limit, since it annotates a leaf rather than adding content.
    pub fn validate_value(
        &self,
        key: &str,
        value: &PropertyValue,
        depth_remaining: usize,
        metadata_context: bool,
    ) -> Result<()> {
        match value {
            PropertyValue::Float(f) if !f.into_inner().is_finite() => {
                Err(TwinError::invalid_value(key, "number is not finite"))
            }
            PropertyValue::Map(map) => match depth_remaining.checked_sub(1) {
                Some(remaining) => self.validate_entries(map, remaining, metadata_context),
                None if metadata_context && is_metadata_only(map) => {
                    for (k, v) in map {
                        self.validate_key(k, true)?;
                        if v.is_map() {
                            return Err(self.depth_error(key));
                        }
                    }
                    Ok(())
                }
                None => Err(self.depth_error(key)),
            },
            _ => Ok(()),
        }
    }

    /// Validate every key and value of a top-level map.
    pub fn validate_map(&self, map: &PropertyMap, metadata_context: bool) -> Result<()> {
        self.validate_entries(map, self.max_depth, metadata_context)
    }

    fn validate_entries(
        &self,
        map: &PropertyMap,
        depth_remaining: usize,
        metadata_context: bool,
    ) -> Result<()> {
        for (key, value) in map {
            self.validate_key(key, metadata_context)?;
            self.validate_value(key, value, depth_remaining, metadata_context)?;
        }
        Ok(())
    }

    fn depth_error(&self, key: &str) -> TwinError {
        TwinError::DepthExceeded {
            key: key.to_string(),
            max_depth: self.max_depth,
        }
    }
}

fn is_metadata_only(map: &PropertyMap) -> bool {
    map.keys().all(|k| k.starts_with(METADATA_PREFIX))
}

/// Check a device identifier: up to 128 ASCII letters, digits and `-:.+%_#*?!(),=@;$'`.
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.is_empty() {
        return Err(TwinError::InvalidArgument("device id is empty".into()));
    }
    if device_id.len() > MAX_DEVICE_ID_LENGTH {
        return Err(TwinError::InvalidArgument(format!(
            "device id is longer than {MAX_DEVICE_ID_LENGTH} characters"
        )));
    }
    match device_id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !DEVICE_ID_SYMBOLS.contains(*c))
    {
        Some(c) => Err(TwinError::InvalidArgument(format!(
            "device id contains illegal character '{c}'"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::props;

    fn nested(levels: usize) -> PropertyMap {
        let mut value = PropertyValue::from("leaf");
        for level in (1..=levels).rev() {
            value = PropertyValue::Map(props! { format!("level{level}") => value });
        }
        props! { "root" => value }
    }

    #[test]
    fn test_key_rules() {
        let limits = Limits::default();
        assert!(limits.validate_key("temperature", false).is_ok());
        assert!(limits.validate_key("", false).is_err());
        assert!(limits.validate_key("a.b", false).is_err());
        assert!(limits.validate_key("a b", false).is_err());
        assert!(limits.validate_key("$version", false).is_err());
        assert!(limits.validate_key("$version", true).is_ok());
        assert!(limits.validate_key("a.$b", true).is_err());
        assert!(limits.validate_key("bell\u{7}", false).is_err());
        assert!(limits.validate_key(&"k".repeat(128), false).is_ok());
        assert!(limits.validate_key(&"k".repeat(129), false).is_err());
    }

    #[test]
    fn test_depth_boundary() {
        let limits = Limits::default();
        assert!(limits.validate_map(&nested(5), false).is_ok());
        let err = limits.validate_map(&nested(6), false).unwrap_err();
        assert!(matches!(err, TwinError::DepthExceeded { max_depth: 5, .. }));
    }

    #[test]
    fn test_empty_map_past_limit_is_rejected() {
        let limits = Limits {
            max_depth: 1,
            ..Limits::default()
        };
        let map = props! { "a" => props! { "b" => PropertyMap::new() } };
        assert!(limits.validate_map(&map, false).is_err());
    }

    #[test]
    fn test_metadata_level_does_not_count() {
        let limits = Limits {
            max_depth: 1,
            ..Limits::default()
        };
        let metadata = props! {
            "a" => props! {
                "$lastUpdated" => "2016-06-01T00:00:00.000Z",
                "b" => props! { "$lastUpdated" => "2016-06-01T00:00:00.000Z" },
            },
        };
        assert!(limits.validate_map(&metadata, true).is_ok());
        assert!(limits.validate_map(&metadata, false).is_err());
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        let limits = Limits::default();
        let map = props! { "bad" => f64::NAN };
        assert!(matches!(
            limits.validate_map(&map, false),
            Err(TwinError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_device_id() {
        assert!(validate_device_id("Device1").is_ok());
        assert!(validate_device_id("dev-1:a.b+c%_#*?!(),=@;$'").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("has space").is_err());
        assert!(validate_device_id("caf\u{e9}").is_err());
        assert!(validate_device_id(&"d".repeat(129)).is_err());
    }
}
