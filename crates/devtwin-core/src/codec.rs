//! Twin document codec
//!
//! Reads the two document shapes the service sends:
//!
//! - full shape: management fields, optional `tags`, and a `properties`
//!   object holding `desired`/`reported`
//! - properties-only shape: nothing but top-level `desired`/`reported`
//!
//! Section objects may carry `$version` and `$metadata`. Duplicate sections
//! are rejected, so the raw document is read with a visitor that keeps every
//! occurrence of a key instead of letting the last one silently win.

use crate::container::{PropertyContainer, TagsContainer};
use crate::error::{Result, TwinError};
use crate::management::DeviceManagementFields;
use crate::metadata::METADATA_TAG;
use crate::value::{map_to_json, PropertyMap, PropertyValue};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

pub const PROPERTIES_TAG: &str = "properties";
pub const DESIRED_TAG: &str = "desired";
pub const REPORTED_TAG: &str = "reported";
pub const TAGS_TAG: &str = "tags";
pub const VERSION_TAG: &str = "$version";

/// Which of the two twin shapes a document used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentShape {
    Full,
    PropertiesOnly,
}

/// One parsed `desired` or `reported` object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionDocument {
    pub values: PropertyMap,
    pub version: Option<i64>,
    pub metadata: Option<PropertyMap>,
}

/// A parsed twin document, not yet validated against key and depth limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinDocument {
    pub shape: DocumentShape,
    pub management: Option<DeviceManagementFields>,
    pub tags: Option<PropertyMap>,
    pub desired: Option<SectionDocument>,
    pub reported: Option<SectionDocument>,
}

/// JSON as written, with repeated keys preserved
#[derive(Debug)]
enum RawJson {
    Scalar(Value),
    Array,
    Object(Vec<(String, RawJson)>),
}

impl<'de> Deserialize<'de> for RawJson {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RawVisitor;

        impl<'de> Visitor<'de> for RawVisitor {
            type Value = RawJson;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("any JSON value")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::Bool(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::String(v.to_string())))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::String(v)))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::Null))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<RawJson, E> {
                Ok(RawJson::Scalar(Value::Null))
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<RawJson, A::Error>
            where
                A: SeqAccess<'de>,
            {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(RawJson::Array)
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<RawJson, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, RawJson>()? {
                    entries.push((key, value));
                }
                Ok(RawJson::Object(entries))
            }
        }

        deserializer.deserialize_any(RawVisitor)
    }
}

impl RawJson {
    /// Convert to a property value; repeated keys resolve to the last occurrence.
    fn into_value(self, key: &str) -> Result<PropertyValue> {
        match self {
            Self::Scalar(value) => PropertyValue::from_json(key, value),
            Self::Array => Err(TwinError::invalid_value(key, "arrays are not supported")),
            Self::Object(entries) => {
                let mut map = PropertyMap::new();
                for (k, v) in entries {
                    let value = v.into_value(&k)?;
                    map.insert(k, value);
                }
                Ok(PropertyValue::Map(map))
            }
        }
    }

    fn into_map(self, key: &str) -> Result<PropertyMap> {
        match self.into_value(key)? {
            PropertyValue::Map(map) => Ok(map),
            other => Err(TwinError::InvalidArgument(format!(
                "'{key}' must be an object, found {}",
                other.type_name()
            ))),
        }
    }

    /// Plain JSON with last-wins keys, for serde-driven structs
    fn into_json(self) -> Value {
        match self {
            Self::Scalar(value) => value,
            Self::Array => Value::Array(Vec::new()),
            Self::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

fn parse_raw(json: &str) -> Result<RawJson> {
    if json.trim().is_empty() {
        return Err(TwinError::InvalidArgument("json is empty".into()));
    }
    serde_json::from_str(json)
        .map_err(|e| TwinError::InvalidArgument(format!("malformed json: {e}")))
}

fn parse_object(json: &str) -> Result<Vec<(String, RawJson)>> {
    match parse_raw(json)? {
        RawJson::Object(entries) => Ok(entries),
        _ => Err(TwinError::InvalidArgument(
            "twin document must be a JSON object".into(),
        )),
    }
}

/// Take the single occurrence of `name`, failing if it appears more than once.
fn take_unique(entries: &mut Vec<(String, RawJson)>, name: &str) -> Result<Option<RawJson>> {
    let mut found = None;
    let mut index = 0;
    while index < entries.len() {
        if entries[index].0 == name {
            if found.is_some() {
                return Err(TwinError::DuplicateSection(name.to_string()));
            }
            found = Some(entries.remove(index).1);
        } else {
            index += 1;
        }
    }
    Ok(found)
}

fn parse_version(raw: RawJson) -> Result<i64> {
    let invalid = || TwinError::InvalidArgument(format!("{VERSION_TAG} must be an integer"));
    let RawJson::Scalar(Value::Number(n)) = raw else {
        return Err(invalid());
    };
    if let Some(version) = n.as_i64() {
        return Ok(version);
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(invalid()),
    }
}

/// Parse one section object: data keys plus `$version` and `$metadata`
fn parse_section(name: &str, raw: RawJson) -> Result<SectionDocument> {
    let RawJson::Object(entries) = raw else {
        return Err(TwinError::InvalidArgument(format!("'{name}' must be an object")));
    };

    let mut section = SectionDocument::default();
    for (key, value) in entries {
        match key.as_str() {
            VERSION_TAG => section.version = Some(parse_version(value)?),
            METADATA_TAG => section.metadata = Some(value.into_map(METADATA_TAG)?),
            _ if key.starts_with('$') => debug!(section = name, key = %key, "skipping marker"),
            _ => {
                let value = value.into_value(&key)?;
                section.values.insert(key, value);
            }
        }
    }
    Ok(section)
}

/// Parse a bare `desired` or `reported` object
pub fn parse_section_json(name: &str, json: &str) -> Result<SectionDocument> {
    let entries = parse_object(json)?;
    parse_section(name, RawJson::Object(entries))
}

/// Parse a whole twin document in either shape
pub fn parse_twin(json: &str) -> Result<TwinDocument> {
    let mut entries = parse_object(json)?;

    let top_level_properties = entries
        .iter()
        .any(|(k, _)| k == DESIRED_TAG || k == REPORTED_TAG);

    if top_level_properties {
        if let Some((other, _)) = entries
            .iter()
            .find(|(k, _)| k != DESIRED_TAG && k != REPORTED_TAG)
        {
            return Err(TwinError::AmbiguousShape(format!(
                "'{other}' cannot appear next to top-level desired/reported"
            )));
        }
        let desired = take_unique(&mut entries, DESIRED_TAG)?;
        let reported = take_unique(&mut entries, REPORTED_TAG)?;
        return Ok(TwinDocument {
            shape: DocumentShape::PropertiesOnly,
            management: None,
            tags: None,
            desired: desired.map(|raw| parse_section(DESIRED_TAG, raw)).transpose()?,
            reported: reported.map(|raw| parse_section(REPORTED_TAG, raw)).transpose()?,
        });
    }

    let properties = take_unique(&mut entries, PROPERTIES_TAG)?;
    let tags = take_unique(&mut entries, TAGS_TAG)?;
    if properties.is_none() && tags.is_none() {
        return Err(TwinError::InvalidArgument(
            "json does not contain twin information".into(),
        ));
    }

    let (desired, reported) = match properties {
        Some(RawJson::Object(mut inner)) => {
            let desired = take_unique(&mut inner, DESIRED_TAG)?;
            let reported = take_unique(&mut inner, REPORTED_TAG)?;
            (
                desired.map(|raw| parse_section(DESIRED_TAG, raw)).transpose()?,
                reported.map(|raw| parse_section(REPORTED_TAG, raw)).transpose()?,
            )
        }
        Some(_) => {
            return Err(TwinError::InvalidArgument(format!(
                "'{PROPERTIES_TAG}' must be an object"
            )))
        }
        None => (None, None),
    };

    let management = if entries.is_empty() {
        None
    } else {
        // Both spellings of the etag name one field; the later occurrence wins
        let fields = Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let key = if k == "eTag" { "etag".to_string() } else { k };
                    (key, v.into_json())
                })
                .collect(),
        );
        Some(
            serde_json::from_value::<DeviceManagementFields>(fields)
                .map_err(|e| TwinError::InvalidArgument(format!("management fields: {e}")))?,
        )
    };

    Ok(TwinDocument {
        shape: DocumentShape::Full,
        management,
        tags: tags.map(|raw| raw.into_map(TAGS_TAG)).transpose()?,
        desired,
        reported,
    })
}

/// Serialize a diff or property map
pub fn encode_map(map: &PropertyMap) -> Result<String> {
    Ok(serde_json::to_string(map)?)
}

/// A property section as the service expects it, with `$version` and, when
/// tracked, `$metadata`
pub fn section_json(container: &PropertyContainer) -> Value {
    let mut section = match map_to_json(container.tree().values()) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(version) = container.version() {
        section.insert(VERSION_TAG.to_string(), json!(version));
    }
    if container.metadata_enabled() {
        section.insert(
            METADATA_TAG.to_string(),
            map_to_json(&container.tree().metadata().to_map()),
        );
    }
    Value::Object(section)
}

/// Management fields, `tags` when enabled, and the given property sections
fn twin_object(
    management: &DeviceManagementFields,
    tags: Option<Value>,
    desired: Value,
    reported: Value,
) -> Result<String> {
    let mut twin = match serde_json::to_value(management)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(tags) = tags {
        twin.insert(TAGS_TAG.to_string(), tags);
    }
    let mut properties = Map::new();
    properties.insert(DESIRED_TAG.to_string(), desired);
    properties.insert(REPORTED_TAG.to_string(), reported);
    twin.insert(PROPERTIES_TAG.to_string(), Value::Object(properties));
    Ok(serde_json::to_string(&Value::Object(twin))?)
}

/// The whole twin in full shape
pub fn encode_twin(
    management: &DeviceManagementFields,
    desired: &PropertyContainer,
    reported: &PropertyContainer,
    tags: Option<&TagsContainer>,
) -> Result<String> {
    twin_object(
        management,
        tags.map(|t| map_to_json(t.tree().values())),
        section_json(desired),
        section_json(reported),
    )
}

/// Full shape carrying only what changed; unchanged sections are `{}`
pub fn encode_twin_diff(
    management: &DeviceManagementFields,
    desired: &PropertyMap,
    reported: &PropertyMap,
    tags: Option<&PropertyMap>,
) -> Result<String> {
    twin_object(
        management,
        tags.map(map_to_json),
        map_to_json(desired),
        map_to_json(reported),
    )
}
