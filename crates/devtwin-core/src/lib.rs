//! Device Twin Core
//!
//! Client-side model of an IoT device twin:
//! - Desired and reported property trees, each independently versioned
//! - Optional tags and per-field `$metadata`
//! - Merge/diff engine that reports only genuine changes
//! - Codec for the service's twin JSON documents
//! - Change callbacks per section

pub mod codec;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod management;
pub mod metadata;
pub mod tree;
pub mod twin;
pub mod validation;
pub mod value;

pub use codec::{DocumentShape, SectionDocument, TwinDocument};
pub use config::TwinConfig;
pub use container::{PropertyContainer, TagsContainer};
pub use dispatch::{ChangeCallback, Section};
pub use error::{Result, TwinError};
pub use management::{ConnectionState, DeviceManagementFields, TwinStatus};
pub use metadata::{Metadata, MetadataNode};
pub use tree::PropertyTree;
pub use twin::DeviceTwin;
pub use validation::Limits;
pub use value::{PropertyMap, PropertyValue};
