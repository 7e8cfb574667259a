//! Vendor adapter profiles and registry for the RTK gateway.
//!
//! An adapter profile is a declarative bundle: topic patterns, payload
//! conditions, field mappings, value transforms, and command tables.
//! The registry resolves which profile owns a message; the profile's
//! transform functions rewrite it for the other side.

pub mod condition;
pub mod error;
pub mod message;
pub mod profile;
pub mod profiles;
pub mod registry;
pub mod transform;

pub use condition::{MatchCondition, RegexField};
pub use error::{TransformError, TransformErrorKind};
pub use message::InflightMessage;
pub use profile::{
    AdapterProfile, ArgSpec, DownlinkPublish, DownlinkRule, FieldMap, ProfileError, SiteDefaults,
    UplinkRule,
};
pub use registry::{AdapterRegistry, RegistryError};
pub use transform::ValueTransform;
