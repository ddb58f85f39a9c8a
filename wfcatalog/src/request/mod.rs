//! Request stages ahead of query translation: normalization of GET/POST
//! input, segment validation and service option resolution.

pub mod normalize;
pub mod options;
pub mod validate;

pub use normalize::{collect_body, normalize_get, normalize_post};
pub use options::{resolve_options, IncludeLevel, Options};
pub use validate::{parse_time, validate_segments};

use crate::registry::{Comparison, FieldSpec};
use chrono::{DateTime, Utc};

/// Client-supplied selector, as parsed and before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentDescriptor {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Validated selector: identifiers upper-cased, `start <= end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub network: Option<String>,
    pub station: Option<String>,
    pub location: Option<String>,
    pub channel: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One non-segment parameter, already resolved against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Key exactly as the client sent it.
    pub key: String,
    pub spec: FieldSpec,
    pub comparison: Option<Comparison>,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRequest {
    pub segments: Vec<SegmentDescriptor>,
    pub params: Vec<Param>,
}
