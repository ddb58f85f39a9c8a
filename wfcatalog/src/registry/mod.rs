//! Static catalog of queryable fields.
//!
//! Maps every public query key to its internal document field, the kind of
//! value it accepts and the compiled pattern that validates raw input. Built
//! once at startup and shared read-only between requests.

mod fields;

pub use fields::QUALITY_CODES;

use chrono::{DateTime, SecondsFormat, Utc};
use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Float,
    Int,
    String,
    StringList,
    WildcardList,
    FloatList,
    IntList,
}

impl ValueKind {
    /// Kind of a single comma-separated element.
    pub fn element(self) -> ValueKind {
        match self {
            ValueKind::FloatList => ValueKind::Float,
            ValueKind::IntList => ValueKind::Int,
            ValueKind::StringList | ValueKind::WildcardList => ValueKind::String,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Identifier,
    StartTime,
    EndTime,
    Option,
    Metric,
}

/// mSEED header flag category; flags are stored as nested percentages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagGroup {
    DataQuality,
    Activity,
    IoClock,
}

impl FlagGroup {
    pub fn internal(self) -> &'static str {
        match self {
            FlagGroup::DataQuality => "dq_flags",
            FlagGroup::Activity => "ac_flags",
            FlagGroup::IoClock => "io_flags",
        }
    }

    pub fn public(self) -> &'static str {
        match self {
            FlagGroup::DataQuality => "data_quality_flags",
            FlagGroup::Activity => "activity_flags",
            FlagGroup::IoClock => "io_and_clock_flags",
        }
    }

    pub const ALL: [FlagGroup; 3] = [FlagGroup::IoClock, FlagGroup::DataQuality, FlagGroup::Activity];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub public: &'static str,
    pub internal: &'static str,
    pub kind: ValueKind,
    pub role: FieldRole,
    pub group: Option<FlagGroup>,
}

impl FieldSpec {
    /// Dotted document path, nested under the flag group when there is one.
    pub fn path(&self) -> String {
        match self.group {
            Some(group) => format!("{}.{}", group.internal(), self.internal),
            None => self.internal.to_string(),
        }
    }
}

/// Metric comparison extension carried as a key suffix (`sample_mean_gt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub const ALL: [Comparison; 6] = [
        Comparison::Eq,
        Comparison::Ne,
        Comparison::Gt,
        Comparison::Ge,
        Comparison::Lt,
        Comparison::Le,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Comparison::Eq => "_eq",
            Comparison::Ne => "_ne",
            Comparison::Gt => "_gt",
            Comparison::Ge => "_ge",
            Comparison::Lt => "_lt",
            Comparison::Le => "_le",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }
}

/// A request value after coercion to its field's kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Float(f64),
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

impl TypedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Float(v) => Some(*v),
            TypedValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Int(v) => write!(f, "{}", v),
            TypedValue::Text(v) => write!(f, "'{}'", v),
            TypedValue::Time(v) => write!(f, "{}", v.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

/// How a raw query key resolved against the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedKey<'a> {
    Field(&'a FieldSpec),
    Comparison(&'a FieldSpec, Comparison),
}

impl<'a> ResolvedKey<'a> {
    pub fn spec(&self) -> &'a FieldSpec {
        match self {
            ResolvedKey::Field(spec) | ResolvedKey::Comparison(spec, _) => spec,
        }
    }
}

static PATTERNS: Lazy<HashMap<ValueKind, Regex>> = Lazy::new(|| {
    let float = r"-?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)";
    let int = r"-?[0-9]+";
    let string = r"[A-Za-z0-9_.\-]+";
    let wildcard = r"[A-Za-z0-9*?\-]+";

    let table = [
        (ValueKind::Float, format!("^{float}$")),
        (ValueKind::Int, format!("^{int}$")),
        (ValueKind::String, format!("^{string}$")),
        (ValueKind::StringList, format!("^{string}(?:,{string})*$")),
        (ValueKind::WildcardList, format!("^{wildcard}(?:,{wildcard})*$")),
        (ValueKind::FloatList, format!("^{float}(?:,{float})*$")),
        (ValueKind::IntList, format!("^{int}(?:,{int})*$")),
    ];

    table
        .into_iter()
        .map(|(kind, pattern)| (kind, Regex::new(&pattern).expect("Invalid value pattern")))
        .collect()
});

pub struct TypeRegistry {
    fields: HashMap<&'static str, FieldSpec>,
    patterns: &'static HashMap<ValueKind, Regex>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            fields: fields::FIELDS
                .iter()
                .map(|spec| (spec.public, *spec))
                .collect(),
            patterns: &PATTERNS,
        }
    }

    pub fn lookup(&self, public: &str) -> Option<&FieldSpec> {
        self.fields.get(public)
    }

    /// Resolves a key either directly or as a metric carrying a comparison
    /// suffix. Suffixes only attach to scalar numeric metrics.
    pub fn resolve(&self, key: &str) -> Option<ResolvedKey<'_>> {
        if let Some(spec) = self.lookup(key) {
            return Some(ResolvedKey::Field(spec));
        }

        Comparison::ALL.into_iter().find_map(|comparison| {
            let name = key.strip_suffix(comparison.suffix())?;
            let spec = self.lookup(name)?;
            let scalar = matches!(spec.kind, ValueKind::Float | ValueKind::Int);
            (spec.role == FieldRole::Metric && scalar)
                .then_some(ResolvedKey::Comparison(spec, comparison))
        })
    }

    /// Flag specs belonging to one group, in declaration order.
    pub fn flags(&self, group: FlagGroup) -> impl Iterator<Item = &'static FieldSpec> {
        fields::FIELDS
            .iter()
            .filter(move |spec| spec.group == Some(group))
    }

    pub fn validate(&self, kind: ValueKind, value: &str) -> Result<bool> {
        self.patterns
            .get(&kind)
            .map(|pattern| pattern.is_match(value))
            .ok_or_else(|| Error::Internal(format!("no pattern registered for {:?}", kind)))
    }

    /// Converts one element (never a comma list) to its typed value.
    pub fn coerce(&self, kind: ValueKind, value: &str) -> Result<TypedValue> {
        let element = kind.element();
        if !self.validate(element, value)? {
            return Err(Error::InvalidInput(format!(
                "value '{}' is not a valid {:?}",
                value, element
            )));
        }

        match element {
            ValueKind::Float => value
                .parse::<f64>()
                .map(TypedValue::Float)
                .map_err(|e| Error::InvalidInput(e.to_string())),
            ValueKind::Int => value
                .parse::<i64>()
                .map(TypedValue::Int)
                .map_err(|e| Error::InvalidInput(e.to_string())),
            ValueKind::String => Ok(TypedValue::Text(value.to_string())),
            other => Err(Error::Internal(format!("no coercion for {:?}", other))),
        }
    }
}

/// Case-insensitive set membership.
pub fn contains_case_insensitive(set: &[&str], value: &str) -> bool {
    set.iter().any(|candidate| candidate.eq_ignore_ascii_case(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_maps_aliases_to_same_internal_field() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.lookup("net").unwrap().internal, "net");
        assert_eq!(registry.lookup("network").unwrap().internal, "net");
        assert_eq!(registry.lookup("starttime").unwrap().role, FieldRole::StartTime);
        assert!(registry.lookup("bogus").is_none());
    }

    #[test]
    fn test_resolve_comparison_suffix() {
        let registry = TypeRegistry::new();

        match registry.resolve("sample_mean_ge") {
            Some(ResolvedKey::Comparison(spec, Comparison::Ge)) => assert_eq!(spec.internal, "smean"),
            other => panic!("unexpected resolution {:?}", other),
        }
        // Suffix on something that is not a metric stays unknown
        assert!(registry.resolve("network_eq").is_none());
        assert!(registry.resolve("encoding_gt").is_none());
        assert!(registry.resolve("sample_rate_gt").is_none());
        assert!(registry.resolve("unknown_gt").is_none());
    }

    #[test]
    fn test_flag_path_is_nested_under_group() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.lookup("spikes").unwrap().path(), "dq_flags.spi");
        assert_eq!(registry.lookup("clock_locked").unwrap().path(), "io_flags.clo");
        assert_eq!(registry.lookup("sample_rms").unwrap().path(), "rms");
        assert_eq!(registry.flags(FlagGroup::Activity).count(), 7);
    }

    #[test]
    fn test_validate_patterns() {
        let registry = TypeRegistry::new();
        assert!(registry.validate(ValueKind::Float, "10.5").unwrap());
        assert!(registry.validate(ValueKind::Float, "-3").unwrap());
        assert!(!registry.validate(ValueKind::Float, "1e5").unwrap());
        assert!(!registry.validate(ValueKind::Int, "1.5").unwrap());
        assert!(registry.validate(ValueKind::WildcardList, "HG?,N*,--").unwrap());
        assert!(!registry.validate(ValueKind::WildcardList, "NL,,HGN").unwrap());
        assert!(registry.validate(ValueKind::FloatList, "20,40.0").unwrap());
        assert!(!registry.validate(ValueKind::String, "").unwrap());
    }

    #[test]
    fn test_missing_pattern_is_internal_error() {
        let registry = TypeRegistry {
            fields: HashMap::new(),
            patterns: Box::leak(Box::new(HashMap::new())),
        };
        assert!(matches!(
            registry.validate(ValueKind::Float, "1"),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_coerce_list_elements() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.coerce(ValueKind::IntList, "512").unwrap(), TypedValue::Int(512));
        assert_eq!(registry.coerce(ValueKind::Float, "0.25").unwrap(), TypedValue::Float(0.25));
        assert!(registry.coerce(ValueKind::Int, "abc").is_err());
    }

    #[test]
    fn test_contains_case_insensitive() {
        assert!(contains_case_insensitive(&QUALITY_CODES, "d"));
        assert!(!contains_case_insensitive(&QUALITY_CODES, "X"));
    }
}
