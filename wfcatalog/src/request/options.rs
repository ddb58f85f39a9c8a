use super::Param;
use crate::api::error::{ErrorKind, QueryError};
use crate::registry::{contains_case_insensitive, FieldRole, TypeRegistry, ValueKind};

pub const GRANULARITY: &str = "day";
pub const FORMAT: &str = "json";

const INCLUDE_LEVELS: [&str; 4] = ["default", "sample", "header", "all"];

/// Breadth of the projected output document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum IncludeLevel {
    #[default]
    Default,
    Sample,
    Header,
    All,
}

impl IncludeLevel {
    fn parse(value: &str) -> Option<Self> {
        if !contains_case_insensitive(&INCLUDE_LEVELS, value) {
            return None;
        }
        match value.to_ascii_lowercase().as_str() {
            "sample" => Some(IncludeLevel::Sample),
            "header" => Some(IncludeLevel::Header),
            "all" => Some(IncludeLevel::All),
            _ => Some(IncludeLevel::Default),
        }
    }
}

/// Per-request service options. Granularity and format are fixed and only
/// checked, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Options {
    pub include: IncludeLevel,
    pub min_length: f64,
    pub longest_only: bool,
    pub csegments: bool,
}

fn boolean(param: &Param) -> Result<bool, QueryError> {
    match param.value.as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(QueryError::with(ErrorKind::WrongType, param.spec.public)),
    }
}

/// Pulls option keys out of the parameter list. Whatever remains is left for
/// the translator.
pub fn resolve_options(
    params: Vec<Param>,
    registry: &TypeRegistry,
) -> Result<(Options, Vec<Param>), QueryError> {
    let mut options = Options::default();
    let mut remaining = Vec::with_capacity(params.len());

    for param in params {
        if param.spec.role != FieldRole::Option {
            remaining.push(param);
            continue;
        }

        match param.spec.public {
            "include" => {
                options.include = IncludeLevel::parse(&param.value).ok_or_else(|| {
                    QueryError::with(ErrorKind::IncludeUnsupported, param.value.as_str())
                })?;
            }
            "longestonly" => options.longest_only = boolean(&param)?,
            "csegments" => options.csegments = boolean(&param)?,
            "minlen" => {
                if !registry.validate(ValueKind::Float, &param.value)? {
                    return Err(QueryError::with(ErrorKind::WrongType, "minlen"));
                }
                options.min_length = param
                    .value
                    .parse()
                    .map_err(|_| QueryError::with(ErrorKind::WrongType, "minlen"))?;
            }
            "gran" if param.value != GRANULARITY => {
                return Err(QueryError::with(
                    ErrorKind::GranularityUnsupported,
                    param.value.as_str(),
                ));
            }
            "format" if param.value != FORMAT => {
                return Err(QueryError::with(
                    ErrorKind::FormatUnsupported,
                    param.value.as_str(),
                ));
            }
            "gran" | "format" => {}
            other => {
                return Err(QueryError {
                    kind: ErrorKind::InternalError,
                    subject: None,
                    detail: Some(format!("option {} has no resolver", other)),
                });
            }
        }
    }

    // Child segments must be joined for these to mean anything
    if options.min_length != 0.0 || options.longest_only {
        options.csegments = true;
    }

    Ok((options, remaining))
}
