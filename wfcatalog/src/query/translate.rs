use super::{Filter, Wildcard};
use crate::api::error::{ErrorKind, QueryError};
use crate::registry::{Comparison, TypeRegistry, TypedValue, ValueKind, QUALITY_CODES};
use crate::request::{Param, Segment};
use chrono::{DateTime, Days, NaiveTime, Utc};
use common::Error;

/// Reserved location value standing for an empty location code.
const EMPTY_LOCATION: &str = "--";
const QUALITY_FIELD: &str = "qlt";

fn quality_term(param: &Param) -> Result<Filter, QueryError> {
    let code = param.value.to_uppercase();
    if !QUALITY_CODES.contains(&code.as_str()) {
        return Err(QueryError::with(ErrorKind::QualityInvalid, param.value.as_str()));
    }
    Ok(Filter::equals(param.spec.path(), TypedValue::Text(code)))
}

/// Coerces one element of a client value. A value that matches its pattern
/// but still fails to convert, such as an integer outside `i64`, is the
/// client's fault and names the key.
fn coerce(
    registry: &TypeRegistry,
    param: &Param,
    kind: ValueKind,
    value: &str,
) -> Result<TypedValue, QueryError> {
    registry.coerce(kind, value).map_err(|err| match err {
        Error::InvalidInput(_) => QueryError::with(ErrorKind::WrongType, param.key.as_str()),
        other => other.into(),
    })
}

fn comparison_term(
    registry: &TypeRegistry,
    param: &Param,
    op: Comparison,
) -> Result<Filter, QueryError> {
    let kind = param.spec.kind.element();
    if !registry.validate(kind, &param.value)? {
        return Err(QueryError::with(ErrorKind::WrongType, param.key.as_str()));
    }
    Ok(Filter::Compare {
        field: param.spec.path(),
        op,
        value: coerce(registry, param, kind, &param.value)?,
    })
}

fn value_term(registry: &TypeRegistry, param: &Param) -> Result<Filter, QueryError> {
    if !registry.validate(param.spec.kind, &param.value)? {
        return Err(QueryError::with(ErrorKind::WrongType, param.key.as_str()));
    }

    let mut values = param
        .value
        .split(',')
        .map(|token| coerce(registry, param, param.spec.kind, token))
        .collect::<Result<Vec<_>, QueryError>>()?;

    let field = param.spec.path();
    Ok(match values.len() {
        1 => Filter::equals(field, values.remove(0)),
        _ => Filter::In { field, values },
    })
}

/// Translates the non-segment, non-option parameters into one conjunction.
pub fn translate_params(registry: &TypeRegistry, params: &[Param]) -> Result<Filter, QueryError> {
    params.iter().try_fold(Filter::default(), |filter, param| {
        let term = match param.comparison {
            Some(op) => comparison_term(registry, param, op)?,
            None if param.spec.internal == QUALITY_FIELD => quality_term(param)?,
            None => value_term(registry, param)?,
        };
        Ok(filter.and(term))
    })
}

/// Builds the term for one identifier field, or `None` when a bare `*`
/// leaves the field unconstrained.
fn identifier_term(field: &str, value: &str) -> common::Result<Option<Filter>> {
    let tokens: Vec<&str> = value.split(',').collect();
    if tokens.contains(&"*") {
        return Ok(None);
    }

    let mut literals = Vec::new();
    let mut patterns = Vec::new();
    for token in tokens {
        if token == EMPTY_LOCATION {
            literals.push(TypedValue::Text(String::new()));
        } else if Wildcard::is_wildcard(token) {
            patterns.push(Filter::Matches {
                field: field.to_string(),
                pattern: Wildcard::new(token)?,
            });
        } else {
            literals.push(TypedValue::Text(token.to_string()));
        }
    }

    let literal = match literals.len() {
        0 => None,
        1 => Some(Filter::equals(field, literals.remove(0))),
        _ => Some(Filter::In {
            field: field.to_string(),
            values: literals,
        }),
    };

    let mut terms: Vec<Filter> = literal.into_iter().chain(patterns).collect();
    Ok(match terms.len() {
        1 => terms.pop(),
        _ => Some(Filter::Any(terms)),
    })
}

fn identifier_filter(fields: [(&str, Option<&str>); 4]) -> common::Result<Filter> {
    let mut filter = Filter::default();
    for (field, value) in fields {
        if let Some(value) = value {
            if let Some(term) = identifier_term(field, value)? {
                filter = filter.and(term);
            }
        }
    }
    Ok(filter)
}

fn floor_day(time: DateTime<Utc>) -> DateTime<Utc> {
    time.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn ceil_day(time: DateTime<Utc>) -> DateTime<Utc> {
    let floor = floor_day(time);
    if floor == time {
        floor
    } else {
        floor + Days::new(1)
    }
}

/// Filter for one validated segment: identifier terms plus the day-aligned,
/// half-open range on the record start time.
pub fn segment_filter(segment: &Segment) -> common::Result<Filter> {
    let start = floor_day(segment.start);
    let mut end = ceil_day(segment.end);
    if end <= start {
        end = start + Days::new(1);
    }

    let identifiers = identifier_filter([
        ("net", segment.network.as_deref()),
        ("sta", segment.station.as_deref()),
        ("loc", segment.location.as_deref()),
        ("cha", segment.channel.as_deref()),
    ])?;

    Ok(identifiers
        .and(Filter::Compare {
            field: "ts".to_string(),
            op: Comparison::Ge,
            value: TypedValue::Time(start),
        })
        .and(Filter::Compare {
            field: "ts".to_string(),
            op: Comparison::Lt,
            value: TypedValue::Time(end),
        }))
}

/// Server-wide deny-list of `NET.STA.LOC.CHA` patterns.
pub fn exclusion_filter(patterns: &[String]) -> common::Result<Option<Filter>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let excluded = patterns
        .iter()
        .map(|pattern| {
            let parts: Vec<&str> = pattern.split('.').collect();
            let [net, sta, loc, cha] = parts.as_slice() else {
                return Err(Error::InvalidInput(format!(
                    "exclusion pattern {} is not NET.STA.LOC.CHA",
                    pattern
                )));
            };
            identifier_filter([
                ("net", Some(*net)),
                ("sta", Some(*sta)),
                ("loc", Some(*loc)),
                ("cha", Some(*cha)),
            ])
        })
        .collect::<common::Result<Vec<_>>>()?;

    Ok(Some(Filter::Not(Box::new(Filter::Any(excluded)))))
}
