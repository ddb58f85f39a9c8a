use super::{Segment, SegmentDescriptor};
use crate::api::error::{ErrorKind, QueryError};
use crate::registry::{TypeRegistry, ValueKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS[.fff]]` with an optional `Z`,
/// and full RFC 3339 timestamps.
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    let value = value.strip_suffix('Z').unwrap_or(value);

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

fn identifier(
    registry: &TypeRegistry,
    name: &str,
    value: Option<String>,
) -> Result<Option<String>, QueryError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if !registry.validate(ValueKind::WildcardList, &value)? {
        return Err(QueryError::with(ErrorKind::WrongType, name));
    }
    Ok(Some(value.to_uppercase()))
}

fn validate_segment(
    registry: &TypeRegistry,
    descriptor: SegmentDescriptor,
    now: DateTime<Utc>,
) -> Result<Segment, QueryError> {
    let start = descriptor
        .start
        .ok_or_else(|| QueryError::new(ErrorKind::StartRequired))?;
    let end = descriptor
        .end
        .ok_or_else(|| QueryError::new(ErrorKind::EndRequired))?;

    let start = parse_time(&start).ok_or_else(|| QueryError::new(ErrorKind::StartInvalid))?;
    let end = parse_time(&end).ok_or_else(|| QueryError::new(ErrorKind::EndInvalid))?;

    if start > end {
        return Err(QueryError::new(ErrorKind::StartBeyondEnd));
    }
    if start > now {
        return Err(QueryError::new(ErrorKind::StartBeyondNow));
    }

    Ok(Segment {
        network: identifier(registry, "network", descriptor.network)?,
        station: identifier(registry, "station", descriptor.station)?,
        location: identifier(registry, "location", descriptor.location)?,
        channel: identifier(registry, "channel", descriptor.channel)?,
        start,
        end,
    })
}

/// Validates every queued descriptor in order; the first failure wins.
pub fn validate_segments(
    registry: &TypeRegistry,
    descriptors: Vec<SegmentDescriptor>,
    now: DateTime<Utc>,
) -> Result<Vec<Segment>, QueryError> {
    descriptors
        .into_iter()
        .map(|descriptor| validate_segment(registry, descriptor, now))
        .collect()
}
