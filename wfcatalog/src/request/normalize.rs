use super::{NormalizedRequest, Param, SegmentDescriptor};
use crate::api::error::{ErrorKind, QueryError};
use crate::registry::{FieldRole, ResolvedKey, TypeRegistry};
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static QUERY_STRUCTURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^&=]+=[^&=]*(?:&[^&=]+=[^&=]*)*$").expect("Invalid query structure regex")
});

static PARAMETER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^=\s]+=[^=\s]*$").expect("Invalid parameter line regex"));

const SEGMENT_TOKENS: usize = 6;

/// Tracks keys already seen; aliases of one field collide.
#[derive(Default)]
struct SeenKeys(HashSet<String>);

impl SeenKeys {
    fn insert(&mut self, resolved: &ResolvedKey<'_>, key: &str) -> Result<(), QueryError> {
        let identity = match resolved {
            ResolvedKey::Field(spec) => format!("{:?}:{}", spec.role, spec.path()),
            ResolvedKey::Comparison(spec, comparison) => {
                format!("{:?}:{}{}", spec.role, spec.path(), comparison.suffix())
            }
        };
        if !self.0.insert(identity) {
            return Err(QueryError::with(ErrorKind::DoubleParameter, key));
        }
        Ok(())
    }
}

fn to_param(resolved: ResolvedKey<'_>, key: &str, value: &str) -> Param {
    let (spec, comparison) = match resolved {
        ResolvedKey::Field(spec) => (*spec, None),
        ResolvedKey::Comparison(spec, comparison) => (*spec, Some(comparison)),
    };
    Param {
        key: key.to_string(),
        spec,
        comparison,
        value: value.to_string(),
    }
}

fn assign_segment_field(descriptor: &mut SegmentDescriptor, internal: &str, value: String) {
    let slot = match internal {
        "net" => &mut descriptor.network,
        "sta" => &mut descriptor.station,
        "loc" => &mut descriptor.location,
        "cha" => &mut descriptor.channel,
        "ts" => &mut descriptor.start,
        _ => &mut descriptor.end,
    };
    *slot = Some(value);
}

/// Parses a raw GET query string into one implicit segment plus parameters.
pub fn normalize_get(
    raw: Option<&str>,
    registry: &TypeRegistry,
    max_length: usize,
) -> Result<NormalizedRequest, QueryError> {
    let raw = raw.unwrap_or_default();

    if raw.is_empty() {
        return Err(QueryError::new(ErrorKind::EmptyQuery));
    }
    if raw.len() > max_length {
        return Err(QueryError::new(ErrorKind::QueryLengthExceeded));
    }
    if !QUERY_STRUCTURE.is_match(raw) {
        return Err(QueryError::new(ErrorKind::InvalidQuery));
    }

    let mut descriptor = SegmentDescriptor::default();
    let mut params = Vec::new();
    let mut seen = SeenKeys::default();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let resolved = registry
            .resolve(&key)
            .ok_or_else(|| QueryError::with(ErrorKind::InvalidParameter, key.to_string()))?;
        seen.insert(&resolved, &key)?;

        match resolved {
            ResolvedKey::Field(spec)
                if matches!(
                    spec.role,
                    FieldRole::Identifier | FieldRole::StartTime | FieldRole::EndTime
                ) =>
            {
                assign_segment_field(&mut descriptor, spec.internal, value.into_owned());
            }
            _ => params.push(to_param(resolved, &key, &value)),
        }
    }

    Ok(NormalizedRequest {
        segments: vec![descriptor],
        params,
    })
}

/// Parses a newline-delimited POST body: six-token segment lines and
/// `key=value` parameter lines.
pub fn normalize_post(
    body: &str,
    registry: &TypeRegistry,
    max_segments: usize,
) -> Result<NormalizedRequest, QueryError> {
    if body.trim().is_empty() {
        return Err(QueryError::new(ErrorKind::PostBodyEmpty));
    }

    let mut segments = Vec::new();
    let mut params = Vec::new();
    let mut seen = SeenKeys::default();

    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let tokens: Vec<&str> = line.split_whitespace().collect();

        if tokens.len() == SEGMENT_TOKENS {
            segments.push(SegmentDescriptor {
                network: Some(tokens[0].to_string()),
                station: Some(tokens[1].to_string()),
                location: Some(tokens[2].to_string()),
                channel: Some(tokens[3].to_string()),
                start: Some(tokens[4].to_string()),
                end: Some(tokens[5].to_string()),
            });
            continue;
        }

        if !PARAMETER_LINE.is_match(line) {
            return Err(QueryError::new(ErrorKind::PostBodyInvalid));
        }

        // Decoded like a single GET pair
        let mut pairs = url::form_urlencoded::parse(line.as_bytes());
        let (key, value) = match (pairs.next(), pairs.next()) {
            (Some(pair), None) => pair,
            _ => return Err(QueryError::new(ErrorKind::PostBodyInvalid)),
        };
        let resolved = registry
            .resolve(&key)
            .ok_or_else(|| QueryError::with(ErrorKind::InvalidParameter, &*key))?;

        if matches!(
            resolved.spec().role,
            FieldRole::Identifier | FieldRole::StartTime | FieldRole::EndTime
        ) {
            return Err(QueryError::with(ErrorKind::PostSegmentInvalid, &*key));
        }

        seen.insert(&resolved, &key)?;
        params.push(to_param(resolved, &key, &value));
    }

    if segments.is_empty() {
        return Err(QueryError::new(ErrorKind::PostEmptySegments));
    }
    if segments.len() > max_segments {
        return Err(QueryError::new(ErrorKind::PostSegmentsExceeded));
    }

    Ok(NormalizedRequest { segments, params })
}

/// Accumulates a request body chunk by chunk, giving up as soon as the running
/// total passes `max_bytes`.
pub async fn collect_body<S, E>(mut stream: S, max_bytes: usize) -> Result<String, QueryError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| QueryError {
            kind: ErrorKind::PostBodyInvalid,
            subject: None,
            detail: Some(e.to_string()),
        })?;
        if buffer.len() + chunk.len() > max_bytes {
            return Err(QueryError::new(ErrorKind::PostLengthExceeded));
        }
        buffer.extend_from_slice(&chunk);
    }

    String::from_utf8(buffer.to_vec()).map_err(|_| QueryError::new(ErrorKind::PostBodyInvalid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn kind(result: Result<NormalizedRequest, QueryError>) -> ErrorKind {
        result.expect_err("expected normalization to fail").kind
    }

    #[test]
    fn test_get_splits_segment_and_params() {
        let registry = TypeRegistry::new();
        let request = normalize_get(
            Some("net=nl&sta=HGN&start=2016-01-01&end=2016-01-02&sample_mean_gt=10&include=sample"),
            &registry,
            4096,
        )
        .unwrap();

        assert_eq!(request.segments.len(), 1);
        let segment = &request.segments[0];
        assert_eq!(segment.network.as_deref(), Some("nl"));
        assert_eq!(segment.station.as_deref(), Some("HGN"));
        assert_eq!(segment.start.as_deref(), Some("2016-01-01"));
        assert!(segment.location.is_none());

        assert_eq!(request.params.len(), 2);
        assert_eq!(request.params[0].key, "sample_mean_gt");
        assert_eq!(request.params[0].spec.internal, "smean");
        assert!(request.params[0].comparison.is_some());
        assert_eq!(request.params[1].key, "include");
    }

    #[test]
    fn test_get_rejections() {
        let registry = TypeRegistry::new();
        assert_eq!(kind(normalize_get(None, &registry, 4096)), ErrorKind::EmptyQuery);
        assert_eq!(kind(normalize_get(Some(""), &registry, 4096)), ErrorKind::EmptyQuery);
        assert_eq!(
            kind(normalize_get(Some("net=NL&&"), &registry, 4096)),
            ErrorKind::InvalidQuery
        );
        assert_eq!(
            kind(normalize_get(Some("net=NL&sta=HGN"), &registry, 8)),
            ErrorKind::QueryLengthExceeded
        );

        let error = normalize_get(Some("bogus=1"), &registry, 4096).unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidParameter);
        assert_eq!(error.subject.as_deref(), Some("bogus"));
    }

    #[test]
    fn test_get_duplicates_including_aliases() {
        let registry = TypeRegistry::new();
        let error = normalize_get(Some("net=NL&net=GE"), &registry, 4096).unwrap_err();
        assert_eq!(error.kind, ErrorKind::DoubleParameter);
        assert_eq!(error.subject.as_deref(), Some("net"));

        let error = normalize_get(Some("start=2016-01-01&starttime=2016-01-01"), &registry, 4096)
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::DoubleParameter);
        assert_eq!(error.subject.as_deref(), Some("starttime"));
    }

    #[test]
    fn test_get_percent_decodes_values() {
        let registry = TypeRegistry::new();
        let request = normalize_get(Some("sta=HG%3F&start=2016-01-01T00%3A00%3A00"), &registry, 4096)
            .unwrap();
        assert_eq!(request.segments[0].station.as_deref(), Some("HG?"));
        assert_eq!(request.segments[0].start.as_deref(), Some("2016-01-01T00:00:00"));
    }

    #[test]
    fn test_post_body_grammar() {
        let registry = TypeRegistry::new();
        let body = "include=all\nminlen=10\n\nNL HGN 02 BHZ 2012-01-01 2012-01-02\r\nNL HGN -- BHN 2012-01-03 2012-01-04\n";
        let request = normalize_post(body, &registry, 10).unwrap();

        assert_eq!(request.segments.len(), 2);
        assert_eq!(request.segments[1].location.as_deref(), Some("--"));
        assert_eq!(request.segments[1].channel.as_deref(), Some("BHN"));
        assert_eq!(request.params.len(), 2);
        assert_eq!(request.params[1].value, "10");
    }

    #[test]
    fn test_post_values_are_percent_decoded() {
        let registry = TypeRegistry::new();
        let body = "minlen=1%2E5\nencoding=STEIM1%2CSTEIM2\nNL HGN 02 BHZ 2012-01-01 2012-01-02";
        let request = normalize_post(body, &registry, 10).unwrap();

        assert_eq!(request.params[0].value, "1.5");
        assert_eq!(request.params[1].key, "encoding");
        assert_eq!(request.params[1].value, "STEIM1,STEIM2");

        let body = "minlen=1&include=all\nNL HGN 02 BHZ 2012-01-01 2012-01-02";
        assert_eq!(kind(normalize_post(body, &registry, 10)), ErrorKind::PostBodyInvalid);
    }

    #[test]
    fn test_post_double_parameter() {
        let registry = TypeRegistry::new();
        let body = "sample_mean=10\nsample_mean=10\nNL HGN 02 LOC 2012-01-01 2012-01-02";
        let error = normalize_post(body, &registry, 10).unwrap_err();
        assert_eq!(error.kind, ErrorKind::DoubleParameter);
        assert_eq!(error.subject.as_deref(), Some("sample_mean"));
    }

    #[test]
    fn test_post_rejections() {
        let registry = TypeRegistry::new();
        assert_eq!(kind(normalize_post("  \n", &registry, 10)), ErrorKind::PostBodyEmpty);
        assert_eq!(
            kind(normalize_post("NL HGN 02\nNL HGN 02 BHZ 2012-01-01 2012-01-02", &registry, 10)),
            ErrorKind::PostBodyInvalid
        );
        assert_eq!(
            kind(normalize_post("include=all", &registry, 10)),
            ErrorKind::PostEmptySegments
        );

        let error =
            normalize_post("net=NL\nNL HGN 02 BHZ 2012-01-01 2012-01-02", &registry, 10).unwrap_err();
        assert_eq!(error.kind, ErrorKind::PostSegmentInvalid);
        assert_eq!(error.subject.as_deref(), Some("net"));

        let body = "NL HGN 02 BHZ 2012-01-01 2012-01-02\n".repeat(3);
        assert_eq!(
            kind(normalize_post(&body, &registry, 2)),
            ErrorKind::PostSegmentsExceeded
        );
        assert!(normalize_post(&body, &registry, 3).is_ok());
    }

    #[tokio::test]
    async fn test_collect_body_stops_at_cap() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"NL HGN ")),
            Ok(Bytes::from_static(b"02 BHZ ")),
            Ok(Bytes::from_static(b"2012-01-01 2012-01-02")),
        ];

        let error = collect_body(stream::iter(chunks.into_iter()), 10)
            .await
            .unwrap_err();
        assert_eq!(error.kind, ErrorKind::PostLengthExceeded);

        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"a=b\n")), Ok(Bytes::from_static(b"c=d"))];
        let body = collect_body(stream::iter(chunks.into_iter()), 10).await.unwrap();
        assert_eq!(body, "a=b\nc=d");
    }
}
