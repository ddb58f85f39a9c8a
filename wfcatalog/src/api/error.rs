use axum::{
    body::Body,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Stable error conditions surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyQuery,
    QueryLengthExceeded,
    InvalidQuery,
    InvalidParameter,
    DoubleParameter,
    WrongType,
    StartRequired,
    EndRequired,
    StartInvalid,
    EndInvalid,
    StartBeyondEnd,
    StartBeyondNow,
    QualityInvalid,
    IncludeUnsupported,
    GranularityUnsupported,
    FormatUnsupported,
    PostBodyEmpty,
    PostBodyInvalid,
    PostEmptySegments,
    PostSegmentInvalid,
    PostLengthExceeded,
    PostSegmentsExceeded,
    ServiceClosed,
    MongoConnectionFailed,
    InternalError,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorSpec {
    pub status: StatusCode,
    pub template: &'static str,
    /// Alternative wording used when the request came in as a POST body.
    pub post_template: Option<&'static str>,
}

const fn spec(status: StatusCode, template: &'static str) -> ErrorSpec {
    ErrorSpec {
        status,
        template,
        post_template: None,
    }
}

impl ErrorKind {
    pub fn spec(self) -> ErrorSpec {
        use ErrorKind::*;

        match self {
            EmptyQuery => spec(StatusCode::BAD_REQUEST, "The query string is empty"),
            QueryLengthExceeded => spec(
                StatusCode::BAD_REQUEST,
                "The query string exceeds the maximum allowed length",
            ),
            InvalidQuery => spec(StatusCode::BAD_REQUEST, "The query string is invalid"),
            InvalidParameter => spec(
                StatusCode::BAD_REQUEST,
                "Invalid parameter %s was submitted",
            ),
            DoubleParameter => ErrorSpec {
                status: StatusCode::BAD_REQUEST,
                template: "Parameter %s was submitted more than once",
                post_template: Some("Parameter %s occurs more than once in the POST body"),
            },
            WrongType => spec(
                StatusCode::BAD_REQUEST,
                "Parameter %s has an invalid type or format",
            ),
            StartRequired => spec(StatusCode::BAD_REQUEST, "A start time is required"),
            EndRequired => spec(StatusCode::BAD_REQUEST, "An end time is required"),
            StartInvalid => spec(StatusCode::BAD_REQUEST, "The start time is invalid"),
            EndInvalid => spec(StatusCode::BAD_REQUEST, "The end time is invalid"),
            StartBeyondEnd => spec(
                StatusCode::BAD_REQUEST,
                "The start time is beyond the end time",
            ),
            StartBeyondNow => spec(
                StatusCode::BAD_REQUEST,
                "The start time is beyond the current time",
            ),
            QualityInvalid => spec(
                StatusCode::BAD_REQUEST,
                "Quality code %s is not supported",
            ),
            IncludeUnsupported => spec(
                StatusCode::BAD_REQUEST,
                "Inclusion level %s is not supported",
            ),
            GranularityUnsupported => spec(
                StatusCode::BAD_REQUEST,
                "Granularity %s is not supported",
            ),
            FormatUnsupported => spec(StatusCode::BAD_REQUEST, "Format %s is not supported"),
            PostBodyEmpty => spec(StatusCode::BAD_REQUEST, "The POST body is empty"),
            PostBodyInvalid => spec(StatusCode::BAD_REQUEST, "The POST body is invalid"),
            PostEmptySegments => spec(
                StatusCode::BAD_REQUEST,
                "The POST body contains no segments",
            ),
            PostSegmentInvalid => spec(
                StatusCode::BAD_REQUEST,
                "Parameter %s may only be given in a segment line",
            ),
            PostLengthExceeded => spec(
                StatusCode::BAD_REQUEST,
                "The POST body exceeds the maximum allowed length",
            ),
            PostSegmentsExceeded => spec(
                StatusCode::PAYLOAD_TOO_LARGE,
                "The POST body exceeds the maximum number of segments",
            ),
            ServiceClosed => spec(
                StatusCode::SERVICE_UNAVAILABLE,
                "The service is closed for maintenance",
            ),
            MongoConnectionFailed => spec(
                StatusCode::SERVICE_UNAVAILABLE,
                "The service could not connect to the database",
            ),
            InternalError => spec(
                StatusCode::INTERNAL_SERVER_ERROR,
                "The service encountered an internal error",
            ),
        }
    }
}

/// A terminal pipeline failure: the error kind plus the public field name or
/// value substituted into the message template.
#[derive(Debug)]
pub struct QueryError {
    pub kind: ErrorKind,
    pub subject: Option<String>,
    /// Server-side detail, logged but never rendered.
    pub detail: Option<String>,
}

impl QueryError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            subject: None,
            detail: None,
        }
    }

    pub fn with(kind: ErrorKind, subject: impl Into<String>) -> Self {
        Self {
            kind,
            subject: Some(subject.into()),
            detail: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.kind.spec().status
    }

    pub fn is_internal(&self) -> bool {
        self.status().is_server_error()
    }

    pub fn message(&self) -> String {
        self.render(self.kind.spec().template)
    }

    fn render(&self, template: &str) -> String {
        template.replace("%s", self.subject.as_deref().unwrap_or(""))
    }

    fn message_for(&self, method: &Method) -> String {
        let spec = self.kind.spec();
        match spec.post_template {
            Some(template) if method == Method::POST => self.render(template),
            _ => self.render(spec.template),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for QueryError {}

impl From<common::Error> for QueryError {
    fn from(err: common::Error) -> Self {
        let kind = if err.is_connection() {
            ErrorKind::MongoConnectionFailed
        } else {
            ErrorKind::InternalError
        };
        Self {
            kind,
            subject: None,
            detail: Some(err.to_string()),
        }
    }
}

/// Renders errors in the per-method layouts clients expect.
pub struct ErrorResponder<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub submitted: DateTime<Utc>,
    pub version: &'a str,
    pub documentation_url: &'a str,
}

impl ErrorResponder<'_> {
    pub fn body(&self, error: &QueryError) -> String {
        let status = error.status();
        let status_line = format!(
            "Error {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        );
        let message = error.message_for(self.method);

        if self.method == Method::POST {
            return format!("{} {}", status_line, message);
        }

        [
            status_line,
            message,
            format!("Usage details are available from {}", self.documentation_url),
            "Request:".to_string(),
            self.path.to_string(),
            "Request Submitted:".to_string(),
            self.submitted.to_rfc3339_opts(SecondsFormat::Millis, true),
            "Service Version:".to_string(),
            self.version.to_string(),
        ]
        .join("\n")
    }

    pub fn respond(&self, error: &QueryError) -> Response {
        Response::builder()
            .status(error.status())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from(self.body(error)))
            .unwrap_or_else(|_| error.status().into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn responder(method: &Method) -> ErrorResponder<'_> {
        ErrorResponder {
            method,
            path: "/query?net=NL&sample_mean=x",
            submitted: Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap(),
            version: "1.0.0",
            documentation_url: "https://example.org/wfcatalog",
        }
    }

    #[test]
    fn test_get_body_has_nine_lines() {
        let error = QueryError::with(ErrorKind::WrongType, "sample_mean");
        let body = responder(&Method::GET).body(&error);
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "Error 400: Bad Request");
        assert_eq!(lines[1], "Parameter sample_mean has an invalid type or format");
        assert_eq!(lines[3], "Request:");
        assert_eq!(lines[4], "/query?net=NL&sample_mean=x");
        assert_eq!(lines[5], "Request Submitted:");
        assert_eq!(lines[6], "2016-03-01T12:00:00.000Z");
        assert_eq!(lines[7], "Service Version:");
        assert_eq!(lines[8], "1.0.0");
    }

    #[test]
    fn test_post_body_is_single_line() {
        let error = QueryError::with(ErrorKind::DoubleParameter, "sample_mean");
        let body = responder(&Method::POST).body(&error);

        assert_eq!(
            body,
            "Error 400: Bad Request Parameter sample_mean occurs more than once in the POST body"
        );
        assert!(!body.contains('\n'));
    }

    #[test]
    fn test_segment_limit_is_payload_too_large() {
        let error = QueryError::new(ErrorKind::PostSegmentsExceeded);
        assert_eq!(error.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!error.is_internal());
    }

    #[test]
    fn test_infrastructure_errors_are_never_client_errors() {
        let internal: QueryError = common::Error::Internal("no pattern".into()).into();
        assert_eq!(internal.kind, ErrorKind::InternalError);
        assert!(internal.is_internal());

        let connection: QueryError = common::Error::Connection("gone".into()).into();
        assert_eq!(connection.kind, ErrorKind::MongoConnectionFailed);
    }
}
