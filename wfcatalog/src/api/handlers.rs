use super::error::{ErrorKind, ErrorResponder, QueryError};
use super::AppState;
use crate::engine::{Outcome, RequestContext};
use crate::query::translate_params;
use crate::request::{
    collect_body, normalize_get, normalize_post, resolve_options, validate_segments,
};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures::{stream, StreamExt};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

/// `GET /query` and `POST /query`.
pub async fn query(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let mut ctx = RequestContext::new(Uuid::new_v4().to_string(), method, client);

    match admit(&state, &mut ctx, request).await {
        Ok(()) => stream_response(state, ctx, path).await,
        Err(err) => error_response(&state, &ctx, &path, err),
    }
}

/// Runs every stage ahead of the datastore. The maintenance flag is read
/// once, before any parsing.
async fn admit(state: &AppState, ctx: &mut RequestContext, request: Request) -> Result<(), QueryError> {
    if state.config.is_closed() {
        return Err(QueryError::new(ErrorKind::ServiceClosed));
    }
    if !state.store.is_connected() {
        warn!(request_id = %ctx.request_id, "Datastore unavailable, scheduling reconnect");
        Arc::clone(&state.store).reconnect();
        return Err(QueryError::new(ErrorKind::MongoConnectionFailed));
    }

    let limits = &state.config.limits;
    let normalized = if ctx.method == Method::POST {
        let body = collect_body(request.into_body().into_data_stream(), limits.max_post_bytes).await?;
        normalize_post(&body, &state.registry, limits.max_segments)?
    } else {
        normalize_get(request.uri().query(), &state.registry, limits.max_query_bytes)?
    };

    let segments = validate_segments(&state.registry, normalized.segments, Utc::now())?;
    let (options, params) = resolve_options(normalized.params, &state.registry)?;

    let mut filter = translate_params(&state.registry, &params)?;
    if let Some(exclusion) = &state.config.exclusion {
        filter = filter.and(exclusion.clone());
    }

    ctx.queue(segments, options, filter);
    Ok(())
}

fn error_response(state: &AppState, ctx: &RequestContext, path: &str, err: QueryError) -> Response {
    if err.is_internal() {
        error!(
            request_id = %ctx.request_id,
            kind = ?err.kind,
            detail = err.detail.as_deref().unwrap_or_default(),
            "Request failed"
        );
    }
    ctx.log_summary(err.status().as_u16(), false);

    ErrorResponder {
        method: &ctx.method,
        path,
        submitted: ctx.submitted,
        version: &state.config.version,
        documentation_url: &state.config.documentation_url,
    }
    .respond(&err)
}

/// Starts the engine on its own task and waits for the first chunk to pick
/// the status: 200 with a streamed body, 204, or an error.
async fn stream_response(state: AppState, mut ctx: RequestContext, path: String) -> Response {
    let (tx, mut rx) = mpsc::channel::<Bytes>(state.config.limits.stream_buffer.max(1));
    let engine = Arc::clone(&state.engine);

    let method = ctx.method.clone();
    let submitted = ctx.submitted;
    let request_id = ctx.request_id.clone();

    let task = tokio::spawn(async move {
        let outcome = engine.run(&mut ctx, &tx).await;
        ctx.log_summary(outcome.status(), matches!(outcome, Outcome::Truncated));
        outcome
    });

    if let Some(first) = rx.recv().await {
        let rest = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        });
        let body = stream::once(async move { first })
            .chain(rest)
            .map(Ok::<_, Infallible>);

        let filename = format!(
            "{}-{}.json",
            state.config.name,
            submitted.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", filename),
            )
            .body(Body::from_stream(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let failure = match task.await {
        Ok(Outcome::Failed(err)) => err,
        Ok(_) => return StatusCode::NO_CONTENT.into_response(),
        Err(join_error) => QueryError {
            kind: ErrorKind::InternalError,
            subject: None,
            detail: Some(join_error.to_string()),
        },
    };

    if failure.is_internal() {
        error!(request_id = %request_id, kind = ?failure.kind, "Query failed before any output");
    }
    ErrorResponder {
        method: &method,
        path: &path,
        submitted,
        version: &state.config.version,
        documentation_url: &state.config.documentation_url,
    }
    .respond(&failure)
}
