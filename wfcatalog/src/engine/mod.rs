//! Streaming query engine: runs one query per segment, joins continuous
//! segments onto their daily records and writes a JSON array to the
//! response channel one document at a time.

pub mod projection;

use crate::api::error::{ErrorKind, QueryError};
use crate::query::{segment_filter, Filter};
use crate::registry::TypeRegistry;
use crate::request::{Options, Segment};
use crate::store::{Cursor, Datastore, Document, SegmentQuery};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use projection::{
    daily_projection, render_daily, render_segment, CONTINUOUS, DOCUMENT_ID, SEGMENTS_SECTION,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Nginx-style status recorded when the client went away mid-response.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub documents: usize,
    pub bytes: usize,
    pub csegments: usize,
    pub query_time: Duration,
}

/// Per-request state. Never shared between requests.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub submitted: DateTime<Utc>,
    pub started: Instant,
    pub method: Method,
    pub client: String,
    pub segments: VecDeque<Segment>,
    pub segment_count: usize,
    pub options: Options,
    pub filter: Filter,
    pub counters: Counters,
}

impl RequestContext {
    pub fn new(request_id: String, method: Method, client: String) -> Self {
        Self {
            request_id,
            submitted: Utc::now(),
            started: Instant::now(),
            method,
            client,
            segments: VecDeque::new(),
            segment_count: 0,
            options: Options::default(),
            filter: Filter::default(),
            counters: Counters::default(),
        }
    }

    pub fn queue(&mut self, segments: Vec<Segment>, options: Options, filter: Filter) {
        self.segment_count = segments.len();
        self.segments = segments.into();
        self.options = options;
        self.filter = filter;
    }

    /// One summary event per finished request.
    pub fn log_summary(&self, status: u16, truncated: bool) {
        info!(
            status,
            client = %self.client,
            method = %self.method,
            request_id = %self.request_id,
            segments = self.segment_count,
            documents = self.counters.documents,
            bytes = self.counters.bytes,
            csegments = self.counters.csegments,
            query_ms = self.counters.query_time.as_millis() as u64,
            total_ms = self.started.elapsed().as_millis() as u64,
            truncated,
            "Request completed"
        );
    }
}

/// How a streamed request ended.
#[derive(Debug)]
pub enum Outcome {
    Complete,
    /// Stopped early at the response byte cap; the array is still closed.
    Truncated,
    Empty,
    Disconnected,
    /// Datastore or serialization failure. The array is left open when
    /// documents were already sent.
    Failed(QueryError),
}

impl Outcome {
    pub fn status(&self) -> u16 {
        match self {
            Outcome::Complete | Outcome::Truncated => StatusCode::OK.as_u16(),
            Outcome::Empty => StatusCode::NO_CONTENT.as_u16(),
            Outcome::Disconnected => CLIENT_CLOSED_REQUEST,
            Outcome::Failed(err) => err.status().as_u16(),
        }
    }
}

/// Frames documents as one JSON array across many chunks.
#[derive(Debug, Default)]
struct JsonArrayWriter {
    opened: bool,
}

impl JsonArrayWriter {
    fn document(&mut self, document: &Document) -> Result<Bytes, QueryError> {
        let mut buffer = vec![if self.opened { b',' } else { b'[' }];
        serde_json::to_writer(&mut buffer, document).map_err(|e| QueryError {
            kind: ErrorKind::InternalError,
            subject: None,
            detail: Some(e.to_string()),
        })?;
        self.opened = true;
        Ok(Bytes::from(buffer))
    }

    fn close(&self) -> Bytes {
        Bytes::from_static(b"]")
    }
}

enum State {
    QuerySegment,
    StreamParent(Cursor),
    JoinChildren {
        parent: Document,
        parents: Cursor,
        children: Cursor,
        found: Vec<Value>,
    },
}

/// What happened to a written document.
enum Written {
    Continue,
    BudgetReached,
    Disconnected,
}

pub struct QueryEngine {
    store: Arc<dyn Datastore>,
    registry: Arc<TypeRegistry>,
    max_response_bytes: usize,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn Datastore>,
        registry: Arc<TypeRegistry>,
        max_response_bytes: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_response_bytes,
        }
    }

    async fn query_segment(
        &self,
        ctx: &mut RequestContext,
        segment: &Segment,
    ) -> Result<Cursor, QueryError> {
        let filter = ctx.filter.clone().and(segment_filter(segment)?);
        debug!(
            request_id = %ctx.request_id,
            segment = ctx.segment_count - ctx.segments.len(),
            filter = %filter,
            "Querying daily streams"
        );

        let started = Instant::now();
        let cursor = self
            .store
            .find_daily(&filter, &daily_projection(ctx.options.include))
            .await;
        ctx.counters.query_time += started.elapsed();
        Ok(cursor?)
    }

    async fn query_children(
        &self,
        ctx: &mut RequestContext,
        parent: &Document,
    ) -> Result<Cursor, QueryError> {
        let query = SegmentQuery {
            stream_id: parent.get(DOCUMENT_ID).cloned().unwrap_or(Value::Null),
            min_length: ctx.options.min_length,
            longest_only: ctx.options.longest_only,
        };

        let started = Instant::now();
        let cursor = self.store.find_segments(&query).await;
        ctx.counters.query_time += started.elapsed();
        Ok(cursor?)
    }

    async fn write(
        &self,
        ctx: &mut RequestContext,
        writer: &mut JsonArrayWriter,
        tx: &mpsc::Sender<Bytes>,
        document: &Document,
    ) -> Result<Written, QueryError> {
        let chunk = writer.document(document)?;
        ctx.counters.documents += 1;
        ctx.counters.bytes += chunk.len();

        if tx.send(chunk).await.is_err() {
            return Ok(Written::Disconnected);
        }
        if self.max_response_bytes > 0 && ctx.counters.bytes >= self.max_response_bytes {
            return Ok(Written::BudgetReached);
        }
        Ok(Written::Continue)
    }

    /// Drives the segment queue to completion, writing chunks to `tx`. A
    /// closed channel means the client disconnected.
    pub async fn run(&self, ctx: &mut RequestContext, tx: &mpsc::Sender<Bytes>) -> Outcome {
        let mut writer = JsonArrayWriter::default();

        let truncated = match self.stream(ctx, &mut writer, tx).await {
            Ok(Some(written)) => match written {
                Written::Disconnected => return Outcome::Disconnected,
                Written::BudgetReached => true,
                Written::Continue => false,
            },
            Ok(None) => false,
            Err(err) => {
                error!(request_id = %ctx.request_id, "Query failed: {}", err.detail.as_deref().unwrap_or(&err.message()));
                return Outcome::Failed(err);
            }
        };

        if ctx.counters.documents == 0 {
            return Outcome::Empty;
        }
        if tx.send(writer.close()).await.is_err() {
            return Outcome::Disconnected;
        }
        if truncated {
            Outcome::Truncated
        } else {
            Outcome::Complete
        }
    }

    /// Returns the write result that stopped the stream early, if any.
    async fn stream(
        &self,
        ctx: &mut RequestContext,
        writer: &mut JsonArrayWriter,
        tx: &mpsc::Sender<Bytes>,
    ) -> Result<Option<Written>, QueryError> {
        let mut state = State::QuerySegment;

        loop {
            if tx.is_closed() {
                return Ok(Some(Written::Disconnected));
            }

            state = match state {
                State::QuerySegment => match ctx.segments.pop_front() {
                    Some(segment) => State::StreamParent(self.query_segment(ctx, &segment).await?),
                    None => return Ok(None),
                },
                State::StreamParent(mut parents) => match parents.next().await? {
                    None => State::QuerySegment,
                    Some(parent) if !ctx.options.csegments || is_continuous(&parent) => {
                        let document = render_daily(&self.registry, &parent, ctx.options.include);
                        match self.write(ctx, writer, tx, &document).await? {
                            Written::Continue => State::StreamParent(parents),
                            stop => return Ok(Some(stop)),
                        }
                    }
                    Some(parent) => {
                        let children = self.query_children(ctx, &parent).await?;
                        State::JoinChildren {
                            parent,
                            parents,
                            children,
                            found: Vec::new(),
                        }
                    }
                },
                State::JoinChildren {
                    parent,
                    parents,
                    mut children,
                    mut found,
                } => match children.next().await? {
                    Some(child) => {
                        found.push(render_segment(&child));
                        ctx.counters.csegments += 1;
                        State::JoinChildren {
                            parent,
                            parents,
                            children,
                            found,
                        }
                    }
                    None => {
                        let mut document =
                            render_daily(&self.registry, &parent, ctx.options.include);
                        document.insert(SEGMENTS_SECTION.to_string(), Value::Array(found));
                        match self.write(ctx, writer, tx, &document).await? {
                            Written::Continue => State::StreamParent(parents),
                            stop => return Ok(Some(stop)),
                        }
                    }
                },
            };
        }
    }
}

fn is_continuous(document: &Document) -> bool {
    document
        .get(CONTINUOUS)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
