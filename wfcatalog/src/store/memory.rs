use super::{
    Cursor, Datastore, Document, DocumentCursor, Projection, SegmentQuery, SEGMENT_LENGTH,
    STREAM_ID,
};
use crate::query::Filter;
use crate::registry::{Comparison, TypedValue};
use crate::request::parse_time;
use async_trait::async_trait;
use common::config::FixtureSettings;
use common::{Error, Result};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{info, warn};

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn ordering(value: &Value, target: &TypedValue) -> Option<Ordering> {
    match target {
        TypedValue::Float(_) | TypedValue::Int(_) => value.as_f64()?.partial_cmp(&target.as_f64()?),
        TypedValue::Text(text) => Some(value.as_str()?.cmp(text.as_str())),
        TypedValue::Time(time) => Some(parse_time(value.as_str()?)?.cmp(time)),
    }
}

fn compare_scalar(value: &Value, op: Comparison, target: &TypedValue) -> bool {
    let Some(ordering) = ordering(value, target) else {
        return op == Comparison::Ne;
    };
    match op {
        Comparison::Eq => ordering == Ordering::Equal,
        Comparison::Ne => ordering != Ordering::Equal,
        Comparison::Gt => ordering == Ordering::Greater,
        Comparison::Ge => ordering != Ordering::Less,
        Comparison::Lt => ordering == Ordering::Less,
        Comparison::Le => ordering != Ordering::Greater,
    }
}

/// Array fields match when any element does; `Ne` requires that none is
/// equal.
fn compare(value: Option<&Value>, op: Comparison, target: &TypedValue) -> bool {
    match value {
        None | Some(Value::Null) => op == Comparison::Ne,
        Some(Value::Array(items)) if op == Comparison::Ne => items
            .iter()
            .all(|item| compare_scalar(item, Comparison::Ne, target)),
        Some(Value::Array(items)) => items.iter().any(|item| compare_scalar(item, op, target)),
        Some(scalar) => compare_scalar(scalar, op, target),
    }
}

/// Evaluates a filter against one JSON document.
pub fn matches(filter: &Filter, document: &Document) -> bool {
    match filter {
        Filter::All(terms) => terms.iter().all(|term| matches(term, document)),
        Filter::Any(terms) => terms.iter().any(|term| matches(term, document)),
        Filter::Not(inner) => !matches(inner, document),
        Filter::Compare { field, op, value } => compare(lookup(document, field), *op, value),
        Filter::In { field, values } => {
            let found = lookup(document, field);
            values
                .iter()
                .any(|value| compare(found, Comparison::Eq, value))
        }
        Filter::Matches { field, pattern } => match lookup(document, field) {
            Some(Value::String(text)) => pattern.is_match(text),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|text| pattern.is_match(text)),
            _ => false,
        },
    }
}

struct DailyCursor {
    documents: Arc<[Document]>,
    position: usize,
    filter: Filter,
    projection: Projection,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl DocumentCursor for DailyCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        while self.position < self.documents.len() {
            if !self.connected.load(AtomicOrdering::SeqCst) {
                return Err(Error::Connection("memory store went offline".into()));
            }
            let document = &self.documents[self.position];
            self.position += 1;
            if matches(&self.filter, document) {
                return Ok(Some(self.projection.apply(document)));
            }
        }
        Ok(None)
    }
}

struct BufferedCursor(VecDeque<Document>);

#[async_trait]
impl DocumentCursor for BufferedCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        Ok(self.0.pop_front())
    }
}

/// Datastore held entirely in memory, optionally loaded from NDJSON files.
pub struct MemoryStore {
    daily: Arc<[Document]>,
    segments: Arc<[Document]>,
    connected: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(daily: Vec<Document>, segments: Vec<Document>) -> Self {
        Self {
            daily: daily.into(),
            segments: segments.into(),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub async fn load(fixtures: &FixtureSettings) -> Result<Self> {
        let daily = read_ndjson(&fixtures.daily).await?;
        let segments = match &fixtures.segments {
            Some(path) => read_ndjson(path).await?,
            None => Vec::new(),
        };
        info!(
            daily = daily.len(),
            segments = segments.len(),
            "Loaded memory datastore fixtures"
        );
        Ok(Self::new(daily, segments))
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, AtomicOrdering::SeqCst);
    }

    fn check_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Connection("memory store is offline".into()))
        }
    }
}

async fn read_ndjson(path: &str) -> Result<Vec<Document>> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match serde_json::from_str::<Value>(line)? {
            Value::Object(document) => Ok(document),
            other => Err(Error::InvalidInput(format!(
                "{}: expected one JSON object per line, got {}",
                path, other
            ))),
        })
        .collect()
}

fn segment_length(document: &Document) -> f64 {
    document
        .get(SEGMENT_LENGTH)
        .and_then(Value::as_f64)
        .unwrap_or_default()
}

#[async_trait]
impl Datastore for MemoryStore {
    fn is_connected(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }

    fn reconnect(self: Arc<Self>) {
        tokio::spawn(async move {
            warn!("Reconnecting memory datastore");
            self.set_connected(true);
        });
    }

    async fn find_daily(&self, filter: &Filter, projection: &Projection) -> Result<Cursor> {
        self.check_connected()?;
        Ok(Box::new(DailyCursor {
            documents: Arc::clone(&self.daily),
            position: 0,
            filter: filter.clone(),
            projection: projection.clone(),
            connected: Arc::clone(&self.connected),
        }))
    }

    async fn find_segments(&self, query: &SegmentQuery) -> Result<Cursor> {
        self.check_connected()?;

        let mut found: Vec<Document> = self
            .segments
            .iter()
            .filter(|segment| segment.get(STREAM_ID) == Some(&query.stream_id))
            .filter(|segment| segment_length(segment) >= query.min_length)
            .cloned()
            .collect();

        found.sort_by(|a, b| segment_length(a).total_cmp(&segment_length(b)));
        if query.longest_only {
            found.reverse();
            found.truncate(1);
        }

        Ok(Box::new(BufferedCursor(found.into())))
    }
}
