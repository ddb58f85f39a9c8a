//! Datastore collaborator: daily stream records and their continuous
//! segment children, read through cursors one document at a time.

pub mod parquet;
pub mod memory;
pub mod s3;

pub use parquet::ParquetStore;
pub use memory::MemoryStore;

use crate::query::Filter;
use async_trait::async_trait;
use common::Result;
use serde_json::{Map, Value};
use std::sync::Arc;

pub type Document = Map<String, Value>;

pub const DAILY_TABLE: &str = "daily_streams";
pub const SEGMENTS_TABLE: &str = "c_segments";

/// Back-reference from a continuous segment to its daily record.
pub const STREAM_ID: &str = "streamId";
/// Length in seconds of a continuous segment.
pub const SEGMENT_LENGTH: &str = "slen";

/// Which fields of a daily record to fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include(Vec<String>),
    /// Every field except these.
    ExcludeOnly(Vec<String>),
}

impl Projection {
    pub fn keeps(&self, field: &str) -> bool {
        match self {
            Projection::Include(fields) => fields.iter().any(|f| f == field),
            Projection::ExcludeOnly(fields) => !fields.iter().any(|f| f == field),
        }
    }

    pub fn apply(&self, document: &Document) -> Document {
        document
            .iter()
            .filter(|(key, _)| self.keeps(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Child query for one daily record.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentQuery {
    pub stream_id: Value,
    /// Inclusive lower bound on segment length.
    pub min_length: f64,
    /// Return only the longest segment: sorted by length descending, limit 1,
    /// since an ascending sort with limit 1 would yield the shortest.
    pub longest_only: bool,
}

#[async_trait]
pub trait DocumentCursor: Send {
    async fn next(&mut self) -> Result<Option<Document>>;
}

pub type Cursor = Box<dyn DocumentCursor>;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Cheap connectivity check, no I/O.
    fn is_connected(&self) -> bool;

    /// Starts a background reconnect attempt and returns immediately.
    fn reconnect(self: Arc<Self>);

    async fn find_daily(&self, filter: &Filter, projection: &Projection) -> Result<Cursor>;

    async fn find_segments(&self, query: &SegmentQuery) -> Result<Cursor>;
}
