use super::s3::register_object_store;
use super::{
    Cursor, Datastore, Document, DocumentCursor, Projection, SegmentQuery, DAILY_TABLE,
    SEGMENTS_TABLE, SEGMENT_LENGTH, STREAM_ID,
};
use crate::query::Filter;
use crate::registry::{Comparison, TypedValue};
use crate::utils::arrow::batch_row_to_json;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use common::config::DatastoreSettings;
use common::{Error, Result};
use datafusion::common::ScalarValue;
use datafusion::error::DataFusionError;
use datafusion::functions::core::expr_fn::get_field;
use datafusion::functions_nested::expr_fn::{array_has, array_has_any, make_array};
use datafusion::logical_expr::{ident, lit, not, Expr};
use datafusion::physical_plan::SendableRecordBatchStream;
use datafusion::prelude::{DataFrame, ParquetReadOptions, SessionContext};
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Failures that mean the underlying storage went away rather than the query
/// being wrong.
fn is_storage_failure(err: &DataFusionError) -> bool {
    matches!(
        err,
        DataFusionError::ObjectStore(_) | DataFusionError::IoError(_)
    )
}

fn classify(err: DataFusionError, connected: &AtomicBool) -> Error {
    if is_storage_failure(&err) {
        connected.store(false, Ordering::SeqCst);
        Error::Connection(err.to_string())
    } else {
        Error::DataFusion(err)
    }
}

/// Column expression for a dotted document path.
fn path_expr(path: &str) -> Expr {
    let mut parts = path.split('.');
    let root = ident(parts.next().unwrap_or(path));
    parts.fold(root, |expr, part| get_field(expr, part.to_string()))
}

fn is_list(schema: &Schema, path: &str) -> bool {
    let root = path.split('.').next().unwrap_or(path);
    schema.field_with_name(root).is_ok_and(|field| {
        matches!(
            field.data_type(),
            DataType::List(_) | DataType::LargeList(_)
        )
    })
}

fn is_timestamp(schema: &Schema, path: &str) -> bool {
    schema
        .field_with_name(path)
        .is_ok_and(|field| matches!(field.data_type(), DataType::Timestamp(_, _)))
}

fn literal(schema: &Schema, path: &str, value: &TypedValue) -> Expr {
    match value {
        TypedValue::Float(v) => lit(*v),
        TypedValue::Int(v) => lit(*v),
        TypedValue::Text(v) => lit(v.clone()),
        TypedValue::Time(v) if is_timestamp(schema, path) => lit(ScalarValue::TimestampMillisecond(
            Some(v.timestamp_millis()),
            Some("UTC".into()),
        )),
        TypedValue::Time(v) => lit(v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    }
}

fn json_literal(value: &Value) -> Result<Expr> {
    match value {
        Value::String(v) => Ok(lit(v.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(lit)
            .or_else(|| n.as_f64().map(lit))
            .ok_or_else(|| Error::InvalidInput(format!("unsupported stream id {}", n))),
        other => Err(Error::InvalidInput(format!("unsupported stream id {}", other))),
    }
}

/// Compiles a filter into a DataFusion predicate over `schema`. List columns
/// match when any element does.
pub fn compile(filter: &Filter, schema: &Schema) -> Result<Expr> {
    Ok(match filter {
        Filter::All(terms) => terms
            .iter()
            .map(|term| compile(term, schema))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .reduce(Expr::and)
            .unwrap_or_else(|| lit(true)),
        Filter::Any(terms) => terms
            .iter()
            .map(|term| compile(term, schema))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .reduce(Expr::or)
            .unwrap_or_else(|| lit(false)),
        // A missing value is never excluded by a negation
        Filter::Not(inner) => {
            let inner = compile(inner, schema)?;
            not(inner.clone()).or(inner.is_null())
        }
        Filter::Compare { field, op, value } if is_list(schema, field) => {
            let element = literal(schema, field, value);
            match op {
                Comparison::Eq => array_has(path_expr(field), element),
                Comparison::Ne => not(array_has(path_expr(field), element)),
                other => {
                    return Err(Error::Internal(format!(
                        "comparison {} on list column {}",
                        other.symbol(),
                        field
                    )));
                }
            }
        }
        Filter::Compare { field, op, value } => {
            let column = path_expr(field);
            let value = literal(schema, field, value);
            match op {
                Comparison::Eq => column.eq(value),
                Comparison::Ne => column.clone().not_eq(value).or(column.is_null()),
                Comparison::Gt => column.gt(value),
                Comparison::Ge => column.gt_eq(value),
                Comparison::Lt => column.lt(value),
                Comparison::Le => column.lt_eq(value),
            }
        }
        Filter::In { field, values } => {
            let values: Vec<Expr> = values
                .iter()
                .map(|value| literal(schema, field, value))
                .collect();
            if is_list(schema, field) {
                array_has_any(path_expr(field), make_array(values))
            } else {
                path_expr(field).in_list(values, false)
            }
        }
        Filter::Matches { field, .. } if is_list(schema, field) => {
            return Err(Error::Internal(format!("pattern match on list column {}", field)));
        }
        Filter::Matches { field, pattern } => path_expr(field).like(lit(pattern.to_like())),
    })
}

fn project(df: DataFrame, projection: &Projection) -> Result<DataFrame> {
    let columns: Vec<Expr> = df
        .schema()
        .fields()
        .iter()
        .filter(|field| projection.keeps(field.name()))
        .map(|field| ident(field.name()))
        .collect();
    Ok(df.select(columns)?)
}

/// Yields the rows of a record batch stream one at a time.
struct BatchCursor {
    stream: SendableRecordBatchStream,
    batch: Option<RecordBatch>,
    row: usize,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl DocumentCursor for BatchCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        loop {
            if let Some(batch) = &self.batch {
                if self.row < batch.num_rows() {
                    let mut document = batch_row_to_json(batch, self.row)?;
                    self.row += 1;
                    // Absent fields come back as nulls
                    document.retain(|_, value| !value.is_null());
                    return Ok(Some(document));
                }
            }

            match self.stream.next().await {
                Some(Ok(batch)) => {
                    self.batch = Some(batch);
                    self.row = 0;
                }
                Some(Err(err)) => return Err(classify(err, &self.connected)),
                None => return Ok(None),
            }
        }
    }
}

/// Parquet-backed datastore queried through DataFusion.
pub struct ParquetStore {
    ctx: SessionContext,
    settings: Option<DatastoreSettings>,
    connected: Arc<AtomicBool>,
}

impl ParquetStore {
    /// Registers both tables. A failed registration leaves the store
    /// disconnected so requests report it and trigger a reconnect.
    pub async fn connect(settings: &DatastoreSettings) -> Self {
        let ctx = SessionContext::new();
        let connected = match register_tables(&ctx, settings).await {
            Ok(()) => {
                info!(
                    daily = %settings.daily_path,
                    segments = %settings.segments_path,
                    "Registered datastore tables"
                );
                true
            }
            Err(e) => {
                error!("Failed to register datastore tables: {}", e);
                false
            }
        };

        Self {
            ctx,
            settings: Some(settings.clone()),
            connected: Arc::new(AtomicBool::new(connected)),
        }
    }

    /// Wraps a context whose tables are already registered.
    pub fn from_context(ctx: SessionContext) -> Self {
        Self {
            ctx,
            settings: None,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    async fn execute(&self, df: DataFrame) -> Result<Cursor> {
        let stream = df
            .execute_stream()
            .await
            .map_err(|e| classify(e, &self.connected))?;
        Ok(Box::new(BatchCursor {
            stream,
            batch: None,
            row: 0,
            connected: Arc::clone(&self.connected),
        }))
    }

    async fn table(&self, name: &str) -> Result<DataFrame> {
        self.ctx
            .table(name)
            .await
            .map_err(|e| classify(e, &self.connected))
    }
}

async fn register_tables(ctx: &SessionContext, settings: &DatastoreSettings) -> Result<()> {
    for (table, path) in [
        (DAILY_TABLE, &settings.daily_path),
        (SEGMENTS_TABLE, &settings.segments_path),
    ] {
        register_object_store(ctx, path, settings.object_store.as_ref())?;
        ctx.deregister_table(table)?;
        ctx.register_parquet(table, path, ParquetReadOptions::default())
            .await
            .map_err(|e| {
                Error::Connection(format!("Failed to register {} at {}: {}", table, path, e))
            })?;
    }
    Ok(())
}

#[async_trait]
impl Datastore for ParquetStore {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect(self: Arc<Self>) {
        tokio::spawn(async move {
            let Some(settings) = &self.settings else {
                self.connected.store(true, Ordering::SeqCst);
                return;
            };
            match register_tables(&self.ctx, settings).await {
                Ok(()) => {
                    info!("Datastore reconnected");
                    self.connected.store(true, Ordering::SeqCst);
                }
                Err(e) => warn!("Datastore reconnect failed: {}", e),
            }
        });
    }

    async fn find_daily(&self, filter: &Filter, projection: &Projection) -> Result<Cursor> {
        let df = self.table(DAILY_TABLE).await?;
        let schema = df.schema().as_arrow().clone();
        let df = df.filter(compile(filter, &schema)?)?;
        self.execute(project(df, projection)?).await
    }

    async fn find_segments(&self, query: &SegmentQuery) -> Result<Cursor> {
        let df = self
            .table(SEGMENTS_TABLE)
            .await?
            .filter(
                ident(STREAM_ID)
                    .eq(json_literal(&query.stream_id)?)
                    .and(ident(SEGMENT_LENGTH).gt_eq(lit(query.min_length))),
            )?
            .sort(vec![ident(SEGMENT_LENGTH).sort(!query.longest_only, false)])?;

        let df = if query.longest_only {
            df.limit(0, Some(1))?
        } else {
            df
        };
        self.execute(df).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Wildcard;
    use arrow::array::{
        ArrayRef, Float64Array, Int64Array, ListBuilder, StringArray, StringBuilder, StructArray,
        TimestampMillisecondArray,
    };
    use arrow::datatypes::{Field, Fields, TimeUnit};
    use chrono::{TimeZone, Utc};
    use datafusion::datasource::MemTable;
    use serde_json::json;

    fn daily_batch() -> RecordBatch {
        let mut encodings = ListBuilder::new(StringBuilder::new());
        for values in [&["STEIM2"][..], &["STEIM1", "INT32"][..], &["STEIM2"][..]] {
            for value in values {
                encodings.values().append_value(value);
            }
            encodings.append(true);
        }

        let flags = StructArray::from(vec![(
            Arc::new(Field::new("spi", DataType::Float64, true)),
            Arc::new(Float64Array::from(vec![Some(0.5), Some(0.0), None])) as ArrayRef,
        )]);

        let day = |d| Utc.with_ymd_and_hms(2016, 1, d, 0, 0, 0).unwrap().timestamp_millis();

        let schema = Schema::new(vec![
            Field::new("_id", DataType::Int64, false),
            Field::new("net", DataType::Utf8, false),
            Field::new("sta", DataType::Utf8, false),
            Field::new("loc", DataType::Utf8, false),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                false,
            ),
            Field::new(
                "enc",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
            Field::new("smean", DataType::Float64, true),
            Field::new(
                "dq_flags",
                DataType::Struct(Fields::from(vec![Field::new("spi", DataType::Float64, true)])),
                true,
            ),
            Field::new("fileId", DataType::Utf8, true),
        ]);

        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["NL", "NL", "KN"])),
                Arc::new(StringArray::from(vec!["HGN", "WIT", "HGN"])),
                Arc::new(StringArray::from(vec!["02", "", ""])),
                Arc::new(
                    TimestampMillisecondArray::from(vec![day(1), day(2), day(3)])
                        .with_timezone("UTC"),
                ),
                Arc::new(encodings.finish()),
                Arc::new(Float64Array::from(vec![Some(12.0), Some(8.0), None])),
                Arc::new(flags),
                Arc::new(StringArray::from(vec!["a", "b", "c"])),
            ],
        )
        .unwrap()
    }

    fn segments_batch() -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new(STREAM_ID, DataType::Int64, false),
            Field::new(SEGMENT_LENGTH, DataType::Float64, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![1, 1, 1, 2])),
                Arc::new(Float64Array::from(vec![600.0, 3600.0, 60.0, 86400.0])),
            ],
        )
        .unwrap()
    }

    fn store() -> ParquetStore {
        let ctx = SessionContext::new();
        for (name, batch) in [(DAILY_TABLE, daily_batch()), (SEGMENTS_TABLE, segments_batch())] {
            let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).unwrap();
            ctx.register_table(name, Arc::new(table)).unwrap();
        }
        ParquetStore::from_context(ctx)
    }

    async fn drain(mut cursor: Cursor) -> Vec<Document> {
        let mut documents = Vec::new();
        while let Some(document) = cursor.next().await.unwrap() {
            documents.push(document);
        }
        documents
    }

    async fn ids(store: &ParquetStore, filter: Filter) -> Vec<i64> {
        let cursor = store
            .find_daily(&filter, &Projection::ExcludeOnly(vec!["fileId".into()]))
            .await
            .unwrap();
        let mut ids: Vec<i64> = drain(cursor)
            .await
            .iter()
            .map(|document| document["_id"].as_i64().unwrap())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_compiled_filters() {
        let store = store();

        let range = Filter::Compare {
            field: "ts".into(),
            op: Comparison::Ge,
            value: TypedValue::Time(Utc.with_ymd_and_hms(2016, 1, 2, 0, 0, 0).unwrap()),
        }
        .and(Filter::Compare {
            field: "ts".into(),
            op: Comparison::Lt,
            value: TypedValue::Time(Utc.with_ymd_and_hms(2016, 1, 3, 0, 0, 0).unwrap()),
        });
        assert_eq!(ids(&store, range).await, vec![2]);

        let encoding = Filter::In {
            field: "enc".into(),
            values: vec![TypedValue::Text("INT32".into())],
        };
        assert_eq!(ids(&store, encoding).await, vec![2]);

        let steim2 = Filter::equals("enc", TypedValue::Text("STEIM2".into()));
        assert_eq!(ids(&store, steim2).await, vec![1, 3]);

        let spikes = Filter::Compare {
            field: "dq_flags.spi".into(),
            op: Comparison::Gt,
            value: TypedValue::Float(0.1),
        };
        assert_eq!(ids(&store, spikes).await, vec![1]);

        let pattern = Filter::Matches {
            field: "sta".into(),
            pattern: Wildcard::new("H?N").unwrap(),
        };
        assert_eq!(ids(&store, pattern).await, vec![1, 3]);

        let excluded = Filter::Not(Box::new(Filter::equals("net", TypedValue::Text("KN".into()))));
        assert_eq!(ids(&store, excluded).await, vec![1, 2]);

        assert_eq!(ids(&store, Filter::default()).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_projection_and_null_fields() {
        let store = store();
        let filter = Filter::equals("_id", TypedValue::Int(3));

        let documents = drain(
            store
                .find_daily(&filter, &Projection::ExcludeOnly(vec!["fileId".into()]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(documents.len(), 1);
        assert!(!documents[0].contains_key("fileId"));
        assert!(!documents[0].contains_key("smean"));
        assert_eq!(documents[0]["ts"], json!("2016-01-03T00:00:00.000Z"));

        let documents = drain(
            store
                .find_daily(&filter, &Projection::Include(vec!["_id".into(), "net".into()]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(documents[0].len(), 2);
    }

    #[tokio::test]
    async fn test_segment_query() {
        let store = store();

        let lengths = |documents: Vec<Document>| -> Vec<f64> {
            documents
                .iter()
                .map(|d| d[SEGMENT_LENGTH].as_f64().unwrap())
                .collect()
        };

        let all = store
            .find_segments(&SegmentQuery {
                stream_id: json!(1),
                min_length: 600.0,
                longest_only: false,
            })
            .await
            .unwrap();
        assert_eq!(lengths(drain(all).await), vec![600.0, 3600.0]);

        let longest = store
            .find_segments(&SegmentQuery {
                stream_id: json!(1),
                min_length: 0.0,
                longest_only: true,
            })
            .await
            .unwrap();
        assert_eq!(lengths(drain(longest).await), vec![3600.0]);
    }

    #[test]
    fn test_list_comparison_is_internal_error() {
        let schema = daily_batch().schema();
        let filter = Filter::Compare {
            field: "enc".into(),
            op: Comparison::Gt,
            value: TypedValue::Text("A".into()),
        };
        assert!(matches!(compile(&filter, &schema), Err(Error::Internal(_))));
    }
}
