use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, LargeListArray, LargeStringArray, ListArray, StringArray, StructArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray, UInt8Array, UInt16Array, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, SecondsFormat, Utc};
use common::{Error, Result};
use serde_json::{Map, Number, Value};

fn downcast<'a, T: 'static>(array: &'a dyn Array) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::Internal(format!(
            "column of type {} has an unexpected array layout",
            array.data_type()
        ))
    })
}

fn timestamp(datetime: Option<DateTime<Utc>>) -> Value {
    datetime
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
        .unwrap_or(Value::Null)
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// Converts one row of a record batch into a JSON object keyed by column name.
pub fn batch_row_to_json(batch: &RecordBatch, row_idx: usize) -> Result<Map<String, Value>> {
    let schema = batch.schema();
    let mut row = Map::with_capacity(batch.num_columns());

    for (col_idx, field) in schema.fields().iter().enumerate() {
        let value = arrow_array_to_json(batch.column(col_idx).as_ref(), row_idx)?;
        row.insert(field.name().clone(), value);
    }

    Ok(row)
}

pub fn arrow_array_to_json(array: &dyn Array, index: usize) -> Result<Value> {
    if array.is_null(index) {
        return Ok(Value::Null);
    }

    Ok(match array.data_type() {
        DataType::Boolean => Value::Bool(downcast::<BooleanArray>(array)?.value(index)),
        DataType::Int8 => Value::from(downcast::<Int8Array>(array)?.value(index)),
        DataType::Int16 => Value::from(downcast::<Int16Array>(array)?.value(index)),
        DataType::Int32 => Value::from(downcast::<Int32Array>(array)?.value(index)),
        DataType::Int64 => Value::from(downcast::<Int64Array>(array)?.value(index)),
        DataType::UInt8 => Value::from(downcast::<UInt8Array>(array)?.value(index)),
        DataType::UInt16 => Value::from(downcast::<UInt16Array>(array)?.value(index)),
        DataType::UInt32 => Value::from(downcast::<UInt32Array>(array)?.value(index)),
        DataType::UInt64 => Value::from(downcast::<UInt64Array>(array)?.value(index)),
        DataType::Float32 => float(downcast::<Float32Array>(array)?.value(index) as f64),
        DataType::Float64 => float(downcast::<Float64Array>(array)?.value(index)),
        DataType::Utf8 => Value::String(downcast::<StringArray>(array)?.value(index).to_string()),
        DataType::LargeUtf8 => {
            Value::String(downcast::<LargeStringArray>(array)?.value(index).to_string())
        }
        DataType::Timestamp(unit, _) => match unit {
            TimeUnit::Second => {
                let ts = downcast::<TimestampSecondArray>(array)?.value(index);
                timestamp(DateTime::from_timestamp(ts, 0))
            }
            TimeUnit::Millisecond => {
                let ts = downcast::<TimestampMillisecondArray>(array)?.value(index);
                timestamp(DateTime::from_timestamp_millis(ts))
            }
            TimeUnit::Microsecond => {
                let ts = downcast::<TimestampMicrosecondArray>(array)?.value(index);
                timestamp(DateTime::from_timestamp_micros(ts))
            }
            TimeUnit::Nanosecond => {
                let ts = downcast::<TimestampNanosecondArray>(array)?.value(index);
                timestamp(Some(DateTime::from_timestamp_nanos(ts)))
            }
        },
        DataType::List(_) => {
            let values = downcast::<ListArray>(array)?.value(index);
            list_to_json(values.as_ref())?
        }
        DataType::LargeList(_) => {
            let values = downcast::<LargeListArray>(array)?.value(index);
            list_to_json(values.as_ref())?
        }
        DataType::Struct(fields) => {
            let array = downcast::<StructArray>(array)?;
            let mut object = Map::with_capacity(fields.len());
            for (field, column) in fields.iter().zip(array.columns()) {
                object.insert(
                    field.name().clone(),
                    arrow_array_to_json(column.as_ref(), index)?,
                );
            }
            Value::Object(object)
        }
        _ => Value::Null,
    })
}

fn list_to_json(values: &dyn Array) -> Result<Value> {
    (0..values.len())
        .map(|i| arrow_array_to_json(values, i))
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}
