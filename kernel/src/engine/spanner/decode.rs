//! Decoding of Spanner's JSON values into [`Row`]s.
//!
//! Spanner encodes values in JSON as follows: `INT64` as a decimal string, `FLOAT64` as a number or
//! one of the strings `NaN`, `Infinity` and `-Infinity`, `BYTES` as standard base64, `DATE` and
//! `TIMESTAMP` as RFC 3339 strings, `NUMERIC` and `JSON` as strings, `ARRAY` and `STRUCT` as lists.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::models::{ResultSetMetadata, StructType, Type};
use crate::row::Row;
use crate::scalars::Scalar;
use crate::schema::{Column, DataType, Schema, SchemaRef};
use crate::{Error, PitrResult};

pub(crate) fn data_type(field_type: &Type) -> DataType {
    match field_type.code.as_str() {
        "BOOL" => DataType::Boolean,
        "INT64" => DataType::Long,
        "FLOAT64" | "FLOAT32" => DataType::Double,
        "STRING" => DataType::String,
        "BYTES" => DataType::Binary,
        "DATE" => DataType::Date,
        "TIMESTAMP" => DataType::Timestamp,
        "NUMERIC" => DataType::Numeric,
        "JSON" => DataType::Json,
        "ARRAY" => match &field_type.array_element_type {
            Some(element) => DataType::Array(Box::new(data_type(element))),
            None => DataType::Unsupported("ARRAY".to_string()),
        },
        "STRUCT" => match &field_type.struct_type {
            Some(struct_type) => DataType::Struct(columns(struct_type)),
            None => DataType::Unsupported("STRUCT".to_string()),
        },
        other => DataType::Unsupported(other.to_string()),
    }
}

fn columns(struct_type: &StructType) -> Vec<Column> {
    struct_type
        .fields
        .iter()
        .map(|field| Column::new(field.name.clone(), data_type(&field.field_type)))
        .collect()
}

pub(crate) fn schema(metadata: Option<&ResultSetMetadata>) -> SchemaRef {
    let columns = metadata
        .and_then(|metadata| metadata.row_type.as_ref())
        .map(columns)
        .unwrap_or_default();
    Arc::new(Schema::new(columns))
}

pub(crate) fn decode_row(schema: &SchemaRef, values: Vec<Value>) -> PitrResult<Row> {
    let values = schema
        .columns()
        .iter()
        .zip(values)
        .map(|(column, value)| decode_value(column.name(), column.data_type(), value))
        .collect::<PitrResult<Vec<_>>>()?;
    Row::try_new(schema.clone(), values)
}

pub(crate) fn decode_value(column: &str, data_type: &DataType, value: Value) -> PitrResult<Scalar> {
    let mismatch = |value: &Value| {
        Error::decode(format!(
            "column '{column}' of type {data_type} cannot hold {value}"
        ))
    };

    let scalar = match (data_type, value) {
        (_, Value::Null) | (DataType::Unsupported(_), _) => Scalar::Null,
        (DataType::Boolean, Value::Bool(b)) => Scalar::Boolean(b),
        (DataType::Long, Value::String(s)) => Scalar::Long(s.parse()?),
        (DataType::Long, Value::Number(n)) => {
            Scalar::Long(n.as_i64().ok_or_else(|| mismatch(&Value::Number(n)))?)
        }
        (DataType::Double, Value::Number(n)) => {
            Scalar::Double(n.as_f64().ok_or_else(|| mismatch(&Value::Number(n)))?)
        }
        (DataType::Double, Value::String(s)) => Scalar::Double(match s.as_str() {
            "NaN" => f64::NAN,
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            other => other
                .parse()
                .map_err(|_| Error::decode(format!("column '{column}': invalid FLOAT64 {other}")))?,
        }),
        (DataType::String, Value::String(s)) => Scalar::String(s),
        (DataType::Binary, Value::String(s)) => Scalar::Binary(
            STANDARD
                .decode(&s)
                .map_err(|e| Error::decode(format!("column '{column}': {e}")))?,
        ),
        (DataType::Date, Value::String(s)) => Scalar::Date(
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| Error::decode(format!("column '{column}': {e}: {s}")))?,
        ),
        (DataType::Timestamp, Value::String(s)) => Scalar::Timestamp(
            DateTime::parse_from_rfc3339(&s)
                .map_err(|e| Error::decode(format!("column '{column}': {e}: {s}")))?
                .with_timezone(&Utc),
        ),
        (DataType::Numeric, Value::String(s)) => Scalar::Numeric(s),
        (DataType::Json, Value::String(s)) => Scalar::Json(s),
        (DataType::Array(element), Value::Array(items)) => Scalar::Array(
            items
                .into_iter()
                .map(|item| decode_value(column, element, item))
                .collect::<PitrResult<_>>()?,
        ),
        (DataType::Struct(fields), Value::Array(items)) => {
            if fields.len() != items.len() {
                return Err(mismatch(&Value::Array(items)));
            }
            Scalar::Struct(
                fields
                    .iter()
                    .zip(items)
                    .map(|(field, item)| decode_value(field.name(), field.data_type(), item))
                    .collect::<PitrResult<_>>()?,
            )
        }
        (_, value) => return Err(mismatch(&value)),
    };
    Ok(scalar)
}
