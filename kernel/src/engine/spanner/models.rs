//! Request and response bodies of the Spanner REST API, limited to the fields we use.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::proto_duration;
use crate::TimestampBound;

#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlRequest {
    pub sql: String,
    pub transaction: TransactionSelector,
}

impl ExecuteSqlRequest {
    /// A query in a single-use read-only transaction.
    pub fn read_only(sql: impl Into<String>, bound: TimestampBound) -> Self {
        Self {
            sql: sql.into(),
            transaction: TransactionSelector {
                single_use: TransactionOptions {
                    read_only: ReadOnly::from(bound),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSelector {
    pub single_use: TransactionOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOptions {
    pub read_only: ReadOnly,
}

/// Exactly one of the fields is set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadOnly {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strong: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_staleness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_staleness: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timestamp: Option<String>,
}

impl From<TimestampBound> for ReadOnly {
    fn from(bound: TimestampBound) -> Self {
        match bound {
            TimestampBound::Strong => Self {
                strong: Some(true),
                ..Default::default()
            },
            TimestampBound::ExactStaleness(staleness) => Self {
                exact_staleness: Some(proto_duration(staleness)),
                ..Default::default()
            },
            TimestampBound::MaxStaleness(staleness) => Self {
                max_staleness: Some(proto_duration(staleness)),
                ..Default::default()
            },
            TimestampBound::ReadTimestamp(at) => Self {
                read_timestamp: Some(at.to_rfc3339_opts(SecondsFormat::Nanos, true)),
                ..Default::default()
            },
        }
    }
}

/// One message of an `executeStreamingSql` response.
///
/// Values of all rows arrive as one flat list split across messages. When `chunked_value` is set,
/// the last value is incomplete and continues as the first value of the next message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResultSet {
    #[serde(default)]
    pub metadata: Option<ResultSetMetadata>,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub chunked_value: bool,
    #[serde(default)]
    pub resume_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSetMetadata {
    #[serde(default)]
    pub row_type: Option<StructType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructType {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: Type,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Type {
    pub code: String,
    #[serde(default)]
    pub array_element_type: Option<Box<Type>>,
    #[serde(default)]
    pub struct_type: Option<StructType>,
}

/// The body Google APIs send with a non-2xx status.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_read_only_request_body() {
        let at = Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap();
        let request = ExecuteSqlRequest::read_only("SELECT true", TimestampBound::ReadTimestamp(at));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "sql": "SELECT true",
                "transaction": {
                    "singleUse": {
                        "readOnly": { "readTimestamp": "2020-06-01T12:00:00.000000000Z" }
                    }
                }
            })
        );

        let strong = serde_json::to_value(ReadOnly::from(TimestampBound::Strong)).unwrap();
        assert_eq!(strong, json!({ "strong": true }));

        let stale = ReadOnly::from(TimestampBound::ExactStaleness(Duration::from_secs(60)));
        assert_eq!(serde_json::to_value(stale).unwrap(), json!({ "exactStaleness": "60s" }));
    }

    #[test]
    fn test_partial_result_set_parsing() {
        let body = json!({
            "metadata": {
                "rowType": {
                    "fields": [
                        { "name": "id", "type": { "code": "STRING" } },
                        { "name": "tags", "type": { "code": "ARRAY", "arrayElementType": { "code": "STRING" } } }
                    ]
                },
                "transaction": {}
            },
            "values": ["a", ["x", "y"]],
            "chunkedValue": true,
            "resumeToken": "AQID"
        });
        let part: PartialResultSet = serde_json::from_value(body).unwrap();
        let fields = part.metadata.unwrap().row_type.unwrap().fields;
        assert_eq!(fields[1].name, "tags");
        assert_eq!(
            fields[1].field_type.array_element_type.as_ref().unwrap().code,
            "STRING"
        );
        assert_eq!(part.values.len(), 2);
        assert!(part.chunked_value);

        // later messages carry only values, and an empty result has none at all
        let empty: PartialResultSet = serde_json::from_value(json!({ "metadata": {} })).unwrap();
        assert!(empty.values.is_empty());
        assert!(!empty.chunked_value);
    }

    #[test]
    fn test_error_parsing() {
        let body = r#"{"error":{"code":404,"message":"Database not found: projects/p/instances/i/databases/d","status":"NOT_FOUND"}}"#;
        let error: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(error.error.code, 404);
        assert_eq!(error.error.status, "NOT_FOUND");
    }
}
