//! Single column values and their textual rendering.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::schema::DataType;

/// A single value read from a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    /// Arbitrary precision decimal, kept in the database's own text form.
    Numeric(String),
    /// JSON document, kept in the database's own text form.
    Json(String),
    Array(Vec<Scalar>),
    Struct(Vec<Scalar>),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Boolean(_) => "BOOL",
            Self::Long(_) => "INT64",
            Self::Double(_) => "FLOAT64",
            Self::String(_) => "STRING",
            Self::Binary(_) => "BYTES",
            Self::Date(_) => "DATE",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Numeric(_) => "NUMERIC",
            Self::Json(_) => "JSON",
            Self::Array(_) => "ARRAY",
            Self::Struct(_) => "STRUCT",
        }
    }

    /// Render this value as export text according to the column's declared type.
    ///
    /// Returns `None` (the null marker) for `NULL`, for declared types without a textual
    /// rendering, and for values that do not match their declared type. This never fails.
    pub fn render(&self, data_type: &DataType) -> Option<String> {
        match (data_type, self) {
            (DataType::Boolean, Self::Boolean(b)) => Some(b.to_string()),
            (DataType::Long, Self::Long(v)) => Some(v.to_string()),
            (DataType::Double, Self::Double(v)) => Some(render_double(*v)),
            (DataType::String, Self::String(s)) | (DataType::Numeric, Self::Numeric(s)) => {
                Some(s.clone())
            }
            (DataType::Binary, Self::Binary(bytes)) => {
                Some(String::from_utf8_lossy(bytes).into_owned())
            }
            (DataType::Date, Self::Date(d)) => Some(d.format("%Y-%m-%d").to_string()),
            (DataType::Timestamp, Self::Timestamp(ts)) => {
                Some(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            _ => None,
        }
    }
}

fn render_double(v: f64) -> String {
    if v.is_infinite() {
        if v.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        v.to_string()
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::bool_true(Scalar::Boolean(true), DataType::Boolean, Some("true"))]
    #[case::bool_false(Scalar::Boolean(false), DataType::Boolean, Some("false"))]
    #[case::long(Scalar::Long(-42), DataType::Long, Some("-42"))]
    #[case::double(Scalar::Double(1.5), DataType::Double, Some("1.5"))]
    #[case::double_inf(Scalar::Double(f64::NEG_INFINITY), DataType::Double, Some("-Infinity"))]
    #[case::string(Scalar::from("x"), DataType::String, Some("x"))]
    #[case::binary(Scalar::Binary(b"caf\xc3\xa9".to_vec()), DataType::Binary, Some("café"))]
    #[case::numeric(Scalar::Numeric("1.23".into()), DataType::Numeric, Some("1.23"))]
    #[case::json(Scalar::Json("{}".into()), DataType::Json, None)]
    #[case::array(
        Scalar::Array(vec![Scalar::Long(1)]),
        DataType::Array(Box::new(DataType::Long)),
        None
    )]
    #[case::null(Scalar::Null, DataType::String, None)]
    #[case::mismatch(Scalar::Long(1), DataType::String, None)]
    fn test_render(#[case] value: Scalar, #[case] data_type: DataType, #[case] expected: Option<&str>) {
        assert_eq!(value.render(&data_type).as_deref(), expected);
    }

    #[test]
    fn test_render_temporal() {
        let date = NaiveDate::from_ymd_opt(2020, 6, 1).unwrap();
        assert_eq!(
            Scalar::Date(date).render(&DataType::Date).as_deref(),
            Some("2020-06-01")
        );

        let ts = Utc.with_ymd_and_hms(2020, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(
            Scalar::Timestamp(ts).render(&DataType::Timestamp).as_deref(),
            Some("2020-06-01T12:30:00Z")
        );
        let ts = ts + chrono::TimeDelta::milliseconds(250);
        assert_eq!(
            Scalar::Timestamp(ts).render(&DataType::Timestamp).as_deref(),
            Some("2020-06-01T12:30:00.250Z")
        );
    }
}
