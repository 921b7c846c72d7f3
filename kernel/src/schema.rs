//! Definitions and functions to describe the columns of a query result

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use itertools::Itertools;

pub type SchemaRef = Arc<Schema>;

/// The declared type of a result column, as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Boolean,
    Long,
    Double,
    String,
    Binary,
    Date,
    Timestamp,
    Numeric,
    Json,
    Array(Box<DataType>),
    Struct(Vec<Column>),
    /// A type this crate does not model, by its database name.
    Unsupported(String),
}

impl DataType {
    /// Whether values of this type have a textual rendering in exports. Values of any other type
    /// are exported as the null marker.
    pub fn has_text_rendering(&self) -> bool {
        matches!(
            self,
            Self::Boolean
                | Self::Long
                | Self::Double
                | Self::String
                | Self::Binary
                | Self::Date
                | Self::Timestamp
                | Self::Numeric
        )
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean => write!(f, "BOOL"),
            Self::Long => write!(f, "INT64"),
            Self::Double => write!(f, "FLOAT64"),
            Self::String => write!(f, "STRING"),
            Self::Binary => write!(f, "BYTES"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Numeric => write!(f, "NUMERIC"),
            Self::Json => write!(f, "JSON"),
            Self::Array(element) => write!(f, "ARRAY<{element}>"),
            Self::Struct(columns) => write!(
                f,
                "STRUCT<{}>",
                columns
                    .iter()
                    .map(|column| format!("{} {}", column.name, column.data_type))
                    .join(", ")
            ),
            Self::Unsupported(name) => write!(f, "{name}"),
        }
    }
}

/// A named, typed result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
}

/// The ordered columns of one result set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: impl IntoIterator<Item = Column>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_nested() {
        let data_type = DataType::Array(Box::new(DataType::Struct(vec![
            Column::new("id", DataType::Long),
            Column::new("tags", DataType::Array(Box::new(DataType::String))),
        ])));
        assert_eq!(
            data_type.to_string(),
            "ARRAY<STRUCT<id INT64, tags ARRAY<STRING>>>"
        );
    }

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new([
            Column::new("id", DataType::String),
            Column::new("value", DataType::String),
        ]);
        assert_eq!(schema.index_of("value"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert_eq!(schema.column_names().collect::<Vec<_>>(), ["id", "value"]);
        assert!(DataType::Numeric.has_text_rendering());
        assert!(!DataType::Json.has_text_rendering());
        assert!(DataType::Timestamp.has_text_rendering());
    }
}
