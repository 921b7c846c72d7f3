//! Rows of a time-travel read and the cursor that yields them.

use std::fmt::{Debug, Formatter};

use crate::scalars::Scalar;
use crate::schema::SchemaRef;
use crate::utils::require;
use crate::{Error, PitrResult};

/// One row of a result set. Every row carries the schema of the result set it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: SchemaRef,
    values: Vec<Scalar>,
}

impl Row {
    pub fn try_new(schema: SchemaRef, values: Vec<Scalar>) -> PitrResult<Self> {
        require!(
            schema.len() == values.len(),
            Error::generic(format!(
                "Row has {} values but the result set has {} columns",
                values.len(),
                schema.len()
            ))
        );
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Scalar> {
        self.values.get(index)
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.schema.index_of(column).and_then(|i| self.values.get(i))
    }

    /// Read the first column of this row as a boolean.
    pub fn first_boolean(&self) -> PitrResult<bool> {
        let column = self
            .schema
            .column(0)
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        match self.values.first() {
            Some(Scalar::Boolean(b)) => Ok(*b),
            Some(other) => Err(Error::UnexpectedType {
                column,
                expected: "BOOL".to_string(),
                actual: other.type_name().to_string(),
            }),
            None => Err(Error::generic("Row has no columns")),
        }
    }
}

type RowIter = Box<dyn Iterator<Item = PitrResult<Row>> + Send>;

/// A forward-only cursor over the rows of one open query.
///
/// The cursor owns whatever the engine holds for the open query and releases it when dropped,
/// whether it was exhausted, abandoned or failed. It cannot be rewound or cloned.
pub struct RowCursor {
    schema: SchemaRef,
    rows: RowIter,
}

impl RowCursor {
    pub fn new(
        schema: SchemaRef,
        rows: impl Iterator<Item = PitrResult<Row>> + Send + 'static,
    ) -> Self {
        Self {
            schema,
            rows: Box::new(rows),
        }
    }

    /// The schema of the result set, available even if it has no rows.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

impl Iterator for RowCursor {
    type Item = PitrResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

impl Debug for RowCursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowCursor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
