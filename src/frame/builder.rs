//! Frame assembly from column descriptors and raw rows.

use super::buffer::ColumnBuffer;
use crate::db::driver::ColumnDescriptor;
use crate::db::types::{ElementType, RawRow, canonical_type};
use crate::error::{DbError, DbResult};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Name given to every frame produced for a query.
pub const RESPONSE_FRAME_NAME: &str = "response";

/// Metadata attached to a frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    pub executed_query_string: String,
}

/// One named column of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub values: ColumnBuffer,
}

impl Field {
    pub fn element_type(&self) -> ElementType {
        self.values.element_type()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Field", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", &self.element_type())?;
        state.serialize_field("values", &self.values)?;
        state.end()
    }
}

/// The columnar, in-memory result of one query.
///
/// All fields have the same length once a [`FrameBuilder`] has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
    pub fields: Vec<Field>,
}

impl Frame {
    /// A frame with no columns, as returned for hidden queries.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: None,
            fields: Vec::new(),
        }
    }

    /// Record the statement that produced this frame.
    pub fn with_executed_query(mut self, query: impl Into<String>) -> Self {
        self.meta = Some(FrameMeta {
            executed_query_string: query.into(),
        });
        self
    }

    pub fn row_count(&self) -> usize {
        self.fields.first().map_or(0, Field::len)
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Accumulates rows into typed column buffers.
#[derive(Debug)]
pub struct FrameBuilder {
    name: String,
    fields: Vec<Field>,
    rows: usize,
}

impl FrameBuilder {
    /// Allocate one empty buffer per column, in column order.
    pub fn new(name: impl Into<String>, columns: &[ColumnDescriptor]) -> Self {
        let fields = columns
            .iter()
            .map(|col| Field {
                name: col.name.clone(),
                values: ColumnBuffer::new(canonical_type(&col.driver_type)),
            })
            .collect();

        Self {
            name: name.into(),
            fields,
            rows: 0,
        }
    }

    /// Append one row.
    ///
    /// Every value is coerced before any buffer is written, so a failed append
    /// leaves all buffers at their previous length.
    pub fn append_row(&mut self, row: RawRow) -> DbResult<()> {
        if row.len() != self.fields.len() {
            return Err(DbError::scan(
                self.rows,
                format!(
                    "expected {} values, driver returned {}",
                    self.fields.len(),
                    row.len()
                ),
            ));
        }

        let cells = self
            .fields
            .iter()
            .zip(row)
            .map(|(field, value)| {
                field
                    .values
                    .coerce(value)
                    .map_err(|e| DbError::scan(self.rows, format!("column '{}': {}", field.name, e)))
            })
            .collect::<DbResult<Vec<_>>>()?;

        for (field, cell) in self.fields.iter_mut().zip(cells) {
            field.values.push(cell).map_err(DbError::internal)?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> Frame {
        Frame {
            name: self.name,
            meta: None,
            fields: self.fields,
        }
    }
}
