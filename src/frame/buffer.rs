//! Typed, append-only column storage.
//!
//! A [`ColumnBuffer`] holds the values of one frame column. Values arrive as
//! [`RawValue`]s and are coerced to the buffer's element type before they are
//! stored; [`Cell`] carries a coerced value between those two steps so that a
//! whole row can be validated before any buffer is touched.

use crate::db::types::{ElementType, RawValue, TIMESTAMP_TEXT_FORMAT};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Text layouts accepted for timestamps delivered as strings.
const TIMESTAMP_TEXT_LAYOUTS: &[&str] = &[
    TIMESTAMP_TEXT_FORMAT,
    "%Y-%m-%dT%H:%M:%S%.f",
    // DB2 CHAR(TIMESTAMP) layout
    "%Y-%m-%d-%H.%M.%S%.f",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ColumnBuffer {
    Timestamp(Vec<DateTime<Utc>>),
    Int64(Vec<i64>),
    Int32(Vec<i32>),
    Int16(Vec<i16>),
    Int8(Vec<i8>),
    Float64(Vec<f64>),
    Float32(Vec<f32>),
    NullableString(Vec<Option<String>>),
}

/// A value already coerced to some element type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Timestamp(DateTime<Utc>),
    Int64(i64),
    Int32(i32),
    Int16(i16),
    Int8(i8),
    Float64(f64),
    Float32(f32),
    NullableString(Option<String>),
}

impl ColumnBuffer {
    /// Allocate an empty buffer for an element type.
    pub fn new(element: ElementType) -> Self {
        match element {
            ElementType::Timestamp => Self::Timestamp(Vec::new()),
            ElementType::Int64 => Self::Int64(Vec::new()),
            ElementType::Int32 => Self::Int32(Vec::new()),
            ElementType::Int16 => Self::Int16(Vec::new()),
            ElementType::Int8 => Self::Int8(Vec::new()),
            ElementType::Float64 => Self::Float64(Vec::new()),
            ElementType::Float32 => Self::Float32(Vec::new()),
            ElementType::NullableString => Self::NullableString(Vec::new()),
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Timestamp(_) => ElementType::Timestamp,
            Self::Int64(_) => ElementType::Int64,
            Self::Int32(_) => ElementType::Int32,
            Self::Int16(_) => ElementType::Int16,
            Self::Int8(_) => ElementType::Int8,
            Self::Float64(_) => ElementType::Float64,
            Self::Float32(_) => ElementType::Float32,
            Self::NullableString(_) => ElementType::NullableString,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Timestamp(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int8(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::NullableString(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coerce a raw value to this buffer's element type without storing it.
    pub fn coerce(&self, value: RawValue) -> Result<Cell, String> {
        coerce(self.element_type(), value)
    }

    /// Store a coerced value.
    ///
    /// Fails without modifying the buffer if the cell was coerced for a
    /// different element type.
    pub fn push(&mut self, cell: Cell) -> Result<(), String> {
        match (self, cell) {
            (Self::Timestamp(v), Cell::Timestamp(c)) => v.push(c),
            (Self::Int64(v), Cell::Int64(c)) => v.push(c),
            (Self::Int32(v), Cell::Int32(c)) => v.push(c),
            (Self::Int16(v), Cell::Int16(c)) => v.push(c),
            (Self::Int8(v), Cell::Int8(c)) => v.push(c),
            (Self::Float64(v), Cell::Float64(c)) => v.push(c),
            (Self::Float32(v), Cell::Float32(c)) => v.push(c),
            (Self::NullableString(v), Cell::NullableString(c)) => v.push(c),
            (buffer, cell) => {
                return Err(format!(
                    "cell {:?} does not belong in a {} column",
                    cell,
                    buffer.element_type()
                ));
            }
        }
        Ok(())
    }
}

/// Coerce a raw value to an element type.
///
/// NULL is only representable in nullable string columns.
pub fn coerce(element: ElementType, value: RawValue) -> Result<Cell, String> {
    if value.is_null() && element != ElementType::NullableString {
        return Err(format!("NULL is not allowed in a {} column", element));
    }

    let cell = match element {
        ElementType::Timestamp => Cell::Timestamp(to_timestamp(&value)?),
        ElementType::Int64 => Cell::Int64(to_integer(&value, element)?),
        ElementType::Int32 => Cell::Int32(narrow(to_integer(&value, element)?, element)?),
        ElementType::Int16 => Cell::Int16(narrow(to_integer(&value, element)?, element)?),
        ElementType::Int8 => Cell::Int8(narrow(to_integer(&value, element)?, element)?),
        ElementType::Float64 => Cell::Float64(to_float(&value, element)?),
        ElementType::Float32 => Cell::Float32(to_float(&value, element)? as f32),
        ElementType::NullableString => Cell::NullableString(value.to_text()),
    };
    Ok(cell)
}

fn mismatch(value: &RawValue, element: ElementType) -> String {
    match value.to_text() {
        Some(text) => format!(
            "cannot convert {} value '{}' to {}",
            value.type_name(),
            text,
            element
        ),
        None => format!("cannot convert {} value to {}", value.type_name(), element),
    }
}

fn to_timestamp(value: &RawValue) -> Result<DateTime<Utc>, String> {
    match value {
        RawValue::Timestamp(ts) => Ok(*ts),
        RawValue::Text(text) => parse_timestamp(text.trim())
            .ok_or_else(|| mismatch(value, ElementType::Timestamp)),
        _ => Err(mismatch(value, ElementType::Timestamp)),
    }
}

/// Parse RFC 3339 first, then the zone-less layouts as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    TIMESTAMP_TEXT_LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .map(|naive| naive.and_utc())
}

fn to_integer(value: &RawValue, element: ElementType) -> Result<i64, String> {
    match value {
        RawValue::Int(v) => Ok(*v),
        RawValue::Text(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| mismatch(value, element)),
        _ => Err(mismatch(value, element)),
    }
}

fn narrow<T: TryFrom<i64>>(value: i64, element: ElementType) -> Result<T, String> {
    T::try_from(value).map_err(|_| format!("value {} is out of range for {}", value, element))
}

fn to_float(value: &RawValue, element: ElementType) -> Result<f64, String> {
    match value {
        RawValue::Float(v) => Ok(*v),
        RawValue::Int(v) => Ok(*v as f64),
        RawValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| mismatch(value, element)),
        _ => Err(mismatch(value, element)),
    }
}
