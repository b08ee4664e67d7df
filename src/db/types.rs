//! Database-agnostic type mappings.
//!
//! This module maps driver type tags onto the element types of frame columns, and
//! decodes backend rows into untyped [`RawValue`]s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `canonical_type` classifies a driver type tag into an [`ElementType`]
//! 2. Database-specific decoders extract the value the way that element type needs
//!
//! Backends report their own type names (`INT8`, `TIMESTAMPTZ`, `REAL`, ...);
//! `driver_type_tag` normalizes those into the tag vocabulary first.

use crate::db::driver::ColumnDescriptor;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::{SqliteRow, SqliteTypeInfo, SqliteValueRef};
use sqlx::types::Decimal;
use sqlx::{Decode, Row, Type, TypeInfo};

/// Display format for timestamps rendered as text.
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// =============================================================================
// Type Classification
// =============================================================================

/// Canonical element type of a frame column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Timestamp,
    Int64,
    Int32,
    Int16,
    Int8,
    Float64,
    Float32,
    NullableString,
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timestamp => "timestamp",
            Self::Int64 => "int64",
            Self::Int32 => "int32",
            Self::Int16 => "int16",
            Self::Int8 => "int8",
            Self::Float64 => "float64",
            Self::Float32 => "float32",
            Self::NullableString => "nullable string",
        };
        f.write_str(name)
    }
}

/// Map a driver type tag to the element type of its column.
///
/// Tags are matched case-sensitively. Unknown tags, including the empty string,
/// fall back to [`ElementType::NullableString`].
pub fn canonical_type(driver_type: &str) -> ElementType {
    match driver_type {
        "timestamp" | "time.Time" => ElementType::Timestamp,
        "bigint" | "int" | "int64" => ElementType::Int64,
        "smallint" => ElementType::Int16,
        "int32" => ElementType::Int32,
        "tinyint" => ElementType::Int8,
        "double" | "varint" | "decimal" | "float64" => ElementType::Float64,
        "float" => ElementType::Float32,
        "string" => ElementType::NullableString,
        _ => ElementType::NullableString,
    }
}

/// Normalize a backend type name into a driver type tag.
///
/// Names without a counterpart are returned lowercased.
pub fn driver_type_tag(type_name: &str) -> String {
    let lower = type_name.to_lowercase();

    let tag = match lower.as_str() {
        // Date/Time
        "timestamp" | "timestamptz" | "datetime" => "timestamp",
        // Integers (SQLite INTEGER is 64-bit)
        "int8" | "bigint" | "bigserial" | "integer" => "bigint",
        "int4" | "int" | "serial" | "mediumint" => "int32",
        "int2" | "smallint" | "smallserial" => "smallint",
        "tinyint" => "tinyint",
        // Float (SQLite REAL is 64-bit)
        "float8" | "double" | "double precision" | "real" => "double",
        "float4" | "float" => "float",
        "numeric" | "decimal" => "decimal",
        // Text
        "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "name" => {
            "string"
        }
        _ => return lower,
    };
    tag.to_string()
}

// =============================================================================
// Raw Values
// =============================================================================

/// One untyped value as produced by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

/// One result row, in column order.
pub type RawRow = Vec<RawValue>;

impl RawValue {
    /// Get the type name of this value for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render the value as text. `None` for NULL.
    ///
    /// Binary data is decoded as UTF-8 when valid, base64 otherwise.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Text(v) => Some(v.clone()),
            Self::Bytes(v) => Some(decode_binary_text(v)),
            Self::Timestamp(v) => Some(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<DateTime<Utc>> for RawValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<RawValue>> From<Option<T>> for RawValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Decode binary data to text: UTF-8 if valid, base64 otherwise.
pub fn decode_binary_text(bytes: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => STANDARD.encode(bytes),
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

/// NUMERIC arrives in binary format (base-10000 digit groups) from prepared
/// statements, so it goes through `Decimal`, which reads both wire formats.
impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let decimal = <Decimal as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal::from(decimal))
    }
}

impl From<Decimal> for RawDecimal {
    fn from(decimal: Decimal) -> Self {
        RawDecimal(decimal.to_string())
    }
}

impl Type<sqlx::Sqlite> for RawDecimal {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name == "text"
    }
}

impl<'r> Decode<'r, sqlx::Sqlite> for RawDecimal {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

/// Generates a row decoder module for one sqlx row type.
///
/// The decoders try the representations an element type can come in, narrowest
/// failure last, and fall back to a generic decode so coercion can decide.
macro_rules! impl_row_decoder {
    ($module:ident, $row:ty) => {
        pub mod $module {
            use super::*;

            /// Decode every column of a row.
            pub fn decode_row(
                row: &$row,
                columns: &[ColumnDescriptor],
            ) -> Result<RawRow, sqlx::Error> {
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| decode_column(row, idx, canonical_type(&col.driver_type)))
                    .collect()
            }

            fn decode_column(
                row: &$row,
                idx: usize,
                element: ElementType,
            ) -> Result<RawValue, sqlx::Error> {
                match element {
                    ElementType::Timestamp => decode_timestamp(row, idx),
                    ElementType::Int64
                    | ElementType::Int32
                    | ElementType::Int16
                    | ElementType::Int8 => decode_integer(row, idx),
                    ElementType::Float64 | ElementType::Float32 => decode_float(row, idx),
                    ElementType::NullableString => decode_any(row, idx),
                }
            }

            fn decode_timestamp(row: &$row, idx: usize) -> Result<RawValue, sqlx::Error> {
                if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
                    return Ok(v.map(|t| t.and_utc()).into());
                }
                decode_any(row, idx)
            }

            fn decode_integer(row: &$row, idx: usize) -> Result<RawValue, sqlx::Error> {
                if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
                    return Ok(v.map(i64::from).into());
                }
                if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
                    return Ok(v.map(i64::from).into());
                }
                decode_any(row, idx)
            }

            fn decode_float(row: &$row, idx: usize) -> Result<RawValue, sqlx::Error> {
                if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
                    return Ok(v.map(f64::from).into());
                }
                if let Ok(v) = row.try_get::<Option<RawDecimal>, _>(idx) {
                    return Ok(v.map(|d| d.0).into());
                }
                decode_any(row, idx)
            }

            /// Decode whatever the value turns out to be.
            fn decode_any(row: &$row, idx: usize) -> Result<RawValue, sqlx::Error> {
                let text_err = match row.try_get::<Option<String>, _>(idx) {
                    Ok(v) => return Ok(v.into()),
                    Err(e) => e,
                };
                if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
                    return Ok(v.into());
                }
                if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
                    return Ok(v.map(|d| d.to_string()).into());
                }
                if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(idx) {
                    return Ok(v.map(|t| t.to_string()).into());
                }
                if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
                    return Ok(v.map_or(RawValue::Null, RawValue::Bytes));
                }
                Err(text_err)
            }
        }
    };
}

impl_row_decoder!(mysql, MySqlRow);
impl_row_decoder!(postgres, PgRow);
impl_row_decoder!(sqlite, SqliteRow);
