//! Row decoding.
//!
//! Query results are decoded into JSON maps (column name → value) and then
//! deserialized into the caller's types with serde. This keeps one decoding
//! path for all four drivers.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::models::Driver;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

/// A decoded row.
pub type JsonRow = serde_json::Map<String, JsonValue>;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    Date,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, driver: Driver) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if driver == Driver::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.starts_with("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    if lower == "date" {
        return TypeCategory::Date;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
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

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary data as base64 text.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Driver::MySql);
                let value = mysql::decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, Driver::PostgreSql);
                let value = postgres::decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> JsonRow {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = col.type_info().name();
                (col.name().to_string(), sqlite::decode_column(self, idx, declared))
            })
            .collect()
    }
}

impl RowToJson for tiberius::Row {
    fn to_json_map(&self) -> JsonRow {
        let names: Vec<String> = self.columns().iter().map(|c| c.name().to_string()).collect();
        names
            .into_iter()
            .zip(self.cells().map(|(_, data)| sqlserver::decode_cell(data)))
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        if row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true) {
            return JsonValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => JsonValue::String(v.0),
            Err(e) => {
                tracing::error!("Failed to decode DECIMAL: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<u64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<bool, _>(idx)
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<JsonValue, _>(idx).unwrap_or(JsonValue::Null)
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        row.try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| JsonValue::String(v.and_utc().to_rfc3339()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_date(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<chrono::NaiveDate, _>(idx)
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> JsonValue {
        row.try_get::<String, _>(idx)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        if row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true) {
            return JsonValue::Null;
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<RawDecimal, _>(idx) {
            Ok(v) => JsonValue::String(v.0),
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return JsonValue::Number(v.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<bool, _>(idx)
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return float_value(v);
        }
        if let Ok(v) = row.try_get::<f32, _>(idx) {
            return float_value(v as f64);
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Vec<u8>, _>(idx)
            .map(|v| encode_binary(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<JsonValue, _>(idx).unwrap_or(JsonValue::Null)
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx) {
            return JsonValue::String(v.to_rfc3339());
        }
        row.try_get::<chrono::NaiveDateTime, _>(idx)
            .map(|v| JsonValue::String(v.and_utc().to_rfc3339()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_date(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<chrono::NaiveDate, _>(idx)
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<String, _>(idx)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    /// SQLite is dynamically typed, so decode by the storage class of the
    /// value itself rather than the declared column type. Expression columns
    /// such as `COUNT(*)` have no declared type at all. The one exception is
    /// a column declared BOOLEAN, whose 0/1 integers come back as booleans.
    pub fn decode_column(row: &SqliteRow, idx: usize, declared: &str) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_uppercase(),
            Err(_) => return JsonValue::Null,
        };

        if declared.eq_ignore_ascii_case("boolean") || declared.eq_ignore_ascii_case("bool") {
            if let Ok(v) = row.try_get_unchecked::<i64, _>(idx) {
                return JsonValue::Bool(v != 0);
            }
        }

        match storage.as_str() {
            "INTEGER" | "BOOLEAN" | "INT" | "BIGINT" => row
                .try_get::<i64, _>(idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" | "NUMERIC" | "FLOAT" | "DOUBLE" => row
                .try_get::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(idx)
                .map(|v| encode_binary(&v))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx),
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
        row.try_get_unchecked::<String, _>(idx)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlserver {
    use super::*;
    use tiberius::ColumnData;

    pub fn decode_cell(data: &ColumnData<'static>) -> JsonValue {
        match data {
            ColumnData::U8(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I16(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I32(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::I64(v) => v.map(|v| JsonValue::Number(v.into())),
            ColumnData::F32(v) => v.map(|v| float_value(v as f64)),
            ColumnData::F64(v) => v.map(float_value),
            ColumnData::Bit(v) => v.map(JsonValue::Bool),
            ColumnData::String(v) => v.as_ref().map(|s| JsonValue::String(s.to_string())),
            ColumnData::Guid(v) => v.map(|g| JsonValue::String(g.to_string())),
            ColumnData::Binary(v) => v.as_ref().map(|b| encode_binary(b)),
            ColumnData::Numeric(v) => v.map(|n| JsonValue::String(n.to_string())),
            ColumnData::Xml(v) => v.as_ref().map(|x| JsonValue::String(x.to_string())),
            other => decode_temporal(other),
        }
        .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(data: &ColumnData<'static>) -> Option<JsonValue> {
        use tiberius::FromSql;

        if let Ok(Some(v)) = chrono::NaiveDateTime::from_sql(data) {
            return Some(JsonValue::String(v.and_utc().to_rfc3339()));
        }
        if let Ok(Some(v)) = chrono::DateTime::<chrono::Utc>::from_sql(data) {
            return Some(JsonValue::String(v.to_rfc3339()));
        }
        if let Ok(Some(v)) = chrono::NaiveDate::from_sql(data) {
            return Some(JsonValue::String(v.to_string()));
        }
        None
    }
}
