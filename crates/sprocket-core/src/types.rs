//! Core types for Sprocket

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use uuid::Uuid;

/// A parameter or column value.
///
/// Decimals travel as their exact text so no precision is lost between the
/// caller, the diagnostic trace and the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    /// uniqueidentifier
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// datetime/datetime2, no offset
    DateTime(NaiveDateTime),
    /// datetimeoffset, normalized to UTC
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer, or text that parses as one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::String(s) => s.parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Decimal(s) | Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The data type a parameter carrying this value would be inferred as.
    ///
    /// NULL has no type of its own and infers as `String`, the provider
    /// default for untyped parameters.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null | Value::String(_) => DataType::String,
            Value::Bool(_) => DataType::Boolean,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::Decimal(_) => DataType::Decimal,
            Value::Bytes(_) => DataType::Binary,
            Value::Uuid(_) => DataType::Guid,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
            Value::DateTimeUtc(_) => DataType::DateTimeOffset,
            Value::Json(_) => DataType::String,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => v.fmt(f),
            Value::Int8(v) => v.fmt(f),
            Value::Int16(v) => v.fmt(f),
            Value::Int32(v) => v.fmt(f),
            Value::Int64(v) => v.fmt(f),
            Value::Float32(v) => v.fmt(f),
            Value::Float64(v) => v.fmt(f),
            Value::Decimal(v) | Value::String(v) => f.write_str(v),
            Value::Bytes(bytes) => {
                f.write_str("0x")?;
                bytes.iter().try_for_each(|b| write!(f, "{:02X}", b))
            }
            Value::Uuid(v) => v.fmt(f),
            Value::Date(v) => v.fmt(f),
            Value::Time(v) => v.fmt(f),
            Value::DateTime(v) => v.fmt(f),
            Value::DateTimeUtc(v) => v.fmt(f),
            Value::Json(v) => v.fmt(f),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Uuid,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeUtc,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Logical parameter/column type, independent of any backend's type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Money,
    /// Unicode text
    String,
    /// Single-byte text
    AnsiString,
    Binary,
    Guid,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Xml,
    /// Anything the provider could not map
    Variant,
}

impl DataType {
    /// Numeric types render unquoted in diagnostic traces.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal
                | DataType::Money
        )
    }

    pub fn is_textual(self) -> bool {
        matches!(
            self,
            DataType::String | DataType::AnsiString | DataType::Xml
        )
    }
}

/// One buffered row; column names are shared by position with `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
    columns: Vec<String>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.ordinal(name).and_then(|idx| self.values.get(idx))
    }

    /// Position of a column by name (case-insensitive)
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// Name, type and 0-based position of a result column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: DataType,
    pub ordinal: usize,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: DataType, ordinal: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            ordinal,
        }
    }
}

/// One buffered result set returned by a reader call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column metadata
    pub columns: Vec<ColumnMeta>,
    /// Result rows
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a result set from column names and raw value rows.
    ///
    /// Column types are taken from the first row; columns that are NULL
    /// there fall back to `Variant`.
    pub fn from_values(names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns: Vec<ColumnMeta> = names
            .iter()
            .enumerate()
            .map(|(ordinal, name)| {
                let data_type = rows
                    .first()
                    .and_then(|row| row.get(ordinal))
                    .filter(|v| !v.is_null())
                    .map(Value::data_type)
                    .unwrap_or(DataType::Variant);
                ColumnMeta::new(*name, data_type, ordinal)
            })
            .collect();
        let column_names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(column_names.clone(), values))
            .collect();
        Self { columns, rows }
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
