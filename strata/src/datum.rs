//! SQL values, table schemas and the row codec.
//!
//! A row is stored as a null bitmap of ceil(n/8) bytes (bit i set means
//! column i is NULL and its value is absent), followed by the non-null
//! values in column order. INT is a signed 64-bit little-endian integer,
//! TEXT is a u16 little-endian length plus UTF-8 bytes, BOOL is one byte.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::StorageError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Null = 0,
    Int = 1,
    Text = 2,
    Bool = 3,
}

impl ValueType {
    pub fn from_u8(v: u8) -> Result<ValueType> {
        match v {
            0 => Ok(ValueType::Null),
            1 => Ok(ValueType::Int),
            2 => Ok(ValueType::Text),
            3 => Ok(ValueType::Bool),
            other => Err(StorageError::Serialization(format!(
                "unknown column type tag {other}"
            ))),
        }
    }
}

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Int(_) => ValueType::Int,
            Value::Text(_) => ValueType::Text,
            Value::Bool(_) => ValueType::Bool,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ValueType,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub table_name: String,
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Encodes one row against its schema.
pub fn serialize_row(values: &[Value], schema: &Schema) -> Result<Vec<u8>> {
    if values.len() != schema.columns.len() {
        return Err(StorageError::Serialization(format!(
            "row has {} values, schema has {} columns",
            values.len(),
            schema.columns.len()
        )));
    }

    let bitmap_len = schema.columns.len().div_ceil(8);
    let mut buf = vec![0u8; bitmap_len];

    for (i, value) in values.iter().enumerate() {
        if value.is_null() {
            buf[i / 8] |= 1 << (i % 8);
        }
    }

    for (i, (value, column)) in values.iter().zip(&schema.columns).enumerate() {
        match (value, column.ty) {
            (Value::Null, _) => {}
            (Value::Int(v), ValueType::Int) => buf.put_i64_le(*v),
            (Value::Text(v), ValueType::Text) => {
                if v.len() > u16::MAX as usize {
                    return Err(StorageError::Serialization(format!(
                        "string value for column {} exceeds {} bytes",
                        column.name,
                        u16::MAX
                    )));
                }
                buf.put_u16_le(v.len() as u16);
                buf.put_slice(v.as_bytes());
            }
            (Value::Bool(v), ValueType::Bool) => buf.put_u8(*v as u8),
            (_, ValueType::Null) => {
                return Err(StorageError::Serialization(format!(
                    "column {} has no storable type",
                    column.name
                )));
            }
            (value, ty) => {
                return Err(StorageError::Serialization(format!(
                    "value {value} does not match column {} type {ty:?} (index {i})",
                    column.name
                )));
            }
        }
    }

    Ok(buf)
}

/// Decodes one row against its schema.
pub fn deserialize_row(data: &[u8], schema: &Schema) -> Result<Vec<Value>> {
    let bitmap_len = schema.columns.len().div_ceil(8);
    if data.len() < bitmap_len {
        return Err(StorageError::Serialization(
            "row shorter than its null bitmap".to_string(),
        ));
    }
    let (bitmap, mut buf) = data.split_at(bitmap_len);

    let mut values = Vec::with_capacity(schema.columns.len());
    for (i, column) in schema.columns.iter().enumerate() {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        match column.ty {
            ValueType::Int => {
                if buf.remaining() < 8 {
                    return Err(truncated(&column.name));
                }
                values.push(Value::Int(buf.get_i64_le()));
            }
            ValueType::Text => {
                if buf.remaining() < 2 {
                    return Err(truncated(&column.name));
                }
                let len = buf.get_u16_le() as usize;
                if buf.remaining() < len {
                    return Err(truncated(&column.name));
                }
                let text = std::str::from_utf8(&buf[..len]).map_err(|_| {
                    StorageError::Serialization(format!(
                        "column {} holds invalid UTF-8",
                        column.name
                    ))
                })?;
                values.push(Value::Text(text.to_string()));
                buf.advance(len);
            }
            ValueType::Bool => {
                if buf.remaining() < 1 {
                    return Err(truncated(&column.name));
                }
                values.push(Value::Bool(buf.get_u8() != 0));
            }
            ValueType::Null => {
                return Err(StorageError::Serialization(format!(
                    "column {} has no storable type",
                    column.name
                )));
            }
        }
    }

    Ok(values)
}

fn truncated(column: &str) -> StorageError {
    StorageError::Serialization(format!("row truncated at column {column}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(columns: &[(&str, ValueType, bool)]) -> Schema {
        Schema {
            table_name: "t".to_string(),
            columns: columns
                .iter()
                .map(|(name, ty, nullable)| Column {
                    name: name.to_string(),
                    ty: *ty,
                    nullable: *nullable,
                })
                .collect(),
        }
    }

    #[test]
    fn row_round_trip() {
        let schema = schema(&[
            ("id", ValueType::Int, false),
            ("name", ValueType::Text, true),
            ("active", ValueType::Bool, true),
        ]);
        let row = vec![
            Value::Int(-42),
            Value::Text("alice".to_string()),
            Value::Bool(true),
        ];
        let bytes = serialize_row(&row, &schema).expect("serialize");
        assert_eq!(deserialize_row(&bytes, &schema).expect("deserialize"), row);
    }

    #[test]
    fn null_column_is_absent_from_encoding() {
        let schema = schema(&[
            ("id", ValueType::Int, false),
            ("name", ValueType::Text, true),
        ]);
        let with_name = serialize_row(
            &[Value::Int(1), Value::Text("bob".to_string())],
            &schema,
        )
        .expect("serialize");
        let without_name =
            serialize_row(&[Value::Int(1), Value::Null], &schema).expect("serialize");
        assert!(without_name.len() < with_name.len());

        let row = deserialize_row(&without_name, &schema).expect("deserialize");
        assert_eq!(row, vec![Value::Int(1), Value::Null]);
        // Bit 1 of the bitmap marks the NULL.
        assert_eq!(without_name[0], 0b10);
    }

    #[test]
    fn all_null_row_is_just_the_bitmap() {
        let schema = schema(&[
            ("a", ValueType::Int, true),
            ("b", ValueType::Text, true),
            ("c", ValueType::Bool, true),
        ]);
        let bytes =
            serialize_row(&[Value::Null, Value::Null, Value::Null], &schema).expect("serialize");
        assert_eq!(bytes, vec![0b111]);
        assert_eq!(
            deserialize_row(&bytes, &schema).expect("deserialize"),
            vec![Value::Null, Value::Null, Value::Null]
        );
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let schema = schema(&[("id", ValueType::Int, false)]);
        assert!(serialize_row(&[Value::Text("x".to_string())], &schema).is_err());
    }

    #[test]
    fn value_count_mismatch_is_an_error() {
        let schema = schema(&[("id", ValueType::Int, false)]);
        assert!(serialize_row(&[], &schema).is_err());
    }

    #[test]
    fn truncated_row_is_an_error() {
        let schema = schema(&[("name", ValueType::Text, false)]);
        let bytes = serialize_row(&[Value::Text("alice".to_string())], &schema).expect("ok");
        assert!(deserialize_row(&bytes[..bytes.len() - 2], &schema).is_err());
    }
}
