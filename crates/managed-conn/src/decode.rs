//! SQLite value to JSON conversion

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteRow, SqliteValueRef};
use sqlx::{Column, Row as _, TypeInfo, Value, ValueRef};
use time::PrimitiveDateTime;

use crate::driver::Row;
use crate::{Error, Result};

/// Converts one SQLite value to JSON following the declared column affinity.
///
/// BLOBs become base64 strings and dates stay in their textual form. A value
/// that cannot be decoded as its declared type becomes `null`.
pub fn to_json(value: SqliteValueRef<'_>) -> Result<JsonValue> {
   if value.is_null() {
      return Ok(JsonValue::Null);
   }

   let type_name = value.type_info().name().to_string();
   let owned = value.to_owned();
   let text = || owned.try_decode::<String>().ok().map(JsonValue::String);

   let decoded = match type_name.as_str() {
      "TEXT" | "DATE" | "TIME" => text(),
      "REAL" => owned.try_decode::<f64>().ok().map(JsonValue::from),
      "INTEGER" | "NUMERIC" => owned.try_decode::<i64>().ok().map(JsonValue::from),
      "BOOLEAN" => owned.try_decode::<bool>().ok().map(JsonValue::Bool),
      "DATETIME" => owned
         .try_decode::<PrimitiveDateTime>()
         .ok()
         .map(|dt| JsonValue::String(dt.to_string()))
         .or_else(text),
      "BLOB" => owned
         .try_decode::<Vec<u8>>()
         .ok()
         .map(|blob| JsonValue::String(STANDARD.encode(blob))),
      "NULL" => Some(JsonValue::Null),
      other => match text() {
         Some(v) => Some(v),
         None => {
            return Err(Error::UnsupportedDatatype(format!(
               "Unknown SQLite type: {}",
               other
            )));
         }
      },
   };

   Ok(decoded.unwrap_or(JsonValue::Null))
}

pub(crate) fn decode_rows(rows: Vec<SqliteRow>) -> Result<Vec<Row>> {
   let mut decoded = Vec::with_capacity(rows.len());
   for row in rows {
      let mut values = IndexMap::with_capacity(row.columns().len());
      for (i, column) in row.columns().iter().enumerate() {
         let value = row.try_get_raw(i)?;
         values.insert(column.name().to_string(), to_json(value)?);
      }
      decoded.push(values);
   }
   Ok(decoded)
}
