//! Column conversions shared by the repositories.
//!
//! Instants are stored as integer milliseconds since the Unix epoch, and
//! enums as their canonical upper-case strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

/// Instant → stored millis.
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Optional instant → stored millis.
pub fn opt_to_millis(instant: Option<DateTime<Utc>>) -> Option<i64> {
    instant.map(to_millis)
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

/// Read a millis column as an instant.
pub fn instant(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        conversion_error(idx, Type::Integer, format!("instant out of range: {millis}"))
    })
}

/// Read a nullable millis column as an optional instant.
pub fn opt_instant(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(_) => instant(row, idx).map(Some),
    }
}

/// Read a text column through `FromStr`.
pub fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

/// Read a JSON text column.
pub fn json<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}
