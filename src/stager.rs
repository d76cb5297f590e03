// ABOUTME: Staging table lifecycle and binary bulk load of coerced rows
// ABOUTME: Converts coerced values into wire values matching each destination column

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::error::Error;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::coerce::{CoercedValue, ValueCoercer};
use crate::destination::{ColumnKind, Destination, DestinationColumn, TableName};
use crate::error::{Result, SyncError};
use crate::grid::GridTable;
use crate::utils::quote_ident;

/// Prefix of every staging table; the rest of the name is 16 random hex chars.
pub const STAGING_PREFIX: &str = "_grid_stage_";

/// A value on its way into the staging table, typed for the destination column.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedValue {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    /// Encoded as PostgreSQL NUMERIC, so the full f64 range (sentinel included) fits.
    Numeric(f64),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
    Json(serde_json::Value),
    Text(String),
}

impl StagedValue {
    /// Convert a coerced value for `column`.
    ///
    /// Returns a message (without row context) when the value cannot be stored:
    /// a null for a NOT NULL column, an out-of-range integer, or text that does
    /// not parse as the column's binary type.
    pub fn from_coerced(
        value: Option<CoercedValue>,
        column: &DestinationColumn,
    ) -> std::result::Result<Self, String> {
        let value = match value {
            Some(value) => value,
            None if column.nullable => return Ok(StagedValue::Null),
            None => {
                return Err(format!(
                    "null value for NOT NULL column of type {}",
                    column.data_type
                ))
            }
        };

        let kind = column.kind();
        match (kind, value) {
            (ColumnKind::Boolean, CoercedValue::Boolean(b)) => Ok(StagedValue::Boolean(b)),
            (ColumnKind::Boolean, CoercedValue::Integer(i)) => Ok(StagedValue::Boolean(i != 0)),

            (ColumnKind::SmallInt, CoercedValue::Integer(i)) => i16::try_from(i)
                .map(StagedValue::SmallInt)
                .map_err(|_| out_of_range(i, column)),
            (ColumnKind::Integer, CoercedValue::Integer(i)) => i32::try_from(i)
                .map(StagedValue::Integer)
                .map_err(|_| out_of_range(i, column)),
            (ColumnKind::BigInt, CoercedValue::Integer(i)) => Ok(StagedValue::BigInt(i)),

            // Values beyond f32 range (the sentinel included) land as +/-Infinity
            (ColumnKind::Real, CoercedValue::Real(r)) => Ok(StagedValue::Real(r as f32)),
            (ColumnKind::Double, CoercedValue::Real(r)) => Ok(StagedValue::Double(r)),
            (ColumnKind::Numeric, CoercedValue::Real(r)) if r.is_finite() => {
                Ok(StagedValue::Numeric(r))
            }

            (ColumnKind::Timestamp, CoercedValue::Timestamp(ts)) => Ok(StagedValue::Timestamp(ts)),
            (ColumnKind::TimestampTz, CoercedValue::Timestamp(ts)) => {
                Ok(StagedValue::TimestampTz(ts.and_utc()))
            }
            (ColumnKind::Date, CoercedValue::Timestamp(ts)) => Ok(StagedValue::Date(ts.date())),

            (ColumnKind::Uuid | ColumnKind::Json, CoercedValue::Text(s))
                if s.trim().is_empty() && column.nullable =>
            {
                Ok(StagedValue::Null)
            }
            (ColumnKind::Uuid, CoercedValue::Text(s)) => Uuid::parse_str(s.trim())
                .map(StagedValue::Uuid)
                .map_err(|e| format!("'{}' is not a valid uuid: {}", s, e)),
            (ColumnKind::Json, CoercedValue::Text(s)) => serde_json::from_str(&s)
                .map(StagedValue::Json)
                .map_err(|e| format!("'{}' is not valid JSON: {}", s, e)),

            (ColumnKind::Text, CoercedValue::Text(s)) => Ok(StagedValue::Text(s)),

            (_, other) => Err(format!(
                "cannot store {:?} in a column of type {}",
                other, column.data_type
            )),
        }
    }
}

fn out_of_range(value: i64, column: &DestinationColumn) -> String {
    format!("{} is out of range for type {}", value, column.data_type)
}

impl ToSql for StagedValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            StagedValue::Null => Ok(IsNull::Yes),
            StagedValue::Boolean(v) => v.to_sql(ty, out),
            StagedValue::SmallInt(v) => v.to_sql(ty, out),
            StagedValue::Integer(v) => v.to_sql(ty, out),
            StagedValue::BigInt(v) => v.to_sql(ty, out),
            StagedValue::Real(v) => v.to_sql(ty, out),
            StagedValue::Double(v) => v.to_sql(ty, out),
            StagedValue::Numeric(v) => {
                encode_numeric(*v, out);
                Ok(IsNull::No)
            }
            StagedValue::Timestamp(v) => v.to_sql(ty, out),
            StagedValue::TimestampTz(v) => v.to_sql(ty, out),
            StagedValue::Date(v) => v.to_sql(ty, out),
            StagedValue::Uuid(v) => v.to_sql(ty, out),
            StagedValue::Json(v) => v.to_sql(ty, out),
            // Text-like and unrecognized types (enums, citext, ...) take the raw UTF-8 bytes
            StagedValue::Text(v) => {
                out.put_slice(v.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Encode a finite f64 as PostgreSQL binary NUMERIC.
///
/// Layout: ndigits, weight, sign, dscale (all i16) followed by base-10000 digits.
/// The decimal expansion comes from the shortest round-trip representation, so
/// `-1.7E308` is stored exactly as written rather than as its binary expansion.
fn encode_numeric(value: f64, out: &mut BytesMut) {
    const NUMERIC_POS: u16 = 0x0000;
    const NUMERIC_NEG: u16 = 0x4000;

    let sign = if value.is_sign_negative() && value != 0.0 {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    let scientific = format!("{:e}", value.abs());
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let point = exponent.parse::<i64>().unwrap_or(0) + 1;

    let (int_part, frac_part) = if point <= 0 {
        (String::new(), "0".repeat((-point) as usize) + &digits)
    } else if point as usize >= digits.len() {
        (digits.clone() + &"0".repeat(point as usize - digits.len()), String::new())
    } else {
        let (int, frac) = digits.split_at(point as usize);
        (int.to_string(), frac.to_string())
    };
    let frac_part = frac_part.trim_end_matches('0').to_string();
    let dscale = frac_part.len();

    let int_padded = "0".repeat((4 - int_part.len() % 4) % 4) + &int_part;
    let frac_padded = frac_part.clone() + &"0".repeat((4 - frac_part.len() % 4) % 4);

    let mut groups: Vec<i16> = int_padded
        .as_bytes()
        .chunks(4)
        .chain(frac_padded.as_bytes().chunks(4))
        .map(|chunk| {
            chunk
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect();
    let mut weight = (int_padded.len() / 4) as i64 - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= leading as i64;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight as i16);
    out.put_u16(sign);
    out.put_u16(dscale as u16);
    for group in groups {
        out.put_i16(group);
    }
}

/// One source row converted for the staging table, in write-set order.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub values: Vec<StagedValue>,
}

/// Convert every grid row into a staged row.
///
/// # Arguments
///
/// * `columns` - live destination columns
/// * `write_set` - `(destination_index, source_index)` pairs of the columns to write
///
/// Row numbers in errors are 1-based.
pub fn convert_rows(
    grid: &dyn GridTable,
    columns: &[DestinationColumn],
    write_set: &[(usize, usize)],
    coercer: &ValueCoercer,
) -> Result<Vec<StagedRow>> {
    let mut rows = Vec::with_capacity(grid.row_count());

    for (idx, cells) in grid.rows().enumerate() {
        let mut values = Vec::with_capacity(write_set.len());
        for &(dest_idx, source_idx) in write_set {
            let column = &columns[dest_idx];
            let (raw, native) = cells
                .get(source_idx)
                .map(|cell| (cell.text.as_deref(), cell.native.as_ref()))
                .unwrap_or((None, None));

            let coerced = coercer.coerce(raw, native, column);
            let staged =
                StagedValue::from_coerced(coerced, column).map_err(|message| {
                    SyncError::Coercion {
                        row: idx + 1,
                        column: column.name.clone(),
                        message,
                    }
                })?;
            values.push(staged);
        }
        rows.push(StagedRow { values });
    }

    Ok(rows)
}

/// A structure-only clone of the written columns, living for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    pub name: String,
}

impl StagingTable {
    /// Fresh, collision-resistant staging table name.
    pub fn generate() -> Self {
        Self {
            name: format!("{}{:016x}", STAGING_PREFIX, rand::random::<u64>()),
        }
    }

    pub fn quoted(&self) -> String {
        quote_ident(&self.name)
    }

    pub fn create_sql(&self, table: &TableName, columns: &[DestinationColumn]) -> String {
        format!(
            "CREATE TEMP TABLE {} AS SELECT {} FROM {} WITH NO DATA",
            self.quoted(),
            column_list(columns),
            table.qualified()
        )
    }

    pub fn copy_sql(&self, columns: &[DestinationColumn]) -> String {
        format!(
            "COPY {} ({}) FROM STDIN (FORMAT binary)",
            self.quoted(),
            column_list(columns)
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quoted())
    }
}

pub(crate) fn column_list(columns: &[DestinationColumn]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Create an empty staging table shaped like `columns` of `table`.
pub async fn create(
    dest: &dyn Destination,
    table: &TableName,
    columns: &[DestinationColumn],
) -> Result<StagingTable> {
    let staging = StagingTable::generate();
    let sql = staging.create_sql(table, columns);
    tracing::debug!("Creating staging table: {}", sql);

    dest.execute(&sql)
        .await
        .map_err(|e| e.context(format!("Failed to create staging table {}", staging.name)))?;

    Ok(staging)
}

/// Stream `rows` into the staging table through the binary bulk writer.
///
/// Returns the number of rows the server accepted.
pub async fn load(
    dest: &dyn Destination,
    staging: &StagingTable,
    columns: &[DestinationColumn],
    rows: &[StagedRow],
) -> Result<u64> {
    let sql = staging.copy_sql(columns);
    tracing::debug!("Loading staging table: {}", sql);

    let mut writer = dest.open_bulk_writer(&sql, columns).await?;
    for row in rows {
        writer.write_row(&row.values).await?;
    }
    let loaded = writer.finish().await?;

    tracing::debug!("Staged {} rows into {}", loaded, staging.name);
    Ok(loaded)
}

/// Create and load a staging table in one step, returning it with the row count.
///
/// On a load failure the staging table is dropped before the error is
/// returned; once this succeeds, dropping it is the caller's job.
pub async fn stage(
    dest: &dyn Destination,
    table: &TableName,
    columns: &[DestinationColumn],
    rows: &[StagedRow],
) -> Result<(StagingTable, u64)> {
    let staging = create(dest, table, columns).await?;
    match load(dest, &staging, columns, rows).await {
        Ok(loaded) => Ok((staging, loaded)),
        Err(e) => {
            if let Err(cleanup) = dest.execute(&staging.drop_sql()).await {
                tracing::warn!(
                    "Failed to drop staging table {} after an earlier error: {}",
                    staging.name,
                    cleanup
                );
            }
            Err(e)
        }
    }
}
