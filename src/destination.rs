// ABOUTME: Destination database contract used by the export engine
// ABOUTME: Table names, live catalog columns, and the statement/bulk-copy driver traits

use async_trait::async_trait;
use std::fmt;
use tokio_postgres::types::Type;

use crate::error::{Result, SyncError};
use crate::stager::StagedValue;
use crate::utils::{quote_ident, validate_postgres_identifier};

/// Fully qualified destination table, always `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    /// Parse a `schema.table` identifier.
    ///
    /// A missing schema prefix is a configuration error: the destination must
    /// never silently land in whatever schema `search_path` resolves to.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SyncError::config("destination table is required"));
        }

        let (schema, table) = value.split_once('.').ok_or_else(|| {
            SyncError::config(format!(
                "destination table '{}' must be given as schema.table (e.g. public.{})",
                value, value
            ))
        })?;

        for part in [schema, table] {
            validate_postgres_identifier(part).map_err(|e| {
                SyncError::config(format!("invalid destination table '{}': {}", value, e))
            })?;
        }

        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    /// Quoted form for use in SQL text: `"schema"."table"`.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Storage class of a destination column, derived from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Timestamp,
    TimestampTz,
    Date,
    Uuid,
    Json,
    Text,
}

impl ColumnKind {
    pub fn from_type(ty: &Type) -> Self {
        match *ty {
            Type::BOOL => ColumnKind::Boolean,
            Type::INT2 => ColumnKind::SmallInt,
            Type::INT4 => ColumnKind::Integer,
            Type::INT8 => ColumnKind::BigInt,
            Type::FLOAT4 => ColumnKind::Real,
            Type::FLOAT8 => ColumnKind::Double,
            Type::NUMERIC => ColumnKind::Numeric,
            Type::TIMESTAMP => ColumnKind::Timestamp,
            Type::TIMESTAMPTZ => ColumnKind::TimestampTz,
            Type::DATE => ColumnKind::Date,
            Type::UUID => ColumnKind::Uuid,
            Type::JSON | Type::JSONB => ColumnKind::Json,
            _ => ColumnKind::Text,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ColumnKind::SmallInt | ColumnKind::Integer | ColumnKind::BigInt
        )
    }

    pub fn is_real(self) -> bool {
        matches!(
            self,
            ColumnKind::Real | ColumnKind::Double | ColumnKind::Numeric
        )
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            ColumnKind::Timestamp | ColumnKind::TimestampTz | ColumnKind::Date
        )
    }
}

/// A column of the live destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationColumn {
    pub name: String,
    /// Declared type as rendered by `format_type` (e.g. `character varying(1000)`).
    pub data_type: String,
    pub type_oid: u32,
    pub nullable: bool,
}

impl DestinationColumn {
    pub fn new(name: impl Into<String>, ty: &Type, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: ty.name().to_string(),
            type_oid: ty.oid(),
            nullable,
        }
    }

    /// Wire type used by the binary bulk writer; unknown types travel as text.
    pub fn pg_type(&self) -> Type {
        Type::from_oid(self.type_oid).unwrap_or(Type::TEXT)
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::from_type(&self.pg_type())
    }
}

/// Statement-level access to the destination database.
///
/// This is the only surface the export engine uses to talk to the database,
/// so tests can substitute a recording implementation.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Execute a statement that returns no rows; yields the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Execute a query and return the first column of the first row as text.
    async fn query_scalar(&self, sql: &str) -> Result<Option<String>>;

    async fn table_exists(&self, table: &TableName) -> Result<bool>;

    /// Columns of `table` in ordinal order.
    async fn catalog_columns(&self, table: &TableName) -> Result<Vec<DestinationColumn>>;

    /// Start a binary bulk load; `columns` gives the wire type of each value.
    async fn open_bulk_writer<'a>(
        &'a self,
        copy_sql: &str,
        columns: &[DestinationColumn],
    ) -> Result<Box<dyn BulkWriter + 'a>>;
}

/// Row-at-a-time binary bulk writer.
#[async_trait]
pub trait BulkWriter: Send {
    /// Write one row; `StagedValue::Null` writes the null marker.
    async fn write_row(&mut self, values: &[StagedValue]) -> Result<()>;

    /// Complete the transfer and return the number of rows the server accepted.
    async fn finish(self: Box<Self>) -> Result<u64>;
}
