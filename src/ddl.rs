// ABOUTME: CREATE/DROP/TRUNCATE statement builders for the destination table
// ABOUTME: Maps grid column types to PostgreSQL types and renders DEFAULT clauses

use tokio_postgres::types::Type;

use crate::coerce::{CoercedValue, ValueCoercer};
use crate::destination::{DestinationColumn, TableName};
use crate::error::{Result, SyncError};
use crate::grid::{ColumnType, SourceColumn};
use crate::utils::{quote_ident, quote_literal};

/// PostgreSQL type created for a grid column type.
///
/// Reals map to `double precision` so the `-1.7E308` sentinel always fits.
pub fn sql_type(column_type: ColumnType) -> (&'static str, Type) {
    match column_type {
        ColumnType::Integer => ("bigint", Type::INT8),
        ColumnType::Real => ("double precision", Type::FLOAT8),
        ColumnType::Boolean => ("boolean", Type::BOOL),
        ColumnType::Timestamp => ("timestamp", Type::TIMESTAMP),
        ColumnType::String => ("varchar(1000)", Type::VARCHAR),
    }
}

/// Build the `CREATE TABLE` statement for the enabled source columns.
///
/// # Arguments
///
/// * `columns` - grid columns in source order; disabled columns are skipped
/// * `table` - destination table
/// * `coercer` - used to normalize default values against the mapped type
///
/// # Examples
///
/// ```
/// use grid_sync::coerce::ValueCoercer;
/// use grid_sync::ddl::build_create_table;
/// use grid_sync::destination::TableName;
/// use grid_sync::grid::{ColumnType, SourceColumn};
///
/// let columns = vec![
///     SourceColumn::new("id", ColumnType::Integer).key(),
///     SourceColumn::new("price", ColumnType::Real).with_default("0"),
/// ];
/// let table = TableName::parse("public.prices").unwrap();
/// let sql = build_create_table(&columns, &table, &ValueCoercer::default()).unwrap();
/// assert_eq!(
///     sql,
///     "CREATE TABLE \"public\".\"prices\" (\"id\" bigint NOT NULL PRIMARY KEY, \
///      \"price\" double precision DEFAULT 0)"
/// );
/// ```
pub fn build_create_table(
    columns: &[SourceColumn],
    table: &TableName,
    coercer: &ValueCoercer,
) -> Result<String> {
    let enabled: Vec<&SourceColumn> = columns.iter().filter(|c| c.enabled).collect();
    if enabled.is_empty() {
        return Err(SyncError::config(format!(
            "no enabled columns to create {} with",
            table
        )));
    }

    let keys: Vec<&str> = enabled
        .iter()
        .filter(|c| c.is_key)
        .map(|c| c.name.as_str())
        .collect();
    if keys.len() > 1 {
        return Err(SyncError::config(format!(
            "only one key column is supported, found {}",
            keys.join(", ")
        )));
    }

    let definitions: Vec<String> = enabled
        .iter()
        .map(|column| column_definition(column, coercer))
        .collect();

    Ok(format!(
        "CREATE TABLE {} ({})",
        table.qualified(),
        definitions.join(", ")
    ))
}

fn column_definition(column: &SourceColumn, coercer: &ValueCoercer) -> String {
    let (type_name, pg_type) = sql_type(column.column_type);
    let mut definition = format!("{} {}", quote_ident(&column.name), type_name);

    if column.is_key {
        definition.push_str(" NOT NULL PRIMARY KEY");
        return definition;
    }

    if let Some(default) = &column.default_value {
        let target = DestinationColumn::new(&column.name, &pg_type, true);
        match coercer.coerce(Some(default), None, &target) {
            Some(value) => {
                definition.push_str(" DEFAULT ");
                definition.push_str(&default_literal(&value, coercer));
            }
            None => {
                tracing::debug!(
                    "Default '{}' for column '{}' coerces to NULL, omitting DEFAULT",
                    default,
                    column.name
                );
            }
        }
    }

    definition
}

fn default_literal(value: &CoercedValue, coercer: &ValueCoercer) -> String {
    match value {
        CoercedValue::Integer(_) | CoercedValue::Real(_) => coercer.render(value),
        CoercedValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        // ISO-8601 so the server parses it regardless of DateStyle
        CoercedValue::Timestamp(ts) => {
            quote_literal(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }
        CoercedValue::Text(s) => quote_literal(s),
    }
}

pub fn drop_table_sql(table: &TableName) -> String {
    format!("DROP TABLE IF EXISTS {}", table.qualified())
}

pub fn truncate_table_sql(table: &TableName) -> String {
    format!("TRUNCATE TABLE {}", table.qualified())
}
