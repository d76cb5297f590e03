// ABOUTME: PostgreSQL implementation of the destination driver contract
// ABOUTME: Simple-protocol statements plus binary COPY for bulk loads

use async_trait::async_trait;
use bytes::Bytes;
use std::pin::Pin;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, SimpleQueryMessage};

use super::catalog;
use crate::destination::{BulkWriter, Destination, DestinationColumn, TableName};
use crate::error::{Result, SyncError};
use crate::stager::StagedValue;

/// Destination backed by one exclusively owned client.
///
/// Statements go through the simple query protocol so no named prepared
/// statements are left on the session.
pub struct PgDestination {
    client: Client,
}

impl PgDestination {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Destination for PgDestination {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::from_driver("Statement failed", &e))?;

        Ok(messages
            .iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::CommandComplete(count) => Some(*count),
                _ => None,
            })
            .sum())
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<String>> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::from_driver("Query failed", &e))?;

        Ok(messages.iter().find_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row.get(0).map(str::to_string)),
            _ => None,
        })
        .flatten())
    }

    async fn table_exists(&self, table: &TableName) -> Result<bool> {
        catalog::table_exists(&self.client, table).await
    }

    async fn catalog_columns(&self, table: &TableName) -> Result<Vec<DestinationColumn>> {
        catalog::table_columns(&self.client, table).await
    }

    async fn open_bulk_writer<'a>(
        &'a self,
        copy_sql: &str,
        columns: &[DestinationColumn],
    ) -> Result<Box<dyn BulkWriter + 'a>> {
        let sink = self
            .client
            .copy_in::<_, Bytes>(copy_sql)
            .await
            .map_err(|e| SyncError::from_driver("Failed to start bulk load", &e))?;

        let types: Vec<Type> = columns.iter().map(DestinationColumn::pg_type).collect();
        let writer = BinaryCopyInWriter::new(sink, &types);

        Ok(Box::new(PgBulkWriter {
            writer: Box::pin(writer),
            rows: 0,
        }))
    }
}

/// Binary COPY writer for one staging load.
struct PgBulkWriter {
    writer: Pin<Box<BinaryCopyInWriter>>,
    rows: u64,
}

#[async_trait]
impl BulkWriter for PgBulkWriter {
    async fn write_row(&mut self, values: &[StagedValue]) -> Result<()> {
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        self.writer
            .as_mut()
            .write(&params)
            .await
            .map_err(|e| {
                SyncError::from_driver(
                    format!("Failed to write row {} to staging table", self.rows + 1),
                    &e,
                )
            })?;
        self.rows += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64> {
        self.writer
            .as_mut()
            .finish()
            .await
            .map_err(|e| SyncError::from_driver("Failed to complete bulk load", &e))
    }
}
