// ABOUTME: Sync modes and the statements that move staged rows into the destination
// ABOUTME: Insert-select, ON CONFLICT upsert, delete-missing, and the SQL MERGE dialect

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::destination::{Destination, DestinationColumn, TableName};
use crate::error::{Result, SyncError};
use crate::stager::{column_list, StagingTable};
use crate::utils::quote_ident;

/// How a run treats the rows already in the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SyncMode {
    DropCreateAndRepopulate,
    TruncateAndRepopulate,
    UpdateAndInsert,
    UpdateInsertAndDelete,
    Insert,
}

/// Destination action taken before any row is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreWriteAction {
    None,
    /// Drop if it exists, then always (re)create.
    Drop,
    /// Truncate if it exists.
    Truncate,
}

/// Statement(s) used to move staged rows into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    InsertOnly,
    Upsert,
    UpsertThenDeleteMissing,
}

/// One step of a run's write sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    NoOp,
    DropIfExists,
    TruncateIfExists,
    InsertOnly,
    UpsertOnly,
    UpsertThenDeleteMissing,
}

impl SyncMode {
    pub const ALL: [SyncMode; 5] = [
        SyncMode::DropCreateAndRepopulate,
        SyncMode::TruncateAndRepopulate,
        SyncMode::UpdateAndInsert,
        SyncMode::UpdateInsertAndDelete,
        SyncMode::Insert,
    ];

    /// User-facing label, also accepted by `FromStr`.
    pub fn label(self) -> &'static str {
        match self {
            SyncMode::DropCreateAndRepopulate => "Drop, Create & Repopulate",
            SyncMode::TruncateAndRepopulate => "Truncate & Repopulate",
            SyncMode::UpdateAndInsert => "Update & Insert",
            SyncMode::UpdateInsertAndDelete => "Update, Insert & Delete",
            SyncMode::Insert => "Insert",
        }
    }

    pub fn pre_write(self) -> PreWriteAction {
        match self {
            SyncMode::DropCreateAndRepopulate => PreWriteAction::Drop,
            SyncMode::TruncateAndRepopulate => PreWriteAction::Truncate,
            _ => PreWriteAction::None,
        }
    }

    pub fn strategy(self) -> MergeStrategy {
        match self {
            SyncMode::UpdateAndInsert => MergeStrategy::Upsert,
            SyncMode::UpdateInsertAndDelete => MergeStrategy::UpsertThenDeleteMissing,
            _ => MergeStrategy::InsertOnly,
        }
    }

    /// Upsert modes need exactly one key column.
    pub fn requires_key(self) -> bool {
        self.strategy() != MergeStrategy::InsertOnly
    }

    /// Ordered write sequence for a run: pre-write step, then merge step.
    pub fn states(self) -> [MergeState; 2] {
        let pre = match self.pre_write() {
            PreWriteAction::None => MergeState::NoOp,
            PreWriteAction::Drop => MergeState::DropIfExists,
            PreWriteAction::Truncate => MergeState::TruncateIfExists,
        };
        let merge = match self.strategy() {
            MergeStrategy::InsertOnly => MergeState::InsertOnly,
            MergeStrategy::Upsert => MergeState::UpsertOnly,
            MergeStrategy::UpsertThenDeleteMissing => MergeState::UpsertThenDeleteMissing,
        };
        [pre, merge]
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    /// Matches labels case-insensitively, ignoring punctuation and spacing, so
    /// `"Update & Insert"`, `"update_and_insert"` and `"UpdateAndInsert"` agree.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "dropcreaterepopulate" | "dropcreateandrepopulate" => {
                Ok(SyncMode::DropCreateAndRepopulate)
            }
            "truncaterepopulate" | "truncateandrepopulate" => Ok(SyncMode::TruncateAndRepopulate),
            "updateinsert" | "updateandinsert" => Ok(SyncMode::UpdateAndInsert),
            "updateinsertdelete" | "updateinsertanddelete" => Ok(SyncMode::UpdateInsertAndDelete),
            "insert" => Ok(SyncMode::Insert),
            _ => Err(SyncError::config(format!(
                "unrecognized sync mode '{}'; expected one of: {}",
                s,
                SyncMode::ALL
                    .iter()
                    .map(|m| format!("'{}'", m.label()))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

impl TryFrom<String> for SyncMode {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SyncMode> for String {
    fn from(mode: SyncMode) -> Self {
        mode.label().to_string()
    }
}

/// SQL used for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDialect {
    /// `INSERT ... ON CONFLICT` plus a separate delete statement (PostgreSQL 9.5+).
    #[default]
    OnConflict,
    /// A single `MERGE` statement (PostgreSQL 15+).
    Merge,
}

/// Minimum `server_version_num` for `MERGE`.
const MERGE_MIN_VERSION: u32 = 150_000;
/// Minimum `server_version_num` for `WHEN NOT MATCHED BY SOURCE`.
const MERGE_BY_SOURCE_MIN_VERSION: u32 = 170_000;

/// Build a plain insert of every staged row.
pub fn build_insert_select(
    table: &TableName,
    staging: &StagingTable,
    columns: &[DestinationColumn],
) -> String {
    let cols = column_list(columns);
    format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        table.qualified(),
        cols,
        cols,
        staging.quoted()
    )
}

/// Build an upsert from the staging table.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO "schema"."table" ("id", "a") SELECT "id", "a" FROM "_grid_stage_..."
/// ON CONFLICT ("id") DO UPDATE SET "a" = EXCLUDED."a"
/// ```
pub fn build_upsert(
    table: &TableName,
    staging: &StagingTable,
    columns: &[DestinationColumn],
    key: &str,
) -> String {
    let update_columns: Vec<String> = columns
        .iter()
        .filter(|c| c.name != key)
        .map(|c| {
            let quoted = quote_ident(&c.name);
            format!("{} = EXCLUDED.{}", quoted, quoted)
        })
        .collect();

    let update_clause = if update_columns.is_empty() {
        // Key is the only column written
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", update_columns.join(", "))
    };

    format!(
        "{} ON CONFLICT ({}) {}",
        build_insert_select(table, staging, columns),
        quote_ident(key),
        update_clause
    )
}

/// Build the delete of destination rows whose key is absent from the staging table.
pub fn build_delete_missing(table: &TableName, staging: &StagingTable, key: &str) -> String {
    let key = quote_ident(key);
    format!(
        "DELETE FROM {} AS d WHERE NOT EXISTS (SELECT 1 FROM {} AS s WHERE s.{} = d.{})",
        table.qualified(),
        staging.quoted(),
        key,
        key
    )
}

/// Build a single `MERGE` statement; `delete_missing` adds the by-source delete.
pub fn build_merge(
    table: &TableName,
    staging: &StagingTable,
    columns: &[DestinationColumn],
    key: &str,
    delete_missing: bool,
) -> String {
    let quoted_key = quote_ident(key);
    let mut sql = format!(
        "MERGE INTO {} AS d USING {} AS s ON d.{} = s.{}",
        table.qualified(),
        staging.quoted(),
        quoted_key,
        quoted_key
    );

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| c.name != key)
        .map(|c| {
            let quoted = quote_ident(&c.name);
            format!("{} = s.{}", quoted, quoted)
        })
        .collect();
    if !updates.is_empty() {
        sql.push_str(&format!(
            " WHEN MATCHED THEN UPDATE SET {}",
            updates.join(", ")
        ));
    }

    let values: Vec<String> = columns
        .iter()
        .map(|c| format!("s.{}", quote_ident(&c.name)))
        .collect();
    sql.push_str(&format!(
        " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
        column_list(columns),
        values.join(", ")
    ));

    if delete_missing {
        sql.push_str(" WHEN NOT MATCHED BY SOURCE THEN DELETE");
    }
    sql
}

/// Rows touched by the merge step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Rows inserted or updated. A single-statement `MERGE` with delete folds deletions in here.
    pub affected: u64,
    /// Rows removed by a separate delete-missing statement.
    pub deleted: u64,
}

/// Moves staged rows into the destination with the mode's strategy.
pub struct MergeWriter<'a> {
    dest: &'a dyn Destination,
    table: &'a TableName,
    staging: &'a StagingTable,
    dialect: MergeDialect,
}

impl<'a> MergeWriter<'a> {
    pub fn new(
        dest: &'a dyn Destination,
        table: &'a TableName,
        staging: &'a StagingTable,
        dialect: MergeDialect,
    ) -> Self {
        Self {
            dest,
            table,
            staging,
            dialect,
        }
    }

    /// Execute the merge.
    ///
    /// # Arguments
    ///
    /// * `columns` - the written destination columns, as staged
    /// * `key` - destination key column name; required for upsert strategies
    pub async fn apply(
        &self,
        strategy: MergeStrategy,
        columns: &[DestinationColumn],
        key: Option<&str>,
    ) -> Result<MergeOutcome> {
        let key = match (strategy, key) {
            (MergeStrategy::InsertOnly, _) => {
                let sql = build_insert_select(self.table, self.staging, columns);
                let affected = self.run(&sql, "Failed to insert staged rows").await?;
                return Ok(MergeOutcome {
                    affected,
                    deleted: 0,
                });
            }
            (_, Some(key)) => key,
            (_, None) => {
                return Err(SyncError::config(format!(
                    "a key column is required to upsert into {}",
                    self.table
                )))
            }
        };
        let delete_missing = strategy == MergeStrategy::UpsertThenDeleteMissing;

        match self.dialect {
            MergeDialect::OnConflict => {
                let sql = build_upsert(self.table, self.staging, columns, key);
                let affected = self.run(&sql, "Failed to upsert staged rows").await?;
                let deleted = if delete_missing {
                    self.delete_missing(key).await?
                } else {
                    0
                };
                Ok(MergeOutcome { affected, deleted })
            }
            MergeDialect::Merge => {
                let version = self.server_version().await?;
                if version < MERGE_MIN_VERSION {
                    return Err(SyncError::config(format!(
                        "merge_statement = \"merge\" requires PostgreSQL 15 or newer \
                         (server_version_num {}); use \"on_conflict\"",
                        version
                    )));
                }

                // Older MERGE has no by-source clause; delete in a second statement
                let single_statement = delete_missing && version >= MERGE_BY_SOURCE_MIN_VERSION;
                let sql = build_merge(self.table, self.staging, columns, key, single_statement);
                let affected = self.run(&sql, "Failed to merge staged rows").await?;
                let deleted = if delete_missing && !single_statement {
                    self.delete_missing(key).await?
                } else {
                    0
                };
                Ok(MergeOutcome { affected, deleted })
            }
        }
    }

    async fn delete_missing(&self, key: &str) -> Result<u64> {
        let sql = build_delete_missing(self.table, self.staging, key);
        self.run(&sql, "Failed to delete rows missing from the grid")
            .await
    }

    async fn server_version(&self) -> Result<u32> {
        let raw = self.dest.query_scalar("SHOW server_version_num").await?;
        raw.as_deref()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                SyncError::write(
                    "Failed to read server version",
                    format!("unexpected server_version_num {:?}", raw),
                )
            })
    }

    async fn run(&self, sql: &str, context: &str) -> Result<u64> {
        tracing::debug!("{}", sql);
        self.dest
            .execute(sql)
            .await
            .map_err(|e| e.context(format!("{} into {}", context, self.table)))
    }
}
