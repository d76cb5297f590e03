// ABOUTME: Integration tests for grid export against a real PostgreSQL destination
// ABOUTME: Covers every sync mode, delete semantics, sentinels, and staging cleanup

use chrono::{NaiveDate, NaiveDateTime};
use grid_sync::config::ExportConfig;
use grid_sync::export::{export, export_with};
use grid_sync::grid::{ColumnType, GridCell, MemoryGrid, SourceColumn};
use grid_sync::postgres::{connect, ConnectOptions, PgDestination};
use grid_sync::{SyncError, SyncMode};
use std::env;
use tokio_postgres::Client;

/// Helper to get the test database URL from environment
fn get_test_url() -> Option<String> {
    env::var("TEST_TARGET_URL").ok()
}

async fn client(url: &str) -> Client {
    connect(url, &ConnectOptions::default())
        .await
        .expect("Failed to connect to target")
}

fn config(url: &str, table: &str, mode: SyncMode) -> ExportConfig {
    ExportConfig {
        connection_string: url.to_string(),
        table: format!("public.{}", table),
        mode: mode.label().to_string(),
        ..Default::default()
    }
}

async fn drop_table(client: &Client, table: &str) {
    client
        .batch_execute(&format!(r#"DROP TABLE IF EXISTS "public"."{}""#, table))
        .await
        .expect("Failed to drop test table");
}

async fn key_value_table(client: &Client, table: &str, rows: &[(i64, i64)]) {
    drop_table(client, table).await;
    client
        .batch_execute(&format!(
            r#"CREATE TABLE "public"."{}" (id bigint PRIMARY KEY, value bigint)"#,
            table
        ))
        .await
        .expect("Failed to create test table");
    for (id, value) in rows {
        client
            .execute(
                &format!(r#"INSERT INTO "public"."{}" VALUES ($1, $2)"#, table),
                &[id, value],
            )
            .await
            .expect("Failed to seed test table");
    }
}

fn key_value_grid(rows: &[(i64, i64)]) -> MemoryGrid {
    let mut grid = MemoryGrid::new(vec![
        SourceColumn::new("id", ColumnType::Integer).key(),
        SourceColumn::new("value", ColumnType::Integer),
    ]);
    for (id, value) in rows {
        grid.push_row(vec![
            GridCell::text(id.to_string()),
            GridCell::text(value.to_string()),
        ]);
    }
    grid
}

async fn key_values(client: &Client, table: &str) -> Vec<(i64, i64)> {
    client
        .query(
            &format!(r#"SELECT id, value FROM "public"."{}" ORDER BY id"#, table),
            &[],
        )
        .await
        .expect("Failed to read test table")
        .iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect()
}

/// Test: every mode writes each value so it reads back unchanged
#[tokio::test]
#[ignore]
async fn test_values_round_trip_in_every_mode() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;

    let grid = MemoryGrid::new(vec![
        SourceColumn::new("id", ColumnType::Integer).key(),
        SourceColumn::new("price", ColumnType::Real),
        SourceColumn::new("active", ColumnType::Boolean),
        SourceColumn::new("seen_at", ColumnType::Timestamp),
        SourceColumn::new("name", ColumnType::String),
    ])
    .with_row(vec![
        GridCell::text("1"),
        GridCell::text("9.5"),
        GridCell::text("true"),
        GridCell::text("2024-03-01 12:30:00"),
        GridCell::text("alpha"),
    ])
    .with_row(vec![
        GridCell::text("2"),
        GridCell::text("-0.25"),
        GridCell::text("false"),
        GridCell::text("2023-12-31 23:59:59"),
        GridCell::text("Grüße"),
    ]);

    for (idx, mode) in SyncMode::ALL.iter().enumerate() {
        let table = format!("grid_sync_round_trip_{}", idx);
        drop_table(&client, &table).await;

        let summary = export(&config(&url, &table, *mode), &grid)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", mode, e));
        assert_eq!(summary.rows_staged, 2, "{}", mode);
        assert!(summary.table_created, "{}", mode);

        let rows = client
            .query(
                &format!(
                    r#"SELECT id, price, active, seen_at, name FROM "public"."{}" ORDER BY id"#,
                    table
                ),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 2, "{}", mode);

        assert_eq!(rows[0].get::<_, i64>(0), 1);
        assert_eq!(rows[0].get::<_, f64>(1), 9.5);
        assert!(rows[0].get::<_, bool>(2));
        assert_eq!(
            rows[0].get::<_, NaiveDateTime>(3),
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(12, 30, 0)
                .unwrap()
        );
        assert_eq!(rows[0].get::<_, String>(4), "alpha");

        assert_eq!(rows[1].get::<_, f64>(1), -0.25);
        assert!(!rows[1].get::<_, bool>(2));
        assert_eq!(rows[1].get::<_, String>(4), "Grüße");

        drop_table(&client, &table).await;
    }
}

/// Test: drop/create replaces both structure and content
#[tokio::test]
#[ignore]
async fn test_drop_create_yields_exactly_the_grid() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_drop_create";

    drop_table(&client, table).await;
    client
        .batch_execute(&format!(
            r#"CREATE TABLE "public"."{}" (legacy text, id integer);
               INSERT INTO "public"."{}" VALUES ('old', 1), ('older', 7)"#,
            table, table
        ))
        .await
        .unwrap();

    let grid = key_value_grid(&[(1, 10), (2, 20)]);
    let summary = export(&config(&url, table, SyncMode::DropCreateAndRepopulate), &grid)
        .await
        .unwrap();

    assert!(summary.table_created);
    assert_eq!(key_values(&client, table).await, vec![(1, 10), (2, 20)]);

    let legacy = client
        .query_one(
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 AND column_name = 'legacy'",
            &[&table],
        )
        .await
        .unwrap();
    assert_eq!(legacy.get::<_, i64>(0), 0);

    drop_table(&client, table).await;
}

/// Test: truncate keeps the table but replaces every row
#[tokio::test]
#[ignore]
async fn test_truncate_replaces_rows() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_truncate";

    key_value_table(&client, table, &[(1, 1), (2, 2), (3, 3)]).await;

    let summary = export(
        &config(&url, table, SyncMode::TruncateAndRepopulate),
        &key_value_grid(&[(3, 30), (4, 40)]),
    )
    .await
    .unwrap();

    assert!(!summary.table_created);
    assert_eq!(key_values(&client, table).await, vec![(3, 30), (4, 40)]);

    drop_table(&client, table).await;
}

/// Test: a missing key is deleted, a present one is updated, a new one inserted
#[tokio::test]
#[ignore]
async fn test_update_insert_delete_matches_grid_keys() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_delete_missing";

    key_value_table(&client, table, &[(1, 1), (2, 2), (3, 3)]).await;

    let summary = export(
        &config(&url, table, SyncMode::UpdateInsertAndDelete),
        &key_value_grid(&[(2, 20), (3, 30), (4, 40)]),
    )
    .await
    .unwrap();

    assert_eq!(summary.rows_deleted, 1);
    assert_eq!(
        key_values(&client, table).await,
        vec![(2, 20), (3, 30), (4, 40)]
    );

    drop_table(&client, table).await;
}

/// Test: the merge dialect gives the same result as ON CONFLICT
#[tokio::test]
#[ignore]
async fn test_update_insert_delete_with_merge_statement() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let version: i64 = client
        .query_one("SELECT current_setting('server_version_num')::bigint", &[])
        .await
        .unwrap()
        .get(0);
    if version < 150000 {
        println!("Skipping: MERGE requires PostgreSQL 15, server is {}", version);
        return;
    }
    let table = "grid_sync_merge_statement";

    key_value_table(&client, table, &[(1, 1), (2, 2), (3, 3)]).await;

    let mut cfg = config(&url, table, SyncMode::UpdateInsertAndDelete);
    cfg.merge_statement = grid_sync::merge::MergeDialect::Merge;
    export(&cfg, &key_value_grid(&[(2, 20), (3, 30), (4, 40)]))
        .await
        .unwrap();

    assert_eq!(
        key_values(&client, table).await,
        vec![(2, 20), (3, 30), (4, 40)]
    );

    drop_table(&client, table).await;
}

/// Test: upsert replaces the value of an existing key without duplicating it
#[tokio::test]
#[ignore]
async fn test_update_insert_overwrites_existing_key() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_upsert";

    drop_table(&client, table).await;
    client
        .batch_execute(&format!(
            r#"CREATE TABLE "public"."{}" (sku text PRIMARY KEY, qty bigint);
               INSERT INTO "public"."{}" VALUES ('A', 5), ('B', 1)"#,
            table, table
        ))
        .await
        .unwrap();

    let grid = MemoryGrid::new(vec![
        SourceColumn::new("sku", ColumnType::String).key(),
        SourceColumn::new("qty", ColumnType::Integer),
    ])
    .with_row(vec![GridCell::text("A"), GridCell::text("9")]);

    export(&config(&url, table, SyncMode::UpdateAndInsert), &grid)
        .await
        .unwrap();

    let rows: Vec<(String, i64)> = client
        .query(
            &format!(r#"SELECT sku, qty FROM "public"."{}" ORDER BY sku"#, table),
            &[],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| (row.get(0), row.get(1)))
        .collect();
    assert_eq!(rows, vec![("A".to_string(), 9), ("B".to_string(), 1)]);

    drop_table(&client, table).await;
}

/// Test: insert-only mode leaves existing rows alone
#[tokio::test]
#[ignore]
async fn test_insert_never_deletes() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_insert_only";

    key_value_table(&client, table, &[(1, 1), (2, 2)]).await;

    export(
        &config(&url, table, SyncMode::Insert),
        &key_value_grid(&[(3, 3)]),
    )
    .await
    .unwrap();

    assert_eq!(
        key_values(&client, table).await,
        vec![(1, 1), (2, 2), (3, 3)]
    );

    drop_table(&client, table).await;
}

/// Test: unresolved values land as sentinels on NOT NULL columns and as NULL otherwise
#[tokio::test]
#[ignore]
async fn test_sentinels_for_unresolved_values() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_sentinels";

    drop_table(&client, table).await;
    client
        .batch_execute(&format!(
            r#"CREATE TABLE "public"."{}" (
                   id bigint PRIMARY KEY,
                   amount double precision NOT NULL,
                   ratio double precision,
                   seen_at timestamp NOT NULL
               )"#,
            table
        ))
        .await
        .unwrap();

    let grid = MemoryGrid::new(vec![
        SourceColumn::new("id", ColumnType::Integer).key(),
        SourceColumn::new("amount", ColumnType::Real),
        SourceColumn::new("ratio", ColumnType::Real),
        SourceColumn::new("seen_at", ColumnType::Timestamp),
    ])
    .with_row(vec![
        GridCell::text("1"),
        GridCell::text(""),
        GridCell::text("NaN"),
        GridCell::text("not a date"),
    ]);

    export(&config(&url, table, SyncMode::Insert), &grid)
        .await
        .unwrap();

    let row = client
        .query_one(
            &format!(
                r#"SELECT amount, ratio, seen_at FROM "public"."{}""#,
                table
            ),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(row.get::<_, f64>(0), -1.7e308);
    assert_eq!(row.get::<_, Option<f64>>(1), None);
    assert_eq!(
        row.get::<_, NaiveDateTime>(2),
        grid_sync::coerce::unresolved_timestamp()
    );

    drop_table(&client, table).await;
}

/// Test: a failed merge still drops the staging table on the same session
#[tokio::test]
#[ignore]
async fn test_staging_table_dropped_after_failed_merge() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let table = "grid_sync_staging_cleanup";
    {
        let setup = client(&url).await;
        key_value_table(&setup, table, &[(1, 1)]).await;
    }

    let dest = PgDestination::new(client(&url).await);
    let plan = config(&url, table, SyncMode::Insert).validate().unwrap();

    // Key 1 already exists, so the plain insert violates the primary key
    let err = export_with(&dest, &plan, &key_value_grid(&[(1, 2)]))
        .await
        .unwrap_err();
    assert!(matches!(err.cause, SyncError::Write { .. }), "{}", err);

    let leftover = dest
        .client()
        .query_one(
            r"SELECT count(*) FROM pg_class
              WHERE relnamespace = pg_my_temp_schema() AND relname LIKE '\_grid\_stage\_%'",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(leftover.get::<_, i64>(0), 0);

    drop_table(dest.client(), table).await;
}

/// Test: a source column missing from the destination is reported before writing
#[tokio::test]
#[ignore]
async fn test_schema_mismatch_leaves_table_untouched() {
    let url = get_test_url().expect("TEST_TARGET_URL must be set");
    let client = client(&url).await;
    let table = "grid_sync_schema_mismatch";

    key_value_table(&client, table, &[(1, 1)]).await;

    let grid = MemoryGrid::new(vec![
        SourceColumn::new("id", ColumnType::Integer).key(),
        SourceColumn::new("value", ColumnType::Integer),
        SourceColumn::new("extra", ColumnType::String),
    ])
    .with_row(vec![
        GridCell::text("2"),
        GridCell::text("2"),
        GridCell::text("x"),
    ]);

    let err = export(&config(&url, table, SyncMode::UpdateAndInsert), &grid)
        .await
        .unwrap_err();
    match err.cause {
        SyncError::SchemaMismatch { column, .. } => assert_eq!(column, "extra"),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(key_values(&client, table).await, vec![(1, 1)]);

    drop_table(&client, table).await;
}
