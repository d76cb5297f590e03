// ABOUTME: Library root for grid-sync
// ABOUTME: Grid model, value coercion, staging, merge strategies, and the export/import pipelines

pub mod coerce;
pub mod commands;
pub mod config;
pub mod ddl;
pub mod destination;
pub mod error;
pub mod export;
pub mod grid;
pub mod import;
pub mod lock;
pub mod merge;
pub mod postgres;
pub mod schema;
pub mod stager;
pub mod utils;

pub use config::ExportConfig;
pub use error::{ExportError, SyncError};
pub use export::{export, ExportSummary};
pub use grid::{GridTable, MemoryGrid};
pub use merge::SyncMode;
