// ABOUTME: Command implementations for the grid-sync binary
// ABOUTME: Exports the export, import, and check-config commands

pub mod check_config;
pub mod export;
pub mod import;

pub use check_config::CheckConfigArgs;
pub use export::ExportArgs;
pub use import::ImportArgs;
