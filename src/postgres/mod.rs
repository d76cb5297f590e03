// ABOUTME: PostgreSQL connection handling and destination driver
// ABOUTME: Re-exports connect/ConnectOptions and PgDestination

pub mod catalog;
pub mod connection;
pub mod destination;

pub use connection::{connect, ConnectOptions};
pub use destination::PgDestination;
