//! Storage infrastructure
//!
//! Connection pooling, schema migrations and store selection.

mod factory;
pub mod migrations;
mod postgres;

pub use factory::{StorageConfig, StorageFactory, StorageType, Stores};
pub use migrations::{ensure_schema, Migration, PostgresMigrator, SCHEMA};
pub use postgres::{connect, PostgresConfig};
pub(crate) use postgres::storage_error;
