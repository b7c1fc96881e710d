//! Storage engine for Mirix
//!
//! SQLite source of truth: connection management, schema migrations, and the
//! raw-memory/user query layer.

mod connection;
mod migrations;
pub mod queries;
pub mod users;

pub use connection::{Storage, StorageConfig};
pub use migrations::SCHEMA_VERSION;
