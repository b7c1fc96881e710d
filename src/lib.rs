//! Mirix - multi-user memory backend for LLM agents
//!
//! Cache-coherent raw memory CRUD over a relational store, with cursor-based
//! pagination, scope/user multi-tenant access control, and a pluggable cache
//! provider layer.

pub mod cache;
pub mod cursor;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod manager;
pub mod storage;
pub mod types;

pub use cache::{CacheProvider, CacheRegistry, MemoryCacheProvider};
pub use error::{MirixError, Result};
pub use manager::RawMemoryManager;
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
