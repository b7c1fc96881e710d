//! Pluggable cache layer
//!
//! A cache provider is any backend satisfying the [`CacheProvider`] trait:
//! Redis when Mirix runs standalone, or whatever the host application
//! registers instead. The cache is never authoritative - every caller treats
//! an absent provider, a miss, or a provider failure identically: operate
//! directly against the store.
//!
//! Providers are held in an explicitly constructed [`CacheRegistry`] that is
//! injected into managers; there is no process-global registry state.

mod memory;
mod registry;

pub use memory::MemoryCacheProvider;
pub use registry::CacheRegistry;

use std::collections::HashMap;
use std::time::Duration;

/// Default TTL applied to cache entries populated by managers
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Typed key prefixes, one per cached entity type.
///
/// Kept identical across providers so keys written by one backend remain
/// addressable after a provider swap.
pub mod keys {
    pub const BLOCK_PREFIX: &str = "block:";
    pub const MESSAGE_PREFIX: &str = "msg:";
    pub const EPISODIC_PREFIX: &str = "episodic:";
    pub const SEMANTIC_PREFIX: &str = "semantic:";
    pub const PROCEDURAL_PREFIX: &str = "procedural:";
    pub const RESOURCE_PREFIX: &str = "resource:";
    pub const KNOWLEDGE_PREFIX: &str = "knowledge:";
    pub const RAW_MEMORY_PREFIX: &str = "raw_memory:";
    pub const ORGANIZATION_PREFIX: &str = "org:";
    pub const USER_PREFIX: &str = "user:";
    pub const CLIENT_PREFIX: &str = "client:";
    pub const AGENT_PREFIX: &str = "agent:";
    pub const TOOL_PREFIX: &str = "tool:";
}

/// Capability contract every cache backend must satisfy.
///
/// The surface is deliberately infallible: implementations swallow and log
/// their own transport errors, returning `None`/`false` so callers fall
/// through to the store without error-handling ceremony.
pub trait CacheProvider: Send + Sync {
    /// Get a value (JSON-shaped) by key
    fn get(&self, key: &str) -> Option<serde_json::Value>;

    /// Set a value; returns false on failure
    fn set(&self, key: &str, data: &serde_json::Value, ttl: Option<Duration>) -> bool;

    /// Delete a key; returns false on failure (absent key counts as success)
    fn delete(&self, key: &str) -> bool;

    /// Get a hash-shaped value
    fn get_hash(&self, key: &str) -> Option<HashMap<String, String>>;

    /// Set a hash-shaped value
    fn set_hash(&self, key: &str, data: &HashMap<String, String>, ttl: Option<Duration>) -> bool;

    /// Get a JSON document
    fn get_json(&self, key: &str) -> Option<serde_json::Value>;

    /// Set a JSON document
    fn set_json(&self, key: &str, data: &serde_json::Value, ttl: Option<Duration>) -> bool;
}
