//! Core types for Mirix

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Fixed dimension every stored embedding is padded/truncated to
pub const MAX_EMBEDDING_DIM: usize = 4096;

/// ID prefix for raw memory records
pub const RAW_MEMORY_ID_PREFIX: &str = "raw_mem";

/// Age threshold used by the periodic TTL cleanup (days since updated_at)
pub const RAW_MEMORY_TTL_DAYS: i64 = 14;

/// Default page size for search
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Hard maximum page size for search
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Open string-keyed tag map used for categorization and access scoping.
///
/// The `scope` key is reserved: it is server-injected on create and cannot
/// be changed by callers afterwards.
pub type FilterTags = HashMap<String, serde_json::Value>;

/// Reserved filter_tags key carrying the access-control scope
pub const SCOPE_TAG: &str = "scope";

/// Generate a server-side raw memory id
pub fn generate_raw_memory_id() -> String {
    format!("{}-{}", RAW_MEMORY_ID_PREFIX, Uuid::new_v4())
}

/// The authenticated tenant/application identity issuing a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    /// Client/application id (audit trail)
    pub id: String,
    /// Owning tenant - the primary security boundary jointly with scope
    pub organization_id: String,
    /// String partition within the organization
    pub scope: String,
}

/// Descriptor of the embedding model/config that produced a vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier (e.g. "text-embedding-3-small")
    pub embedding_model: String,
    /// Native output dimension of the model
    pub embedding_dim: usize,
}

/// Slice of agent state the manager needs: which embedding config to use
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub embedding_config: EmbeddingConfig,
}

/// Audit value reflecting the most recent create/update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastModify {
    pub timestamp: DateTime<Utc>,
    /// "created" or "updated"
    pub operation: String,
}

impl LastModify {
    pub fn created() -> Self {
        Self {
            timestamp: Utc::now(),
            operation: "created".to_string(),
        }
    }

    pub fn updated() -> Self {
        Self {
            timestamp: Utc::now(),
            operation: "updated".to_string(),
        }
    }
}

/// A raw memory record - unprocessed task context stored for task sharing,
/// with a 14-day TTL enforced by an external cleanup job.
///
/// Audit columns (created_by, last_updated_by) are tracked in the store but
/// are not part of this API-facing view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMemoryItem {
    /// Unique identifier (raw_mem- prefix), immutable once set
    pub id: String,
    /// Raw task context string (unprocessed)
    pub context: String,
    /// Filter tags for categorization and access control (includes scope)
    #[serde(default)]
    pub filter_tags: FilterTags,
    /// End-user this memory belongs to
    pub user_id: String,
    /// Owning organization
    pub organization_id: String,
    /// Embedding of the context, padded to MAX_EMBEDDING_DIM when present
    pub context_embedding: Option<Vec<f32>>,
    /// Embedding configuration used, present iff context_embedding is
    pub embedding_config: Option<EmbeddingConfig>,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Last modification info (timestamp and operation type)
    pub last_modify: LastModify,
}

impl RawMemoryItem {
    /// The record's scope as stored in filter_tags, if any
    pub fn scope(&self) -> Option<&str> {
        self.filter_tags.get(SCOPE_TAG).and_then(|v| v.as_str())
    }

    /// Value of the given sort field for this record
    pub fn sort_value(&self, field: SortField) -> DateTime<Utc> {
        match field {
            SortField::CreatedAt => self.created_at,
            SortField::UpdatedAt => self.updated_at,
            SortField::OccurredAt => self.occurred_at,
        }
    }
}

/// Input for creating a raw memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemoryCreate {
    /// Server generates an id if omitted
    pub id: Option<String>,
    /// Raw task context (required, non-empty)
    pub context: String,
    /// Caller-supplied tags; any `scope` entry is overwritten by the server
    pub filter_tags: Option<FilterTags>,
    /// Defaults to now if omitted
    pub occurred_at: Option<DateTime<Utc>>,
    /// Defaults to now if omitted
    pub created_at: Option<DateTime<Utc>>,
    /// Defaults to now if omitted
    pub updated_at: Option<DateTime<Utc>>,
}

/// How to apply a context update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextUpdateMode {
    /// Concatenate "\n\n" + new text onto the existing context
    Append,
    /// Overwrite the context entirely
    #[default]
    Replace,
}

impl std::str::FromStr for ContextUpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(ContextUpdateMode::Append),
            "replace" => Ok(ContextUpdateMode::Replace),
            _ => Err(format!("Unknown context update mode: {}", s)),
        }
    }
}

/// How to apply a filter_tags update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagsMergeMode {
    /// Shallow-merge new keys over existing ones
    Merge,
    /// Replace the tag map (the original scope is always re-injected)
    #[default]
    Replace,
}

impl std::str::FromStr for TagsMergeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "merge" => Ok(TagsMergeMode::Merge),
            "replace" => Ok(TagsMergeMode::Replace),
            _ => Err(format!("Unknown tags merge mode: {}", s)),
        }
    }
}

/// Input for updating a raw memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMemoryUpdate {
    /// New context text
    pub context: Option<String>,
    /// New or updated filter tags
    pub filter_tags: Option<FilterTags>,
    #[serde(default)]
    pub context_update_mode: ContextUpdateMode,
    #[serde(default)]
    pub tags_merge_mode: TagsMergeMode,
}

/// Timestamp field a search can sort on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    #[default]
    UpdatedAt,
    OccurredAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::OccurredAt => "occurred_at",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "occurred_at" => Ok(SortField::OccurredAt),
            _ => Err(format!(
                "Invalid sort field: {}. Must be one of created_at, updated_at, occurred_at",
                s
            )),
        }
    }
}

/// Parsed sort specification: a field plus direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub ascending: bool,
}

impl Default for SortKey {
    fn default() -> Self {
        // Matches the search default of "-updated_at"
        Self {
            field: SortField::UpdatedAt,
            ascending: false,
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ascending, name) = match s.strip_prefix('-') {
            Some(rest) => (false, rest),
            None => (true, s),
        };
        let field: SortField = name.parse()?;
        Ok(SortKey { field, ascending })
    }
}

/// Optional time-range bounds for search; absent bounds are unconstrained
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub created_at_gte: Option<DateTime<Utc>>,
    pub created_at_lte: Option<DateTime<Utc>>,
    pub updated_at_gte: Option<DateTime<Utc>>,
    pub updated_at_lte: Option<DateTime<Utc>>,
    pub occurred_at_gte: Option<DateTime<Utc>>,
    pub occurred_at_lte: Option<DateTime<Utc>>,
}

/// Parameters for search_raw_memories
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Organization to search within (required)
    pub organization_id: String,
    /// If set, restricts results to this user
    pub user_id: Option<String>,
    /// AND filter across all supplied keys
    pub filter_tags: Option<FilterTags>,
    /// Sort expression, e.g. "-updated_at" (leading '-' = descending)
    pub sort: String,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
    pub time_range: Option<TimeRange>,
    /// Clamped to MAX_SEARCH_LIMIT; DEFAULT_SEARCH_LIMIT if None
    pub limit: Option<usize>,
}

impl SearchParams {
    pub fn new(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: None,
            filter_tags: None,
            sort: "-updated_at".to_string(),
            cursor: None,
            time_range: None,
            limit: None,
        }
    }
}

/// A provisioned end-user record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub organization_id: String,
    pub timezone: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Default timezone for auto-provisioned users
    pub const DEFAULT_TIMEZONE: &'static str = "UTC (UTC+00:00)";

    /// Minimal active user created when a write references an unknown user_id
    pub fn provisioned(id: &str, organization_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            organization_id: organization_id.to_string(),
            timezone: Self::DEFAULT_TIMEZONE.to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_parsing() {
        let key: SortKey = "-updated_at".parse().unwrap();
        assert_eq!(key.field, SortField::UpdatedAt);
        assert!(!key.ascending);

        let key: SortKey = "occurred_at".parse().unwrap();
        assert_eq!(key.field, SortField::OccurredAt);
        assert!(key.ascending);

        assert!("importance".parse::<SortKey>().is_err());
        assert!("-".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_update_mode_parsing() {
        assert_eq!(
            "append".parse::<ContextUpdateMode>().unwrap(),
            ContextUpdateMode::Append
        );
        assert_eq!(
            "REPLACE".parse::<ContextUpdateMode>().unwrap(),
            ContextUpdateMode::Replace
        );
        assert!("concat".parse::<ContextUpdateMode>().is_err());

        assert_eq!("merge".parse::<TagsMergeMode>().unwrap(), TagsMergeMode::Merge);
        assert!("union".parse::<TagsMergeMode>().is_err());
    }

    #[test]
    fn test_generated_id_prefix() {
        let id = generate_raw_memory_id();
        assert!(id.starts_with("raw_mem-"));
        assert_ne!(id, generate_raw_memory_id());
    }

    #[test]
    fn test_scope_accessor() {
        let mut tags = FilterTags::new();
        tags.insert(SCOPE_TAG.into(), serde_json::json!("CARE"));
        let item = RawMemoryItem {
            id: generate_raw_memory_id(),
            context: "ctx".into(),
            filter_tags: tags,
            user_id: "user-1".into(),
            organization_id: "org-1".into(),
            context_embedding: None,
            embedding_config: None,
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_modify: LastModify::created(),
        };
        assert_eq!(item.scope(), Some("CARE"));
    }
}
