//! Raw memory manager - cache-coherent CRUD over the relational store
//!
//! Raw memories are unprocessed task context stored for task sharing, with a
//! 14-day TTL enforced by an external cleanup job calling [`RawMemoryManager::purge_expired`].
//!
//! The store is the single source of truth; the registered cache provider is
//! a best-effort accelerator. Reads go cache-first and fall through to the
//! store on miss or cache failure. Creates populate the cache fire-and-forget.
//! Updates and deletes invalidate the cache entry after commit and let the
//! next read repopulate it, which bounds staleness to "until next read".

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{keys, CacheRegistry, DEFAULT_CACHE_TTL};
use crate::cursor::Cursor;
use crate::embedding::{pad_embedding, Embedder};
use crate::error::{MirixError, Result};
use crate::storage::queries::{self, SearchQuery};
use crate::storage::{users, Storage};
use crate::types::{
    generate_raw_memory_id, Actor, AgentState, ContextUpdateMode, EmbeddingConfig, LastModify,
    RawMemoryCreate, RawMemoryItem, RawMemoryUpdate, SearchParams, SortKey, TagsMergeMode, User,
    DEFAULT_SEARCH_LIMIT, MAX_SEARCH_LIMIT, RAW_MEMORY_TTL_DAYS, SCOPE_TAG,
};

/// Manager for raw memory CRUD, access control, and cache coherence
#[derive(Clone)]
pub struct RawMemoryManager {
    storage: Storage,
    cache: Arc<CacheRegistry>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl RawMemoryManager {
    pub fn new(storage: Storage, cache: Arc<CacheRegistry>) -> Self {
        Self {
            storage,
            cache,
            embedder: None,
        }
    }

    /// Attach an embedding backend; without one, records persist unembedded
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Access to the underlying storage (maintenance, tests)
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Default age threshold for the TTL cleanup job
    pub fn default_ttl() -> chrono::Duration {
        chrono::Duration::days(RAW_MEMORY_TTL_DAYS)
    }

    fn cache_key(id: &str) -> String {
        format!("{}{}", keys::RAW_MEMORY_PREFIX, id)
    }

    /// Create a new raw memory record (direct write, no queue).
    ///
    /// The actor's scope is force-injected into filter_tags, overwriting any
    /// caller-supplied value - it anchors every later read/update/delete
    /// access check. An unknown user_id is auto-provisioned first so writes
    /// never fail on missing user bootstrap.
    pub fn create_raw_memory(
        &self,
        input: RawMemoryCreate,
        actor: &Actor,
        user_id: &str,
        agent_state: Option<&AgentState>,
        client_id: Option<&str>,
        use_cache: bool,
    ) -> Result<RawMemoryItem> {
        if user_id.is_empty() {
            return Err(MirixError::InvalidInput(
                "user_id is required for create_raw_memory".to_string(),
            ));
        }
        if input.context.is_empty() {
            return Err(MirixError::InvalidInput(
                "Required field 'context' is missing or empty".to_string(),
            ));
        }

        let client_id = match client_id {
            Some(c) => c.to_string(),
            None => {
                warn!("client_id not provided to create_raw_memory, using actor.id as fallback");
                actor.id.clone()
            }
        };

        self.ensure_user(user_id, actor)?;

        let id = input.id.unwrap_or_else(generate_raw_memory_id);

        let mut filter_tags = input.filter_tags.unwrap_or_default();
        filter_tags.insert(
            SCOPE_TAG.to_string(),
            serde_json::Value::String(actor.scope.clone()),
        );

        debug!(
            id = %id,
            client_id = %client_id,
            user_id = %user_id,
            "Creating raw memory"
        );

        let (context_embedding, embedding_config) =
            self.generate_embedding(&input.context, agent_state);

        let now = Utc::now();
        let item = RawMemoryItem {
            id,
            context: input.context,
            filter_tags,
            user_id: user_id.to_string(),
            organization_id: actor.organization_id.clone(),
            context_embedding,
            embedding_config,
            occurred_at: input.occurred_at.unwrap_or(now),
            created_at: input.created_at.unwrap_or(now),
            updated_at: input.updated_at.unwrap_or(now),
            last_modify: LastModify::created(),
        };

        self.storage
            .with_transaction(|conn| queries::insert_raw_memory(conn, &item, &client_id))?;

        info!(id = %item.id, "Raw memory created");

        if use_cache {
            self.populate_cache(&item);
        }

        Ok(item)
    }

    /// Fetch a single raw memory by id (cache-first).
    ///
    /// Scope and optional user checks apply to cache hits exactly as to store
    /// reads: a mismatch is a hard NotFound, never leaked cross-tenant data.
    /// Any other cache problem is logged and treated as a miss.
    pub fn get_raw_memory_by_id(
        &self,
        id: &str,
        actor: &Actor,
        user_id: Option<&str>,
    ) -> Result<RawMemoryItem> {
        let cache_key = Self::cache_key(id);
        let provider = self.cache.active();

        if let Some(provider) = &provider {
            if let Some(cached) = provider.get_json(&cache_key) {
                match serde_json::from_value::<RawMemoryItem>(cached) {
                    Ok(item) => {
                        debug!(id = %id, "Cache HIT for raw memory");
                        self.check_visibility(&item, actor, user_id)?;
                        return Ok(item);
                    }
                    Err(e) => {
                        warn!(id = %id, error = %e, "Cache entry undeserializable, treating as miss");
                    }
                }
            }
        }

        let item = self
            .storage
            .with_connection(|conn| queries::get_raw_memory(conn, id, &actor.organization_id))?;
        self.check_visibility(&item, actor, user_id)?;

        if provider.is_some() {
            self.populate_cache(&item);
        }

        Ok(item)
    }

    /// Update a raw memory with a row-locked read-modify-write.
    ///
    /// The whole read-check-mutate-write sequence runs inside one write
    /// transaction, so two concurrent appends to the same record serialize:
    /// each sees the other's committed context before computing its own.
    /// Organization/scope mismatches surface as AccessDenied here (the locked
    /// read proved the record exists); user mismatches stay NotFound.
    pub fn update_raw_memory(
        &self,
        id: &str,
        actor: &Actor,
        update: RawMemoryUpdate,
        agent_state: Option<&AgentState>,
        user_id: Option<&str>,
    ) -> Result<RawMemoryItem> {
        debug!(
            id = %id,
            context_mode = ?update.context_update_mode,
            tags_mode = ?update.tags_merge_mode,
            "Updating raw memory"
        );

        let item = self.storage.with_transaction(|conn| {
            let mut item = queries::get_raw_memory_for_update(conn, id)?;

            if item.organization_id != actor.organization_id {
                return Err(MirixError::AccessDenied(format!(
                    "memory {} belongs to organization {}, actor belongs to {}",
                    id, item.organization_id, actor.organization_id
                )));
            }

            if item.scope() != Some(actor.scope.as_str()) {
                return Err(MirixError::AccessDenied(format!(
                    "memory {} has scope '{}', actor has scope '{}'",
                    id,
                    item.scope().unwrap_or(""),
                    actor.scope
                )));
            }

            if let Some(uid) = user_id {
                if item.user_id != uid {
                    return Err(MirixError::NotFound(format!("Raw memory {} not found", id)));
                }
            }

            // Tag updates can never change a record's scope
            if let Some(new_tags) = &update.filter_tags {
                if let Some(scope_value) = new_tags.get(SCOPE_TAG) {
                    if scope_value.as_str() != Some(actor.scope.as_str()) {
                        return Err(MirixError::InvalidInput(
                            "Cannot change memory scope - scope must match actor.scope".to_string(),
                        ));
                    }
                }
            }

            let context_changed = update.context.is_some();
            if let Some(new_context) = &update.context {
                match update.context_update_mode {
                    ContextUpdateMode::Append => {
                        item.context = format!("{}\n\n{}", item.context, new_context);
                        debug!(id = %id, "Appended to context");
                    }
                    ContextUpdateMode::Replace => {
                        item.context = new_context.clone();
                        debug!(id = %id, "Replaced context");
                    }
                }
            }

            if let Some(new_tags) = update.filter_tags.clone() {
                match update.tags_merge_mode {
                    TagsMergeMode::Merge => {
                        for (key, value) in new_tags {
                            item.filter_tags.insert(key, value);
                        }
                        debug!(id = %id, "Merged filter_tags");
                    }
                    TagsMergeMode::Replace => {
                        // Scope is immutable: replace must re-inject it even
                        // when the caller's replacement map omits it
                        let preserved_scope = item.filter_tags.get(SCOPE_TAG).cloned();
                        item.filter_tags = new_tags;
                        if let Some(scope) = preserved_scope {
                            item.filter_tags.insert(SCOPE_TAG.to_string(), scope);
                        }
                        debug!(id = %id, "Replaced filter_tags");
                    }
                }
            }

            // Opportunistic regeneration: without an agent_state the previous
            // embedding stays in place even though it now describes old text
            if context_changed {
                let (embedding, config) = self.generate_embedding(&item.context, agent_state);
                if embedding.is_some() {
                    item.context_embedding = embedding;
                    item.embedding_config = config;
                }
            }

            item.updated_at = Utc::now();
            item.last_modify = LastModify::updated();

            queries::update_raw_memory_row(conn, &item, &actor.id)?;
            Ok(item)
        })?;

        // Invalidate-then-lazy-repopulate: the next read refills the cache
        self.evict_cache(id);

        info!(id = %id, "Raw memory updated");
        Ok(item)
    }

    /// Delete a raw memory (hard delete, also used by the TTL cleanup job).
    ///
    /// Returns false when the record is already gone or the user filter does
    /// not match; a scope mismatch on an existing record is AccessDenied.
    pub fn delete_raw_memory(
        &self,
        id: &str,
        actor: &Actor,
        user_id: Option<&str>,
    ) -> Result<bool> {
        info!(id = %id, "Deleting raw memory");

        let deleted = self.storage.with_transaction(|conn| {
            let item = match queries::get_raw_memory(conn, id, &actor.organization_id) {
                Ok(item) => item,
                Err(MirixError::NotFound(_)) => {
                    warn!(id = %id, "Raw memory not found for deletion");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            if item.scope() != Some(actor.scope.as_str()) {
                return Err(MirixError::AccessDenied(format!(
                    "memory {} has scope '{}', actor has scope '{}'",
                    id,
                    item.scope().unwrap_or(""),
                    actor.scope
                )));
            }

            if let Some(uid) = user_id {
                if item.user_id != uid {
                    warn!(id = %id, "Raw memory not found for deletion (user mismatch)");
                    return Ok(false);
                }
            }

            queries::delete_raw_memory_row(conn, id)
        })?;

        if deleted {
            self.evict_cache(id);
            info!(id = %id, "Raw memory deleted");
        }

        Ok(deleted)
    }

    /// Search raw memories with filtering, sorting, cursor pagination, and
    /// time-range filtering. Returns the page plus an opaque cursor for the
    /// next one (None when exhausted).
    pub fn search_raw_memories(
        &self,
        params: &SearchParams,
    ) -> Result<(Vec<RawMemoryItem>, Option<String>)> {
        let limit = params
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT);

        let sort: SortKey = params.sort.parse().map_err(MirixError::InvalidInput)?;

        let cursor = params
            .cursor
            .as_deref()
            .map(|raw| Cursor::decode(raw, sort.field))
            .transpose()?;

        let query = SearchQuery {
            organization_id: &params.organization_id,
            user_id: params.user_id.as_deref(),
            filter_tags: params.filter_tags.as_ref(),
            sort,
            cursor: cursor.as_ref(),
            time_range: params.time_range.as_ref(),
            // One extra row tells us whether another page exists
            fetch_limit: limit + 1,
        };

        let mut items = self
            .storage
            .with_connection(|conn| queries::search_raw_memories(conn, &query))?;

        let has_more = items.len() > limit;
        if has_more {
            items.truncate(limit);
        }

        let next_cursor = if has_more {
            items.last().map(|last| {
                Cursor {
                    field: sort.field,
                    value: last.sort_value(sort.field),
                    id: last.id.clone(),
                }
                .encode()
            })
        } else {
            None
        };

        Ok((items, next_cursor))
    }

    /// Delete raw memories whose updated_at is older than `older_than`.
    ///
    /// Entry point for the external periodic cleanup job; scheduling lives
    /// with the host. Returns the number of records removed.
    pub fn purge_expired(&self, older_than: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let ids = self
            .storage
            .with_connection(|conn| queries::expired_raw_memory_ids(conn, &cutoff))?;

        let mut deleted = 0usize;
        for id in ids {
            if self
                .storage
                .with_transaction(|conn| queries::delete_raw_memory_row(conn, &id))?
            {
                self.evict_cache(&id);
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(deleted, "TTL cleanup removed expired raw memories");
        }

        Ok(deleted)
    }

    /// Read-path visibility check: organization filtering already happened in
    /// the store query, so what remains is scope and the optional user
    /// filter. Mismatches fold into NotFound - a caller must not be able to
    /// probe for another tenant's record by observing a different error.
    fn check_visibility(
        &self,
        item: &RawMemoryItem,
        actor: &Actor,
        user_id: Option<&str>,
    ) -> Result<()> {
        if item.scope() != Some(actor.scope.as_str()) {
            return Err(MirixError::NotFound(format!(
                "Raw memory record with id {} not found",
                item.id
            )));
        }
        if let Some(uid) = user_id {
            if item.user_id != uid {
                return Err(MirixError::NotFound(format!(
                    "Raw memory record with id {} not found",
                    item.id
                )));
            }
        }
        Ok(())
    }

    /// Best-effort embedding: any failure is logged and the record persists
    /// without a vector
    fn generate_embedding(
        &self,
        text: &str,
        agent_state: Option<&AgentState>,
    ) -> (Option<Vec<f32>>, Option<EmbeddingConfig>) {
        match (&self.embedder, agent_state) {
            (Some(embedder), Some(state)) => match embedder.embed(text) {
                Ok(vector) => (
                    Some(pad_embedding(vector)),
                    Some(state.embedding_config.clone()),
                ),
                Err(e) => {
                    warn!(error = %e, "Failed to generate embeddings for raw memory");
                    (None, None)
                }
            },
            _ => (None, None),
        }
    }

    /// Fire-and-forget cache population
    fn populate_cache(&self, item: &RawMemoryItem) {
        let Some(provider) = self.cache.active() else {
            return;
        };
        let key = Self::cache_key(&item.id);
        match serde_json::to_value(item) {
            Ok(value) => {
                if provider.set_json(&key, &value, Some(DEFAULT_CACHE_TTL)) {
                    debug!(id = %item.id, "Populated cache for raw memory");
                } else {
                    warn!(id = %item.id, "Failed to populate cache for raw memory");
                }
            }
            Err(e) => {
                warn!(id = %item.id, error = %e, "Failed to serialize raw memory for cache");
            }
        }
    }

    /// Best-effort cache eviction
    fn evict_cache(&self, id: &str) {
        let Some(provider) = self.cache.active() else {
            return;
        };
        if provider.delete(&Self::cache_key(id)) {
            debug!(id = %id, "Invalidated cache for raw memory");
        } else {
            warn!(id = %id, "Failed to invalidate cache for raw memory");
        }
    }

    /// Lazily create an active user when a write references an unknown
    /// user_id - the store is multi-tenant and must not reject writes due to
    /// skipped user bootstrap
    fn ensure_user(&self, user_id: &str, actor: &Actor) -> Result<()> {
        self.storage.with_transaction(|conn| {
            if users::get_user(conn, user_id)?.is_none() {
                info!(
                    user_id = %user_id,
                    organization_id = %actor.organization_id,
                    "User not found, auto-creating"
                );
                users::insert_user(conn, &User::provisioned(user_id, &actor.organization_id))?;
            }
            Ok(())
        })
    }
}
