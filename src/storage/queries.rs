//! Database queries for raw memory operations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use crate::cursor::Cursor;
use crate::error::{MirixError, Result};
use crate::types::{
    EmbeddingConfig, FilterTags, LastModify, RawMemoryItem, SortKey, TimeRange, SCOPE_TAG,
};

/// Format a timestamp for storage.
///
/// Fixed microsecond precision and a Z suffix so lexicographic comparison of
/// stored values matches chronological order - the cursor predicates and
/// ORDER BY clauses depend on this.
pub fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const RAW_MEMORY_COLUMNS: &str = "id, context, filter_tags, user_id, organization_id,
        context_embedding, embedding_config, occurred_at, created_at, updated_at, last_modify";

/// Parse a raw memory from a database row
pub fn raw_memory_from_row(row: &Row) -> rusqlite::Result<RawMemoryItem> {
    let id: String = row.get("id")?;
    let context: String = row.get("context")?;
    let filter_tags_str: String = row.get("filter_tags")?;
    let user_id: String = row.get("user_id")?;
    let organization_id: String = row.get("organization_id")?;
    let context_embedding_str: Option<String> = row.get("context_embedding")?;
    let embedding_config_str: Option<String> = row.get("embedding_config")?;
    let occurred_at: String = row.get("occurred_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_modify_str: String = row.get("last_modify")?;

    let filter_tags: FilterTags = serde_json::from_str(&filter_tags_str).unwrap_or_default();
    let context_embedding: Option<Vec<f32>> =
        context_embedding_str.and_then(|s| serde_json::from_str(&s).ok());
    let embedding_config: Option<EmbeddingConfig> =
        embedding_config_str.and_then(|s| serde_json::from_str(&s).ok());
    let last_modify: LastModify =
        serde_json::from_str(&last_modify_str).unwrap_or_else(|_| LastModify {
            timestamp: parse_ts(&updated_at),
            operation: "updated".to_string(),
        });

    Ok(RawMemoryItem {
        id,
        context,
        filter_tags,
        user_id,
        organization_id,
        context_embedding,
        embedding_config,
        occurred_at: parse_ts(&occurred_at),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        last_modify,
    })
}

/// Insert a new raw memory row
pub fn insert_raw_memory(conn: &Connection, item: &RawMemoryItem, created_by: &str) -> Result<()> {
    let filter_tags = serde_json::to_string(&item.filter_tags)?;
    let context_embedding = item
        .context_embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let embedding_config = item
        .embedding_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let last_modify = serde_json::to_string(&item.last_modify)?;

    conn.execute(
        "INSERT INTO raw_memories (id, context, filter_tags, user_id, organization_id,
                context_embedding, embedding_config, occurred_at, created_at, updated_at,
                last_modify, created_by, last_updated_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            item.id,
            item.context,
            filter_tags,
            item.user_id,
            item.organization_id,
            context_embedding,
            embedding_config,
            format_ts(&item.occurred_at),
            format_ts(&item.created_at),
            format_ts(&item.updated_at),
            last_modify,
            created_by,
            created_by,
        ],
    )?;

    Ok(())
}

/// Get a raw memory by id, restricted to the given organization
pub fn get_raw_memory(conn: &Connection, id: &str, organization_id: &str) -> Result<RawMemoryItem> {
    let sql = format!(
        "SELECT {} FROM raw_memories WHERE id = ? AND organization_id = ?",
        RAW_MEMORY_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    stmt.query_row(params![id, organization_id], raw_memory_from_row)
        .map_err(|_| MirixError::NotFound(format!("Raw memory record with id {} not found", id)))
}

/// Get a raw memory by id with no organization filter.
///
/// Used only by the update path, which runs inside a write transaction and
/// performs its own organization/scope checks so a mismatch can surface as
/// AccessDenied instead of NotFound.
pub fn get_raw_memory_for_update(conn: &Connection, id: &str) -> Result<RawMemoryItem> {
    let sql = format!("SELECT {} FROM raw_memories WHERE id = ?", RAW_MEMORY_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;

    stmt.query_row(params![id], raw_memory_from_row)
        .map_err(|_| MirixError::NotFound(format!("Raw memory {} not found", id)))
}

/// Write back a mutated raw memory row (id is immutable, all other columns)
pub fn update_raw_memory_row(
    conn: &Connection,
    item: &RawMemoryItem,
    last_updated_by: &str,
) -> Result<()> {
    let filter_tags = serde_json::to_string(&item.filter_tags)?;
    let context_embedding = item
        .context_embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let embedding_config = item
        .embedding_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let last_modify = serde_json::to_string(&item.last_modify)?;

    let affected = conn.execute(
        "UPDATE raw_memories
         SET context = ?, filter_tags = ?, context_embedding = ?, embedding_config = ?,
             occurred_at = ?, updated_at = ?, last_modify = ?, last_updated_by = ?
         WHERE id = ?",
        params![
            item.context,
            filter_tags,
            context_embedding,
            embedding_config,
            format_ts(&item.occurred_at),
            format_ts(&item.updated_at),
            last_modify,
            last_updated_by,
            item.id,
        ],
    )?;

    if affected == 0 {
        return Err(MirixError::NotFound(format!(
            "Raw memory {} not found",
            item.id
        )));
    }

    Ok(())
}

/// Hard-delete a raw memory row; returns whether a row was removed
pub fn delete_raw_memory_row(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute("DELETE FROM raw_memories WHERE id = ?", params![id])?;
    Ok(affected > 0)
}

/// Validated search inputs, assembled by the manager
pub struct SearchQuery<'a> {
    pub organization_id: &'a str,
    pub user_id: Option<&'a str>,
    pub filter_tags: Option<&'a FilterTags>,
    pub sort: SortKey,
    pub cursor: Option<&'a Cursor>,
    pub time_range: Option<&'a TimeRange>,
    /// Rows to fetch (the manager asks for page size + 1)
    pub fetch_limit: usize,
}

fn tag_value_to_param(
    key: &str,
    value: &serde_json::Value,
    conditions: &mut Vec<String>,
    sql_params: &mut Vec<Box<dyn rusqlite::ToSql>>,
) -> Result<()> {
    match value {
        serde_json::Value::String(s) => {
            conditions.push(format!("json_extract(filter_tags, '$.{}') = ?", key));
            sql_params.push(Box::new(s.clone()));
        }
        serde_json::Value::Number(n) => {
            conditions.push(format!("json_extract(filter_tags, '$.{}') = ?", key));
            if let Some(i) = n.as_i64() {
                sql_params.push(Box::new(i));
            } else if let Some(f) = n.as_f64() {
                sql_params.push(Box::new(f));
            } else {
                return Err(MirixError::InvalidInput("Invalid number".to_string()));
            }
        }
        serde_json::Value::Bool(b) => {
            conditions.push(format!("json_extract(filter_tags, '$.{}') = ?", key));
            sql_params.push(Box::new(*b));
        }
        serde_json::Value::Null => {
            conditions.push(format!("json_extract(filter_tags, '$.{}') IS NULL", key));
        }
        _ => {
            return Err(MirixError::InvalidInput(format!(
                "Unsupported filter_tags value for key: {}",
                key
            )));
        }
    }

    Ok(())
}

/// Search raw memories with tag/time filtering and keyset (cursor) pagination
pub fn search_raw_memories(conn: &Connection, query: &SearchQuery) -> Result<Vec<RawMemoryItem>> {
    let mut sql = format!("SELECT {} FROM raw_memories", RAW_MEMORY_COLUMNS);

    let mut conditions = vec!["organization_id = ?".to_string()];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> =
        vec![Box::new(query.organization_id.to_string())];

    if let Some(user_id) = query.user_id {
        conditions.push("user_id = ?".to_string());
        sql_params.push(Box::new(user_id.to_string()));
    }

    // AND semantics across all supplied keys; scope is special-cased to
    // case-insensitive substring-or-equality against the stored value
    if let Some(filter_tags) = query.filter_tags {
        for (key, value) in filter_tags {
            if key == SCOPE_TAG {
                let needle = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                conditions.push(format!(
                    "(instr(lower(json_extract(filter_tags, '$.{scope}')), lower(?)) > 0
                      OR json_extract(filter_tags, '$.{scope}') = ?)",
                    scope = SCOPE_TAG
                ));
                sql_params.push(Box::new(needle.clone()));
                sql_params.push(Box::new(needle));
            } else {
                tag_value_to_param(key, value, &mut conditions, &mut sql_params)?;
            }
        }
    }

    if let Some(range) = query.time_range {
        let bounds = [
            ("created_at", ">=", range.created_at_gte),
            ("created_at", "<=", range.created_at_lte),
            ("updated_at", ">=", range.updated_at_gte),
            ("updated_at", "<=", range.updated_at_lte),
            ("occurred_at", ">=", range.occurred_at_gte),
            ("occurred_at", "<=", range.occurred_at_lte),
        ];
        for (column, op, bound) in bounds {
            if let Some(value) = bound {
                conditions.push(format!("{} {} ?", column, op));
                sql_params.push(Box::new(format_ts(&value)));
            }
        }
    }

    // Keyset predicate: rows strictly beyond the cursor in (sort, id) order.
    // The id tie-break turns the sort into a total order, which is what makes
    // pagination stable when many rows share a timestamp.
    let column = query.sort.field.as_str();
    if let Some(cursor) = query.cursor {
        let cmp = if query.sort.ascending { ">" } else { "<" };
        conditions.push(format!(
            "({col} {cmp} ? OR ({col} = ? AND id {cmp} ?))",
            col = column,
            cmp = cmp,
        ));
        let ts = format_ts(&cursor.value);
        sql_params.push(Box::new(ts.clone()));
        sql_params.push(Box::new(ts));
        sql_params.push(Box::new(cursor.id.clone()));
    }

    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));

    let direction = if query.sort.ascending { "ASC" } else { "DESC" };
    sql.push_str(&format!(
        " ORDER BY {col} {dir}, id {dir} LIMIT {limit}",
        col = column,
        dir = direction,
        limit = query.fetch_limit,
    ));

    let param_refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let items: Vec<RawMemoryItem> = stmt
        .query_map(param_refs.as_slice(), raw_memory_from_row)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(items)
}

/// Ids of raw memories whose updated_at is older than the cutoff
pub fn expired_raw_memory_ids(conn: &Connection, cutoff: &DateTime<Utc>) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare_cached("SELECT id FROM raw_memories WHERE updated_at < ? ORDER BY updated_at")?;

    let ids: Vec<String> = stmt
        .query_map(params![format_ts(cutoff)], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_ts_fixed_width_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(500);

        let a = format_ts(&early);
        let b = format_ts(&late);
        assert!(a < b);
        assert!(a.ends_with('Z'));
        // Fixed microsecond precision keeps widths equal
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_parse_ts_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(&now));
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
