//! Database migrations for Mirix

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < SCHEMA_VERSION {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Initial schema (v1): raw memories and users
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Raw memory records. Timestamps are RFC3339 UTC with fixed
        -- microsecond precision so string comparison orders chronologically.
        CREATE TABLE IF NOT EXISTS raw_memories (
            id TEXT PRIMARY KEY,
            context TEXT NOT NULL,
            filter_tags TEXT NOT NULL DEFAULT '{}',
            user_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            context_embedding TEXT,
            embedding_config TEXT,
            occurred_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_modify TEXT NOT NULL,
            created_by TEXT,
            last_updated_by TEXT
        );

        -- End users, auto-provisioned on first write when absent
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            timezone TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        "#,
    )?;

    Ok(())
}

/// Search indexes (v2): one per sortable timestamp, org-first to match the
/// mandatory organization filter, with id for the pagination tie-break
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_raw_memories_org_updated
            ON raw_memories(organization_id, updated_at, id);
        CREATE INDEX IF NOT EXISTS idx_raw_memories_org_created
            ON raw_memories(organization_id, created_at, id);
        CREATE INDEX IF NOT EXISTS idx_raw_memories_org_occurred
            ON raw_memories(organization_id, occurred_at, id);
        CREATE INDEX IF NOT EXISTS idx_raw_memories_user
            ON raw_memories(user_id);

        INSERT INTO schema_version (version) VALUES (2);
        "#,
    )?;

    Ok(())
}
