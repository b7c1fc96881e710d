//! User lookup and insertion for auto-provisioning
//!
//! The memory store is multi-tenant: writes must never fail merely because
//! the caller skipped user bootstrap, so the manager lazily creates a minimal
//! active user the first time an unknown user_id shows up on a write.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;
use crate::types::User;

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let created_at: String = row.get("created_at")?;

    Ok(User {
        id: row.get("id")?,
        name: row.get("name")?,
        organization_id: row.get("organization_id")?,
        timezone: row.get("timezone")?,
        status: row.get("status")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Fetch a user by id, None if absent
pub fn get_user(conn: &Connection, id: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, organization_id, timezone, status, created_at
         FROM users WHERE id = ?",
    )?;

    match stmt.query_row(params![id], user_from_row) {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Insert a user record
pub fn insert_user(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, organization_id, timezone, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            user.id,
            user.name,
            user.organization_id,
            user.timezone,
            user.status,
            user.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[test]
    fn test_insert_and_get_user() {
        let storage = Storage::open_in_memory().unwrap();
        let user = User::provisioned("user-42", "org-1");

        storage.with_transaction(|conn| insert_user(conn, &user)).unwrap();

        let fetched = storage
            .with_connection(|conn| get_user(conn, "user-42"))
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, "user-42");
        assert_eq!(fetched.name, "user-42");
        assert_eq!(fetched.organization_id, "org-1");
        assert_eq!(fetched.status, "active");
        assert_eq!(fetched.timezone, User::DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_get_missing_user_is_none() {
        let storage = Storage::open_in_memory().unwrap();
        let result = storage
            .with_connection(|conn| get_user(conn, "user-none"))
            .unwrap();
        assert!(result.is_none());
    }
}
