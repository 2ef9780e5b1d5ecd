use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::uuid_from_sql;
use crate::db::{ts_from_sql, ts_to_sql, DatabaseError};

/// A stored bearer session. Only the SHA-256 of the token is persisted.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn insert_session(
    conn: &Connection,
    token_hash: &str,
    session: &SessionRecord,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            token_hash,
            session.user_id.to_string(),
            ts_to_sql(&session.created_at),
            ts_to_sql(&session.expires_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

pub fn get_session(conn: &Connection, token_hash: &str) -> Result<Option<SessionRecord>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT user_id, created_at, expires_at FROM sessions WHERE token_hash = ?1",
            params![token_hash],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(user_id, created_at, expires_at)| {
        Ok(SessionRecord {
            user_id: uuid_from_sql(&user_id)?,
            created_at: ts_from_sql(&created_at)?,
            expires_at: ts_from_sql(&expires_at)?,
        })
    })
    .transpose()
}

pub fn delete_session(conn: &Connection, token_hash: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        params![token_hash],
    )?;
    Ok(changed > 0)
}

pub fn delete_sessions_for_user(conn: &Connection, user_id: &Uuid) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM sessions WHERE user_id = ?1",
        params![user_id.to_string()],
    )?;
    Ok(changed)
}

/// Drop sessions whose expiry has passed.
pub fn prune_expired_sessions(conn: &Connection, now: &DateTime<Utc>) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![ts_to_sql(now)],
    )?;
    Ok(changed)
}
