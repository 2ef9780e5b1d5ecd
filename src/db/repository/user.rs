use std::str::FromStr;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{uuid_from_sql, SqlFilter};
use crate::db::{ts_from_sql, ts_to_sql, DatabaseError};
use crate::models::*;

const USER_COLUMNS: &str = "id, name, email, role, is_active, created_at";

struct UserRow {
    id: String,
    name: String,
    email: String,
    role: String,
    is_active: bool,
    created_at: String,
}

impl UserRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: row.get(3)?,
            is_active: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_user(self) -> Result<User, DatabaseError> {
        Ok(User {
            id: uuid_from_sql(&self.id)?,
            name: self.name,
            email: self.email,
            role: Role::from_str(&self.role)?,
            is_active: self.is_active,
            created_at: ts_from_sql(&self.created_at)?,
        })
    }
}

pub fn insert_user(conn: &Connection, user: &User, password_hash: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (id, name, email, role, password_hash, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id.to_string(),
            user.name,
            user.email,
            user.role.as_str(),
            password_hash,
            user.is_active,
            ts_to_sql(&user.created_at),
        ],
    )
    .map_err(DatabaseError::from_write)?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            UserRow::read,
        )
        .optional()?;
    row.map(UserRow::into_user).transpose()
}

/// Fetch a user together with the stored password hash (login path only).
pub fn get_user_credentials(
    conn: &Connection,
    email: &str,
) -> Result<Option<(User, String)>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1"),
            params![email],
            |row| Ok((UserRow::read(row)?, row.get::<_, String>(6)?)),
        )
        .optional()?;
    row.map(|(user, hash)| Ok((user.into_user()?, hash))).transpose()
}

pub fn email_exists(conn: &Connection, email: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE email = ?1",
        params![email],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn set_user_active(conn: &Connection, id: &Uuid, active: bool) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET is_active = ?1 WHERE id = ?2",
        params![active, id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "User".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn delete_user(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
    Ok(changed > 0)
}

pub fn list_users(
    conn: &Connection,
    filter: &UserFilter,
    page: &PageRequest,
) -> Result<Page<User>, DatabaseError> {
    let mut where_clause = SqlFilter::new();
    if let Some(role) = filter.role {
        where_clause.and("role = ?", role.as_str().to_string());
    }

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM users{}", where_clause.sql()),
        params_from_iter(where_clause.params()),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users{} ORDER BY created_at DESC, email ASC LIMIT ? OFFSET ?",
        where_clause.sql()
    ))?;
    let rows = stmt
        .query_map(
            params_from_iter(where_clause.params_with_page(page)),
            UserRow::read,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(UserRow::into_user)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page {
        items,
        pagination: Pagination::new(page, total.max(0) as u64),
    })
}
