//! Identity Directory: registered user records and lookup.
//!
//! Stores `{id, email, name, password_hash}` plus refresh-token state.
//! Emails are unique case-insensitively; users are never hard-deleted, so
//! task owner references stay resolvable for the lifetime of the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{self, Db};
use crate::error::ApiError;

const DEFAULT_USER_PAGE_SIZE: i64 = 50;
const MAX_USER_PAGE_SIZE: i64 = 100;

/// A registered user. Never serialized directly; the API layer projects
/// it into a view without the credential fields.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to register a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Raw listing parameters for the "other users" directory view.
#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

/// One page of the user directory.
#[derive(Debug, Clone)]
pub struct UserPage {
    pub users: Vec<Identity>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Register a new identity. Email uniqueness is enforced by the store
    /// (case-insensitive).
    pub fn create(&self, new: NewIdentity) -> Result<Identity, ApiError> {
        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            email: new.email.trim().to_lowercase(),
            name: new.name.trim().to_string(),
            password_hash: new.password_hash,
            refresh_token: None,
            refresh_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };

        let conn = self.db.lock();
        let result = conn.execute(
            "INSERT INTO users (id, email, name, password_hash, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                identity.id.to_string(),
                identity.email,
                identity.name,
                identity.password_hash,
                identity.created_at.to_rfc3339(),
                identity.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(identity),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ApiError::Validation("Email is already in use".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, ApiError> {
        let conn = self.db.lock();
        let identity = conn
            .query_row(
                &format!("{} WHERE id = ?", SELECT_USER),
                params![id.to_string()],
                row_to_identity,
            )
            .optional()?;
        Ok(identity)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Identity>, ApiError> {
        let conn = self.db.lock();
        let identity = conn
            .query_row(
                &format!("{} WHERE email = ?", SELECT_USER),
                params![email.trim().to_lowercase()],
                row_to_identity,
            )
            .optional()?;
        Ok(identity)
    }

    /// Batch lookup for reference expansion. Ids missing from the store
    /// are simply absent from the result map.
    pub fn find_by_ids(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Identity>, ApiError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE id IN ({})", SELECT_USER, placeholders);
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        let conn = self.db.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_identity)?;

        let mut found = HashMap::new();
        for row in rows {
            let identity = row?;
            found.insert(identity.id, identity);
        }
        Ok(found)
    }

    /// List users other than `exclude`, newest first, optionally filtered
    /// by a case-insensitive substring over name and email.
    pub fn search(&self, query: &UserQuery, exclude: Uuid) -> Result<UserPage, ApiError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_USER_PAGE_SIZE)
            .clamp(1, MAX_USER_PAGE_SIZE);
        let skip = (page - 1) * limit;

        let mut where_parts = vec!["id <> ?".to_string()];
        let mut values = vec![exclude.to_string()];

        if let Some(needle) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            where_parts
                .push("(name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\')".to_string());
            let pattern = db::like_pattern(needle);
            values.push(pattern.clone());
            values.push(pattern);
        }

        let where_sql = where_parts.join(" AND ");

        let conn = self.db.lock();
        let sql = format!(
            "{} WHERE {} ORDER BY created_at DESC LIMIT {} OFFSET {}",
            SELECT_USER, where_sql, limit, skip
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_identity)?;
        let users = rows.collect::<Result<Vec<_>, _>>()?;

        let count_sql = format!("SELECT COUNT(*) FROM users WHERE {}", where_sql);
        let total: i64 =
            conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

        Ok(UserPage {
            users,
            total,
            page,
            limit,
            total_pages: (total + limit - 1) / limit,
        })
    }

    /// Store or clear the refresh token for a user.
    pub fn set_refresh_token(
        &self,
        id: Uuid,
        token: Option<(&str, DateTime<Utc>)>,
    ) -> Result<(), ApiError> {
        let (token_value, expires_value) = match token {
            Some((t, exp)) => (Some(t.to_string()), Some(exp.to_rfc3339())),
            None => (None, None),
        };

        let conn = self.db.lock();
        conn.execute(
            "UPDATE users SET refresh_token = ?, refresh_token_expires_at = ?, updated_at = ?
             WHERE id = ?",
            params![
                token_value,
                expires_value,
                Utc::now().to_rfc3339(),
                id.to_string()
            ],
        )?;
        Ok(())
    }

    /// Resolve a refresh token to its owner, if the token is known and
    /// not yet expired.
    pub fn find_by_refresh_token(&self, token: &str) -> Result<Option<Identity>, ApiError> {
        let conn = self.db.lock();
        let identity = conn
            .query_row(
                &format!("{} WHERE refresh_token = ?", SELECT_USER),
                params![token],
                row_to_identity,
            )
            .optional()?;
        drop(conn);

        Ok(identity.filter(|user| {
            user.refresh_token_expires_at
                .map(|exp| exp > Utc::now())
                .unwrap_or(false)
        }))
    }

    /// Invalidate a refresh token wherever it is stored. A no-op for
    /// unknown tokens.
    pub fn clear_refresh_token(&self, token: &str) -> Result<(), ApiError> {
        let conn = self.db.lock();
        conn.execute(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL, updated_at = ?
             WHERE refresh_token = ?",
            params![Utc::now().to_rfc3339(), token],
        )?;
        Ok(())
    }
}

const SELECT_USER: &str = "SELECT id, email, name, password_hash, refresh_token, \
     refresh_token_expires_at, created_at, updated_at FROM users";

fn row_to_identity(row: &Row) -> rusqlite::Result<Identity> {
    let id: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let refresh_expires: Option<String> = row.get("refresh_token_expires_at")?;

    Ok(Identity {
        id: db::parse_id(&id),
        email: row.get("email")?,
        name: row.get("name")?,
        password_hash: row.get("password_hash")?,
        refresh_token: row.get("refresh_token")?,
        refresh_token_expires_at: refresh_expires.map(|raw| db::parse_timestamp(&raw)),
        created_at: db::parse_timestamp(&created_at),
        updated_at: db::parse_timestamp(&updated_at),
    })
}
