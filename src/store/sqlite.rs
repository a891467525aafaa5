//! SQLite-backed session store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::SessionStore;
use crate::error::GatewayError;
use crate::session::{Session, SessionId, SessionStatus};
use crate::Result;

const MAX_CONNECTIONS: u32 = 5;

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    status: String,
    external_identity: String,
    pairing_payload: String,
    is_active: i32,
    created_at: i64,
    updated_at: i64,
    last_connected_at: Option<i64>,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<SessionRow> for Session {
    fn from(r: SessionRow) -> Self {
        let status = r.status.parse().unwrap_or_else(|_| {
            tracing::warn!(session_id = %r.id, status = %r.status, "unknown status in store");
            SessionStatus::Disconnected
        });
        Self {
            id: SessionId::from_raw(r.id),
            name: r.name,
            status,
            external_identity: r.external_identity,
            pairing_payload: r.pairing_payload,
            is_active: r.is_active != 0,
            created_at: from_millis(r.created_at),
            updated_at: from_millis(r.updated_at),
            last_connected_at: r.last_connected_at.map(from_millis),
        }
    }
}

fn map_insert_error(e: sqlx::Error, name: &str) -> GatewayError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            GatewayError::AlreadyExists(name.to_string())
        }
        _ => e.into(),
    }
}

fn require_row(affected: u64, id: &SessionId) -> Result<()> {
    if affected == 0 {
        Err(GatewayError::NotFound(id.to_string()))
    } else {
        Ok(())
    }
}

/// SQLite-backed session store.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Wrap an existing pool. Call [`SqliteSessionStore::init`] first.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and set up the schema.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Single-connection in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create the `sessions` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sessions (
                id                TEXT PRIMARY KEY,
                name              TEXT NOT NULL UNIQUE,
                status            TEXT NOT NULL DEFAULT 'disconnected',
                external_identity TEXT NOT NULL DEFAULT '',
                pairing_payload   TEXT NOT NULL DEFAULT '',
                is_active         INTEGER NOT NULL DEFAULT 1,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL,
                last_connected_at INTEGER
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn update_field(&self, sql: &str, id: &SessionId, value: &str) -> Result<()> {
        let result = sqlx::query(sql)
            .bind(value)
            .bind(Utc::now().timestamp_millis())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sessions
               (id, name, status, external_identity, pairing_payload, is_active,
                created_at, updated_at, last_connected_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(session.id.as_str())
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&session.external_identity)
        .bind(&session.pairing_payload)
        .bind(session.is_active as i32)
        .bind(session.created_at.timestamp_millis())
        .bind(session.updated_at.timestamp_millis())
        .bind(session.last_connected_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &session.name))?;
        Ok(())
    }

    async fn get_by_id(&self, id: &SessionId) -> Result<Session> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Session> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(Into::into)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<Session>> {
        Ok(
            sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(Into::into)
                .collect(),
        )
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE sessions SET
                 name = ?, status = ?, external_identity = ?, pairing_payload = ?,
                 is_active = ?, updated_at = ?, last_connected_at = ?
               WHERE id = ?"#,
        )
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&session.external_identity)
        .bind(&session.pairing_payload)
        .bind(session.is_active as i32)
        .bind(Utc::now().timestamp_millis())
        .bind(session.last_connected_at.map(|t| t.timestamp_millis()))
        .bind(session.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &session.name))?;
        require_row(result.rows_affected(), &session.id)
    }

    async fn delete(&self, id: &SessionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        require_row(result.rows_affected(), id)
    }

    async fn set_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"UPDATE sessions SET
                 status = ?,
                 updated_at = ?,
                 last_connected_at = CASE WHEN ? = 'connected' THEN ? ELSE last_connected_at END
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(status.as_str())
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        require_row(result.rows_affected(), id)
    }

    async fn set_external_identity(&self, id: &SessionId, identity: &str) -> Result<()> {
        self.update_field(
            "UPDATE sessions SET external_identity = ?, updated_at = ? WHERE id = ?",
            id,
            identity,
        )
        .await
    }

    async fn set_pairing_payload(&self, id: &SessionId, payload: &str) -> Result<()> {
        self.update_field(
            "UPDATE sessions SET pairing_payload = ?, updated_at = ? WHERE id = ?",
            id,
            payload,
        )
        .await
    }

    async fn sessions_with_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        Ok(sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions WHERE status = ? ORDER BY created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
    }
}
