/*
 * Responsibility
 * - Durable cache entries, one row ("document") per physical key
 * - Columns: key_name, fingerprint (jsonb), date_updating (timestamptz), serialize (text)
 * - Pool is created lazily; the table is created on first use
 */
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::services::cache::client::{CacheBackend, CacheError, CacheResult};
use crate::services::cache::factory::BackendKind;
use crate::services::context::RequestFingerprint;

pub const DEFAULT_TABLE: &str = "cache_documents";

#[derive(Debug)]
pub struct DocumentStore {
    pool: PgPool,
    table: String,
    schema_ready: OnceCell<()>,
}

impl DocumentStore {
    /// Does not touch the network; the first command opens the connection.
    pub fn connect_lazy(database_url: &str, table: &str) -> CacheResult<Self> {
        if !is_identifier(table) {
            return Err(CacheError::InvalidValue(format!(
                "invalid document table name: {table}"
            )));
        }
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| CacheError::BackendConnection(e.to_string()))?;

        Ok(Self::with_pool(pool, table))
    }

    pub fn with_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_string(),
            schema_ready: OnceCell::new(),
        }
    }

    async fn pool(&self) -> CacheResult<&PgPool> {
        self.schema_ready
            .get_or_try_init(|| async {
                let ddl = format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        key_name      TEXT PRIMARY KEY,
                        fingerprint   JSONB,
                        date_updating TIMESTAMPTZ NOT NULL,
                        serialize     TEXT NOT NULL
                    )
                    "#,
                    self.table
                );
                sqlx::query(&ddl)
                    .execute(&self.pool)
                    .await
                    .map_err(db_error)?;
                debug!(table = %self.table, "document cache table ready");
                Ok::<(), CacheError>(())
            })
            .await?;
        Ok(&self.pool)
    }
}

fn db_error(e: sqlx::Error) -> CacheError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CacheError::BackendConnection(e.to_string())
        }
        _ => CacheError::BackendCommand(e.to_string()),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Translate a glob (`*`, `?`) into a LIKE pattern escaped with `\`.
fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}

#[async_trait]
impl CacheBackend for DocumentStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn get_string(&self, key: &str) -> CacheResult<Option<String>> {
        let pool = self.pool().await?;
        let sql = format!("SELECT serialize FROM {} WHERE key_name = $1", self.table);
        sqlx::query_scalar::<_, String>(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(db_error)
    }

    async fn set_string(
        &self,
        key: &str,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            r#"
            INSERT INTO {} (key_name, fingerprint, date_updating, serialize)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key_name) DO UPDATE
            SET fingerprint = EXCLUDED.fingerprint,
                date_updating = EXCLUDED.date_updating,
                serialize = EXCLUDED.serialize
            "#,
            self.table
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(Json(origin))
            .bind(Utc::now())
            .bind(value)
            .execute(pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn replace_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        origin: &RequestFingerprint,
    ) -> CacheResult<bool> {
        let pool = self.pool().await?;
        let done = match expected {
            Some(expected) => {
                let sql = format!(
                    r#"
                    UPDATE {}
                    SET fingerprint = $2, date_updating = $3, serialize = $4
                    WHERE key_name = $1 AND serialize = $5
                    "#,
                    self.table
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(Json(origin))
                    .bind(Utc::now())
                    .bind(value)
                    .bind(expected)
                    .execute(pool)
                    .await
            }
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO {} (key_name, fingerprint, date_updating, serialize)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (key_name) DO NOTHING
                    "#,
                    self.table
                );
                sqlx::query(&sql)
                    .bind(key)
                    .bind(Json(origin))
                    .bind(Utc::now())
                    .bind(value)
                    .execute(pool)
                    .await
            }
        }
        .map_err(db_error)?;

        Ok(done.rows_affected() == 1)
    }

    async fn del(&self, key: &str) -> CacheResult<u64> {
        let pool = self.pool().await?;
        let sql = format!("DELETE FROM {} WHERE key_name = $1", self.table);
        let done = sqlx::query(&sql)
            .bind(key)
            .execute(pool)
            .await
            .map_err(db_error)?;
        Ok(done.rows_affected())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let pool = self.pool().await?;
        let sql = format!(
            r#"SELECT key_name FROM {} WHERE key_name LIKE $1 ESCAPE '\' ORDER BY key_name"#,
            self.table
        );
        sqlx::query_scalar::<_, String>(&sql)
            .bind(glob_to_like(pattern))
            .fetch_all(pool)
            .await
            .map_err(db_error)
    }
}
