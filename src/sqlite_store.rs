//! SQLite-backed [`Store`] implementation.
//!
//! Maps every [`Store`] operation onto the `kv` and `counters` tables
//! created by [`migrate`](crate::migrate). Batches from [`Store::apply`]
//! run inside one transaction; counters use a single upsert with
//! `RETURNING`, so id assignment is atomic across connections.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use context_engine_core::error::{Error, Result};
use context_engine_core::store::{Store, WriteOp};

/// Keys fetched per `IN (...)` query in [`Store::get_many`].
const GET_MANY_CHUNK: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, dataset: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM kv WHERE dataset = ? AND key = ?")
                .bind(dataset)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::storage)?;
        Ok(value)
    }

    async fn get_many(&self, dataset: &str, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut found = std::collections::HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(GET_MANY_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT key, value FROM kv WHERE dataset = ");
            qb.push_bind(dataset);
            qb.push(" AND key IN (");
            let mut separated = qb.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            let rows = qb
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(Error::storage)?;
            for row in rows {
                let key: String = row.get("key");
                let value: Vec<u8> = row.get("value");
                found.insert(key, value);
            }
        }
        Ok(keys.iter().map(|k| found.get(k).cloned()).collect())
    }

    async fn put(&self, dataset: &str, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (dataset, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(dataset, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(dataset)
        .bind(key)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(())
    }

    async fn delete(&self, dataset: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM kv WHERE dataset = ? AND key = ?")
            .bind(dataset)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn has(&self, dataset: &str, key: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM kv WHERE dataset = ? AND key = ?")
                .bind(dataset)
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::storage)?;
        Ok(exists)
    }

    async fn keys(&self, dataset: &str) -> Result<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT key FROM kv WHERE dataset = ? ORDER BY key ASC")
                .bind(dataset)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::storage)?;
        Ok(keys)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(Error::storage)?;

        for op in &ops {
            match op {
                WriteOp::Put {
                    dataset,
                    key,
                    value,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO kv (dataset, key, value, updated_at)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT(dataset, key) DO UPDATE SET
                            value = excluded.value,
                            updated_at = excluded.updated_at
                        "#,
                    )
                    .bind(dataset)
                    .bind(key)
                    .bind(value)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(Error::storage)?;
                }
                WriteOp::Delete { dataset, key } => {
                    sqlx::query("DELETE FROM kv WHERE dataset = ? AND key = ?")
                        .bind(dataset)
                        .bind(key)
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::storage)?;
                }
            }
        }

        tx.commit().await.map_err(Error::storage)?;
        Ok(())
    }

    async fn increment(&self, counter: &str) -> Result<u64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, value) VALUES (?, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(counter)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::storage)?;
        Ok(value as u64)
    }
}
