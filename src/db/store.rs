use std::path::Path;

use rusqlite::Connection;

use crate::db::{self, query, writer, DbPool};
use crate::errors::{FaceIdError, FaceIdResult};
use crate::models::identity::{IdentityRecord, UpsertOutcome};

/// Username → reference embedding, one row per user.
///
/// Every call takes a pooled connection on a blocking thread so request
/// tasks never wait on SQLite I/O.
#[derive(Clone)]
pub struct IdentityStore {
    pool: DbPool,
}

impl IdentityStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> anyhow::Result<Self> {
        Ok(Self::new(db::create_pool(db_path, pool_size)?))
    }

    async fn with_conn<T, F>(&self, f: F) -> FaceIdResult<T>
    where
        F: FnOnce(&Connection) -> FaceIdResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await
        .map_err(|e| FaceIdError::Internal(format!("store task failed: {}", e)))?
    }

    pub async fn get(&self, username: &str) -> FaceIdResult<Option<IdentityRecord>> {
        let username = username.to_string();
        self.with_conn(move |conn| query::get_identity(conn, &username)).await
    }

    pub async fn upsert(&self, username: &str, encoding: Vec<f32>) -> FaceIdResult<UpsertOutcome> {
        let username = username.to_string();
        self.with_conn(move |conn| writer::upsert_identity(conn, &username, &encoding)).await
    }

    pub async fn delete(&self, username: &str) -> FaceIdResult<bool> {
        let username = username.to_string();
        self.with_conn(move |conn| writer::delete_identity(conn, &username)).await
    }

    pub async fn count(&self) -> FaceIdResult<i64> {
        self.with_conn(query::count_identities).await
    }
}
