pub mod schema;
pub mod writer;
pub mod query;
pub mod store;

use anyhow::Result;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Pooled connections with the same pragmas; the schema is applied once up front.
pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<DbPool> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    drop(open_or_create(db_path)?);
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| schema::apply_connection_pragmas(conn));
    let pool = r2d2::Pool::builder().max_size(size.max(1)).build(manager)?;
    Ok(pool)
}
