use anyhow::Result;
use rusqlite::Connection;
use std::time::Duration;

/// Per-connection settings; also run by the pool on every new connection.
pub fn apply_connection_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // Concurrent writers wait on the lock instead of failing with SQLITE_BUSY.
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    apply_connection_pragmas(conn)?;
    Ok(())
}

pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS identities (
  username TEXT PRIMARY KEY NOT NULL,
  encoding_blob BLOB NOT NULL,
  dim INTEGER NOT NULL,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
    "#,
    )?;
    Ok(())
}
