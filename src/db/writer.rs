use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::errors::{FaceIdError, FaceIdResult};
use crate::models::identity::UpsertOutcome;

/// Little-endian f32, four bytes per component.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Create or replace the encoding stored for `username`.
///
/// Runs as one IMMEDIATE transaction: concurrent writers for the same key
/// queue on SQLite's write lock, and readers see either the previous row or
/// the new one.
pub fn upsert_identity(conn: &Connection, username: &str, encoding: &[f32]) -> FaceIdResult<UpsertOutcome> {
    if encoding.is_empty() {
        return Err(FaceIdError::InvalidEmbedding("refusing to store an empty embedding".into()));
    }
    let now = chrono::Utc::now().timestamp();
    let blob = encode_embedding(encoding);

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let existed = tx
        .query_row(
            "SELECT 1 FROM identities WHERE username = ?1",
            params![username],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    tx.execute(
        "INSERT INTO identities (username, encoding_blob, dim, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(username) DO UPDATE SET encoding_blob = excluded.encoding_blob, dim = excluded.dim, updated_at = excluded.updated_at",
        params![username, blob, encoding.len() as i64, now],
    )?;
    tx.commit()?;

    Ok(if existed { UpsertOutcome::Updated } else { UpsertOutcome::Created })
}

pub fn delete_identity(conn: &Connection, username: &str) -> FaceIdResult<bool> {
    let deleted = conn.execute("DELETE FROM identities WHERE username = ?1", params![username])?;
    Ok(deleted > 0)
}
