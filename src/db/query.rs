use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{FaceIdError, FaceIdResult};
use crate::models::identity::IdentityRecord;

pub fn decode_embedding_blob(blob: &[u8]) -> FaceIdResult<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(FaceIdError::InvalidEmbedding(format!(
            "blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub fn get_identity(conn: &Connection, username: &str) -> FaceIdResult<Option<IdentityRecord>> {
    let row = conn
        .query_row(
            "SELECT encoding_blob, dim, created_at, updated_at FROM identities WHERE username = ?1",
            params![username],
            |row| {
                Ok((
                    row.get::<_, Vec<u8>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    let Some((blob, dim, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let corrupt = |message: String| FaceIdError::CorruptRecord {
        username: username.to_string(),
        message,
    };
    let encoding = decode_embedding_blob(&blob).map_err(|e| corrupt(e.to_string()))?;
    if dim < 0 || encoding.len() != dim as usize {
        return Err(corrupt(format!(
            "recorded dimension {} but blob holds {} values",
            dim,
            encoding.len()
        )));
    }

    Ok(Some(IdentityRecord {
        username: username.to_string(),
        encoding,
        dim: dim as usize,
        created_at,
        updated_at,
    }))
}

pub fn count_identities(conn: &Connection) -> FaceIdResult<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM identities", [], |r| r.get(0))?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{schema, writer};

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn decode_round_trips_writer_encoding() {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(decode_embedding_blob(&writer::encode_embedding(&v)).unwrap(), v);
        assert!(decode_embedding_blob(&[1, 2, 3]).is_err());
    }

    #[test]
    fn missing_user_is_none() {
        let conn = mem_db();
        assert!(get_identity(&conn, "nobody").unwrap().is_none());
        assert_eq!(count_identities(&conn).unwrap(), 0);
    }

    #[test]
    fn dimension_disagreement_is_reported_as_corrupt() {
        let conn = mem_db();
        conn.execute(
            "INSERT INTO identities (username, encoding_blob, dim, created_at, updated_at) VALUES ('carol', ?1, 3, 0, 0)",
            params![writer::encode_embedding(&[1.0, 2.0])],
        )
        .unwrap();
        match get_identity(&conn, "carol") {
            Err(FaceIdError::CorruptRecord { username, .. }) => assert_eq!(username, "carol"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
