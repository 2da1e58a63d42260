//! Face cluster and observation persistence.

use super::types::{FaceObservation, FaceRecord};
use super::{now_millis, IndexStore};
use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Embedding as little-endian f32 bytes
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]; trailing partial values are dropped
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn row_to_face(row: &Row<'_>) -> rusqlite::Result<FaceRecord> {
    Ok(FaceRecord {
        id: row.get(0)?,
        person_label: row.get(1)?,
        embedding: decode_embedding(&row.get::<_, Vec<u8>>(2)?),
        member_count: row.get::<_, i64>(3)? as u32,
    })
}

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<FaceObservation> {
    Ok(FaceObservation {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        face_id: row.get(2)?,
        embedding: decode_embedding(&row.get::<_, Vec<u8>>(3)?),
    })
}

pub(crate) fn insert_face(
    conn: &Connection,
    centroid: &[f32],
    member_count: u32,
    label: Option<&str>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO faces (person_label, centroid, member_count, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![label, encode_embedding(centroid), member_count, now_millis()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn update_face(conn: &Connection, face: &FaceRecord) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE faces SET person_label = ?2, centroid = ?3, member_count = ?4 WHERE id = ?1",
        params![
            face.id,
            face.person_label,
            encode_embedding(&face.embedding),
            face.member_count
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::UnknownFace { id: face.id });
    }
    Ok(())
}

/// Remove a cluster with no remaining observations
pub(crate) fn delete_face(conn: &Connection, id: i64) -> Result<(), StoreError> {
    conn.execute("DELETE FROM faces WHERE id = ?1", [id])?;
    Ok(())
}

pub(crate) fn face_by_id(conn: &Connection, id: i64) -> Result<Option<FaceRecord>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id, person_label, centroid, member_count FROM faces WHERE id = ?1",
            [id],
            row_to_face,
        )
        .optional()?)
}

pub(crate) fn list_faces(conn: &Connection) -> Result<Vec<FaceRecord>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, person_label, centroid, member_count FROM faces ORDER BY id")?;
    let rows = stmt.query_map([], row_to_face)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Record one face on one photo; both ends must exist
pub(crate) fn insert_observation(
    conn: &Connection,
    photo_id: i64,
    face_id: i64,
    embedding: &[f32],
) -> Result<i64, StoreError> {
    if face_by_id(conn, face_id)?.is_none() {
        return Err(StoreError::UnknownFace { id: face_id });
    }
    let photo_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM photos WHERE id = ?1)",
        [photo_id],
        |row| row.get(0),
    )?;
    if !photo_exists {
        return Err(StoreError::UnknownPhoto { id: photo_id });
    }

    conn.execute(
        "INSERT INTO face_observations (photo_id, face_id, embedding) VALUES (?1, ?2, ?3)",
        params![photo_id, face_id, encode_embedding(embedding)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Observations, optionally restricted to one cluster
pub(crate) fn list_observations(
    conn: &Connection,
    face_id: Option<i64>,
) -> Result<Vec<FaceObservation>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, photo_id, face_id, embedding FROM face_observations
         WHERE ?1 IS NULL OR face_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map([face_id], row_to_observation)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Repoint every observation of `from` at `to`
pub(crate) fn move_observations(
    conn: &Connection,
    from: i64,
    to: i64,
) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE face_observations SET face_id = ?2 WHERE face_id = ?1",
        params![from, to],
    )?)
}

impl IndexStore {
    /// Every face cluster, ascending id
    pub fn faces(&self) -> Result<Vec<FaceRecord>, StoreError> {
        self.read(list_faces)
    }

    pub fn face(&self, id: i64) -> Result<Option<FaceRecord>, StoreError> {
        self.read(|conn| face_by_id(conn, id))
    }

    pub fn observations(&self, face_id: Option<i64>) -> Result<Vec<FaceObservation>, StoreError> {
        self.read(|conn| list_observations(conn, face_id))
    }

    /// Name (or unname) a person cluster
    pub fn set_person_label(&self, face_id: i64, label: Option<&str>) -> Result<(), StoreError> {
        self.write(|tx| {
            let mut face = face_by_id(tx, face_id)?.ok_or(StoreError::UnknownFace { id: face_id })?;
            face.person_label = label.map(str::to_string);
            update_face(tx, &face)
        })
    }
}
