use rusqlite::{params, OptionalExtension};

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::ModelMetadata;

pub fn insert(pool: &DbPool, meta: &ModelMetadata) -> Result<i64, MailsortError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO model_metadata (
            model_id, training_secs, feature_secs, sample_count, feature_dim,
            class_count, coefficient_count, serialized_bytes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            meta.model_id,
            meta.training_secs,
            meta.feature_secs,
            meta.sample_count,
            meta.feature_dim,
            meta.class_count,
            meta.coefficient_count,
            meta.serialized_bytes as i64,
            meta.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn latest(pool: &DbPool) -> Result<Option<ModelMetadata>, MailsortError> {
    let conn = pool.get()?;
    let meta = conn
        .query_row(
            "SELECT id, model_id, training_secs, feature_secs, sample_count, feature_dim,
                    class_count, coefficient_count, serialized_bytes, created_at
             FROM model_metadata ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(ModelMetadata {
                    id: row.get(0)?,
                    model_id: row.get(1)?,
                    training_secs: row.get(2)?,
                    feature_secs: row.get(3)?,
                    sample_count: row.get(4)?,
                    feature_dim: row.get(5)?,
                    class_count: row.get(6)?,
                    coefficient_count: row.get(7)?,
                    serialized_bytes: row.get::<_, i64>(8)? as u64,
                    created_at: row.get(9)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}
