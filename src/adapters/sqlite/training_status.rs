use rusqlite::{params, Connection};
use tracing::warn;

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::TrainingStatus;

/// Claims the training flag. Returns false if another run holds it.
pub fn try_begin(pool: &DbPool) -> Result<bool, MailsortError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    let claimed = conn.execute(
        "UPDATE training_status
         SET is_training = 1, started_at = ?1, sample_count = 0, updated_at = ?1
         WHERE id = 1 AND is_training = 0",
        params![now],
    )?;
    Ok(claimed == 1)
}

pub fn set_sample_count(pool: &DbPool, sample_count: u32) -> Result<(), MailsortError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "UPDATE training_status SET sample_count = ?1, updated_at = ?2 WHERE id = 1",
        params![sample_count, now],
    )?;
    Ok(())
}

pub fn finish(pool: &DbPool) -> Result<(), MailsortError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "UPDATE training_status SET is_training = 0, updated_at = ?1 WHERE id = 1",
        params![now],
    )?;
    Ok(())
}

pub fn get(pool: &DbPool) -> Result<TrainingStatus, MailsortError> {
    let conn = pool.get()?;
    let status = conn.query_row(
        "SELECT is_training, started_at, sample_count, updated_at FROM training_status WHERE id = 1",
        [],
        |row| {
            Ok(TrainingStatus {
                is_training: row.get::<_, i64>(0)? != 0,
                started_at: row.get(1)?,
                sample_count: row.get(2)?,
                updated_at: row.get(3)?,
            })
        },
    )?;
    Ok(status)
}

/// Clears a flag left behind by a process that died mid-training.
pub fn reset_stale(conn: &Connection) -> Result<(), MailsortError> {
    let cleared = conn.execute(
        "UPDATE training_status SET is_training = 0 WHERE id = 1 AND is_training = 1",
        [],
    )?;
    if cleared > 0 {
        warn!("Cleared stale training flag from a previous run");
    }
    Ok(())
}
