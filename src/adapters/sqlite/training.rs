use std::collections::HashMap;

use rusqlite::{params, Connection, Row};
use tracing::debug;

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::{Page, TrainingExample};

fn from_row(row: &Row<'_>) -> rusqlite::Result<TrainingExample> {
    Ok(TrainingExample {
        message_id: row.get(0)?,
        account: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        category: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn upsert_with(conn: &Connection, example: &TrainingExample) -> Result<(), MailsortError> {
    conn.execute(
        "INSERT OR REPLACE INTO training_data
            (message_id, account, subject, body, category, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            example.message_id,
            example.account,
            example.subject,
            example.body,
            example.category,
            example.created_at,
        ],
    )?;
    Ok(())
}

/// Deletes the oldest examples until at most `cap` remain. Returns the number removed.
pub fn prune_to_cap(conn: &Connection, cap: u32) -> Result<usize, MailsortError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM training_data", [], |row| row.get(0))?;
    let excess = count - i64::from(cap);
    if excess <= 0 {
        return Ok(0);
    }

    let removed = conn.execute(
        "DELETE FROM training_data WHERE id IN (
            SELECT id FROM training_data ORDER BY created_at ASC, id ASC LIMIT ?1
        )",
        params![excess],
    )?;
    debug!(removed, cap, "Pruned oldest training examples");
    Ok(removed)
}

/// Creates or replaces one example, then enforces the retention cap.
pub fn upsert_example(
    pool: &DbPool,
    example: &TrainingExample,
    cap: u32,
) -> Result<(), MailsortError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    upsert_with(&tx, example)?;
    prune_to_cap(&tx, cap)?;
    tx.commit()?;
    Ok(())
}

/// Batch form of [`upsert_example`], applied in one transaction.
pub fn upsert_examples(
    pool: &DbPool,
    examples: &[TrainingExample],
    cap: u32,
) -> Result<usize, MailsortError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    for example in examples {
        upsert_with(&tx, example)?;
    }
    prune_to_cap(&tx, cap)?;
    tx.commit()?;
    Ok(examples.len())
}

/// Message id to last recorded category for one account.
pub fn known_categories(
    pool: &DbPool,
    account: &str,
) -> Result<HashMap<String, String>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT message_id, category FROM training_data WHERE account = ?1")?;
    let rows = stmt
        .query_map(params![account], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<String, String>, _>>()?;
    Ok(rows)
}

pub fn update_category(
    conn: &Connection,
    message_id: &str,
    category: &str,
) -> Result<(), MailsortError> {
    conn.execute(
        "UPDATE training_data SET category = ?1 WHERE message_id = ?2",
        params![category, message_id],
    )?;
    Ok(())
}

/// Every example, oldest first, as fed to the trainer.
pub fn all_examples(pool: &DbPool) -> Result<Vec<TrainingExample>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT message_id, account, subject, body, category, created_at
         FROM training_data ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_recent(pool: &DbPool, page: Page) -> Result<Vec<TrainingExample>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT message_id, account, subject, body, category, created_at
         FROM training_data ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(params![page.limit, page.offset], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count(pool: &DbPool) -> Result<u32, MailsortError> {
    let conn = pool.get()?;
    let count = conn.query_row("SELECT COUNT(*) FROM training_data", [], |row| row.get(0))?;
    Ok(count)
}
