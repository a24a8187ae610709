use rusqlite::{params, Connection};

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::{Page, Reclassification};

pub fn insert(conn: &Connection, event: &Reclassification) -> Result<i64, MailsortError> {
    conn.execute(
        "INSERT INTO reclassifications (
            message_id, account, subject, old_category, new_category,
            old_folder, new_folder, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.message_id,
            event.account,
            event.subject,
            event.old_category,
            event.new_category,
            event.old_folder,
            event.new_folder,
            event.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Records the correction and relabels the training example atomically.
pub fn record_correction(pool: &DbPool, event: &Reclassification) -> Result<i64, MailsortError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    let id = insert(&tx, event)?;
    super::training::update_category(&tx, &event.message_id, &event.new_category)?;
    tx.commit()?;
    Ok(id)
}

pub fn list_recent(pool: &DbPool, page: Page) -> Result<Vec<Reclassification>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, message_id, account, subject, old_category, new_category,
                COALESCE(old_folder, ''), COALESCE(new_folder, ''), created_at
         FROM reclassifications
         ORDER BY created_at DESC, id DESC
         LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(params![page.limit, page.offset], |row| {
            Ok(Reclassification {
                id: row.get(0)?,
                message_id: row.get(1)?,
                account: row.get(2)?,
                subject: row.get(3)?,
                old_category: row.get(4)?,
                new_category: row.get(5)?,
                old_folder: row.get(6)?,
                new_folder: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
