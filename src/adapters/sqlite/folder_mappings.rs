use std::collections::BTreeSet;

use rusqlite::{params, Row};
use tracing::info;

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::FolderMapping;

/// Folders every account starts with, as (folder, category).
pub const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("INBOX", "personal"),
    ("Shopping", "shopping"),
    ("Junk", "spam"),
];

/// Category name derived from a folder name.
pub fn normalize_category(folder: &str) -> String {
    folder
        .trim()
        .to_lowercase()
        .replace(|c: char| c == '/' || c == ' ', "_")
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<FolderMapping> {
    Ok(FolderMapping {
        account: row.get(0)?,
        folder: row.get(1)?,
        category: row.get(2)?,
        auto_discovered: row.get::<_, i64>(3)? != 0,
        message_count: row.get(4)?,
        last_checked: row.get(5)?,
    })
}

/// Inserts the default folder mappings for an account, keeping existing rows.
pub fn ensure_defaults(pool: &DbPool, account: &str) -> Result<(), MailsortError> {
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    for (folder, category) in DEFAULT_MAPPINGS {
        tx.execute(
            "INSERT OR IGNORE INTO folder_mappings (account, folder, category, auto_discovered)
             VALUES (?1, ?2, ?3, 0)",
            params![account, folder, category],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Records a newly discovered folder. Returns false when it was already mapped.
pub fn insert_discovered(
    pool: &DbPool,
    account: &str,
    folder: &str,
    message_count: u32,
) -> Result<bool, MailsortError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    let category = normalize_category(folder);
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO folder_mappings
            (account, folder, category, auto_discovered, message_count, last_checked)
         VALUES (?1, ?2, ?3, 1, ?4, ?5)",
        params![account, folder, category, message_count, now],
    )?;
    if inserted == 1 {
        info!(account = %account, folder = %folder, category = %category, "Mapped new folder");
    }
    Ok(inserted == 1)
}

pub fn update_message_count(
    pool: &DbPool,
    account: &str,
    folder: &str,
    message_count: u32,
) -> Result<(), MailsortError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "UPDATE folder_mappings SET message_count = ?1, last_checked = ?2
         WHERE account = ?3 AND folder = ?4",
        params![message_count, now, account, folder],
    )?;
    Ok(())
}

/// Mappings for one account in a stable order.
pub fn list_for_account(pool: &DbPool, account: &str) -> Result<Vec<FolderMapping>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT account, folder, category, auto_discovered, message_count, last_checked
         FROM folder_mappings WHERE account = ?1
         ORDER BY auto_discovered ASC, folder ASC",
    )?;
    let rows = stmt
        .query_map(params![account], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_all(pool: &DbPool) -> Result<Vec<FolderMapping>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT account, folder, category, auto_discovered, message_count, last_checked
         FROM folder_mappings ORDER BY account ASC, auto_discovered ASC, folder ASC",
    )?;
    let rows = stmt
        .query_map([], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Categories an account has a folder for.
pub fn categories_for_account(
    pool: &DbPool,
    account: &str,
) -> Result<BTreeSet<String>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT DISTINCT category FROM folder_mappings WHERE account = ?1")?;
    let rows = stmt
        .query_map(params![account], |row| row.get(0))?
        .collect::<Result<BTreeSet<String>, _>>()?;
    Ok(rows)
}

/// Distinct categories across all mappings, sorted.
pub fn all_categories(pool: &DbPool) -> Result<Vec<String>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT DISTINCT category FROM folder_mappings ORDER BY category ASC")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(rows)
}
