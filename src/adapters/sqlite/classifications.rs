use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::{ClassificationRecord, Page, Probabilities};

const COLUMNS: &str = "id, message_id, account, subject, predicted_category, confidence,
                       probabilities, sender_domain, processing_time, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<ClassificationRecord> {
    let probabilities: Option<String> = row.get(6)?;
    Ok(ClassificationRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        account: row.get(2)?,
        subject: row.get(3)?,
        category: row.get(4)?,
        confidence: row.get(5)?,
        probabilities: probabilities.and_then(|json| serde_json::from_str::<Probabilities>(&json).ok()),
        sender_domain: row.get(7)?,
        processing_time: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn find_with(
    conn: &Connection,
    message_id: &str,
    account: &str,
) -> Result<Option<ClassificationRecord>, MailsortError> {
    let record = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM classifications WHERE message_id = ?1 AND account = ?2"),
            params![message_id, account],
            from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn find_existing(
    pool: &DbPool,
    message_id: &str,
    account: &str,
) -> Result<Option<ClassificationRecord>, MailsortError> {
    let conn = pool.get()?;
    find_with(&conn, message_id, account)
}

/// Inserts the record unless one already exists for (message_id, account).
///
/// Returns the stored row and whether this call created it. Concurrent callers
/// racing on the same key all get the single winning row back.
pub fn insert_or_get(
    pool: &DbPool,
    record: &ClassificationRecord,
) -> Result<(ClassificationRecord, bool), MailsortError> {
    let conn = pool.get()?;
    let probabilities = record
        .probabilities
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let inserted = conn.execute(
        "INSERT INTO classifications (
            message_id, account, subject, predicted_category, confidence,
            probabilities, sender_domain, processing_time, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(message_id, account) DO NOTHING",
        params![
            record.message_id,
            record.account,
            record.subject,
            record.category,
            record.confidence,
            probabilities,
            record.sender_domain,
            record.processing_time,
            record.created_at,
        ],
    )? == 1;

    let stored = find_with(&conn, &record.message_id, &record.account)?.ok_or_else(|| {
        MailsortError::Database(format!(
            "classification for {} vanished after insert",
            record.message_id
        ))
    })?;

    Ok((stored, inserted))
}

pub fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<ClassificationRecord>, MailsortError> {
    let conn = pool.get()?;
    let record = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM classifications WHERE id = ?1"),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(record)
}

pub fn list_recent(pool: &DbPool, page: Page) -> Result<Vec<ClassificationRecord>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM classifications
         ORDER BY created_at DESC, id DESC
         LIMIT ?1 OFFSET ?2"
    ))?;
    let rows = stmt
        .query_map(params![page.limit, page.offset], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;

    fn record(message_id: &str, category: &str) -> ClassificationRecord {
        ClassificationRecord {
            id: 0,
            message_id: message_id.into(),
            account: "alice@example.com".into(),
            subject: "Hello".into(),
            category: category.into(),
            confidence: 0.9,
            probabilities: Some(Probabilities::new(
                vec!["personal".into(), "shopping".into()],
                vec![0.9, 0.1],
            )),
            sender_domain: Some("example.com".into()),
            processing_time: 0.01,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_insert_then_duplicate_returns_first() {
        let pool = pool::in_memory().unwrap();

        let (first, inserted) = insert_or_get(&pool, &record("<a@x>", "personal")).unwrap();
        assert!(inserted);

        let (second, inserted) = insert_or_get(&pool, &record("<a@x>", "shopping")).unwrap();
        assert!(!inserted);
        assert_eq!(second.id, first.id);
        assert_eq!(second.category, "personal");

        let all = list_recent(&pool, Page::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].probabilities.as_ref().unwrap().get("personal"), Some(0.9));
    }

    #[test]
    fn test_same_message_for_other_account_is_separate() {
        let pool = pool::in_memory().unwrap();
        insert_or_get(&pool, &record("<a@x>", "personal")).unwrap();

        let mut other = record("<a@x>", "spam");
        other.account = "bob@example.com".into();
        let (_, inserted) = insert_or_get(&pool, &other).unwrap();
        assert!(inserted);

        assert!(find_existing(&pool, "<a@x>", "bob@example.com").unwrap().is_some());
        assert!(find_existing(&pool, "<b@x>", "bob@example.com").unwrap().is_none());
    }

    #[test]
    fn test_get_by_id() {
        let pool = pool::in_memory().unwrap();
        let (stored, _) = insert_or_get(&pool, &record("<a@x>", "personal")).unwrap();
        let fetched = get_by_id(&pool, stored.id).unwrap().unwrap();
        assert_eq!(fetched.message_id, "<a@x>");
        assert!(get_by_id(&pool, stored.id + 1).unwrap().is_none());
    }
}
