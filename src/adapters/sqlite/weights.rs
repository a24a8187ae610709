use std::collections::HashMap;

use rusqlite::params;

use super::DbPool;
use crate::types::error::MailsortError;

/// Stored preferences for one account. Categories without a row weigh 1.0.
pub fn get_weights(pool: &DbPool, account: &str) -> Result<HashMap<String, f64>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT category, weight FROM user_weights WHERE account = ?1")?;
    let rows = stmt
        .query_map(params![account], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<String, f64>, _>>()?;
    Ok(rows)
}

pub fn set_weights(
    pool: &DbPool,
    account: &str,
    weights: &HashMap<String, f64>,
) -> Result<(), MailsortError> {
    if let Some((category, weight)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(MailsortError::InvalidInput(format!(
            "weight for {} must be a non-negative number, got {}",
            category, weight
        )));
    }

    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    let tx = conn.unchecked_transaction()?;
    for (category, weight) in weights {
        tx.execute(
            "INSERT INTO user_weights (account, category, weight, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(account, category) DO UPDATE SET weight = ?3, updated_at = ?4",
            params![account, category, weight, now],
        )?;
    }
    tx.commit()?;
    Ok(())
}
