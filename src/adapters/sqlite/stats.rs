use rusqlite::params;

use super::DbPool;
use crate::types::error::MailsortError;
use crate::types::{CategoryCount, DistributionRow, Stats};

pub fn get_stats(pool: &DbPool) -> Result<Stats, MailsortError> {
    let conn = pool.get()?;

    let (total, avg_time): (u32, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), AVG(processing_time) FROM classifications",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT predicted_category, COUNT(*) FROM classifications
         GROUP BY predicted_category ORDER BY COUNT(*) DESC, predicted_category ASC",
    )?;
    let by_category = stmt
        .query_map([], |row| {
            Ok(CategoryCount {
                category: row.get(0)?,
                count: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let training_examples: u32 =
        conn.query_row("SELECT COUNT(*) FROM training_data", [], |row| row.get(0))?;
    let reclassifications: u32 =
        conn.query_row("SELECT COUNT(*) FROM reclassifications", [], |row| row.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT category FROM folder_mappings
         UNION
         SELECT category FROM training_data
         ORDER BY 1",
    )?;
    let categories = stmt
        .query_map(params![], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(Stats {
        total,
        by_category,
        avg_time: avg_time.unwrap_or(0.0),
        training_examples,
        reclassifications,
        categories,
    })
}

/// Training example counts per (account, category).
pub fn training_distribution(pool: &DbPool) -> Result<Vec<DistributionRow>, MailsortError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT account, category, COUNT(*) FROM training_data
         GROUP BY account, category ORDER BY account ASC, category ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DistributionRow {
                account: row.get(0)?,
                category: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{classifications, folder_mappings, pool, training};
    use crate::types::{ClassificationRecord, TrainingExample};

    #[test]
    fn test_empty_store() {
        let pool = pool::in_memory().unwrap();
        let stats = get_stats(&pool).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.avg_time, 0.0);
        assert!(stats.by_category.is_empty());
    }

    #[test]
    fn test_counts_and_distribution() {
        let pool = pool::in_memory().unwrap();
        folder_mappings::ensure_defaults(&pool, "alice@example.com").unwrap();
        for (i, category) in ["personal", "personal", "spam"].iter().enumerate() {
            classifications::insert_or_get(
                &pool,
                &ClassificationRecord {
                    id: 0,
                    message_id: format!("<{i}>"),
                    account: "alice@example.com".into(),
                    subject: String::new(),
                    category: category.to_string(),
                    confidence: 0.8,
                    probabilities: None,
                    sender_domain: None,
                    processing_time: 0.2,
                    created_at: i as i64,
                },
            )
            .unwrap();
            training::upsert_example(
                &pool,
                &TrainingExample {
                    message_id: format!("<{i}>"),
                    account: "alice@example.com".into(),
                    subject: String::new(),
                    body: String::new(),
                    category: category.to_string(),
                    created_at: i as i64,
                },
                100,
            )
            .unwrap();
        }

        let stats = get_stats(&pool).unwrap();
        assert_eq!(stats.total, 3);
        assert!((stats.avg_time - 0.2).abs() < 1e-9);
        assert_eq!(stats.by_category[0].category, "personal");
        assert_eq!(stats.by_category[0].count, 2);
        assert_eq!(stats.training_examples, 3);
        assert_eq!(stats.categories, vec!["personal", "shopping", "spam"]);

        let distribution = training_distribution(&pool).unwrap();
        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution[1].category, "spam");
        assert_eq!(distribution[1].count, 1);
    }
}
