use chrono::Utc;
use tracing::{info, warn};

use super::TrainingOrchestrator;
use crate::adapters::sqlite;
use crate::services::message;
use crate::types::error::MailsortError;
use crate::types::{Account, TrainingExample};

/// Folders whose largest/smallest count ratio exceeds this get a warning.
pub const IMBALANCE_RATIO: f64 = 10.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestReport {
    /// (folder, messages on the server)
    pub folder_counts: Vec<(String, u32)>,
    pub examples: usize,
    pub imbalanced: bool,
}

/// True when the largest non-empty count is more than ten times the smallest.
pub fn is_imbalanced(counts: &[u32]) -> bool {
    let non_empty = counts.iter().copied().filter(|&c| c > 0);
    match (non_empty.clone().min(), non_empty.max()) {
        (Some(min), Some(max)) => f64::from(max) / f64::from(min) > IMBALANCE_RATIO,
        _ => false,
    }
}

impl TrainingOrchestrator {
    /// Stores the most recent messages of every mapped folder as labelled examples.
    pub async fn harvest(&self, account: &Account) -> Result<HarvestReport, MailsortError> {
        let mappings = sqlite::folder_mappings::list_for_account(&self.pool, &account.email)?;
        let mut client = self.connect(account).await?;
        let mut report = HarvestReport::default();
        let mut examples = Vec::new();
        let now = Utc::now().timestamp_millis();
        let cap = self.settings.max_emails_per_folder;

        for mapping in &mappings {
            let count = match client.message_count(&mapping.folder).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(account = %account.email, folder = %mapping.folder, error = %e, "Skipping folder");
                    continue;
                }
            };
            sqlite::folder_mappings::update_message_count(
                &self.pool,
                &account.email,
                &mapping.folder,
                count,
            )?;
            report.folder_counts.push((mapping.folder.clone(), count));
            if count == 0 {
                continue;
            }

            let fetched = match client.fetch_messages(&mapping.folder, Some(cap)).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(account = %account.email, folder = %mapping.folder, error = %e, "Fetch failed");
                    continue;
                }
            };
            for item in fetched {
                let parsed = message::parse(&item.raw);
                let message_id = if parsed.message_id.is_empty() {
                    message::generated_message_id(&account.email, &mapping.folder, item.uid)
                } else {
                    parsed.message_id.clone()
                };
                examples.push(TrainingExample {
                    message_id,
                    account: account.email.clone(),
                    subject: parsed.subject.clone(),
                    body: parsed.body_excerpt(),
                    category: mapping.category.clone(),
                    created_at: now,
                });
            }
        }
        client.logout().await;

        let counts: Vec<u32> = report.folder_counts.iter().map(|(_, c)| *c).collect();
        report.imbalanced = is_imbalanced(&counts);
        if report.imbalanced {
            warn!(
                account = %account.email,
                counts = ?report.folder_counts,
                "Folder sizes are heavily imbalanced, predictions will favour the larger folders"
            );
        }

        report.examples =
            sqlite::training::upsert_examples(&self.pool, &examples, self.settings.max_examples)?;
        info!(account = %account.email, examples = report.examples, "Harvested training examples");
        Ok(report)
    }
}
