use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::TrainingOrchestrator;
use crate::adapters::sqlite;
use crate::types::error::MailsortError;
use crate::types::Account;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    /// Folders mapped to a new category in this pass
    pub new_mappings: Vec<String>,
    /// Existing mappings whose message count was refreshed
    pub refreshed: usize,
}

impl TrainingOrchestrator {
    /// Maps non-empty user folders to categories and refreshes counts of mapped ones.
    pub async fn discover_folders(&self, account: &Account) -> Result<DiscoveryReport, MailsortError> {
        let mapped: HashSet<String> =
            sqlite::folder_mappings::list_for_account(&self.pool, &account.email)?
                .into_iter()
                .map(|m| m.folder)
                .collect();

        let mut client = self.connect(account).await?;
        let folders = match client.list_folders().await {
            Ok(folders) => folders,
            Err(e) => {
                client.logout().await;
                return Err(e);
            }
        };

        let mut report = DiscoveryReport::default();
        for folder in folders.iter().filter(|f| f.is_trainable()) {
            let count = match client.message_count(&folder.name).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(account = %account.email, folder = %folder.name, error = %e, "Could not open folder");
                    continue;
                }
            };

            if mapped.contains(&folder.name) {
                sqlite::folder_mappings::update_message_count(
                    &self.pool,
                    &account.email,
                    &folder.name,
                    count,
                )?;
                report.refreshed += 1;
            } else if count > 0
                && sqlite::folder_mappings::insert_discovered(
                    &self.pool,
                    &account.email,
                    &folder.name,
                    count,
                )?
            {
                report.new_mappings.push(folder.name.clone());
            } else {
                debug!(folder = %folder.name, count, "Skipping empty unmapped folder");
            }
        }
        client.logout().await;

        if let Some(watchers) = &self.watchers {
            for folder in &report.new_mappings {
                watchers.watch(account, folder).await;
            }
        }
        if !report.new_mappings.is_empty() {
            info!(account = %account.email, folders = ?report.new_mappings, "Discovered folders");
        }
        Ok(report)
    }
}
