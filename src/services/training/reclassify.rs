use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::{info, warn};

use super::TrainingOrchestrator;
use crate::adapters::sqlite;
use crate::types::error::MailsortError;
use crate::types::{Account, FolderMapping, Reclassification};

/// Where a message was last seen during one scan.
#[derive(Debug, Clone)]
struct Location {
    folder: String,
    subject: String,
}

/// Compares current locations with recorded categories and returns the corrections.
/// Only mapped folders are scanned, so a move into an unmapped folder yields nothing.
fn find_moves(
    account: &str,
    mappings: &[FolderMapping],
    known: &HashMap<String, String>,
    locations: &BTreeMap<String, Location>,
) -> Vec<Reclassification> {
    let category_of: HashMap<&str, &str> = mappings
        .iter()
        .map(|m| (m.folder.as_str(), m.category.as_str()))
        .collect();
    let now = Utc::now().timestamp_millis();

    locations
        .iter()
        .filter_map(|(message_id, location)| {
            let old_category = known.get(message_id)?;
            let new_category = *category_of.get(location.folder.as_str())?;
            if old_category == new_category {
                return None;
            }
            let old_folder = mappings
                .iter()
                .find(|m| &m.category == old_category)
                .map(|m| m.folder.clone())
                .unwrap_or_default();
            Some(Reclassification {
                id: 0,
                message_id: message_id.clone(),
                account: account.to_string(),
                subject: location.subject.clone(),
                old_category: old_category.clone(),
                new_category: new_category.to_string(),
                old_folder,
                new_folder: location.folder.clone(),
                created_at: now,
            })
        })
        .collect()
}

impl TrainingOrchestrator {
    /// Scans every account; failures are logged per account.
    pub async fn detect_reclassifications(&self) -> Vec<Reclassification> {
        let mut all = Vec::new();
        for account in &self.accounts {
            match self.detect_for_account(account).await {
                Ok(events) => all.extend(events),
                Err(e) => warn!(account = %account.email, error = %e, "Reclassification scan failed"),
            }
        }
        if !all.is_empty() {
            info!(corrections = all.len(), "Detected reclassifications");
        }
        all
    }

    /// One pass over the account's mapped folders. Each moved message yields one
    /// event and its training example takes the new category.
    pub async fn detect_for_account(
        &self,
        account: &Account,
    ) -> Result<Vec<Reclassification>, MailsortError> {
        let known = sqlite::training::known_categories(&self.pool, &account.email)?;
        if known.is_empty() {
            return Ok(Vec::new());
        }
        let mappings = sqlite::folder_mappings::list_for_account(&self.pool, &account.email)?;

        let mut client = self.connect(account).await?;
        let mut locations = BTreeMap::new();
        for mapping in &mappings {
            let headers = match client.fetch_headers(&mapping.folder).await {
                Ok(headers) => headers,
                Err(e) => {
                    warn!(account = %account.email, folder = %mapping.folder, error = %e, "Skipping folder");
                    continue;
                }
            };
            for header in headers {
                // Generated ids differ per folder and cannot follow a move
                let Some(message_id) = header.message_id else {
                    continue;
                };
                locations.insert(
                    message_id,
                    Location {
                        folder: mapping.folder.clone(),
                        subject: header.subject,
                    },
                );
            }
        }
        client.logout().await;

        let mut events = find_moves(&account.email, &mappings, &known, &locations);
        for event in &mut events {
            event.id = sqlite::reclassifications::record_correction(&self.pool, event)?;
            info!(
                account = %account.email,
                message_id = %event.message_id,
                from = %event.old_category,
                to = %event.new_category,
                "Message reclassified by user"
            );
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{orchestrator, seeded_mailbox, settings, FakeMessage};
    use crate::adapters::sqlite;
    use crate::types::Page;

    #[tokio::test]
    async fn test_move_yields_exactly_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, mailbox) = orchestrator(seeded_mailbox(), settings(), dir.path());
        let alice = orch.accounts()[0].clone();
        orch.harvest(&alice).await.unwrap();

        assert!(orch.detect_for_account(&alice).await.unwrap().is_empty());

        mailbox.move_message("<note2@home>", "Shopping");
        let events = orch.detect_for_account(&alice).await.unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.message_id, "<note2@home>");
        assert_eq!(event.old_category, "personal");
        assert_eq!(event.new_category, "shopping");
        assert_eq!(event.old_folder, "INBOX");
        assert_eq!(event.new_folder, "Shopping");
        assert!(event.id > 0);

        let known = sqlite::training::known_categories(&orch.pool, &alice.email).unwrap();
        assert_eq!(known["<note2@home>"], "shopping");

        assert!(orch.detect_for_account(&alice).await.unwrap().is_empty());
        let stored = sqlite::reclassifications::list_recent(&orch.pool, Page::default()).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_move_to_unmapped_folder_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = seeded_mailbox().with_folder("Later", &[], vec![]);
        let (orch, mailbox_handle) = orchestrator(mailbox, settings(), dir.path());
        let alice = orch.accounts()[0].clone();
        orch.harvest(&alice).await.unwrap();

        mailbox_handle.move_message("<order1@shop>", "Later");
        assert!(orch.detect_for_account(&alice).await.unwrap().is_empty());

        let known = sqlite::training::known_categories(&orch.pool, &alice.email).unwrap();
        assert_eq!(known["<order1@shop>"], "shopping");

        // Once the folder is mapped the same move is picked up
        sqlite::folder_mappings::insert_discovered(&orch.pool, &alice.email, "Later", 1).unwrap();
        let events = orch.detect_for_account(&alice).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_id, "<order1@shop>");
        assert_eq!(events[0].old_category, "shopping");
        assert_eq!(events[0].new_category, "later");
        assert_eq!(events[0].new_folder, "Later");

        let known = sqlite::training::known_categories(&orch.pool, &alice.email).unwrap();
        assert_eq!(known["<order1@shop>"], "later");
        assert!(orch.detect_for_account(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_messages_without_id_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = seeded_mailbox();
        mailbox.folders.lock().unwrap()[0]
            .1
            .push(FakeMessage::new(None, "no id", "body"));
        let (orch, mailbox) = orchestrator(mailbox, settings(), dir.path());
        let alice = orch.accounts()[0].clone();
        orch.harvest(&alice).await.unwrap();

        {
            let mut folders = mailbox.folders.lock().unwrap();
            let moved = folders[0].1.pop().unwrap();
            folders[1].1.push(moved);
        }
        assert!(orch.detect_for_account(&alice).await.unwrap().is_empty());
    }
}
