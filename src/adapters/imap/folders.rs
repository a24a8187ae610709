use futures::TryStreamExt;
use serde::Serialize;
use tracing::debug;

use super::connection::ImapSession;
use crate::types::error::MailsortError;

/// Special-use attributes of folders that never hold training data.
const SYSTEM_ATTRIBUTES: &[&str] = &["Trash", "Drafts", "Sent", "Archive", "All"];

/// Provider names for the same folders, matched on the last path component.
const SYSTEM_NAMES: &[&str] = &[
    "trash",
    "deleted",
    "deleted items",
    "deleted messages",
    "bin",
    "drafts",
    "draft",
    "sent",
    "sent items",
    "sent mail",
    "sent messages",
    "archive",
    "archives",
    "all mail",
    "outbox",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FolderInfo {
    pub name: String,
    pub attributes: Vec<String>,
    pub selectable: bool,
    pub is_system: bool,
}

impl FolderInfo {
    pub fn new(name: impl Into<String>, attributes: Vec<String>) -> Self {
        let name = name.into();
        let selectable = !attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case("NoSelect") || a.contains("NoSelect"));
        let is_system = is_system_folder(&name, &attributes);
        Self {
            name,
            attributes,
            selectable,
            is_system,
        }
    }

    /// Folders that may be mapped to a category.
    pub fn is_trainable(&self) -> bool {
        self.selectable && !self.is_system
    }
}

/// Trash, drafts, sent, archive and all-mail folders, by attribute or name.
/// Junk stays: it backs the spam category.
pub fn is_system_folder(name: &str, attributes: &[String]) -> bool {
    if attributes
        .iter()
        .any(|attr| SYSTEM_ATTRIBUTES.iter().any(|s| attr.contains(s)))
    {
        return true;
    }
    let leaf = name
        .rsplit(|c| c == '/' || c == '.')
        .next()
        .unwrap_or(name)
        .trim()
        .to_lowercase();
    SYSTEM_NAMES.contains(&leaf.as_str())
}

pub async fn list_folders(session: &mut ImapSession) -> Result<Vec<FolderInfo>, MailsortError> {
    let names: Vec<_> = session
        .list(None, Some("*"))
        .await
        .map_err(|e| MailsortError::Backend(format!("LIST failed: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| MailsortError::Backend(format!("Failed to collect folders: {}", e)))?;

    let folders: Vec<FolderInfo> = names
        .iter()
        .map(|f| {
            let attributes = f.attributes().iter().map(|a| format!("{:?}", a)).collect();
            FolderInfo::new(f.name(), attributes)
        })
        .collect();

    debug!(count = folders.len(), "Listed IMAP folders");
    Ok(folders)
}
