use async_trait::async_trait;

use super::connection::{self, ImapConnection};
use super::folders::{self, FolderInfo};
use super::messages::{self, FetchedMessage, MessageHeaders};
use crate::types::error::MailsortError;
use crate::types::Account;

/// Read-only view of one account's mailbox.
#[async_trait]
pub trait MailboxClient: Send {
    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>, MailsortError>;

    async fn message_count(&mut self, folder: &str) -> Result<u32, MailsortError>;

    /// Full messages, newest `limit` when given, oldest first.
    async fn fetch_messages(
        &mut self,
        folder: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FetchedMessage>, MailsortError>;

    async fn fetch_headers(&mut self, folder: &str) -> Result<Vec<MessageHeaders>, MailsortError>;

    async fn logout(self: Box<Self>);
}

/// Opens mailbox sessions for accounts.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    async fn connect(&self, account: &Account) -> Result<Box<dyn MailboxClient>, MailsortError>;
}

#[derive(Debug, Clone)]
pub struct ImapConnector {
    pub host: String,
    pub port: u16,
}

impl ImapConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self, account: &Account) -> Result<Box<dyn MailboxClient>, MailsortError> {
        let conn = connection::connect(&self.host, self.port, account).await?;
        Ok(Box::new(conn))
    }
}

#[async_trait]
impl MailboxClient for ImapConnection {
    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>, MailsortError> {
        folders::list_folders(&mut self.session).await
    }

    async fn message_count(&mut self, folder: &str) -> Result<u32, MailsortError> {
        Ok(self.examine(folder).await?.exists)
    }

    async fn fetch_messages(
        &mut self,
        folder: &str,
        limit: Option<usize>,
    ) -> Result<Vec<FetchedMessage>, MailsortError> {
        let uids = messages::search_all(self, folder).await?;
        let uids = messages::most_recent(uids, limit);
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        messages::fetch_bodies(self, folder, &uids).await
    }

    async fn fetch_headers(&mut self, folder: &str) -> Result<Vec<MessageHeaders>, MailsortError> {
        messages::fetch_headers(self, folder).await
    }

    async fn logout(self: Box<Self>) {
        ImapConnection::logout(*self).await
    }
}
