//! Shared fixtures for tests that need a whole `AppState`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::adapters::imap::{IdleConnector, IdleSession, MailboxClient, MailboxConnector};
use crate::adapters::smtp::Delivery;
use crate::adapters::sqlite;
use crate::config::AppConfig;
use crate::state::{AppState, Backends};
use crate::types::error::MailsortError;
use crate::types::Account;

pub(crate) struct NullDelivery;

#[async_trait]
impl Delivery for NullDelivery {
    async fn deliver(&self, _from: &str, _to: &[String], _data: &[u8]) -> Result<(), MailsortError> {
        Ok(())
    }
}

/// Every mailbox is unreachable.
pub(crate) struct Offline;

#[async_trait]
impl MailboxConnector for Offline {
    async fn connect(&self, _account: &Account) -> Result<Box<dyn MailboxClient>, MailsortError> {
        Err(MailsortError::Network("offline".into()))
    }
}

#[async_trait]
impl IdleConnector for Offline {
    async fn open(&self, _account: &Account, _folder: &str) -> Result<Box<dyn IdleSession>, MailsortError> {
        Err(MailsortError::Network("offline".into()))
    }
}

/// State over an in-memory store with one account and no network.
pub(crate) fn test_state() -> (Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.accounts = vec![Account::new("alice@example.com", "pw")];
    config.imap.host = "imap.example.com".into();
    config.watcher.enabled = false;
    config.storage.data_dir = dir.path().to_path_buf();

    let backends = Backends {
        delivery: Arc::new(NullDelivery),
        mailbox: Arc::new(Offline),
        idle: Arc::new(Offline),
    };
    let pool = sqlite::pool::in_memory().unwrap();
    let (state, _) = AppState::assemble(config, pool, backends, CancellationToken::new());
    (state, dir)
}
