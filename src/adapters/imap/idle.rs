use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::connection::{self, ImapConnection};
use crate::types::error::MailsortError;
use crate::types::Account;

/// Outcome of one bounded IDLE wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    /// The server pushed an update for the folder
    Changed,
    /// The window elapsed without activity
    Timeout,
    /// The stop signal fired
    Stopped,
}

/// A connection parked on one folder.
#[async_trait]
pub trait IdleSession: Send {
    /// Blocks in IDLE for at most `window`, re-checking every `check_interval`.
    async fn wait_for_change(
        &mut self,
        window: Duration,
        check_interval: Duration,
        stop: &CancellationToken,
    ) -> Result<IdleEvent, MailsortError>;

    async fn logout(self: Box<Self>);
}

#[async_trait]
pub trait IdleConnector: Send + Sync {
    async fn open(&self, account: &Account, folder: &str)
        -> Result<Box<dyn IdleSession>, MailsortError>;
}

pub struct ImapIdleSession {
    // IDLE consumes the session; it is put back after DONE.
    conn: Option<ImapConnection>,
    folder: String,
}

#[async_trait]
impl IdleSession for ImapIdleSession {
    async fn wait_for_change(
        &mut self,
        window: Duration,
        check_interval: Duration,
        stop: &CancellationToken,
    ) -> Result<IdleEvent, MailsortError> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| MailsortError::Backend("IDLE session already closed".into()))?;
        let account = conn.account;
        let mut handle = conn.session.idle();
        handle
            .init()
            .await
            .map_err(|e| MailsortError::Backend(format!("IDLE failed: {}", e)))?;

        let deadline = Instant::now() + window;
        let event = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break IdleEvent::Timeout;
            }
            let slice = remaining.min(check_interval);

            let response = {
                let (wait, interrupt) = handle.wait_with_timeout(slice);
                tokio::pin!(wait);
                tokio::select! {
                    response = &mut wait => response,
                    _ = stop.cancelled() => {
                        drop(interrupt);
                        (&mut wait).await
                    }
                }
            }
            .map_err(|e| MailsortError::Backend(format!("IDLE wait failed: {}", e)))?;

            match response {
                IdleResponse::NewData(_) => break IdleEvent::Changed,
                IdleResponse::ManualInterrupt => break IdleEvent::Stopped,
                IdleResponse::Timeout => {
                    trace!(folder = %self.folder, "IDLE check");
                    if stop.is_cancelled() {
                        break IdleEvent::Stopped;
                    }
                }
            }
        };

        let session = handle
            .done()
            .await
            .map_err(|e| MailsortError::Backend(format!("IDLE DONE failed: {}", e)))?;
        self.conn = Some(ImapConnection { session, account });
        debug!(folder = %self.folder, event = ?event, "IDLE returned");
        Ok(event)
    }

    async fn logout(self: Box<Self>) {
        if let Some(conn) = self.conn {
            conn.logout().await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImapIdleConnector {
    pub host: String,
    pub port: u16,
}

impl ImapIdleConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl IdleConnector for ImapIdleConnector {
    async fn open(
        &self,
        account: &Account,
        folder: &str,
    ) -> Result<Box<dyn IdleSession>, MailsortError> {
        let mut conn = connection::connect(&self.host, self.port, account).await?;
        conn.examine(folder).await?;
        Ok(Box::new(ImapIdleSession {
            conn: Some(conn),
            folder: folder.to_string(),
        }))
    }
}
