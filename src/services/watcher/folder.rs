use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flume::Sender;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use crate::adapters::imap::{IdleConnector, IdleEvent, IdleSession};
use crate::config::WatcherConfig;
use crate::types::error::MailsortError;
use crate::types::Account;

/// Raised when a watched folder changes on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub account: String,
    pub folder: String,
    pub detected_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderStatus {
    pub account: String,
    pub folder: String,
    pub running: bool,
    pub connected: bool,
    pub last_change: Option<i64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub idle_timeout: Duration,
    pub check_interval: Duration,
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
}

impl WatcherSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_floor, self.backoff_ceiling)
    }
}

impl From<&WatcherConfig> for WatcherSettings {
    fn from(config: &WatcherConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            check_interval: Duration::from_secs(config.check_interval_secs),
            backoff_floor: Duration::from_secs(config.backoff_floor_secs),
            backoff_ceiling: Duration::from_secs(config.backoff_ceiling_secs),
        }
    }
}

/// Keeps one IDLE connection open on one folder and reports changes.
#[derive(Clone)]
pub struct FolderWatcher {
    account: Account,
    folder: String,
    connector: Arc<dyn IdleConnector>,
    settings: WatcherSettings,
    events: Sender<ChangeEvent>,
    status: Arc<RwLock<FolderStatus>>,
}

impl FolderWatcher {
    pub fn new(
        account: Account,
        folder: impl Into<String>,
        connector: Arc<dyn IdleConnector>,
        settings: WatcherSettings,
        events: Sender<ChangeEvent>,
    ) -> Self {
        let folder = folder.into();
        let status = FolderStatus {
            account: account.email.clone(),
            folder: folder.clone(),
            ..FolderStatus::default()
        };
        Self {
            account,
            folder,
            connector,
            settings,
            events,
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub fn status_handle(&self) -> Arc<RwLock<FolderStatus>> {
        self.status.clone()
    }

    /// Connects, idles and reconnects with backoff until `stop` fires.
    pub async fn run(self, stop: CancellationToken) {
        self.status.write().await.running = true;
        info!(account = %self.account.email, folder = %self.folder, "Folder watcher started");

        let mut backoff = self.settings.backoff();
        while !stop.is_cancelled() {
            let opened = tokio::select! {
                _ = stop.cancelled() => break,
                opened = self.connector.open(&self.account, &self.folder) => opened,
            };

            let failure = match opened {
                Ok(mut session) => {
                    backoff.reset();
                    {
                        let mut status = self.status.write().await;
                        status.connected = true;
                        status.consecutive_failures = 0;
                        status.last_error = None;
                    }
                    debug!(account = %self.account.email, folder = %self.folder, "IDLE connection ready");

                    let result = self.watch(session.as_mut(), &stop).await;
                    session.logout().await;
                    self.status.write().await.connected = false;
                    match result {
                        Ok(()) => break,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if stop.is_cancelled() {
                break;
            }
            let delay = backoff.next_delay();
            {
                let mut status = self.status.write().await;
                status.consecutive_failures = backoff.failures();
                status.last_error = Some(failure.to_string());
            }
            warn!(
                account = %self.account.email,
                folder = %self.folder,
                error = %failure,
                failures = backoff.failures(),
                retry_in = ?delay,
                "Folder watcher connection failed"
            );
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        {
            let mut status = self.status.write().await;
            status.running = false;
            status.connected = false;
        }
        info!(account = %self.account.email, folder = %self.folder, "Folder watcher stopped");
    }

    /// Idles until stopped. Errors end the connection.
    async fn watch(
        &self,
        session: &mut dyn IdleSession,
        stop: &CancellationToken,
    ) -> Result<(), MailsortError> {
        loop {
            let event = session
                .wait_for_change(self.settings.idle_timeout, self.settings.check_interval, stop)
                .await?;
            match event {
                IdleEvent::Changed => {
                    let detected_at = Utc::now().timestamp_millis();
                    self.status.write().await.last_change = Some(detected_at);
                    info!(account = %self.account.email, folder = %self.folder, "Folder changed");
                    let sent = self.events.send(ChangeEvent {
                        account: self.account.email.clone(),
                        folder: self.folder.clone(),
                        detected_at,
                    });
                    if sent.is_err() {
                        debug!(folder = %self.folder, "No listener for change events");
                    }
                }
                IdleEvent::Timeout => {
                    debug!(folder = %self.folder, "IDLE window elapsed, renewing");
                }
                IdleEvent::Stopped => return Ok(()),
            }
        }
    }
}
