use std::collections::HashMap;
use std::sync::Arc;

use flume::{Receiver, Sender};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::folder::{ChangeEvent, FolderStatus, FolderWatcher, WatcherSettings};
use crate::adapters::imap::IdleConnector;
use crate::types::Account;

struct WorkerHandle {
    stop: CancellationToken,
    status: Arc<RwLock<FolderStatus>>,
    task: JoinHandle<()>,
}

/// Owns one folder watcher per (account, folder).
pub struct WatcherManager {
    connector: Arc<dyn IdleConnector>,
    settings: WatcherSettings,
    events: Sender<ChangeEvent>,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<(String, String), WorkerHandle>>,
}

impl WatcherManager {
    /// Watchers stop when `shutdown` fires or on [`WatcherManager::stop`].
    pub fn new(
        connector: Arc<dyn IdleConnector>,
        settings: WatcherSettings,
        shutdown: CancellationToken,
    ) -> (Self, Receiver<ChangeEvent>) {
        let (events, rx) = flume::unbounded();
        let manager = Self {
            connector,
            settings,
            events,
            shutdown,
            workers: Mutex::new(HashMap::new()),
        };
        (manager, rx)
    }

    /// Starts a watcher for the folder unless one is already running.
    pub async fn watch(&self, account: &Account, folder: &str) -> bool {
        let key = (account.email.clone(), folder.to_string());
        let mut workers = self.workers.lock().await;
        if workers.get(&key).is_some_and(|w| !w.task.is_finished()) {
            return false;
        }

        let watcher = FolderWatcher::new(
            account.clone(),
            folder,
            self.connector.clone(),
            self.settings.clone(),
            self.events.clone(),
        );
        let status = watcher.status_handle();
        let stop = self.shutdown.child_token();
        let task = tokio::spawn(supervise(watcher, self.settings.clone(), stop.clone()));
        workers.insert(key, WorkerHandle { stop, status, task });
        true
    }

    /// Starts watchers for every target; returns how many were new.
    pub async fn start(&self, targets: &[(Account, String)]) -> usize {
        let mut started = 0;
        for (account, folder) in targets {
            if self.watch(account, folder).await {
                started += 1;
            }
        }
        info!(started, total = targets.len(), "Folder watchers started");
        started
    }

    /// Stops every watcher and waits for them to log out.
    pub async fn stop(&self) {
        let workers: Vec<WorkerHandle> = self.workers.lock().await.drain().map(|(_, w)| w).collect();
        for worker in &workers {
            worker.stop.cancel();
        }
        let count = workers.len();
        for worker in workers {
            let _ = worker.task.await;
        }
        info!(count, "Folder watchers stopped");
    }

    pub async fn status(&self) -> Vec<FolderStatus> {
        let handles: Vec<Arc<RwLock<FolderStatus>>> = self
            .workers
            .lock()
            .await
            .values()
            .map(|w| w.status.clone())
            .collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            statuses.push(handle.read().await.clone());
        }
        statuses.sort_by(|a, b| (&a.account, &a.folder).cmp(&(&b.account, &b.folder)));
        statuses
    }
}

/// Restarts the watcher if it panics, with the same backoff as reconnects.
async fn supervise(watcher: FolderWatcher, settings: WatcherSettings, stop: CancellationToken) {
    let mut backoff = settings.backoff();
    loop {
        match tokio::spawn(watcher.clone().run(stop.clone())).await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                let delay = backoff.next_delay();
                error!(error = %e, restart_in = ?delay, "Folder watcher panicked");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::watcher::folder::tests::{settings, FlakyConnector};
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn test_fans_out_and_stops_as_group() {
        let connector = Arc::new(FlakyConnector::default());
        let shutdown = CancellationToken::new();
        let (manager, rx) = WatcherManager::new(connector.clone(), settings(), shutdown);

        let alice = Account::new("alice@example.com", "pw");
        let bob = Account::new("bob@example.com", "pw");
        let targets = vec![
            (alice.clone(), "INBOX".to_string()),
            (alice.clone(), "Shopping".to_string()),
            (bob, "INBOX".to_string()),
        ];
        assert_eq!(manager.start(&targets).await, 3);
        assert!(!manager.watch(&alice, "INBOX").await);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = rx.recv_async().await.unwrap();
            seen.push((event.account, event.folder));
        }
        seen.sort();
        assert_eq!(seen[0], ("alice@example.com".to_string(), "INBOX".to_string()));

        let status = manager.status().await;
        assert_eq!(status.len(), 3);
        assert!(status.iter().all(|s| s.running && s.connected));

        manager.stop().await;
        assert_eq!(connector.logouts.load(Ordering::SeqCst), 3);
        assert!(manager.status().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_token_stops_watchers() {
        let connector = Arc::new(FlakyConnector::default());
        let shutdown = CancellationToken::new();
        let (manager, rx) = WatcherManager::new(connector.clone(), settings(), shutdown.clone());
        manager
            .watch(&Account::new("alice@example.com", "pw"), "INBOX")
            .await;
        rx.recv_async().await.unwrap();

        shutdown.cancel();
        manager.stop().await;
        assert_eq!(connector.logouts.load(Ordering::SeqCst), 1);
    }
}
