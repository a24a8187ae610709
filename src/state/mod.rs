//! Application state
//!
//! Wires the store, categorizer, relay, watchers and orchestrator together.
//! Everything the API and the background tasks share lives here.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapters::imap::{IdleConnector, ImapConnector, ImapIdleConnector, MailboxConnector};
use crate::adapters::smtp::{Delivery, SmtpDelivery};
use crate::adapters::sqlite::{self, DbPool};
use crate::config::AppConfig;
use crate::services::categorizer::{Categorizer, HashingEmbedder, LogRegFitter};
use crate::services::relay::{MailRelay, RelaySettings};
use crate::services::training::{TrainingOrchestrator, TrainingSettings};
use crate::services::watcher::{ChangeEvent, WatcherManager, WatcherSettings};
use crate::types::error::MailsortError;

pub struct AppState {
    pub config: AppConfig,
    pub pool: DbPool,
    pub categorizer: Arc<Categorizer>,
    pub relay: Arc<MailRelay>,
    pub orchestrator: Arc<TrainingOrchestrator>,
    /// Absent when watching is disabled
    pub watchers: Option<Arc<WatcherManager>>,
    pub shutdown: CancellationToken,
    /// Set while a dashboard-triggered refresh runs
    pub refreshing: AtomicBool,
}

/// External services the state talks to.
pub struct Backends {
    pub delivery: Arc<dyn Delivery>,
    pub mailbox: Arc<dyn MailboxConnector>,
    pub idle: Arc<dyn IdleConnector>,
}

impl AppState {
    /// Opens the store under the data dir and connects the real IMAP/SMTP adapters.
    pub fn build(
        config: AppConfig,
        shutdown: CancellationToken,
    ) -> Result<(Arc<Self>, Option<Receiver<ChangeEvent>>), MailsortError> {
        let pool = sqlite::pool::initialize(&config.database_path())?;
        let backends = Backends {
            delivery: Arc::new(SmtpDelivery::new(&config.delivery)?),
            mailbox: Arc::new(ImapConnector::new(config.imap.host.clone(), config.imap.port)),
            idle: Arc::new(ImapIdleConnector::new(config.imap.host.clone(), config.imap.port)),
        };
        Ok(Self::assemble(config, pool, backends, shutdown))
    }

    pub fn assemble(
        config: AppConfig,
        pool: DbPool,
        backends: Backends,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, Option<Receiver<ChangeEvent>>) {
        let categorizer = Arc::new(Categorizer::new(
            pool.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(LogRegFitter::default()),
            config.model_path(),
            Duration::from_secs(config.training.timeout_secs),
        ));

        let relay = Arc::new(MailRelay::new(
            pool.clone(),
            categorizer.clone(),
            backends.delivery,
            RelaySettings {
                confidence_threshold: config.training.confidence_threshold,
                max_examples: config.training.max_examples,
                footer_base_url: config
                    .footer
                    .enabled
                    .then(|| config.footer.base_url.clone()),
            },
        ));

        let (watchers, events) = if config.watcher.enabled {
            let (manager, rx) = WatcherManager::new(
                backends.idle,
                WatcherSettings::from(&config.watcher),
                shutdown.child_token(),
            );
            (Some(Arc::new(manager)), Some(rx))
        } else {
            (None, None)
        };

        let mut orchestrator = TrainingOrchestrator::new(
            pool.clone(),
            categorizer.clone(),
            backends.mailbox,
            config.accounts.clone(),
            TrainingSettings::from(&config.training),
        );
        if let Some(watchers) = &watchers {
            orchestrator = orchestrator.with_watchers(watchers.clone());
        }

        info!(
            accounts = config.accounts.len(),
            watchers = watchers.is_some(),
            model_loaded = categorizer.has_model(),
            "Application state ready"
        );

        let state = Arc::new(Self {
            config,
            pool,
            categorizer,
            relay,
            orchestrator: Arc::new(orchestrator),
            watchers,
            shutdown,
            refreshing: AtomicBool::new(false),
        });
        (state, events)
    }
}
