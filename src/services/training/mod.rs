//! Training orchestrator
//!
//! Keeps the categorizer in step with how users file their mail: discovers
//! folders, harvests labelled examples, notices messages that were moved to
//! another category's folder, and retrains on a daily schedule.

pub mod discovery;
pub mod harvest;
pub mod reclassify;
pub mod schedule;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::imap::{MailboxClient, MailboxConnector};
use crate::adapters::sqlite::{self, DbPool};
use crate::config::TrainingConfig;
use crate::services::categorizer::{Categorizer, TrainOutcome};
use crate::services::logger::fmt_ms;
use crate::services::watcher::{ChangeEvent, WatcherManager};
use crate::types::error::MailsortError;
use crate::types::Account;

pub use discovery::DiscoveryReport;
pub use harvest::HarvestReport;
pub use schedule::DailySchedule;

/// Scheduler resolution.
const TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub max_emails_per_folder: usize,
    pub max_examples: u32,
    /// Time between reclassification scans
    pub detection_interval: Duration,
    pub schedule: String,
}

impl From<&TrainingConfig> for TrainingSettings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            max_emails_per_folder: config.max_emails_per_folder,
            max_examples: config.max_examples,
            detection_interval: Duration::from_secs(config.interval_secs),
            schedule: config.schedule.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetrainOutcome {
    /// Another retrain holds the training flag
    AlreadyTraining,
    Finished(TrainOutcome),
}

pub struct TrainingOrchestrator {
    pool: DbPool,
    categorizer: Arc<Categorizer>,
    connector: Arc<dyn MailboxConnector>,
    accounts: Vec<Account>,
    settings: TrainingSettings,
    watchers: Option<Arc<WatcherManager>>,
}

impl TrainingOrchestrator {
    pub fn new(
        pool: DbPool,
        categorizer: Arc<Categorizer>,
        connector: Arc<dyn MailboxConnector>,
        accounts: Vec<Account>,
        settings: TrainingSettings,
    ) -> Self {
        Self {
            pool,
            categorizer,
            connector,
            accounts,
            settings,
            watchers: None,
        }
    }

    /// Newly discovered folders get a watcher from `watchers`.
    pub fn with_watchers(mut self, watchers: Arc<WatcherManager>) -> Self {
        self.watchers = Some(watchers);
        self
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    fn account(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    async fn connect(&self, account: &Account) -> Result<Box<dyn MailboxClient>, MailsortError> {
        self.connector.connect(account).await
    }

    /// Default folder mappings for every configured account.
    pub fn bootstrap(&self) -> Result<(), MailsortError> {
        for account in &self.accounts {
            sqlite::folder_mappings::ensure_defaults(&self.pool, &account.email)?;
        }
        Ok(())
    }

    /// (account, folder) pairs currently mapped, for the configured accounts.
    pub fn watch_targets(&self) -> Result<Vec<(Account, String)>, MailsortError> {
        let mut targets = Vec::new();
        for account in &self.accounts {
            for mapping in sqlite::folder_mappings::list_for_account(&self.pool, &account.email)? {
                targets.push((account.clone(), mapping.folder));
            }
        }
        Ok(targets)
    }

    /// Discovery, reclassification scan, harvest. Account failures are logged and skipped.
    pub async fn refresh(&self) {
        let started = Instant::now();
        for account in &self.accounts {
            if let Err(e) = self.discover_folders(account).await {
                warn!(account = %account.email, error = %e, "Folder discovery failed");
            }
        }
        self.detect_reclassifications().await;
        for account in &self.accounts {
            if let Err(e) = self.harvest(account).await {
                warn!(account = %account.email, error = %e, "Harvest failed");
            }
        }
        info!(elapsed = %fmt_ms(started.elapsed()), "Refresh finished");
    }

    /// Refresh followed by an unconditional retrain.
    pub async fn full_cycle(&self) -> RetrainOutcome {
        self.refresh().await;
        match self.retrain().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Retrain failed");
                RetrainOutcome::Finished(TrainOutcome::Failed(e.to_string()))
            }
        }
    }

    /// Retrains unless another retrain is in flight.
    pub async fn retrain(&self) -> Result<RetrainOutcome, MailsortError> {
        if !sqlite::training_status::try_begin(&self.pool)? {
            info!("Retrain requested while training, skipping");
            return Ok(RetrainOutcome::AlreadyTraining);
        }
        Ok(RetrainOutcome::Finished(self.retrain_acquired().await))
    }

    /// Retrains on the stored examples. The caller must hold the training flag;
    /// it is released here whatever the outcome.
    pub async fn retrain_acquired(&self) -> TrainOutcome {
        let outcome = self.train_on_store().await;
        if let Err(e) = sqlite::training_status::finish(&self.pool) {
            error!(error = %e, "Could not clear the training flag");
        }
        match &outcome {
            TrainOutcome::Trained(meta) => info!(
                model_id = %meta.model_id,
                samples = meta.sample_count,
                classes = meta.class_count,
                "Retrained model"
            ),
            TrainOutcome::NotEnoughData { samples, classes } => {
                info!(samples, classes, "Retrain skipped, not enough data")
            }
            TrainOutcome::TimedOut => warn!("Retrain timed out, keeping previous model"),
            TrainOutcome::Failed(e) => error!(error = %e, "Retrain failed"),
        }
        outcome
    }

    async fn train_on_store(&self) -> TrainOutcome {
        let examples = match sqlite::training::all_examples(&self.pool) {
            Ok(examples) => examples,
            Err(e) => return TrainOutcome::Failed(e.to_string()),
        };
        if let Err(e) = sqlite::training_status::set_sample_count(&self.pool, examples.len() as u32) {
            warn!(error = %e, "Could not record sample count");
        }
        let pairs = examples
            .into_iter()
            .map(|ex| (ex.text(), ex.category))
            .collect();
        self.categorizer.train(pairs).await
    }

    /// Scheduler loop: a startup cycle, then interval scans, the daily retrain
    /// and scans for accounts whose folders changed.
    pub async fn run(self: Arc<Self>, stop: CancellationToken, events: Option<Receiver<ChangeEvent>>) {
        if let Err(e) = self.bootstrap() {
            error!(error = %e, "Could not create default folder mappings");
        }
        info!(accounts = self.accounts.len(), "Training orchestrator started");
        self.full_cycle().await;

        let mut schedule =
            DailySchedule::parse(&self.settings.schedule).skip_day(chrono::Local::now().date_naive());
        let mut last_scan = Instant::now();
        let mut ticker = tokio::time::interval(TICK);
        ticker.tick().await;
        let mut events = events;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if schedule.due(chrono::Local::now().naive_local()) {
                        info!("Scheduled retrain");
                        self.full_cycle().await;
                        last_scan = Instant::now();
                    } else if last_scan.elapsed() >= self.settings.detection_interval {
                        self.detect_reclassifications().await;
                        last_scan = Instant::now();
                    }
                }
                event = next_event(&events) => match event {
                    Some(first) => {
                        let accounts = coalesce(first, events.as_ref());
                        for email in accounts {
                            self.rescan_account(&email).await;
                        }
                    }
                    None => events = None,
                },
            }
        }
        info!("Training orchestrator stopped");
    }

    async fn rescan_account(&self, email: &str) {
        let Some(account) = self.account(email) else {
            warn!(account = %email, "Change event for unknown account");
            return;
        };
        match self.detect_for_account(account).await {
            Ok(events) if !events.is_empty() => {
                info!(account = %email, corrections = events.len(), "Recorded reclassifications")
            }
            Ok(_) => {}
            Err(e) => warn!(account = %email, error = %e, "Reclassification scan failed"),
        }
    }
}

async fn next_event(events: &Option<Receiver<ChangeEvent>>) -> Option<ChangeEvent> {
    match events {
        Some(rx) => rx.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

/// Accounts touched by `first` and everything else already queued.
fn coalesce(first: ChangeEvent, events: Option<&Receiver<ChangeEvent>>) -> BTreeSet<String> {
    let mut accounts = BTreeSet::from([first.account]);
    if let Some(rx) = events {
        accounts.extend(rx.try_iter().map(|e| e.account));
    }
    accounts
}
