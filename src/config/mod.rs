use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::error::MailsortError;
use crate::types::Account;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<AppConfig>> = OnceCell::new();

/// IDLE renewal must stay under the 29 minute server limit.
pub const MAX_IDLE_TIMEOUT_SECS: u64 = 29 * 60;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub imap: ImapConfig,

    /// Monitored accounts
    #[serde(default)]
    pub accounts: Vec<Account>,

    #[serde(default)]
    pub smtp: SmtpListenerConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub footer: FooterConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Shared IMAP server for all accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_imap_port")]
    pub port: u16,
}

/// Inbound SMTP listener
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpListenerConfig {
    #[serde(default = "default_smtp_bind")]
    pub bind: String,

    /// Name announced in the greeting
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

/// Downstream mail server that receives stamped messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_host")]
    pub host: String,

    #[serde(default = "default_delivery_port")]
    pub port: u16,

    /// Require STARTTLS on the downstream hop
    #[serde(default)]
    pub starttls: bool,

    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Seconds between periodic reclassification checks
    #[serde(default = "default_training_interval")]
    pub interval_secs: u64,

    /// Daily retrain time as "H:MM"
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Most recent messages harvested per mapped folder
    #[serde(default = "default_max_training_emails")]
    pub max_emails_per_folder: usize,

    /// Store-wide cap on training examples
    #[serde(default = "default_max_training_examples")]
    pub max_examples: u32,

    /// Hard wall-clock budget for one model fit
    #[serde(default = "default_training_timeout")]
    pub timeout_secs: u64,

    /// Below this confidence the relay flags the message
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// IDLE renewal window
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Slice length while waiting inside IDLE
    #[serde(default = "default_idle_check")]
    pub check_interval_secs: u64,

    #[serde(default = "default_backoff_floor")]
    pub backoff_floor_secs: u64,

    #[serde(default = "default_backoff_ceiling")]
    pub backoff_ceiling_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FooterConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Dashboard page the footer links to
    #[serde(default = "default_footer_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_imap_port() -> u16 {
    993
}

fn default_smtp_bind() -> String {
    "0.0.0.0:2525".into()
}

fn default_hostname() -> String {
    "mailsort.local".into()
}

fn default_max_message_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_delivery_host() -> String {
    "mailserver".into()
}

fn default_delivery_port() -> u16 {
    25
}

fn default_training_interval() -> u64 {
    3600
}

fn default_schedule() -> String {
    "3:00".into()
}

fn default_max_training_emails() -> usize {
    500
}

fn default_max_training_examples() -> u32 {
    10_000
}

fn default_training_timeout() -> u64 {
    300
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_idle_timeout() -> u64 {
    25 * 60
}

fn default_idle_check() -> u64 {
    10
}

fn default_backoff_floor() -> u64 {
    1
}

fn default_backoff_ceiling() -> u64 {
    300
}

fn default_footer_url() -> String {
    "http://localhost:8080/".into()
}

fn default_api_bind() -> String {
    "0.0.0.0:8080".into()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("mailsort"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_true() -> bool {
    true
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_imap_port(),
        }
    }
}

impl Default for SmtpListenerConfig {
    fn default() -> Self {
        Self {
            bind: default_smtp_bind(),
            hostname: default_hostname(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            host: default_delivery_host(),
            port: default_delivery_port(),
            starttls: false,
            user: None,
            password: None,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_training_interval(),
            schedule: default_schedule(),
            max_emails_per_folder: default_max_training_emails(),
            max_examples: default_max_training_examples(),
            timeout_secs: default_training_timeout(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout_secs: default_idle_timeout(),
            check_interval_secs: default_idle_check(),
            backoff_floor_secs: default_backoff_floor(),
            backoff_ceiling_secs: default_backoff_ceiling(),
        }
    }
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_footer_url(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.storage.data_dir.join("classifier.db")
    }

    pub fn model_path(&self) -> PathBuf {
        self.storage.data_dir.join("models").join("classifier.json")
    }

    pub fn find_account(&self, email: &str) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    /// Applies the process environment on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("IMAP_HOST") {
            self.imap.host = host;
        }
        set_parsed(&lookup, "IMAP_PORT", &mut self.imap.port);
        if let Some(users) = lookup("IMAP_USERS") {
            self.accounts = parse_accounts(&users);
        }

        if let Some(bind) = lookup("SMTP_BIND") {
            self.smtp.bind = bind;
        }

        if let Some(host) = lookup("DELIVERY_HOST") {
            self.delivery.host = host;
        }
        set_parsed(&lookup, "DELIVERY_PORT", &mut self.delivery.port);
        set_flag(&lookup, "DELIVERY_USE_TLS", &mut self.delivery.starttls);
        if let Some(user) = lookup("DELIVERY_USER").filter(|v| !v.is_empty()) {
            self.delivery.user = Some(user);
        }
        if let Some(password) = lookup("DELIVERY_PASSWORD").filter(|v| !v.is_empty()) {
            self.delivery.password = Some(password);
        }

        set_parsed(&lookup, "TRAINING_INTERVAL", &mut self.training.interval_secs);
        if let Some(schedule) = lookup("TRAINING_SCHEDULE") {
            self.training.schedule = schedule;
        }
        set_parsed(&lookup, "MAX_TRAINING_EMAILS", &mut self.training.max_emails_per_folder);
        set_parsed(&lookup, "MAX_TRAINING_EXAMPLES", &mut self.training.max_examples);
        set_parsed(&lookup, "TRAINING_TIMEOUT", &mut self.training.timeout_secs);
        set_parsed(&lookup, "CONFIDENCE_THRESHOLD", &mut self.training.confidence_threshold);

        set_parsed(&lookup, "IDLE_TIMEOUT", &mut self.watcher.idle_timeout_secs);
        set_flag(&lookup, "WATCHER_ENABLED", &mut self.watcher.enabled);

        set_flag(&lookup, "FOOTER_ENABLED", &mut self.footer.enabled);
        if let Some(url) = lookup("CLASSIFIER_UI_BASE_URL") {
            self.footer.base_url = url;
        }

        if let Some(bind) = lookup("API_BIND") {
            self.api.bind = bind;
        }
        if let Some(dir) = lookup("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Clamps values that would break protocol limits and rejects unusable ones.
    pub fn validate(&mut self) -> Result<(), MailsortError> {
        if self.watcher.idle_timeout_secs > MAX_IDLE_TIMEOUT_SECS {
            warn!(
                requested = self.watcher.idle_timeout_secs,
                "IDLE timeout above 29 minutes, clamping"
            );
            self.watcher.idle_timeout_secs = MAX_IDLE_TIMEOUT_SECS;
        }
        if self.watcher.idle_timeout_secs == 0 || self.watcher.check_interval_secs == 0 {
            return Err(MailsortError::Config(
                "watcher timeouts must be positive".into(),
            ));
        }
        if self.watcher.backoff_floor_secs == 0
            || self.watcher.backoff_floor_secs > self.watcher.backoff_ceiling_secs
        {
            return Err(MailsortError::Config(
                "backoff floor must be positive and not above the ceiling".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.training.confidence_threshold) {
            return Err(MailsortError::Config(format!(
                "confidence threshold {} outside [0, 1]",
                self.training.confidence_threshold
            )));
        }
        if self.training.max_examples == 0 {
            return Err(MailsortError::Config("max_examples must be positive".into()));
        }
        if !self.accounts.is_empty() && self.imap.host.is_empty() {
            return Err(MailsortError::Config(
                "accounts configured but imap.host is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Parses "user:pass,user2:pass2". Entries without a colon are skipped.
pub fn parse_accounts(raw: &str) -> Vec<Account> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            let (user, password) = entry.split_once(':')?;
            let user = user.trim();
            if user.is_empty() {
                return None;
            }
            Some(Account::new(user, password))
        })
        .collect()
}

fn set_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

fn set_flag<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(explicit) = std::env::var("MAILSORT_CONFIG") {
        paths.push(PathBuf::from(explicit));
    }
    paths.push(PathBuf::from("mailsort.toml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailsort").join("config.toml"));
    }

    paths
}

/// Loads configuration from `path` (or the default locations), then the environment.
pub fn load(path: Option<&Path>) -> Result<AppConfig, MailsortError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => match default_config_paths().into_iter().find(|p| p.exists()) {
            Some(found) => read_config_file(&found)?,
            None => {
                info!("No config file found, using defaults and environment");
                AppConfig::default()
            }
        },
    };

    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<AppConfig, MailsortError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| MailsortError::Config(format!("Failed to read config: {}", e)))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| MailsortError::Config(format!("Failed to parse config: {}", e)))?;

    Ok(config)
}

/// Set the global configuration
pub fn set_config(config: AppConfig) -> Result<(), MailsortError> {
    match CONFIG.get() {
        Some(lock) => {
            let mut guard = lock
                .write()
                .map_err(|e| MailsortError::Config(format!("Failed to lock config: {}", e)))?;
            *guard = config;
        }
        None => {
            CONFIG.set(RwLock::new(config)).ok();
        }
    }
    Ok(())
}

/// Snapshot of the global configuration
pub fn get_config() -> Result<AppConfig, MailsortError> {
    let lock = CONFIG
        .get()
        .ok_or_else(|| MailsortError::Config("Configuration not initialized".into()))?;
    let guard = lock
        .read()
        .map_err(|e| MailsortError::Config(format!("Failed to lock config: {}", e)))?;
    Ok(guard.clone())
}
