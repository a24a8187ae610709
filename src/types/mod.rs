pub mod error;
pub mod probabilities;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use probabilities::Probabilities;

/// Mailbox credentials for one monitored account.
///
/// The email address doubles as the account identifier everywhere in the store.
#[derive(Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl Account {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// One decision made by the relay. Unique per (message_id, account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: i64,
    pub message_id: String,
    pub account: String,
    pub subject: String,
    pub category: String,
    pub confidence: f64,
    pub probabilities: Option<Probabilities>,
    pub sender_domain: Option<String>,
    /// Seconds spent classifying.
    pub processing_time: f64,
    pub created_at: i64,
}

/// A labelled example harvested from a mapped folder or recorded by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub message_id: String,
    pub account: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub created_at: i64,
}

impl TrainingExample {
    /// Text the embedder sees for this example.
    pub fn text(&self) -> String {
        format!("{} {}", self.subject, self.body)
    }
}

/// A user correction inferred from a message changing folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reclassification {
    pub id: i64,
    pub message_id: String,
    pub account: String,
    pub subject: String,
    pub old_category: String,
    pub new_category: String,
    pub old_folder: String,
    pub new_folder: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMapping {
    pub account: String,
    pub folder: String,
    pub category: String,
    pub auto_discovered: bool,
    pub message_count: u32,
    pub last_checked: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub id: i64,
    pub model_id: String,
    pub training_secs: f64,
    pub feature_secs: f64,
    pub sample_count: u32,
    pub feature_dim: u32,
    pub class_count: u32,
    pub coefficient_count: u32,
    pub serialized_bytes: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub is_training: bool,
    pub started_at: Option<i64>,
    pub sample_count: u32,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRow {
    pub account: String,
    pub category: String,
    pub count: u32,
}

/// Aggregate numbers shown on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total: u32,
    pub by_category: Vec<CategoryCount>,
    pub avg_time: f64,
    pub training_examples: u32,
    pub reclassifications: u32,
    pub categories: Vec<String>,
}

/// Limit/offset paging for the recent-activity listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Fire-and-forget dashboard action result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
