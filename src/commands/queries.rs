use serde::Serialize;

use crate::adapters::sqlite;
use crate::services::watcher::FolderStatus;
use crate::state::AppState;
use crate::types::error::MailsortError;
use crate::types::{
    ClassificationRecord, DistributionRow, FolderMapping, ModelMetadata, Page, Reclassification,
    Stats, TrainingExample, TrainingStatus,
};

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub training: TrainingStatus,
    pub model_loaded: bool,
    pub classes: Vec<String>,
    pub accounts: Vec<String>,
    pub watchers: Vec<FolderStatus>,
}

pub fn get_stats(state: &AppState) -> Result<Stats, MailsortError> {
    sqlite::stats::get_stats(&state.pool)
}

pub fn recent_classifications(
    state: &AppState,
    page: Page,
) -> Result<Vec<ClassificationRecord>, MailsortError> {
    sqlite::classifications::list_recent(&state.pool, page)
}

pub fn get_classification(state: &AppState, id: i64) -> Result<ClassificationRecord, MailsortError> {
    sqlite::classifications::get_by_id(&state.pool, id)?
        .ok_or_else(|| MailsortError::InvalidInput(format!("No classification with id {}", id)))
}

pub fn recent_training_examples(
    state: &AppState,
    page: Page,
) -> Result<Vec<TrainingExample>, MailsortError> {
    sqlite::training::list_recent(&state.pool, page)
}

pub fn recent_reclassifications(
    state: &AppState,
    page: Page,
) -> Result<Vec<Reclassification>, MailsortError> {
    sqlite::reclassifications::list_recent(&state.pool, page)
}

pub fn training_distribution(state: &AppState) -> Result<Vec<DistributionRow>, MailsortError> {
    sqlite::stats::training_distribution(&state.pool)
}

pub fn folder_mappings(state: &AppState) -> Result<Vec<FolderMapping>, MailsortError> {
    sqlite::folder_mappings::list_all(&state.pool)
}

pub fn latest_model(state: &AppState) -> Result<Option<ModelMetadata>, MailsortError> {
    sqlite::model_metadata::latest(&state.pool)
}

pub async fn system_status(state: &AppState) -> Result<SystemStatus, MailsortError> {
    let watchers = match &state.watchers {
        Some(manager) => manager.status().await,
        None => Vec::new(),
    };
    Ok(SystemStatus {
        training: sqlite::training_status::get(&state.pool)?,
        model_loaded: state.categorizer.has_model(),
        classes: state.categorizer.classes(),
        accounts: state.config.accounts.iter().map(|a| a.email.clone()).collect(),
        watchers,
    })
}
