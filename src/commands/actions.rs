use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{error, info};

use crate::adapters::sqlite;
use crate::state::AppState;
use crate::types::error::MailsortError;
use crate::types::ActionResponse;

/// Starts discovery, reclassification scan and harvest in the background.
pub fn refresh_now(state: &Arc<AppState>) -> ActionResponse {
    if state.refreshing.swap(true, Ordering::SeqCst) {
        return ActionResponse::rejected("Refresh already running");
    }
    let state = state.clone();
    tokio::spawn(async move {
        info!("Manual refresh started");
        state.orchestrator.refresh().await;
        state.refreshing.store(false, Ordering::SeqCst);
    });
    ActionResponse::ok("Refresh started")
}

/// Claims the training flag and retrains in the background.
pub fn retrain_now(state: &Arc<AppState>) -> Result<ActionResponse, MailsortError> {
    if !sqlite::training_status::try_begin(&state.pool)? {
        return Ok(ActionResponse::rejected("Training already in progress"));
    }
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        info!("Manual retrain started");
        let outcome = orchestrator.retrain_acquired().await;
        if !outcome.is_trained() {
            error!(outcome = ?outcome, "Manual retrain did not produce a model");
        }
    });
    Ok(ActionResponse::ok("Retraining started"))
}

/// Replaces the given category weights for one account.
pub fn update_weights(
    state: &AppState,
    account: &str,
    weights: &HashMap<String, f64>,
) -> Result<ActionResponse, MailsortError> {
    let account = account.trim().to_lowercase();
    if account.is_empty() {
        return Err(MailsortError::InvalidInput("account is required".into()));
    }
    sqlite::weights::set_weights(&state.pool, &account, weights)?;
    info!(account = %account, categories = weights.len(), "Updated category weights");
    Ok(ActionResponse::ok(format!(
        "Updated {} weights for {}",
        weights.len(),
        account
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::queries;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn test_retrain_now_honours_training_flag() {
        let (state, _dir) = test_state();
        assert!(sqlite::training_status::try_begin(&state.pool).unwrap());

        let response = retrain_now(&state).unwrap();
        assert!(!response.success);

        sqlite::training_status::finish(&state.pool).unwrap();
        assert!(retrain_now(&state).unwrap().success);
    }

    #[tokio::test]
    async fn test_update_weights() {
        let (state, _dir) = test_state();
        let mut weights = HashMap::new();
        weights.insert("shopping".to_string(), 0.5);
        assert!(update_weights(&state, "Alice@Example.com", &weights).unwrap().success);
        let stored = sqlite::weights::get_weights(&state.pool, "alice@example.com").unwrap();
        assert_eq!(stored["shopping"], 0.5);

        weights.insert("spam".to_string(), -1.0);
        assert!(update_weights(&state, "alice@example.com", &weights).is_err());
    }

    #[tokio::test]
    async fn test_status_reports_cold_model() {
        let (state, _dir) = test_state();
        let status = queries::system_status(&state).await.unwrap();
        assert!(!status.model_loaded);
        assert!(!status.training.is_training);
        assert_eq!(status.accounts, vec!["alice@example.com"]);
    }
}
