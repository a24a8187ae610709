use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::http::{decode_segment, Request, Response};
use crate::commands;
use crate::state::AppState;
use crate::types::error::MailsortError;
use crate::types::{ActionResponse, Page};

fn page(request: &Request) -> Page {
    let default = Page::default();
    Page {
        limit: request.query_u32("limit").unwrap_or(default.limit).clamp(1, 500),
        offset: request.query_u32("offset").unwrap_or(default.offset),
    }
}

fn reply<T: serde::Serialize>(result: Result<T, MailsortError>) -> Response {
    match result {
        Ok(value) => Response::json(200, &value),
        Err(e @ MailsortError::InvalidInput(_)) => Response::error(400, &e),
        Err(e) => Response::error(500, &e),
    }
}

fn action(response: ActionResponse) -> Response {
    let status = if response.success { 202 } else { 409 };
    Response::json(status, &response)
}

pub async fn dispatch(state: &Arc<AppState>, request: &Request) -> Response {
    debug!(method = %request.method, path = %request.path, "API request");
    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "stats"]) => reply(commands::get_stats(state)),
        ("GET", ["api", "classifications"]) => {
            reply(commands::recent_classifications(state, page(request)))
        }
        ("GET", ["api", "classifications", id]) => match id.parse::<i64>() {
            Ok(id) => reply(commands::get_classification(state, id)),
            Err(_) => Response::error(400, &MailsortError::InvalidInput("Bad id".into())),
        },
        ("GET", ["api", "training"]) => {
            reply(commands::recent_training_examples(state, page(request)))
        }
        ("GET", ["api", "reclassifications"]) => {
            reply(commands::recent_reclassifications(state, page(request)))
        }
        ("GET", ["api", "distribution"]) => reply(commands::training_distribution(state)),
        ("GET", ["api", "folders"]) => reply(commands::folder_mappings(state)),
        ("GET", ["api", "model"]) => reply(commands::latest_model(state)),
        ("GET", ["api", "status"]) => reply(commands::system_status(state).await),
        ("POST", ["api", "refresh"]) => action(commands::refresh_now(state)),
        ("POST", ["api", "retrain"]) => match commands::retrain_now(state) {
            Ok(response) => action(response),
            Err(e) => Response::error(500, &e),
        },
        ("POST", ["api", "weights", account]) => {
            let weights: HashMap<String, f64> = match serde_json::from_slice(&request.body) {
                Ok(weights) => weights,
                Err(e) => {
                    return Response::error(
                        400,
                        &MailsortError::InvalidInput(format!("Expected a category to weight map: {}", e)),
                    )
                }
            };
            reply(commands::update_weights(state, &decode_segment(account), &weights))
        }
        _ => Response::not_found(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite;
    use crate::test_support::test_state;

    fn get(path: &str) -> Request {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        Request {
            method: "GET".into(),
            path: path.into(),
            query: url::form_urlencoded::parse(query.as_bytes()).into_owned().collect(),
            body: Vec::new(),
        }
    }

    fn post(path: &str, body: &str) -> Request {
        Request {
            method: "POST".into(),
            path: path.into(),
            query: HashMap::new(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_stats_and_listings() {
        let (state, _dir) = test_state();
        let stats = dispatch(&state, &get("/api/stats")).await;
        assert_eq!(stats.status, 200);
        let value: serde_json::Value = serde_json::from_str(&stats.body).unwrap();
        assert_eq!(value["total"], 0);

        let list = dispatch(&state, &get("/api/classifications?limit=5&offset=0")).await;
        assert_eq!(list.status, 200);
        assert_eq!(list.body, "[]");

        assert_eq!(dispatch(&state, &get("/api/model")).await.body, "null");
        assert_eq!(dispatch(&state, &get("/api/status")).await.status, 200);
        assert_eq!(dispatch(&state, &get("/api/nope")).await.status, 404);
        assert_eq!(dispatch(&state, &post("/api/stats", "")).await.status, 404);
        assert_eq!(dispatch(&state, &get("/other")).await.status, 404);
    }

    #[tokio::test]
    async fn test_weights_endpoint() {
        let (state, _dir) = test_state();
        let ok = dispatch(
            &state,
            &post("/api/weights/alice%40example.com", r#"{"shopping": 0.25}"#),
        )
        .await;
        assert_eq!(ok.status, 200);
        let stored = sqlite::weights::get_weights(&state.pool, "alice@example.com").unwrap();
        assert_eq!(stored["shopping"], 0.25);

        let bad = dispatch(&state, &post("/api/weights/alice@example.com", "not json")).await;
        assert_eq!(bad.status, 400);
        let negative = dispatch(&state, &post("/api/weights/alice@example.com", r#"{"spam": -2}"#)).await;
        assert_eq!(negative.status, 400);
    }

    #[tokio::test]
    async fn test_retrain_conflict() {
        let (state, _dir) = test_state();
        assert!(sqlite::training_status::try_begin(&state.pool).unwrap());
        let response = dispatch(&state, &post("/api/retrain", "")).await;
        assert_eq!(response.status, 409);
        assert!(response.body.contains("already in progress"));
    }

    #[tokio::test]
    async fn test_missing_classification() {
        let (state, _dir) = test_state();
        assert_eq!(dispatch(&state, &get("/api/classifications/42")).await.status, 400);
        assert_eq!(dispatch(&state, &get("/api/classifications/abc")).await.status, 400);
    }
}
