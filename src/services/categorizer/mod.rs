//! Message categorizer
//!
//! Embeds message text, runs the current model, applies sender heuristics and
//! per-account weights, limits the outcome to the account's own categories,
//! and trains replacement models under a hard time budget. The live model
//! sits behind a slot that is swapped in one step, so readers always see
//! either the previous model or the new one.

pub mod embedding;
pub mod heuristics;
pub mod model;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::adapters::sqlite::{self, DbPool};
use crate::services::message::{self, ParsedMessage};
use crate::types::{ModelMetadata, Probabilities};

pub use embedding::{Embedder, HashingEmbedder};
pub use model::{Fitter, LogRegFitter, LogRegModel, TrainDataset};

/// Category used until a model exists.
pub const DEFAULT_CATEGORY: &str = "personal";
pub const COLD_START_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    pub latency_secs: f64,
    pub message_id: String,
    pub subject: String,
    pub sender_domain: String,
    pub probabilities: Probabilities,
}

#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Trained(ModelMetadata),
    NotEnoughData { samples: usize, classes: usize },
    TimedOut,
    Failed(String),
}

impl TrainOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainOutcome::Trained(_))
    }
}

#[derive(Default)]
struct ModelSlot {
    inner: RwLock<Option<Arc<LogRegModel>>>,
}

impl ModelSlot {
    fn current(&self) -> Option<Arc<LogRegModel>> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, model: LogRegModel) {
        let model = Some(Arc::new(model));
        match self.inner.write() {
            Ok(mut guard) => *guard = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }
}

pub struct Categorizer {
    pool: DbPool,
    embedder: Arc<dyn Embedder>,
    fitter: Arc<dyn Fitter>,
    slot: ModelSlot,
    model_path: PathBuf,
    train_timeout: Duration,
}

impl Categorizer {
    /// Builds the categorizer and restores the persisted model if one is compatible.
    pub fn new(
        pool: DbPool,
        embedder: Arc<dyn Embedder>,
        fitter: Arc<dyn Fitter>,
        model_path: PathBuf,
        train_timeout: Duration,
    ) -> Self {
        let categorizer = Self {
            pool,
            embedder,
            fitter,
            slot: ModelSlot::default(),
            model_path,
            train_timeout,
        };
        categorizer.restore();
        categorizer
    }

    fn restore(&self) {
        let bytes = match std::fs::read(&self.model_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No saved model, starting cold");
                return;
            }
            Err(e) => {
                warn!(path = ?self.model_path, error = %e, "Could not read saved model");
                return;
            }
        };
        let model = match LogRegModel::from_bytes(&bytes) {
            Ok(model) => model,
            Err(e) => {
                warn!(path = ?self.model_path, error = %e, "Saved model is corrupt, ignoring");
                return;
            }
        };
        if let Err(e) = model.validate(self.embedder.model_id(), self.embedder.dimension()) {
            warn!(error = %e, "Saved model does not match the embedder, ignoring");
            return;
        }
        info!(model_id = %model.model_id, classes = ?model.classes, "Restored saved model");
        self.slot.replace(model);
    }

    pub fn has_model(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Classes of the live model; empty before the first training.
    pub fn classes(&self) -> Vec<String> {
        self.slot
            .current()
            .map(|model| model.classes.clone())
            .unwrap_or_default()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn classify(&self, raw: &[u8], account: Option<&str>) -> Classification {
        let started = Instant::now();
        let parsed = message::parse(raw);
        self.classify_parsed(&parsed, account, started)
    }

    /// Classifies an already parsed message. Latency is measured from `started`.
    pub fn classify_parsed(
        &self,
        parsed: &ParsedMessage,
        account: Option<&str>,
        started: Instant,
    ) -> Classification {
        let sender_domain = parsed.sender_domain();
        let cold = |started: Instant| Classification {
            category: DEFAULT_CATEGORY.to_string(),
            confidence: COLD_START_CONFIDENCE,
            latency_secs: started.elapsed().as_secs_f64(),
            message_id: parsed.message_id.clone(),
            subject: parsed.subject.clone(),
            sender_domain: sender_domain.clone(),
            probabilities: Probabilities::empty(),
        };

        let Some(model) = self.slot.current() else {
            return cold(started);
        };

        let features = self.embedder.embed(&parsed.text());
        let raw = model.predict_proba(&features);
        if raw.is_empty() {
            warn!(model_id = %model.model_id, "Model rejected feature vector, using default category");
            return cold(started);
        }

        let mut probabilities = Probabilities::new(
            model.classes.clone(),
            raw.into_iter().map(f64::from).collect(),
        );
        probabilities.normalize();
        heuristics::apply_sender_heuristics(&sender_domain, &mut probabilities);

        if let Some(account) = account {
            match sqlite::weights::get_weights(&self.pool, account) {
                Ok(weights) => heuristics::apply_user_weights(&mut probabilities, &weights),
                Err(e) => warn!(account = %account, error = %e, "Could not load weights, using defaults"),
            }
            // Only categories the account has a folder for can win
            match sqlite::folder_mappings::categories_for_account(&self.pool, account) {
                Ok(allowed) if !allowed.is_empty() => {
                    if !heuristics::restrict_to_categories(&mut probabilities, &allowed) {
                        warn!(account = %account, "Model knows none of the account's categories");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(account = %account, error = %e, "Could not load account categories"),
            }
        }

        let (category, confidence) = probabilities
            .argmax()
            .map(|(c, p)| (c.to_string(), p))
            .unwrap_or_else(|| (DEFAULT_CATEGORY.to_string(), COLD_START_CONFIDENCE));

        Classification {
            category,
            confidence,
            latency_secs: started.elapsed().as_secs_f64(),
            message_id: parsed.message_id.clone(),
            subject: parsed.subject.clone(),
            sender_domain,
            probabilities,
        }
    }

    /// Fits a replacement model on (text, label) pairs.
    ///
    /// The fit runs on its own thread. If it outlives the time budget it is
    /// abandoned and the live model and the saved artifact stay as they were.
    pub async fn train(&self, examples: Vec<(String, String)>) -> TrainOutcome {
        let classes: Vec<String> = examples
            .iter()
            .map(|(_, label)| label.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let samples = examples.len();
        if classes.len() < 2 || samples < classes.len() {
            info!(samples, classes = classes.len(), "Not enough data to train");
            return TrainOutcome::NotEnoughData {
                samples,
                classes: classes.len(),
            };
        }

        let (texts, labels): (Vec<String>, Vec<String>) = examples.into_iter().unzip();
        let y: Vec<usize> = labels
            .iter()
            .filter_map(|label| classes.binary_search(label).ok())
            .collect();

        let feature_started = Instant::now();
        let embedder = self.embedder.clone();
        let x = match tokio::task::spawn_blocking(move || {
            texts.iter().map(|text| embedder.embed(text)).collect::<Vec<_>>()
        })
        .await
        {
            Ok(x) => x,
            Err(e) => return TrainOutcome::Failed(format!("feature extraction failed: {e}")),
        };
        let feature_secs = feature_started.elapsed().as_secs_f64();

        let dataset = TrainDataset {
            embedding_model_id: self.embedder.model_id().to_string(),
            classes,
            x,
            y,
        };

        let fit_started = Instant::now();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let fitter = self.fitter.clone();
        let spawned = std::thread::Builder::new()
            .name("model-fit".into())
            .spawn(move || {
                let _ = tx.send(fitter.fit(&dataset));
            });
        if let Err(e) = spawned {
            return TrainOutcome::Failed(format!("could not start training thread: {e}"));
        }

        let model = match tokio::time::timeout(self.train_timeout, rx).await {
            Err(_) => {
                warn!(
                    budget_secs = self.train_timeout.as_secs_f64(),
                    "Training exceeded its time budget, keeping the previous model"
                );
                return TrainOutcome::TimedOut;
            }
            Ok(Err(_)) => return TrainOutcome::Failed("training thread exited without a result".into()),
            Ok(Ok(Err(e))) => return TrainOutcome::Failed(e),
            Ok(Ok(Ok(model))) => model,
        };
        let training_secs = fit_started.elapsed().as_secs_f64();

        if let Err(e) = model.validate(self.embedder.model_id(), self.embedder.dimension()) {
            return TrainOutcome::Failed(e);
        }
        let bytes = match model.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => return TrainOutcome::Failed(format!("could not serialize model: {e}")),
        };
        if let Err(e) = write_atomic(&self.model_path, &bytes) {
            error!(path = ?self.model_path, error = %e, "Could not save model, keeping the previous one");
            return TrainOutcome::Failed(format!("could not save model: {e}"));
        }

        let meta = ModelMetadata {
            id: 0,
            model_id: model.model_id.clone(),
            training_secs,
            feature_secs,
            sample_count: samples as u32,
            feature_dim: model.embedding_dim as u32,
            class_count: model.classes.len() as u32,
            coefficient_count: model.coefficient_count() as u32,
            serialized_bytes: bytes.len() as u64,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        info!(
            model_id = %meta.model_id,
            samples,
            classes = ?model.classes,
            training_secs,
            "Installed new model"
        );
        self.slot.replace(model);

        match sqlite::model_metadata::insert(&self.pool, &meta) {
            Ok(id) => TrainOutcome::Trained(ModelMetadata { id, ..meta }),
            Err(e) => {
                error!(error = %e, "Model installed but metadata was not recorded");
                TrainOutcome::Failed(format!("model installed but metadata not recorded: {e}"))
            }
        }
    }
}

/// Writes through a sibling temp file and renames, so readers never see a partial artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::pool;
    use std::collections::HashMap;

    struct SlowFitter(Duration);

    impl Fitter for SlowFitter {
        fn fit(&self, dataset: &TrainDataset) -> Result<LogRegModel, String> {
            std::thread::sleep(self.0);
            model::train_logreg(dataset, &Default::default())
        }
    }

    fn corpus() -> Vec<(String, String)> {
        let shopping = [
            "Your order has shipped tracking number package",
            "Invoice receipt for your purchase order",
            "Order confirmation shipping delivery estimate",
            "Your package was delivered order receipt",
            "Sale discount coupon order now free shipping",
            "Payment received for order invoice",
        ];
        let personal = [
            "Dinner with family tonight at mom's house",
            "Happy birthday love see you this weekend",
            "Are we still meeting for coffee tomorrow",
            "Photos from the family trip last weekend",
            "Call me when you get home tonight",
            "Weekend plans with friends and family",
        ];
        shopping
            .iter()
            .map(|t| (t.to_string(), "shopping".to_string()))
            .chain(personal.iter().map(|t| (t.to_string(), "personal".to_string())))
            .collect()
    }

    fn categorizer(dir: &Path, fitter: Arc<dyn Fitter>, timeout: Duration) -> Categorizer {
        Categorizer::new(
            pool::in_memory().unwrap(),
            Arc::new(HashingEmbedder::default()),
            fitter,
            dir.join("models").join("classifier.json"),
            timeout,
        )
    }

    const SHIPPED: &[u8] = b"From: shipping@amazon.com\r\nSubject: Your Order Has Shipped\r\n\r\nTracking number for your package order.\r\n";

    #[test]
    fn test_cold_start_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(5));
        assert!(!c.has_model());

        let result = c.classify(SHIPPED, None);
        assert_eq!(result.category, DEFAULT_CATEGORY);
        assert_eq!(result.confidence, COLD_START_CONFIDENCE);
        assert_eq!(result.sender_domain, "amazon.com");
        assert!(result.probabilities.is_empty());
    }

    #[tokio::test]
    async fn test_not_enough_data() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(5));

        let one_class = vec![("a".to_string(), "personal".to_string())];
        assert!(matches!(
            c.train(one_class).await,
            TrainOutcome::NotEnoughData { samples: 1, classes: 1 }
        ));
        assert!(!c.has_model());
        assert!(!c.model_path().exists());
    }

    #[tokio::test]
    async fn test_train_then_classify() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));

        let meta = match c.train(corpus()).await {
            TrainOutcome::Trained(meta) => meta,
            other => panic!("expected a trained model, got {other:?}"),
        };
        assert_eq!(meta.class_count, 2);
        assert_eq!(meta.sample_count, 12);
        assert!(meta.id > 0);
        assert!(c.model_path().exists());
        assert_eq!(c.classes(), vec!["personal", "shopping"]);

        let result = c.classify(SHIPPED, None);
        assert_eq!(result.category, "shopping");
        let sum: f64 = result.probabilities.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-6);

        let result = c.classify(
            b"From: sis@example.com\r\nSubject: Dinner tonight\r\n\r\nFamily dinner this weekend, love mom\r\n",
            None,
        );
        assert_eq!(result.category, "personal");
    }

    #[tokio::test]
    async fn test_account_weights_apply() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));
        assert!(c.train(corpus()).await.is_trained());

        let weights = HashMap::from([("shopping".to_string(), 0.0)]);
        sqlite::weights::set_weights(&c.pool, "alice@example.com", &weights).unwrap();

        assert_eq!(c.classify(SHIPPED, None).category, "shopping");
        assert_eq!(c.classify(SHIPPED, Some("alice@example.com")).category, "personal");
    }

    #[tokio::test]
    async fn test_category_limited_to_account_folders() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));
        // Shopping mail was filed by another account under its own folder
        let relabelled: Vec<(String, String)> = corpus()
            .into_iter()
            .map(|(text, label)| {
                let label = if label == "shopping" { "receipts_2024".to_string() } else { label };
                (text, label)
            })
            .collect();
        assert!(c.train(relabelled).await.is_trained());
        sqlite::folder_mappings::ensure_defaults(&c.pool, "alice@example.com").unwrap();
        sqlite::folder_mappings::insert_discovered(&c.pool, "bob@example.com", "Receipts/2024", 6).unwrap();

        assert_eq!(c.classify(SHIPPED, None).category, "receipts_2024");
        assert_eq!(c.classify(SHIPPED, Some("bob@example.com")).category, "receipts_2024");

        let alice = c.classify(SHIPPED, Some("alice@example.com"));
        assert_eq!(alice.category, "personal");
        assert_eq!(alice.confidence, 1.0);
        assert_eq!(alice.probabilities.get("receipts_2024"), Some(0.0));
    }

    #[tokio::test]
    async fn test_restores_saved_model() {
        let dir = tempfile::tempdir().unwrap();
        {
            let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));
            assert!(c.train(corpus()).await.is_trained());
        }
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));
        assert!(c.has_model());
        assert_eq!(c.classify(SHIPPED, None).category, "shopping");
    }

    #[tokio::test]
    async fn test_timeout_keeps_previous_model_and_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let c = categorizer(dir.path(), Arc::new(LogRegFitter::default()), Duration::from_secs(30));
        let TrainOutcome::Trained(first) = c.train(corpus()).await else {
            panic!("initial training failed");
        };
        let saved = std::fs::read(c.model_path()).unwrap();

        let slow = Categorizer {
            pool: c.pool.clone(),
            embedder: c.embedder.clone(),
            fitter: Arc::new(SlowFitter(Duration::from_millis(1500))),
            slot: ModelSlot::default(),
            model_path: c.model_path.clone(),
            train_timeout: Duration::from_millis(50),
        };
        slow.restore();

        let mut extended = corpus();
        extended.push(("Lottery winner claim prize now".to_string(), "spam".to_string()));
        assert!(matches!(slow.train(extended).await, TrainOutcome::TimedOut));

        assert_eq!(std::fs::read(c.model_path()).unwrap(), saved);
        assert_eq!(slow.classes(), vec!["personal", "shopping"]);
        let latest = sqlite::model_metadata::latest(&c.pool).unwrap().unwrap();
        assert_eq!(latest.id, first.id);
    }
}
