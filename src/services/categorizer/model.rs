//! Logistic regression over embedding vectors.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Softmax-calibrated multiclass linear model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRegModel {
    pub model_id: String,
    pub embedding_model_id: String,
    pub embedding_dim: usize,
    pub classes: Vec<String>,
    /// Row-major, `classes.len() * embedding_dim`
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub temperature: f32,
}

impl LogRegModel {
    /// Validate the model dimensions and embedding compatibility.
    pub fn validate(&self, embedding_model_id: &str, embedding_dim: usize) -> Result<(), String> {
        if self.embedding_model_id != embedding_model_id {
            return Err(format!(
                "Unsupported embedding_model_id {} (expected {})",
                self.embedding_model_id, embedding_model_id
            ));
        }
        if self.embedding_dim != embedding_dim {
            return Err(format!(
                "Unsupported embedding_dim {} (expected {})",
                self.embedding_dim, embedding_dim
            ));
        }
        let classes = self.classes.len();
        if classes == 0 {
            return Err("No classes defined".to_string());
        }
        if self.weights.len() != classes * self.embedding_dim {
            return Err("weights length mismatch".to_string());
        }
        if self.bias.len() != classes {
            return Err("bias length mismatch".to_string());
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err("temperature must be > 0".to_string());
        }
        Ok(())
    }

    /// Class probabilities for one embedding. Empty on dimension mismatch.
    pub fn predict_proba(&self, embedding: &[f32]) -> Vec<f32> {
        if embedding.len() != self.embedding_dim || self.classes.is_empty() {
            return Vec::new();
        }
        let temp = self.temperature.max(1e-6);
        let logits: Vec<f32> = (0..self.classes.len())
            .map(|c| self.logit(c, embedding) / temp)
            .collect();
        softmax(&logits)
    }

    fn logit(&self, class: usize, x: &[f32]) -> f32 {
        let row = &self.weights[class * self.embedding_dim..(class + 1) * self.embedding_dim];
        self.bias[class] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>()
    }

    pub fn coefficient_count(&self) -> usize {
        self.weights.len() + self.bias.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }
    exps.into_iter().map(|e| e / sum).collect()
}

/// Training options for the logistic regression head.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub learning_rate: f32,
    pub l2: f32,
    pub batch_size: usize,
    pub seed: u64,
    /// Reweight samples inversely to class frequency
    pub balance_classes: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.5,
            l2: 1e-4,
            batch_size: 32,
            seed: 42,
            balance_classes: true,
        }
    }
}

/// In-memory training dataset. `y` indexes into `classes`.
#[derive(Debug, Clone)]
pub struct TrainDataset {
    pub embedding_model_id: String,
    pub classes: Vec<String>,
    pub x: Vec<Vec<f32>>,
    pub y: Vec<usize>,
}

/// Produces a fitted model from a dataset. Runs on a dedicated thread and may be slow.
pub trait Fitter: Send + Sync {
    fn fit(&self, dataset: &TrainDataset) -> Result<LogRegModel, String>;
}

#[derive(Debug, Clone, Default)]
pub struct LogRegFitter {
    pub options: TrainOptions,
}

impl Fitter for LogRegFitter {
    fn fit(&self, dataset: &TrainDataset) -> Result<LogRegModel, String> {
        train_logreg(dataset, &self.options)
    }
}

/// Minibatch gradient descent on softmax cross-entropy with L2.
pub fn train_logreg(dataset: &TrainDataset, options: &TrainOptions) -> Result<LogRegModel, String> {
    if dataset.x.is_empty() || dataset.y.is_empty() {
        return Err("Empty training set".to_string());
    }
    if dataset.x.len() != dataset.y.len() {
        return Err("Mismatched training inputs/labels".to_string());
    }
    let classes = dataset.classes.len();
    if classes == 0 {
        return Err("No classes available for training".to_string());
    }
    let dim = dataset.x[0].len();
    if dim == 0 || dataset.x.iter().any(|row| row.len() != dim) {
        return Err("Inconsistent embedding row length".to_string());
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut weights: Vec<f32> = (0..classes * dim)
        .map(|_| (rng.gen::<f32>() - 0.5) * 0.01)
        .collect();
    let mut bias = vec![0.0f32; classes];

    let class_weights = if options.balance_classes {
        let mut counts = vec![0f32; classes];
        for &y in &dataset.y {
            if y < classes {
                counts[y] += 1.0;
            }
        }
        let total: f32 = counts.iter().sum();
        counts
            .into_iter()
            .map(|count| {
                if count == 0.0 {
                    0.0
                } else {
                    total / (classes as f32 * count)
                }
            })
            .collect()
    } else {
        vec![1.0; classes]
    };

    let mut indices: Vec<usize> = (0..dataset.x.len()).collect();
    let batch_size = options.batch_size.max(1);
    let lr = options.learning_rate;
    let l2 = options.l2.max(0.0);

    for _epoch in 0..options.epochs {
        indices.shuffle(&mut rng);
        for chunk in indices.chunks(batch_size) {
            let mut grad_w = vec![0.0f32; weights.len()];
            let mut grad_b = vec![0.0f32; classes];
            let mut batch_weight = 0.0f32;

            for &idx in chunk {
                let x = &dataset.x[idx];
                let y = dataset.y[idx];
                if y >= classes || class_weights[y] == 0.0 {
                    continue;
                }
                let weight = class_weights[y];

                let logits: Vec<f32> = (0..classes)
                    .map(|c| {
                        let row = &weights[c * dim..(c + 1) * dim];
                        bias[c] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f32>()
                    })
                    .collect();
                let probs = softmax(&logits);

                for c in 0..classes {
                    let diff = probs[c] - if c == y { 1.0 } else { 0.0 };
                    let base = c * dim;
                    for (i, v) in x.iter().enumerate() {
                        grad_w[base + i] += diff * v * weight;
                    }
                    grad_b[c] += diff * weight;
                }
                batch_weight += weight;
            }

            if batch_weight == 0.0 {
                continue;
            }
            let inv = 1.0 / batch_weight;
            for (idx, w) in weights.iter_mut().enumerate() {
                *w -= lr * (grad_w[idx] * inv + l2 * *w);
            }
            for (c, b) in bias.iter_mut().enumerate() {
                *b -= lr * grad_b[c] * inv;
            }
        }
    }

    let model = LogRegModel {
        model_id: format!("logreg-{}", chrono::Utc::now().format("%Y%m%d%H%M%S%3f")),
        embedding_model_id: dataset.embedding_model_id.clone(),
        embedding_dim: dim,
        classes: dataset.classes.clone(),
        weights,
        bias,
        temperature: 1.0,
    };
    model.validate(&dataset.embedding_model_id, dim)?;
    Ok(model)
}
