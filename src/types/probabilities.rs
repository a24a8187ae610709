use serde::{Deserialize, Serialize};

/// Category-ordered probability vector.
///
/// Entries are looked up by category name, never by position, so a model's
/// class order and the adjustment rules can evolve independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    classes: Vec<String>,
    values: Vec<f64>,
}

impl Probabilities {
    /// Builds a vector; missing values become 0 and extra values are dropped.
    pub fn new(classes: Vec<String>, mut values: Vec<f64>) -> Self {
        values.resize(classes.len(), 0.0);
        Self { classes, values }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn get(&self, category: &str) -> Option<f64> {
        self.position(category).map(|idx| self.values[idx])
    }

    /// Sets the probability of an existing category. Unknown categories are ignored.
    pub fn set(&mut self, category: &str, value: f64) -> bool {
        match self.position(category) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.classes
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    /// Rescales to a distribution: negative or non-finite entries count as zero,
    /// and an all-zero vector becomes uniform.
    pub fn normalize(&mut self) {
        if self.values.is_empty() {
            return;
        }
        for value in self.values.iter_mut() {
            if !value.is_finite() || *value < 0.0 {
                *value = 0.0;
            }
        }
        let sum: f64 = self.values.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            let uniform = 1.0 / self.values.len() as f64;
            self.values.iter_mut().for_each(|v| *v = uniform);
            return;
        }
        self.values.iter_mut().for_each(|v| *v /= sum);
    }

    /// Highest-probability category; ties go to the earlier class.
    pub fn argmax(&self) -> Option<(&str, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, value) in self.values.iter().copied().enumerate() {
            match best {
                Some((_, current)) if value <= current => {}
                _ => best = Some((idx, value)),
            }
        }
        best.map(|(idx, value)| (self.classes[idx].as_str(), value))
    }

    fn position(&self, category: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(values: &[f64]) -> Probabilities {
        Probabilities::new(
            vec!["personal".into(), "shopping".into(), "spam".into()],
            values.to_vec(),
        )
    }

    #[test]
    fn test_normalize_rescales_to_one() {
        let mut p = probs(&[2.0, 1.0, 1.0]);
        p.normalize();
        assert!((p.get("personal").unwrap() - 0.5).abs() < 1e-12);
        let sum: f64 = p.iter().map(|(_, v)| v).sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_clamps_negative_and_handles_zero() {
        let mut p = probs(&[-1.0, 0.0, f64::NAN]);
        p.normalize();
        for (_, v) in p.iter() {
            assert!((v - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_argmax_prefers_first_on_tie() {
        let p = probs(&[0.4, 0.4, 0.2]);
        assert_eq!(p.argmax(), Some(("personal", 0.4)));
        assert_eq!(Probabilities::empty().argmax(), None);
    }

    #[test]
    fn test_set_unknown_category_is_ignored() {
        let mut p = probs(&[0.2, 0.3, 0.5]);
        assert!(!p.set("news", 0.9));
        assert!(p.set("spam", 0.1));
        assert_eq!(p.get("spam"), Some(0.1));
        assert_eq!(p.get("news"), None);
    }

    #[test]
    fn test_new_pads_missing_values() {
        let p = Probabilities::new(vec!["a".into(), "b".into()], vec![1.0]);
        assert_eq!(p.get("b"), Some(0.0));
        assert_eq!(p.len(), 2);
    }
}
