//! Post-model probability adjustments.

use std::collections::{BTreeSet, HashMap};

use crate::types::Probabilities;

/// Domain suffixes of public-sector and non-profit senders.
pub const CIVIC_SUFFIXES: &[&str] = &[".gov", ".edu", ".org"];

/// Domain fragments that mark government senders.
pub const CIVIC_KEYWORDS: &[&str] = &[
    "county",
    "city",
    "government",
    "commissioner",
    "district",
    "state",
    "municipal",
];

pub const COMMERCIAL_CATEGORY: &str = "shopping";
pub const BENIGN_CATEGORY: &str = "personal";

/// Share of commercial probability moved to the benign category for civic senders.
pub const CIVIC_SHIFT: f64 = 0.8;

pub fn is_civic_domain(domain: &str) -> bool {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return false;
    }
    CIVIC_SUFFIXES.iter().any(|suffix| domain.ends_with(suffix))
        || CIVIC_KEYWORDS.iter().any(|keyword| domain.contains(keyword))
}

/// Moves most of the commercial probability to the benign category when the sender
/// looks civic, then renormalizes. Returns whether anything changed.
///
/// Leaves the vector untouched for other senders or when either category is missing.
pub fn apply_sender_heuristics(sender_domain: &str, probabilities: &mut Probabilities) -> bool {
    if !is_civic_domain(sender_domain) {
        return false;
    }
    let (Some(commercial), Some(benign)) = (
        probabilities.get(COMMERCIAL_CATEGORY),
        probabilities.get(BENIGN_CATEGORY),
    ) else {
        return false;
    };

    let shift = commercial * CIVIC_SHIFT;
    probabilities.set(COMMERCIAL_CATEGORY, commercial - shift);
    probabilities.set(BENIGN_CATEGORY, benign + shift);
    probabilities.normalize();
    true
}

/// Multiplies each category by the account's weight (default 1.0) and renormalizes.
pub fn apply_user_weights(probabilities: &mut Probabilities, weights: &HashMap<String, f64>) {
    if weights.is_empty() || probabilities.is_empty() {
        return;
    }
    let scaled: Vec<(String, f64)> = probabilities
        .iter()
        .map(|(category, value)| {
            let weight = weights.get(category).copied().unwrap_or(1.0);
            (category.to_string(), value * weight)
        })
        .collect();
    for (category, value) in scaled {
        probabilities.set(&category, value);
    }
    probabilities.normalize();
}

/// Limits the vector to the categories an account has folders for, then renormalizes.
///
/// Categories outside `allowed` drop to zero. When none of the vector's categories
/// is allowed the vector is left as it was and false is returned.
pub fn restrict_to_categories(probabilities: &mut Probabilities, allowed: &BTreeSet<String>) -> bool {
    let (kept, dropped): (Vec<String>, Vec<String>) = probabilities
        .classes()
        .iter()
        .cloned()
        .partition(|category| allowed.contains(category));
    if kept.is_empty() {
        return false;
    }
    if dropped.is_empty() {
        return true;
    }

    let kept_mass: f64 = kept
        .iter()
        .filter_map(|category| probabilities.get(category))
        .filter(|value| value.is_finite() && *value > 0.0)
        .sum();
    for category in &dropped {
        probabilities.set(category, 0.0);
    }
    if kept_mass <= 0.0 {
        for category in &kept {
            probabilities.set(category, 1.0);
        }
    }
    probabilities.normalize();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn three(values: [f64; 3]) -> Probabilities {
        Probabilities::new(
            vec!["personal".into(), "shopping".into(), "spam".into()],
            values.to_vec(),
        )
    }

    #[test]
    fn test_civic_detection() {
        let cases = [
            ("miamidade.gov", true),
            ("countyoffice.com", true),
            ("commissioner.us", true),
            ("university.edu", true),
            ("charity.org", true),
            ("amazon.com", false),
            ("store.com", false),
        ];
        for (domain, expected) in cases {
            assert_eq!(is_civic_domain(domain), expected, "{domain}");
        }
        assert!(!is_civic_domain(""));
    }

    #[test]
    fn test_civic_sender_shifts_shopping_to_personal() {
        let mut p = three([0.2, 0.7, 0.1]);
        assert!(apply_sender_heuristics("miamidade.gov", &mut p));
        assert!((p.get("personal").unwrap() - 0.76).abs() < 1e-9);
        assert!((p.get("shopping").unwrap() - 0.14).abs() < 1e-9);
        assert!((p.get("spam").unwrap() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_commercial_sender_is_untouched() {
        let mut p = three([0.2, 0.7, 0.1]);
        let before = p.clone();
        assert!(!apply_sender_heuristics("amazon.com", &mut p));
        assert_eq!(p, before);
    }

    #[test]
    fn test_missing_category_is_noop() {
        let mut p = Probabilities::new(vec!["news".into(), "spam".into()], vec![0.5, 0.5]);
        assert!(!apply_sender_heuristics("city.gov", &mut p));
    }

    #[test]
    fn test_user_weights_shift_argmax() {
        let mut p = three([0.4, 0.5, 0.1]);
        let weights = HashMap::from([("shopping".to_string(), 0.5)]);
        apply_user_weights(&mut p, &weights);
        assert_eq!(p.argmax().unwrap().0, "personal");
    }

    #[test]
    fn test_restrict_to_account_categories() {
        let mut p = Probabilities::new(
            vec!["personal".into(), "receipts_2024".into(), "spam".into()],
            vec![0.2, 0.7, 0.1],
        );
        let allowed = BTreeSet::from(["personal".to_string(), "spam".to_string()]);
        assert!(restrict_to_categories(&mut p, &allowed));
        assert_eq!(p.get("receipts_2024"), Some(0.0));
        assert!((p.get("personal").unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(p.argmax().unwrap().0, "personal");

        let mut zeroed = Probabilities::new(
            vec!["personal".into(), "receipts_2024".into(), "spam".into()],
            vec![0.0, 1.0, 0.0],
        );
        assert!(restrict_to_categories(&mut zeroed, &allowed));
        assert_eq!(zeroed.get("personal"), Some(0.5));
        assert_eq!(zeroed.get("spam"), Some(0.5));
        assert_eq!(zeroed.get("receipts_2024"), Some(0.0));

        let mut disjoint = three([0.2, 0.7, 0.1]);
        let before = disjoint.clone();
        let other = BTreeSet::from(["work".to_string()]);
        assert!(!restrict_to_categories(&mut disjoint, &other));
        assert_eq!(disjoint, before);
    }

    #[test]
    fn test_adjusted_vectors_stay_distributions() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let mut p = three([rng.gen(), rng.gen(), rng.gen()]);
            p.normalize();
            let domain = if rng.gen_bool(0.5) { "city.gov" } else { "shop.com" };
            apply_sender_heuristics(domain, &mut p);
            let weights = HashMap::from([
                ("personal".to_string(), rng.gen_range(0.0..3.0)),
                ("spam".to_string(), rng.gen_range(0.0..3.0)),
            ]);
            apply_user_weights(&mut p, &weights);

            let sum: f64 = p.iter().map(|(_, v)| v).sum();
            assert!((sum - 1.0).abs() < 1e-6);
            assert!(p.iter().all(|(_, v)| v >= 0.0));
        }
    }
}
