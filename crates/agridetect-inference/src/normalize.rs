//! Mapping raw probability vectors onto the labeled result contract

use crate::labels::ClassLabels;
use agridetect_core::{ClassScore, InferenceResult};

/// Tolerance for a probability vector's sum before a warning is logged
const SUM_TOLERANCE: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    #[error("model produced an empty distribution")]
    Empty,

    #[error("distribution of {len} values has no finite probability")]
    NonFinite { len: usize },
}

/// Build the labeled result for a probability vector.
///
/// The winner is the first index holding the maximum finite probability.
/// The distribution covers every index, sorted descending with ties kept in
/// index order. Non-finite entries sort last.
pub fn normalize_result(
    probabilities: &[f32],
    labels: &ClassLabels,
) -> Result<InferenceResult, NormalizeError> {
    if probabilities.is_empty() {
        return Err(NormalizeError::Empty);
    }

    let mut winner: Option<(usize, f32)> = None;
    for (index, &p) in probabilities.iter().enumerate() {
        if !p.is_finite() {
            continue;
        }
        match winner {
            Some((_, best)) if p <= best => {}
            _ => winner = Some((index, p)),
        }
    }
    let (predicted_index, confidence) = winner.ok_or(NormalizeError::NonFinite {
        len: probabilities.len(),
    })?;

    let total: f32 = probabilities.iter().filter(|p| p.is_finite()).sum();
    if (total - 1.0).abs() > SUM_TOLERANCE {
        tracing::warn!(total, "Probabilities do not sum to 1");
    }

    let missing = labels.missing(probabilities.len());
    if !missing.is_empty() {
        tracing::warn!(?missing, "No label configured for some class indices");
    }

    let mut distribution: Vec<ClassScore> = probabilities
        .iter()
        .enumerate()
        .map(|(index, &probability)| ClassScore {
            index,
            label: labels.label_for(index).into_owned(),
            probability,
        })
        .collect();
    distribution.sort_by(|a, b| sort_key(b.probability).total_cmp(&sort_key(a.probability)));

    Ok(InferenceResult {
        predicted_label: labels.label_for(predicted_index).into_owned(),
        predicted_index,
        confidence,
        distribution,
    })
}

fn sort_key(p: f32) -> f32 {
    if p.is_finite() {
        p
    } else {
        f32::NEG_INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn labels(pairs: &[(usize, &str)]) -> ClassLabels {
        pairs.iter().map(|(i, l)| (*i, l.to_string())).collect()
    }

    #[test]
    fn test_healthy_winner() {
        let labels = labels(&[
            (0, "Rice Blast"),
            (1, "Brown Spot"),
            (2, "Healthy"),
            (3, "Early Blight"),
            (4, "Late Blight"),
        ]);
        let result = normalize_result(&[0.05, 0.05, 0.80, 0.05, 0.05], &labels).unwrap();

        assert_eq!(result.predicted_label, "Healthy");
        assert_eq!(result.predicted_index, 2);
        assert!((result.confidence_percent() - 80.0).abs() < 1e-3);
        assert_eq!(result.distribution[0].index, 2);
        assert_eq!(result.distribution.len(), 5);
    }

    #[test]
    fn test_missing_label_falls_back() {
        let labels = labels(&[(0, "a"), (1, "b"), (2, "c"), (3, "d"), (4, "e"), (5, "f"), (6, "g")]);
        let mut probs = vec![0.01; 8];
        probs[7] = 0.93;
        let result = normalize_result(&probs, &labels).unwrap();

        assert_eq!(result.predicted_label, "Class 7");
        assert_eq!(result.predicted_index, 7);
    }

    #[test]
    fn test_tie_selects_lowest_index() {
        let result = normalize_result(&[0.1, 0.45, 0.45], &ClassLabels::default()).unwrap();
        assert_eq!(result.predicted_index, 1);
        assert_eq!(result.distribution[0].index, 1);
        assert_eq!(result.distribution[1].index, 2);
    }

    #[test]
    fn test_empty_and_non_finite() {
        assert_eq!(
            normalize_result(&[], &ClassLabels::default()),
            Err(NormalizeError::Empty)
        );
        assert_eq!(
            normalize_result(&[f32::NAN, f32::INFINITY], &ClassLabels::default()),
            Err(NormalizeError::NonFinite { len: 2 })
        );
    }

    #[test]
    fn test_nan_entries_skipped() {
        let result = normalize_result(&[f32::NAN, 0.3, 0.7], &ClassLabels::default()).unwrap();
        assert_eq!(result.predicted_index, 2);
        assert_eq!(result.distribution.last().unwrap().index, 0);
    }

    fn distribution() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(0.0f32..1.0, 1..40).prop_filter_map("non-zero mass", |raw| {
            let total: f32 = raw.iter().sum();
            (total > 1e-3).then(|| raw.iter().map(|v| v / total).collect())
        })
    }

    proptest! {
        #[test]
        fn prop_distribution_sums_to_one(probs in distribution()) {
            let result = normalize_result(&probs, &ClassLabels::default()).unwrap();
            prop_assert!((result.total_probability() - 1.0).abs() < 1e-3);
            prop_assert_eq!(result.distribution.len(), probs.len());
        }

        #[test]
        fn prop_sorted_descending_and_winner_first(probs in distribution()) {
            let result = normalize_result(&probs, &ClassLabels::default()).unwrap();
            for pair in result.distribution.windows(2) {
                prop_assert!(pair[0].probability >= pair[1].probability);
                if pair[0].probability == pair[1].probability {
                    prop_assert!(pair[0].index < pair[1].index);
                }
            }
            prop_assert_eq!(result.distribution[0].index, result.predicted_index);
            prop_assert_eq!(result.confidence, probs[result.predicted_index]);
        }
    }
}
