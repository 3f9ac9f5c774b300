//! Core types for AgriDetect

use serde::{Deserialize, Serialize};

/// Probability assigned to one class by a single inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// Class index in the model output
    pub index: usize,

    /// Human-readable label (or `Class {index}` when unlabeled)
    pub label: String,

    /// Probability in `[0, 1]`
    pub probability: f32,
}

/// Normalized outcome of a diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    /// Label of the winning class
    pub predicted_label: String,

    /// Index of the winning class
    pub predicted_index: usize,

    /// Probability of the winning class as a fraction (0.0-1.0)
    pub confidence: f32,

    /// Every class, sorted by descending probability
    pub distribution: Vec<ClassScore>,
}

impl InferenceResult {
    /// Confidence as shown to users (0-100)
    pub fn confidence_percent(&self) -> f32 {
        self.confidence * 100.0
    }

    /// Whether the predicted condition is a healthy leaf
    pub fn is_healthy(&self) -> bool {
        self.predicted_label.to_lowercase().contains("healthy")
    }

    /// The `n` most probable classes
    pub fn top(&self, n: usize) -> &[ClassScore] {
        &self.distribution[..n.min(self.distribution.len())]
    }

    /// Sum of all class probabilities
    pub fn total_probability(&self) -> f32 {
        self.distribution.iter().map(|score| score.probability).sum()
    }
}
