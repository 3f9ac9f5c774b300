//! Text and JSON rendering of diagnoses and category listings

use agridetect_core::{ClassScore, InferenceResult};
use agridetect_inference::ModelRegistry;
use serde::Serialize;
use std::fmt::Write as _;

/// Serialized form of one diagnosis
#[derive(Debug, Serialize)]
pub struct DiagnosisReport<'a> {
    pub category: &'a str,
    pub display_name: &'a str,
    pub predicted_label: &'a str,
    pub predicted_index: usize,
    /// Percentage, 0-100
    pub confidence: f32,
    pub healthy: bool,
    pub top: &'a [ClassScore],
}

impl<'a> DiagnosisReport<'a> {
    pub fn new(
        category: &'a str,
        display_name: &'a str,
        result: &'a InferenceResult,
        top: usize,
    ) -> Self {
        Self {
            category,
            display_name,
            predicted_label: &result.predicted_label,
            predicted_index: result.predicted_index,
            confidence: result.confidence_percent(),
            healthy: result.is_healthy(),
            top: result.top(top),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({})", self.display_name, self.category);
        if self.healthy {
            let _ = writeln!(out, "Healthy leaf: {}", self.predicted_label);
        } else {
            let _ = writeln!(out, "Disease detected: {}", self.predicted_label);
        }
        let _ = writeln!(out, "Confidence: {:.1}%", self.confidence);

        if self.top.len() > 1 {
            let width = self.top.iter().map(|s| s.label.len()).max().unwrap_or(0);
            let _ = writeln!(out, "Top predictions:");
            for (rank, score) in self.top.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}. {:<width$}  {:>5.1}%",
                    rank + 1,
                    score.label,
                    score.probability * 100.0,
                    width = width
                );
            }
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct CategoryEntry<'a> {
    key: &'a str,
    display_name: &'a str,
    backend: &'static str,
    num_classes: usize,
}

/// Configured categories as an aligned table
pub fn categories_text(registry: &ModelRegistry) -> String {
    let width = registry.categories().map(str::len).max().unwrap_or(0);
    let mut out = String::new();
    for (key, config) in &registry.models {
        let _ = writeln!(
            out,
            "{:<width$}  {:<6} {:>3} classes  {}",
            key,
            config.backend.as_str(),
            config.num_classes,
            config.display_name(),
            width = width
        );
    }
    out
}

/// Configured categories as a JSON array
pub fn categories_json(registry: &ModelRegistry) -> serde_json::Result<String> {
    let entries: Vec<CategoryEntry<'_>> = registry
        .models
        .iter()
        .map(|(key, config)| CategoryEntry {
            key,
            display_name: config.display_name(),
            backend: config.backend.as_str(),
            num_classes: config.num_classes,
        })
        .collect();
    serde_json::to_string_pretty(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> InferenceResult {
        InferenceResult {
            predicted_label: "Healthy".to_string(),
            predicted_index: 2,
            confidence: 0.8,
            distribution: vec![
                ClassScore { index: 2, label: "Healthy".into(), probability: 0.8 },
                ClassScore { index: 0, label: "Rice Blast".into(), probability: 0.15 },
                ClassScore { index: 1, label: "Brown Spot".into(), probability: 0.05 },
            ],
        }
    }

    #[test]
    fn test_text_report() {
        let result = result();
        let text = DiagnosisReport::new("rice_potato", "Rice & Potato", &result, 2).to_text();

        assert!(text.starts_with("Rice & Potato (rice_potato)"));
        assert!(text.contains("Healthy leaf: Healthy"));
        assert!(text.contains("Confidence: 80.0%"));
        assert!(text.contains("Rice Blast"));
        assert!(!text.contains("Brown Spot"));
    }

    #[test]
    fn test_json_report() {
        let result = result();
        let json = DiagnosisReport::new("rice_potato", "Rice & Potato", &result, 1)
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["predicted_label"], "Healthy");
        assert_eq!(value["healthy"], true);
        assert_eq!(value["top"].as_array().unwrap().len(), 1);
        assert!((value["confidence"].as_f64().unwrap() - 80.0).abs() < 1e-3);
    }

    #[test]
    fn test_disease_report() {
        let mut result = result();
        result.predicted_label = "Rice Blast".to_string();
        let text = DiagnosisReport::new("rice_potato", "Rice & Potato", &result, 1).to_text();
        assert!(text.contains("Disease detected: Rice Blast"));
        assert!(!text.contains("Top predictions"));
    }

    #[test]
    fn test_categories_listing() {
        let registry = ModelRegistry::from_yaml(
            "models:\n  rice_potato:\n    display_name: Rice & Potato\n    type: onnx\n    file: a.onnx\n    num_classes: 5\n  cotton_tomato:\n    type: torch\n    file: b.pth\n    architecture: resnet50\n    num_classes: 17\n",
        )
        .unwrap();

        let text = categories_text(&registry);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("cotton_tomato"));
        assert!(lines[1].contains("Rice & Potato"));

        let json: serde_json::Value = serde_json::from_str(&categories_json(&registry).unwrap()).unwrap();
        assert_eq!(json[1]["key"], "rice_potato");
        assert_eq!(json[0]["backend"], "torch");
    }
}
