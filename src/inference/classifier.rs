//! Output Classifier
//!
//! Maps a raw model output (a single sigmoid probability or a two-class
//! distribution) to a lesion class, a confidence score and a confidence band.

use serde::{Deserialize, Serialize};

use crate::utils::error::{DermaError, Result};

/// Confidence at or above which a prediction is banded `High`
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.80;

/// Confidence at or above which a prediction is banded `Medium`
pub const MEDIUM_CONFIDENCE_THRESHOLD: f32 = 0.60;

/// Single-probability outputs at or above this value are malignant
pub const MALIGNANT_THRESHOLD: f32 = 0.5;

/// The two lesion classes, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LesionClass {
    Benign,
    Malignant,
}

impl LesionClass {
    /// Position of the class in a two-class output vector
    pub fn index(&self) -> usize {
        match self {
            LesionClass::Benign => 0,
            LesionClass::Malignant => 1,
        }
    }

    /// Class at a given output index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(LesionClass::Benign),
            1 => Some(LesionClass::Malignant),
            _ => None,
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            LesionClass::Benign => "Benign",
            LesionClass::Malignant => "Malignant",
        }
    }
}

impl std::fmt::Display for LesionClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse bucketing of a confidence score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// Band for a confidence score; boundaries belong to the upper band
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= HIGH_CONFIDENCE_THRESHOLD {
            ConfidenceBand::High
        } else if confidence >= MEDIUM_CONFIDENCE_THRESHOLD {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceBand::High => write!(f, "High"),
            ConfidenceBand::Medium => write!(f, "Medium"),
            ConfidenceBand::Low => write!(f, "Low"),
        }
    }
}

/// Per-class probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassProbabilities {
    #[serde(rename = "Benign")]
    pub benign: f32,
    #[serde(rename = "Malignant")]
    pub malignant: f32,
}

impl ClassProbabilities {
    /// Probability assigned to a class
    pub fn of(&self, class: LesionClass) -> f32 {
        match class {
            LesionClass::Benign => self.benign,
            LesionClass::Malignant => self.malignant,
        }
    }
}

/// Interpretation of one model output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub predicted_class: LesionClass,
    pub class_index: usize,
    pub confidence: f32,
    pub confidence_band: ConfidenceBand,
    pub probabilities: ClassProbabilities,
}

impl Classification {
    fn new(predicted_class: LesionClass, probabilities: ClassProbabilities) -> Self {
        let confidence = probabilities.of(predicted_class);
        Self {
            predicted_class,
            class_index: predicted_class.index(),
            confidence,
            confidence_band: ConfidenceBand::from_confidence(confidence),
            probabilities,
        }
    }
}

/// Classify a raw probability vector
///
/// * one value: P(Malignant); malignant when `>= 0.5`
/// * two values: `[P(Benign), P(Malignant)]`; first maximum wins, so an exact
///   tie resolves to Benign
pub fn classify(vector: &[f32]) -> Result<Classification> {
    if let Some(bad) = vector.iter().find(|v| !v.is_finite()) {
        return Err(DermaError::Inference(format!(
            "model produced a non-finite probability ({})",
            bad
        )));
    }

    match *vector {
        [malignant] => {
            let probabilities = ClassProbabilities {
                benign: 1.0 - malignant,
                malignant,
            };
            let class = if malignant >= MALIGNANT_THRESHOLD {
                LesionClass::Malignant
            } else {
                LesionClass::Benign
            };
            Ok(Classification::new(class, probabilities))
        }
        [benign, malignant] => {
            let class = LesionClass::from_index(argmax(vector)).unwrap_or(LesionClass::Benign);
            Ok(Classification::new(
                class,
                ClassProbabilities { benign, malignant },
            ))
        }
        _ => Err(DermaError::UnsupportedOutputShape(vector.len())),
    }
}

/// Index of the first maximum
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value_threshold() {
        for p in [0.0f32, 0.1, 0.49, 0.4999] {
            let c = classify(&[p]).unwrap();
            assert_eq!(c.predicted_class, LesionClass::Benign, "p = {}", p);
            assert_eq!(c.class_index, 0);
        }
        for p in [0.5f32, 0.51, 0.9, 1.0] {
            let c = classify(&[p]).unwrap();
            assert_eq!(c.predicted_class, LesionClass::Malignant, "p = {}", p);
            assert_eq!(c.class_index, 1);
        }
    }

    #[test]
    fn test_single_value_probabilities_sum_to_one() {
        for i in 0..=100 {
            let p = i as f32 / 100.0;
            let c = classify(&[p]).unwrap();
            let sum = c.probabilities.benign + c.probabilities.malignant;
            assert!((sum - 1.0).abs() < 1e-6);
            assert_eq!(c.confidence, c.probabilities.of(c.predicted_class));
        }
    }

    #[test]
    fn test_single_value_confidence() {
        let c = classify(&[0.3]).unwrap();
        assert!((c.confidence - 0.7).abs() < 1e-6);
        assert_eq!(c.confidence_band, ConfidenceBand::Medium);

        let c = classify(&[0.95]).unwrap();
        assert!((c.confidence - 0.95).abs() < 1e-6);
        assert_eq!(c.confidence_band, ConfidenceBand::High);
    }

    #[test]
    fn test_two_values_argmax() {
        let c = classify(&[0.8, 0.2]).unwrap();
        assert_eq!(c.predicted_class, LesionClass::Benign);
        assert_eq!(c.confidence, 0.8);

        let c = classify(&[0.35, 0.65]).unwrap();
        assert_eq!(c.predicted_class, LesionClass::Malignant);
        assert_eq!(c.confidence, 0.65);
        assert_eq!(c.probabilities.benign, 0.35);
        assert_eq!(c.probabilities.malignant, 0.65);
    }

    #[test]
    fn test_two_value_tie_resolves_to_benign() {
        let c = classify(&[0.5, 0.5]).unwrap();
        assert_eq!(c.predicted_class, LesionClass::Benign);
        assert_eq!(c.class_index, 0);
        assert_eq!(c.confidence, 0.5);
        assert_eq!(c.confidence_band, ConfidenceBand::Low);
    }

    #[test]
    fn test_single_value_boundary_resolves_to_malignant() {
        let c = classify(&[0.5]).unwrap();
        assert_eq!(c.predicted_class, LesionClass::Malignant);
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(ConfidenceBand::from_confidence(0.80), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.7999), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.60), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_confidence(0.5999), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_confidence(1.0), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_confidence(0.0), ConfidenceBand::Low);
    }

    #[test]
    fn test_unsupported_shapes() {
        assert!(matches!(
            classify(&[]),
            Err(DermaError::UnsupportedOutputShape(0))
        ));
        assert!(matches!(
            classify(&[0.2, 0.3, 0.5]),
            Err(DermaError::UnsupportedOutputShape(3))
        ));
    }

    #[test]
    fn test_non_finite_output_is_inference_error() {
        assert!(matches!(
            classify(&[f32::NAN]),
            Err(DermaError::Inference(_))
        ));
        assert!(matches!(
            classify(&[0.1, f32::INFINITY]),
            Err(DermaError::Inference(_))
        ));
    }

    #[test]
    fn test_serialized_names() {
        let c = classify(&[0.9]).unwrap();
        let json = serde_json::to_value(c).unwrap();
        assert_eq!(json["predicted_class"], "Malignant");
        assert_eq!(json["confidence_band"], "High");
        assert!(json["probabilities"]["Benign"].is_number());
        assert!(json["probabilities"]["Malignant"].is_number());
    }
}
