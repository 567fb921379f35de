pub mod uncertainty;

use crate::error::{DetectionError, Result};
use crate::models::{DetectionResult, GroundTruth, ValidationResult, WeakArea};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Two part confidences match when they differ by at most this much
pub const PART_TOLERANCE: f32 = 0.2;

/// Compares detections against ground-truth records stored as one JSON
/// document per image, named after the image stem.
#[derive(Debug, Clone)]
pub struct ValidationEngine {
    ground_truth_dir: PathBuf,
}

impl ValidationEngine {
    pub fn new(ground_truth_dir: impl Into<PathBuf>) -> Self {
        Self {
            ground_truth_dir: ground_truth_dir.into(),
        }
    }

    pub fn ground_truth_dir(&self) -> &Path {
        &self.ground_truth_dir
    }

    /// `<ground_truth_dir>/<image stem>.json`
    pub fn ground_truth_path(&self, image_path: &Path) -> PathBuf {
        let stem = image_path
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        let mut file_name = stem;
        file_name.push(".json");
        self.ground_truth_dir.join(file_name)
    }

    /// Load the record for an image; `Ok(None)` when no record exists
    pub fn load_ground_truth(&self, image_path: &Path) -> Result<Option<GroundTruth>> {
        let path = self.ground_truth_path(image_path);
        if !path.is_file() {
            debug!("No ground truth at {}", path.display());
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)?;
        let ground_truth = serde_json::from_str(&json).map_err(|e| {
            DetectionError::parse(format!("Malformed ground truth {}: {}", path.display(), e))
        })?;
        Ok(Some(ground_truth))
    }

    /// Validate a detection; a missing record yields [`ValidationResult::skipped`]
    pub fn validate(&self, detection: &DetectionResult) -> Result<ValidationResult> {
        match self.load_ground_truth(&detection.image_path)? {
            Some(ground_truth) => Ok(ValidationResult {
                validated: true,
                message: "Validation completed".to_string(),
                metrics: calculate_metrics(detection, &ground_truth),
            }),
            None => Ok(ValidationResult::skipped()),
        }
    }
}

pub fn calculate_metrics(detection: &DetectionResult, ground_truth: &GroundTruth) -> BTreeMap<String, f32> {
    let mut metrics = BTreeMap::new();
    metrics.insert(
        ValidationResult::IOU.to_string(),
        average_pairwise_iou(&detection.weak_areas, &ground_truth.weak_areas),
    );
    metrics.insert(
        ValidationResult::PART_ACCURACY.to_string(),
        part_accuracy(&detection.parts, &ground_truth.parts),
    );
    metrics.insert(
        ValidationResult::DETECTION_ACCURACY.to_string(),
        detection_accuracy(detection.has_object, ground_truth.has_object),
    );
    metrics
}

pub fn detection_accuracy(detected: bool, expected: bool) -> f32 {
    if detected == expected { 1.0 } else { 0.0 }
}

/// Mean IoU over every (detected, truth) pair whose union is non-empty.
///
/// This is an all-pairs average, not a one-to-one matching: adding a second
/// detection that misses every truth box lowers the score.
pub fn average_pairwise_iou(detected: &[WeakArea], truth: &[WeakArea]) -> f32 {
    let mut total = 0.0f32;
    let mut pairs = 0usize;

    for d in detected {
        for t in truth {
            if d.union_area(t) > 0 {
                total += d.iou(t);
                pairs += 1;
            }
        }
    }

    if pairs > 0 { total / pairs as f32 } else { 0.0 }
}

/// Share of ground-truth parts detected within [`PART_TOLERANCE`]
pub fn part_accuracy(detected: &BTreeMap<String, f32>, truth: &BTreeMap<String, f32>) -> f32 {
    if truth.is_empty() {
        return 0.0;
    }

    let correct = truth
        .iter()
        .filter(|(name, expected)| {
            detected
                .get(name.as_str())
                .is_some_and(|found| (found - *expected).abs() <= PART_TOLERANCE + 1e-6)
        })
        .count();

    correct as f32 / truth.len() as f32
}
