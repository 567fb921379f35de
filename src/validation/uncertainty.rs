use crate::error::{DetectionError, Result};
use image::GrayImage;
use std::path::Path;

/// Pixels brighter than this count as foreground
pub const FOREGROUND_THRESHOLD: u8 = 128;

fn check_dimensions(a: &GrayImage, b: &GrayImage) -> Result<()> {
    if a.dimensions() != b.dimensions() {
        return Err(DetectionError::DimensionMismatch {
            expected: a.dimensions(),
            actual: b.dimensions(),
        });
    }
    Ok(())
}

fn is_foreground(value: u8) -> bool {
    value > FOREGROUND_THRESHOLD
}

/// Pixel-level IoU of two binary masks; 0.0 when both are empty
pub fn mask_iou(ground_truth: &GrayImage, prediction: &GrayImage) -> Result<f64> {
    check_dimensions(ground_truth, prediction)?;

    let (mut intersection, mut union) = (0u64, 0u64);
    for (gt, pred) in ground_truth.pixels().zip(prediction.pixels()) {
        let (gt, pred) = (is_foreground(gt[0]), is_foreground(pred[0]));
        if gt && pred {
            intersection += 1;
        }
        if gt || pred {
            union += 1;
        }
    }

    Ok(if union == 0 { 0.0 } else { intersection as f64 / union as f64 })
}

/// Share of pixels where both masks agree on foreground/background
pub fn pixel_accuracy(ground_truth: &GrayImage, prediction: &GrayImage) -> Result<f64> {
    check_dimensions(ground_truth, prediction)?;

    let total = ground_truth.width() as u64 * ground_truth.height() as u64;
    if total == 0 {
        return Ok(0.0);
    }
    let correct = ground_truth
        .pixels()
        .zip(prediction.pixels())
        .filter(|(gt, pred)| is_foreground(gt[0]) == is_foreground(pred[0]))
        .count();

    Ok(correct as f64 / total as f64)
}

/// Normalised uncertainty summed over predicted-foreground pixels, averaged
/// over the whole image
pub fn mean_uncertainty(prediction: &GrayImage, uncertainty_map: &GrayImage) -> Result<f64> {
    check_dimensions(prediction, uncertainty_map)?;

    let total = prediction.width() as u64 * prediction.height() as u64;
    if total == 0 {
        return Ok(0.0);
    }
    let sum: f64 = prediction
        .pixels()
        .zip(uncertainty_map.pixels())
        .filter(|(pred, _)| is_foreground(pred[0]))
        .map(|(_, u)| u[0] as f64 / 255.0)
        .sum();

    Ok(sum / total as f64)
}

/// Mask-level scores for one prediction
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct MaskMetrics {
    pub iou: f64,
    pub uncertainty: f64,
    pub pixel_accuracy: f64,
}

impl MaskMetrics {
    pub fn from_images(
        ground_truth: &GrayImage,
        prediction: &GrayImage,
        uncertainty_map: &GrayImage,
    ) -> Result<Self> {
        Ok(Self {
            iou: mask_iou(ground_truth, prediction)?,
            uncertainty: mean_uncertainty(prediction, uncertainty_map)?,
            pixel_accuracy: pixel_accuracy(ground_truth, prediction)?,
        })
    }

    /// Load the three maps from disk (any format `image` decodes) and score them
    pub fn compute(ground_truth: &Path, prediction: &Path, uncertainty_map: &Path) -> Result<Self> {
        let load = |path: &Path| -> Result<GrayImage> {
            if !path.is_file() {
                return Err(DetectionError::NotFound(path.to_path_buf()));
            }
            Ok(image::open(path)?.to_luma8())
        };
        Self::from_images(&load(ground_truth)?, &load(prediction)?, &load(uncertainty_map)?)
    }
}
