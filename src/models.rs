use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::OffsetDateTime;
use uuid::Uuid;

/// Point in image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle flagged as weakly camouflaged.
///
/// Coordinates follow the ground-truth schema (`X1`..`Y2`). A rectangle with
/// `x1 > x2` or `y1 > y2` is kept as-is but has zero area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct WeakArea {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl WeakArea {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_valid(&self) -> bool {
        self.x1 <= self.x2 && self.y1 <= self.y2
    }

    pub fn width(&self) -> i64 {
        if self.is_valid() { self.x2 as i64 - self.x1 as i64 } else { 0 }
    }

    pub fn height(&self) -> i64 {
        if self.is_valid() { self.y2 as i64 - self.y1 as i64 } else { 0 }
    }

    /// Widened so that rectangles spanning the full `i32` range cannot overflow
    pub fn area(&self) -> i128 {
        self.width() as i128 * self.height() as i128
    }

    /// Overlap area; zero for disjoint or invalid rectangles
    pub fn intersection_area(&self, other: &WeakArea) -> i128 {
        if !self.is_valid() || !other.is_valid() {
            return 0;
        }

        let x_left = self.x1.max(other.x1) as i128;
        let y_top = self.y1.max(other.y1) as i128;
        let x_right = self.x2.min(other.x2) as i128;
        let y_bottom = self.y2.min(other.y2) as i128;

        if x_right < x_left || y_bottom < y_top {
            return 0;
        }

        (x_right - x_left) * (y_bottom - y_top)
    }

    pub fn union_area(&self, other: &WeakArea) -> i128 {
        self.area() + other.area() - self.intersection_area(other)
    }

    /// Intersection over union, 0.0 when the union is empty
    pub fn iou(&self, other: &WeakArea) -> f32 {
        let union = self.union_area(other);
        if union <= 0 {
            return 0.0;
        }
        (self.intersection_area(other) as f64 / union as f64) as f32
    }

    /// Smallest rectangle covering both
    pub fn merge(&self, other: &WeakArea) -> WeakArea {
        WeakArea {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// Reference data for one source image, authored outside the workbench
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroundTruth {
    pub has_object: bool,
    #[serde(default)]
    pub weak_areas: Vec<WeakArea>,
    #[serde(default)]
    pub parts: BTreeMap<String, f32>,
}

/// Outcome of comparing a detection with its ground truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validated: bool,
    pub message: String,
    pub metrics: BTreeMap<String, f32>,
}

impl ValidationResult {
    pub const IOU: &'static str = "IoU";
    pub const PART_ACCURACY: &'static str = "PartAccuracy";
    pub const DETECTION_ACCURACY: &'static str = "DetectionAccuracy";

    /// Validation could not run because no ground truth exists for the image
    pub fn skipped() -> Self {
        Self {
            validated: false,
            message: "Ground truth data not found".to_string(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f32> {
        self.metrics.get(name).copied()
    }

    /// One-line summary, e.g. `IoU=0.143, PartAccuracy=0.500, DetectionAccuracy=1.000`
    pub fn summary(&self) -> String {
        [Self::IOU, Self::PART_ACCURACY, Self::DETECTION_ACCURACY]
            .iter()
            .filter_map(|name| self.metric(name).map(|v| format!("{}={:.3}", name, v)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of running one image through the detection pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub id: Uuid,
    pub image_path: PathBuf,
    pub image_size: Option<(u32, u32)>,
    pub has_object: bool,
    pub message: String,
    pub weak_areas: Vec<WeakArea>,
    pub parts: BTreeMap<String, f32>,
    pub polygon: Option<Vec<Point>>,
    pub mask: Option<Vec<u8>>,
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
    pub validation: Option<ValidationResult>,
    pub is_confirmed: bool,
    pub is_rejected: bool,
}

impl DetectionResult {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_path: image_path.into(),
            image_size: None,
            has_object: false,
            message: String::new(),
            weak_areas: Vec::new(),
            parts: BTreeMap::new(),
            polygon: None,
            mask: None,
            processed_at: OffsetDateTime::now_utc(),
            validation: None,
            is_confirmed: false,
            is_rejected: false,
        }
    }

    pub fn confirm(&mut self) {
        self.is_confirmed = true;
    }

    pub fn reject(&mut self) {
        self.is_rejected = true;
    }

    pub fn has_feedback(&self) -> bool {
        self.is_confirmed || self.is_rejected
    }

    /// Mean confidence over detected parts, 0.0 without parts
    pub fn average_confidence(&self) -> f32 {
        if self.parts.is_empty() {
            return 0.0;
        }
        self.parts.values().sum::<f32>() / self.parts.len() as f32
    }

    /// `leg(0.91), tail(1.00)`
    pub fn parts_breakdown(&self) -> String {
        self.parts
            .iter()
            .map(|(name, confidence)| format!("{}({:.2})", name, confidence))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Build a feedback record from the most precise geometry available:
    /// polygon, then mask, then the box covering all weak areas.
    pub fn to_feedback(&self, kind: FeedbackKind) -> Option<DetectionFeedback> {
        let geometry = if let Some(points) = self.polygon.as_ref().filter(|p| !p.is_empty()) {
            FeedbackGeometry::Polygon(points.clone())
        } else if let Some(mask) = &self.mask {
            let (width, height) = self.image_size?;
            FeedbackGeometry::Mask {
                data: mask.clone(),
                width,
                height,
            }
        } else {
            let bbox = self
                .weak_areas
                .iter()
                .copied()
                .reduce(|acc, area| acc.merge(&area))?;
            FeedbackGeometry::BoundingBox(bbox)
        };

        Some(DetectionFeedback {
            detection_id: self.id,
            kind,
            geometry,
            confidence: self.average_confidence(),
            image_path: self.image_path.clone(),
            image_size: self.image_size,
            timestamp: OffsetDateTime::now_utc(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackKind {
    Confirm,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedbackGeometry {
    Polygon(Vec<Point>),
    Mask { data: Vec<u8>, width: u32, height: u32 },
    BoundingBox(WeakArea),
}

/// User verdict on a detection, with the geometry it refers to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionFeedback {
    pub detection_id: Uuid,
    pub kind: FeedbackKind,
    pub geometry: FeedbackGeometry,
    pub confidence: f32,
    pub image_path: PathBuf,
    pub image_size: Option<(u32, u32)>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}
