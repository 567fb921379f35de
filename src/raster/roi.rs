use super::{BoundingBox, MIN_POLYGON_POINTS};
use crate::models::Point;
use image::GrayImage;
use uuid::Uuid;

/// User-drawn region of interest.
///
/// Points only grow while the region is being drawn; the polygon is
/// implicitly closed from the last point back to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRoi {
    pub id: Uuid,
    pub priority: f64,
    /// Size of the image the region was drawn on, when known
    pub image_size: Option<(u32, u32)>,
    points: Vec<Point>,
}

impl PolygonRoi {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: 1.0,
            image_size: None,
            points: Vec::new(),
        }
    }

    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            points,
            ..Self::new()
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    pub fn push_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Whether the region has enough points to become a mask
    pub fn is_closed(&self) -> bool {
        self.points.len() >= MIN_POLYGON_POINTS
    }

    /// Binary mask (255 inside, 0 outside); `None` below three points
    pub fn to_mask(&self, width: u32, height: u32) -> Option<GrayImage> {
        super::polygon_mask(&self.points, width, height)
    }

    /// Mask at the size of the image the region was drawn on
    pub fn image_mask(&self) -> Option<GrayImage> {
        let (width, height) = self.image_size?;
        self.to_mask(width, height)
    }

    /// Row-major mask bytes for transport to the analysis backend
    pub fn mask_bytes(&self, width: u32, height: u32) -> Option<Vec<u8>> {
        self.to_mask(width, height).map(GrayImage::into_raw)
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        super::bounding_box(&self.points)
    }

    pub fn normalized(&self, image_width: f64, image_height: f64) -> Option<Vec<[f64; 2]>> {
        super::normalized_points(&self.points, image_width, image_height)
    }
}

impl Default for PolygonRoi {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawingMode {
    #[default]
    None,
    Polygon,
    Freehand,
    Eraser,
}

/// An open drawing interaction on the canvas
#[derive(Debug, Default)]
pub struct DrawingSession {
    mode: DrawingMode,
    current: Vec<Point>,
    image_size: Option<(u32, u32)>,
}

impl DrawingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_image_dimensions(&mut self, width: u32, height: u32) {
        self.image_size = Some((width, height));
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    pub fn mode(&self) -> DrawingMode {
        self.mode
    }

    pub fn start(&mut self, mode: DrawingMode) {
        self.mode = mode;
        self.current.clear();
    }

    /// Points are recorded only in polygon mode
    pub fn add_point(&mut self, point: Point) {
        if self.mode == DrawingMode::Polygon {
            self.current.push(point);
        }
    }

    pub fn is_drawing(&self) -> bool {
        !self.current.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.current
    }

    /// Close the polygon. With fewer than three points nothing happens and the
    /// session keeps drawing. The region carries the session's image size.
    pub fn complete(&mut self) -> Option<PolygonRoi> {
        if self.current.len() < MIN_POLYGON_POINTS {
            return None;
        }
        self.mode = DrawingMode::None;
        let mut roi = PolygonRoi::from_points(std::mem::take(&mut self.current));
        roi.image_size = self.image_size;
        Some(roi)
    }

    pub fn cancel(&mut self) {
        self.current.clear();
        self.mode = DrawingMode::None;
    }
}
