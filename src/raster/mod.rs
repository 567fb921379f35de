//! Vector geometry to pixel masks, and local edits on rank maps.
//!
//! Polygons are filled with the even-odd rule sampled at pixel centres:
//! pixel `(x, y)` is foreground iff `(x + 0.5, y + 0.5)` lies inside the
//! implicitly closed polygon. Edge crossings are half-open in `y`, so shared
//! vertices are never counted twice.

pub mod brush;
pub mod regions;
pub mod roi;

pub use brush::{BrushMode, BrushSettings, BrushStroke};
pub use regions::mask_to_weak_areas;
pub use roi::{DrawingMode, DrawingSession, PolygonRoi};

use crate::error::Result;
use crate::models::{Point, WeakArea};
use image::{GrayImage, ImageFormat, Luma};
use std::path::Path;

pub const BACKGROUND: u8 = 0;
pub const FOREGROUND: u8 = 255;

/// Minimum number of points a polygon needs before it can be rasterized
pub const MIN_POLYGON_POINTS: usize = 3;

/// Axis-aligned bounds of a point set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Outward-rounded integer rectangle
    pub fn to_weak_area(&self) -> WeakArea {
        WeakArea::new(
            self.min_x.floor() as i32,
            self.min_y.floor() as i32,
            self.max_x.ceil() as i32,
            self.max_y.ceil() as i32,
        )
    }
}

/// Rasterize a closed polygon into a `width`×`height` mask.
///
/// Returns `None` for fewer than three points or non-finite coordinates.
/// Repeating the first point at the end is allowed and changes nothing.
pub fn polygon_mask(points: &[Point], width: u32, height: u32) -> Option<GrayImage> {
    if points.len() < MIN_POLYGON_POINTS || !points.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
        return None;
    }

    let mut mask = GrayImage::new(width, height);
    fill_polygon(&mut mask, points, FOREGROUND);
    Some(mask)
}

/// Scanline even-odd fill of `points` into an existing mask, clipped to its bounds
pub fn fill_polygon(mask: &mut GrayImage, points: &[Point], value: u8) {
    let (width, height) = mask.dimensions();
    if points.len() < MIN_POLYGON_POINTS || width == 0 || height == 0 {
        return;
    }

    let min_y = points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
    if !min_y.is_finite() || !max_y.is_finite() {
        return;
    }

    // Rows whose centre lies within [min_y, max_y]
    let first_row = (min_y - 0.5).ceil().max(0.0);
    let last_row = (max_y - 0.5).floor().min(height as f64 - 1.0);
    if last_row < first_row {
        return;
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(points.len());
    for y in first_row as u32..=last_row as u32 {
        let scan_y = y as f64 + 0.5;
        crossings.clear();

        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            if (a.y <= scan_y) != (b.y <= scan_y) {
                let t = (scan_y - a.y) / (b.y - a.y);
                crossings.push(a.x + t * (b.x - a.x));
            }
        }

        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            // x + 0.5 in [left, right)
            let start = (span[0] - 0.5).ceil().max(0.0);
            let end = (span[1] - 0.5).ceil().min(width as f64);
            if end <= start {
                continue;
            }
            for x in start as u32..end as u32 {
                mask.put_pixel(x, y, Luma([value]));
            }
        }
    }
}

/// Half-open rectangle fill: `x1 <= x < x2`, `y1 <= y < y2`, clipped to the canvas
pub fn rect_mask(area: &WeakArea, width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);

    let x_start = area.x1.max(0) as u32;
    let y_start = area.y1.max(0) as u32;
    let x_end = (area.x2.max(0) as u32).min(width);
    let y_end = (area.y2.max(0) as u32).min(height);

    for y in y_start..y_end {
        for x in x_start..x_end {
            mask.put_pixel(x, y, Luma([FOREGROUND]));
        }
    }

    mask
}

/// Min/max over the points; `None` for an empty slice
pub fn bounding_box(points: &[Point]) -> Option<BoundingBox> {
    let first = points.first()?;
    Some(points.iter().skip(1).fold(
        BoundingBox {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        },
        |bbox, p| BoundingBox {
            min_x: bbox.min_x.min(p.x),
            min_y: bbox.min_y.min(p.y),
            max_x: bbox.max_x.max(p.x),
            max_y: bbox.max_y.max(p.y),
        },
    ))
}

/// Project points into `[0, 1]` image space for external consumers.
///
/// `None` when either dimension is zero.
pub fn normalized_points(points: &[Point], width: f64, height: f64) -> Option<Vec<[f64; 2]>> {
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(points.iter().map(|p| [p.x / width, p.y / height]).collect())
}

/// Wrap a raw row-major buffer; `None` when the length is not `width * height`
pub fn mask_from_bytes(data: Vec<u8>, width: u32, height: u32) -> Option<GrayImage> {
    GrayImage::from_raw(width, height, data)
}

/// Number of foreground (non-zero) pixels
pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] != BACKGROUND).count()
}

/// Write a mask as a single-channel 8-bit PNG
pub fn export_mask_png(mask: &GrayImage, path: impl AsRef<Path>) -> Result<()> {
    mask.save_with_format(path.as_ref(), ImageFormat::Png)?;
    Ok(())
}
