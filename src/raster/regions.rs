use crate::models::WeakArea;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::HashMap;

use super::{BACKGROUND, FOREGROUND};
use crate::validation::uncertainty::FOREGROUND_THRESHOLD;

/// Turn the foreground blobs of a mask into weak-area rectangles.
///
/// Pixels above the foreground threshold are grouped by 8-connectivity;
/// each group with at least `min_pixels` pixels becomes the rectangle
/// `(min_x, min_y, max_x + 1, max_y + 1)`. Results are ordered top to bottom,
/// then left to right.
pub fn mask_to_weak_areas(mask: &GrayImage, min_pixels: u32) -> Vec<WeakArea> {
    // Threshold first so that anti-aliased edges do not split one blob into
    // several intensity classes
    let binary = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] > FOREGROUND_THRESHOLD {
            Luma([FOREGROUND])
        } else {
            Luma([BACKGROUND])
        }
    });

    let labeled = connected_components(&binary, Connectivity::Eight, Luma([BACKGROUND]));

    let mut regions: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
    for (x, y, label) in labeled.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }

        regions
            .entry(label)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    let mut areas: Vec<WeakArea> = regions
        .into_values()
        .filter(|&(_, _, _, _, count)| count >= min_pixels)
        .map(|(min_x, min_y, max_x, max_y, _)| {
            WeakArea::new(min_x as i32, min_y as i32, max_x as i32 + 1, max_y as i32 + 1)
        })
        .collect();
    areas.sort_by_key(|a| (a.y1, a.x1));
    areas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::rect_mask;

    #[test]
    fn separated_blobs_become_separate_areas() {
        let mut mask = rect_mask(&WeakArea::new(1, 1, 4, 3), 20, 20);
        for (x, y, p) in rect_mask(&WeakArea::new(10, 12, 15, 18), 20, 20).enumerate_pixels() {
            if p[0] == FOREGROUND {
                mask.put_pixel(x, y, *p);
            }
        }

        let areas = mask_to_weak_areas(&mask, 1);
        assert_eq!(areas, vec![WeakArea::new(1, 1, 4, 3), WeakArea::new(10, 12, 15, 18)]);
    }

    #[test]
    fn small_blobs_are_dropped() {
        let mut mask = rect_mask(&WeakArea::new(0, 0, 5, 5), 10, 10);
        mask.put_pixel(8, 8, Luma([FOREGROUND]));
        assert_eq!(mask_to_weak_areas(&mask, 4), vec![WeakArea::new(0, 0, 5, 5)]);
    }

    #[test]
    fn rank_values_are_thresholded() {
        let mut mask = GrayImage::new(6, 6);
        mask.put_pixel(2, 2, Luma([200]));
        mask.put_pixel(3, 3, Luma([140]));
        mask.put_pixel(5, 5, Luma([100]));
        assert_eq!(mask_to_weak_areas(&mask, 1), vec![WeakArea::new(2, 2, 4, 4)]);
    }

    #[test]
    fn empty_mask_has_no_areas() {
        assert!(mask_to_weak_areas(&GrayImage::new(5, 5), 1).is_empty());
    }
}
