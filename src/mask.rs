//! Binary mask construction from detected regions.

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use crate::region::Region;

/// Mask value for pixels to be reconstructed.
pub const MASK_REPLACE: u8 = 255;
/// Mask value for background pixels that must be preserved.
pub const MASK_KEEP: u8 = 0;

/// Default padding added around each region, absorbing soft watermark edges
/// and detector localization error.
pub const DEFAULT_PADDING: u32 = 30;

/// Build a single-channel mask of `width` x `height`.
///
/// Each region is grown by `padding` on all sides, clamped to the image, and
/// filled with [`MASK_REPLACE`]; both corners are inclusive. Overlapping
/// regions union. Regions entirely outside the image are ignored.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn build_mask(width: u32, height: u32, regions: &[Region], padding: u32) -> GrayImage {
    let mut mask = GrayImage::from_pixel(width, height, Luma([MASK_KEEP]));
    if width == 0 || height == 0 {
        return mask;
    }

    let pad = i64::from(padding);
    let max_x = i64::from(width) - 1;
    let max_y = i64::from(height) - 1;

    for region in regions {
        let x1 = (i64::from(region.x1) - pad).max(0);
        let y1 = (i64::from(region.y1) - pad).max(0);
        let x2 = (i64::from(region.x2) + pad).min(max_x);
        let y2 = (i64::from(region.y2) + pad).min(max_y);
        if x1 > x2 || y1 > y2 {
            continue;
        }
        // Bounds are within u32 image dimensions after clamping.
        let (w, h) = ((x2 - x1 + 1) as u32, (y2 - y1 + 1) as u32);
        let rect = Rect::at(x1 as i32, y1 as i32).of_size(w, h);
        draw_filled_rect_mut(&mut mask, rect, Luma([MASK_REPLACE]));
    }

    mask
}

/// Fraction of mask pixels marked for replacement.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coverage(mask: &GrayImage) -> f32 {
    let total = mask.width() as usize * mask.height() as usize;
    if total == 0 {
        return 0.0;
    }
    let masked = mask.pixels().filter(|p| p[0] != MASK_KEEP).count();
    masked as f32 / total as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, p) in mask.enumerate_pixels() {
            if p[0] == MASK_REPLACE {
                bounds = Some(match bounds {
                    None => (x, y, x, y),
                    Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
                });
            }
        }
        bounds
    }

    #[test]
    fn padding_is_clamped_at_top_left() {
        let mask = build_mask(100, 100, &[Region::new(0, 0, 10, 10)], 30);
        assert_eq!(filled_bounds(&mask), Some((0, 0, 40, 40)));
        assert_eq!(mask.get_pixel(40, 40)[0], MASK_REPLACE);
        assert_eq!(mask.get_pixel(41, 0)[0], MASK_KEEP);
        assert_eq!(mask.get_pixel(0, 41)[0], MASK_KEEP);
    }

    #[test]
    fn padding_is_clamped_at_bottom_right() {
        let mask = build_mask(100, 80, &[Region::new(90, 70, 99, 79)], 5);
        assert_eq!(filled_bounds(&mask), Some((85, 65, 99, 79)));
    }

    #[test]
    fn overlapping_regions_union() {
        let regions = [Region::new(10, 10, 20, 20), Region::new(15, 15, 30, 30)];
        let mask = build_mask(50, 50, &regions, 0);
        assert_eq!(mask.get_pixel(10, 10)[0], MASK_REPLACE);
        assert_eq!(mask.get_pixel(30, 30)[0], MASK_REPLACE);
        assert_eq!(mask.get_pixel(12, 28)[0], MASK_KEEP);
        // 11*11 + 16*16 - 6*6 overlap
        let masked = mask.pixels().filter(|p| p[0] == MASK_REPLACE).count();
        assert_eq!(masked, 121 + 256 - 36);
    }

    #[test]
    fn full_coverage_is_allowed() {
        let mask = build_mask(20, 10, &[Region::new(-5, -5, 100, 100)], 30);
        assert!((coverage(&mask) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn regions_outside_image_are_ignored() {
        let mask = build_mask(20, 20, &[Region::new(100, 100, 120, 120)], 5);
        assert!(coverage(&mask).abs() < f32::EPSILON);
    }

    #[test]
    fn no_regions_keeps_everything() {
        let mask = build_mask(16, 16, &[], DEFAULT_PADDING);
        assert_eq!(mask.dimensions(), (16, 16));
        assert!(mask.pixels().all(|p| p[0] == MASK_KEEP));
    }
}
