//! Built-in inpainter for running without an external model.
//!
//! Masked pixels are filled from the outside in: each round, every masked
//! pixel touching at least one known pixel takes the mean of its known
//! 8-neighbours and becomes known itself. A few relaxation sweeps then smooth
//! the fill. Quality is far below a learned model but needs no weights.

use image::{GrayImage, Rgb, RgbImage};

use crate::capability::Inpainter;
use crate::error::{Error, Result};
use crate::mask::MASK_KEEP;

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Onion-peel diffusion fill.
#[derive(Debug, Clone, Copy)]
pub struct DiffusionInpainter {
    /// Relaxation sweeps applied after the fill.
    pub smoothing_passes: u32,
}

impl Default for DiffusionInpainter {
    fn default() -> Self {
        Self {
            smoothing_passes: 8,
        }
    }
}

impl Inpainter for DiffusionInpainter {
    fn reconstruct(&self, image: &RgbImage, mask: &GrayImage) -> Result<RgbImage> {
        if image.dimensions() != mask.dimensions() {
            return Err(Error::capability(
                "inpainter",
                format!(
                    "mask is {:?} but image is {:?}",
                    mask.dimensions(),
                    image.dimensions()
                ),
            ));
        }

        let (w, h) = image.dimensions();
        let mut out = image.clone();
        let mut known: Vec<bool> = mask.pixels().map(|p| p[0] == MASK_KEEP).collect();
        let masked: Vec<(u32, u32)> = mask
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] != MASK_KEEP)
            .map(|(x, y, _)| (x, y))
            .collect();

        let mut pending = masked.clone();
        while !pending.is_empty() {
            let mut filled = Vec::new();
            pending.retain(|&(x, y)| match neighbour_mean(&out, &known, w, h, x, y) {
                Some(px) => {
                    filled.push((x, y, px));
                    false
                }
                None => true,
            });
            if filled.is_empty() {
                // No known pixel is reachable (fully masked image).
                break;
            }
            for (x, y, px) in filled {
                out.put_pixel(x, y, px);
                known[(y * w + x) as usize] = true;
            }
        }

        let all_known = vec![true; known.len()];
        for _ in 0..self.smoothing_passes {
            let updates: Vec<_> = masked
                .iter()
                .filter(|&&(x, y)| known[(y * w + x) as usize])
                .filter_map(|&(x, y)| {
                    neighbour_mean(&out, &all_known, w, h, x, y).map(|px| (x, y, px))
                })
                .collect();
            for (x, y, px) in updates {
                out.put_pixel(x, y, px);
            }
        }

        Ok(out)
    }
}

/// Mean of the known 8-neighbours of `(x, y)`, if any.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn neighbour_mean(
    img: &RgbImage,
    known: &[bool],
    w: u32,
    h: u32,
    x: u32,
    y: u32,
) -> Option<Rgb<u8>> {
    let mut sum = [0u32; 3];
    let mut count = 0u32;
    for (dx, dy) in NEIGHBOURS {
        let nx = i64::from(x) + dx;
        let ny = i64::from(y) + dy;
        if nx < 0 || ny < 0 || nx >= i64::from(w) || ny >= i64::from(h) {
            continue;
        }
        let (nx, ny) = (nx as u32, ny as u32);
        if !known[(ny * w + nx) as usize] {
            continue;
        }
        for (s, v) in sum.iter_mut().zip(img.get_pixel(nx, ny).0) {
            *s += u32::from(v);
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(Rgb([
        ((sum[0] + count / 2) / count) as u8,
        ((sum[1] + count / 2) / count) as u8,
        ((sum[2] + count / 2) / count) as u8,
    ]))
}
