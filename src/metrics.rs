//! Full-image fidelity scores between an original and its cleaned output.
//!
//! Both scores cover the entire frame. With correct blending only the masked
//! area differs, so scores should sit close to their maximum; a low score on a
//! lightly masked image points at a blend regression.

use image::RgbImage;

use crate::blending::match_dimensions;

/// SSIM window side length.
const WINDOW: u32 = 7;
/// SSIM stabilizer constants, relative to the data range.
const K1: f64 = 0.01;
const K2: f64 = 0.03;
/// Dynamic range of 8-bit samples.
const DATA_RANGE: f64 = 255.0;

/// Similarity and fidelity scores for one image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScores {
    /// Mean structural similarity over all channels, in `[-1, 1]`.
    pub similarity: f64,
    /// Peak signal-to-noise ratio in dB; infinite for identical images.
    pub fidelity: f64,
}

/// Score `processed` against `original`, resizing `processed` if needed.
#[must_use]
pub fn score(original: &RgbImage, processed: &RgbImage) -> QualityScores {
    let processed = match_dimensions(processed, original.width(), original.height());
    QualityScores {
        similarity: ssim(original, &processed),
        fidelity: psnr(original, &processed),
    }
}

/// Peak signal-to-noise ratio over every sample of two equally sized images.
///
/// # Panics
///
/// Panics if the dimensions differ.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn psnr(a: &RgbImage, b: &RgbImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions(), "psnr needs equal sizes");
    let samples = a.as_raw().len();
    if samples == 0 {
        return f64::INFINITY;
    }
    let sum_sq: f64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum();
    let mse = sum_sq / samples as f64;
    if mse == 0.0 {
        f64::INFINITY
    } else {
        10.0 * (DATA_RANGE * DATA_RANGE / mse).log10()
    }
}

/// Mean structural similarity over all channels.
///
/// Uses a uniform 7x7 window with sample covariance, averaging over windows
/// fully inside the image. Images smaller than the window use the largest odd
/// window that fits.
///
/// # Panics
///
/// Panics if the dimensions differ.
#[must_use]
pub fn ssim(a: &RgbImage, b: &RgbImage) -> f64 {
    assert_eq!(a.dimensions(), b.dimensions(), "ssim needs equal sizes");
    let (w, h) = a.dimensions();
    if w == 0 || h == 0 {
        return 1.0;
    }
    let total: f64 = (0..3).map(|ch| channel_ssim(a, b, ch)).sum();
    total / 3.0
}

/// Summed-area tables for one channel pair.
struct Integrals {
    stride: usize,
    x: Vec<f64>,
    y: Vec<f64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    xy: Vec<f64>,
}

impl Integrals {
    fn build(a: &RgbImage, b: &RgbImage, ch: usize) -> Self {
        let (w, h) = (a.width() as usize, a.height() as usize);
        let stride = w + 1;
        let size = stride * (h + 1);
        let mut t = Self {
            stride,
            x: vec![0.0; size],
            y: vec![0.0; size],
            xx: vec![0.0; size],
            yy: vec![0.0; size],
            xy: vec![0.0; size],
        };
        for (row, (ra, rb)) in a.rows().zip(b.rows()).enumerate() {
            let (mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for (col, (pa, pb)) in ra.zip(rb).enumerate() {
                let va = f64::from(pa[ch]);
                let vb = f64::from(pb[ch]);
                sx += va;
                sy += vb;
                sxx += va * va;
                syy += vb * vb;
                sxy += va * vb;
                let here = (row + 1) * stride + col + 1;
                let above = row * stride + col + 1;
                t.x[here] = t.x[above] + sx;
                t.y[here] = t.y[above] + sy;
                t.xx[here] = t.xx[above] + sxx;
                t.yy[here] = t.yy[above] + syy;
                t.xy[here] = t.xy[above] + sxy;
            }
        }
        t
    }

    fn window_sum(&self, table: &[f64], x0: usize, y0: usize, side: usize) -> f64 {
        let (x1, y1) = (x0 + side, y0 + side);
        table[y1 * self.stride + x1] - table[y0 * self.stride + x1] - table[y1 * self.stride + x0]
            + table[y0 * self.stride + x0]
    }
}

#[allow(clippy::cast_precision_loss)]
fn channel_ssim(a: &RgbImage, b: &RgbImage, ch: usize) -> f64 {
    let (w, h) = a.dimensions();
    let mut side = WINDOW.min(w).min(h);
    if side % 2 == 0 {
        side -= 1;
    }
    let side = side as usize;
    let np = (side * side) as f64;
    let cov_norm = if np > 1.0 { np / (np - 1.0) } else { 1.0 };
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let t = Integrals::build(a, b, ch);
    let (w, h) = (w as usize, h as usize);
    let mut total = 0.0;
    let mut count = 0usize;

    for y0 in 0..=(h - side) {
        for x0 in 0..=(w - side) {
            let ux = t.window_sum(&t.x, x0, y0, side) / np;
            let uy = t.window_sum(&t.y, x0, y0, side) / np;
            let uxx = t.window_sum(&t.xx, x0, y0, side) / np;
            let uyy = t.window_sum(&t.yy, x0, y0, side) / np;
            let uxy = t.window_sum(&t.xy, x0, y0, side) / np;

            let vx = cov_norm * (uxx - ux * ux);
            let vy = cov_norm * (uyy - uy * uy);
            let vxy = cov_norm * (uxy - ux * uy);

            let num = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let den = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += num / den;
            count += 1;
        }
    }

    total / count as f64
}
