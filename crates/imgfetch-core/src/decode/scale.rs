//! Target-size arithmetic for rescaling.

use super::Dims;

/// Largest power-of-two divisor that keeps both dimensions at or above the
/// requested box. Halving stops as soon as either side would drop below it.
pub fn sample_factor(width: u32, height: u32, target: Dims) -> u32 {
    let (mut w, mut h) = (width, height);
    let mut factor = 1u32;
    while w / 2 >= target.width && h / 2 >= target.height {
        w /= 2;
        h /= 2;
        factor *= 2;
    }
    factor
}

/// Size of a `width`×`height` image scaled to fit `target` with its aspect ratio
/// kept: one side matches the box exactly, the other is derived from the ratio
/// and never exceeds its bound.
pub fn fit_within(width: u32, height: u32, target: Dims) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (target.width, target.height);
    }
    let ratio = width as f64 / height as f64;
    let box_ratio = target.width as f64 / target.height as f64;
    if box_ratio > ratio {
        // Box is wider than the image: height is the binding side.
        let w = (target.height as f64 * ratio).round() as u32;
        (w.clamp(1, target.width), target.height)
    } else {
        let h = (target.width as f64 / ratio).round() as u32;
        (target.width, h.clamp(1, target.height))
    }
}
