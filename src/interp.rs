//! Bicubic sampling used by the remapper.
//!
//! Both the per-pixel remap and the upsampling of the coarse coordinate map
//! use the Keys kernel with `a = -0.75` and replicated borders. Coordinate
//! maps are kept as `f32` arrays and never pass through 8-bit storage.

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::Array2;

const CUBIC_A: f64 = -0.75;

fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let x0 = t + 1.0;
    let x1 = t;
    let x2 = 1.0 - t;
    let w0 = ((a * x0 - 5.0 * a) * x0 + 8.0 * a) * x0 - 4.0 * a;
    let w1 = ((a + 2.0) * x1 - (a + 3.0)) * x1 * x1 + 1.0;
    let w2 = ((a + 2.0) * x2 - (a + 3.0)) * x2 * x2 + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

/// Pull a coordinate to at most two pixels outside `[0, len)`. Every tap
/// there already reads the border, so the sample is unchanged; NaN reads
/// the first pixel.
#[inline]
fn clamp_coord(v: f64, len: usize) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(-2.0, len as f64 + 1.0)
    }
}

/// Bicubic sample at fractional `(x, y)` of a `width` x `height` grid read
/// through `at(col, row)`; out-of-range taps are clamped to the border.
#[inline]
fn sample<F>(at: F, width: usize, height: usize, x: f64, y: f64) -> f64
where
    F: Fn(usize, usize) -> f64,
{
    let x = clamp_coord(x, width);
    let y = clamp_coord(y, height);
    let x_floor = x.floor();
    let y_floor = y.floor();
    let wx = cubic_weights(x - x_floor);
    let wy = cubic_weights(y - y_floor);
    let (xi, yi) = (x_floor as i64, y_floor as i64);
    let max_x = width as i64 - 1;
    let max_y = height as i64 - 1;

    let mut acc = 0.0;
    for (j, wyj) in wy.iter().enumerate() {
        let row = (yi - 1 + j as i64).clamp(0, max_y) as usize;
        let mut row_acc = 0.0;
        for (i, wxi) in wx.iter().enumerate() {
            let col = (xi - 1 + i as i64).clamp(0, max_x) as usize;
            row_acc += wxi * at(col, row);
        }
        acc += wyj * row_acc;
    }
    acc
}

#[inline]
fn saturate_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Resample `src` at the source coordinates given by `map_x`/`map_y`.
///
/// Output pixel `(c, r)` is `src(map_x[[r, c]], map_y[[r, c]])`.
pub fn remap_gray(src: &GrayImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> GrayImage {
    let (rows, cols) = map_x.dim();
    let (w, h) = (src.width() as usize, src.height() as usize);
    let mut out = GrayImage::new(cols as u32, rows as u32);
    if w == 0 || h == 0 {
        return out;
    }
    let raw = src.as_raw();

    for r in 0..rows {
        for c in 0..cols {
            let x = map_x[[r, c]] as f64;
            let y = map_y[[r, c]] as f64;
            let v = sample(|col, row| raw[row * w + col] as f64, w, h, x, y);
            out.put_pixel(c as u32, r as u32, Luma([saturate_u8(v)]));
        }
    }

    out
}

/// Three-channel variant of [`remap_gray`].
pub fn remap_rgb(src: &RgbImage, map_x: &Array2<f32>, map_y: &Array2<f32>) -> RgbImage {
    let (rows, cols) = map_x.dim();
    let (w, h) = (src.width() as usize, src.height() as usize);
    let mut out = RgbImage::new(cols as u32, rows as u32);
    if w == 0 || h == 0 {
        return out;
    }
    let raw = src.as_raw();

    for r in 0..rows {
        for c in 0..cols {
            let x = map_x[[r, c]] as f64;
            let y = map_y[[r, c]] as f64;
            let mut px = [0u8; 3];
            for (ch, slot) in px.iter_mut().enumerate() {
                let v = sample(|col, row| raw[(row * w + col) * 3 + ch] as f64, w, h, x, y);
                *slot = saturate_u8(v);
            }
            out.put_pixel(c as u32, r as u32, Rgb(px));
        }
    }

    out
}

/// Bicubic resize of a floating-point map to `width` x `height`.
///
/// Sample positions use half-pixel centres, `src = (dst + 0.5) * scale - 0.5`.
pub fn resize_map(map: &Array2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (src_h, src_w) = map.dim();
    let mut out = Array2::<f32>::zeros((height, width));
    if src_h == 0 || src_w == 0 {
        return out;
    }
    let scale_x = src_w as f64 / width.max(1) as f64;
    let scale_y = src_h as f64 / height.max(1) as f64;

    for r in 0..height {
        let y = (r as f64 + 0.5) * scale_y - 0.5;
        for c in 0..width {
            let x = (c as f64 + 0.5) * scale_x - 0.5;
            let v = sample(|col, row| map[[row, col]] as f64, src_w, src_h, x, y);
            out[[r, c]] = v as f32;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cubic_weights_partition_unity() {
        for t in [0.0, 0.25, 0.5, 0.9] {
            let w = cubic_weights(t);
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
        let w = cubic_weights(0.0);
        assert!((w[1] - 1.0).abs() < 1e-12);
        assert!(w[0].abs() < 1e-12 && w[2].abs() < 1e-12);
    }

    #[test]
    fn test_identity_remap_reproduces_image() {
        let src = GrayImage::from_fn(12, 8, |x, y| Luma([(x * 20 + y * 3) as u8]));
        let map_x = Array2::from_shape_fn((8, 12), |(_, c)| c as f32);
        let map_y = Array2::from_shape_fn((8, 12), |(r, _)| r as f32);
        let out = remap_gray(&src, &map_x, &map_y);
        assert_eq!(out, src);
    }

    #[test]
    fn test_remap_replicates_border() {
        let src = RgbImage::from_pixel(4, 4, Rgb([10, 200, 30]));
        let map_x = Array2::from_elem((2, 2), -5.0f32);
        let map_y = Array2::from_elem((2, 2), 100.0f32);
        let out = remap_rgb(&src, &map_x, &map_y);
        assert!(out.pixels().all(|p| p.0 == [10, 200, 30]));
    }

    #[test]
    fn test_remap_survives_non_finite_coordinates() {
        let src = GrayImage::from_fn(6, 4, |x, _| Luma([if x < 3 { 40 } else { 200 }]));
        let map_x = Array2::from_shape_vec(
            (1, 4),
            vec![f32::INFINITY, f32::NEG_INFINITY, f32::NAN, 1e30],
        )
        .unwrap();
        let map_y = Array2::from_shape_vec((1, 4), vec![1.0, f32::NAN, 2.0, f32::INFINITY]).unwrap();
        let out = remap_gray(&src, &map_x, &map_y);

        assert_eq!(out.get_pixel(0, 0).0[0], 200);
        assert_eq!(out.get_pixel(1, 0).0[0], 40);
        assert_eq!(out.get_pixel(2, 0).0[0], 40);
        assert_eq!(out.get_pixel(3, 0).0[0], 200);
    }

    #[test]
    fn test_resize_map_keeps_range() {
        // Pixel coordinates far outside [0, 1] must come out unclamped
        let flat = Array2::from_elem((3, 5), 812.5f32);
        let big = resize_map(&flat, 20, 12);
        assert_eq!(big.dim(), (12, 20));
        assert!(big.iter().all(|&v| (v - 812.5).abs() < 1e-3));

        let ramp = Array2::from_shape_fn((4, 4), |(_, c)| 100.0 * c as f32);
        let big = resize_map(&ramp, 16, 16);
        for c in 1..16 {
            assert!(big[[8, c]] >= big[[8, c - 1]] - 1e-3);
        }
        assert!(big[[8, 15]] > 250.0);
    }
}
