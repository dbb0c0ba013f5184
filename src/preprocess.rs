//! Raster preparation: screen-size reduction, mean-C binarisation and
//! rectangular morphology on 8-bit masks.

use image::imageops;
use image::{GrayImage, Luma, RgbImage};
use tracing::debug;

/// Shrink `img` by the smallest integer factor that fits it inside
/// `max_width` x `max_height`, averaging the source pixels each output pixel
/// covers. Returns the reduced copy and the factor used.
pub fn resize_to_screen(img: &RgbImage, max_width: u32, max_height: u32) -> (RgbImage, u32) {
    let (w, h) = img.dimensions();
    let scl_x = w as f64 / max_width.max(1) as f64;
    let scl_y = h as f64 / max_height.max(1) as f64;
    let scl = scl_x.max(scl_y).ceil() as u32;

    if scl <= 1 {
        return (img.clone(), 1);
    }

    let new_w = ((w as f64 / scl as f64).round() as u32).max(1);
    let new_h = ((h as f64 / scl as f64).round() as u32).max(1);
    debug!(from_w = w, from_h = h, to_w = new_w, to_h = new_h, scl, "Reduced to screen size");

    (imageops::thumbnail(img, new_w, new_h), scl)
}

/// Summed-area table of `gray` padded by `pad` replicated pixels on each side.
///
/// The table has `(w + 2*pad + 1) x (h + 2*pad + 1)` entries with a zero first
/// row and column, so a window sum is four lookups.
fn compute_padded_integral(gray: &GrayImage, pad: u32) -> (Vec<u64>, usize) {
    let (w, h) = gray.dimensions();
    let pw = w + 2 * pad;
    let ph = h + 2 * pad;
    let stride = (pw + 1) as usize;
    let mut table = vec![0u64; stride * (ph + 1) as usize];

    for py in 0..ph {
        let sy = (py as i64 - pad as i64).clamp(0, h as i64 - 1) as u32;
        let mut row_sum: u64 = 0;
        for px in 0..pw {
            let sx = (px as i64 - pad as i64).clamp(0, w as i64 - 1) as u32;
            row_sum += gray.get_pixel(sx, sy).0[0] as u64;
            let idx = (py + 1) as usize * stride + (px + 1) as usize;
            let above = py as usize * stride + (px + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    (table, stride)
}

/// Mean-C adaptive threshold over a `winsz` x `winsz` window.
///
/// The window mean is taken with replicated borders and rounded to the
/// nearest integer. With `invert` set a pixel is foreground (255) when
/// `src <= mean - c`; otherwise it is white when `src > mean - c`.
pub fn adaptive_threshold(gray: &GrayImage, winsz: u32, c: f64, invert: bool) -> GrayImage {
    let (w, h) = gray.dimensions();
    let mut out = GrayImage::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    let radius = winsz / 2;
    let (integral, stride) = compute_padded_integral(gray, radius);
    let area = (winsz as u64 * winsz as u64) as f64;

    for y in 0..h {
        let (y1, y2) = (y as usize, (y + winsz) as usize);
        for x in 0..w {
            let (x1, x2) = (x as usize, (x + winsz) as usize);
            let sum = integral[y2 * stride + x2] + integral[y1 * stride + x1]
                - integral[y1 * stride + x2]
                - integral[y2 * stride + x1];
            let mean = (sum as f64 / area).round();

            let value = gray.get_pixel(x, y).0[0] as f64;
            let is_dark = value - mean <= -c;
            let on = if invert { is_dark } else { !is_dark };
            out.put_pixel(x, y, Luma([if on { 255 } else { 0 }]));
        }
    }

    out
}

#[derive(Clone, Copy)]
enum MorphOp {
    Dilate,
    Erode,
}

fn morph_1d(src: &GrayImage, len: u32, horizontal: bool, op: MorphOp) -> GrayImage {
    let (w, h) = src.dimensions();
    if len <= 1 {
        return src.clone();
    }
    let anchor = (len / 2) as i64;
    let mut out = GrayImage::new(w, h);

    for y in 0..h {
        for x in 0..w {
            let mut acc = match op {
                MorphOp::Dilate => 0u8,
                MorphOp::Erode => 255u8,
            };
            for i in 0..len as i64 {
                let (sx, sy) = if horizontal {
                    (x as i64 + i - anchor, y as i64)
                } else {
                    (x as i64, y as i64 + i - anchor)
                };
                // Pixels outside the image never win
                if sx < 0 || sy < 0 || sx >= w as i64 || sy >= h as i64 {
                    continue;
                }
                let v = src.get_pixel(sx as u32, sy as u32).0[0];
                acc = match op {
                    MorphOp::Dilate => acc.max(v),
                    MorphOp::Erode => acc.min(v),
                };
            }
            out.put_pixel(x, y, Luma([acc]));
        }
    }

    out
}

/// Grey-level dilation with a `kw` x `kh` rectangle anchored at its centre.
pub fn dilate(src: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    let horiz = morph_1d(src, kw, true, MorphOp::Dilate);
    morph_1d(&horiz, kh, false, MorphOp::Dilate)
}

/// Grey-level erosion with a `kw` x `kh` rectangle anchored at its centre.
pub fn erode(src: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    let horiz = morph_1d(src, kw, true, MorphOp::Erode);
    morph_1d(&horiz, kh, false, MorphOp::Erode)
}

/// Pixel-wise minimum of two equally sized masks.
pub fn mask_min(a: &GrayImage, b: &GrayImage) -> GrayImage {
    let (w, h) = a.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let other = if x < b.width() && y < b.height() {
            b.get_pixel(x, y).0[0]
        } else {
            0
        };
        Luma([a.get_pixel(x, y).0[0].min(other)])
    })
}
