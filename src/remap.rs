//! Rendering the flattened page.
//!
//! A coarse grid over the fitted sheet is projected into the source image,
//! upsampled to a dense coordinate map and used to resample the original
//! photograph. The result is a black-on-white binarisation with red ink kept
//! as pure red.

use image::{GrayImage, Rgb, RgbImage};
use nalgebra::DVector;
use ndarray::Array2;
use tracing::{debug, instrument};

use crate::error::{DewarpError, Result};
use crate::geometry::{norm2pix, Point2};
use crate::image_impl::ImageBackend;
use crate::model::project_xy;

/// Threshold offset used when binarising the flattened page.
const OUTPUT_THRESHOLD_C: f64 = 25.0;

/// Largest output side, in multiples of the longer (zoomed) input side.
const MAX_OUTPUT_FACTOR: f64 = 4.0;

/// Round `value` (truncated to an integer) up to a multiple of `factor`.
///
/// Saturates at the largest multiple of `factor` that fits in a `u32`.
pub fn round_up_multiple(value: f64, factor: u32) -> u32 {
    let factor = factor.max(1) as u64;
    let ceiling = u32::MAX as u64 / factor * factor;
    let i = if value.is_nan() { 0 } else { value.clamp(0.0, ceiling as f64) as u64 };
    let rounded = match i % factor {
        0 => i,
        rem => i + factor - rem,
    };
    rounded.min(ceiling) as u32
}

/// Output raster size for a page of `page_dims` sheet units rendered from an
/// image of `img_size` pixels.
///
/// Neither side may exceed `MAX_OUTPUT_FACTOR` times the longer input side
/// (scaled by `zoom`); a fit that diverged gets a geometry error instead of
/// an enormous allocation.
pub fn output_size(
    page_dims: (f64, f64),
    img_size: (u32, u32),
    zoom: f64,
    decimate: u32,
) -> Result<(u32, u32)> {
    let (page_w, page_h) = page_dims;
    if !(page_w.is_finite() && page_h.is_finite() && page_w > 0.0 && page_h > 0.0) {
        return Err(DewarpError::Geometry(format!(
            "degenerate page dimensions {:.4} x {:.4}",
            page_w, page_h
        )));
    }

    let decimate = decimate.max(1);
    let raw_h = 0.5 * page_h * zoom * img_size.1 as f64;
    let raw_w = round_up_multiple(raw_h, decimate).max(decimate) as f64 * page_w / page_h;
    let limit = MAX_OUTPUT_FACTOR * zoom * img_size.0.max(img_size.1) as f64;
    if !(raw_h <= limit && raw_w <= limit) {
        return Err(DewarpError::Geometry(format!(
            "page dimensions {:.4} x {:.4} give a {:.0} x {:.0} output for a {}x{} input",
            page_w, page_h, raw_w, raw_h, img_size.0, img_size.1
        )));
    }

    let height = round_up_multiple(raw_h, decimate).max(decimate);
    let width = round_up_multiple(raw_w, decimate).max(decimate);
    Ok((width, height))
}

/// Evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Dense source-pixel coordinate maps for an output of `width` x `height`.
pub fn build_remap<B: ImageBackend>(
    backend: &B,
    img_size: (u32, u32),
    page_dims: (f64, f64),
    params: &DVector<f64>,
    focal: f64,
    (width, height): (u32, u32),
    decimate: u32,
) -> (Array2<f32>, Array2<f32>) {
    let decimate = decimate.max(1);
    let width_small = (width / decimate).max(1) as usize;
    let height_small = (height / decimate).max(1) as usize;

    let xs = linspace(0.0, page_dims.0, width_small);
    let ys = linspace(0.0, page_dims.1, height_small);
    let page_xy: Vec<Point2> = ys
        .iter()
        .flat_map(|&y| xs.iter().map(move |&x| Point2::new(x, y)))
        .collect();

    let image_points = project_xy(&page_xy, params, focal);

    let mut map_x = Array2::<f32>::zeros((height_small, width_small));
    let mut map_y = Array2::<f32>::zeros((height_small, width_small));
    for (i, p) in image_points.iter().enumerate() {
        let pix = norm2pix(img_size, *p);
        let (r, c) = (i / width_small, i % width_small);
        map_x[[r, c]] = pix.x as f32;
        map_y[[r, c]] = pix.y as f32;
    }

    (
        backend.resize_map(&map_x, width as usize, height as usize),
        backend.resize_map(&map_y, width as usize, height as usize),
    )
}

/// Hue in OpenCV's 8-bit convention (0..180) with saturation and value in
/// 0..255.
pub fn rgb_to_hsv(px: Rgb<u8>) -> (u8, u8, u8) {
    let [r, g, b] = px.0.map(|v| v as f64);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };
    let mut h = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    ((h / 2.0).round() as u8, s.round() as u8, v as u8)
}

/// 255 where the pixel reads as red ink.
pub fn red_mask(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let (h, s, v) = rgb_to_hsv(*rgb.get_pixel(x, y));
        let red = (h <= 10 || (170..=180).contains(&h)) && s >= 60 && v >= 60;
        image::Luma([if red { 255 } else { 0 }])
    })
}

/// Red ink wins; elsewhere white background and black text.
pub fn composite(thresh: &GrayImage, red: &GrayImage) -> RgbImage {
    RgbImage::from_fn(thresh.width(), thresh.height(), |x, y| {
        if red.get_pixel(x, y).0[0] > 0 {
            Rgb([255, 0, 0])
        } else if thresh.get_pixel(x, y).0[0] == 255 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Render the flattened page from the full-resolution `img`.
#[instrument(skip_all, fields(page_w = page_dims.0, page_h = page_dims.1))]
#[allow(clippy::too_many_arguments)]
pub fn remap_image<B: ImageBackend>(
    backend: &B,
    img: &RgbImage,
    page_dims: (f64, f64),
    params: &DVector<f64>,
    focal: f64,
    zoom: f64,
    decimate: u32,
    adaptive_winsz: u32,
) -> Result<RgbImage> {
    let size = output_size(page_dims, img.dimensions(), zoom, decimate)?;
    debug!(width = size.0, height = size.1, "Output size");

    let (map_x, map_y) =
        build_remap(backend, img.dimensions(), page_dims, params, focal, size, decimate);

    let gray = backend.to_gray(img);
    let remapped = backend.remap_gray(&gray, &map_x, &map_y);
    let thresh = backend.adaptive_threshold(&remapped, adaptive_winsz, OUTPUT_THRESHOLD_C, false);

    let remapped_color = backend.remap_rgb(img, &map_x, &map_y);
    let red = red_mask(&remapped_color);

    Ok(composite(&thresh, &red))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_impl::RustBackend;

    #[test]
    fn test_round_up_multiple() {
        assert_eq!(round_up_multiple(0.0, 16), 0);
        assert_eq!(round_up_multiple(32.9, 16), 32);
        assert_eq!(round_up_multiple(33.0, 16), 48);
        assert_eq!(round_up_multiple(5.0, 1), 5);
    }

    #[test]
    fn test_output_size_multiples() {
        let (w, h) = output_size((1.2, 0.8), (640, 480), 1.0, 16).unwrap();
        // 0.5 * 0.8 * 480 = 192
        assert_eq!(h, 192);
        assert_eq!(w, 288);
        assert_eq!(w % 16, 0);

        let (w, h) = output_size((0.01, 0.02), (640, 480), 1.0, 16).unwrap();
        assert_eq!((w, h), (16, 16));
    }

    #[test]
    fn test_output_size_rejects_diverged_dims() {
        for dims in [
            (1.0, 1e9),
            (1e9, 1.0),
            (1.0, 1e-6),
            (f64::INFINITY, 1.0),
            (1.0, f64::NAN),
            (0.0, 1.0),
            (-1.0, 1.0),
        ] {
            let result = output_size(dims, (640, 480), 1.0, 16);
            assert!(matches!(result, Err(DewarpError::Geometry(_))), "{:?}", dims);
        }
    }

    #[test]
    fn test_round_up_multiple_saturates() {
        assert_eq!(round_up_multiple(1e30, 16), u32::MAX / 16 * 16);
        assert_eq!(round_up_multiple(f64::INFINITY, 16), u32::MAX / 16 * 16);
        assert_eq!(round_up_multiple(f64::NAN, 16), 0);
        assert_eq!(round_up_multiple(-5.0, 16), 0);
    }

    #[test]
    fn test_hsv_red_detection() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), (0, 255, 255));
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])).0, 60);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])).0, 120);
        // Slightly bluish red wraps to the top of the hue range
        assert!(rgb_to_hsv(Rgb([200, 20, 40])).0 >= 170);

        let mut img = RgbImage::from_pixel(3, 1, Rgb([250, 250, 250]));
        img.put_pixel(0, 0, Rgb([200, 20, 40]));
        img.put_pixel(1, 0, Rgb([60, 10, 10]));
        let mask = red_mask(&img);
        assert_eq!(mask.get_pixel(0, 0).0[0], 255);
        assert_eq!(mask.get_pixel(1, 0).0[0], 255);
        assert_eq!(mask.get_pixel(2, 0).0[0], 0);

        // Dark red below the value floor is ink, not red
        assert_eq!(red_mask(&RgbImage::from_pixel(1, 1, Rgb([40, 0, 0]))).get_pixel(0, 0).0[0], 0);
    }

    #[test]
    fn test_composite_priorities() {
        let mut thresh = GrayImage::new(3, 1);
        thresh.put_pixel(0, 0, image::Luma([255]));
        thresh.put_pixel(2, 0, image::Luma([255]));
        let mut red = GrayImage::new(3, 1);
        red.put_pixel(2, 0, image::Luma([255]));

        let out = composite(&thresh, &red);
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(2, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_fronto_parallel_map_is_affine() {
        // Sheet at depth f: sheet units equal normalized units
        let params = DVector::from_vec(vec![0.0, 0.0, 0.0, -0.6, -0.4, 1.2, 0.0, 0.0]);
        let img_size = (600, 400);
        let (map_x, map_y) =
            build_remap(&RustBackend, img_size, (1.2, 0.8), &params, 1.2, (96, 64), 16);
        assert_eq!(map_x.dim(), (64, 96));

        // Coarse grid corners land on the page corners in pixels
        let small_x = linspace(0.0, 1.2, 6);
        assert_eq!(small_x.len(), 6);
        let top_left = norm2pix(img_size, Point2::new(-0.6, -0.4));
        assert!((top_left - Point2::new(120.0, 80.0)).norm() < 1e-9);
        // Dense map stays inside the page region and increases left to right
        assert!(map_x[[32, 0]] >= 100.0 && map_x[[32, 95]] <= 500.0);
        assert!(map_x[[32, 95]] > map_x[[32, 0]]);
        assert!(map_y[[63, 40]] > map_y[[0, 40]]);
    }
}
