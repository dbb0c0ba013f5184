//! Diagnostic renderings of intermediate pipeline state.
//!
//! Images are written as `<prefix>_debug_<step>_<name>.png` into the
//! configured directory. Nothing here can fail the pipeline: write errors are
//! logged and dropped.

use std::path::PathBuf;

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_line_segment_mut};
use tracing::{debug, warn};

use crate::detect::ContourInfo;
use crate::geometry::{norm2pix, norm2pix_rounded, pca_direction, Point2};
use crate::spans::Span;

/// Palette cycled through when colouring blobs and spans.
pub const CCOLORS: [[u8; 3]; 24] = [
    [255, 0, 0],
    [255, 63, 0],
    [255, 127, 0],
    [255, 191, 0],
    [255, 255, 0],
    [191, 255, 0],
    [127, 255, 0],
    [63, 255, 0],
    [0, 255, 0],
    [0, 255, 63],
    [0, 255, 127],
    [0, 255, 191],
    [0, 255, 255],
    [0, 191, 255],
    [0, 127, 255],
    [0, 63, 255],
    [0, 0, 255],
    [63, 0, 255],
    [127, 0, 255],
    [191, 0, 255],
    [255, 0, 255],
    [255, 0, 191],
    [255, 0, 127],
    [255, 0, 63],
];

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Debug image writer bound to one input image.
#[derive(Debug, Clone)]
pub struct DebugSink {
    level: u8,
    dir: PathBuf,
    prefix: String,
}

impl DebugSink {
    pub fn new(level: u8, dir: PathBuf, prefix: impl Into<String>) -> Self {
        Self {
            level,
            dir,
            prefix: prefix.into(),
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new(0, PathBuf::from("."), "page")
    }

    pub fn enabled(&self, level: u8) -> bool {
        self.level >= level
    }

    pub fn path_for(&self, step: &str, name: &str) -> PathBuf {
        let name = name.replace(' ', "_");
        self.dir.join(format!("{}_debug_{}_{}.png", self.prefix, step, name))
    }

    pub fn save_rgb(&self, level: u8, step: &str, name: &str, img: &RgbImage) {
        if !self.enabled(level) {
            return;
        }
        let path = self.path_for(step, name);
        match img.save(&path) {
            Ok(()) => debug!(path = %path.display(), "Wrote debug image"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to write debug image"),
        }
    }

    pub fn save_gray(&self, level: u8, step: &str, name: &str, img: &GrayImage) {
        if !self.enabled(level) {
            return;
        }
        let path = self.path_for(step, name);
        match img.save(&path) {
            Ok(()) => debug!(path = %path.display(), "Wrote debug image"),
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to write debug image"),
        }
    }
}

fn color(i: usize) -> Rgb<u8> {
    Rgb(CCOLORS[i % CCOLORS.len()])
}

fn to_i32(p: Point2) -> (i32, i32) {
    (p.x as i32, p.y as i32)
}

fn to_f32(p: Point2) -> (f32, f32) {
    (p.x as f32, p.y as f32)
}

/// Average `display` with `color` wherever the blob mask is set.
fn blend_blob(display: &mut RgbImage, cinfo: &ContourInfo, color: Rgb<u8>) {
    let (w, h) = display.dimensions();
    for ((r, c), &v) in cinfo.mask.indexed_iter() {
        if v == 0 {
            continue;
        }
        let x = cinfo.rect.x + c as i32;
        let y = cinfo.rect.y + r as i32;
        if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
            continue;
        }
        let px = display.get_pixel_mut(x as u32, y as u32);
        for ch in 0..3 {
            px.0[ch] = px.0[ch] / 2 + color.0[ch] / 2;
        }
    }
}

pub fn visualize_contours(small: &RgbImage, cinfo_list: &[ContourInfo]) -> RgbImage {
    let mut display = small.clone();
    for (j, cinfo) in cinfo_list.iter().enumerate() {
        blend_blob(&mut display, cinfo, color(j));
    }
    for cinfo in cinfo_list {
        draw_hollow_circle_mut(&mut display, to_i32(cinfo.center), 3, WHITE);
        draw_line_segment_mut(&mut display, to_f32(cinfo.point0), to_f32(cinfo.point1), WHITE);
    }
    display
}

pub fn visualize_spans(
    small: &RgbImage,
    pagemask: &GrayImage,
    arena: &[ContourInfo],
    spans: &[Span],
) -> RgbImage {
    let mut display = small.clone();
    for (i, span) in spans.iter().enumerate() {
        for &idx in span {
            blend_blob(&mut display, &arena[idx], color(i * 3));
        }
    }
    for (x, y, px) in display.enumerate_pixels_mut() {
        if pagemask.get_pixel(x, y).0[0] == 0 {
            px.0 = px.0.map(|v| v / 4);
        }
    }
    display
}

fn draw_outline(display: &mut RgbImage, corners: &[Point2; 4]) {
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        draw_line_segment_mut(display, to_f32(a), to_f32(b), WHITE);
    }
}

pub fn visualize_span_points(
    small: &RgbImage,
    span_points: &[Vec<Point2>],
    corners: &[Point2; 4],
) -> RgbImage {
    let size = small.dimensions();
    let mut display = small.clone();

    for (i, points) in span_points.iter().enumerate() {
        let pix: Vec<Point2> = points.iter().map(|p| norm2pix(size, *p)).collect();
        for p in &pix {
            draw_filled_circle_mut(&mut display, to_i32(*p), 3, color(i));
        }

        // Principal axis through the samples, clipped to their extent
        if let Some(dir) = pca_direction(&pix) {
            let mean = pix.iter().fold(Point2::zeros(), |acc, p| acc + p) / pix.len() as f64;
            let proj: Vec<f64> = pix.iter().map(|p| dir.dot(&(p - mean))).collect();
            let lo = proj.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = proj.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            draw_line_segment_mut(
                &mut display,
                to_f32(mean + dir * lo),
                to_f32(mean + dir * hi),
                WHITE,
            );
        }
    }

    let outline = corners.map(|c| norm2pix(size, c));
    draw_outline(&mut display, &outline);
    display
}

/// Observed keypoints in red, projected ones in blue, joined by white lines.
pub fn draw_correspondences(small: &RgbImage, dstpoints: &[Point2], projpts: &[Point2]) -> RgbImage {
    let size = small.dimensions();
    let mut display = small.clone();
    let dst: Vec<Point2> = dstpoints.iter().map(|p| norm2pix(size, *p)).collect();
    let proj: Vec<Point2> = projpts.iter().map(|p| norm2pix(size, *p)).collect();

    for p in projpts {
        draw_filled_circle_mut(&mut display, norm2pix_rounded(size, *p), 3, Rgb([0, 0, 255]));
    }
    for p in dstpoints {
        draw_filled_circle_mut(&mut display, norm2pix_rounded(size, *p), 3, Rgb([255, 0, 0]));
    }
    for (a, b) in proj.iter().zip(&dst) {
        draw_line_segment_mut(&mut display, to_f32(*a), to_f32(*b), WHITE);
    }
    display
}

/// Shrink the final output to the height of the working image.
pub fn output_preview(output: &RgbImage, small_height: u32) -> RgbImage {
    let (w, h) = output.dimensions();
    if h == 0 {
        return output.clone();
    }
    let new_h = small_height.max(1);
    let new_w = ((new_h as f64 * w as f64 / h as f64).round() as u32).max(1);
    imageops::resize(output, new_w, new_h, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_file_naming() {
        let sink = DebugSink::new(2, PathBuf::from("/tmp/out"), "scan");
        assert_eq!(
            sink.path_for("0.1", "span points"),
            PathBuf::from("/tmp/out/scan_debug_0.1_span_points.png")
        );
        assert!(sink.enabled(2));
        assert!(!sink.enabled(3));
        assert!(!DebugSink::disabled().enabled(1));
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let sink = DebugSink::new(3, PathBuf::from("/nonexistent/dir/for/debug"), "x");
        sink.save_gray(1, "1", "mask", &GrayImage::new(4, 4));
    }

    #[test]
    fn test_correspondence_drawing_keeps_size() {
        let small = RgbImage::new(64, 48);
        let pts = vec![Point2::new(0.0, 0.0), Point2::new(0.5, 0.2)];
        let out = draw_correspondences(&small, &pts, &pts);
        assert_eq!(out.dimensions(), (64, 48));
        // Observed keypoints are drawn over the projected ones
        assert_eq!(out.get_pixel(34, 24).0, [255, 0, 0]);

        let preview = output_preview(&RgbImage::new(300, 600), 48);
        assert_eq!(preview.dimensions(), (24, 48));
    }
}
