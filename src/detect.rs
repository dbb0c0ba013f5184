//! Text and line blob detection on the reduced working image.

use image::{GrayImage, Luma, RgbImage};
use tracing::{debug, instrument};

use crate::contours::Contour;
use crate::geometry::{principal_direction, Point2, Rect};
use crate::image_impl::ImageBackend;
use crate::preprocess::mask_min;
use crate::types::{DewarpConfig, MaskType};

/// Region of the reduced image considered to be page.
#[derive(Debug, Clone)]
pub struct PageExtents {
    pub mask: GrayImage,
    /// Outline of the page region in pixel coordinates.
    pub outline: [Point2; 4],
}

pub fn get_page_extents(width: u32, height: u32, config: &DewarpConfig) -> PageExtents {
    let xmin = config.page_margin_x.min(width);
    let ymin = config.page_margin_y.min(height);
    let xmax = width.saturating_sub(config.page_margin_x).max(xmin);
    let ymax = height.saturating_sub(config.page_margin_y).max(ymin);

    let mask = GrayImage::from_fn(width, height, |x, y| {
        let inside = x >= xmin && x < xmax && y >= ymin && y < ymax;
        Luma([if inside { 255 } else { 0 }])
    });

    let (x0, y0, x1, y1) = (xmin as f64, ymin as f64, xmax as f64, ymax as f64);
    PageExtents {
        mask,
        outline: [
            Point2::new(x0, y0),
            Point2::new(x0, y1),
            Point2::new(x1, y1),
            Point2::new(x1, y0),
        ],
    }
}

/// Intermediate masks kept for debug output.
#[derive(Debug, Clone, Default)]
pub struct MaskStages {
    pub stages: Vec<(&'static str, GrayImage)>,
}

/// Binary foreground mask for `mask_type`, restricted to the page.
pub fn get_mask<B: ImageBackend>(
    backend: &B,
    small: &RgbImage,
    pagemask: &GrayImage,
    mask_type: MaskType,
    config: &DewarpConfig,
    stages: Option<&mut MaskStages>,
) -> GrayImage {
    let gray = backend.to_gray(small);
    let thresholded =
        backend.adaptive_threshold(&gray, config.adaptive_winsz, mask_type.threshold_offset(), true);

    let mut steps: Vec<(&'static str, GrayImage)> = Vec::new();
    let mask = match mask_type {
        MaskType::Text => {
            let dilated = backend.dilate(&thresholded, 9, 1);
            let eroded = backend.erode(&dilated, 1, 3);
            if stages.is_some() {
                steps.push(("thresholded", thresholded));
                steps.push(("dilated", dilated));
                steps.push(("eroded", eroded.clone()));
            }
            eroded
        }
        MaskType::Line => {
            let mut eroded = thresholded.clone();
            for _ in 0..3 {
                eroded = backend.erode(&eroded, 3, 1);
            }
            let dilated = backend.dilate(&eroded, 8, 2);
            if stages.is_some() {
                steps.push(("thresholded", thresholded));
                steps.push(("eroded", eroded));
                steps.push(("dilated", dilated.clone()));
            }
            dilated
        }
    };

    if let Some(stages) = stages {
        stages.stages.extend(steps);
    }

    mask_min(&mask, pagemask)
}

/// One text or line blob that passed the shape filters.
///
/// `pred`/`succ` are indices into the slice the blob lives in and are only
/// set by span assembly.
#[derive(Debug, Clone)]
pub struct ContourInfo {
    pub rect: Rect,
    pub mask: ndarray::Array2<u8>,
    pub center: Point2,
    pub tangent: Point2,
    pub angle: f64,
    pub local_xrng: (f64, f64),
    pub point0: Point2,
    pub point1: Point2,
    pub pred: Option<usize>,
    pub succ: Option<usize>,
}

impl ContourInfo {
    pub fn new(contour: Contour) -> Self {
        let Contour { points, rect, mask } = contour;
        let (center, tangent) = blob_mean_and_tangent(&mask, rect);
        let angle = tangent.y.atan2(tangent.x);

        // Extent of the outline along the tangent, about the centroid
        let (mut lxmin, mut lxmax) = (f64::INFINITY, f64::NEG_INFINITY);
        for &(x, y) in &points {
            let v = tangent.dot(&(Point2::new(x as f64, y as f64) - center));
            lxmin = lxmin.min(v);
            lxmax = lxmax.max(v);
        }
        if points.is_empty() {
            lxmin = 0.0;
            lxmax = 0.0;
        }

        Self {
            rect,
            mask,
            center,
            tangent,
            angle,
            local_xrng: (lxmin, lxmax),
            point0: center + tangent * lxmin,
            point1: center + tangent * lxmax,
            pred: None,
            succ: None,
        }
    }

    pub fn proj_x(&self, point: &Point2) -> f64 {
        self.tangent.dot(&(point - self.center))
    }

    /// Overlap of `other`'s extent with this blob's, measured along this
    /// blob's tangent. Negative values are gaps.
    pub fn local_overlap(&self, other: &ContourInfo) -> f64 {
        let xmin = self.proj_x(&other.point0);
        let xmax = self.proj_x(&other.point1);
        interval_measure_overlap(self.local_xrng, (xmin, xmax))
    }

    pub fn width(&self) -> f64 {
        self.local_xrng.1 - self.local_xrng.0
    }
}

pub fn interval_measure_overlap(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.1.min(b.1) - a.0.max(b.0)
}

/// Centroid and principal axis of the filled blob.
fn blob_mean_and_tangent(mask: &ndarray::Array2<u8>, rect: Rect) -> (Point2, Point2) {
    let (mut m00, mut m10, mut m01) = (0.0, 0.0, 0.0);
    for ((r, c), &v) in mask.indexed_iter() {
        if v != 0 {
            m00 += 1.0;
            m10 += c as f64;
            m01 += r as f64;
        }
    }
    let area = if m00 < 1e-7 { 1e-7 } else { m00 };
    let (mean_x, mean_y) = (m10 / area, m01 / area);

    let (mut mu20, mut mu11, mut mu02) = (0.0, 0.0, 0.0);
    for ((r, c), &v) in mask.indexed_iter() {
        if v != 0 {
            let dx = c as f64 - mean_x;
            let dy = r as f64 - mean_y;
            mu20 += dx * dx;
            mu11 += dx * dy;
            mu02 += dy * dy;
        }
    }

    let center = Point2::new(mean_x + rect.x as f64, mean_y + rect.y as f64);
    let tangent = principal_direction(mu20 / area, mu11 / area, mu02 / area);
    (center, tangent)
}

/// Surviving blobs for `mask_type`.
#[instrument(skip_all, fields(mask_type = %mask_type))]
pub fn get_contours<B: ImageBackend>(
    backend: &B,
    small: &RgbImage,
    pagemask: &GrayImage,
    mask_type: MaskType,
    config: &DewarpConfig,
    stages: Option<&mut MaskStages>,
) -> (GrayImage, Vec<ContourInfo>) {
    let mask = get_mask(backend, small, pagemask, mask_type, config, stages);
    let contours = backend.find_contours(&mask);
    let total = contours.len();

    let infos: Vec<ContourInfo> = contours
        .into_iter()
        .filter(|c| passes_shape_filters(c, config))
        .map(ContourInfo::new)
        .collect();

    debug!(total, kept = infos.len(), "Filtered contours");
    (mask, infos)
}

fn passes_shape_filters(contour: &Contour, config: &DewarpConfig) -> bool {
    let Rect { width, height, .. } = contour.rect;
    if width < config.text_min_width
        || height < config.text_min_height
        || (width as f64) < config.text_min_aspect * height as f64
    {
        return false;
    }
    contour.max_column_thickness() <= config.text_max_thickness
}
