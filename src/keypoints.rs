//! Sampling spans into keypoints and deriving the page frame from them.

use tracing::debug;

use crate::detect::ContourInfo;
use crate::geometry::{convex_hull, pca_direction, pix2norm, Point2};
use crate::spans::Span;

/// Page corners and per-span sheet coordinates, all in normalized space.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoints {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub corners: [Point2; 4],
    /// Sheet y of each span.
    pub ycoords: Vec<f64>,
    /// Sheet x of each sample, per span.
    pub xcoords: Vec<Vec<f64>>,
    /// Unit text direction used for the frame.
    pub x_dir: Point2,
}

/// Sample every span at regular column steps along its blobs' vertical
/// centre lines. `size` is the reduced image size; output is normalized.
pub fn sample_spans(
    size: (u32, u32),
    arena: &[ContourInfo],
    spans: &[Span],
    px_per_step: u32,
) -> Vec<Vec<Point2>> {
    let step = px_per_step.max(1) as usize;

    spans
        .iter()
        .map(|span| {
            let mut contour_points = Vec::new();
            for &idx in span {
                let cinfo = &arena[idx];
                let ncols = cinfo.mask.ncols();
                if ncols == 0 {
                    continue;
                }
                let start = ((ncols - 1) % step) / 2;
                for x in (start..ncols).step_by(step) {
                    let column = cinfo.mask.column(x);
                    let (total, count) = column
                        .iter()
                        .enumerate()
                        .fold((0.0, 0.0), |(t, n), (y, &v)| (t + y as f64 * v as f64, n + v as f64));
                    if count == 0.0 {
                        continue;
                    }
                    let px = Point2::new(
                        (x as i32 + cinfo.rect.x) as f64,
                        total / count + cinfo.rect.y as f64,
                    );
                    contour_points.push(pix2norm(size, px));
                }
            }
            contour_points
        })
        .collect()
}

/// Average text direction over all spans, weighted by span length.
fn text_direction(span_points: &[Vec<Point2>]) -> Point2 {
    let mut acc = Point2::zeros();
    let mut total_weight = 0.0;
    for points in span_points {
        let (Some(first), Some(last)) = (points.first(), points.last()) else {
            continue;
        };
        let Some(evec) = pca_direction(points) else {
            continue;
        };
        let weight = (last - first).norm();
        acc += evec * weight;
        total_weight += weight;
    }

    if total_weight <= 0.0 || acc.norm() <= 0.0 {
        return Point2::new(1.0, 0.0);
    }
    let dir = (acc / total_weight).normalize();
    if dir.x < 0.0 {
        -dir
    } else {
        dir
    }
}

/// Page corners and sheet coordinates from sampled spans.
///
/// The sheet frame is aligned with the average text direction and anchored
/// at the top-left corner of the page outline's bounding box in that frame.
pub fn keypoints_from_samples(
    size: (u32, u32),
    page_outline: &[Point2; 4],
    span_points: &[Vec<Point2>],
) -> Keypoints {
    let x_dir = text_direction(span_points);
    let y_dir = Point2::new(-x_dir.y, x_dir.x);

    let pagecoords: Vec<Point2> = convex_hull(page_outline)
        .into_iter()
        .map(|p| pix2norm(size, p))
        .collect();

    let (mut px0, mut px1) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut py0, mut py1) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in &pagecoords {
        let (px, py) = (p.dot(&x_dir), p.dot(&y_dir));
        px0 = px0.min(px);
        px1 = px1.max(px);
        py0 = py0.min(py);
        py1 = py1.max(py);
    }

    let corners = [
        x_dir * px0 + y_dir * py0,
        x_dir * px1 + y_dir * py0,
        x_dir * px1 + y_dir * py1,
        x_dir * px0 + y_dir * py1,
    ];

    let mut ycoords = Vec::with_capacity(span_points.len());
    let mut xcoords = Vec::with_capacity(span_points.len());
    for points in span_points {
        let n = points.len().max(1) as f64;
        let mean_py = points.iter().map(|p| p.dot(&y_dir)).sum::<f64>() / n;
        ycoords.push(mean_py - py0);
        xcoords.push(points.iter().map(|p| p.dot(&x_dir) - px0).collect());
    }

    debug!(
        angle_deg = x_dir.y.atan2(x_dir.x).to_degrees(),
        spans = span_points.len(),
        "Estimated text direction"
    );

    Keypoints {
        corners,
        ycoords,
        xcoords,
        x_dir,
    }
}

/// Observed keypoints in optimiser order: first corner, then every sample.
pub fn destination_points(corners: &[Point2; 4], span_points: &[Vec<Point2>]) -> Vec<Point2> {
    std::iter::once(corners[0])
        .chain(span_points.iter().flatten().copied())
        .collect()
}
