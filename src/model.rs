//! Cubic sheet camera model.
//!
//! The page is a sheet `z = f(x)` with `f(0) = 0`, `f'(0) = alpha`,
//! `f(1) = 0` and `f'(1) = beta`, seen by a pinhole camera. Everything the
//! optimiser touches lives in one flat parameter vector:
//!
//! | range                   | meaning                         |
//! |-------------------------|---------------------------------|
//! | `0..3`                  | Rodrigues rotation vector       |
//! | `3..6`                  | translation                     |
//! | `6..8`                  | cubic slopes `alpha`, `beta`    |
//! | `8..8 + nspans`         | sheet y of every span           |
//! | `8 + nspans..`          | sheet x of every sampled point  |

use std::ops::Range;

use nalgebra::{DVector, Vector3};

use crate::error::{DewarpError, Result};
use crate::geometry::{project_points, solve_pose_planar, Point2, Pose};

pub const RVEC_IDX: Range<usize> = 0..3;
pub const TVEC_IDX: Range<usize> = 3..6;
pub const CUBIC_IDX: Range<usize> = 6..8;

/// Shape of the parameter vector for a given set of spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamLayout {
    span_counts: Vec<usize>,
}

impl ParamLayout {
    pub fn new(span_counts: Vec<usize>) -> Self {
        Self { span_counts }
    }

    pub fn nspans(&self) -> usize {
        self.span_counts.len()
    }

    pub fn npts(&self) -> usize {
        self.span_counts.iter().sum()
    }

    pub fn len(&self) -> usize {
        8 + self.nspans() + self.npts()
    }

    pub fn ycoord_range(&self) -> Range<usize> {
        8..8 + self.nspans()
    }

    pub fn xcoord_range(&self) -> Range<usize> {
        let start = 8 + self.nspans();
        start..start + self.npts()
    }

    pub fn check(&self, pvec: &DVector<f64>) -> Result<()> {
        if pvec.len() != self.len() {
            return Err(DewarpError::Geometry(format!(
                "parameter vector has {} entries, layout expects {}",
                pvec.len(),
                self.len()
            )));
        }
        Ok(())
    }

    /// Map every keypoint to the parameters holding its sheet coordinates.
    pub fn keypoint_index(&self) -> KeypointIndex {
        let nspans = self.nspans();
        let mut rows = Vec::with_capacity(self.npts());
        let mut k = 0;
        for (i, &count) in self.span_counts.iter().enumerate() {
            for _ in 0..count {
                rows.push((8 + nspans + k, 8 + i));
                k += 1;
            }
        }
        KeypointIndex { rows }
    }
}

/// Parameter indices `(x, y)` of each span keypoint.
///
/// Keypoint 0 is implicit: the sheet origin, observed at the top-left page
/// corner. Rows here are keypoints `1..=npts` in span order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypointIndex {
    rows: Vec<(usize, usize)>,
}

impl KeypointIndex {
    /// Sheet coordinates of every keypoint under `pvec`, origin first.
    pub fn sheet_coords(&self, pvec: &DVector<f64>) -> Vec<Point2> {
        std::iter::once(Point2::zeros())
            .chain(self.rows.iter().map(|&(xi, yi)| Point2::new(pvec[xi], pvec[yi])))
            .collect()
    }
}

/// Sheet height at `x` for slopes `alpha` and `beta`.
#[inline]
pub fn cubic_height(alpha: f64, beta: f64, x: f64) -> f64 {
    ((alpha + beta) * x - (2.0 * alpha + beta)) * x * x + alpha * x
}

pub fn pose_of(pvec: &DVector<f64>) -> Pose {
    Pose {
        rvec: Vector3::from_iterator(pvec.rows_range(RVEC_IDX).iter().copied()),
        tvec: Vector3::from_iterator(pvec.rows_range(TVEC_IDX).iter().copied()),
    }
}

/// Project sheet coordinates into normalized image space.
pub fn project_xy(xy: &[Point2], pvec: &DVector<f64>, focal: f64) -> Vec<Point2> {
    let (alpha, beta) = (pvec[CUBIC_IDX.start], pvec[CUBIC_IDX.start + 1]);
    let objpoints: Vec<Vector3<f64>> = xy
        .iter()
        .map(|p| Vector3::new(p.x, p.y, cubic_height(alpha, beta, p.x)))
        .collect();
    project_points(&objpoints, &pose_of(pvec), focal)
}

pub fn project_keypoints(pvec: &DVector<f64>, index: &KeypointIndex, focal: f64) -> Vec<Point2> {
    project_xy(&index.sheet_coords(pvec), pvec, focal)
}

/// Rough page size plus the starting parameter vector.
#[derive(Debug, Clone)]
pub struct InitialModel {
    pub rough_dims: (f64, f64),
    pub layout: ParamLayout,
    pub params: DVector<f64>,
}

/// Initial guess: flat sheet posed so the page corners line up, with the
/// sampled sheet coordinates copied in.
pub fn default_params(
    corners: &[Point2; 4],
    ycoords: &[f64],
    xcoords: &[Vec<f64>],
    focal: f64,
) -> Result<InitialModel> {
    let page_width = (corners[1] - corners[0]).norm();
    let page_height = (corners[3] - corners[0]).norm();

    let object = [
        Point2::new(0.0, 0.0),
        Point2::new(page_width, 0.0),
        Point2::new(page_width, page_height),
        Point2::new(0.0, page_height),
    ];
    let pose = solve_pose_planar(&object, corners, focal)?;

    let layout = ParamLayout::new(xcoords.iter().map(Vec::len).collect());
    if ycoords.len() != layout.nspans() {
        return Err(DewarpError::Geometry(format!(
            "{} span y coordinates for {} spans",
            ycoords.len(),
            layout.nspans()
        )));
    }

    let mut params = DVector::zeros(layout.len());
    params.rows_range_mut(RVEC_IDX).copy_from(&pose.rvec);
    params.rows_range_mut(TVEC_IDX).copy_from(&pose.tvec);
    params
        .rows_range_mut(layout.ycoord_range())
        .copy_from_slice(ycoords);
    let flat_x: Vec<f64> = xcoords.iter().flatten().copied().collect();
    params
        .rows_range_mut(layout.xcoord_range())
        .copy_from_slice(&flat_x);
    layout.check(&params)?;

    Ok(InitialModel {
        rough_dims: (page_width, page_height),
        layout,
        params,
    })
}
