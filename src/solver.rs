//! Fitting the sheet model to the sampled keypoints, and the page size that
//! goes with the fitted model.

use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::geometry::Point2;
use crate::model::{project_keypoints, project_xy, KeypointIndex, ParamLayout};
use crate::powell::{minimize, PowellOptions};

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub params: DVector<f64>,
    pub initial_objective: f64,
    pub final_objective: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Sum of squared distances between observed and projected keypoints.
pub fn keypoint_objective(
    pvec: &DVector<f64>,
    dstpoints: &[Point2],
    index: &KeypointIndex,
    focal: f64,
) -> f64 {
    project_keypoints(pvec, index, focal)
        .iter()
        .zip(dstpoints)
        .map(|(p, d)| (p - d).norm_squared())
        .sum()
}

/// Minimise the reprojection error of all keypoints over the full parameter
/// vector. `dstpoints` holds the top-left corner followed by every span
/// sample in span order.
///
/// Running out of budget is not an error; the best parameters seen are
/// returned with `converged` cleared.
pub fn optimize_params(
    dstpoints: &[Point2],
    layout: &ParamLayout,
    params: DVector<f64>,
    focal: f64,
    max_iterations: Option<usize>,
) -> OptimizeOutcome {
    let index = layout.keypoint_index();
    let objective = |p: &DVector<f64>| keypoint_objective(p, dstpoints, &index, focal);

    let initial_objective = objective(&params);
    info!(
        initial_objective,
        parameters = params.len(),
        "Optimizing sheet model"
    );

    let options = PowellOptions {
        max_iterations,
        ..PowellOptions::default()
    };
    let result = minimize(objective, params, options);

    if result.converged {
        info!(
            final_objective = result.fun,
            iterations = result.iterations,
            evaluations = result.evaluations,
            "Optimization converged"
        );
    } else {
        warn!(
            final_objective = result.fun,
            iterations = result.iterations,
            evaluations = result.evaluations,
            "Optimization stopped before converging; using best parameters found"
        );
    }

    OptimizeOutcome {
        initial_objective,
        final_objective: result.fun,
        iterations: result.iterations,
        evaluations: result.evaluations,
        converged: result.converged,
        params: result.x,
    }
}

/// Refine the page size so that its far corner projects onto the observed
/// bottom-right page corner.
pub fn get_page_dims(
    corners: &[Point2; 4],
    rough_dims: (f64, f64),
    params: &DVector<f64>,
    focal: f64,
) -> (f64, f64) {
    let dst_br = corners[2];
    let objective = |d: &DVector<f64>| {
        let proj = project_xy(&[Point2::new(d[0], d[1])], params, focal);
        (proj[0] - dst_br).norm_squared()
    };

    let start = DVector::from_vec(vec![rough_dims.0, rough_dims.1]);
    let result = minimize(objective, start, PowellOptions::default());
    let dims = (result.x[0], result.x[1]);
    debug!(width = dims.0, height = dims.1, "Got page dims");
    dims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{cubic_height, default_params};
    use nalgebra::Vector3;

    const F: f64 = 1.2;

    struct Synthetic {
        corners: [Point2; 4],
        ycoords: Vec<f64>,
        xcoords: Vec<Vec<f64>>,
        dstpoints: Vec<Point2>,
    }

    /// Keypoints of a page posed by `truth`, sampled on a regular grid of the
    /// sheet. Corners are the projection of the flat page outline.
    fn synthetic(truth: &DVector<f64>) -> Synthetic {
        let ycoords = vec![0.15, 0.35, 0.55, 0.7];
        let xs: Vec<f64> = (0..6).map(|k| 0.1 + 0.2 * k as f64).collect();
        let xcoords = vec![xs.clone(); ycoords.len()];

        let outline = [
            Point2::new(0.0, 0.0),
            Point2::new(1.2, 0.0),
            Point2::new(1.2, 0.8),
            Point2::new(0.0, 0.8),
        ];
        let mut flat = truth.clone();
        flat[6] = 0.0;
        flat[7] = 0.0;
        let c = project_xy(&outline, &flat, F);
        let corners = [c[0], c[1], c[2], c[3]];

        let mut sheet = Vec::new();
        for (&y, xs) in ycoords.iter().zip(&xcoords) {
            for &x in xs {
                sheet.push(Point2::new(x, y));
            }
        }
        let mut dstpoints = vec![project_xy(&[Point2::zeros()], truth, F)[0]];
        dstpoints.extend(project_xy(&sheet, truth, F));

        Synthetic { corners, ycoords, xcoords, dstpoints }
    }

    fn truth_params(rvec: Vector3<f64>, alpha: f64, beta: f64) -> DVector<f64> {
        let mut p = DVector::zeros(8);
        p.rows_mut(0, 3).copy_from(&rvec);
        p[3] = -0.6;
        p[4] = -0.4;
        p[5] = 1.2;
        p[6] = alpha;
        p[7] = beta;
        p
    }

    #[test]
    fn test_flat_fronto_parallel_page() {
        let truth = truth_params(Vector3::zeros(), 0.0, 0.0);
        let s = synthetic(&truth);
        let init = default_params(&s.corners, &s.ycoords, &s.xcoords, F).unwrap();

        let out = optimize_params(&s.dstpoints, &init.layout, init.params, F, None);
        assert!(out.initial_objective < 1e-12);
        assert!(out.final_objective < 1e-12);
        assert!(out.converged);

        let p = &out.params;
        assert!(p.rows(0, 3).norm() < 1e-4, "rotation {:?}", p.rows(0, 3));
        assert!(p[6].abs() < 1e-4 && p[7].abs() < 1e-4);
        let t = Vector3::new(p[3], p[4], p[5]).normalize();
        let expected = Vector3::new(-0.6, -0.4, 1.2).normalize();
        assert!((t - expected).norm() < 1e-4);

        let dims = get_page_dims(&s.corners, init.rough_dims, p, F);
        assert!((dims.0 - 1.2).abs() < 1e-3);
        assert!((dims.1 - 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_perturbed_rotation_is_pulled_back() {
        let truth = truth_params(Vector3::zeros(), 0.0, 0.0);
        let s = synthetic(&truth);
        let init = default_params(&s.corners, &s.ycoords, &s.xcoords, F).unwrap();

        let mut start = init.params.clone();
        start[0] += 0.05;
        start[1] -= 0.04;
        start[2] += 0.03;
        let start_rot_err = start.rows(0, 3).norm();

        let out = optimize_params(&s.dstpoints, &init.layout, start, F, Some(40));
        assert!(out.initial_objective > 1e-4);
        assert!(out.final_objective < 0.1 * out.initial_objective);
        assert!(out.params.rows(0, 3).norm() < start_rot_err);
    }

    #[test]
    fn test_bent_page_recovers_slope_signs() {
        let truth = truth_params(Vector3::new(0.05, 0.0, 0.0), 0.4, -0.3);
        let s = synthetic(&truth);

        // Start from the true flat pose and sheet coordinates with no bend
        let layout = ParamLayout::new(s.xcoords.iter().map(Vec::len).collect());
        let mut start: Vec<f64> = truth.iter().take(6).copied().collect();
        start.extend([0.0, 0.0]);
        start.extend(s.ycoords.iter().copied());
        for xs in &s.xcoords {
            start.extend(xs.iter().copied());
        }
        let start = DVector::from_vec(start);

        let out = optimize_params(&s.dstpoints, &layout, start, F, Some(60));
        assert!(out.final_objective < 0.05 * out.initial_objective);
        let (alpha, beta) = (out.params[6], out.params[7]);
        assert!(alpha > 0.0, "alpha = {alpha}");
        assert!(beta < 0.0, "beta = {beta}");
        assert!(cubic_height(alpha, beta, 0.5) > 0.0);
    }

    #[test]
    fn test_objective_counts_origin_keypoint() {
        let layout = ParamLayout::new(vec![1]);
        let mut p = truth_params(Vector3::zeros(), 0.0, 0.0);
        p = p.push(0.5).push(0.25);
        let index = layout.keypoint_index();
        let projected = project_keypoints(&p, &index, F);
        assert_eq!(projected.len(), 2);
        assert!((projected[0] - Point2::new(-0.6, -0.4)).norm() < 1e-12);

        let mut dst = projected.clone();
        dst[0] += Point2::new(0.1, 0.0);
        let value = keypoint_objective(&p, &dst, &index, F);
        assert!((value - 0.01).abs() < 1e-12);
    }
}
