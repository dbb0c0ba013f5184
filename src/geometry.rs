//! Coordinate spaces and small linear-algebra helpers shared by every stage.
//!
//! Two 2D spaces are in play. Pixel space is the raster of a particular image.
//! Normalized space puts the origin at the image center and scales so that the
//! longer image side spans `[-1, 1]`, which makes everything downstream
//! independent of resolution.

use nalgebra::{DMatrix, Matrix3, Rotation3, Vector2, Vector3};

use crate::error::{DewarpError, Result};

pub type Point2 = Vector2<f64>;

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Camera pose as a Rodrigues rotation vector plus translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
}

fn scale_and_offset(size: (u32, u32)) -> (f64, Point2) {
    let (w, h) = (size.0 as f64, size.1 as f64);
    (2.0 / w.max(h), Point2::new(0.5 * w, 0.5 * h))
}

/// Pixel coordinates -> normalized coordinates for an image of `size` (w, h).
pub fn pix2norm(size: (u32, u32), p: Point2) -> Point2 {
    let (scl, offset) = scale_and_offset(size);
    (p - offset) * scl
}

/// Normalized coordinates -> pixel coordinates for an image of `size` (w, h).
pub fn norm2pix(size: (u32, u32), p: Point2) -> Point2 {
    let (scl, offset) = scale_and_offset(size);
    p / scl + offset
}

/// Nearest integer pixel of a normalized point.
pub fn norm2pix_rounded(size: (u32, u32), p: Point2) -> (i32, i32) {
    let q = norm2pix(size, p);
    ((q.x + 0.5).floor() as i32, (q.y + 0.5).floor() as i32)
}

/// Unit principal axis of the symmetric 2x2 matrix `[[sxx, sxy], [sxy, syy]]`.
///
/// The returned vector always has a non-negative x component so that blobs
/// and spans agree on "left to right".
pub fn principal_direction(sxx: f64, sxy: f64, syy: f64) -> Point2 {
    let half_diff = 0.5 * (sxx - syy);
    let lambda = 0.5 * (sxx + syy) + (half_diff * half_diff + sxy * sxy).sqrt();

    let dir = if sxy.abs() > 1e-12 {
        Point2::new(lambda - syy, sxy)
    } else if sxx >= syy {
        Point2::new(1.0, 0.0)
    } else {
        Point2::new(0.0, 1.0)
    };

    let norm = dir.norm();
    let dir = if norm > 0.0 { dir / norm } else { Point2::new(1.0, 0.0) };
    if dir.x < 0.0 {
        -dir
    } else {
        dir
    }
}

/// First principal component of a point cloud.
pub fn pca_direction(points: &[Point2]) -> Option<Point2> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Point2::zeros(), |acc, p| acc + p) / n;

    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p - mean;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }

    Some(principal_direction(sxx / n, sxy / n, syy / n))
}

/// Compute convex hull using Graham scan
pub fn convex_hull(points: &[Point2]) -> Vec<Point2> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    // Find the point with lowest y-coordinate (and leftmost if tie)
    let mut start_idx = 0;
    for (i, pt) in points.iter().enumerate().skip(1) {
        let best = points[start_idx];
        if pt.y < best.y || (pt.y == best.y && pt.x < best.x) {
            start_idx = i;
        }
    }
    let start = points[start_idx];

    // Sort by polar angle around the start point, nearer points first on ties
    let mut sorted: Vec<Point2> = points.to_vec();
    sorted.swap(0, start_idx);
    sorted[1..].sort_by(|a, b| {
        let angle_a = (a.y - start.y).atan2(a.x - start.x);
        let angle_b = (b.y - start.y).atan2(b.x - start.x);
        angle_a
            .partial_cmp(&angle_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let da = (a - start).norm_squared();
                let db = (b - start).norm_squared();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut hull: Vec<Point2> = Vec::with_capacity(sorted.len());
    for pt in sorted {
        while hull.len() >= 2 {
            let p1 = hull[hull.len() - 2];
            let p2 = hull[hull.len() - 1];
            let cross = (p2.x - p1.x) * (pt.y - p1.y) - (p2.y - p1.y) * (pt.x - p1.x);
            if cross <= 0.0 {
                hull.pop();
            } else {
                break;
            }
        }
        hull.push(pt);
    }

    hull
}

/// Homography mapping the four `src` points onto the four `dst` points.
pub fn get_perspective_transform(src: &[Point2; 4], dst: &[Point2; 4]) -> Result<Matrix3<f64>> {
    // Solve for 8 parameters with h22 = 1
    let mut a = DMatrix::<f64>::zeros(8, 8);
    let mut b = DMatrix::<f64>::zeros(8, 1);

    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);

        a[(i, 0)] = x;
        a[(i, 1)] = y;
        a[(i, 2)] = 1.0;
        a[(i, 6)] = -u * x;
        a[(i, 7)] = -u * y;
        b[(i, 0)] = u;

        a[(i + 4, 3)] = x;
        a[(i + 4, 4)] = y;
        a[(i + 4, 5)] = 1.0;
        a[(i + 4, 6)] = -v * x;
        a[(i + 4, 7)] = -v * y;
        b[(i + 4, 0)] = v;
    }

    if let Some(h) = a.clone().lu().solve(&b) {
        let residual = (&a * &h - &b).norm();
        if residual < 1e-8 {
            return Ok(Matrix3::new(
                h[(0, 0)], h[(1, 0)], h[(2, 0)],
                h[(3, 0)], h[(4, 0)], h[(5, 0)],
                h[(6, 0)], h[(7, 0)], 1.0,
            ));
        }
    }

    // Fall back to the null space of the full 9-parameter system
    let mut a9 = DMatrix::<f64>::zeros(8, 9);
    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);

        a9[(i, 0)] = x;
        a9[(i, 1)] = y;
        a9[(i, 2)] = 1.0;
        a9[(i, 6)] = -u * x;
        a9[(i, 7)] = -u * y;
        a9[(i, 8)] = -u;

        a9[(i + 4, 3)] = x;
        a9[(i + 4, 4)] = y;
        a9[(i + 4, 5)] = 1.0;
        a9[(i + 4, 6)] = -v * x;
        a9[(i + 4, 7)] = -v * y;
        a9[(i + 4, 8)] = -v;
    }

    let ata = a9.transpose() * &a9;
    let svd = ata.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| DewarpError::Geometry("SVD failed in homography solve".to_string()))?;
    let h = u.column(8);
    if h[8].abs() < 1e-12 && h.norm() < 1e-12 {
        return Err(DewarpError::Geometry("degenerate homography".to_string()));
    }

    Ok(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]))
}

/// Recover the pose of a planar quadrilateral from its four image points.
///
/// `object` holds in-plane (z = 0) coordinates, `image` the observed points
/// in normalized space, and `focal` the focal length of a camera with the
/// principal point at the origin.
pub fn solve_pose_planar(object: &[Point2; 4], image: &[Point2; 4], focal: f64) -> Result<Pose> {
    let camera = image.map(|p| p / focal);
    let hmat = get_perspective_transform(object, &camera)?;

    let h1: Vector3<f64> = hmat.column(0).into_owned();
    let h2: Vector3<f64> = hmat.column(1).into_owned();
    let h3: Vector3<f64> = hmat.column(2).into_owned();

    let norm_sum = h1.norm() + h2.norm();
    if norm_sum < 1e-12 {
        return Err(DewarpError::Geometry("degenerate planar pose".to_string()));
    }
    let mut lambda = 2.0 / norm_sum;
    // The page has to lie in front of the camera
    if h3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let r3 = r1.cross(&r2);
    let tvec = h3 * lambda;

    let m = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = m.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| DewarpError::Geometry("SVD U missing in pose solve".to_string()))?;
    let v_t = svd
        .v_t
        .ok_or_else(|| DewarpError::Geometry("SVD V^T missing in pose solve".to_string()))?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        r = -r;
    }

    let rvec = Rotation3::from_matrix_unchecked(r).scaled_axis();
    Ok(Pose { rvec, tvec })
}

/// Pinhole projection with zero skew/distortion and the principal point at
/// the normalized origin.
pub fn project_points(points: &[Vector3<f64>], pose: &Pose, focal: f64) -> Vec<Point2> {
    let rot = Rotation3::new(pose.rvec);
    points
        .iter()
        .map(|p| {
            let pc = rot * p + pose.tvec;
            Point2::new(focal * pc.x / pc.z, focal * pc.y / pc.z)
        })
        .collect()
}
