//! Linking blobs into text lines.
//!
//! Blobs are joined left to right by cheapest-first greedy matching over all
//! plausible pairs. Links are arena indices, so a malformed chain can never
//! alias a blob twice.

use tracing::debug;

use crate::detect::ContourInfo;
use crate::types::DewarpConfig;

/// One text line: indices into the blob arena, left to right.
pub type Span = Vec<usize>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateEdge {
    pub score: f64,
    pub a: usize,
    pub b: usize,
}

/// Absolute difference of two angles, wrapped into `[0, pi]`.
pub fn angle_dist(angle_b: f64, angle_a: f64) -> f64 {
    let mut diff = angle_b - angle_a;
    while diff > std::f64::consts::PI {
        diff -= 2.0 * std::f64::consts::PI;
    }
    while diff < -std::f64::consts::PI {
        diff += 2.0 * std::f64::consts::PI;
    }
    diff.abs()
}

/// Score the link between blobs `i` and `j`, ordered so the left one comes
/// first. `None` when the pair is too far apart, overlaps, or bends.
pub fn generate_candidate_edge(
    arena: &[ContourInfo],
    i: usize,
    j: usize,
    config: &DewarpConfig,
) -> Option<CandidateEdge> {
    let (a, b) = if arena[i].point0.x > arena[j].point1.x {
        (j, i)
    } else {
        (i, j)
    };
    let (ca, cb) = (&arena[a], &arena[b]);

    let x_overlap = ca.local_overlap(cb).max(cb.local_overlap(ca));

    let overall = cb.center - ca.center;
    let overall_angle = overall.y.atan2(overall.x);
    let delta_angle = angle_dist(ca.angle, overall_angle)
        .max(angle_dist(cb.angle, overall_angle))
        .to_degrees();

    let dist = (cb.point0 - ca.point1).norm();

    if dist > config.edge_max_length
        || x_overlap > config.edge_max_overlap
        || delta_angle > config.edge_max_angle
    {
        return None;
    }

    Some(CandidateEdge {
        score: dist + delta_angle * config.edge_angle_cost,
        a,
        b,
    })
}

/// Group blobs into spans.
///
/// `cinfo_list` is reordered by rectangle top and its `pred`/`succ` links are
/// filled in; the returned spans index into the reordered list.
pub fn assemble_spans(cinfo_list: &mut Vec<ContourInfo>, config: &DewarpConfig) -> Vec<Span> {
    cinfo_list.sort_by_key(|c| c.rect.y);
    for c in cinfo_list.iter_mut() {
        c.pred = None;
        c.succ = None;
    }

    let mut candidate_edges = Vec::new();
    for i in 0..cinfo_list.len() {
        for j in 0..i {
            if let Some(edge) = generate_candidate_edge(cinfo_list, i, j, config) {
                candidate_edges.push(edge);
            }
        }
    }

    // Stable, so equal scores keep generation order
    candidate_edges.sort_by(|x, y| x.score.total_cmp(&y.score));

    for edge in &candidate_edges {
        if cinfo_list[edge.a].succ.is_none() && cinfo_list[edge.b].pred.is_none() {
            cinfo_list[edge.a].succ = Some(edge.b);
            cinfo_list[edge.b].pred = Some(edge.a);
        }
    }

    let n = cinfo_list.len();
    let mut consumed = vec![false; n];
    let mut spans = Vec::new();

    for start in 0..n {
        if consumed[start] {
            continue;
        }

        // Rewind to the head of the chain
        let mut head = start;
        let mut seen = vec![false; n];
        seen[head] = true;
        while let Some(p) = cinfo_list[head].pred {
            if seen[p] || consumed[p] {
                break;
            }
            seen[p] = true;
            head = p;
        }

        let mut span = Vec::new();
        let mut width = 0.0;
        let mut cur = Some(head);
        while let Some(idx) = cur {
            if consumed[idx] {
                break;
            }
            consumed[idx] = true;
            span.push(idx);
            width += cinfo_list[idx].width();
            cur = cinfo_list[idx].succ;
        }

        if width > config.span_min_width {
            spans.push(span);
        }
    }

    debug!(contours = n, edges = candidate_edges.len(), spans = spans.len(), "Assembled spans");
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point2, Rect};
    use ndarray::Array2;

    /// Horizontal blob `width` px wide with its left end at `(x, y)`.
    fn blob(x: f64, y: f64, width: f64) -> ContourInfo {
        let center = Point2::new(x + width / 2.0, y);
        let tangent = Point2::new(1.0, 0.0);
        ContourInfo {
            rect: Rect { x: x as i32, y: y as i32 - 2, width: width as u32, height: 4 },
            mask: Array2::ones((4, width as usize)),
            center,
            tangent,
            angle: 0.0,
            local_xrng: (-width / 2.0, width / 2.0),
            point0: Point2::new(x, y),
            point1: Point2::new(x + width, y),
            pred: None,
            succ: None,
        }
    }

    #[test]
    fn test_angle_dist_wraps() {
        let pi = std::f64::consts::PI;
        assert!((angle_dist(0.1, -0.1) - 0.2).abs() < 1e-12);
        assert!((angle_dist(pi - 0.05, -pi + 0.05) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_edge_orders_left_to_right() {
        let arena = vec![blob(100.0, 50.0, 40.0), blob(20.0, 50.0, 60.0)];
        let config = DewarpConfig::default();
        let edge = generate_candidate_edge(&arena, 0, 1, &config).unwrap();
        assert_eq!((edge.a, edge.b), (1, 0));
        // Gap of 20 px, no angle change
        assert!((edge.score - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_edge_rejections() {
        let config = DewarpConfig::default();
        let far = vec![blob(0.0, 50.0, 40.0), blob(200.0, 50.0, 40.0)];
        assert!(generate_candidate_edge(&far, 0, 1, &config).is_none());

        let overlapping = vec![blob(0.0, 50.0, 40.0), blob(30.0, 52.0, 40.0)];
        assert!(generate_candidate_edge(&overlapping, 0, 1, &config).is_none());

        let steep = vec![blob(0.0, 50.0, 40.0), blob(50.0, 70.0, 40.0)];
        assert!(generate_candidate_edge(&steep, 0, 1, &config).is_none());
    }

    #[test]
    fn test_assemble_two_lines() {
        let config = DewarpConfig::default();
        let mut arena = vec![
            blob(140.0, 100.0, 50.0),
            blob(20.0, 40.0, 50.0),
            blob(80.0, 100.0, 50.0),
            blob(80.0, 40.0, 50.0),
            blob(20.0, 100.0, 50.0),
            blob(140.0, 40.0, 50.0),
        ];
        let spans = assemble_spans(&mut arena, &config);
        assert_eq!(spans.len(), 2);
        for span in &spans {
            assert_eq!(span.len(), 3);
            let xs: Vec<f64> = span.iter().map(|&i| arena[i].point0.x).collect();
            assert_eq!(xs, vec![20.0, 80.0, 140.0]);
            let y = arena[span[0]].center.y;
            assert!(span.iter().all(|&i| arena[i].center.y == y));
        }
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let config = DewarpConfig::default();
        let make = || {
            vec![
                blob(10.0, 30.0, 40.0),
                blob(60.0, 30.0, 40.0),
                blob(60.0, 30.0, 40.0),
                blob(110.0, 31.0, 40.0),
                blob(10.0, 90.0, 35.0),
            ]
        };
        let mut first = make();
        let mut second = make();
        let spans_a = assemble_spans(&mut first, &config);
        let spans_b = assemble_spans(&mut second, &config);
        assert_eq!(spans_a, spans_b);
        let links_a: Vec<_> = first.iter().map(|c| (c.pred, c.succ)).collect();
        let links_b: Vec<_> = second.iter().map(|c| (c.pred, c.succ)).collect();
        assert_eq!(links_a, links_b);
    }

    #[test]
    fn test_short_spans_are_dropped() {
        let config = DewarpConfig::default();
        let mut arena = vec![blob(10.0, 30.0, 20.0), blob(100.0, 80.0, 45.0)];
        let spans = assemble_spans(&mut arena, &config);
        assert_eq!(spans.len(), 1);
        assert_eq!(arena[spans[0][0]].point0.x, 100.0);
    }
}
