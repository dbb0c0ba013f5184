// Contour extraction for binary masks.
// Components are labelled 8-connected; each one yields its outer boundary
// pixels, bounding rectangle and a hole-filled mask cropped to that rectangle.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array2;

use crate::geometry::Rect;

#[derive(Debug, Clone)]
pub struct Contour {
    /// Boundary pixels in image coordinates, raster order.
    pub points: Vec<(i32, i32)>,
    pub rect: Rect,
    /// 1 inside the outline, 0 outside; shape `(rect.height, rect.width)`.
    pub mask: Array2<u8>,
}

impl Contour {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest number of set mask pixels in any single column.
    pub fn max_column_thickness(&self) -> u32 {
        self.mask
            .columns()
            .into_iter()
            .map(|col| col.iter().map(|&v| v as u32).sum::<u32>())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// Find the outer contours of all 8-connected foreground regions.
///
/// Any non-zero pixel counts as foreground. Contours come out in the raster
/// order of each region's first pixel.
pub fn find_contours(binary_img: &GrayImage) -> Vec<Contour> {
    let (width, height) = binary_img.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let labels = connected_components(binary_img, Connectivity::Eight, Luma([0u8]));

    // First pass: bounds per label
    let mut bounds: Vec<Option<Bounds>> = Vec::new();
    for (x, y, px) in labels.enumerate_pixels() {
        let label = px.0[0] as usize;
        if label == 0 {
            continue;
        }
        if bounds.len() < label {
            bounds.resize(label, None);
        }
        let entry = &mut bounds[label - 1];
        *entry = Some(match *entry {
            None => Bounds { min_x: x, min_y: y, max_x: x, max_y: y },
            Some(b) => Bounds {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        });
    }

    // Second pass: boundary pixels per label
    let mut boundaries: Vec<Vec<(i32, i32)>> = vec![Vec::new(); bounds.len()];
    for (x, y, px) in labels.enumerate_pixels() {
        let label = px.0[0];
        if label == 0 {
            continue;
        }
        if is_boundary_pixel_label(&labels, x as i32, y as i32, label) {
            boundaries[label as usize - 1].push((x as i32, y as i32));
        }
    }

    let mut contours = Vec::with_capacity(bounds.len());
    for (idx, (b, points)) in bounds.into_iter().zip(boundaries).enumerate() {
        let Some(b) = b else {
            continue;
        };
        let rect = Rect {
            x: b.min_x as i32,
            y: b.min_y as i32,
            width: b.max_x - b.min_x + 1,
            height: b.max_y - b.min_y + 1,
        };
        let mask = filled_mask(&labels, idx as u32 + 1, rect);
        contours.push(Contour { points, rect, mask });
    }

    // Label numbering is an implementation detail of the labeller
    contours.sort_by_key(|c| c.points.first().map(|&(x, y)| (y, x)));
    contours
}

/// Check if a pixel is on the boundary of its labeled region
fn is_boundary_pixel_label(
    label_map: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    x: i32,
    y: i32,
    target_label: u32,
) -> bool {
    let (width, height) = label_map.dimensions();
    for (dx, dy) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
        let nx = x + dx;
        let ny = y + dy;

        // Edge or different label = boundary
        if nx < 0 || nx >= width as i32 || ny < 0 || ny >= height as i32 {
            return true;
        }
        if label_map.get_pixel(nx as u32, ny as u32).0[0] != target_label {
            return true;
        }
    }

    false
}

/// Mask of everything enclosed by the outline of `target_label` inside `rect`.
///
/// Pixels of the rectangle that are reachable from its border without
/// crossing the label are outside; all others are inside.
fn filled_mask(
    label_map: &image::ImageBuffer<Luma<u32>, Vec<u32>>,
    target_label: u32,
    rect: Rect,
) -> Array2<u8> {
    let (rw, rh) = (rect.width as usize, rect.height as usize);
    let is_label = |c: usize, r: usize| {
        label_map
            .get_pixel(rect.x as u32 + c as u32, rect.y as u32 + r as u32)
            .0[0]
            == target_label
    };

    let mut outside = Array2::<bool>::from_elem((rh, rw), false);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for c in 0..rw {
        stack.push((0, c));
        stack.push((rh - 1, c));
    }
    for r in 0..rh {
        stack.push((r, 0));
        stack.push((r, rw - 1));
    }

    while let Some((r, c)) = stack.pop() {
        if outside[[r, c]] || is_label(c, r) {
            continue;
        }
        outside[[r, c]] = true;
        if r > 0 {
            stack.push((r - 1, c));
        }
        if r + 1 < rh {
            stack.push((r + 1, c));
        }
        if c > 0 {
            stack.push((r, c - 1));
        }
        if c + 1 < rw {
            stack.push((r, c + 1));
        }
    }

    outside.mapv(|o| if o { 0u8 } else { 1u8 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draw_rect(img: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, Luma([255]));
            }
        }
    }

    #[test]
    fn test_find_contours_separates_regions() {
        let mut img = GrayImage::new(50, 20);
        draw_rect(&mut img, 2, 2, 10, 3);
        draw_rect(&mut img, 20, 10, 15, 4);

        let contours = find_contours(&img);
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].rect, Rect { x: 2, y: 2, width: 10, height: 3 });
        assert_eq!(contours[1].rect, Rect { x: 20, y: 10, width: 15, height: 4 });
        assert_eq!(contours[1].max_column_thickness(), 4);
        // Perimeter of a 10x3 block, interior row excluded
        assert_eq!(contours[0].len(), 10 * 3 - 8);
    }

    #[test]
    fn test_diagonal_pixels_join() {
        let mut img = GrayImage::new(10, 10);
        img.put_pixel(2, 2, Luma([255]));
        img.put_pixel(3, 3, Luma([255]));
        img.put_pixel(4, 4, Luma([255]));
        let contours = find_contours(&img);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].rect.width, 3);
    }

    #[test]
    fn test_holes_are_filled() {
        let mut img = GrayImage::new(20, 20);
        draw_rect(&mut img, 5, 5, 7, 7);
        for y in 7..10 {
            for x in 7..10 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let contours = find_contours(&img);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].mask.iter().all(|&v| v == 1));
        assert_eq!(contours[0].max_column_thickness(), 7);
    }

    #[test]
    fn test_empty_image_has_no_contours() {
        assert!(find_contours(&GrayImage::new(8, 8)).is_empty());
        assert!(find_contours(&GrayImage::new(0, 0)).is_empty());
    }
}
