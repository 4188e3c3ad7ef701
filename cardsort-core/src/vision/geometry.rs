//! Card boundary extraction.
//!
//! ## Pipeline
//!
//! 1. Grayscale
//! 2. Gaussian blur
//! 3. Canny edge detection
//! 4. Morphological closing (3×3) to bridge broken edges
//! 5. Outer-border contour extraction
//! 6. Closed Douglas–Peucker approximation at `ratio × perimeter`
//! 7. Keep 4-vertex polygons; return the largest above the area floor

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::arc_length;
use imageproc::morphology::close;
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::{debug, instrument};

use crate::config::GeometryConfig;

/// A quadrilateral in frame coordinates, vertices in contour order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub corners: [Point<f32>; 4],
}

/// Quadrilateral corners sorted into card positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderedCorners {
    pub top_left: (f32, f32),
    pub top_right: (f32, f32),
    pub bottom_right: (f32, f32),
    pub bottom_left: (f32, f32),
}

impl OrderedCorners {
    /// Corners clockwise from the top-left.
    pub fn to_array(&self) -> [(f32, f32); 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }
}

impl Quad {
    pub fn new(corners: [(f32, f32); 4]) -> Self {
        Self {
            corners: corners.map(|(x, y)| Point::new(x, y)),
        }
    }

    fn from_contour_points(points: &[Point<i32>; 4]) -> Self {
        Self {
            corners: points.map(|p| Point::new(p.x as f32, p.y as f32)),
        }
    }

    /// Enclosed area (shoelace formula).
    pub fn area(&self) -> f64 {
        let c = &self.corners;
        let mut twice = 0.0f64;
        for i in 0..4 {
            let j = (i + 1) % 4;
            twice += c[i].x as f64 * c[j].y as f64 - c[j].x as f64 * c[i].y as f64;
        }
        twice.abs() / 2.0
    }

    /// Smallest axis-aligned rectangle containing every corner.
    pub fn bounding_rect(&self) -> Rect {
        let xs = self.corners.map(|p| p.x);
        let ys = self.corners.map(|p| p.y);
        let min_x = xs.iter().copied().fold(f32::INFINITY, f32::min).floor() as i32;
        let max_x = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max).floor() as i32;
        let min_y = ys.iter().copied().fold(f32::INFINITY, f32::min).floor() as i32;
        let max_y = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max).floor() as i32;
        Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32)
    }

    /// Sort corners by y, then split the top and bottom pairs by x.
    pub fn ordered(&self) -> OrderedCorners {
        let mut pts = self.corners.map(|p| (p.x, p.y));
        pts.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.total_cmp(&b.0)));
        let (top_left, top_right) = if pts[0].0 <= pts[1].0 {
            (pts[0], pts[1])
        } else {
            (pts[1], pts[0])
        };
        let (bottom_left, bottom_right) = if pts[2].0 <= pts[3].0 {
            (pts[2], pts[3])
        } else {
            (pts[3], pts[2])
        };
        OrderedCorners {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }
}

/// Stateless card boundary detector.
#[derive(Debug, Clone, Default)]
pub struct CardDetector {
    config: GeometryConfig,
}

impl CardDetector {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    /// Find the largest card-like quadrilateral in a frame.
    #[instrument(skip_all, fields(width = frame.width(), height = frame.height()))]
    pub fn find_card(&self, frame: &RgbImage) -> Option<Quad> {
        let gray = image::imageops::grayscale(frame);
        self.find_card_gray(&gray)
    }

    /// Same as [`find_card`](Self::find_card) on an already-gray frame.
    pub fn find_card_gray(&self, gray: &GrayImage) -> Option<Quad> {
        let blurred = if self.config.blur_sigma > 0.0 {
            gaussian_blur_f32(gray, self.config.blur_sigma)
        } else {
            gray.clone()
        };
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        let closed = close(&edges, Norm::LInf, 1);

        let contours = find_contours::<i32>(&closed);
        let mut best: Option<(f64, Quad)> = None;
        let mut quads = 0usize;

        for contour in contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        {
            if contour.points.len() < 4 {
                continue;
            }
            let epsilon = self.config.approx_epsilon_ratio * arc_length(&contour.points, true);
            let approx = approximate_closed_polygon(&contour.points, epsilon);
            let Ok(vertices) = <[Point<i32>; 4]>::try_from(approx) else {
                continue;
            };
            quads += 1;

            let quad = Quad::from_contour_points(&vertices);
            let area = quad.area();
            if area > self.config.min_area && best.as_ref().map_or(true, |(a, _)| area > *a) {
                best = Some((area, quad));
            }
        }

        debug!(
            contours = contours.len(),
            quads,
            best_area = best.as_ref().map(|(a, _)| *a),
            "Card contour search finished"
        );
        best.map(|(_, quad)| quad)
    }
}

/// Douglas–Peucker simplification of a closed contour.
///
/// The contour is split at its two mutually most distant points, each half
/// is simplified as an open chain, and the halves are joined. Returned
/// vertices are in contour order without repeating the first.
///
/// imageproc's `approximate_polygon_dp` with `closed = true` reduces a
/// rectangle outline to a single vertex, so it is not used here.
pub fn approximate_closed_polygon(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    let farthest_from = |origin: Point<i32>| {
        points
            .iter()
            .enumerate()
            .max_by_key(|(_, p)| {
                let dx = (p.x - origin.x) as i64;
                let dy = (p.y - origin.y) as i64;
                dx * dx + dy * dy
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let a = farthest_from(points[0]);
    let b = farthest_from(points[a]);
    if a == b {
        return vec![points[a]];
    }
    let (start, split) = if a < b { (a, b) } else { (b, a) };

    let first: Vec<Point<i32>> = points[start..=split].to_vec();
    let second: Vec<Point<i32>> = points[split..]
        .iter()
        .chain(points[..=start].iter())
        .copied()
        .collect();

    let mut result = simplify_open(&first, epsilon);
    result.pop();
    let mut tail = simplify_open(&second, epsilon);
    tail.pop();
    result.extend(tail);
    result
}

/// Douglas–Peucker over an open chain; both endpoints are always kept.
fn simplify_open(points: &[Point<i32>], epsilon: f64) -> Vec<Point<i32>> {
    let n = points.len();
    if n <= 2 {
        return points.to_vec();
    }

    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;
    let mut stack = vec![(0usize, n - 1)];

    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let mut max_distance = 0.0f64;
        let mut index = start;
        for i in start + 1..end {
            let d = perpendicular_distance(points[i], points[start], points[end]);
            if d > max_distance {
                max_distance = d;
                index = i;
            }
        }
        if max_distance > epsilon {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

fn perpendicular_distance(p: Point<i32>, a: Point<i32>, b: Point<i32>) -> f64 {
    let (px, py) = (p.x as f64, p.y as f64);
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let length = (dx * dx + dy * dy).sqrt();
    if length == 0.0 {
        return ((px - ax).powi(2) + (py - ay).powi(2)).sqrt();
    }
    ((dy * px - dx * py + bx * ay - by * ax) / length).abs()
}
