use std::f64::consts::PI;

use imageproc::point::Point;

/// The four corners of a detected form boundary, in canvas order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub top_left: Point<f32>,
    pub top_right: Point<f32>,
    pub bottom_right: Point<f32>,
    pub bottom_left: Point<f32>,
}

/// Order four arbitrary corner points into TL/TR/BR/BL.
///
/// TL has the minimum x+y, BR the maximum x+y, TR the minimum x-y and BL the
/// maximum x-y. This holds for any quadrilateral that is not rotated close
/// to 45°, which is all the aligner needs since the capture loop keeps the
/// sheet roughly upright.
pub fn order_corners(points: &[Point<f32>; 4]) -> Quad {
    let by_sum = |p: &&Point<f32>| p.x + p.y;
    let by_diff = |p: &&Point<f32>| p.y - p.x;

    let top_left = *points
        .iter()
        .min_by(|a, b| by_sum(a).partial_cmp(&by_sum(b)).unwrap())
        .unwrap();
    let bottom_right = *points
        .iter()
        .max_by(|a, b| by_sum(a).partial_cmp(&by_sum(b)).unwrap())
        .unwrap();
    let top_right = *points
        .iter()
        .min_by(|a, b| by_diff(a).partial_cmp(&by_diff(b)).unwrap())
        .unwrap();
    let bottom_left = *points
        .iter()
        .max_by(|a, b| by_diff(a).partial_cmp(&by_diff(b)).unwrap())
        .unwrap();

    Quad {
        top_left,
        top_right,
        bottom_right,
        bottom_left,
    }
}

pub fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Area of a closed polygon via the shoelace formula.
pub fn polygon_area<T: Into<f64> + Copy>(points: &[Point<T>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..points.len() {
        let j = (i + 1) % points.len();
        let (xi, yi): (f64, f64) = (points[i].x.into(), points[i].y.into());
        let (xj, yj): (f64, f64) = (points[j].x.into(), points[j].y.into());
        area += xi * yj - xj * yi;
    }
    area.abs() / 2.0
}

/// Shape metric that is 1.0 for a perfect circle and falls toward 0 for
/// elongated or ragged contours.
pub fn circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 0.0;
    }
    4.0 * PI * area / (perimeter * perimeter)
}
