use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// A detected circle in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub cx: f32,
    pub cy: f32,
    pub radius: f32,
}

impl Circle {
    pub fn center_distance(&self, other: &Circle) -> f32 {
        ((self.cx - other.cx).powi(2) + (self.cy - other.cy).powi(2)).sqrt()
    }
}

/// Parameters for one gradient-voting Hough pass.
#[derive(Debug, Clone, Copy)]
pub struct HoughCircleParams {
    pub min_radius: u32,
    pub max_radius: u32,
    /// Minimum distance between accepted centers, in pixels.
    pub min_distance: f32,
    /// Votes a center cell must collect to be considered.
    pub accumulator_threshold: u32,
    pub canny_low: f32,
    pub canny_high: f32,
}

/// Gradient-voting Hough circle transform.
///
/// Each Canny edge pixel votes for candidate centers along its gradient
/// direction (both polarities, so dark-on-light and light-on-dark rings both
/// register) at every radius in range. Center cells that collect enough
/// votes survive a greedy minimum-distance suppression, and each surviving
/// center's radius is read off a histogram of distances to supporting edge
/// pixels.
pub fn detect_circles(gray: &GrayImage, params: &HoughCircleParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 || params.min_radius > params.max_radius {
        return vec![];
    }

    let blurred = gaussian_blur_f32(gray, 1.0);
    let edges = canny(&blurred, params.canny_low, params.canny_high);
    let gx = horizontal_sobel(&blurred);
    let gy = vertical_sobel(&blurred);

    let mut edge_points: Vec<(u32, u32)> = Vec::new();
    let mut accumulator = vec![0u32; (width * height) as usize];

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }

        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        let magnitude = (dx * dx + dy * dy).sqrt();
        if magnitude < 1.0 {
            continue;
        }
        edge_points.push((x, y));

        let (ux, uy) = (dx / magnitude, dy / magnitude);
        for r in params.min_radius..=params.max_radius {
            let r = r as f32;
            for direction in [1.0f32, -1.0] {
                let cx = (x as f32 + direction * r * ux).round() as i64;
                let cy = (y as f32 + direction * r * uy).round() as i64;
                if cx >= 0 && cx < i64::from(width) && cy >= 0 && cy < i64::from(height) {
                    accumulator[(cy as u32 * width + cx as u32) as usize] += 1;
                }
            }
        }
    }

    // Vote peaks, strongest first, thinned by the minimum center distance.
    let mut candidates: Vec<(u32, u32, u32)> = accumulator
        .iter()
        .enumerate()
        .filter(|(_, &votes)| votes >= params.accumulator_threshold)
        .map(|(i, &votes)| (votes, i as u32 % width, i as u32 / width))
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    let mut centers: Vec<(f32, f32)> = Vec::new();
    for (_, x, y) in candidates {
        let (x, y) = (x as f32, y as f32);
        let too_close = centers.iter().any(|&(cx, cy)| {
            ((cx - x).powi(2) + (cy - y).powi(2)).sqrt() < params.min_distance
        });
        if !too_close {
            centers.push((x, y));
        }
    }

    centers
        .into_iter()
        .filter_map(|(cx, cy)| estimate_radius(cx, cy, &edge_points, params))
        .collect()
}

/// Pick the radius most supported by edge pixels around a center, or `None`
/// when no radius in range has meaningful support.
fn estimate_radius(
    cx: f32,
    cy: f32,
    edge_points: &[(u32, u32)],
    params: &HoughCircleParams,
) -> Option<Circle> {
    let bins = (params.max_radius - params.min_radius + 1) as usize;
    let mut histogram = vec![0u32; bins];

    for &(x, y) in edge_points {
        let d = ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt();
        let r = d.round() as i64 - i64::from(params.min_radius);
        if r >= 0 && (r as usize) < bins {
            histogram[r as usize] += 1;
        }
    }

    let (best_bin, &support) = histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, &count)| count)?;
    if support < 3 {
        return None;
    }

    Some(Circle {
        cx,
        cy,
        radius: (params.min_radius as usize + best_bin) as f32,
    })
}
