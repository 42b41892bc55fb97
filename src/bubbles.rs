use std::collections::BTreeMap;

use image::imageops;
use image::GrayImage;
use imageproc::contours::{find_contours_with_threshold, BorderType};
use imageproc::geometry::arc_length;
use log::{debug, info, warn};
use logging_timer::time;

use crate::circles::{detect_circles, Circle, HoughCircleParams};
use crate::config::{FormGeometry, LocatorConfig};
use crate::geometry::{circularity, polygon_area};
use crate::image_utils::adaptive_threshold_inv;
use crate::interpret::ScanError;
use crate::types::Choice;

/// A located answer bubble on the canonical canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BubblePosition {
    pub question: u32,
    pub choice: Choice,
    pub cx: f32,
    pub cy: f32,
    pub radius: f32,
}

/// Bubble positions keyed by question number, then choice letter. Choices
/// that were not discovered are absent, never synthesized.
pub type BubblePositionMap = BTreeMap<u32, BTreeMap<Choice, BubblePosition>>;

/// One way of finding candidate bubble circles in the grid region.
///
/// Sources are tried in order by [`locate`]; a fallback source only runs
/// when the sources before it recovered fewer than half the expected
/// bubbles. This replaces nested try/except-style detection chains with an
/// explicit, testable ordering.
pub trait CircleSource {
    fn name(&self) -> &'static str;

    fn is_fallback(&self) -> bool {
        false
    }

    /// Detect circles in region-local coordinates.
    fn detect(&self, region: &GrayImage) -> Vec<Circle>;
}

pub struct HoughSource {
    params: HoughCircleParams,
}

impl CircleSource for HoughSource {
    fn name(&self) -> &'static str {
        "hough"
    }

    fn detect(&self, region: &GrayImage) -> Vec<Circle> {
        detect_circles(region, &self.params)
    }
}

/// Contour-based supplement for bubbles printed too faintly or unevenly for
/// the Hough passes: adaptively threshold the region, then accept any outer
/// contour whose area and circularity look like a bubble.
pub struct ContourSource {
    min_area: f64,
    max_area: f64,
    min_circularity: f64,
}

impl CircleSource for ContourSource {
    fn name(&self) -> &'static str {
        "contour"
    }

    fn is_fallback(&self) -> bool {
        true
    }

    fn detect(&self, region: &GrayImage) -> Vec<Circle> {
        let binary = adaptive_threshold_inv(region, 5, 2);
        let contours = find_contours_with_threshold::<i32>(&binary, 128);

        contours
            .iter()
            .filter(|contour| contour.border_type == BorderType::Outer)
            .filter_map(|contour| {
                let area = polygon_area(&contour.points);
                if area < self.min_area || area > self.max_area {
                    return None;
                }
                let perimeter = arc_length(&contour.points, true);
                if circularity(area, perimeter) < self.min_circularity {
                    return None;
                }

                let n = contour.points.len() as f32;
                let cx = contour.points.iter().map(|p| p.x as f32).sum::<f32>() / n;
                let cy = contour.points.iter().map(|p| p.y as f32).sum::<f32>() / n;
                Some(Circle {
                    cx,
                    cy,
                    radius: (area / std::f64::consts::PI).sqrt() as f32,
                })
            })
            .collect()
    }
}

/// Find every answer bubble on the canonical grayscale image and organize
/// them into question rows and lettered choices.
#[time]
pub fn locate(
    gray: &GrayImage,
    geometry: &FormGeometry,
    config: &LocatorConfig,
) -> Result<BubblePositionMap, ScanError> {
    let (x0, y0, region_width, region_height) = geometry
        .grid_region
        .to_pixels(gray.width(), gray.height());
    let region = imageops::crop_imm(gray, x0, y0, region_width, region_height).to_image();

    let expected = (geometry.questions * geometry.choices) as usize;
    let sources = build_sources(config, region_width);

    let mut circles: Vec<Circle> = Vec::new();
    for source in &sources {
        if source.is_fallback() && circles.len() * 2 >= expected {
            debug!(
                "skipping {} source, {} of {} bubbles already found",
                source.name(),
                circles.len(),
                expected
            );
            continue;
        }

        let found = source.detect(&region);
        debug!("{} source found {} circles", source.name(), found.len());
        if source.is_fallback() {
            append_unique(&mut circles, found, 1.5);
        } else {
            merge_averaging(&mut circles, found);
        }
    }
    info!("located {} candidate bubbles ({} expected)", circles.len(), expected);

    // Back to full-canvas coordinates.
    for circle in &mut circles {
        circle.cx += x0 as f32;
        circle.cy += y0 as f32;
    }

    let rows = cluster_rows(circles, gray.height());
    let mut map = BubblePositionMap::new();

    for (row_index, mut row) in rows.into_iter().take(geometry.questions as usize).enumerate() {
        let question = row_index as u32 + 1;
        row.sort_by(|a, b| a.cx.partial_cmp(&b.cx).unwrap());

        if row.len() > geometry.choices as usize {
            warn!(
                "question {} row has {} circles, truncating to {}",
                question,
                row.len(),
                geometry.choices
            );
        }

        let mut choices = BTreeMap::new();
        for (i, circle) in row.into_iter().take(geometry.choices as usize).enumerate() {
            let choice = Choice::from_index(i).expect("choice count fits the alphabet");
            choices.insert(
                choice,
                BubblePosition {
                    question,
                    choice,
                    cx: circle.cx,
                    cy: circle.cy,
                    radius: circle.radius,
                },
            );
        }
        map.insert(question, choices);
    }

    if map.len() * 2 < geometry.questions as usize {
        return Err(ScanError::InsufficientBubbles {
            found: map.len(),
            expected: geometry.questions as usize,
        });
    }

    Ok(map)
}

fn build_sources(config: &LocatorConfig, region_width: u32) -> Vec<Box<dyn CircleSource>> {
    let mut sources: Vec<Box<dyn CircleSource>> = config
        .hough_presets
        .iter()
        .map(|preset| {
            Box::new(HoughSource {
                params: HoughCircleParams {
                    min_radius: config.min_radius,
                    max_radius: config.max_radius,
                    min_distance: preset.min_distance_fraction * region_width as f32,
                    accumulator_threshold: preset.accumulator_threshold,
                    canny_low: 50.0,
                    canny_high: 100.0,
                },
            }) as Box<dyn CircleSource>
        })
        .collect();

    sources.push(Box::new(ContourSource {
        min_area: config.contour_min_area,
        max_area: config.contour_max_area,
        min_circularity: config.contour_min_circularity,
    }));

    sources
}

/// Fold new detections into the running set, averaging center and radius
/// with any existing circle closer than twice the larger radius (the same
/// bubble seen by two presets).
fn merge_averaging(circles: &mut Vec<Circle>, found: Vec<Circle>) {
    for new in found {
        match circles
            .iter_mut()
            .find(|c| new.center_distance(c) < 2.0 * c.radius.max(new.radius))
        {
            Some(existing) => {
                existing.cx = (existing.cx + new.cx) / 2.0;
                existing.cy = (existing.cy + new.cy) / 2.0;
                existing.radius = (existing.radius + new.radius) / 2.0;
            }
            None => circles.push(new),
        }
    }
}

/// Append detections that are not already covered by an existing circle.
fn append_unique(circles: &mut Vec<Circle>, found: Vec<Circle>, factor: f32) {
    for new in found {
        let duplicate = circles
            .iter()
            .any(|c| new.center_distance(c) < factor * c.radius.max(new.radius));
        if !duplicate {
            circles.push(new);
        }
    }
}

/// Cluster circles into question rows by y-coordinate.
///
/// The tolerance adapts to the median spacing between consecutive sorted
/// y-coordinates rather than a fixed pixel count, since scan scale varies.
fn cluster_rows(mut circles: Vec<Circle>, canvas_height: u32) -> Vec<Vec<Circle>> {
    if circles.is_empty() {
        return vec![];
    }
    circles.sort_by(|a, b| a.cy.partial_cmp(&b.cy).unwrap());

    let ys: Vec<f32> = circles.iter().map(|c| c.cy).collect();
    let tolerance = if ys.len() > 1 {
        let mut spacings: Vec<f32> = ys.windows(2).map(|w| w[1] - w[0]).collect();
        spacings.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = spacings[spacings.len() / 2];
        (median * 0.4).max(canvas_height as f32 * 0.02)
    } else {
        canvas_height as f32 * 0.03
    };

    let mut rows: Vec<Vec<Circle>> = Vec::new();
    for circle in circles {
        match rows
            .iter_mut()
            .find(|row| (circle.cy - row[0].cy).abs() <= tolerance)
        {
            Some(row) => row.push(circle),
            None => rows.push(vec![circle]),
        }
    }

    rows.sort_by(|a, b| a[0].cy.partial_cmp(&b[0].cy).unwrap());
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_hollow_circle_mut;

    const WIDTH: u32 = 850;
    const HEIGHT: u32 = 1275;

    fn test_geometry() -> FormGeometry {
        FormGeometry {
            canvas_size: crate::types::Size {
                width: WIDTH,
                height: HEIGHT,
            },
            ..FormGeometry::default()
        }
    }

    fn test_locator_config() -> LocatorConfig {
        LocatorConfig {
            min_radius: 8,
            max_radius: 25,
            ..LocatorConfig::default()
        }
    }

    fn bubble_center(question: u32, choice: usize) -> (i32, i32) {
        let x = [0.25f32, 0.45, 0.62, 0.80][choice] * WIDTH as f32;
        let y = (0.25 + (question - 1) as f32 * 0.065) * HEIGHT as f32;
        (x as i32, y as i32)
    }

    fn draw_ring(img: &mut GrayImage, cx: i32, cy: i32) {
        for r in 13..=15 {
            draw_hollow_circle_mut(img, (cx, cy), r, Luma([0u8]));
        }
    }

    fn draw_grid(skip: &[(u32, usize)], extra: &[(i32, i32)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([255]));
        for question in 1..=10 {
            for choice in 0..4 {
                if skip.contains(&(question, choice)) {
                    continue;
                }
                let (cx, cy) = bubble_center(question, choice);
                draw_ring(&mut img, cx, cy);
            }
        }
        for &(cx, cy) in extra {
            draw_ring(&mut img, cx, cy);
        }
        img
    }

    #[test]
    fn locates_a_full_grid() {
        let img = draw_grid(&[], &[]);
        let map = locate(&img, &test_geometry(), &test_locator_config()).unwrap();

        assert_eq!(map.len(), 10);
        for (question, choices) in &map {
            assert_eq!(choices.len(), 4, "question {} incomplete", question);
            let letters: Vec<char> = choices.keys().map(|c| c.letter()).collect();
            assert_eq!(letters, vec!['A', 'B', 'C', 'D']);
        }

        // Choice letters go left to right.
        let q1 = &map[&1];
        let a = q1[&Choice::from("A")];
        let d = q1[&Choice::from("D")];
        assert!(a.cx < d.cx);

        // Question numbers go top to bottom.
        assert!(map[&1][&Choice::from("A")].cy < map[&10][&Choice::from("A")].cy);

        // Centers land near where the rings were drawn.
        let (expected_x, expected_y) = bubble_center(1, 0);
        assert!((a.cx - expected_x as f32).abs() <= 4.0);
        assert!((a.cy - expected_y as f32).abs() <= 4.0);
    }

    #[test]
    fn surplus_circles_in_a_row_are_truncated() {
        // A stray fifth ring to the right of question 3's row.
        let (_, y3) = bubble_center(3, 3);
        let img = draw_grid(&[], &[(((0.88 * WIDTH as f32) as i32), y3)]);
        let map = locate(&img, &test_geometry(), &test_locator_config()).unwrap();

        let q3 = &map[&3];
        assert_eq!(q3.len(), 4);
        // The kept four are the leftmost four.
        let (x_d, _) = bubble_center(3, 3);
        assert!((q3[&Choice::from("D")].cx - x_d as f32).abs() <= 4.0);
    }

    #[test]
    fn missing_bubbles_stay_absent() {
        // Question 5 printed with only three bubbles.
        let img = draw_grid(&[(5, 3)], &[]);
        let map = locate(&img, &test_geometry(), &test_locator_config()).unwrap();

        assert_eq!(map[&5].len(), 3);
        assert!(!map[&5].contains_key(&Choice::from("D")));
        assert_eq!(map[&4].len(), 4);
    }

    #[test]
    fn blank_canvas_is_insufficient() {
        let img = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([255]));
        match locate(&img, &test_geometry(), &test_locator_config()) {
            Err(ScanError::InsufficientBubbles { found, expected }) => {
                assert_eq!(found, 0);
                assert_eq!(expected, 10);
            }
            other => panic!("expected InsufficientBubbles, got {:?}", other),
        }
    }

    #[test]
    fn contour_source_finds_filled_discs() {
        use imageproc::drawing::draw_filled_circle_mut;

        let mut img = GrayImage::from_pixel(200, 100, Luma([255]));
        draw_filled_circle_mut(&mut img, (50, 50), 14, Luma([30]));
        draw_filled_circle_mut(&mut img, (140, 50), 14, Luma([30]));

        let source = ContourSource {
            min_area: 200.0,
            max_area: 5000.0,
            min_circularity: 0.6,
        };
        let mut found = source.detect(&img);
        found.sort_by(|a, b| a.cx.partial_cmp(&b.cx).unwrap());

        assert_eq!(found.len(), 2, "expected two discs, got {:?}", found);
        assert!((found[0].cx - 50.0).abs() <= 3.0);
        assert!((found[1].cx - 140.0).abs() <= 3.0);
        assert!((found[0].radius - 14.0).abs() <= 3.0);
    }

    #[test]
    fn merge_averages_near_duplicates() {
        let mut circles = vec![Circle {
            cx: 100.0,
            cy: 100.0,
            radius: 14.0,
        }];
        merge_averaging(
            &mut circles,
            vec![
                Circle {
                    cx: 102.0,
                    cy: 100.0,
                    radius: 16.0,
                },
                Circle {
                    cx: 300.0,
                    cy: 100.0,
                    radius: 14.0,
                },
            ],
        );
        assert_eq!(circles.len(), 2);
        assert!((circles[0].cx - 101.0).abs() < 1e-6);
        assert!((circles[0].radius - 15.0).abs() < 1e-6);
    }
}
