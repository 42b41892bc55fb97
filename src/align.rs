use image::{imageops, GrayImage, Rgb, RgbImage};
use imageproc::contours::{find_contours_with_threshold, BorderType};
use imageproc::contrast::equalize_histogram;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::close;
use imageproc::point::Point;
use log::debug;
use logging_timer::time;

use crate::config::FormGeometry;
use crate::geometry::{order_corners, polygon_area, Quad};
use crate::image_utils::{adaptive_threshold_inv, flatten_illumination};
use crate::interpret::ScanError;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// LInf closing radius that bridges gaps in the sheet outline left by
/// uneven lighting, matching a 9x9 structuring element.
const CLOSE_RADIUS: u8 = 4;
/// Polygon simplification tolerance as a fraction of the contour perimeter.
const APPROX_EPSILON: f64 = 0.02;

/// The rectified form, warped onto the canonical canvas, in the three
/// renditions later stages consume.
pub struct CanonicalForm {
    pub color: RgbImage,
    pub gray: GrayImage,
    /// Ink-as-foreground binarization of `gray`.
    pub binary: GrayImage,
}

/// Find the sheet boundary in a raw photograph and warp it onto the
/// canonical canvas.
///
/// The boundary is the largest roughly four-cornered contour in the frame.
/// Frames with no such contour, or where the best candidate covers too
/// little of the frame to plausibly be the sheet, fail with
/// `ScanError::Alignment`.
#[time]
pub fn align(frame: &RgbImage, geometry: &FormGeometry) -> Result<CanonicalForm, ScanError> {
    let quad = find_form_quad(frame, geometry)?;
    debug!("form boundary: {:?}", quad);

    let (width, height) = (geometry.canvas_size.width, geometry.canvas_size.height);
    let src = [
        (quad.top_left.x, quad.top_left.y),
        (quad.top_right.x, quad.top_right.y),
        (quad.bottom_right.x, quad.bottom_right.y),
        (quad.bottom_left.x, quad.bottom_left.y),
    ];
    let dst = [
        (0.0, 0.0),
        ((width - 1) as f32, 0.0),
        ((width - 1) as f32, (height - 1) as f32),
        (0.0, (height - 1) as f32),
    ];
    let projection = Projection::from_control_points(src, dst).ok_or_else(|| {
        ScanError::Alignment("detected corners are degenerate, cannot build projection".into())
    })?;

    let mut color = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    warp_into(
        frame,
        &projection,
        Interpolation::Bilinear,
        Rgb([255, 255, 255]),
        &mut color,
    );

    let gray = normalize_lighting(&imageops::grayscale(&color));
    let binary = adaptive_threshold_inv(&gray, 12, 12);

    Ok(CanonicalForm {
        color,
        gray,
        binary,
    })
}

/// Locate the four corners of the sheet in the raw frame.
fn find_form_quad(frame: &RgbImage, geometry: &FormGeometry) -> Result<Quad, ScanError> {
    let gray = imageops::grayscale(frame);
    let blurred = gaussian_blur_f32(&gray, 1.5);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
    let closed = close(&edges, Norm::LInf, CLOSE_RADIUS);

    let mut outlines: Vec<Vec<Point<i32>>> = find_contours_with_threshold::<i32>(&closed, 128)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| contour.points)
        .collect();
    outlines.sort_by(|a, b| {
        polygon_area(b)
            .partial_cmp(&polygon_area(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let frame_area = f64::from(frame.width()) * f64::from(frame.height());
    let min_area = frame_area * f64::from(geometry.min_form_area_fraction);

    // Walk all area-sorted contours; the sheet may rank behind larger
    // non-rectangular shapes in a cluttered frame.
    for outline in &outlines {
        let perimeter = arc_length(outline, true);
        let simplified = approximate_polygon_dp(outline, APPROX_EPSILON * perimeter, true);
        if simplified.len() != 4 {
            continue;
        }

        let area = polygon_area(&simplified);
        if area < min_area {
            debug!(
                "four-corner contour too small: {:.0}px^2 of {:.0}px^2 required",
                area, min_area
            );
            continue;
        }

        let corners = [
            Point::new(simplified[0].x as f32, simplified[0].y as f32),
            Point::new(simplified[1].x as f32, simplified[1].y as f32),
            Point::new(simplified[2].x as f32, simplified[2].y as f32),
            Point::new(simplified[3].x as f32, simplified[3].y as f32),
        ];
        debug!("form candidate area {:.0}px^2 of {:.0}px^2 frame", area, frame_area);
        return Ok(order_corners(&corners));
    }

    Err(ScanError::Alignment(
        "no four-corner sheet boundary covering enough of the frame".into(),
    ))
}

/// Even out capture lighting on the rectified grayscale: global contrast
/// stretch followed by division by the low-frequency background.
fn normalize_lighting(gray: &GrayImage) -> GrayImage {
    let equalized = equalize_histogram(gray);
    flatten_illumination(&equalized, 15.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;
    use imageproc::drawing::draw_polygon_mut;

    fn test_geometry() -> FormGeometry {
        FormGeometry {
            canvas_size: Size {
                width: 200,
                height: 300,
            },
            ..FormGeometry::default()
        }
    }

    /// A gray desk with a white sheet drawn as a filled quadrilateral.
    fn photo_with_sheet(corners: [(i32, i32); 4]) -> RgbImage {
        let mut frame = RgbImage::from_pixel(800, 600, Rgb([90, 90, 90]));
        let polygon: Vec<Point<i32>> = corners
            .iter()
            .map(|&(x, y)| Point::new(x, y))
            .collect();
        draw_polygon_mut(&mut frame, &polygon, Rgb([255, 255, 255]));
        frame
    }

    #[test]
    fn warps_a_skewed_sheet_onto_the_canvas() {
        let frame = photo_with_sheet([(100, 80), (700, 60), (720, 520), (80, 540)]);
        let form = align(&frame, &test_geometry()).unwrap();

        assert_eq!(form.color.dimensions(), (200, 300));
        assert_eq!(form.gray.dimensions(), (200, 300));
        assert_eq!(form.binary.dimensions(), (200, 300));

        // The canvas interior should be sheet, not desk.
        let center = form.color.get_pixel(100, 150).0;
        assert!(center[0] > 180, "canvas center should be paper: {:?}", center);
    }

    #[test]
    fn alignment_is_deterministic() {
        let frame = photo_with_sheet([(100, 80), (700, 60), (720, 520), (80, 540)]);
        let geometry = test_geometry();
        let first = align(&frame, &geometry).unwrap();
        let second = align(&frame, &geometry).unwrap();
        assert_eq!(first.color.as_raw(), second.color.as_raw());
        assert_eq!(first.binary.as_raw(), second.binary.as_raw());
    }

    #[test]
    fn blank_frame_is_rejected() {
        let frame = RgbImage::from_pixel(800, 600, Rgb([90, 90, 90]));
        match align(&frame, &test_geometry()) {
            Err(ScanError::Alignment(_)) => {}
            other => panic!("expected alignment failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn tiny_sheet_is_rejected() {
        // A 120x90 sheet in an 800x600 frame is ~2% of the frame, well under
        // the 10% floor.
        let frame = photo_with_sheet([(340, 250), (460, 250), (460, 340), (340, 340)]);
        match align(&frame, &test_geometry()) {
            Err(ScanError::Alignment(_)) => {}
            other => panic!("expected alignment failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn sheet_ranked_behind_larger_round_blobs_is_still_found() {
        // Five circular blobs, each larger than the sheet, outrank it in the
        // area-sorted contour scan; none of them simplify to four corners.
        let mut frame = RgbImage::from_pixel(1050, 750, Rgb([90, 90, 90]));
        for &(cx, cy) in &[(175, 175), (515, 175), (855, 175), (175, 515), (515, 515)] {
            imageproc::drawing::draw_filled_circle_mut(
                &mut frame,
                (cx, cy),
                165,
                Rgb([255, 255, 255]),
            );
        }
        let sheet: Vec<Point<i32>> = [(700, 390), (1000, 390), (1000, 655), (700, 655)]
            .iter()
            .map(|&(x, y)| Point::new(x, y))
            .collect();
        draw_polygon_mut(&mut frame, &sheet, Rgb([255, 255, 255]));

        let form = align(&frame, &test_geometry()).unwrap();
        assert_eq!(form.color.dimensions(), (200, 300));
        let center = form.color.get_pixel(100, 150).0;
        assert!(center[0] > 180, "canvas center should be paper: {:?}", center);
    }

    #[test]
    fn rotated_frame_still_finds_the_sheet() {
        let frame = photo_with_sheet([(100, 80), (700, 60), (720, 520), (80, 540)]);
        let rotated = imageops::rotate90(&frame);
        let form = align(&rotated, &test_geometry()).unwrap();
        assert_eq!(form.color.dimensions(), (200, 300));
    }
}
