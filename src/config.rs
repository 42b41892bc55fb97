use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::roster::RosterEntry;
use crate::types::{Choice, Size};

/// Mapping from question number to the correct choice letter.
pub type AnswerKey = BTreeMap<u32, Choice>;

/// Top-level scan configuration, deserialized from a single JSON file.
///
/// Every empirically tuned threshold in the pipeline lives here so that unit
/// tests can vary them without touching process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub geometry: FormGeometry,
    pub locator: LocatorConfig,
    pub classifier: ClassifierConfig,
    pub answer_key: AnswerKey,
    pub roster: Vec<RosterEntry>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            geometry: FormGeometry::default(),
            locator: LocatorConfig::default(),
            classifier: ClassifierConfig::default(),
            answer_key: AnswerKey::new(),
            roster: vec![],
        }
    }
}

/// Layout of the printed form and the canonical canvas it is warped onto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormGeometry {
    /// Size of the rectified canvas all detection runs on.
    pub canvas_size: Size<u32>,
    pub questions: u32,
    pub choices: u32,
    /// Fraction of the frame the detected form quad must cover; smaller
    /// quads are rejected as misdetections.
    pub min_form_area_fraction: f32,
    /// Sub-region of the canvas containing the answer grid, excluding the
    /// header and name areas.
    pub grid_region: RegionFractions,
    /// Sub-region of the canvas containing the handwritten name box.
    pub name_region: RegionFractions,
}

impl Default for FormGeometry {
    fn default() -> Self {
        Self {
            canvas_size: Size {
                width: 1700,
                height: 2550,
            },
            questions: 10,
            choices: 4,
            min_form_area_fraction: 0.1,
            grid_region: RegionFractions {
                left: 0.10,
                top: 0.20,
                right: 0.90,
                bottom: 0.95,
            },
            name_region: RegionFractions {
                left: 0.075,
                top: 0.12,
                right: 0.925,
                bottom: 0.20,
            },
        }
    }
}

/// A rectangular image region expressed as fractions of the full canvas,
/// so the same layout works at any canvas resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionFractions {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RegionFractions {
    /// Convert to pixel bounds `(x, y, width, height)` on a canvas of the
    /// given size.
    pub fn to_pixels(self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = (self.left * width as f32) as u32;
        let y0 = (self.top * height as f32) as u32;
        let x1 = ((self.right * width as f32) as u32).min(width);
        let y1 = ((self.bottom * height as f32) as u32).min(height);
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Parameters for one Hough circle detection pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoughPreset {
    /// Minimum distance between accepted circle centers, as a fraction of
    /// the search region width.
    pub min_distance_fraction: f32,
    /// Votes a center cell needs before it is considered a circle.
    pub accumulator_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocatorConfig {
    pub min_radius: u32,
    pub max_radius: u32,
    /// Hough passes run in order; detections from all passes are merged.
    pub hough_presets: Vec<HoughPreset>,
    /// Contour-fallback acceptance window, in pixels of contour area.
    pub contour_min_area: f64,
    pub contour_max_area: f64,
    /// Minimum circularity (4π·area / perimeter^2) for a contour to count
    /// as a bubble.
    pub contour_min_circularity: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_radius: 12,
            max_radius: 60,
            hough_presets: vec![
                // Tight spacing, stricter vote requirement.
                HoughPreset {
                    min_distance_fraction: 0.08,
                    accumulator_threshold: 30,
                },
                // Looser spacing, picks up faint prints.
                HoughPreset {
                    min_distance_fraction: 0.06,
                    accumulator_threshold: 20,
                },
            ],
            contour_min_area: 200.0,
            contour_max_area: 5000.0,
            contour_min_circularity: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierConfig {
    /// Extra pixels around the bubble radius when cropping its region.
    pub crop_margin: u32,
    /// Pixels shaved off the mask radius so the printed outline itself is
    /// not counted as ink.
    pub edge_margin: u32,
    /// Fixed darkness cutoff; pixels below this count as ink regardless of
    /// the local histogram.
    pub fixed_cutoff: u8,
    /// Mean brightness above which a bubble is forced to fill ratio 0.
    pub white_guard: f32,
    /// Mean brightness below which the fill ratio is floored.
    pub black_guard: f32,
    pub black_guard_floor: f32,
    /// Multiplier applied to the colored-mark (red/brown) pixel ratio.
    pub colored_boost: f32,
    /// Divisor normalizing brightness deviation into the combined score.
    pub brightness_divisor: f32,
    /// How far the winning choice's score must exceed the runner-up's
    /// before the answer is accepted rather than recorded as unanswered.
    pub decision_margin: f32,
    /// When set, a question present in the answer key but absent from the
    /// bubble map fails classification instead of being marked unanswered.
    pub require_all_questions: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            crop_margin: 2,
            edge_margin: 2,
            fixed_cutoff: 150,
            white_guard: 220.0,
            black_guard: 80.0,
            black_guard_floor: 0.5,
            colored_boost: 1.2,
            brightness_divisor: 50.0,
            decision_margin: 0.2,
            require_all_questions: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = ScanConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.geometry.canvas_size.width, 1700);
        assert_eq!(back.geometry.canvas_size.height, 2550);
        assert_eq!(back.locator.hough_presets.len(), 2);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let json = r#"{
            "answerKey": { "1": "A", "2": "B" },
            "roster": [{ "name": "Lee, Yoon Jae", "role": "Instructor" }]
        }"#;
        let config: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.answer_key.len(), 2);
        assert_eq!(config.answer_key[&2], Choice::from("B"));
        assert_eq!(config.geometry.questions, 10);
        assert!((config.classifier.decision_margin - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn region_fractions_convert_to_pixel_bounds() {
        let region = RegionFractions {
            left: 0.10,
            top: 0.20,
            right: 0.90,
            bottom: 0.95,
        };
        let (x, y, w, h) = region.to_pixels(1000, 2000);
        assert_eq!((x, y), (100, 400));
        assert_eq!((w, h), (800, 1500));
    }
}
