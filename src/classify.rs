use std::collections::BTreeMap;

use image::{imageops, GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use log::warn;
use logging_timer::time;

use crate::align::CanonicalForm;
use crate::bubbles::{BubblePosition, BubblePositionMap};
use crate::config::{ClassifierConfig, FormGeometry};
use crate::image_utils::{otsu_threshold_of, sample_stats};
use crate::interpret::ScanError;
use crate::types::Choice;

/// Selected choice per question number, `None` when the question is
/// unanswered or the evidence was too ambiguous to call.
pub type AnswerMap = BTreeMap<u32, Option<Choice>>;

/// Resolve every question on the form to a selected choice or `None`.
///
/// Individual unreadable bubbles never fail the call; they score as
/// unfilled. A question missing from the bubble map entirely is recorded as
/// unanswered unless the configuration demands every question be locatable.
#[time]
pub fn classify_all(
    form: &CanonicalForm,
    map: &BubblePositionMap,
    geometry: &FormGeometry,
    config: &ClassifierConfig,
) -> Result<AnswerMap, ScanError> {
    let mut answers = AnswerMap::new();

    for question in 1..=geometry.questions {
        let choices = match map.get(&question) {
            Some(choices) if !choices.is_empty() => choices,
            _ => {
                if config.require_all_questions {
                    return Err(ScanError::MissingQuestion(question));
                }
                warn!("question {} absent from bubble map, marking unanswered", question);
                answers.insert(question, None);
                continue;
            }
        };

        let readings: Vec<(Choice, BubbleReading)> = choices
            .values()
            .map(|position| (position.choice, read_bubble(form, position, config)))
            .collect();

        answers.insert(question, decide(&readings, config));
    }

    Ok(answers)
}

/// Fill ratio and mean interior brightness for one bubble.
#[derive(Debug, Clone, Copy)]
pub struct BubbleReading {
    pub fill_ratio: f32,
    pub mean_brightness: f32,
}

/// Pick the winning choice for one question, or `None` when the best
/// candidate does not clear the runner-up by the decision margin.
///
/// Each candidate scores as its normalized darkness relative to the
/// question's average brightness plus its fill ratio, so a bubble only wins
/// by standing out from its siblings. Double marks and erasure smudges land
/// within the margin of each other and decline to a non-answer.
fn decide(readings: &[(Choice, BubbleReading)], config: &ClassifierConfig) -> Option<Choice> {
    if readings.is_empty() {
        return None;
    }

    let average_brightness = readings
        .iter()
        .map(|(_, r)| r.mean_brightness)
        .sum::<f32>()
        / readings.len() as f32;

    let mut scored: Vec<(Choice, f32)> = readings
        .iter()
        .map(|&(choice, reading)| {
            let deviation = (average_brightness - reading.mean_brightness).max(0.0);
            (choice, deviation / config.brightness_divisor + reading.fill_ratio)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    let (best_choice, best_score) = scored[0];
    let runner_up = scored.get(1).map_or(0.0, |&(_, score)| score);

    if best_score >= runner_up + config.decision_margin {
        Some(best_choice)
    } else {
        None
    }
}

/// Score one bubble's interior.
///
/// Takes the maximum of three darkness estimates (Otsu split, mean minus
/// 1.5 standard deviations, fixed cutoff) over a circular mask shrunk away from the printed outline,
/// folds in a red/brown colored-mark channel from the color layer, and
/// applies paper-white / near-black guard rails.
pub fn read_bubble(
    form: &CanonicalForm,
    position: &BubblePosition,
    config: &ClassifierConfig,
) -> BubbleReading {
    let reach = position.radius + config.crop_margin as f32;
    let left = (position.cx - reach).floor().max(0.0) as u32;
    let top = (position.cy - reach).floor().max(0.0) as u32;
    let right = ((position.cx + reach).ceil() as u32).min(form.gray.width());
    let bottom = ((position.cy + reach).ceil() as u32).min(form.gray.height());

    if right <= left || bottom <= top {
        return BubbleReading {
            fill_ratio: 0.0,
            mean_brightness: 255.0,
        };
    }
    let (width, height) = (right - left, bottom - top);

    let crop = imageops::crop_imm(&form.gray, left, top, width, height).to_image();
    let blurred = gaussian_blur_f32(&crop, 0.8);

    // The crop extends crop_margin beyond the bubble radius, so both margins
    // come off the half-width to keep the printed outline outside the mask.
    let mask_radius = (width.min(height) as i32 / 2
        - (config.crop_margin + config.edge_margin) as i32)
        .max(0);
    if mask_radius < 2 {
        return BubbleReading {
            fill_ratio: 0.0,
            mean_brightness: 255.0,
        };
    }

    let pixels = masked_pixels(&blurred, mask_radius);
    if pixels.is_empty() {
        return BubbleReading {
            fill_ratio: 0.0,
            mean_brightness: 255.0,
        };
    }
    let total = pixels.len() as f32;
    let (mean, std) = sample_stats(&pixels);

    let otsu = otsu_threshold_of(&pixels);
    let below_otsu = pixels.iter().filter(|&&p| p < otsu).count() as f32;
    let conservative_cutoff = mean - 1.5 * std;
    let below_conservative = pixels
        .iter()
        .filter(|&&p| f32::from(p) < conservative_cutoff)
        .count() as f32;
    let below_fixed = pixels
        .iter()
        .filter(|&&p| p < config.fixed_cutoff)
        .count() as f32;

    let gray_fill = (below_otsu / total)
        .max(below_conservative / total)
        .max(below_fixed / total);

    let colored_fill =
        colored_mark_ratio(&form.color, left, top, width, height, mask_radius) * config.colored_boost;

    let mut fill_ratio = gray_fill.max(colored_fill);

    // Guard rails: paper-white interiors are never filled, near-black ones
    // always are, whatever the per-sample thresholds said.
    if mean > config.white_guard {
        fill_ratio = 0.0;
    } else if mean < config.black_guard {
        fill_ratio = fill_ratio.max(config.black_guard_floor);
    }

    BubbleReading {
        fill_ratio: fill_ratio.min(1.0),
        mean_brightness: mean,
    }
}

/// Interior pixels inside the circular mask centered on the crop.
fn masked_pixels(crop: &GrayImage, mask_radius: i32) -> Vec<u8> {
    let (width, height) = crop.dimensions();
    let (center_x, center_y) = (width as i32 / 2, height as i32 / 2);
    let r2 = mask_radius * mask_radius;

    let mut pixels = Vec::new();
    for (x, y, pixel) in crop.enumerate_pixels() {
        let dx = x as i32 - center_x;
        let dy = y as i32 - center_y;
        if dx * dx + dy * dy <= r2 {
            pixels.push(pixel.0[0]);
        }
    }
    pixels
}

/// Fraction of the masked interior covered by red/brown pixels, catching
/// pen marks whose gray contrast is too weak to register otherwise.
fn colored_mark_ratio(
    color: &RgbImage,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    mask_radius: i32,
) -> f32 {
    let (center_x, center_y) = (width as i32 / 2, height as i32 / 2);
    let r2 = mask_radius * mask_radius;

    let mut colored = 0u32;
    let mut total = 0u32;
    for y in 0..height {
        for x in 0..width {
            let dx = x as i32 - center_x;
            let dy = y as i32 - center_y;
            if dx * dx + dy * dy > r2 {
                continue;
            }
            total += 1;

            let pixel = color.get_pixel(left + x, top + y).0;
            if is_red_brown(pixel[0], pixel[1], pixel[2]) {
                colored += 1;
            }
        }
    }

    if total == 0 {
        0.0
    } else {
        colored as f32 / total as f32
    }
}

/// Hue in [0°, 50°] with enough saturation and value covers red, orange and
/// brown marks.
fn is_red_brown(r: u8, g: u8, b: u8) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let value = f32::from(max) / 255.0;
    if value < 0.12 {
        return false;
    }
    let saturation = if max == 0 {
        0.0
    } else {
        f32::from(delta) / f32::from(max)
    };
    if saturation < 0.15 || delta == 0 {
        return false;
    }

    // Only the red-to-yellow sector matters, where max == r and g >= b.
    if max != r || g < b {
        return false;
    }
    let hue = 60.0 * f32::from(g - b) / f32::from(delta);
    hue <= 50.0
}
