use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_cross_mut, draw_hollow_circle_mut};
use log::{info, warn};

use crate::align::CanonicalForm;
use crate::bubbles::BubblePositionMap;
use crate::classify::AnswerMap;

const GREEN: Rgb<u8> = Rgb([0, 170, 0]);
const RED: Rgb<u8> = Rgb([220, 0, 0]);

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes intermediate pipeline images next to the input file when enabled,
/// and does nothing at all when disabled.
pub struct ImageDebugWriter {
    input_path: Option<PathBuf>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            input_path: Some(input_path),
        }
    }

    pub const fn disabled() -> Self {
        Self { input_path: None }
    }

    fn write(&self, label: &str, image: &RgbImage) {
        let Some(base) = &self.input_path else {
            return;
        };
        let path = debug_image_path(base, label);
        match image.save(&path) {
            Ok(()) => info!("wrote debug image: {}", path.display()),
            Err(error) => warn!("failed to write {}: {}", path.display(), error),
        }
    }

    /// The rectified color canvas and its ink-as-foreground binarization.
    pub fn write_canonical(&self, form: &CanonicalForm) {
        if self.input_path.is_none() {
            return;
        }
        self.write("canonical", &form.color);
        self.write(
            "binary",
            &DynamicImage::ImageLuma8(form.binary.clone()).to_rgb8(),
        );
    }

    /// Every located bubble outlined, with a cross at its center.
    pub fn write_bubbles(&self, form: &CanonicalForm, positions: &BubblePositionMap) {
        if self.input_path.is_none() {
            return;
        }
        let mut canvas = form.color.clone();
        for position in positions.values().flat_map(|choices| choices.values()) {
            let (cx, cy) = (position.cx.round() as i32, position.cy.round() as i32);
            draw_hollow_circle_mut(&mut canvas, (cx, cy), position.radius.round() as i32, GREEN);
            draw_cross_mut(&mut canvas, GREEN, cx, cy);
        }
        self.write("bubbles", &canvas);
    }

    /// Selected answers ringed in red, everything else in green.
    pub fn write_answers(
        &self,
        form: &CanonicalForm,
        positions: &BubblePositionMap,
        answers: &AnswerMap,
    ) {
        if self.input_path.is_none() {
            return;
        }
        let mut canvas = form.color.clone();
        for (question, choices) in positions {
            let selected = answers.get(question).copied().flatten();
            for (choice, position) in choices {
                let (cx, cy) = (position.cx.round() as i32, position.cy.round() as i32);
                let radius = position.radius.round() as i32;
                if selected == Some(*choice) {
                    draw_hollow_circle_mut(&mut canvas, (cx, cy), radius + 3, RED);
                    draw_hollow_circle_mut(&mut canvas, (cx, cy), radius + 4, RED);
                } else {
                    draw_hollow_circle_mut(&mut canvas, (cx, cy), radius, GREEN);
                }
            }
        }
        self.write("answers", &canvas);
    }

    /// The upscaled name-box crop handed to OCR.
    pub fn write_name_crop(&self, crop: &RgbImage) {
        self.write("name_crop", crop);
    }
}
