use std::fmt;
use std::path::{Path, PathBuf};

use image::{imageops, RgbImage};
use log::{info, warn};
use logging_timer::time;
use serde::Serialize;

use crate::align::{align, CanonicalForm};
use crate::bubbles::locate;
use crate::classify::{classify_all, AnswerMap};
use crate::config::ScanConfig;
use crate::debug::ImageDebugWriter;
use crate::grade::{grade, GradingResult};
use crate::roster::best_match;

/// Name used when no roster entry could be attributed to the sheet.
pub const UNKNOWN_STUDENT: &str = "UNKNOWN";

/// Smallest width the name crop is handed to OCR at; narrower crops are
/// upscaled first.
const MIN_NAME_CROP_WIDTH: u32 = 400;

#[derive(Debug)]
pub enum ScanError {
    ImageOpen(PathBuf),
    Alignment(String),
    InsufficientBubbles { found: usize, expected: usize },
    MissingQuestion(u32),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ImageOpen(path) => write!(f, "could not open image: {}", path.display()),
            Self::Alignment(reason) => write!(f, "sheet alignment failed: {}", reason),
            Self::InsufficientBubbles { found, expected } => write!(
                f,
                "located only {} of {} expected bubbles",
                found, expected
            ),
            Self::MissingQuestion(question) => {
                write!(f, "no bubbles located for question {}", question)
            }
        }
    }
}

#[derive(Debug)]
pub enum NameReadError {
    /// No OCR backend is available in this environment.
    Unavailable,
    /// The backend ran but could not produce text.
    Failed(String),
}

/// Source of OCR text for the handwritten name crop.
///
/// The pipeline itself performs no OCR; production wires in a vision-API
/// client here, tests wire in stubs, and `OfflineNameReader` covers
/// air-gapped operation.
pub trait NameReader: Sync {
    fn read_name(&self, name_crop: &RgbImage) -> Result<String, NameReadError>;
}

/// Always reports OCR as unavailable, degrading the sheet to
/// `UNKNOWN`/needs-review so grading still proceeds.
pub struct OfflineNameReader;

impl NameReader for OfflineNameReader {
    fn read_name(&self, _name_crop: &RgbImage) -> Result<String, NameReadError> {
        Err(NameReadError::Unavailable)
    }
}

/// Everything known about one scanned sheet, serialized as the scan's JSON
/// output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub student_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_ocr: Option<String>,
    /// Set when the sheet needs a human pass, e.g. the name could not be
    /// attributed to anyone on the roster.
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<AnswerMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grading: Option<GradingResult>,
}

impl ScanReport {
    fn failure(error: &ScanError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            student_name: UNKNOWN_STUDENT.to_string(),
            name_confidence: None,
            raw_ocr: None,
            needs_review: true,
            answers: None,
            grading: None,
        }
    }
}

struct NameDetection {
    student_name: String,
    name_confidence: Option<f32>,
    raw_ocr: Option<String>,
    needs_review: bool,
}

/// Run the full pipeline on a raw photograph: align, locate bubbles,
/// classify marks and read the name, then grade.
///
/// Pipeline errors are folded into a failure report rather than propagated,
/// so a batch scan never stops on one bad sheet.
#[time]
pub fn scan_sheet(
    frame: &RgbImage,
    config: &ScanConfig,
    name_reader: &dyn NameReader,
    debug: &ImageDebugWriter,
) -> ScanReport {
    match scan_sheet_inner(frame, config, name_reader, debug) {
        Ok(report) => report,
        Err(error) => {
            warn!("scan failed: {}", error);
            ScanReport::failure(&error)
        }
    }
}

fn scan_sheet_inner(
    frame: &RgbImage,
    config: &ScanConfig,
    name_reader: &dyn NameReader,
    debug: &ImageDebugWriter,
) -> Result<ScanReport, ScanError> {
    let form = align(frame, &config.geometry)?;
    debug.write_canonical(&form);

    let positions = locate(&form.gray, &config.geometry, &config.locator)?;
    debug.write_bubbles(&form, &positions);

    let answers = classify_all(&form, &positions, &config.geometry, &config.classifier)?;
    let name = detect_name(&form, config, name_reader, debug);
    debug.write_answers(&form, &positions, &answers);

    let grading = grade(&answers, &config.answer_key);
    info!(
        "scanned sheet for {}: {}/{}",
        name.student_name, grading.correct, grading.total_questions
    );

    Ok(ScanReport {
        success: true,
        error: None,
        student_name: name.student_name,
        name_confidence: name.name_confidence,
        raw_ocr: name.raw_ocr,
        needs_review: name.needs_review,
        answers: Some(answers),
        grading: Some(grading),
    })
}

/// Load one image file and scan it.
#[time]
pub fn scan_image_file(
    path: &Path,
    config: &ScanConfig,
    name_reader: &dyn NameReader,
    debug: bool,
) -> ScanReport {
    let frame = match image::open(path) {
        Ok(img) => img.into_rgb8(),
        Err(_) => return ScanReport::failure(&ScanError::ImageOpen(path.to_path_buf())),
    };

    let writer = if debug {
        ImageDebugWriter::new(path.to_path_buf())
    } else {
        ImageDebugWriter::disabled()
    };

    scan_sheet(&frame, config, name_reader, &writer)
}

/// Crop the name box, run it through OCR and attribute it to the roster.
///
/// OCR failure or a roster miss never fails the scan; the report degrades to
/// `UNKNOWN` with `needs_review` set.
#[time]
fn detect_name(
    form: &CanonicalForm,
    config: &ScanConfig,
    name_reader: &dyn NameReader,
    debug: &ImageDebugWriter,
) -> NameDetection {
    let (x, y, width, height) = config
        .geometry
        .name_region
        .to_pixels(form.color.width(), form.color.height());
    let mut crop = imageops::crop_imm(&form.color, x, y, width, height).to_image();
    if crop.width() > 0 && crop.width() < MIN_NAME_CROP_WIDTH {
        let scale = MIN_NAME_CROP_WIDTH as f32 / crop.width() as f32;
        crop = imageops::resize(
            &crop,
            MIN_NAME_CROP_WIDTH,
            (crop.height() as f32 * scale).round() as u32,
            imageops::FilterType::CatmullRom,
        );
    }
    debug.write_name_crop(&crop);

    let raw_ocr = match name_reader.read_name(&crop) {
        Ok(text) => text,
        Err(error) => {
            warn!("name OCR unavailable for this sheet: {:?}", error);
            return NameDetection {
                student_name: UNKNOWN_STUDENT.to_string(),
                name_confidence: None,
                raw_ocr: None,
                needs_review: true,
            };
        }
    };

    match best_match(&raw_ocr, &config.roster) {
        Some((name, score)) => NameDetection {
            student_name: name.to_string(),
            name_confidence: Some(score),
            raw_ocr: Some(raw_ocr),
            needs_review: false,
        },
        None => NameDetection {
            student_name: UNKNOWN_STUDENT.to_string(),
            name_confidence: None,
            raw_ocr: Some(raw_ocr),
            needs_review: true,
        },
    }
}
