//! # Image Preprocessing Module
//!
//! Prepares photographed receipts and contracts for OCR.
//!
//! The module is organized into focused sub-modules:
//! - `filtering`: Contrast normalization, noise reduction and morphology
//! - `thresholding`: Otsu and local adaptive binarization
//! - `deskewing`: Quarter-turn orientation and small-angle skew correction
//! - `segmentation`: Splitting scans that hold two stacked receipts
//! - `types`: Shared types and error definitions
//!
//! [`ImagePreprocessor::process`] chains the steps. A failing step is logged
//! and skipped, so the output is never worse than the input.

pub mod deskewing;
pub mod filtering;
pub mod segmentation;
pub mod thresholding;
pub mod types;

pub use types::{
    ImageRegion, OrientationResult, PreprocessingError, PreprocessingReport, PreprocessingStep,
    SeparatorBand, ThresholdedImageResult,
};

pub use deskewing::{apply_orientation, deskew_image, detect_orientation};
pub use filtering::{close_text_gaps, normalize_contrast, reduce_noise};
pub use segmentation::{detect_receipt_regions, segment_receipts};
pub use thresholding::{apply_adaptive_threshold, apply_otsu_threshold};

use image::GrayImage;
use std::path::Path;
use tracing::{info, warn};

/// Binarization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarizationMethod {
    Otsu,
    /// Local mean threshold, robust to uneven lighting
    Adaptive,
}

/// Tuning knobs for [`ImagePreprocessor`]
#[derive(Debug, Clone)]
pub struct PreprocessingConfig {
    pub normalize_contrast: bool,
    pub brightness: f32,
    pub reduce_noise: bool,
    pub noise_sigma: f32,
    pub binarize: bool,
    pub binarization: BinarizationMethod,
    pub adaptive_block_size: u32,
    pub adaptive_offset: i32,
    pub detect_orientation: bool,
    pub deskew: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            normalize_contrast: true,
            brightness: 1.1,
            reduce_noise: true,
            noise_sigma: 0.5,
            binarize: true,
            binarization: BinarizationMethod::Adaptive,
            adaptive_block_size: 11,
            adaptive_offset: 2,
            detect_orientation: true,
            deskew: true,
        }
    }
}

/// Runs the preprocessing chain on image files
#[derive(Debug, Clone, Default)]
pub struct ImagePreprocessor {
    config: PreprocessingConfig,
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    /// Preprocess `image_path` and write the result as PNG into `out_dir`.
    ///
    /// Only a load or save failure is an error; every intermediate step
    /// falls back to its input.
    pub fn process(&self, image_path: &Path, out_dir: &Path) -> Result<PreprocessingReport, PreprocessingError> {
        let start_time = std::time::Instant::now();

        let mut current = image::open(image_path)
            .map_err(|e| PreprocessingError::ImageLoad {
                message: format!("{}: {}", image_path.display(), e),
            })?
            .to_luma8();

        let mut steps = Vec::new();
        let mut improvements = Vec::new();

        if self.config.normalize_contrast {
            let brightness = self.config.brightness;
            if run_step(&mut current, &mut steps, "contrast", |img| {
                normalize_contrast(img, brightness).map(|r| r.image)
            }) {
                improvements.push("contrast_normalized".to_string());
            }
        }

        if self.config.reduce_noise {
            let sigma = self.config.noise_sigma;
            if run_step(&mut current, &mut steps, "noise_reduction", |img| {
                reduce_noise(img, sigma).map(|r| r.image)
            }) {
                improvements.push("noise_reduced".to_string());
            }
        }

        if self.config.binarize {
            let method = self.config.binarization;
            let (block, offset) = (self.config.adaptive_block_size, self.config.adaptive_offset);
            if run_step(&mut current, &mut steps, "binarization", |img| {
                let thresholded = match method {
                    BinarizationMethod::Otsu => apply_otsu_threshold(img)?,
                    BinarizationMethod::Adaptive => apply_adaptive_threshold(img, block, offset)?,
                };
                Ok(close_text_gaps(&thresholded.image))
            }) {
                improvements.push("binarized".to_string());
            }
        }

        if self.config.detect_orientation {
            let step_start = std::time::Instant::now();
            let orientation = detect_orientation(&current);
            if orientation.rotation_degrees == 90 {
                current = apply_orientation(&current, &orientation);
                improvements.push("rotated_90deg".to_string());
            }
            steps.push(PreprocessingStep {
                step: "orientation".to_string(),
                time_ms: step_start.elapsed().as_millis() as u32,
                applied: orientation.rotation_degrees != 0,
            });
        }

        if self.config.deskew {
            let mut corrected = false;
            run_step(&mut current, &mut steps, "deskew", |img| {
                let result = deskew_image(img)?;
                corrected = result.confidence > 0.0;
                Ok(result.image)
            });
            if corrected {
                improvements.push("deskewed".to_string());
            }
        }

        let stem = image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let final_path = out_dir.join(format!("{}_processed.png", stem));
        current.save(&final_path).map_err(|e| PreprocessingError::ImageSave {
            message: format!("{}: {}", final_path.display(), e),
        })?;

        let total_time_ms = start_time.elapsed().as_millis() as u32;
        info!(
            file = %image_path.display(),
            steps = steps.len(),
            improvements = ?improvements,
            duration_ms = total_time_ms,
            "Image preprocessing completed"
        );

        Ok(PreprocessingReport {
            original_path: image_path.to_path_buf(),
            final_path,
            steps,
            improvements,
            total_time_ms,
        })
    }

    /// Split a scan holding stacked receipts; see [`segment_receipts`]
    pub fn segment(&self, image_path: &Path, out_dir: &Path) -> Result<Vec<std::path::PathBuf>, PreprocessingError> {
        segment_receipts(image_path, out_dir)
    }
}

/// Apply one step in place. On failure the image is left as it was and the
/// step is recorded as not applied. Returns whether the step succeeded.
fn run_step<F>(current: &mut GrayImage, steps: &mut Vec<PreprocessingStep>, name: &str, step: F) -> bool
where
    F: FnOnce(&GrayImage) -> Result<GrayImage, PreprocessingError>,
{
    let step_start = std::time::Instant::now();
    let applied = match step(&*current) {
        Ok(image) => {
            *current = image;
            true
        }
        Err(e) => {
            warn!(step = name, "Preprocessing step failed, keeping previous image: {}", e);
            false
        }
    };

    steps.push(PreprocessingStep {
        step: name.to_string(),
        time_ms: step_start.elapsed().as_millis() as u32,
        applied,
    });
    applied
}
