//! # Shared Types for Image Preprocessing
//!
//! Result and error types shared across the preprocessing sub-modules.

use image::GrayImage;
use serde::Serialize;
use std::path::PathBuf;

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone)]
pub enum PreprocessingError {
    /// Image processing operation failed
    ProcessingFailed { message: String },
    /// Failed to load or decode image
    ImageLoad { message: String },
    /// Failed to write the processed image
    ImageSave { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
            PreprocessingError::ImageLoad { message } => {
                write!(f, "Failed to load image: {}", message)
            }
            PreprocessingError::ImageSave { message } => {
                write!(f, "Failed to save image: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

impl From<PreprocessingError> for crate::errors::AppError {
    fn from(err: PreprocessingError) -> Self {
        crate::errors::AppError::FileSystem(err.to_string())
    }
}

/// Result of image thresholding operation.
#[derive(Debug, Clone)]
pub struct ThresholdedImageResult {
    /// The thresholded binary image
    pub image: GrayImage,
    /// Global threshold (Otsu) or the mean offset used (adaptive)
    pub threshold: u8,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of contrast normalization.
#[derive(Debug, Clone)]
pub struct ContrastResult {
    pub image: GrayImage,
    /// Input intensity mapped to black
    pub low: u8,
    /// Input intensity mapped to white
    pub high: u8,
    pub processing_time_ms: u32,
}

/// Result of image noise reduction operation.
#[derive(Debug, Clone)]
pub struct DenoisedImageResult {
    /// The denoised image
    pub image: GrayImage,
    /// Sigma value used for the final Gaussian blur
    pub sigma: f32,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of deskewing operation.
#[derive(Debug, Clone)]
pub struct DeskewResult {
    /// The deskewed image
    pub image: GrayImage,
    /// Detected skew angle in degrees
    pub skew_angle_degrees: f32,
    /// Confidence in the deskewing result (0.0-1.0)
    pub confidence: f32,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Quarter-turn recommendation from the orientation detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationResult {
    /// 0 or 90
    pub rotation_degrees: u32,
    /// Row-profile variance of dark pixels
    pub horizontal_score: f64,
    /// Column-profile variance of dark pixels
    pub vertical_score: f64,
}

/// One preprocessing step as recorded in the report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PreprocessingStep {
    pub step: String,
    pub time_ms: u32,
    /// False when the step failed and its input was passed through
    pub applied: bool,
}

/// Outcome of the full preprocessing pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingReport {
    pub original_path: PathBuf,
    pub final_path: PathBuf,
    pub steps: Vec<PreprocessingStep>,
    /// Tags such as `contrast_normalized`, `noise_reduced`, `rotated_90deg`
    pub improvements: Vec<String>,
    pub total_time_ms: u32,
}

/// Horizontal band of an image, full width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageRegion {
    pub y: u32,
    pub height: u32,
}

/// Candidate whitespace band between two stacked receipts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorBand {
    pub start: u32,
    pub end: u32,
    pub height: u32,
    pub midpoint: u32,
}
