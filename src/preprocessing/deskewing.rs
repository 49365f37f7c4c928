//! # Image Deskewing Module
//!
//! Orientation detection (quarter turns) and small-angle skew correction
//! using projection profile analysis on the ink pixels.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use tracing;

use super::types::{DeskewResult, OrientationResult, PreprocessingError};

/// Pixels darker than this count as ink
const INK_LEVEL: u8 = 128;

/// Column variance must exceed row variance by this factor before a 90° turn
const VERTICAL_DOMINANCE: f64 = 1.5;

/// Skew below this many degrees is left alone
const MIN_CORRECTION_DEGREES: f32 = 0.5;

/// Decide whether the text runs vertically.
///
/// Horizontal text lines produce a row profile that alternates between ink
/// and blank rows, so its variance is high. When the column profile varies
/// much more than the row profile the page is lying on its side.
pub fn detect_orientation(gray: &GrayImage) -> OrientationResult {
    let (width, height) = gray.dimensions();
    let mut rows = vec![0u32; height as usize];
    let mut cols = vec![0u32; width as usize];

    for (x, y, pixel) in gray.enumerate_pixels() {
        if pixel[0] < INK_LEVEL {
            rows[y as usize] += 1;
            cols[x as usize] += 1;
        }
    }

    let horizontal_score = profile_variance(&rows);
    let vertical_score = profile_variance(&cols);
    let rotation_degrees = if horizontal_score > 0.0 && vertical_score > horizontal_score * VERTICAL_DOMINANCE {
        90
    } else {
        0
    };

    tracing::debug!(
        target: "ocr_preprocessing",
        "Orientation analysis: rows={:.1}, cols={:.1}, rotation={}",
        horizontal_score,
        vertical_score,
        rotation_degrees
    );

    OrientationResult {
        rotation_degrees,
        horizontal_score,
        vertical_score,
    }
}

/// Rotate by the recommended quarter turn
pub fn apply_orientation(gray: &GrayImage, orientation: &OrientationResult) -> GrayImage {
    match orientation.rotation_degrees {
        90 => image::imageops::rotate90(gray),
        _ => gray.clone(),
    }
}

fn profile_variance(profile: &[u32]) -> f64 {
    if profile.is_empty() {
        return 0.0;
    }
    let n = profile.len() as f64;
    let mean = profile.iter().map(|&v| v as f64).sum::<f64>() / n;
    profile.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Detects and corrects text skew of up to ±10°.
///
/// Expects a binarized (or at least high-contrast) image.
pub fn deskew_image(gray: &GrayImage) -> Result<DeskewResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    let (skew_angle, confidence) = detect_skew_angle(gray)?;

    if skew_angle.abs() < MIN_CORRECTION_DEGREES {
        tracing::debug!(
            target: "ocr_preprocessing",
            "Skew angle {:.2}° is below threshold, skipping deskewing",
            skew_angle
        );

        return Ok(DeskewResult {
            image: gray.clone(),
            skew_angle_degrees: skew_angle,
            confidence: 0.0,
            processing_time_ms: start_time.elapsed().as_millis() as u32,
        });
    }

    // Rotate opposite to the detected skew, filling exposed corners with paper white
    let rotated = rotate_about_center(
        gray,
        (-skew_angle).to_radians(),
        Interpolation::Bilinear,
        Luma([255u8]),
    );

    let processing_time = start_time.elapsed();
    tracing::debug!(
        target: "ocr_preprocessing",
        "Deskewing completed in {}ms: corrected {:.2}° skew",
        processing_time.as_millis(),
        skew_angle
    );

    Ok(DeskewResult {
        image: rotated,
        skew_angle_degrees: skew_angle,
        confidence,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Coarse search over ±10° in 0.5° steps, then 0.1° refinement around the
/// best angle. The angle whose projection is sharpest (highest variance)
/// aligns the text lines with the rows.
fn detect_skew_angle(gray: &GrayImage) -> Result<(f32, f32), PreprocessingError> {
    let ink = ink_points(gray);
    if ink.is_empty() {
        return Err(PreprocessingError::ProcessingFailed {
            message: "no ink pixels to estimate skew".to_string(),
        });
    }

    let height = gray.height();
    let mut best_angle = 0.0f32;
    let mut best_variance = f64::MIN;

    for step in -20..=20 {
        let angle = step as f32 * 0.5;
        let variance = projection_variance(&ink, height, angle);
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    let coarse = best_angle;
    for step in 0..=10 {
        let angle = coarse - 0.5 + step as f32 * 0.1;
        let variance = projection_variance(&ink, height, angle);
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    let baseline = projection_variance(&ink, height, 0.0);
    let confidence = if best_variance > 0.0 {
        ((best_variance - baseline) / best_variance).clamp(0.0, 1.0) as f32
    } else {
        0.0
    };

    Ok((best_angle, confidence))
}

/// Ink coordinates, subsampled on large images
fn ink_points(gray: &GrayImage) -> Vec<(f32, f32)> {
    let (width, height) = gray.dimensions();
    let stride = if width as u64 * height as u64 > 4_000_000 { 2 } else { 1 };

    let mut points = Vec::new();
    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            if gray.get_pixel(x, y)[0] < INK_LEVEL {
                points.push((x as f32, y as f32));
            }
        }
    }
    points
}

fn projection_variance(points: &[(f32, f32)], height: u32, angle_degrees: f32) -> f64 {
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    // Rotated rows can extend beyond the image; pad by the full height
    let offset = height as f32;
    let mut bins = vec![0u32; (height as usize) * 3 + 1];

    for &(x, y) in points {
        let projected = y * cos - x * sin + offset;
        if projected >= 0.0 {
            let index = projected as usize;
            if index < bins.len() {
                bins[index] += 1;
            }
        }
    }

    profile_variance(&bins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_lines(width: u32, height: u32) -> GrayImage {
        // Thick horizontal "lines of text" every 20px, broken into words
        GrayImage::from_fn(width, height, |x, y| {
            if y % 20 < 4 && x % 30 < 24 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_detect_orientation_horizontal_text() {
        let result = detect_orientation(&text_lines(200, 200));
        assert_eq!(result.rotation_degrees, 0);
        assert!(result.horizontal_score > result.vertical_score);
    }

    #[test]
    fn test_detect_orientation_sideways_text() {
        let sideways = image::imageops::rotate90(&text_lines(200, 200));
        let result = detect_orientation(&sideways);
        assert_eq!(result.rotation_degrees, 90);

        let fixed = apply_orientation(&sideways, &result);
        assert_eq!(detect_orientation(&fixed).rotation_degrees, 0);
    }

    #[test]
    fn test_detect_orientation_blank_page() {
        let blank = GrayImage::from_pixel(50, 50, Luma([255]));
        assert_eq!(detect_orientation(&blank).rotation_degrees, 0);
    }

    #[test]
    fn test_deskew_straight_text_is_untouched() {
        let img = text_lines(200, 120);
        let result = deskew_image(&img).expect("deskew");
        assert!(result.skew_angle_degrees.abs() < MIN_CORRECTION_DEGREES);
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_deskew_detects_known_skew() {
        let img = text_lines(300, 200);
        let skewed = rotate_about_center(&img, 4.0f32.to_radians(), Interpolation::Nearest, Luma([255u8]));

        let result = deskew_image(&skewed).expect("deskew");
        assert!(
            (result.skew_angle_degrees - 4.0).abs() < 1.0,
            "detected {}",
            result.skew_angle_degrees
        );
    }

    #[test]
    fn test_deskew_blank_image_fails() {
        let blank = GrayImage::from_pixel(20, 20, Luma([255]));
        assert!(deskew_image(&blank).is_err());
    }
}
