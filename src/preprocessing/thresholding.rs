//! # Image Thresholding Module
//!
//! Binarization for OCR preprocessing: Otsu's global threshold and a
//! mean-based local adaptive threshold for unevenly lit phone photos.

use image::{GrayImage, Luma};
use tracing;

use super::types::{PreprocessingError, ThresholdedImageResult};

/// Applies Otsu's thresholding algorithm to convert an image to binary (black/white).
///
/// The threshold maximizes the between-class variance of the intensity
/// histogram. Text ends up as black pixels on a white background.
pub fn apply_otsu_threshold(gray: &GrayImage) -> Result<ThresholdedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot threshold an empty image".to_string(),
        });
    }

    let mut histogram = [0u32; 256];
    let total_pixels = (gray.width() as f64) * (gray.height() as f64);

    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let optimal_threshold = find_otsu_threshold(&histogram, total_pixels);

    let mut binary_img = GrayImage::new(gray.width(), gray.height());
    for (x, y, pixel) in gray.enumerate_pixels() {
        let binary_value = if pixel[0] > optimal_threshold { 255u8 } else { 0u8 };
        binary_img.put_pixel(x, y, Luma([binary_value]));
    }

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "ocr_preprocessing",
        "Otsu thresholding completed in {}ms: threshold={}, dimensions={}x{}",
        processing_time.as_millis(),
        optimal_threshold,
        gray.width(),
        gray.height()
    );

    Ok(ThresholdedImageResult {
        image: binary_img,
        threshold: optimal_threshold,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Finds the optimal threshold using Otsu's method by maximizing between-class variance.
pub(crate) fn find_otsu_threshold(histogram: &[u32; 256], total_pixels: f64) -> u8 {
    let mut cumulative_sums = [0f64; 256];
    let mut cumulative_weighted_sums = [0f64; 256];

    let mut cumulative_sum = 0f64;
    let mut cumulative_weighted_sum = 0f64;
    for (i, &count) in histogram.iter().enumerate() {
        cumulative_sum += count as f64;
        cumulative_weighted_sum += (i as f64) * count as f64;
        cumulative_sums[i] = cumulative_sum;
        cumulative_weighted_sums[i] = cumulative_weighted_sum;
    }

    let mut max_variance = 0f64;
    let mut optimal_threshold = 128u8; // uniform images keep the midpoint

    let total_weighted_sum = cumulative_weighted_sums[255];

    for threshold in 1..255usize {
        let w0 = cumulative_sums[threshold] / total_pixels;
        let w1 = 1.0 - w0;
        if w0 == 0.0 || w1 <= 0.0 {
            continue;
        }

        let background = cumulative_sums[threshold];
        let foreground = cumulative_sums[255] - background;
        if foreground <= 0.0 {
            continue;
        }

        let mu0 = cumulative_weighted_sums[threshold] / background;
        let mu1 = (total_weighted_sum - cumulative_weighted_sums[threshold]) / foreground;

        let variance = w0 * w1 * (mu0 - mu1).powi(2);
        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = threshold as u8;
        }
    }

    optimal_threshold
}

/// Local mean adaptive threshold.
///
/// A pixel becomes black when it is darker than the mean of its
/// `block_size × block_size` neighbourhood minus `offset`. Uses a summed-area
/// table so the cost does not depend on the block size.
pub fn apply_adaptive_threshold(
    gray: &GrayImage,
    block_size: u32,
    offset: i32,
) -> Result<ThresholdedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if block_size < 3 || block_size % 2 == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("block_size must be odd and >= 3, got {}", block_size),
        });
    }

    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot threshold an empty image".to_string(),
        });
    }

    // (w+1) x (h+1) summed-area table
    let stride = width as usize + 1;
    let mut integral = vec![0u64; stride * (height as usize + 1)];
    for y in 0..height as usize {
        let mut row_sum = 0u64;
        for x in 0..width as usize {
            row_sum += gray.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let radius = (block_size / 2) as i64;
    let mut binary = GrayImage::new(width, height);
    for y in 0..height as i64 {
        let y0 = (y - radius).max(0) as usize;
        let y1 = (y + radius + 1).min(height as i64) as usize;
        for x in 0..width as i64 {
            let x0 = (x - radius).max(0) as usize;
            let x1 = (x + radius + 1).min(width as i64) as usize;

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((y1 - y0) * (x1 - x0)) as i64;
            let mean = sum as i64 / count.max(1);

            let value = gray.get_pixel(x as u32, y as u32)[0] as i64;
            let out = if value > mean - offset as i64 { 255u8 } else { 0u8 };
            binary.put_pixel(x as u32, y as u32, Luma([out]));
        }
    }

    let processing_time = start_time.elapsed();
    tracing::debug!(
        target: "ocr_preprocessing",
        "Adaptive thresholding completed in {}ms: block={}, offset={}",
        processing_time.as_millis(),
        block_size,
        offset
    );

    Ok(ThresholdedImageResult {
        image: binary,
        threshold: offset.clamp(0, 255) as u8,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tone(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Luma([25])
            } else {
                Luma([225])
            }
        })
    }

    #[test]
    fn test_apply_otsu_threshold_simple_image() {
        let result = apply_otsu_threshold(&two_tone(10, 10)).expect("otsu on two-tone image");

        assert!((25..225).contains(&result.threshold));
        for pixel in result.image.pixels() {
            assert!(pixel[0] == 0 || pixel[0] == 255);
        }
        assert_eq!(result.image.get_pixel(0, 0)[0], 0);
        assert_eq!(result.image.get_pixel(9, 9)[0], 255);
    }

    #[test]
    fn test_find_otsu_threshold_uniform_histogram_keeps_midpoint() {
        let mut histogram = [0u32; 256];
        histogram[128] = 100;
        assert_eq!(find_otsu_threshold(&histogram, 100.0), 128);
    }

    #[test]
    fn test_otsu_rejects_empty_image() {
        assert!(apply_otsu_threshold(&GrayImage::new(0, 0)).is_err());
    }

    #[test]
    fn test_adaptive_threshold_handles_gradient_lighting() {
        // Dark text stroke on a background that brightens left to right
        let img = GrayImage::from_fn(60, 20, |x, y| {
            let background = 90 + (x * 2) as u8;
            if y == 10 {
                Luma([background.saturating_sub(60)])
            } else {
                Luma([background])
            }
        });

        let result = apply_adaptive_threshold(&img, 11, 2).expect("adaptive threshold");
        // Stroke is black everywhere, background white everywhere
        for x in 0..60 {
            assert_eq!(result.image.get_pixel(x, 10)[0], 0, "stroke at x={x}");
            assert_eq!(result.image.get_pixel(x, 2)[0], 255, "background at x={x}");
        }
    }

    #[test]
    fn test_adaptive_threshold_rejects_even_block() {
        assert!(apply_adaptive_threshold(&two_tone(10, 10), 10, 2).is_err());
    }
}
