//! # Image Filtering Module
//!
//! Contrast normalization, noise reduction and morphological cleanup for
//! phone photos of receipts and contracts.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::close;
use tracing;

use super::types::{ContrastResult, DenoisedImageResult, PreprocessingError};

/// Fraction of pixels clipped at each end of the histogram by the stretch
const CLIP_FRACTION: f64 = 0.01;

/// Stretches the 1st..99th intensity percentiles to the full range, applies
/// a brightness gain and sharpens with an unsharp mask.
///
/// # Arguments
///
/// * `gray` - Grayscale input
/// * `brightness` - Multiplicative gain applied after stretching (1.0 = none)
pub fn normalize_contrast(
    gray: &GrayImage,
    brightness: f32,
) -> Result<ContrastResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if gray.width() == 0 || gray.height() == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "cannot normalize an empty image".to_string(),
        });
    }
    if !(0.5..=2.0).contains(&brightness) {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("Invalid brightness gain: {}. Must be between 0.5 and 2.0", brightness),
        });
    }

    let (low, high) = percentile_bounds(gray, CLIP_FRACTION);
    let range = (high as f32 - low as f32).max(1.0);

    let stretched = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as f32;
        let normalized = ((value - low as f32) / range * 255.0).clamp(0.0, 255.0);
        Luma([(normalized * brightness).clamp(0.0, 255.0) as u8])
    });

    let sharpened = image::imageops::unsharpen(&stretched, 1.0, 2);

    let processing_time = start_time.elapsed();
    tracing::debug!(
        target: "ocr_preprocessing",
        "Contrast normalization completed in {}ms: low={}, high={}, gain={:.2}",
        processing_time.as_millis(),
        low,
        high,
        brightness
    );

    Ok(ContrastResult {
        image: sharpened,
        low,
        high,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Intensities below/above which `fraction` of the pixels fall
pub(crate) fn percentile_bounds(gray: &GrayImage, fraction: f64) -> (u8, u8) {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total = gray.width() as u64 * gray.height() as u64;
    let clip = (total as f64 * fraction) as u64;

    let mut low = 0u8;
    let mut seen = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            low = value as u8;
            break;
        }
    }

    let mut high = 255u8;
    seen = 0;
    for (value, &count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > clip {
            high = value as u8;
            break;
        }
    }

    if high <= low {
        (0, 255)
    } else {
        (low, high)
    }
}

/// Removes salt-and-pepper noise with a 3x3 median filter followed by a
/// light Gaussian blur.
///
/// # Arguments
///
/// * `gray` - The input image to denoise
/// * `sigma` - Standard deviation for Gaussian kernel (recommended: 0.5-1.5)
pub fn reduce_noise(gray: &GrayImage, sigma: f32) -> Result<DenoisedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if sigma <= 0.0 || sigma > 5.0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("Invalid sigma value: {}. Must be between 0.1 and 5.0", sigma),
        });
    }

    let median = median_filter(gray, 1, 1);
    let blurred = gaussian_blur_f32(&median, sigma);

    let processing_time = start_time.elapsed();
    tracing::debug!(
        target: "ocr_preprocessing",
        "Noise reduction completed in {}ms: sigma={:.2}, dimensions={}x{}",
        processing_time.as_millis(),
        sigma,
        blurred.width(),
        blurred.height()
    );

    Ok(DenoisedImageResult {
        image: blurred,
        sigma,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Morphological closing of the ink in a binary image (black text on white).
///
/// Bridges one-pixel breaks inside characters. The image is inverted around
/// the closing because imageproc treats non-zero pixels as foreground.
pub fn close_text_gaps(binary: &GrayImage) -> GrayImage {
    let mut inverted = binary.clone();
    image::imageops::invert(&mut inverted);

    let mut closed = close(&inverted, Norm::LInf, 1);
    image::imageops::invert(&mut closed);
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_contrast_stretches_range() {
        // Washed-out photo: everything between 100 and 150
        let img = GrayImage::from_fn(40, 40, |x, _| Luma([100 + (x as u8 % 2) * 50]));
        let result = normalize_contrast(&img, 1.0).expect("contrast normalization");

        assert_eq!(result.low, 100);
        assert_eq!(result.high, 150);
        let min = result.image.pixels().map(|p| p[0]).min().unwrap_or(255);
        let max = result.image.pixels().map(|p| p[0]).max().unwrap_or(0);
        assert!(min < 30, "min={min}");
        assert!(max > 225, "max={max}");
    }

    #[test]
    fn test_normalize_contrast_rejects_bad_gain() {
        let img = GrayImage::new(4, 4);
        assert!(normalize_contrast(&img, 3.0).is_err());
    }

    #[test]
    fn test_percentile_bounds_uniform_image() {
        let img = GrayImage::from_pixel(10, 10, Luma([200]));
        assert_eq!(percentile_bounds(&img, 0.01), (0, 255));
    }

    #[test]
    fn test_reduce_noise_removes_isolated_speck() {
        let mut img = GrayImage::from_pixel(9, 9, Luma([255]));
        img.put_pixel(4, 4, Luma([0]));

        let result = reduce_noise(&img, 0.5).expect("noise reduction");
        assert!(result.image.get_pixel(4, 4)[0] > 200);
        assert_eq!(result.sigma, 0.5);
    }

    #[test]
    fn test_reduce_noise_invalid_sigma() {
        let img = GrayImage::new(4, 4);
        assert!(reduce_noise(&img, 0.0).is_err());
        assert!(reduce_noise(&img, 6.0).is_err());
    }

    #[test]
    fn test_close_text_gaps_bridges_broken_stroke() {
        let mut img = GrayImage::from_pixel(11, 5, Luma([255]));
        for x in 1..10 {
            if x != 5 {
                img.put_pixel(x, 2, Luma([0]));
            }
        }

        let closed = close_text_gaps(&img);
        assert_eq!(closed.get_pixel(5, 2)[0], 0);
        assert_eq!(closed.get_pixel(5, 0)[0], 255);
    }
}
