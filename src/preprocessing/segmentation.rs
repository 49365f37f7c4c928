//! # Receipt Segmentation Module
//!
//! Splits a tall scan holding two stacked receipts into one image per
//! receipt, cutting along a clear horizontal whitespace band.

use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::{ImageRegion, PreprocessingError, SeparatorBand};

/// Pixels brighter than this count as paper
const LIGHT_PIXEL: u8 = 230;
/// Pixels darker than this count as ink for density checks
const INK_PIXEL: u8 = 200;
/// A row is blank when this fraction of it is paper
const BLANK_ROW_RATIO: f64 = 0.85;
const MIN_BAND_PX: u32 = 15;
const MIN_BAND_RATIO: f64 = 0.008;
/// Both halves of a split must be at least this tall
const MIN_REGION_HEIGHT: u32 = 200;
const MIN_REGION_DENSITY: f64 = 0.05;

/// Quarter-density fallback only applies to very tall scans
const TALL_IMAGE_HEIGHT: u32 = 3500;
const QUARTER_CONTENT_DENSITY: f64 = 0.08;
const QUARTER_GAP_DENSITY: f64 = 0.03;

/// Runs of blank rows at least `max(15, 0.8% of height)` tall
pub fn find_separator_bands(gray: &GrayImage) -> Vec<SeparatorBand> {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let min_band = MIN_BAND_PX.max((height as f64 * MIN_BAND_RATIO) as u32);
    let mut bands = Vec::new();
    let mut run_start: Option<u32> = None;

    for y in 0..=height {
        let blank = y < height && {
            let light = (0..width).filter(|&x| gray.get_pixel(x, y)[0] > LIGHT_PIXEL).count();
            light as f64 / width as f64 > BLANK_ROW_RATIO
        };

        match (blank, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                let band_height = y - start;
                if band_height >= min_band {
                    bands.push(SeparatorBand {
                        start,
                        end: y,
                        height: band_height,
                        midpoint: start + band_height / 2,
                    });
                }
                run_start = None;
            }
            _ => {}
        }
    }

    bands
}

/// Fraction of ink pixels inside a full-width region
pub fn region_density(gray: &GrayImage, region: ImageRegion) -> f64 {
    let width = gray.width();
    let end = (region.y + region.height).min(gray.height());
    if width == 0 || end <= region.y {
        return 0.0;
    }

    let mut ink = 0u64;
    for y in region.y..end {
        for x in 0..width {
            if gray.get_pixel(x, y)[0] < INK_PIXEL {
                ink += 1;
            }
        }
    }
    ink as f64 / (width as u64 * (end - region.y) as u64) as f64
}

/// Decide how to split the image into receipt regions.
///
/// Returns a single full-height region when no confident split exists.
pub fn detect_receipt_regions(gray: &GrayImage) -> Vec<ImageRegion> {
    let height = gray.height();
    let whole = vec![ImageRegion { y: 0, height }];
    if height < MIN_REGION_HEIGHT * 2 {
        return whole;
    }

    if let Some(regions) = split_on_band(gray) {
        return regions;
    }
    if let Some(regions) = split_by_quarters(gray) {
        return regions;
    }
    whole
}

fn split_on_band(gray: &GrayImage) -> Option<Vec<ImageRegion>> {
    let height = gray.height();
    let center = height as f64 / 2.0;

    // Prefer bands near the middle; taller bands are more trustworthy
    let best = find_separator_bands(gray)
        .into_iter()
        .filter(|band| band.start >= MIN_REGION_HEIGHT && height - band.end >= MIN_REGION_HEIGHT)
        .min_by(|a, b| {
            let score = |band: &SeparatorBand| (band.midpoint as f64 - center).abs() / band.height as f64;
            score(a).total_cmp(&score(b))
        })?;

    let top = ImageRegion { y: 0, height: best.start };
    let bottom = ImageRegion {
        y: best.end,
        height: height - best.end,
    };

    let top_density = region_density(gray, top);
    let bottom_density = region_density(gray, bottom);
    debug!(
        band_start = best.start,
        band_end = best.end,
        top_density,
        bottom_density,
        "Evaluated whitespace separator"
    );

    if top_density > MIN_REGION_DENSITY && bottom_density > MIN_REGION_DENSITY {
        Some(vec![top, bottom])
    } else {
        None
    }
}

fn split_by_quarters(gray: &GrayImage) -> Option<Vec<ImageRegion>> {
    let height = gray.height();
    if height <= TALL_IMAGE_HEIGHT {
        return None;
    }

    let quarter = height / 4;
    let densities: Vec<f64> = (0..4)
        .map(|i| region_density(gray, ImageRegion { y: i * quarter, height: quarter }))
        .collect();

    let top = (densities[0] + densities[1]) / 2.0;
    let bottom = (densities[2] + densities[3]) / 2.0;
    let gap_in_middle = densities[1] < QUARTER_GAP_DENSITY || densities[2] < QUARTER_GAP_DENSITY;

    if top > QUARTER_CONTENT_DENSITY && bottom > QUARTER_CONTENT_DENSITY && gap_in_middle {
        let middle = height / 2;
        Some(vec![
            ImageRegion { y: 0, height: middle },
            ImageRegion {
                y: middle,
                height: height - middle,
            },
        ])
    } else {
        None
    }
}

/// Split `image_path` into receipt images written to `out_dir`.
///
/// When the scan holds a single receipt the original path is returned
/// untouched. Segment files are named `<stem>_receipt_<n>.png`, numbered
/// from 1 top to bottom.
pub fn segment_receipts(image_path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PreprocessingError> {
    let gray = image::open(image_path)
        .map_err(|e| PreprocessingError::ImageLoad {
            message: format!("{}: {}", image_path.display(), e),
        })?
        .to_luma8();

    let regions = detect_receipt_regions(&gray);
    if regions.len() < 2 {
        return Ok(vec![image_path.to_path_buf()]);
    }

    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".to_string());

    let mut outputs = Vec::with_capacity(regions.len());
    for (index, region) in regions.iter().enumerate() {
        let segment = image::imageops::crop_imm(&gray, 0, region.y, gray.width(), region.height).to_image();
        let path = out_dir.join(format!("{}_receipt_{}.png", stem, index + 1));
        segment.save(&path).map_err(|e| PreprocessingError::ImageSave {
            message: format!("{}: {}", path.display(), e),
        })?;
        outputs.push(path);
    }

    info!(
        file = %image_path.display(),
        segments = outputs.len(),
        "Split scan into separate receipts"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Two inked blocks separated by a white band
    fn two_receipts(height: u32, band: std::ops::Range<u32>) -> GrayImage {
        GrayImage::from_fn(400, height, |x, y| {
            if band.contains(&y) {
                Luma([255])
            } else if (y % 12 < 4) && (x % 10 < 7) {
                Luma([20])
            } else {
                Luma([245])
            }
        })
    }

    #[test]
    fn test_find_separator_bands() {
        let img = two_receipts(800, 388..420);
        let bands = find_separator_bands(&img);
        // Text rows interleave short blank runs (8px) that are below the minimum
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].start, 388);
        assert_eq!(bands[0].end, 420);
    }

    #[test]
    fn test_detect_two_receipts() {
        let img = two_receipts(800, 388..420);
        let regions = detect_receipt_regions(&img);
        assert_eq!(
            regions,
            vec![ImageRegion { y: 0, height: 388 }, ImageRegion { y: 420, height: 380 }]
        );
    }

    #[test]
    fn test_band_too_close_to_edge_is_ignored() {
        let img = two_receipts(800, 100..140);
        assert_eq!(detect_receipt_regions(&img).len(), 1);
    }

    #[test]
    fn test_blank_half_is_not_a_receipt() {
        let img = GrayImage::from_fn(400, 800, |x, y| {
            if y < 380 && y % 12 < 4 && x % 10 < 7 {
                Luma([20])
            } else {
                Luma([255])
            }
        });
        assert_eq!(detect_receipt_regions(&img).len(), 1);
    }

    #[test]
    fn test_region_density() {
        let img = GrayImage::from_fn(10, 10, |x, _| if x < 5 { Luma([0]) } else { Luma([255]) });
        let density = region_density(&img, ImageRegion { y: 0, height: 10 });
        assert!((density - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_segment_receipts_writes_parts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("lote.png");
        two_receipts(800, 388..420).save(&source).expect("save fixture");

        let parts = segment_receipts(&source, dir.path()).expect("segmentation");
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("lote_receipt_1.png"));
        assert!(parts[1].ends_with("lote_receipt_2.png"));
        let first = image::open(&parts[0]).expect("open part").to_luma8();
        assert_eq!(first.height(), 388);
    }

    #[test]
    fn test_segment_single_receipt_returns_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("uno.png");
        GrayImage::from_fn(300, 300, |x, y| if (x + y) % 7 == 0 { Luma([0]) } else { Luma([255]) })
            .save(&source)
            .expect("save fixture");

        let parts = segment_receipts(&source, dir.path()).expect("segmentation");
        assert_eq!(parts, vec![source]);
    }
}
