//! # OCR Processing Module
//!
//! Engine-independent OCR types and helpers: the recognition result model
//! (`RawOcrResult`, `WordBox`), the `OcrEngine`/`EngineFactory` seams used by
//! the worker pool, input file validation, retry backoff, the text quality
//! score and the multi-configuration recognition pass.
//!
//! ## Multi-configuration recognition
//!
//! Scanned receipts vary a lot in quality, so [`recognize_best`] runs the
//! recognition presets from [`RecognitionParams::presets`] in order and keeps
//! the result with the highest [`evaluate_ocr_quality`] score. A score above
//! the configured early-exit threshold stops the pass.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use crate::errors::error_logging;
use crate::ocr_config::{OcrConfig, RecognitionParams};
use crate::ocr_errors::OcrError;
use crate::worker_pool::WorkerPool;

/// Pixel rectangle of a recognized word, `x1`/`y1` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BoundingBox {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }
}

/// One word as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordBox {
    pub text: String,
    /// Word confidence, 0-100
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub line_index: usize,
}

/// Output of one recognition call. Never mutated after the engine returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOcrResult {
    pub text: String,
    pub words: Vec<WordBox>,
    /// Mean text confidence, 0-100
    pub overall_confidence: f32,
}

impl RawOcrResult {
    /// Confidence normalized to 0.0-1.0
    pub fn normalized_confidence(&self) -> f32 {
        (self.overall_confidence / 100.0).clamp(0.0, 1.0)
    }

    pub fn is_low_confidence(&self, threshold: f32) -> bool {
        self.overall_confidence < threshold
    }
}

/// A single OCR engine instance. Calls block; the pool runs them on the
/// blocking thread pool and guarantees exclusive access.
pub trait OcrEngine: Send {
    fn recognize(
        &mut self,
        image_path: &Path,
        params: &RecognitionParams,
    ) -> Result<RawOcrResult, OcrError>;
}

/// Creates engine instances for the worker pool, one per slot
pub trait EngineFactory: Send + Sync {
    fn create(&self, slot: usize) -> Result<Box<dyn OcrEngine>, OcrError>;
}

/// File name used in error messages
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Validate that an image exists, is a regular file and is not empty.
///
/// Returns the file size in bytes.
pub async fn validate_image_file(image_path: &Path) -> Result<u64, OcrError> {
    let name = display_name(image_path);
    let metadata = match tokio::fs::metadata(image_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OcrError::FileNotFound(name));
        }
        Err(e) => {
            return Err(OcrError::CorruptImage(format!(
                "{}: cannot read file metadata - {}",
                name, e
            )));
        }
    };

    if !metadata.is_file() {
        return Err(OcrError::FileNotFound(format!("{} is not a regular file", name)));
    }
    if metadata.len() == 0 {
        return Err(OcrError::EmptyFile(name));
    }

    Ok(metadata.len())
}

/// Check the size ceiling enforced at the upload boundary
pub fn check_file_size(size: u64, config: &OcrConfig, name: &str) -> Result<(), OcrError> {
    if size > config.max_file_size {
        return Err(OcrError::CorruptImage(format!(
            "{}: file too large ({} bytes, maximum allowed: {} bytes)",
            name, size, config.max_file_size
        )));
    }
    Ok(())
}

/// Trim lines and drop empty ones
pub fn clean_ocr_text(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Calculate retry delay in milliseconds with exponential backoff and jitter.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random(0, delay/4)
/// ```
pub fn calculate_retry_delay(attempt: u32, recovery: &crate::ocr_config::RecoveryConfig) -> u64 {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = recovery
        .base_retry_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(recovery.max_retry_delay_ms);

    let jitter_range = delay / 4;
    if jitter_range == 0 {
        return delay;
    }
    delay + rand::random::<u64>() % jitter_range
}

const QUALITY_KEYWORDS: &[&str] = &[
    "EUROPIEL", "LASER", "CENTER", "SINERGIA", "RECIBO", "PAGO",
    "TRANSACCION", "APROBADA", "FOLIO", "FECHA", "CANTIDAD", "CONCEPTO",
];

lazy_static! {
    static ref QUALITY_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("valid date pattern"),
        Regex::new(r"Q\d{2}-\d{4}").expect("valid folio pattern"),
        Regex::new(r"\$[\d,]+\.?\d*").expect("valid amount pattern"),
        Regex::new(r"\d{4}\s*\d{4}\s*\d{4}\s*\d{4}").expect("valid card pattern"),
    ];
    static ref STRANGE_CHARS: Regex =
        Regex::new(r#"[^a-zA-ZáéíóúüñÁÉÍÓÚÜÑ0-9\s.,;:!?()$\-"'/]"#).expect("valid strange-char pattern");
    static ref FRAGMENTATION: Regex = Regex::new(r"\s{3,}|\n{2,}").expect("valid fragmentation pattern");
}

/// Score a recognition result in `[0, 1]` from its confidence (0.0-1.0) and
/// text features: length, domain keywords, structural patterns, strange
/// characters and fragmentation.
pub fn evaluate_ocr_quality(text: &str, confidence: f32) -> f32 {
    let length = text.chars().count();
    if length == 0 {
        return 0.0;
    }
    let length_f = length as f32;

    let mut score = confidence;

    score += (length_f / 500.0).min(0.2);

    let upper = text.to_uppercase();
    let keywords_found = QUALITY_KEYWORDS
        .iter()
        .filter(|keyword| upper.contains(*keyword))
        .count();
    score += keywords_found as f32 / QUALITY_KEYWORDS.len() as f32 * 0.15;

    let patterns_found = QUALITY_PATTERNS.iter().filter(|p| p.is_match(text)).count();
    score += patterns_found as f32 / QUALITY_PATTERNS.len() as f32 * 0.1;

    let strange = STRANGE_CHARS.find_iter(text).count() as f32;
    score -= (strange / length_f * 2.0).min(0.25);

    let fragments = FRAGMENTATION.find_iter(text).count() as f32;
    score -= (fragments / length_f * 100.0).min(0.15);

    let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    if lines > 0 {
        let average_line = length_f / lines as f32;
        if average_line > 20.0 && average_line < 100.0 {
            score += 0.05;
        }
    }

    score.clamp(0.0, 1.0)
}

/// Winning result of the multi-configuration pass
#[derive(Debug, Clone)]
pub struct BestRecognition {
    pub result: RawOcrResult,
    pub quality_score: f32,
    pub configuration: String,
    pub processing_time: Duration,
}

/// Run the recognition presets through the pool and keep the best result.
///
/// Input errors (missing, empty or corrupt file) abort immediately since no
/// other preset can succeed on the same file. Other per-preset failures are
/// logged and the next preset is tried.
pub async fn recognize_best(
    pool: &WorkerPool,
    image_path: &Path,
    config: &OcrConfig,
) -> Result<BestRecognition, OcrError> {
    recognize_presets(pool, image_path, config)
        .instrument(crate::observability::ocr_span("recognize_best"))
        .await
}

async fn recognize_presets(
    pool: &WorkerPool,
    image_path: &Path,
    config: &OcrConfig,
) -> Result<BestRecognition, OcrError> {
    let start_time = Instant::now();
    let name = display_name(image_path);
    let presets = if config.multi_config {
        RecognitionParams::presets(config)
    } else {
        vec![RecognitionParams::from_config(config)]
    };

    let mut best: Option<(RawOcrResult, f32, String)> = None;
    let mut last_error: Option<OcrError> = None;

    for params in presets {
        match pool.process(image_path, &params).await {
            Ok(result) => {
                let quality = evaluate_ocr_quality(&result.text, result.normalized_confidence());
                debug!(
                    file = %name,
                    configuration = %params.name,
                    confidence = result.overall_confidence,
                    quality,
                    "Recognition preset finished"
                );

                let better = best
                    .as_ref()
                    .map_or(true, |(_, best_quality, _)| quality > *best_quality);
                if better && !result.text.trim().is_empty() {
                    best = Some((result, quality, params.name.clone()));
                }

                if quality > config.quality_early_exit {
                    info!(file = %name, configuration = %params.name, "Excellent OCR quality, skipping remaining presets");
                    break;
                }
            }
            Err(err) if err.is_input_error() || matches!(err, OcrError::PoolTerminated(_)) => {
                error_logging::log_ocr_error(
                    &err,
                    "recognize_best",
                    Some(&name),
                    None,
                    Some(start_time.elapsed()),
                );
                crate::observability::record_ocr_operation(false, start_time.elapsed());
                return Err(err);
            }
            Err(err) => {
                warn!(file = %name, configuration = %params.name, "Recognition preset failed: {err}");
                last_error = Some(err);
            }
        }
    }

    let processing_time = start_time.elapsed();
    match best {
        Some((result, quality_score, configuration)) => {
            crate::observability::record_ocr_operation(true, processing_time);
            info!(
                "OCR completed for {} in {}ms using {} (quality {:.2})",
                name,
                processing_time.as_millis(),
                configuration,
                quality_score
            );
            Ok(BestRecognition {
                result,
                quality_score,
                configuration,
                processing_time,
            })
        }
        None => {
            crate::observability::record_ocr_operation(false, processing_time);
            let err = last_error.unwrap_or_else(|| OcrError::NoTextExtracted(name.clone()));
            error_logging::log_ocr_error(&err, "recognize_best", Some(&name), None, Some(processing_time));
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr_config::RecoveryConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_calculate_retry_delay_ranges() {
        let config = RecoveryConfig::default();
        let d1 = calculate_retry_delay(1, &config);
        let d2 = calculate_retry_delay(2, &config);
        let d3 = calculate_retry_delay(3, &config);
        assert!((1000..1250).contains(&d1));
        assert!((2000..2500).contains(&d2));
        assert!((4000..5000).contains(&d3));
        // capped
        assert!(calculate_retry_delay(10, &config) < 12_500);
    }

    #[test]
    fn test_retry_delay_with_tiny_base_does_not_divide_by_zero() {
        let config = RecoveryConfig {
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
            ..RecoveryConfig::default()
        };
        assert_eq!(calculate_retry_delay(1, &config), 1);
    }

    #[test]
    fn test_clean_ocr_text() {
        let raw = "  Recibo de Pago  \n\n   Folio: Q22-1234 \n \n";
        assert_eq!(clean_ocr_text(raw), "Recibo de Pago\nFolio: Q22-1234");
    }

    #[test]
    fn test_quality_empty_text_is_zero() {
        assert_eq!(evaluate_ocr_quality("", 0.9), 0.0);
    }

    #[test]
    fn test_quality_rewards_domain_text() {
        let receipt = "EUROPIEL LASER CENTER SINERGIA\nRecibo de Pago Folio: Q22-5237\nFecha: 25/05/2025 la cantidad de $1,500.00\npor concepto de ANTICIPO";
        let noise = "x§¤ ¶¶ ~~ ^^ ¤¤";
        let good = evaluate_ocr_quality(receipt, 0.7);
        let bad = evaluate_ocr_quality(noise, 0.7);
        assert!(good > 0.7, "good score was {good}");
        assert!(bad < good);
        assert!(good <= 1.0);
    }

    #[tokio::test]
    async fn test_validate_image_file_errors() {
        let missing = Path::new("/definitely/not/here/recibo.png");
        assert_eq!(
            validate_image_file(missing).await,
            Err(OcrError::FileNotFound("recibo.png".to_string()))
        );

        let empty = NamedTempFile::new().expect("temp file");
        let err = validate_image_file(empty.path()).await.expect_err("empty file");
        assert_eq!(err.kind(), "EmptyFile");

        let mut filled = NamedTempFile::new().expect("temp file");
        filled.write_all(b"not really an image").expect("write");
        assert_eq!(validate_image_file(filled.path()).await, Ok(19));
    }

    #[test]
    fn test_check_file_size() {
        let config = OcrConfig::default();
        assert!(check_file_size(1024, &config, "a.jpg").is_ok());
        assert!(check_file_size(16 * 1024 * 1024, &config, "a.jpg").is_err());
    }

    #[test]
    fn test_bounding_box_dimensions() {
        let bbox = BoundingBox::new(10, 20, 60, 45);
        assert_eq!(bbox.width(), 50);
        assert_eq!(bbox.height(), 25);
    }
}
