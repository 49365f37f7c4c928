//! # Document Pipeline
//!
//! Drives one image, or a batch of them, through every stage:
//!
//! ```text
//! upload check → preprocessing → OCR (best preset) → geometric separation
//!   → classification → field extraction → validation / persistence
//! ```
//!
//! Failures are isolated per image: a corrupt file yields a failed
//! [`ImageResult`] while its siblings keep going. Only a batch over the file
//! count ceiling or a pool that is not running stops the whole batch.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use crate::classifier::{ClassificationResult, DocumentClassifier, DocumentType};
use crate::config::BatchConfig;
use crate::db::{store_extracted, PersistenceOutcome, PersistenceSink};
use crate::errors::{error_logging, AppError, AppResult};
use crate::extraction::{ExtractedFields, FieldExtractor, FieldIssue};
use crate::geometric_separator::{GeometricSeparator, ReprocessingRecommendation};
use crate::ocr::{check_file_size, clean_ocr_text, display_name, recognize_best, validate_image_file};
use crate::ocr_config::RecognitionParams;
use crate::ocr_errors::OcrError;
use crate::preprocessing::ImagePreprocessor;
use crate::progress::{ProgressReporter, Stage};
use crate::worker_pool::WorkerPool;

/// Machine-readable failure attached to an [`ImageResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageError {
    pub kind: String,
    pub message: String,
}

impl From<&OcrError> for ImageError {
    fn from(err: &OcrError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<&AppError> for ImageError {
    fn from(err: &AppError) -> Self {
        let kind = match err {
            AppError::Config(_) => "ConfigError",
            AppError::Validation(_) => "ValidationError",
            AppError::Database(_) => "DatabaseError",
            AppError::Ocr(_) => "OcrError",
            AppError::FileSystem(_) => "FileSystemError",
            AppError::Internal(_) => "InternalError",
        };
        Self {
            kind: kind.to_string(),
            message: err.to_string(),
        }
    }
}

/// Recognition details kept for triage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrSummary {
    pub configuration: String,
    pub quality_score: f32,
    /// Mean word confidence, 0-100
    pub confidence: f32,
    pub low_confidence: bool,
    pub geometric_separation_applied: bool,
    pub preprocessing_improvements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprocessing: Option<ReprocessingRecommendation>,
}

/// Outcome for one processed image (or one segment of a split scan)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageResult {
    pub file_name: String,
    /// Uploaded file this result came from, set for segments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ExtractedFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ImageError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<FieldIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<PersistenceOutcome>,
    pub processing_time_ms: u64,
}

impl ImageResult {
    fn failed(file_name: &str, error: ImageError, elapsed: Duration) -> Self {
        Self {
            file_name: file_name.to_string(),
            source_file: None,
            success: false,
            fields: None,
            classification: None,
            error: Some(error),
            issues: Vec::new(),
            ocr: None,
            persistence: None,
            processing_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Results of a whole batch, in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub session: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ImageResult>,
    pub processing_time_ms: u64,
}

/// One unit of work after segmentation
#[derive(Debug, Clone)]
struct WorkItem {
    path: PathBuf,
    file_name: String,
    source_file: Option<String>,
}

impl WorkItem {
    fn whole(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file_name: display_name(path),
            source_file: None,
        }
    }
}

/// Name shown for part `index` (1-based) of a split upload
pub fn segment_file_name(original: &Path, index: usize) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".to_string());
    match original.extension() {
        Some(ext) => format!("{}_parte_{}.{}", stem, index, ext.to_string_lossy()),
        None => format!("{}_parte_{}", stem, index),
    }
}

/// Owns every stage of the document flow
pub struct DocumentPipeline {
    pool: WorkerPool,
    preprocessor: ImagePreprocessor,
    separator: GeometricSeparator,
    classifier: DocumentClassifier,
    extractor: FieldExtractor,
    sink: Option<Arc<dyn PersistenceSink>>,
    progress: ProgressReporter,
    batch: BatchConfig,
}

impl DocumentPipeline {
    pub fn new(pool: WorkerPool, extractor: FieldExtractor, batch: BatchConfig) -> Self {
        Self {
            pool,
            preprocessor: ImagePreprocessor::default(),
            separator: GeometricSeparator::default(),
            classifier: DocumentClassifier::default(),
            extractor,
            sink: None,
            progress: ProgressReporter::disabled(),
            batch,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_separator(mut self, separator: GeometricSeparator) -> Self {
        self.separator = separator;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn batch_config(&self) -> &BatchConfig {
        &self.batch
    }

    /// Process a single image. Never fails: errors become a failed result.
    pub async fn process_image(&self, image_path: &Path) -> ImageResult {
        let name = display_name(image_path);
        let item = WorkItem {
            path: image_path.to_path_buf(),
            file_name: name.clone(),
            source_file: None,
        };
        self.process_item(&item, 0)
            .instrument(crate::observability::pipeline_span(&name, None))
            .await
    }

    async fn process_item(&self, item: &WorkItem, index: usize) -> ImageResult {
        let started = Instant::now();
        let mut result = match self.run_stages(item, index).await {
            Ok(result) => result,
            Err(failure) => {
                error_logging::log_document_error(&failure.message, &failure.kind, &item.file_name, Some(index));
                ImageResult::failed(&item.file_name, failure, started.elapsed())
            }
        };
        result.source_file = item.source_file.clone();
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        crate::observability::record_document_processed(result.success, started.elapsed());
        self.progress.file_done(index, started.elapsed(), result.success);
        result
    }

    /// Report a finished stage and pass its outcome through
    fn report<T>(&self, index: usize, item: &WorkItem, stage: Stage, started: Instant, outcome: Result<T, ImageError>) -> Result<T, ImageError> {
        let error = outcome.as_ref().err().map(|e| e.message.clone());
        self.progress.stage(index, &item.file_name, stage, started.elapsed(), error);
        outcome
    }

    async fn run_stages(&self, item: &WorkItem, index: usize) -> Result<ImageResult, ImageError> {
        // Upload boundary checks
        let stage_start = Instant::now();
        let checked = async {
            let size = validate_image_file(&item.path).await?;
            check_file_size(size, self.pool.config(), &item.file_name)?;
            Ok::<u64, OcrError>(size)
        }
        .await
        .map_err(|e| ImageError::from(&e));
        let size = self.report(index, item, Stage::Upload, stage_start, checked)?;
        debug!(file = %item.file_name, size, "Upload checks passed");

        // Preprocessing writes into a scratch directory removed on drop
        let stage_start = Instant::now();
        let scratch = tempfile::tempdir().map_err(|e| ImageError::from(&AppError::from(e)))?;
        let (ocr_path, improvements) = self.preprocess(&item.path, scratch.path()).await;
        self.progress
            .stage(index, &item.file_name, Stage::Preprocessing, stage_start.elapsed(), None);

        // OCR
        let stage_start = Instant::now();
        let recognized = recognize_best(&self.pool, &ocr_path, self.pool.config())
            .await
            .map_err(|e| ImageError::from(&e.with_file_name(&item.file_name)));
        let best = self.report(index, item, Stage::Ocr, stage_start, recognized)?;
        let low_confidence = best.result.is_low_confidence(self.pool.config().low_confidence_threshold);

        let (text, separation_applied) = if self.batch.geometric_separation {
            let outcome = self.separator.refine(&best.result);
            (outcome.text, outcome.improved)
        } else {
            (best.result.text.clone(), false)
        };
        let text = clean_ocr_text(&text);

        let image_size = image::image_dimensions(&ocr_path).ok();
        let truncation = self.separator.detect_truncated_words(&best.result.words, image_size);
        let reprocessing = match truncation.recommendation {
            ReprocessingRecommendation::None => None,
            other => Some(other),
        };

        // Classification
        let stage_start = Instant::now();
        let classification = self.classifier.classify(&text);
        crate::observability::record_classification(classification.document_type.as_str(), classification.confidence);
        self.progress
            .stage(index, &item.file_name, Stage::Classification, stage_start.elapsed(), None);

        // Extraction
        let stage_start = Instant::now();
        let extraction = self.extractor.extract_classified(&text, &classification);
        self.progress
            .stage(index, &item.file_name, Stage::Extraction, stage_start.elapsed(), None);

        // Validation and persistence
        let stage_start = Instant::now();
        let persisted = match &self.sink {
            Some(sink) => store_extracted(
                sink.as_ref(),
                &extraction.fields,
                &self.batch.default_user,
                self.batch.force_insert,
            )
            .await
            .map(Some)
            .map_err(|e| ImageError::from(&e)),
            None => Ok(None),
        };
        let persistence_error = persisted.as_ref().err().cloned();
        let persistence = self.report(index, item, Stage::Validation, stage_start, persisted).unwrap_or(None);

        info!(
            file = %item.file_name,
            tipo = extraction.fields.tipo.as_str(),
            classified_as = %classification.document_type,
            confidence = classification.confidence,
            issues = extraction.issues.len(),
            persisted = ?persistence.as_ref().map(PersistenceOutcome::label),
            "Document processed"
        );

        Ok(ImageResult {
            file_name: item.file_name.clone(),
            source_file: None,
            success: persistence_error.is_none(),
            fields: Some(extraction.fields),
            classification: Some(classification),
            error: persistence_error,
            issues: extraction.issues,
            ocr: Some(OcrSummary {
                configuration: best.configuration,
                quality_score: best.quality_score,
                confidence: best.result.overall_confidence,
                low_confidence,
                geometric_separation_applied: separation_applied,
                preprocessing_improvements: improvements,
                reprocessing,
            }),
            persistence,
            processing_time_ms: 0,
        })
    }

    /// Preprocessed copy of the image, or the original when preprocessing fails
    async fn preprocess(&self, image_path: &Path, out_dir: &Path) -> (PathBuf, Vec<String>) {
        let preprocessor = self.preprocessor.clone();
        let input = image_path.to_path_buf();
        let output_dir = out_dir.to_path_buf();
        let task = tokio::task::spawn_blocking(move || preprocessor.process(&input, &output_dir));

        match task.await {
            Ok(Ok(report)) => (report.final_path, report.improvements),
            Ok(Err(e)) => {
                warn!(file = %image_path.display(), "Preprocessing failed, using original image: {}", e);
                (image_path.to_path_buf(), Vec::new())
            }
            Err(e) => {
                warn!(file = %image_path.display(), "Preprocessing task crashed, using original image: {}", e);
                (image_path.to_path_buf(), Vec::new())
            }
        }
    }

    /// Split scans that hold several receipts. Contracts and anything that
    /// cannot be read quickly are kept whole.
    async fn expand(&self, path: &Path, scratch: &Path) -> Vec<WorkItem> {
        let whole = vec![WorkItem::whole(path)];
        if !self.batch.segmentation {
            return whole;
        }

        let quick = match self
            .pool
            .process(path, &RecognitionParams::quick_detection(self.pool.config()))
            .await
        {
            Ok(result) => self.classifier.quick_detect(&result.text),
            Err(e) => {
                debug!(file = %display_name(path), "Quick detection skipped: {}", e);
                return whole;
            }
        };
        if quick.document_type != DocumentType::Receipt {
            debug!(file = %display_name(path), "Contract detected, segmentation skipped");
            return whole;
        }

        let preprocessor = self.preprocessor.clone();
        let input = path.to_path_buf();
        let out_dir = scratch.to_path_buf();
        let segments = match tokio::task::spawn_blocking(move || preprocessor.segment(&input, &out_dir)).await {
            Ok(Ok(segments)) => segments,
            Ok(Err(e)) => {
                warn!(file = %display_name(path), "Segmentation failed, keeping whole image: {}", e);
                return whole;
            }
            Err(e) => {
                warn!(file = %display_name(path), "Segmentation task crashed, keeping whole image: {}", e);
                return whole;
            }
        };
        if segments.len() < 2 {
            return whole;
        }

        crate::observability::record_segmentation(segments.len());
        let source = display_name(path);
        segments
            .into_iter()
            .enumerate()
            .map(|(i, segment)| WorkItem {
                path: segment,
                file_name: segment_file_name(path, i + 1),
                source_file: Some(source.clone()),
            })
            .collect()
    }

    /// Expand every upload concurrently, at most one per pool worker at a
    /// time. Items keep the upload order.
    async fn expand_all(self: Arc<Self>, paths: &[PathBuf], scratch: &Path) -> Vec<WorkItem> {
        let permits = Arc::new(Semaphore::new(self.pool.stats().total_workers.max(1)));
        let mut expanded: Vec<Option<Vec<WorkItem>>> = vec![None; paths.len()];
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().enumerate() {
            let pipeline = Arc::clone(&self);
            let permits = Arc::clone(&permits);
            let path = path.clone();
            // One directory per upload so equal file stems never collide
            let out_dir = scratch.join(index.to_string());
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
                    warn!(file = %display_name(&path), "Scratch directory unavailable, keeping whole image: {}", e);
                    return (index, vec![WorkItem::whole(&path)]);
                }
                (index, pipeline.expand(&path, &out_dir).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, items)) => expanded[index] = Some(items),
                Err(e) => warn!("Segmentation task ended abnormally: {}", e),
            }
        }

        expanded
            .into_iter()
            .zip(paths)
            .flat_map(|(items, path)| items.unwrap_or_else(|| vec![WorkItem::whole(path)]))
            .collect()
    }

    /// Process a batch of uploaded images.
    ///
    /// Images are expanded into receipt segments first, then processed
    /// `chunk_size` at a time; the pool queues whatever exceeds its workers.
    pub async fn process_batch(self: Arc<Self>, paths: Vec<PathBuf>) -> AppResult<BatchReport> {
        let started = Instant::now();
        if paths.len() > self.batch.max_files {
            return Err(AppError::Validation(format!(
                "batch holds {} files, maximum allowed is {}",
                paths.len(),
                self.batch.max_files
            )));
        }
        if !self.pool.is_ready() {
            return Err(AppError::Ocr(
                OcrError::PoolTerminated("OCR worker pool is not running".to_string()).to_string(),
            ));
        }

        let scratch = tempfile::tempdir()?;
        let items = Arc::clone(&self).expand_all(&paths, scratch.path()).await;

        info!(
            session = %self.progress.session(),
            uploaded = paths.len(),
            items = items.len(),
            "Starting batch"
        );
        self.progress.start(items.len());

        let mut results: Vec<Option<ImageResult>> = vec![None; items.len()];
        let chunk_size = self.batch.chunk_size.max(1);
        for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
            let mut tasks = JoinSet::new();
            for (offset, item) in chunk.iter().enumerate() {
                let index = chunk_index * chunk_size + offset;
                let pipeline = Arc::clone(&self);
                let item = item.clone();
                let span = crate::observability::pipeline_span(&item.file_name, Some(index));
                tasks.spawn(
                    async move { (index, pipeline.process_item(&item, index).await) }.instrument(span),
                );
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, result)) => results[index] = Some(result),
                    Err(e) => warn!("Image task ended abnormally: {}", e),
                }
            }
        }

        let results: Vec<ImageResult> = results
            .into_iter()
            .zip(&items)
            .map(|(result, item)| {
                result.unwrap_or_else(|| {
                    let mut failed = ImageResult::failed(
                        &item.file_name,
                        ImageError {
                            kind: "InternalError".to_string(),
                            message: "processing task crashed".to_string(),
                        },
                        Duration::ZERO,
                    );
                    failed.source_file = item.source_file.clone();
                    failed
                })
            })
            .collect();

        // Scratch files go away with the directory
        drop(scratch);

        let succeeded = results.iter().filter(|r| r.success).count();
        let report = BatchReport {
            session: self.progress.session().to_string(),
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.processing_time_ms,
            "Batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(Path::new("/tmp/scan_04.jpg"), 2), "scan_04_parte_2.jpg");
        assert_eq!(segment_file_name(Path::new("recibos"), 1), "recibos_parte_1");
    }

    #[test]
    fn test_image_error_kinds() {
        let err = ImageError::from(&OcrError::CorruptImage("a.jpg".to_string()));
        assert_eq!(err.kind, "CorruptImage");

        let err = ImageError::from(&AppError::Database("down".to_string()));
        assert_eq!(err.kind, "DatabaseError");
    }

    #[test]
    fn test_failed_result_serialization_omits_empty_parts() {
        let result = ImageResult::failed(
            "a.jpg",
            ImageError {
                kind: "EmptyFile".to_string(),
                message: "a.jpg".to_string(),
            },
            Duration::from_millis(5),
        );
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "EmptyFile");
        assert!(json.get("fields").is_none());
        assert!(json.get("issues").is_none());
    }
}
