//! # OCR Error Types Module
//!
//! Failure taxonomy of the OCR worker pool and engine adapter. Input errors
//! (`FileNotFound`, `EmptyFile`, `CorruptImage`) are fatal for one image only;
//! `LowConfidence` is informational and never returned as a hard failure by
//! the pool; `PoolInitialization` is the only error that aborts a batch.

/// Custom error types for OCR operations
#[derive(Debug, Clone, PartialEq)]
pub enum OcrError {
    /// The image path does not exist
    FileNotFound(String),
    /// The image exists but has zero bytes
    EmptyFile(String),
    /// The engine could not decode the image
    CorruptImage(String),
    /// Recognition produced no text
    NoTextExtracted(String),
    /// Recognition confidence below the plausibility threshold
    LowConfidence(String),
    /// OCR engine initialization errors
    Initialization(String),
    /// No engine slot could be initialized
    PoolInitialization(String),
    /// The pool was terminated or never initialized
    PoolTerminated(String),
    /// Text extraction errors
    Extraction(String),
    /// Timeout errors
    Timeout(String),
}

impl OcrError {
    /// Stable machine-readable kind, used in per-image error results
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::FileNotFound(_) => "FileNotFound",
            OcrError::EmptyFile(_) => "EmptyFile",
            OcrError::CorruptImage(_) => "CorruptImage",
            OcrError::NoTextExtracted(_) => "NoTextExtracted",
            OcrError::LowConfidence(_) => "LowConfidence",
            OcrError::Initialization(_) => "EngineInitError",
            OcrError::PoolInitialization(_) => "PoolInitializationError",
            OcrError::PoolTerminated(_) => "PoolTerminated",
            OcrError::Extraction(_) => "ExtractionError",
            OcrError::Timeout(_) => "Timeout",
        }
    }

    /// Prefix the message with the offending file name unless it already names it
    pub fn with_file_name(self, file_name: &str) -> Self {
        let wrap = |msg: String| {
            if msg.contains(file_name) {
                msg
            } else {
                format!("{}: {}", file_name, msg)
            }
        };
        match self {
            OcrError::FileNotFound(msg) => OcrError::FileNotFound(wrap(msg)),
            OcrError::EmptyFile(msg) => OcrError::EmptyFile(wrap(msg)),
            OcrError::CorruptImage(msg) => OcrError::CorruptImage(wrap(msg)),
            OcrError::NoTextExtracted(msg) => OcrError::NoTextExtracted(wrap(msg)),
            OcrError::LowConfidence(msg) => OcrError::LowConfidence(wrap(msg)),
            OcrError::Extraction(msg) => OcrError::Extraction(wrap(msg)),
            OcrError::Timeout(msg) => OcrError::Timeout(wrap(msg)),
            other => other,
        }
    }

    /// Input errors concern a single image and never affect the pool
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            OcrError::FileNotFound(_) | OcrError::EmptyFile(_) | OcrError::CorruptImage(_)
        )
    }
}

impl std::fmt::Display for OcrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrError::FileNotFound(msg) => write!(f, "[FILE_NOT_FOUND] Image file not found: {}", msg),
            OcrError::EmptyFile(msg) => write!(f, "[EMPTY_FILE] Image file is empty: {}", msg),
            OcrError::CorruptImage(msg) => write!(f, "[CORRUPT_IMAGE] Image is corrupt or unreadable: {}", msg),
            OcrError::NoTextExtracted(msg) => write!(f, "[NO_TEXT] No text could be extracted: {}", msg),
            OcrError::LowConfidence(msg) => write!(f, "[LOW_CONFIDENCE] OCR confidence is low: {}", msg),
            OcrError::Initialization(msg) => write!(f, "[OCR_INIT] OCR engine initialization failed: {}", msg),
            OcrError::PoolInitialization(msg) => write!(f, "[POOL_INIT] OCR worker pool initialization failed: {}", msg),
            OcrError::PoolTerminated(msg) => write!(f, "[POOL_TERMINATED] OCR worker pool is not available: {}", msg),
            OcrError::Extraction(msg) => write!(f, "[OCR_EXTRACT] Text extraction from image failed: {}", msg),
            OcrError::Timeout(msg) => write!(f, "[OCR_TIMEOUT] OCR processing timed out: {}", msg),
        }
    }
}

impl std::error::Error for OcrError {}

impl From<anyhow::Error> for OcrError {
    fn from(err: anyhow::Error) -> Self {
        OcrError::Extraction(err.to_string())
    }
}
