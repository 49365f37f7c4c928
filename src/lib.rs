//! # Recibo OCR
//!
//! OCR pipeline for scanned Spanish receipts and service contracts: image
//! preprocessing, a pooled Tesseract engine, document classification and
//! field extraction into records ready for the `papeleria` table.

pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod geometric_separator;
pub mod instance_manager;
pub mod name_repair;
pub mod normalizer;
pub mod observability;
pub mod observability_config;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod pipeline;
pub mod preprocessing;
pub mod progress;
pub mod worker_pool;

// Re-export types for easier access
pub use classifier::{ClassificationResult, DocumentClassifier, DocumentType};
pub use extraction::{DocumentKind, ExtractedFields, FieldExtractor};
pub use pipeline::{DocumentPipeline, ImageResult};
