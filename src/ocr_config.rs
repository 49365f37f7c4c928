//! # OCR Configuration Module
//!
//! Configuration for the OCR worker pool and the Tesseract engine adapter:
//! language and model selection, page segmentation, the character whitelist
//! used for Spanish business documents, initialization recovery settings and
//! the recognition presets tried by the multi-configuration pass.

// Constants for OCR configuration
pub const DEFAULT_LANGUAGES: &str = "spa";
pub const MAX_FILE_SIZE: u64 = 15 * 1024 * 1024; // 15MB limit per uploaded image
pub const MAX_POOL_SIZE: usize = 4;
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 35.0;
pub const QUALITY_EARLY_EXIT: f32 = 0.85;

/// Characters Tesseract may emit for receipts and contracts
pub const SPANISH_WHITELIST: &str =
    "ABCDEFGHIJKLMNÑOPQRSTUVWXYZabcdefghijklmnñopqrstuvwxyzáéíóúÁÉÍÓÚüÜ0123456789.,:-$()/ ";

/// Vocabulary hints for the branded receipt layout
pub const RECEIPT_USER_WORDS: &[&str] = &[
    "EUROPIEL", "LASER", "CENTER", "SINERGIA", "TERESA", "IRASEMA", "POMPA", "MANDUJANO",
    "FLOR", "YANET", "ISLAS", "PIMENTEL", "NICOLE", "GUADALUPE", "RODRIGUEZ", "PEÑA",
    "CYNTHIA", "VERVER", "VARGAS", "ROMERO", "KARINA", "ELIZABETH", "CENTENO", "ADA",
    "YACUNAHIL", "JUAREZ", "OTERO", "ROSA", "MARIA", "HERNANDEZ", "ORTIZ", "MARIANA",
    "CESIN", "SASTRE", "ANTICIPO", "PAQUETE", "NUEVO", "TRANSACCION", "APROBADA",
];

/// Recovery configuration for engine initialization and recognition
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Attempts per engine slot before the slot is abandoned
    pub init_attempts: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
    /// Pause between sequential engine initializations
    pub engine_spawn_delay_ms: u64,
    /// Timeout for OCR operations in seconds
    pub operation_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            init_attempts: 3,
            base_retry_delay_ms: 1000,  // 1 second
            max_retry_delay_ms: 10000,  // 10 seconds
            engine_spawn_delay_ms: 2000,
            operation_timeout_secs: 60,
        }
    }
}

impl RecoveryConfig {
    /// Validate recovery configuration parameters
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.init_attempts == 0 {
            return Err(crate::errors::AppError::Config(
                "init_attempts must be greater than 0".to_string(),
            ));
        }
        if self.base_retry_delay_ms == 0 {
            return Err(crate::errors::AppError::Config(
                "base_retry_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(crate::errors::AppError::Config(format!(
                "max_retry_delay_ms ({}) must be >= base_retry_delay_ms ({})",
                self.max_retry_delay_ms, self.base_retry_delay_ms
            )));
        }
        if self.operation_timeout_secs == 0 {
            return Err(crate::errors::AppError::Config(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Page Segmentation Mode for Tesseract OCR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSegMode {
    /// Automatic page segmentation with OSD
    AutoOsd = 1,
    /// Fully automatic page segmentation
    Auto = 3,
    /// Assume a single column of text
    SingleColumn = 4,
    /// Assume a single uniform block of text
    #[default]
    SingleBlock = 6,
    /// Treat the image as a single text line
    SingleLine = 7,
    /// Find as much text as possible in no particular order
    SparseText = 11,
    /// Sparse text with OSD
    SparseTextOsd = 12,
}

impl PageSegMode {
    /// Convert PSM mode to string value for Tesseract
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSegMode::AutoOsd => "1",
            PageSegMode::Auto => "3",
            PageSegMode::SingleColumn => "4",
            PageSegMode::SingleBlock => "6",
            PageSegMode::SingleLine => "7",
            PageSegMode::SparseText => "11",
            PageSegMode::SparseTextOsd => "12",
        }
    }

    /// Parse the numeric form used in environment variables
    pub fn from_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(PageSegMode::AutoOsd),
            3 => Some(PageSegMode::Auto),
            4 => Some(PageSegMode::SingleColumn),
            6 => Some(PageSegMode::SingleBlock),
            7 => Some(PageSegMode::SingleLine),
            11 => Some(PageSegMode::SparseText),
            12 => Some(PageSegMode::SparseTextOsd),
            _ => None,
        }
    }
}

/// OCR engine mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Legacy engine only
    Legacy = 0,
    /// Neural net LSTM engine only
    #[default]
    Lstm = 1,
    /// Legacy + LSTM
    Combined = 2,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Legacy => "0",
            EngineMode::Lstm => "1",
            EngineMode::Combined => "2",
        }
    }
}

/// Tesseract model type for different accuracy/speed trade-offs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelType {
    /// Fast model (tessdata_fast) - faster processing, lower accuracy
    #[default]
    Fast,
    /// Best model (tessdata_best) - slower processing, higher accuracy
    Best,
}

impl ModelType {
    /// Get the tessdata directory name for this model type
    pub fn tessdata_dir(&self) -> &'static str {
        match self {
            ModelType::Fast => "tessdata_fast",
            ModelType::Best => "tessdata_best",
        }
    }
}

/// Per-call engine parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionParams {
    /// Preset name, reported as the winning configuration
    pub name: String,
    pub psm: PageSegMode,
    pub engine_mode: EngineMode,
    pub character_whitelist: Option<String>,
    pub preserve_interword_spaces: bool,
    /// Extra dictionary words written to a user-words file for the call
    pub user_words: Vec<String>,
}

impl RecognitionParams {
    /// Parameters taken straight from the OCR configuration
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            name: "default".to_string(),
            psm: config.psm_mode,
            engine_mode: config.engine_mode,
            character_whitelist: config.character_whitelist.clone(),
            preserve_interword_spaces: true,
            user_words: Vec::new(),
        }
    }

    /// Single block with the receipt vocabulary as user words
    pub fn europiel_optimized(config: &OcrConfig) -> Self {
        Self {
            name: "europiel_optimized".to_string(),
            user_words: RECEIPT_USER_WORDS.iter().map(|w| w.to_string()).collect(),
            ..Self::from_config(config)
        }
    }

    pub fn high_accuracy(config: &OcrConfig) -> Self {
        Self {
            name: "high_accuracy".to_string(),
            psm: PageSegMode::SingleBlock,
            engine_mode: EngineMode::Lstm,
            ..Self::from_config(config)
        }
    }

    /// Sparse text for photos where the block layout was lost
    pub fn sparse_text_fallback(config: &OcrConfig) -> Self {
        Self {
            name: "sparse_text_fallback".to_string(),
            psm: PageSegMode::SparseText,
            ..Self::from_config(config)
        }
    }

    /// Single pass used only to decide whether a scan should be segmented
    pub fn quick_detection(config: &OcrConfig) -> Self {
        Self {
            name: "quick_detection".to_string(),
            psm: PageSegMode::Auto,
            ..Self::from_config(config)
        }
    }

    /// Presets in the order the multi-configuration pass tries them
    pub fn presets(config: &OcrConfig) -> Vec<Self> {
        vec![
            Self::europiel_optimized(config),
            Self::high_accuracy(config),
            Self::sparse_text_fallback(config),
        ]
    }
}

/// Default worker count: one per CPU, at most four
pub fn default_pool_size() -> usize {
    num_cpus::get().clamp(1, MAX_POOL_SIZE)
}

/// Configuration structure for OCR processing
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// OCR language codes (e.g., "spa", "spa+eng")
    pub languages: String,
    /// Tesseract model type (Fast vs Best accuracy)
    pub model_type: ModelType,
    /// Maximum allowed file size in bytes
    pub max_file_size: u64,
    /// Recovery and error handling configuration
    pub recovery: RecoveryConfig,
    /// Default page segmentation mode for OCR
    pub psm_mode: PageSegMode,
    pub engine_mode: EngineMode,
    /// Character whitelist restricting output to document characters
    pub character_whitelist: Option<String>,
    /// Number of engine instances held by the worker pool
    pub pool_size: usize,
    /// Mean word confidence (0-100) below which a warning is logged
    pub low_confidence_threshold: f32,
    /// Quality score that stops the multi-configuration pass early
    pub quality_early_exit: f32,
    /// Try every recognition preset instead of only the configured one
    pub multi_config: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES.to_string(),
            model_type: ModelType::default(),
            max_file_size: MAX_FILE_SIZE,
            recovery: RecoveryConfig::default(),
            psm_mode: PageSegMode::default(),
            engine_mode: EngineMode::default(),
            character_whitelist: Some(SPANISH_WHITELIST.to_string()),
            pool_size: default_pool_size(),
            low_confidence_threshold: LOW_CONFIDENCE_THRESHOLD,
            quality_early_exit: QUALITY_EARLY_EXIT,
            multi_config: true,
        }
    }
}

impl OcrConfig {
    /// Validate OCR configuration parameters
    pub fn validate(&self) -> crate::errors::AppResult<()> {
        if self.languages.trim().is_empty() {
            return Err(crate::errors::AppError::Config(
                "languages cannot be empty".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(crate::errors::AppError::Config(
                "max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(crate::errors::AppError::Config(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.low_confidence_threshold) {
            return Err(crate::errors::AppError::Config(format!(
                "low_confidence_threshold ({}) must be between 0 and 100",
                self.low_confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.quality_early_exit) {
            return Err(crate::errors::AppError::Config(format!(
                "quality_early_exit ({}) must be between 0.0 and 1.0",
                self.quality_early_exit
            )));
        }

        self.recovery.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(unused_assignments)]
    fn test_recovery_config_validation() {
        let mut config = RecoveryConfig::default();

        assert!(config.validate().is_ok());

        config.init_attempts = 0;
        assert!(config.validate().is_err());
        config.init_attempts = 3;

        config.base_retry_delay_ms = 0;
        assert!(config.validate().is_err());
        config.base_retry_delay_ms = 1000;

        // max below base
        config.max_retry_delay_ms = 500;
        assert!(config.validate().is_err());
        config.max_retry_delay_ms = 10000;

        config.operation_timeout_secs = 0;
        assert!(config.validate().is_err());
        config.operation_timeout_secs = 60;
    }

    #[test]
    #[allow(unused_assignments)]
    fn test_ocr_config_validation() {
        let mut config = OcrConfig::default();
        assert!(config.validate().is_ok());

        config.languages = "  ".to_string();
        assert!(config.validate().is_err());
        config.languages = "spa".to_string();

        config.pool_size = 0;
        assert!(config.validate().is_err());
        config.pool_size = 2;

        config.quality_early_exit = 1.5;
        assert!(config.validate().is_err());
        config.quality_early_exit = 0.85;

        config.low_confidence_threshold = 120.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_pool_size_is_bounded() {
        let size = default_pool_size();
        assert!((1..=MAX_POOL_SIZE).contains(&size));
    }

    #[test]
    fn test_defaults_match_document_tuning() {
        let config = OcrConfig::default();
        assert_eq!(config.languages, "spa");
        assert_eq!(config.psm_mode, PageSegMode::SingleBlock);
        assert_eq!(config.engine_mode, EngineMode::Lstm);
        assert_eq!(config.max_file_size, 15 * 1024 * 1024);
        let whitelist = config
            .character_whitelist
            .as_ref()
            .expect("default whitelist is set");
        assert!(whitelist.contains('Ñ'));
        assert!(whitelist.contains('$'));
    }

    #[test]
    fn test_page_seg_mode_round_trip() {
        for mode in [PageSegMode::SingleBlock, PageSegMode::SparseText, PageSegMode::AutoOsd] {
            let number: u8 = mode.as_str().parse().expect("numeric psm");
            assert_eq!(PageSegMode::from_number(number), Some(mode));
        }
        assert_eq!(PageSegMode::from_number(13), None);
    }

    #[test]
    fn test_presets_order_and_modes() {
        let config = OcrConfig::default();
        let presets = RecognitionParams::presets(&config);
        let names: Vec<&str> = presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["europiel_optimized", "high_accuracy", "sparse_text_fallback"]
        );
        assert!(presets[0].user_words.contains(&"EUROPIEL".to_string()));
        assert_eq!(presets[2].psm, PageSegMode::SparseText);
        assert!(presets.iter().all(|p| p.preserve_interword_spaces));
    }

    #[test]
    fn test_model_type_dirs() {
        assert_eq!(ModelType::Fast.tessdata_dir(), "tessdata_fast");
        assert_eq!(ModelType::Best.tessdata_dir(), "tessdata_best");
    }
}
