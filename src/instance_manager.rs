//! # Tesseract Engine Module
//!
//! Tesseract-backed implementation of [`OcrEngine`] and the factory the
//! worker pool uses to create one engine per slot. Each engine owns its own
//! `LepTess` instance; the pool guarantees that only one caller uses a given
//! instance at a time, so no locking happens here.

use lazy_static::lazy_static;
use leptess::LepTess;
use regex::Regex;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::ocr::{clean_ocr_text, display_name, BoundingBox, EngineFactory, OcrEngine, RawOcrResult, WordBox};
use crate::ocr_config::{ModelType, OcrConfig, RecognitionParams};
use crate::ocr_errors::OcrError;

/// Creates [`TesseractEngine`] instances from an [`OcrConfig`]
#[derive(Debug, Clone)]
pub struct TesseractFactory {
    config: OcrConfig,
    tessdata_path: Option<String>,
}

impl TesseractFactory {
    pub fn new(config: OcrConfig) -> Self {
        let tessdata_path = get_tessdata_path(config.model_type);
        Self {
            config,
            tessdata_path,
        }
    }
}

impl EngineFactory for TesseractFactory {
    fn create(&self, slot: usize) -> Result<Box<dyn OcrEngine>, OcrError> {
        info!(
            "Creating OCR engine #{} for languages: {} with model: {}",
            slot,
            self.config.languages,
            self.config.model_type.tessdata_dir()
        );

        let tess = LepTess::new(self.tessdata_path.as_deref(), &self.config.languages)
            .map_err(|e| OcrError::Initialization(format!("engine #{}: {}", slot, e)))?;

        Ok(Box::new(TesseractEngine { slot, tess }))
    }
}

/// One Tesseract instance
pub struct TesseractEngine {
    slot: usize,
    tess: LepTess,
}

impl TesseractEngine {
    fn apply_params(&mut self, params: &RecognitionParams) -> Result<Option<tempfile::NamedTempFile>, OcrError> {
        let set = |tess: &mut LepTess, var: leptess::Variable, value: &str, label: &str| {
            tess.set_variable(var, value)
                .map_err(|e| OcrError::Initialization(format!("Failed to set {}: {}", label, e)))
        };

        set(&mut self.tess, leptess::Variable::TesseditPagesegMode, params.psm.as_str(), "PSM mode")?;
        set(
            &mut self.tess,
            leptess::Variable::TesseditOcrEngineMode,
            params.engine_mode.as_str(),
            "engine mode",
        )?;
        set(
            &mut self.tess,
            leptess::Variable::PreserveInterwordSpaces,
            if params.preserve_interword_spaces { "1" } else { "0" },
            "interword spacing",
        )?;
        if let Some(whitelist) = &params.character_whitelist {
            set(&mut self.tess, leptess::Variable::TesseditCharWhitelist, whitelist, "character whitelist")?;
        }

        if params.user_words.is_empty() {
            return Ok(None);
        }

        // Tesseract only reads user words from a file
        let mut words_file = tempfile::NamedTempFile::new()
            .map_err(|e| OcrError::Initialization(format!("Failed to create user words file: {}", e)))?;
        words_file
            .write_all(params.user_words.join("\n").as_bytes())
            .map_err(|e| OcrError::Initialization(format!("Failed to write user words file: {}", e)))?;
        let words_path = words_file.path().to_string_lossy().into_owned();
        set(&mut self.tess, leptess::Variable::UserWordsFile, &words_path, "user words file")?;
        Ok(Some(words_file))
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &mut self,
        image_path: &Path,
        params: &RecognitionParams,
    ) -> Result<RawOcrResult, OcrError> {
        let name = display_name(image_path);
        let _words_file = self.apply_params(params)?;

        self.tess
            .set_image(image_path)
            .map_err(|e| classify_engine_error(&name, &e.to_string()))?;

        let text = self
            .tess
            .get_utf8_text()
            .map_err(|e| classify_engine_error(&name, &e.to_string()))?;

        let words = match self.tess.get_hocr_text(0) {
            Ok(hocr) => parse_hocr_words(&hocr),
            Err(e) => {
                warn!(file = %name, "hOCR output unavailable, continuing without word boxes: {e}");
                Vec::new()
            }
        };

        let overall_confidence = self.tess.mean_text_conf() as f32;
        debug!(
            engine = self.slot,
            file = %name,
            configuration = %params.name,
            words = words.len(),
            confidence = overall_confidence,
            "Tesseract recognition finished"
        );

        Ok(RawOcrResult {
            text: clean_ocr_text(&text),
            words,
            overall_confidence,
        })
    }
}

/// Map an engine failure message onto the input-error taxonomy
pub fn classify_engine_error(file_name: &str, message: &str) -> OcrError {
    let lower = message.to_lowercase();
    if lower.contains("truncated file")
        || lower.contains("error attempting to read image")
        || lower.contains("read image")
        || lower.contains("pix")
    {
        OcrError::CorruptImage(format!("{}: {}", file_name, message))
    } else {
        OcrError::Extraction(format!("{}: {}", file_name, message))
    }
}

lazy_static! {
    static ref HOCR_SPAN: Regex = Regex::new(
        r#"<span class=['"](ocr_line|ocr_header|ocr_caption|ocr_textfloat|ocrx_word)['"][^>]*?title=['"]([^'"]*)['"][^>]*>"#
    )
    .expect("valid hOCR span pattern");
    static ref HOCR_BBOX: Regex =
        Regex::new(r"bbox (-?\d+) (-?\d+) (-?\d+) (-?\d+)").expect("valid hOCR bbox pattern");
    static ref HOCR_WCONF: Regex = Regex::new(r"x_wconf (\d+)").expect("valid hOCR confidence pattern");
    static ref HTML_TAG: Regex = Regex::new(r"<[^>]+>").expect("valid tag pattern");
}

/// Parse word boxes out of Tesseract hOCR output.
///
/// Words inherit the index of the last `ocr_line`-like span opened before
/// them. Words whose text is empty after unescaping are skipped.
pub fn parse_hocr_words(hocr: &str) -> Vec<WordBox> {
    let mut words = Vec::new();
    let mut line_index: Option<usize> = None;

    for caps in HOCR_SPAN.captures_iter(hocr) {
        let class = &caps[1];
        let title = &caps[2];
        let Some(whole) = caps.get(0) else { continue };

        if class != "ocrx_word" {
            line_index = Some(line_index.map_or(0, |i| i + 1));
            continue;
        }

        let Some(bbox) = HOCR_BBOX.captures(title) else { continue };
        let coord = |i: usize| bbox[i].parse::<i32>().unwrap_or(0);
        let confidence = HOCR_WCONF
            .captures(title)
            .and_then(|c| c[1].parse::<f32>().ok())
            .unwrap_or(0.0);

        let rest = &hocr[whole.end()..];
        let inner = rest.find("</span>").map_or(rest, |end| &rest[..end]);
        let text = unescape_html(&HTML_TAG.replace_all(inner, ""));
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        words.push(WordBox {
            text: text.to_string(),
            confidence,
            bounding_box: BoundingBox::new(coord(1), coord(2), coord(3), coord(4)),
            line_index: line_index.unwrap_or(0),
        });
    }

    words
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Get the tessdata path for the specified model type
///
/// Falls back to Tesseract's compiled-in default when none of the common
/// installation directories exist.
fn get_tessdata_path(model_type: ModelType) -> Option<String> {
    let dir = model_type.tessdata_dir();
    let possible_paths = [
        format!("/usr/share/tesseract-ocr/5/{}", dir),
        format!("/usr/share/tesseract-ocr/4.00/{}", dir),
        format!("/usr/share/{}", dir),
        format!("/usr/local/share/{}", dir),
    ];

    for path in possible_paths {
        if Path::new(&path).exists() {
            info!("Using tessdata path: {}", path);
            return Some(path);
        }
    }

    info!(
        "No specific tessdata path found for model type {:?}, using default",
        model_type
    );
    None
}
