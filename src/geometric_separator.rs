//! # Geometric Word Separator
//!
//! Rebuilds line text from word bounding boxes, inserting spaces where the
//! horizontal gap between boxes says the engine glued two words together.
//! The rebuilt text only replaces the engine text when it passes a quality
//! gate; otherwise the original is kept untouched.
//!
//! Also flags words that look cut off at the image edge or by OCR, so the
//! caller can re-run recognition on a padded region or ask for review.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::ocr::{BoundingBox, RawOcrResult, WordBox};

/// Minimum line tolerance in pixels
const MIN_Y_TOLERANCE: f64 = 10.0;
/// Gaps below this are OCR coordinate errors
const GAP_FLOOR: f64 = -200.0;
const MIN_SPACE_THRESHOLD: f64 = 5.0;
/// Gaps wider than this already read as separate words
const NAME_GAP_ALREADY_SEPARATED: f64 = 15.0;
const NAME_GAP_VERY_SMALL: f64 = 10.0;
const QUALITY_GATE: f64 = 0.7;

lazy_static! {
    static ref NAME_SHAPES: Vec<Regex> = vec![
        Regex::new(r"^[A-Z]{4,}$").expect("valid name shape pattern"),
        Regex::new(r"^[A-Z]+[a-z]*[A-Z]+").expect("valid name shape pattern"),
        Regex::new(r"^[A-Z]{2,}[A-Z]{4,}$").expect("valid name shape pattern"),
    ];

    static ref JOINED_SURNAMES: Vec<Regex> = vec![
        Regex::new(
            r"(?i)(HERNANDEZ|GONZALEZ|RODRIGUEZ|MARTINEZ|LOPEZ|GARCIA|PEREZ|SANCHEZ|RAMIREZ|TORRES|FLORES|RIVERA|GOMEZ|DIAZ|MORALES|CRUZ|REYES|GUTIERREZ|RUIZ|MENDOZA|CASTILLO|JIMENEZ|VARGAS|RAMOS|HERRERA|MEDINA|CASTRO|ORTIZ|RUBIO|MARQUEZ|LEON|MORENO|CABRERA|GUERRERO|PRIETO|LOZANO|CORTEZ|SILVA|ROMERO|SUAREZ|BERNAL|DELGADO|ROJAS|GUZMAN|SOTO|VEGA|RIOS|MENDEZ|CONTRERAS|AGUILAR|MALDONADO|VALDEZ|VAZQUEZ|VILLANUEVA|PACHECO|CARDENAS|ESPINOZA|DOMINGUEZ|SANDOVAL|AYALA|FIGUEROA|SALINAS|PENA|CERVANTES|NAVARRO|ACOSTA|CAMPOS|ESTRADA|OROZCO|ORTEGA|VELASCO|SERRANO)(ASCENCIO|SOTO|VEGA|CRUZ|RAMOS|SILVA|LUNA|PENA|AVILA|CANO|MEZA|SALAS|BANDA|NAVA|TREVINO|VILLA|PARRA|OSORIO|BLANCO|TREJO|BARRON|SOSA|MARIN|CORONADO|HINOJOSA|MONTES|ROSALES|GARZA|VALDEZ)$"
        )
        .expect("valid joined surname pattern"),
        Regex::new(r"(?i)SOSA(ASCENCIO|AVILA|CRUZ|LUNA|VEGA|SILVA|RAMOS)").expect("valid joined surname pattern"),
        Regex::new(r"(?i)GARCIA(LOPEZ|PEREZ|MARTINEZ)").expect("valid joined surname pattern"),
        Regex::new(r"(?i)MARTINEZ(RODRIGUEZ|GONZALEZ|HERNANDEZ)").expect("valid joined surname pattern"),
        Regex::new(r"(?i)GONZALEZ(GARCIA|LOPEZ|MARTINEZ)").expect("valid joined surname pattern"),
    ];

    static ref KNOWN_JOINED_NAMES: Regex = Regex::new(
        r"(?i)DANIELASOSA|SOSAASCENCIO|MARIAHERNANDEZ|ROSAVEGA|GARCIALOPEZ|MARTINEZRODRIGUEZ|GONZALEZGARCIA|HERNANDEZPEREZ"
    )
    .expect("valid known joined name pattern");

    static ref GENERAL_JOINED_NAME: Regex = Regex::new(r"[A-Z]{2,}[A-Z]{4,}").expect("valid joined name pattern");
    static ref ALL_CAPS: Regex = Regex::new(r"^[A-Z]+$").expect("valid all caps pattern");
    static ref CAPITALIZED: Regex = Regex::new(r"^[A-Z][a-z]+$").expect("valid capitalized pattern");

    static ref TRUNCATION_SHAPES: Vec<(Regex, &'static str, TruncationPriority)> = vec![
        (
            Regex::new(r"(?i)^[A-Z]{5,8}[^AEIOUÁÉÍÓÚ]$").expect("valid truncation pattern"),
            "ends in a consonant after 5+ letters",
            TruncationPriority::High,
        ),
        (
            Regex::new(r"(?i)^[A-Z]+[RLNM]$").expect("valid truncation pattern"),
            "ends in R, L, N or M",
            TruncationPriority::Medium,
        ),
        (
            Regex::new(r"(?i)^[A-Z]+[^O]LL$").expect("valid truncation pattern"),
            "ends in LL without a final O",
            TruncationPriority::High,
        ),
        (
            Regex::new(r"(?i)^[A-Z]{3,}[^AEIOUÁÉÍÓÚ]{2,}$").expect("valid truncation pattern"),
            "several trailing consonants",
            TruncationPriority::Medium,
        ),
        (
            Regex::new(r"(?i)^[A-Z]{8,}[BCDFGHJKLMNPQRSTVWXYZ]$").expect("valid truncation pattern"),
            "long word ending in a consonant",
            TruncationPriority::High,
        ),
    ];
}

/// Surnames that OCR commonly cuts short
const COMMON_TRUNCATIONS: &[&str] = &["CARRILL", "CASTILL", "MORILL", "ROBERT", "ALBERT", "HUMBERT"];

/// Summary statistics of a list of gaps or widths
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GapStatistics {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl GapStatistics {
    /// Values at or below -200px are dropped as coordinate errors
    pub fn from_values(values: &[f64]) -> Self {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| *v > GAP_FLOOR).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        Self {
            mean,
            std_dev: variance.sqrt(),
            median,
            q1: sorted[(n as f64 * 0.25) as usize],
            q3: sorted[((n as f64 * 0.75) as usize).min(n - 1)],
            min: sorted[0],
            max: sorted[n - 1],
            count: n,
        }
    }
}

/// Quality assessment of a rebuilt text against the engine text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub spaces_added: i64,
    pub change_ratio: f64,
    pub quality_score: f64,
    pub original_word_count: usize,
    pub geometric_word_count: usize,
    pub has_known_name_pattern: bool,
    pub joined_matches: usize,
}

/// Result of the refinement pass
#[derive(Debug, Clone, Serialize)]
pub struct SeparationOutcome {
    /// Text to use downstream: rebuilt when `improved`, else the original
    pub text: String,
    pub improved: bool,
    pub words_analyzed: usize,
    pub lines: usize,
    pub metrics: QualityMetrics,
}

/// Aggregate box geometry of the recognized words
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundingBoxStats {
    pub total_words: usize,
    pub avg_width: f64,
    pub avg_height: f64,
    pub avg_area: f64,
    pub min_width: i32,
    pub max_width: i32,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TruncationPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationAction {
    None,
    ExtendRight,
    ExtendLeft,
    ReprocessWord,
}

/// A word that looks cut off
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TruncatedWord {
    pub index: usize,
    pub word: String,
    pub reason: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub action: TruncationAction,
    pub priority: TruncationPriority,
}

/// A word that is readable but odd enough to mention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousWord {
    pub index: usize,
    pub word: String,
    pub pattern: String,
    pub confidence: f32,
}

/// Padded region to feed back into recognition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReocrRegion {
    pub word: String,
    pub original: BoundingBox,
    pub extended: BoundingBox,
    pub action: TruncationAction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReprocessingRecommendation {
    None,
    SelectiveReocr {
        message: String,
        estimated_time_ms: u64,
        regions: Vec<ReocrRegion>,
    },
    ManualReview {
        message: String,
        words: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TruncationReport {
    pub truncated_words: Vec<TruncatedWord>,
    pub suspicious: Vec<SuspiciousWord>,
    /// True when any truncated word has high priority
    pub needs_reprocessing: bool,
    pub recommendation: ReprocessingRecommendation,
}

/// Tuning for the truncation detector
#[derive(Debug, Clone)]
pub struct SeparatorConfig {
    pub truncation_detection: bool,
    /// Words closer than this to the left/right image edge count as cut
    pub edge_threshold: i32,
    /// Words below this confidence are suspicious
    pub confidence_threshold: f32,
    /// Words below this confidence count as cut
    pub truncation_confidence: f32,
    /// Padding around re-OCR regions
    pub region_padding: i32,
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            truncation_detection: true,
            edge_threshold: 50,
            confidence_threshold: 60.0,
            truncation_confidence: 40.0,
            region_padding: 20,
        }
    }
}

/// Bounding-box based word separation and truncation analysis
#[derive(Debug, Clone, Default)]
pub struct GeometricSeparator {
    config: SeparatorConfig,
}

impl GeometricSeparator {
    pub fn new(config: SeparatorConfig) -> Self {
        Self { config }
    }

    /// Rebuild `raw.text` from its word boxes and keep the result only when
    /// it passes the quality gate.
    pub fn refine(&self, raw: &RawOcrResult) -> SeparationOutcome {
        let words: Vec<&WordBox> = raw.words.iter().filter(|w| !w.text.trim().is_empty()).collect();
        if words.is_empty() {
            debug!("No word boxes available, keeping engine text");
            return SeparationOutcome {
                text: raw.text.clone(),
                improved: false,
                words_analyzed: 0,
                lines: 0,
                metrics: quality_metrics(&raw.text, &raw.text),
            };
        }

        let lines = group_words_by_line(&words);
        let rebuilt = lines
            .iter()
            .map(|line| reconstruct_line(line))
            .collect::<Vec<_>>()
            .join("\n");

        let metrics = quality_metrics(&raw.text, &rebuilt);
        let improved = metrics.quality_score > QUALITY_GATE && metrics.spaces_added > 0;

        info!(
            words = words.len(),
            lines = lines.len(),
            spaces_added = metrics.spaces_added,
            quality = metrics.quality_score,
            improved,
            "Geometric separation finished"
        );

        SeparationOutcome {
            text: if improved { rebuilt } else { raw.text.clone() },
            improved,
            words_analyzed: words.len(),
            lines: lines.len(),
            metrics,
        }
    }

    /// Flag words that look cut off. `image_size` enables the edge checks.
    pub fn detect_truncated_words(&self, words: &[WordBox], image_size: Option<(u32, u32)>) -> TruncationReport {
        if !self.config.truncation_detection {
            return TruncationReport {
                truncated_words: Vec::new(),
                suspicious: Vec::new(),
                needs_reprocessing: false,
                recommendation: ReprocessingRecommendation::None,
            };
        }

        let mut truncated_words = Vec::new();
        let mut suspicious = Vec::new();

        for (index, word) in words.iter().enumerate() {
            let analysis = self.analyze_word(word, image_size);
            if let Some((reason, action, priority)) = analysis.truncation {
                debug!(word = %word.text, %reason, "Possibly truncated word");
                truncated_words.push(TruncatedWord {
                    index,
                    word: word.text.clone(),
                    reason,
                    confidence: word.confidence,
                    bounding_box: word.bounding_box,
                    action,
                    priority,
                });
            }
            if let Some(pattern) = analysis.suspicious {
                suspicious.push(SuspiciousWord {
                    index,
                    word: word.text.clone(),
                    pattern,
                    confidence: word.confidence,
                });
            }
        }

        let needs_reprocessing = truncated_words.iter().any(|w| w.priority == TruncationPriority::High);
        let recommendation = self.recommend(&truncated_words, image_size);

        TruncationReport {
            truncated_words,
            suspicious,
            needs_reprocessing,
            recommendation,
        }
    }

    fn analyze_word(&self, word: &WordBox, image_size: Option<(u32, u32)>) -> WordAnalysis {
        let mut truncation: Option<(String, TruncationAction, TruncationPriority)> = None;
        let mut suspicious = None;
        let bbox = &word.bounding_box;

        if let Some((width, _)) = image_size {
            let right_gap = width as i32 - bbox.x1;
            if right_gap < self.config.edge_threshold {
                truncation = Some((
                    format!("word is {}px from the right edge", right_gap),
                    TruncationAction::ExtendRight,
                    TruncationPriority::High,
                ));
            }
            if bbox.x0 < self.config.edge_threshold {
                truncation = Some((
                    format!("word is {}px from the left edge", bbox.x0),
                    TruncationAction::ExtendLeft,
                    TruncationPriority::Medium,
                ));
            }
        }

        if let Some((reason, priority)) = truncation_morphology(&word.text) {
            truncation = Some((reason, TruncationAction::ReprocessWord, priority));
        }

        if word.confidence < self.config.confidence_threshold {
            suspicious = Some(format!("low confidence: {}%", word.confidence));
            if word.confidence < self.config.truncation_confidence {
                truncation = Some((
                    format!("very low confidence ({}%)", word.confidence),
                    TruncationAction::ReprocessWord,
                    TruncationPriority::Medium,
                ));
            }
        }

        if bbox.height() > 0 {
            let aspect = bbox.width() as f64 / bbox.height() as f64;
            if aspect < 0.5 {
                suspicious = Some(format!("unusual aspect ratio: {:.2}", aspect));
            }
        }

        WordAnalysis { truncation, suspicious }
    }

    fn recommend(&self, truncated: &[TruncatedWord], image_size: Option<(u32, u32)>) -> ReprocessingRecommendation {
        if truncated.is_empty() {
            return ReprocessingRecommendation::None;
        }

        let high: Vec<&TruncatedWord> = truncated
            .iter()
            .filter(|w| w.priority == TruncationPriority::High)
            .collect();

        if high.is_empty() {
            return ReprocessingRecommendation::ManualReview {
                message: format!("Review {} suspicious word(s) manually", truncated.len()),
                words: truncated.iter().map(|w| w.word.clone()).collect(),
            };
        }

        let pad = self.config.region_padding;
        let regions = high
            .iter()
            .map(|w| {
                let b = w.bounding_box;
                let (max_x, max_y) = image_size
                    .map(|(width, height)| (width as i32, height as i32))
                    .unwrap_or((b.x1 + pad, b.y1 + pad));
                ReocrRegion {
                    word: w.word.clone(),
                    original: b,
                    extended: BoundingBox::new(
                        (b.x0 - pad).max(0),
                        (b.y0 - pad).max(0),
                        (b.x1 + pad).min(max_x),
                        (b.y1 + pad).min(max_y),
                    ),
                    action: w.action,
                }
            })
            .collect();

        ReprocessingRecommendation::SelectiveReocr {
            message: format!("Re-run OCR on {} likely truncated word(s)", high.len()),
            estimated_time_ms: high.len() as u64 * 200,
            regions,
        }
    }
}

struct WordAnalysis {
    truncation: Option<(String, TruncationAction, TruncationPriority)>,
    suspicious: Option<String>,
}

/// First matching truncation shape, with the common-surname list taking precedence
pub fn truncation_morphology(text: &str) -> Option<(String, TruncationPriority)> {
    if COMMON_TRUNCATIONS.contains(&text.to_uppercase().as_str()) {
        return Some((
            format!("common surname probably cut short: {}", text),
            TruncationPriority::High,
        ));
    }

    TRUNCATION_SHAPES
        .iter()
        .find(|(pattern, _, _)| pattern.is_match(text))
        .map(|(_, reason, priority)| (reason.to_string(), *priority))
}

/// Cluster words into lines by their top coordinate.
///
/// Tolerance is `max(0.6 × mean height, 0.4 × max height, 10px)`; a word
/// starts a new line when its top differs from the first word of the
/// current line by more than that. Lines come back top to bottom, each
/// sorted left to right.
pub fn group_words_by_line<'a>(words: &[&'a WordBox]) -> Vec<Vec<&'a WordBox>> {
    if words.is_empty() {
        return Vec::new();
    }

    let heights: Vec<f64> = words.iter().map(|w| w.bounding_box.height() as f64).collect();
    let avg_height = heights.iter().sum::<f64>() / heights.len() as f64;
    let max_height = heights.iter().copied().fold(f64::MIN, f64::max);
    let tolerance = (avg_height * 0.6).max(max_height * 0.4).max(MIN_Y_TOLERANCE);

    let mut sorted: Vec<&WordBox> = words.to_vec();
    sorted.sort_by_key(|w| w.bounding_box.y0);

    let mut lines: Vec<Vec<&WordBox>> = Vec::new();
    let mut line_top: Option<i32> = None;
    for word in sorted {
        let y = word.bounding_box.y0;
        let same_line = line_top.is_some_and(|top| ((y - top) as f64).abs() <= tolerance);
        if let (true, Some(line)) = (same_line, lines.last_mut()) {
            line.push(word);
            continue;
        }
        lines.push(vec![word]);
        line_top = Some(y);
    }

    for line in &mut lines {
        line.sort_by_key(|w| w.bounding_box.x0);
    }
    lines
}

/// Join one line's words, inserting a space where the gap calls for it
pub fn reconstruct_line(line: &[&WordBox]) -> String {
    let Some(first) = line.first() else {
        return String::new();
    };
    if line.len() == 1 {
        return first.text.clone();
    }

    let gaps: Vec<f64> = line
        .windows(2)
        .map(|pair| (pair[1].bounding_box.x0 - pair[0].bounding_box.x1) as f64)
        .collect();
    let widths: Vec<f64> = line.iter().map(|w| w.bounding_box.width() as f64).collect();

    let gap_stats = GapStatistics::from_values(&gaps);
    let width_stats = GapStatistics::from_values(&widths);
    let threshold = adaptive_threshold(&gap_stats, &width_stats);

    let mut text = first.text.clone();
    for (i, gap) in gaps.iter().enumerate() {
        let current = line[i];
        let next = line[i + 1];
        if should_add_space(*gap, threshold, &gap_stats, current, next) {
            text.push(' ');
        }
        text.push_str(&next.text);
    }
    text
}

/// Gap above which two boxes are separate words.
///
/// With fewer than two gaps: 30% of the mean word width. High variance
/// (std > 0.8 × mean) uses the upper quartile; mostly overlapping boxes use
/// 40% of the mean width; otherwise mean + 1.5 std. Never below 5px.
pub fn adaptive_threshold(gaps: &GapStatistics, widths: &GapStatistics) -> f64 {
    if gaps.count < 2 {
        return widths.mean * 0.3;
    }

    let std_threshold = gaps.mean + gaps.std_dev * 1.5;
    let char_width_threshold = widths.mean * 0.4;

    let selected = if gaps.std_dev > gaps.mean * 0.8 {
        gaps.q3.max(char_width_threshold)
    } else if gaps.mean < 0.0 {
        char_width_threshold
    } else {
        std_threshold.max(char_width_threshold)
    };

    selected.max(MIN_SPACE_THRESHOLD)
}

fn should_add_space(gap: f64, threshold: f64, stats: &GapStatistics, current: &WordBox, next: &WordBox) -> bool {
    if gap < -5.0 {
        return false;
    }

    if is_likely_joined_name(&current.text, &next.text) && is_significant_name_gap(gap, stats) {
        debug!(
            left = %current.text,
            right = %next.text,
            gap,
            "Separating joined name"
        );
        return true;
    }

    if gap <= threshold {
        return false;
    }
    if already_separated(&current.text, &next.text) {
        return false;
    }
    !is_over_separation(gap, stats, &current.text, &next.text)
}

fn already_separated(current: &str, next: &str) -> bool {
    if current.chars().count() <= 3 && next.chars().count() <= 3 {
        return true;
    }
    CAPITALIZED.is_match(current) && CAPITALIZED.is_match(next)
}

fn is_over_separation(gap: f64, stats: &GapStatistics, current: &str, next: &str) -> bool {
    if stats.mean > 0.0 && gap > stats.mean * 5.0 {
        return false;
    }
    current.chars().count() == 1 && next.chars().count() == 1
}

/// Two adjacent boxes whose concatenation looks like glued uppercase names
pub fn is_likely_joined_name(current: &str, next: &str) -> bool {
    let combined = format!("{}{}", current, next);
    let length = combined.chars().count();
    if length <= 8 || !ALL_CAPS.is_match(&combined) {
        return false;
    }

    JOINED_SURNAMES.iter().any(|p| p.is_match(&combined))
        || NAME_SHAPES.iter().any(|p| p.is_match(&combined))
        || (length > 12 && !has_repeated_vowel(&combined))
}

fn has_repeated_vowel(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    chars
        .windows(2)
        .any(|pair| pair[0] == pair[1] && "AEIOU".contains(pair[0]))
}

/// Small gaps inside a likely joined name still deserve a space; wide ones
/// (> 15px) are already separated.
fn is_significant_name_gap(gap: f64, stats: &GapStatistics) -> bool {
    if gap > NAME_GAP_ALREADY_SEPARATED {
        return false;
    }
    let very_small = (0.0..=NAME_GAP_VERY_SMALL).contains(&gap);
    let name_threshold = (stats.mean * 0.4).max(8.0);
    let below_threshold = gap > 0.0 && gap <= name_threshold;
    very_small || below_threshold
}

fn count_whitespace(text: &str) -> i64 {
    text.chars().filter(|c| c.is_whitespace()).count() as i64
}

/// Score the rebuilt text against the engine text
pub fn quality_metrics(original: &str, geometric: &str) -> QualityMetrics {
    let original_spaces = count_whitespace(original);
    let spaces_added = count_whitespace(geometric) - original_spaces;
    let change_ratio = spaces_added as f64 / original_spaces.max(1) as f64;

    let squashed: String = original.chars().filter(|c| !c.is_whitespace()).collect();
    let has_known_name_pattern = KNOWN_JOINED_NAMES.is_match(&squashed);
    let joined_matches = GENERAL_JOINED_NAME.find_iter(original).count();

    let mut score: f64 = 0.5;
    if has_known_name_pattern && spaces_added > 0 {
        score += 0.4;
    }
    if joined_matches > 0 && spaces_added > 0 {
        score += 0.3;
    }
    if change_ratio > 3.0 && !has_known_name_pattern {
        score -= 0.4;
    }
    if spaces_added > 0 && spaces_added <= 10 {
        score += 0.2;
    }
    if spaces_added > 0 && spaces_added <= 3 && (has_known_name_pattern || joined_matches > 0) {
        score += 0.3;
    }

    QualityMetrics {
        spaces_added,
        change_ratio,
        quality_score: score.clamp(0.0, 1.0),
        original_word_count: original.split_whitespace().count(),
        geometric_word_count: geometric.split_whitespace().count(),
        has_known_name_pattern,
        joined_matches,
    }
}

/// Average geometry and confidence of the recognized words
pub fn bounding_box_stats(words: &[WordBox]) -> BoundingBoxStats {
    if words.is_empty() {
        return BoundingBoxStats::default();
    }
    let n = words.len() as f64;
    let widths: Vec<i32> = words.iter().map(|w| w.bounding_box.width()).collect();

    BoundingBoxStats {
        total_words: words.len(),
        avg_width: widths.iter().map(|&w| w as f64).sum::<f64>() / n,
        avg_height: words.iter().map(|w| w.bounding_box.height() as f64).sum::<f64>() / n,
        avg_area: words
            .iter()
            .map(|w| (w.bounding_box.width() as f64) * (w.bounding_box.height() as f64))
            .sum::<f64>()
            / n,
        min_width: widths.iter().copied().min().unwrap_or(0),
        max_width: widths.iter().copied().max().unwrap_or(0),
        avg_confidence: words.iter().map(|w| w.confidence as f64).sum::<f64>() / n,
    }
}
