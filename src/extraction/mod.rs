//! # Field Extraction
//!
//! Recovers structured fields from noisy OCR text. Every field is found by
//! an ordered list of [`Strategy`] values, most specific first; the first
//! strategy that yields a valid value wins. A value that is found but fails
//! validation is recorded as a [`FieldIssue`] and the cascade moves on.
//!
//! - `receipt`: "Recibí de" names, receipt dates, amounts, payment type, folio
//! - `contract`: "Nombre del Cliente 1" names and contract dates

pub mod contract;
pub mod receipt;

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tracing::{debug, info};

use crate::classifier::{ClassificationResult, DocumentType};
use crate::name_repair::NameRepairer;
use crate::normalizer::{NormalizeResult, PaymentType, ValidationRejected};

/// Stored instead of a guess when a client name was found but is unusable
pub const MANUAL_REVIEW: &str = "REVISIÓN MANUAL REQUERIDA";

/// Record type stored in the `tipo` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Contrato,
    Recibo,
}

impl DocumentKind {
    /// Extraction rules for a classified type; unknown documents are read as receipts
    pub fn from_document_type(document_type: DocumentType) -> Self {
        match document_type {
            DocumentType::Contract => DocumentKind::Contrato,
            DocumentType::Receipt | DocumentType::Unknown => DocumentKind::Recibo,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Contrato => "contrato",
            DocumentKind::Recibo => "recibo",
        }
    }
}

/// Fields recovered from one document. Absent fields are `None`, never empty strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedFields {
    pub tipo: DocumentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cliente: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_iso_date")]
    pub fecha_contrato: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monto: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_pago: Option<PaymentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folio: Option<String>,
}

fn serialize_iso_date<S: Serializer>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
    match date {
        Some(date) => serializer.serialize_str(&crate::normalizer::format_iso(*date)),
        None => serializer.serialize_none(),
    }
}

impl ExtractedFields {
    pub fn empty(tipo: DocumentKind) -> Self {
        Self {
            tipo,
            cliente: None,
            fecha_contrato: None,
            monto: None,
            t_pago: None,
            folio: None,
        }
    }

    pub fn needs_manual_review(&self) -> bool {
        self.cliente.as_deref() == Some(MANUAL_REVIEW)
    }

    /// Names of the fields that hold a value
    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut present = vec!["tipo"];
        if self.cliente.is_some() {
            present.push("cliente");
        }
        if self.fecha_contrato.is_some() {
            present.push("fecha_contrato");
        }
        if self.monto.is_some() {
            present.push("monto");
        }
        if self.t_pago.is_some() {
            present.push("t_pago");
        }
        if self.folio.is_some() {
            present.push("folio");
        }
        present
    }
}

/// Why a field is missing or flagged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldIssue {
    pub field: &'static str,
    pub reason: String,
}

impl FieldIssue {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Extraction output plus the reasons behind every omission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub fields: ExtractedFields,
    pub issues: Vec<FieldIssue>,
}

type StrategyFn<T> = dyn Fn(&str) -> Option<NormalizeResult<T>> + Send + Sync;

/// One way of recovering a field. `None` means nothing was found; `Some(Err)`
/// means something was found but rejected.
pub struct Strategy<T> {
    pub name: &'static str,
    run: Box<StrategyFn<T>>,
}

impl<T> Strategy<T> {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&str) -> Option<NormalizeResult<T>> + Send + Sync + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    /// Strategy that cannot reject: a found value is always accepted
    pub fn finder<F>(name: &'static str, find: F) -> Self
    where
        F: Fn(&str) -> Option<T> + Send + Sync + 'static,
    {
        Self::new(name, move |text| find(text).map(Ok))
    }

    pub fn run(&self, text: &str) -> Option<NormalizeResult<T>> {
        (self.run)(text)
    }
}

impl<T> std::fmt::Debug for Strategy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Result of running a strategy list
#[derive(Debug, Clone, PartialEq)]
pub enum Cascade<T> {
    Found { strategy: &'static str, value: T },
    Rejected(Vec<ValidationRejected>),
    Missing,
}

/// Run strategies in order, short-circuiting on the first accepted value
pub fn run_cascade<T>(text: &str, strategies: &[Strategy<T>]) -> Cascade<T> {
    let mut rejections = Vec::new();
    for strategy in strategies {
        match strategy.run(text) {
            Some(Ok(value)) => {
                return Cascade::Found {
                    strategy: strategy.name,
                    value,
                }
            }
            Some(Err(rejection)) => {
                debug!(strategy = strategy.name, reason = %rejection, "Strategy result rejected");
                rejections.push(rejection);
            }
            None => {}
        }
    }

    if rejections.is_empty() {
        Cascade::Missing
    } else {
        Cascade::Rejected(rejections)
    }
}

/// Resolve a cascade into an optional field value plus an issue on failure
fn settle<T>(field: &'static str, cascade: Cascade<T>, issues: &mut Vec<FieldIssue>) -> Option<T> {
    match cascade {
        Cascade::Found { strategy, value } => {
            debug!(field, strategy, "Field extracted");
            Some(value)
        }
        Cascade::Rejected(rejections) => {
            let reasons: Vec<String> = rejections.iter().map(ToString::to_string).collect();
            issues.push(FieldIssue::new(field, reasons.join("; ")));
            None
        }
        Cascade::Missing => {
            issues.push(FieldIssue::new(field, "not found in text"));
            None
        }
    }
}

lazy_static! {
    static ref LEADING_DIGITS: Regex = Regex::new(r"^\d+\s*").expect("valid cleanup pattern");
    static ref DOTTED_NAMES: Regex =
        Regex::new(r"([\p{L}]+)\.([\p{L}]+)").expect("valid cleanup pattern");
    static ref TRAILING_NOISE: Regex =
        Regex::new(r"(?i)(?:\s+oo\s+lo|\s+oo|\s+lo|\s*:|\s+\d{1,3}|\d+)\s*$").expect("valid cleanup pattern");
    static ref DIGIT_AFTER_LETTER: Regex = Regex::new(r"(\p{L})\d+").expect("valid cleanup pattern");
    static ref DIGIT_BEFORE_LETTER: Regex = Regex::new(r"\d+(\p{L})").expect("valid cleanup pattern");
    static ref TRAILING_LABEL: Regex = Regex::new(
        r"(?i)\s+(MONTO|CANTIDAD|TOTAL|PESOS|MN|PAGO|CLIENTE|NOMBRE|RECIBO|CONTRATO|FECHA|FOLIO|ID|NO|EUROPIEL|SINERGIA|CV|RL|SA|DE|LA|DEL|TARJETA|VISA|MASTERCARD|CREDITO|DEBITO)\s*$"
    )
    .expect("valid cleanup pattern");
    static ref TRAILING_PUNCT_FRAGMENT: Regex =
        Regex::new(r"(?i)(?:\s*\.\s*[a-z]{1,2}|\s*[,:\-\.]+)\s*$").expect("valid cleanup pattern");
    static ref SLASH_TAIL: Regex = Regex::new(r"\s*(?://+|\\\\+).*$").expect("valid cleanup pattern");
    static ref NON_LETTERS: Regex = Regex::new(r"[^\p{L}\s]").expect("valid cleanup pattern");
}

/// Words that label amounts or document parts, never part of a name
const FORBIDDEN_NAME_WORDS: &[&str] = &[
    "MONTO", "CANTIDAD", "PESOS", "PESO", "RECIBO", "PAGO", "CONCEPTO", "FECHA", "TOTAL", "SUMA",
    "VALOR", "IMPORTE", "COBRO", "ABONO", "SALDO", "BALANCE", "MENSUAL", "SEMANAL", "QUINCENAL",
    "ANUAL", "PARCIAL", "COMPLETO", "FINAL",
];

const MAX_NAME_WORDS: usize = 5;

/// Strip OCR debris around a raw name candidate before repair
pub fn clean_name_candidate(raw: &str) -> String {
    let mut current = cut_at_lowercase_tail(raw.trim());
    current = SLASH_TAIL.replace(&current, "").into_owned();
    current = LEADING_DIGITS.replace(&current, "").into_owned();
    current = DOTTED_NAMES.replace_all(&current, "${1} ${2}").into_owned();

    // Trailing noise can be layered ("GARCIA 5 oo"); peel until stable
    loop {
        let before = current.clone();
        current = TRAILING_NOISE.replace(&current, "").into_owned();
        current = TRAILING_LABEL.replace(&current, "").into_owned();
        current = TRAILING_PUNCT_FRAGMENT.replace(&current, "").into_owned();
        current = current.trim().to_string();
        if current == before {
            break;
        }
    }

    current = DIGIT_AFTER_LETTER.replace_all(&current, "${1}").into_owned();
    current = DIGIT_BEFORE_LETTER.replace_all(&current, "${1}").into_owned();
    current = NON_LETTERS.replace_all(&current, " ").into_owned();

    current
        .split_whitespace()
        .filter(|word| !FORBIDDEN_NAME_WORDS.contains(&word.to_uppercase().as_str()))
        .take(MAX_NAME_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// "ANA LOPEZ se celebra" -> "ANA LOPEZ": an uppercase name followed by running prose
fn cut_at_lowercase_tail(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let is_upper = |w: &str| w.chars().any(char::is_alphabetic) && !w.chars().any(char::is_lowercase);
    if !words.first().is_some_and(|w| is_upper(w)) {
        return text.to_string();
    }

    let end = words
        .iter()
        .position(|w| w.chars().any(char::is_alphabetic) && w.chars().all(|c| !c.is_alphabetic() || c.is_lowercase()))
        .unwrap_or(words.len());
    words[..end].join(" ")
}

/// Outcome of validating a repaired client name
#[derive(Debug, Clone, PartialEq)]
pub enum NameVerdict {
    Accepted(String),
    /// A name was found but does not look like one
    Unusable { candidate: String, reason: String },
}

/// At least two words, longer than six characters, no leftover labels.
/// "DE" is only allowed inside long compound names ("MARIA DE LA LUZ ROJAS").
pub fn judge_name(name: &str) -> NameVerdict {
    let words: Vec<&str> = name.split_whitespace().collect();
    let unusable = |reason: &str| NameVerdict::Unusable {
        candidate: name.to_string(),
        reason: reason.to_string(),
    };

    if name.chars().count() <= 6 || words.len() < 2 {
        return unusable("needs at least two words and more than six characters");
    }
    let lowered = name.to_lowercase();
    if ["recibi", "cantidad", "pesos"].iter().any(|w| lowered.contains(w)) {
        return unusable("contains receipt vocabulary");
    }
    let has_de = words.iter().any(|w| w.eq_ignore_ascii_case("de"));
    if has_de && (words.len() < 4 || name.chars().count() < 15) {
        return unusable("short name with a stray 'DE'");
    }
    NameVerdict::Accepted(name.to_string())
}

/// Runs the per-type strategy lists and name repair
#[derive(Debug)]
pub struct FieldExtractor {
    repairer: NameRepairer,
    receipt: receipt::ReceiptStrategies,
    contract: contract::ContractStrategies,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(NameRepairer::default(), Vec::new())
    }
}

impl FieldExtractor {
    /// `known_clients` are full names matched literally before any pattern
    pub fn new(repairer: NameRepairer, known_clients: Vec<String>) -> Self {
        let known_clients = Arc::new(known_clients);
        Self {
            repairer,
            receipt: receipt::ReceiptStrategies::new(Arc::clone(&known_clients)),
            contract: contract::ContractStrategies::new(known_clients),
        }
    }

    /// Extract using the nominal type even when the classification is low-confidence
    pub fn extract_classified(&self, text: &str, classification: &ClassificationResult) -> Extraction {
        let mut extraction = self.extract(text, DocumentKind::from_document_type(classification.nominal_type));
        if classification.is_low_confidence() {
            extraction.issues.push(FieldIssue::new(
                "tipo",
                format!(
                    "low-confidence classification ({:.2}), extracted as {}",
                    classification.confidence,
                    extraction.fields.tipo.as_str()
                ),
            ));
        }
        extraction
    }

    pub fn extract(&self, text: &str, kind: DocumentKind) -> Extraction {
        let mut issues = Vec::new();
        let mut fields = ExtractedFields::empty(kind);

        let name_cascade = match kind {
            DocumentKind::Recibo => run_cascade(text, self.receipt.client()),
            DocumentKind::Contrato => run_cascade(text, self.contract.client()),
        };
        fields.cliente = self.resolve_client(name_cascade, &mut issues);

        let date_cascade = match kind {
            DocumentKind::Recibo => run_cascade(text, self.receipt.date()),
            DocumentKind::Contrato => run_cascade(text, self.contract.date()),
        };
        fields.fecha_contrato = settle("fecha_contrato", date_cascade, &mut issues);

        if kind == DocumentKind::Recibo {
            let candidate = settle("monto", run_cascade(text, self.receipt.amount()), &mut issues);
            fields.monto = candidate.and_then(|candidate| match candidate.validate(text) {
                Ok(validated) => {
                    debug!(value = validated.value, reason = %validated.reason, "Amount accepted");
                    Some(validated.value)
                }
                Err(rejection) => {
                    issues.push(FieldIssue::new("monto", rejection.to_string()));
                    None
                }
            });
            // Payment type always resolves; the last strategy is the default
            fields.t_pago = settle("t_pago", run_cascade(text, self.receipt.payment()), &mut issues);
            fields.folio = settle("folio", run_cascade(text, self.receipt.folio()), &mut issues);
        }

        for field in fields.present_fields() {
            crate::observability::record_field_extracted(field);
        }
        if fields.needs_manual_review() {
            crate::observability::record_manual_review();
        }

        info!(
            tipo = kind.as_str(),
            fields = ?fields.present_fields(),
            issues = issues.len(),
            "Field extraction completed"
        );

        Extraction { fields, issues }
    }

    fn resolve_client(&self, cascade: Cascade<String>, issues: &mut Vec<FieldIssue>) -> Option<String> {
        let raw = match cascade {
            Cascade::Found { strategy, value } => {
                debug!(strategy, candidate = %value, "Client name candidate");
                value
            }
            Cascade::Rejected(_) | Cascade::Missing => {
                issues.push(FieldIssue::new("cliente", "no client name pattern matched"));
                return None;
            }
        };

        let repaired = self.repairer.repair(&clean_name_candidate(&raw));
        match judge_name(&repaired) {
            NameVerdict::Accepted(name) => Some(name),
            NameVerdict::Unusable { candidate, reason } => {
                issues.push(FieldIssue::new(
                    "cliente",
                    format!("'{}' ({}): {}", candidate, raw.trim(), reason),
                ));
                Some(MANUAL_REVIEW.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_stops_at_first_accepted() {
        let strategies = vec![
            Strategy::<u32>::new("missing", |_| None),
            Strategy::new("rejects", |t| Some(Err(ValidationRejected::new(t, "bad")))),
            Strategy::finder("accepts", |_| Some(7)),
            Strategy::finder("never", |_| Some(9)),
        ];
        assert_eq!(
            run_cascade("x", &strategies),
            Cascade::Found {
                strategy: "accepts",
                value: 7
            }
        );
    }

    #[test]
    fn test_cascade_reports_rejections() {
        let strategies = vec![Strategy::<u32>::new("rejects", |t| {
            Some(Err(ValidationRejected::new(t, "bad")))
        })];
        match run_cascade("x", &strategies) {
            Cascade::Rejected(rejections) => assert_eq!(rejections.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(run_cascade::<u32>("x", &[]), Cascade::Missing);
    }

    #[test]
    fn test_clean_name_candidate() {
        assert_eq!(clean_name_candidate("4 CYNTHIA LOPEZ RUIZ"), "CYNTHIA LOPEZ RUIZ");
        assert_eq!(clean_name_candidate("YANET.ISLAS ROJAS"), "YANET ISLAS ROJAS");
        assert_eq!(clean_name_candidate("SABEL MARINO TINOCO5"), "SABEL MARINO TINOCO");
        assert_eq!(clean_name_candidate("LAURA VEGA PESOS"), "LAURA VEGA");
        assert_eq!(clean_name_candidate("LAURA VEGA oo Lo"), "LAURA VEGA");
        assert_eq!(clean_name_candidate("LAURA VEGA // xx"), "LAURA VEGA");
        assert_eq!(
            clean_name_candidate("ANA MYRYHA OLVERA PINELA se celebra"),
            "ANA MYRYHA OLVERA PINELA"
        );
    }

    #[test]
    fn test_judge_name() {
        assert_eq!(
            judge_name("MARIA LUISA HERNANDEZ"),
            NameVerdict::Accepted("MARIA LUISA HERNANDEZ".to_string())
        );
        assert!(matches!(judge_name("ANA"), NameVerdict::Unusable { .. }));
        assert!(matches!(judge_name("JUAN DE LUNA"), NameVerdict::Unusable { .. }));
        assert!(matches!(
            judge_name("MARIA DE LA LUZ ROJAS"),
            NameVerdict::Accepted(_)
        ));
    }

    #[test]
    fn test_unusable_name_becomes_manual_review() {
        let extractor = FieldExtractor::default();
        let extraction = extractor.extract("Recibí de ROSA la cantidad de $ 500.00 pesos", DocumentKind::Recibo);
        assert_eq!(extraction.fields.cliente.as_deref(), Some(MANUAL_REVIEW));
        assert!(extraction.fields.needs_manual_review());
        assert!(extraction.issues.iter().any(|i| i.field == "cliente"));
    }

    #[test]
    fn test_serialization_omits_missing_fields() {
        let mut fields = ExtractedFields::empty(DocumentKind::Contrato);
        fields.fecha_contrato = NaiveDate::from_ymd_opt(2024, 8, 28);
        let json = serde_json::to_value(&fields).expect("serialize");
        assert_eq!(json["tipo"], "contrato");
        assert_eq!(json["fecha_contrato"], "2024-08-28");
        assert!(json.get("cliente").is_none());
        assert!(json.get("monto").is_none());
    }
}
