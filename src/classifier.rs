//! # Document Classifier
//!
//! Labels OCR text as a contract or a receipt by weighted substring and
//! pattern scoring. Tolerates OCR noise because no exact layout is required:
//! a handful of unambiguous phrases outweighs the shared vocabulary.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Score units are tenths; the cap is 1.0
const KEYWORD_WEIGHT: u32 = 1;
const STRONG_INDICATOR_WEIGHT: u32 = 3;
const STRUCTURE_WEIGHT: u32 = 2;
const MAX_SCORE_UNITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Contract,
    Receipt,
    Unknown,
}

impl DocumentType {
    /// Value stored in the `tipo` column
    pub fn tipo(&self) -> Option<&'static str> {
        match self {
            DocumentType::Contract => Some("contrato"),
            DocumentType::Receipt => Some("recibo"),
            DocumentType::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Contract => "contract",
            DocumentType::Receipt => "receipt",
            DocumentType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

/// Score thresholds for [`ConfidenceLevel`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.6,
            low: 0.4,
        }
    }
}

impl ConfidenceThresholds {
    pub fn level(&self, score: f64) -> ConfidenceLevel {
        if score >= self.high {
            ConfidenceLevel::High
        } else if score >= self.medium {
            ConfidenceLevel::Medium
        } else if score >= self.low {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::VeryLow
        }
    }
}

/// Scoring detail for one candidate type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeScore {
    pub score: f64,
    pub found_keywords: Vec<&'static str>,
    pub found_strong_indicators: Vec<&'static str>,
    pub structure_matches: Vec<&'static str>,
    pub level: ConfidenceLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// `Unknown` when the best score is below the low threshold
    #[serde(rename = "type")]
    pub document_type: DocumentType,
    /// Best-scoring candidate, used for extraction even when `Unknown`
    pub nominal_type: DocumentType,
    pub confidence: f64,
    pub score_breakdown: BTreeMap<DocumentType, TypeScore>,
    /// Human-readable reason when the result is low confidence
    pub reason: Option<String>,
}

impl ClassificationResult {
    pub fn is_low_confidence(&self) -> bool {
        self.document_type == DocumentType::Unknown
    }
}

/// A structural check over lowercased text
struct StructureCheck {
    name: &'static str,
    test: fn(&str) -> bool,
}

struct DocumentPatterns {
    keywords: &'static [&'static str],
    strong_indicators: &'static [&'static str],
    structure: Vec<StructureCheck>,
}

const CONTRACT_KEYWORDS: &[&str] = &[
    "FOLIO:",
    "Nombre del Cliente",
    "Tratamiento",
    "Tarjeta de credito",
    "Costo total del servicio",
    "Anticipo",
    "Saldo restante",
    "pagos por cubrir",
    "DIRECCIÓN SUCURSAL DONDE CONTRATO",
    "Paseo Queretaro 2",
    "EUROPIEL SINERGIA, S. DE R.L. DE C.V.",
    "CONTRATO",
    "contrato",
    "Contrato",
    "PRESTACION DE SERVICIOS",
    "prestacion de servicios",
    "CONTRATO DE PRESTACION DE SERVICIOS",
    "El presente contrato",
    "días del mes de",
    "del año",
    "se celebra",
    "a los",
];

const CONTRACT_STRONG_INDICATORS: &[&str] = &[
    "Nombre del Cliente",
    "Costo total del servicio",
    "Saldo restante a cubrir",
    "pagos por cubrir",
    "CONTRATO DE PRESTACION DE SERVICIOS",
    "El presente contrato se celebra",
    "prestacion de servicios",
];

const RECEIPT_KEYWORDS: &[&str] = &[
    "Recibo de Pago",
    "Recibí de",
    "la cantidad de $",
    "por concepto de",
    "Forma de Pago:",
    "TRANSACCION APROBADA",
    "Tarjeta:",
    "Autorización:",
    "Orden:",
    "Comercio:",
    "ARQC:",
    "SI REQUIERE FACTURA",
    "Folio Factura:",
    "LASER CENTER",
    "EUROPIEL",
    "SINERGIA",
    "ANTICIPO A PAQUETE NUEVO",
    "Folio:",
    "Q22-",
    "Fecha:",
    "ESI130509HRA",
    "EME230914R1",
    "Paseo Queretaro 2",
    "Firma",
];

const RECEIPT_STRONG_INDICATORS: &[&str] = &[
    "Recibo de Pago",
    "Recibí de",
    "TRANSACCION APROBADA",
    "Folio Factura:",
    "LASER CENTER",
    "ANTICIPO A PAQUETE NUEVO",
    "Folio: Q22-",
    "EUROPIEL SINERGIA",
];

/// Keywords that settle an exact tie
const CONTRACT_TIE_BREAKERS: &[&str] = &[
    "CONTRATO DE PRESTACION DE SERVICIOS",
    "El presente contrato",
    "prestacion de servicios",
    "se celebra",
];
const RECEIPT_TIE_BREAKERS: &[&str] = &["Recibo de Pago", "Recibí de", "la cantidad de $", "TRANSACCION APROBADA"];

/// Phrases found by the quick pre-OCR pass (uppercased text)
const QUICK_RECEIPT_PATTERNS: &[&str] = &[
    "RECIBO DE PAGO",
    "RECIBI DE",
    "TRANSACCION APROBADA",
    "TARJETA:",
    "AUTORIZACION:",
    "FOLIO FACTURA",
    "SI REQUIERE FACTURA",
];
const QUICK_CONTRACT_PATTERNS: &[&str] = &[
    "NOMBRE DEL CLIENTE 1:",
    "NOMBRE DEL CLIENTE 2:",
    "COSTO TOTAL DEL SERVICIO",
    "ANTICIPO",
    "SALDO RESTANTE",
    "PAGOS POR CUBRIR",
    "DIRECCION SUCURSAL DONDE CONTRATO",
    "FOLIO:Q2-",
    "DEL MES DE",
    "DEL AÑO",
    "TRATAMIENTO",
    "CLIENTE 1:",
    "CLIENTE 2:",
    "TARJETA DE CREDITO",
    "FECHA VENCIMIENTO",
    "EUROPIEL SINERGIA, S. DE R.L. DE C.V.",
    "CONTRATO DE PRESTACION",
    "PRESTACION DE SERVICIOS",
];

lazy_static! {
    static ref NUMBERED_CLIENT: Regex = Regex::new(r"cliente \d+:").expect("valid client pattern");
    static ref DAYS_OF_MONTH_PHRASE: Regex =
        Regex::new(r"a los \d+ días del mes de").expect("valid date phrase pattern");
    static ref YEAR_PHRASE: Regex = Regex::new(r"del año \d+").expect("valid year phrase pattern");
    static ref FOLIO_Q22: Regex = Regex::new(r"folio:\s*q22-\d+").expect("valid folio pattern");
}

fn contract_structure() -> Vec<StructureCheck> {
    vec![
        StructureCheck {
            name: "has_multiple_clients",
            test: |t| NUMBERED_CLIENT.is_match(t) || t.contains("nombre del cliente"),
        },
        StructureCheck {
            name: "has_treatment_details",
            test: |t| t.contains("tratamiento") || t.contains("sesiones"),
        },
        StructureCheck {
            name: "has_payment_plan",
            test: |t| t.contains("pagos por cubrir") || t.contains("saldo restante"),
        },
        StructureCheck {
            name: "has_contract_address",
            test: |t| t.contains("dirección sucursal"),
        },
        StructureCheck {
            name: "has_contract_format",
            test: |t| t.contains("contrato de prestacion de servicios") || t.contains("el presente contrato"),
        },
        StructureCheck {
            name: "has_date_phrase",
            test: |t| DAYS_OF_MONTH_PHRASE.is_match(t) || YEAR_PHRASE.is_match(t),
        },
        StructureCheck {
            name: "has_service_description",
            test: |t| t.contains("prestacion de servicios") || t.contains("se celebra"),
        },
    ]
}

fn receipt_structure() -> Vec<StructureCheck> {
    vec![
        StructureCheck {
            name: "has_single_payment",
            test: |t| t.contains("recibí de") && t.contains("la cantidad de"),
        },
        StructureCheck {
            name: "has_transaction_details",
            test: |t| t.contains("transaccion aprobada") && t.contains("autorización"),
        },
        StructureCheck {
            name: "has_factura_info",
            test: |t| t.contains("folio factura") && t.contains("requiere factura"),
        },
        StructureCheck {
            name: "has_receipt_format",
            test: |t| t.contains("recibo de pago") && t.contains("laser center"),
        },
        StructureCheck {
            name: "has_europiel_header",
            test: |t| t.contains("europiel") && (t.contains("sinergia") || t.contains("laser center")),
        },
        StructureCheck {
            name: "has_folio_q22",
            test: |t| FOLIO_Q22.is_match(t),
        },
    ]
}

/// Outcome of the cheap detection used before segmentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickDetection {
    /// Receipt or contract; receipt when nothing matched
    pub document_type: DocumentType,
    pub receipt_matches: Vec<&'static str>,
    pub contract_matches: Vec<&'static str>,
}

/// Per-type pattern counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternCounts {
    pub keywords: usize,
    pub strong_indicators: usize,
    pub structure_checks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierStats {
    pub supported_types: Vec<DocumentType>,
    pub pattern_counts: BTreeMap<DocumentType, PatternCounts>,
    pub thresholds: ConfidenceThresholds,
}

/// Scores text against the contract and receipt pattern sets
pub struct DocumentClassifier {
    contract: DocumentPatterns,
    receipt: DocumentPatterns,
    thresholds: ConfidenceThresholds,
}

impl Default for DocumentClassifier {
    fn default() -> Self {
        Self::new(ConfidenceThresholds::default())
    }
}

impl std::fmt::Debug for DocumentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentClassifier")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl DocumentClassifier {
    pub fn new(thresholds: ConfidenceThresholds) -> Self {
        Self {
            contract: DocumentPatterns {
                keywords: CONTRACT_KEYWORDS,
                strong_indicators: CONTRACT_STRONG_INDICATORS,
                structure: contract_structure(),
            },
            receipt: DocumentPatterns {
                keywords: RECEIPT_KEYWORDS,
                strong_indicators: RECEIPT_STRONG_INDICATORS,
                structure: receipt_structure(),
            },
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ConfidenceThresholds {
        &self.thresholds
    }

    /// Classify OCR text. Pure: the same text always yields the same result.
    pub fn classify(&self, text: &str) -> ClassificationResult {
        if text.trim().is_empty() {
            return ClassificationResult {
                document_type: DocumentType::Unknown,
                nominal_type: DocumentType::Unknown,
                confidence: 0.0,
                score_breakdown: BTreeMap::new(),
                reason: Some("empty OCR text".to_string()),
            };
        }

        let lower = text.to_lowercase();
        let contract = self.analyze(&lower, &self.contract);
        let receipt = self.analyze(&lower, &self.receipt);

        let nominal_type = pick_winner(&contract, &receipt);
        let confidence = match nominal_type {
            DocumentType::Receipt => receipt.score,
            _ => contract.score,
        };

        let (document_type, reason) = if confidence < self.thresholds.low {
            (
                DocumentType::Unknown,
                Some(format!(
                    "best score {:.1} for {} is below the {:.1} threshold",
                    confidence, nominal_type, self.thresholds.low
                )),
            )
        } else {
            (nominal_type, None)
        };

        debug!(
            contract_score = contract.score,
            receipt_score = receipt.score,
            %document_type,
            %nominal_type,
            "Document classified"
        );

        let mut score_breakdown = BTreeMap::new();
        score_breakdown.insert(DocumentType::Contract, contract);
        score_breakdown.insert(DocumentType::Receipt, receipt);

        ClassificationResult {
            document_type,
            nominal_type,
            confidence,
            score_breakdown,
            reason,
        }
    }

    fn analyze(&self, lower: &str, patterns: &DocumentPatterns) -> TypeScore {
        let found_keywords: Vec<&'static str> = patterns
            .keywords
            .iter()
            .copied()
            .filter(|k| lower.contains(&k.to_lowercase()))
            .collect();
        let found_strong_indicators: Vec<&'static str> = patterns
            .strong_indicators
            .iter()
            .copied()
            .filter(|k| lower.contains(&k.to_lowercase()))
            .collect();
        let structure_matches: Vec<&'static str> = patterns
            .structure
            .iter()
            .filter(|check| (check.test)(lower))
            .map(|check| check.name)
            .collect();

        let units = found_keywords.len() as u32 * KEYWORD_WEIGHT
            + found_strong_indicators.len() as u32 * STRONG_INDICATOR_WEIGHT
            + structure_matches.len() as u32 * STRUCTURE_WEIGHT;
        let score = units.min(MAX_SCORE_UNITS) as f64 / 10.0;

        TypeScore {
            score,
            found_keywords,
            found_strong_indicators,
            structure_matches,
            level: self.thresholds.level(score),
        }
    }

    /// Cheap receipt/contract decision on the uppercased text of a quick OCR
    /// pass. Receipts win only with strictly more matches; with no matches
    /// at all the document is assumed to be a receipt.
    pub fn quick_detect(&self, text: &str) -> QuickDetection {
        let upper = text.to_uppercase();
        let receipt_matches: Vec<&'static str> = QUICK_RECEIPT_PATTERNS
            .iter()
            .copied()
            .filter(|p| upper.contains(p))
            .collect();
        let contract_matches: Vec<&'static str> = QUICK_CONTRACT_PATTERNS
            .iter()
            .copied()
            .filter(|p| upper.contains(p))
            .collect();

        let document_type = if receipt_matches.len() > contract_matches.len() || contract_matches.is_empty() {
            DocumentType::Receipt
        } else {
            DocumentType::Contract
        };

        QuickDetection {
            document_type,
            receipt_matches,
            contract_matches,
        }
    }

    pub fn stats(&self) -> ClassifierStats {
        let counts = |p: &DocumentPatterns| PatternCounts {
            keywords: p.keywords.len(),
            strong_indicators: p.strong_indicators.len(),
            structure_checks: p.structure.len(),
        };

        let mut pattern_counts = BTreeMap::new();
        pattern_counts.insert(DocumentType::Contract, counts(&self.contract));
        pattern_counts.insert(DocumentType::Receipt, counts(&self.receipt));

        ClassifierStats {
            supported_types: vec![DocumentType::Contract, DocumentType::Receipt],
            pattern_counts,
            thresholds: self.thresholds,
        }
    }
}

/// Higher score wins. On an exact tie above zero the tie-breaker keywords
/// decide; a true tie keeps the contract.
fn pick_winner(contract: &TypeScore, receipt: &TypeScore) -> DocumentType {
    if contract.score == receipt.score && contract.score > 0.0 {
        let contract_hint = contract
            .found_keywords
            .iter()
            .any(|k| CONTRACT_TIE_BREAKERS.contains(k));
        let receipt_hint = receipt
            .found_keywords
            .iter()
            .any(|k| RECEIPT_TIE_BREAKERS.contains(k));

        return match (contract_hint, receipt_hint) {
            (false, true) => DocumentType::Receipt,
            _ => DocumentType::Contract,
        };
    }

    if receipt.score > contract.score {
        DocumentType::Receipt
    } else {
        DocumentType::Contract
    }
}
