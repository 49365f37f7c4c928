//! # Date and Amount Normalization
//!
//! Converts textual dates and amounts recovered from OCR into canonical
//! values and rejects anything that fails a sanity check. A rejected value
//! is dropped from the record, never corrected into something plausible.

use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Documents outside this window are OCR misreads
pub const MIN_YEAR: i32 = 2020;
pub const MAX_YEAR: i32 = 2030;

/// Receipts above this amount are treated as misreads
const MAX_AMOUNT: f64 = 1_000_000.0;

/// Spanish month names including recurring OCR misspellings
const MONTHS: &[(&str, u32)] = &[
    ("enero", 1), ("eneto", 1), ("enere", 1),
    ("febrero", 2), ("febrete", 2), ("febrere", 2),
    ("marzo", 3), ("matzo", 3), ("matze", 3),
    ("abril", 4), ("abrit", 4), ("abrif", 4),
    ("mayo", 5), ("maye", 5), ("majo", 5),
    ("junio", 6), ("junie", 6),
    ("julio", 7), ("julie", 7), ("julte", 7),
    ("agosto", 8), ("ageste", 8), ("agoste", 8), ("agesto", 8), ("agosio", 8),
    ("septiembre", 9), ("setiembre", 9), ("septiembte", 9), ("septiembie", 9),
    ("octubre", 10), ("octubie", 10), ("octubte", 10),
    ("noviembre", 11), ("noviembie", 11), ("noviembte", 11),
    ("diciembre", 12), ("diciembie", 12), ("diciembte", 12),
];

/// Concept fragments that mark a down payment, including OCR corruptions of "anticipo"
const ANTICIPO_TOKENS: &[&str] = &["anticipo", "antico", "anticio", "anticp", "armtionin", "paquete"];

lazy_static! {
    /// Contract date phrasings, most specific first
    static ref CONTRACT_DATE_PATTERNS: Vec<(Regex, DateOrder)> = [
        (
            r"(?i)(\d{1,2})\s+(?:d[ií]as?\s+)?[dl]e[lt]?\s*m?e?s?\s+de\s+(\p{L}+)\.?\s+[dl]e[lt]?\s+(?:año|afio|ano|afo|afie|an0|aho|anio)\s+(\d{4})",
            DateOrder::DayMonthYear,
        ),
        (r"(?i)(\d{1,2})\s+de\s+(\p{L}+)\.?\s+del?\s+(\d{4})", DateOrder::DayMonthYear),
        (r"(?i)(\p{L}+)\.?\s+(\d{1,2}),?\s+(\d{4})", DateOrder::MonthDayYear),
        (r"(?i)(\d{1,2})\s+(\p{L}+)\.?\s+(\d{4})", DateOrder::DayMonthYear),
        (r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})", DateOrder::DayMonthYear),
    ]
    .iter()
    .map(|(pattern, order)| (Regex::new(pattern).expect("valid contract date pattern"), *order))
    .collect();

    static ref NUMERIC_DATE: Regex =
        Regex::new(r"(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})").expect("valid numeric date pattern");
    static ref TEXTUAL_RECEIPT_DATE: Regex =
        Regex::new(r"(?i)\bEl\s+(\d{1,2})\s+de\s+(\p{L}+)\s+de\s+(\d{4})").expect("valid textual date pattern");
    /// "3105/2025" where OCR swallowed the first slash
    static ref GLUED_DAY_MONTH: Regex = Regex::new(r"(\d{3,4})/(\d{4})").expect("valid glued date pattern");
    static ref SPLIT_LEADING_DIGIT: Regex =
        Regex::new(r"(\d)\s+(\d/\d{1,2}/\d{4})").expect("valid split date pattern");
    static ref SPLIT_MONTH_DIGIT: Regex =
        Regex::new(r"(\d{1,2}/\d)\s+(\d/\d{4})").expect("valid split date pattern");
    static ref SPLIT_YEAR: Regex =
        Regex::new(r"(\d{1,2}/\d{1,2}/\d{2})\s+(\d{2})").expect("valid split date pattern");

    static ref US_GROUPED: Regex = Regex::new(r"^\d{1,3}(,\d{3})*(\.\d{2})?$").expect("valid amount pattern");
    static ref EU_GROUPED: Regex = Regex::new(r"^\d{1,3}(\.\d{3})+$").expect("valid amount pattern");
    static ref EU_FULL: Regex = Regex::new(r"^\d{1,3}(\.\d{3})+,\d{2}$").expect("valid amount pattern");
    static ref DECIMAL_COMMA: Regex = Regex::new(r"^\d+,\d{2}$").expect("valid amount pattern");
    static ref PLAIN_NUMBER: Regex = Regex::new(r"^\d+(\.\d+)?$").expect("valid amount pattern");

    static ref LONG_SUFFIX: Regex = Regex::new(r"^\d{4,}(\.\d{2})?$").expect("valid amount pattern");
    static ref GROUP_PREFIX: Regex = Regex::new(r"^\d{1,3}$").expect("valid amount pattern");
    static ref GROUP_SUFFIX: Regex = Regex::new(r"^\d{3}(\.\d{2})?$").expect("valid amount pattern");
    /// "(UN MIL QUINIENTOS PESOS 00/100 MN)"
    static ref SPELLED_AMOUNT: Regex =
        Regex::new(r"(?i)\(([\p{L}\s]+?)\s*pesos").expect("valid spelled amount pattern");
}

#[derive(Debug, Clone, Copy)]
enum DateOrder {
    DayMonthYear,
    MonthDayYear,
}

/// A recovered value that failed a sanity check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRejected {
    pub value: String,
    pub reason: String,
}

impl ValidationRejected {
    pub fn new(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationRejected {}

pub type NormalizeResult<T> = Result<T, ValidationRejected>;

/// Month number for a Spanish month name, tolerating known OCR misspellings
pub fn month_from_name(name: &str) -> Option<u32> {
    let normalized = name.trim().trim_end_matches('.').to_lowercase();
    MONTHS
        .iter()
        .find(|(month, _)| *month == normalized)
        .map(|(_, number)| *number)
}

/// Build a calendar date, rejecting impossible or out-of-window values.
///
/// The date must round-trip: Feb 30 does not silently become Mar 2.
pub fn build_date(year: i32, month: u32, day: u32) -> NormalizeResult<NaiveDate> {
    let value = format!("{:04}-{:02}-{:02}", year, month, day);
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ValidationRejected::new(
            value,
            format!("year outside {}-{}", MIN_YEAR, MAX_YEAR),
        ));
    }
    if !(1..=12).contains(&month) {
        return Err(ValidationRejected::new(value, "month out of range"));
    }
    if !(1..=31).contains(&day) {
        return Err(ValidationRejected::new(value, "day out of range"));
    }

    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) if date.year() == year && date.month() == month && date.day() == day => Ok(date),
        _ => Err(ValidationRejected::new(value, "not a calendar date")),
    }
}

/// ISO `YYYY-MM-DD`
pub fn format_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_number<T: std::str::FromStr>(text: &str, value: &str, what: &str) -> NormalizeResult<T> {
    text.parse()
        .map_err(|_| ValidationRejected::new(value, format!("unreadable {}", what)))
}

/// Parse a contract date such as "28 días del mes de Agosto del año 2024",
/// "28 de Agosto de 2024", "Agosto 28, 2024" or "28/08/2024".
pub fn parse_contract_date(text: &str) -> NormalizeResult<NaiveDate> {
    find_contract_date(text)
        .unwrap_or_else(|| Err(ValidationRejected::new(text, "no date pattern matched")))
}

/// Like [`parse_contract_date`], but `None` when no date-shaped text exists at all
pub fn find_contract_date(text: &str) -> Option<NormalizeResult<NaiveDate>> {
    let mut last_rejection = None;

    for (pattern, order) in CONTRACT_DATE_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let (day, month, year) = match order {
                DateOrder::DayMonthYear => (&caps[1], &caps[2], &caps[3]),
                DateOrder::MonthDayYear => (&caps[2], &caps[1], &caps[3]),
            };

            let month = match month.parse::<u32>() {
                Ok(number) => number,
                Err(_) => match month_from_name(month) {
                    Some(number) => number,
                    // Not a month word; the pattern matched unrelated text
                    None => continue,
                },
            };

            let result = parse_number::<u32>(day, text, "day")
                .and_then(|day| Ok((day, parse_number::<i32>(year, text, "year")?)))
                .and_then(|(day, year)| build_date(year, month, day));
            match result {
                Ok(date) => {
                    debug!(date = %date, "Parsed contract date");
                    return Some(Ok(date));
                }
                Err(rejection) => last_rejection = Some(rejection),
            }
        }
    }

    last_rejection.map(Err)
}

/// Undo OCR letter/digit confusions and stray spaces inside a numeric date
pub fn clean_numeric_date(text: &str) -> String {
    let substituted: String = text
        .trim()
        .chars()
        .map(|c| match c {
            'O' | 'o' | 'Q' => '0',
            'l' | 'I' | '|' => '1',
            'S' => '5',
            'Z' => '2',
            other => other,
        })
        .collect();

    let joined = SPLIT_LEADING_DIGIT.replace_all(&substituted, "${1}${2}");
    let joined = SPLIT_MONTH_DIGIT.replace_all(&joined, "${1}${2}");
    let joined = SPLIT_YEAR.replace_all(&joined, "${1}${2}");

    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '/' | '-' | ':' | ' '))
        .collect();
    let collapsed = filtered.split_whitespace().collect::<Vec<_>>().join(" ");

    // "3105/2025" -> "31/05/2025", "305/2025" -> "3/05/2025"
    match GLUED_DAY_MONTH.captures(&collapsed) {
        Some(caps) if !NUMERIC_DATE.is_match(&collapsed) => {
            let glued = &caps[1];
            let (day, month) = glued.split_at(glued.len() - 2);
            format!("{}/{}/{}", day, month, &caps[2])
        }
        _ => collapsed,
    }
}

/// Parse a receipt date: `DD/MM/YYYY` with an optional time, glued or
/// OCR-damaged digits, or "El 5 de mayo de 2025".
pub fn parse_receipt_date(text: &str) -> NormalizeResult<NaiveDate> {
    if text.trim().is_empty() {
        return Err(ValidationRejected::new(text, "empty date"));
    }

    let cleaned = clean_numeric_date(text);
    if let Some(caps) = NUMERIC_DATE.captures(&cleaned) {
        let day = parse_number::<u32>(&caps[1], text, "day")?;
        let month = parse_number::<u32>(&caps[2], text, "month")?;
        let year = parse_number::<i32>(&caps[3], text, "year")?;
        return build_date(year, month, day);
    }

    if let Some(caps) = TEXTUAL_RECEIPT_DATE.captures(text) {
        let day = parse_number::<u32>(&caps[1], text, "day")?;
        let month = month_from_name(&caps[2])
            .ok_or_else(|| ValidationRejected::new(text, format!("unknown month '{}'", &caps[2])))?;
        let year = parse_number::<i32>(&caps[3], text, "year")?;
        return build_date(year, month, day);
    }

    Err(ValidationRejected::new(text, "unrecognized receipt date format"))
}

/// Parse an amount written with any common grouping convention:
/// `7,900.00`, `16.000`, `16.000,00`, `1500,50` or `1500.00`.
pub fn parse_amount(text: &str) -> NormalizeResult<f64> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$')
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.'))
        .collect();

    let canonical = if US_GROUPED.is_match(&compact) {
        compact.replace(',', "")
    } else if EU_GROUPED.is_match(&compact) {
        compact.replace('.', "")
    } else if EU_FULL.is_match(&compact) {
        compact.replace('.', "").replace(',', ".")
    } else if DECIMAL_COMMA.is_match(&compact) {
        compact.replace(',', ".")
    } else if PLAIN_NUMBER.is_match(&compact) {
        compact.clone()
    } else {
        return Err(ValidationRejected::new(text, "unrecognized number format"));
    };

    let value: f64 = parse_number(&canonical, text, "amount")?;
    if value <= 0.0 {
        return Err(ValidationRejected::new(text, "amount must be positive"));
    }
    if value >= MAX_AMOUNT {
        return Err(ValidationRejected::new(text, "amount implausibly large"));
    }
    Ok((value * 100.0).round() / 100.0)
}

/// An amount accepted by [`validate_amount`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedAmount {
    pub value: f64,
    /// The digits that were finally parsed
    pub corrected: String,
    pub reason: String,
}

/// Cross-check an OCR amount against the document's spelled-out amount.
///
/// OCR often splits a number or prefixes stray digits ("1 1000.00" for
/// "1000.00"). A single token is accepted as is. A multi-token candidate is
/// accepted only when the spelled amount confirms one reading, or when the
/// split is a plain thousands grouping ("12 345", "3 400.00"), or when the
/// text says "un mil" next to a single stray digit.
pub fn validate_amount(raw: &str, context: &str, full_text: &str) -> NormalizeResult<ValidatedAmount> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let accept = |digits: String, reason: &str| -> NormalizeResult<ValidatedAmount> {
        let value = parse_amount(&digits)?;
        Ok(ValidatedAmount {
            value,
            corrected: digits,
            reason: reason.to_string(),
        })
    };

    match parts.as_slice() {
        [] => return Err(ValidationRejected::new(raw, "empty amount")),
        [single] => return accept(single.to_string(), "single token amount"),
        _ => {}
    }

    let joined = parts.concat();
    let last = parts[parts.len() - 1].to_string();

    let spelled = spelled_amount(context).or_else(|| spelled_amount(full_text));
    if let Some(spelled) = spelled {
        for (candidate, reason) in [
            (joined.clone(), "grouping confirmed by spelled amount"),
            (last.clone(), "stray prefix dropped, confirmed by spelled amount"),
        ] {
            if parse_amount(&candidate).is_ok_and(|value| value.trunc() as u64 == spelled) {
                return accept(candidate, reason);
            }
        }
    }

    if let [prefix, suffix] = parts.as_slice() {
        if prefix.len() == 1 && LONG_SUFFIX.is_match(suffix) {
            let lowered = format!("{} {}", context, full_text).to_lowercase();
            if lowered.contains("un mil") {
                return accept(suffix.to_string(), "stray prefix dropped, text says 'un mil'");
            }
        }
        if GROUP_PREFIX.is_match(prefix) && GROUP_SUFFIX.is_match(suffix) {
            return accept(joined, "thousands grouping");
        }
    }

    Err(ValidationRejected::new(
        raw,
        "ambiguous multi-part amount without textual confirmation",
    ))
}

/// Value of a Spanish spelled amount inside parentheses, e.g.
/// "(DOS MIL QUINIENTOS PESOS 00/100 MN)" -> 2500
pub fn spelled_amount(text: &str) -> Option<u64> {
    let caps = SPELLED_AMOUNT.captures(text)?;
    parse_spanish_number(&caps[1])
}

/// Parse Spanish number words. Leading non-number words are skipped and
/// parsing stops at the first non-number word after a number. Values that
/// overflow `u64` yield `None`.
pub fn parse_spanish_number(words: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut current: u64 = 0;
    let mut seen = false;

    for word in words.split_whitespace() {
        let word = strip_accents(&word.to_lowercase());
        match word.as_str() {
            "y" if seen => continue,
            "mil" => {
                total = total.checked_add(current.max(1).checked_mul(1000)?)?;
                current = 0;
                seen = true;
            }
            "millon" | "millones" => {
                total = total.checked_add(current.max(1))?.checked_mul(1_000_000)?;
                current = 0;
                seen = true;
            }
            other => match number_word(other) {
                Some(value) => {
                    current = current.checked_add(value)?;
                    seen = true;
                }
                None if seen => break,
                None => continue,
            },
        }
    }

    if !seen {
        return None;
    }
    total.checked_add(current)
}

fn number_word(word: &str) -> Option<u64> {
    let value = match word {
        "un" | "uno" | "una" => 1,
        "dos" => 2,
        "tres" => 3,
        "cuatro" => 4,
        "cinco" => 5,
        "seis" => 6,
        "siete" => 7,
        "ocho" => 8,
        "nueve" => 9,
        "diez" => 10,
        "once" => 11,
        "doce" => 12,
        "trece" => 13,
        "catorce" => 14,
        "quince" => 15,
        "dieciseis" => 16,
        "diecisiete" => 17,
        "dieciocho" => 18,
        "diecinueve" => 19,
        "veinte" => 20,
        "veintiun" | "veintiuno" => 21,
        "veintidos" => 22,
        "veintitres" => 23,
        "veinticuatro" => 24,
        "veinticinco" => 25,
        "veintiseis" => 26,
        "veintisiete" => 27,
        "veintiocho" => 28,
        "veintinueve" => 29,
        "treinta" => 30,
        "cuarenta" => 40,
        "cincuenta" => 50,
        "sesenta" => 60,
        "setenta" => 70,
        "ochenta" => 80,
        "noventa" => 90,
        "cien" | "ciento" => 100,
        "doscientos" => 200,
        "trescientos" => 300,
        "cuatrocientos" => 400,
        "quinientos" => 500,
        "seiscientos" => 600,
        "setecientos" => 700,
        "ochocientos" => 800,
        "novecientos" => 900,
        _ => return None,
    };
    Some(value)
}

fn strip_accents(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            other => other,
        })
        .collect()
}

/// Payment categories stored in `t_pago`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentType {
    #[serde(rename = "ANTICIPO A PAQUETE NUEVO")]
    AnticipoPaqueteNuevo,
    #[serde(rename = "PAGO PARCIAL")]
    PagoParcial,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::AnticipoPaqueteNuevo => "ANTICIPO A PAQUETE NUEVO",
            PaymentType::PagoParcial => "PAGO PARCIAL",
        }
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the text after "por concepto de"
pub fn classify_payment_type(concept: &str) -> PaymentType {
    let lowered = concept.to_lowercase();
    if ANTICIPO_TOKENS.iter().any(|token| lowered.contains(token)) {
        PaymentType::AnticipoPaqueteNuevo
    } else {
        PaymentType::PagoParcial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    #[test]
    fn test_month_table_accepts_ocr_variants() {
        assert_eq!(month_from_name("Agosto"), Some(8));
        assert_eq!(month_from_name("agoste"), Some(8));
        assert_eq!(month_from_name("SEPTIEMBRE."), Some(9));
        assert_eq!(month_from_name("setiembre"), Some(9));
        assert_eq!(month_from_name("cliente"), None);
    }

    #[test]
    fn test_build_date_rejects_impossible_dates() {
        assert_eq!(build_date(2024, 2, 29), Ok(ymd(2024, 2, 29)));
        assert!(build_date(2024, 2, 30).is_err());
        assert!(build_date(2023, 2, 29).is_err());
        assert!(build_date(2024, 13, 1).is_err());
        assert!(build_date(2024, 4, 31).is_err());
        assert!(build_date(2019, 1, 1).is_err());
        assert!(build_date(2031, 1, 1).is_err());
    }

    #[test]
    fn test_accepted_dates_round_trip() {
        for (y, m, d) in [(2020, 1, 1), (2024, 8, 28), (2025, 5, 25), (2030, 12, 31)] {
            let date = build_date(y, m, d).expect("valid date");
            let iso = format_iso(date);
            let reparsed = NaiveDate::parse_from_str(&iso, "%Y-%m-%d").expect("iso");
            assert_eq!(reparsed, date);
            assert_eq!(format_iso(reparsed), iso);
        }
    }

    #[test]
    fn test_contract_date_phrasings() {
        assert_eq!(
            parse_contract_date("se celebra a los 28 días del mes de Agosto del año 2024"),
            Ok(ymd(2024, 8, 28))
        );
        assert_eq!(parse_contract_date("28 del mes de Agosto del año 2024"), Ok(ymd(2024, 8, 28)));
        assert_eq!(parse_contract_date("28 del mes de agoste del afio 2024"), Ok(ymd(2024, 8, 28)));
        assert_eq!(parse_contract_date("3 de Marzo de 2025"), Ok(ymd(2025, 3, 3)));
        assert_eq!(parse_contract_date("Agosto 28, 2024"), Ok(ymd(2024, 8, 28)));
        assert_eq!(parse_contract_date("28 Agosto 2024"), Ok(ymd(2024, 8, 28)));
        assert_eq!(parse_contract_date("28/08/2024"), Ok(ymd(2024, 8, 28)));
    }

    #[test]
    fn test_contract_date_rejections() {
        assert!(parse_contract_date("30 de Febrero de 2024").is_err());
        assert!(parse_contract_date("28 de Agosto de 1999").is_err());
        assert!(parse_contract_date("sin fecha").is_err());
        assert!(find_contract_date("sin fecha").is_none());
        assert!(matches!(find_contract_date("30 de Febrero de 2024"), Some(Err(_))));
    }

    #[test]
    fn test_receipt_date_formats() {
        assert_eq!(parse_receipt_date("25/05/2025 11:48:05"), Ok(ymd(2025, 5, 25)));
        assert_eq!(parse_receipt_date("25/05/2025"), Ok(ymd(2025, 5, 25)));
        assert_eq!(parse_receipt_date("3105/2025"), Ok(ymd(2025, 5, 31)));
        assert_eq!(parse_receipt_date("305/2025"), Ok(ymd(2025, 5, 3)));
        assert_eq!(parse_receipt_date("1 3/06/2025"), Ok(ymd(2025, 6, 13)));
        assert_eq!(parse_receipt_date("2O/O6/2025"), Ok(ymd(2025, 6, 20)));
        assert_eq!(parse_receipt_date("El 5 de mayo de 2025"), Ok(ymd(2025, 5, 5)));
    }

    #[test]
    fn test_receipt_date_rejections() {
        assert!(parse_receipt_date("31/02/2025").is_err());
        assert!(parse_receipt_date("12/13/2025").is_err());
        assert!(parse_receipt_date("25/05/25").is_err());
        assert!(parse_receipt_date("").is_err());
    }

    #[test]
    fn test_parse_amount_locales() {
        assert_eq!(parse_amount("7,900.00"), Ok(7900.0));
        assert_eq!(parse_amount("16.000"), Ok(16000.0));
        assert_eq!(parse_amount("16.000,00"), Ok(16000.0));
        assert_eq!(parse_amount("$ 1,500.00"), Ok(1500.0));
        assert_eq!(parse_amount("1500.00"), Ok(1500.0));
        assert_eq!(parse_amount("850"), Ok(850.0));
        assert_eq!(parse_amount("1500,50"), Ok(1500.5));
    }

    #[test]
    fn test_parse_amount_rejections() {
        assert!(parse_amount("0.00").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("1.2.3,4,5").is_err());
        assert!(parse_amount("2,000,000.00").is_err());
    }

    #[test]
    fn test_spelled_numbers() {
        assert_eq!(parse_spanish_number("UN MIL"), Some(1000));
        assert_eq!(parse_spanish_number("DOS MIL QUINIENTOS"), Some(2500));
        assert_eq!(parse_spanish_number("mil trescientos cincuenta y cinco"), Some(1355));
        assert_eq!(parse_spanish_number("son ochocientos"), Some(800));
        assert_eq!(parse_spanish_number("MN"), None);
        assert_eq!(spelled_amount("$ 1 1000.00 (UN MIL PESOS 00/100 MN)"), Some(1000));
    }

    #[test]
    fn test_spelled_amount_overflow_is_rejected() {
        assert_eq!(parse_spanish_number("MILLONES MILLONES MILLONES MILLONES"), None);
        assert_eq!(parse_spanish_number("MILLONES MILLONES MILLONES"), Some(1_000_001_000_001_000_000));
        assert_eq!(
            spelled_amount("(MILLONES MILLONES MILLONES MILLONES MIL PESOS 00/100 MN)"),
            None
        );

        let text = "$ 5 1000.00 (MILLONES MILLONES MILLONES MILLONES PESOS";
        assert!(validate_amount("5 1000.00", text, text).is_err());
    }

    #[test]
    fn test_stray_prefix_with_spelled_amount() {
        let text = "$ 1 1000.00 (UN MIL PESOS 00/100 MN)";
        let validated = validate_amount("1 1000.00", text, text).expect("accepted");
        assert_eq!(validated.value, 1000.0);
        assert_eq!(validated.corrected, "1000.00");
    }

    #[test]
    fn test_thousands_grouping() {
        let validated = validate_amount("12 345", "$ 12 345", "").expect("accepted");
        assert_eq!(validated.value, 12345.0);
        let validated = validate_amount("3 400.00", "$ 3 400.00", "").expect("accepted");
        assert_eq!(validated.value, 3400.0);
    }

    #[test]
    fn test_spelled_amount_confirms_grouping() {
        let text = "la cantidad de $ 2 500.00 (DOS MIL QUINIENTOS PESOS 00/100 MN)";
        let validated = validate_amount("2 500.00", text, text).expect("accepted");
        assert_eq!(validated.value, 2500.0);
        assert!(validated.reason.contains("spelled"));
    }

    #[test]
    fn test_ambiguous_amount_rejected() {
        let rejection = validate_amount("5 1000.00", "$ 5 1000.00", "sin texto").unwrap_err();
        assert!(rejection.reason.contains("ambiguous"));
    }

    #[test]
    fn test_single_token_amount_accepted() {
        let validated = validate_amount("1,500.00", "$ 1,500.00", "").expect("accepted");
        assert_eq!(validated.value, 1500.0);
    }

    #[test]
    fn test_payment_type() {
        assert_eq!(
            classify_payment_type("ANTICIPO A PAQUETE NUEVO"),
            PaymentType::AnticipoPaqueteNuevo
        );
        assert_eq!(classify_payment_type("armtionin a pqt"), PaymentType::AnticipoPaqueteNuevo);
        assert_eq!(classify_payment_type("SESION 3 DE 10"), PaymentType::PagoParcial);
        assert_eq!(classify_payment_type(""), PaymentType::PagoParcial);
        assert_eq!(PaymentType::PagoParcial.to_string(), "PAGO PARCIAL");
    }
}
