//! Receipt strategies: "Recibí de" client names, payment dates, amounts,
//! payment concept and folio.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use super::Strategy;
use crate::normalizer::{
    build_date, classify_payment_type, parse_receipt_date, validate_amount, NormalizeResult, PaymentType,
    ValidatedAmount, ValidationRejected,
};

lazy_static! {
    static ref RECIBI_LINE: Regex =
        Regex::new(r"(?i)recib[íio]?\s+de|recibo\s+de|recibio\s+de").expect("valid receipt pattern");

    /// Per-line name shapes, tried in order
    static ref RECIBI_LINE_NAMES: Vec<Regex> = [
        r"(?i)recib[íio]?\s+de\s+(\p{L}[\p{L} ]+?)\s+la\s+cantidad",
        r"(?i)recib[íio]?\s+de\s+(\p{L}[\p{L} ]+?)(?:\s*[,:\-.]|\s*$)",
        r"(?i)recib[íio]?\s+de\s+(\p{L}+(?: \p{L}+){2,})",
        r"(?i)recib[íio]?\s+de\s+([\p{L} ]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid receipt name pattern"))
    .collect();

    static ref TRAILING_INITIAL: Regex = Regex::new(r"\s+(\p{Lu})$").expect("valid initial pattern");
    static ref CORIA_SURNAMES: Regex =
        Regex::new(r"(?i)(?:la\s+)?coria\s+(\p{Lu}{3,}(?: \p{Lu}{3,})*)").expect("valid surname pattern");
    static ref LEADING_SURNAMES: Regex =
        Regex::new(r"^(\p{Lu}{3,}(?: \p{Lu}{3,})*)").expect("valid surname pattern");
    static ref SURNAME_RUN: Regex = Regex::new(r"\b(\p{Lu}{4,}(?: \p{Lu}{4,})+)\b").expect("valid surname pattern");

    static ref RECIBI_PARTIAL: Regex =
        Regex::new(r"(?i)recib[íio]?\s+de\s+(\p{L}[\p{L} ]*\p{L})").expect("valid receipt pattern");
    static ref FRAGMENT_SURNAMES: Regex =
        Regex::new(r"^\p{Lu}{2,}(?: \p{Lu}{2,})*(?: \p{Lu})?").expect("valid surname pattern");

    /// Looser "Recibí de" shapes for text where line structure was lost
    static ref RECIBI_FALLBACKS: Vec<Regex> = [
        r"(?i)recib[íi]?\s+de\s+(\p{L}[\p{L} ]+?)(?:\s*[,:]|\s*\n|$| el\s| la\s+cantidad| por\s| pero\s)",
        r"(?i)recib[íi ]*de\s+(\p{L}[\p{L} ]+?)(?: to\s| la\s| el\s|\n|$)",
        r"(?i)recib[íi ]*de\s+([EFILOR][\p{L} ]+?)(?:\s*:|\s*\n|$| la\s+cantidad)",
        r"(?i)recib[íi ]*de\s+(\p{L}[\p{L} ]+?)(?: \d+| TOTAL| CANTIDAD| MONTO| PESOS| MN| CLIENTE| RECIBO)",
        r"(?i)recib[íi .]*de\s+(\p{L}[\p{L} .]+?)(?:\s*[,.]| o\s|\s*la\s*cantidad|\s*\$|\s*por\s*concepto)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid receipt fallback pattern"))
    .collect();

    static ref CLIENTE_LABEL: Regex =
        Regex::new(r"(?i)cliente:\s*(\p{L}[\p{L} ]+)").expect("valid label pattern");
    static ref NOMBRE_LABEL: Regex = Regex::new(r"(?i)nombre:\s*(\p{L}[\p{L} ]+)").expect("valid label pattern");
    static ref PAGO_DE: Regex = Regex::new(r"(?i)pago de\s+(\p{L}[\p{L} ]+)").expect("valid label pattern");
    static ref BEFORE_AMOUNT: Regex =
        Regex::new(r"(?i)(\p{L}[\p{L} ]{10,50}?)\s+la\s+cantidad\s+de\s*\$").expect("valid name pattern");
    static ref STANDALONE_NAME: Regex =
        Regex::new(r"^\.*\s*(\p{L}+(?:\s+\p{L}+){1,4})\s*[.o]*\s*$").expect("valid name pattern");

    static ref DATE_CAPTURES: Vec<(&'static str, Regex)> = [
        ("fecha label", r"(?i)(?:fecha|fech[ao4]|fecna)[:\s]*(\d{1,2}/\d{1,2}/\d{4}(?:\s+\d{1,2}:\d{2}(?::\d{2})?)?)"),
        ("fecha label split day", r"(?i)fecha[:\s]*(\d\s+\d/\d{1,2}/\d{4})"),
        ("numeric", r"\b(\d{1,2}/\d{1,2}/\d{4})\b"),
        ("numeric split day", r"(\d\s+\d/\d{1,2}/\d{4})"),
        ("glued day month", r"(\d{3,4}/\d{4})"),
        ("textual", r"(?i)(El\s+\d{1,2}\s+de\s+\p{L}+\s+de\s+\d{4})"),
    ]
    .iter()
    .map(|(name, p)| (*name, Regex::new(p).expect("valid receipt date pattern")))
    .collect();
    /// Last resort; a two-digit year means 20YY
    static ref ANY_SEPARATOR_DATE: Regex =
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b").expect("valid receipt date pattern");
    static ref YEAR_FIRST_DATE: Regex =
        Regex::new(r"\b(\d{4})[/-](\d{1,2})[/-](\d{1,2})\b").expect("valid receipt date pattern");

    static ref CANTIDAD_AMOUNT: Regex =
        Regex::new(r"(?i)la\s+cantidad\s+de\s*\$\s*([0-9 ,]+\.?\d*)([^.\n\r]{0,50})").expect("valid amount pattern");
    static ref CANTIDAD_LINE: Regex = Regex::new(r"(?i)cant\p{L}{0,3}ad\s+de\s*\$").expect("valid amount pattern");
    static ref CANTIDAD_LINE_AMOUNT: Regex =
        Regex::new(r"(?i)cant\p{L}{0,3}ad\s+de\s*\$\s*([0-9]+(?:\s*,\s*[0-9]+)*(?:\.\d+)?)").expect("valid amount pattern");
    static ref DOLLAR_NEAR: Regex =
        Regex::new(r"\$\s*([0-9]+\s*,?\s*[0-9]+\.?\d*)").expect("valid amount pattern");
    static ref DOLLAR_AMOUNT: Regex =
        Regex::new(r"\$\s*([0-9 ,]+\.?\d*)([^.\n\r]{0,50})").expect("valid amount pattern");
    static ref DOLLAR_LOOSE: Regex =
        Regex::new(r"\$\s*([0-9]+(?:\s*,?\s*[0-9]+)*(?:\.[0-9]+)?)\s*([^.\n\r]{0,100})").expect("valid amount pattern");
    static ref SPACED_COMMA: Regex = Regex::new(r"\s*,\s*").expect("valid amount pattern");

    static ref POR_CONCEPTO: Regex = Regex::new(r"(?i)por\s+concepto\s+de\s*([^\n\r]+)").expect("valid concept pattern");
    static ref CONCEPT_FALLBACKS: Vec<Regex> = [
        r"(?i)(anticipo\s+a\s+paquete\s+nuevo[^\n\r]*)",
        r"(?i)(anticipo[^\n\r]*paquete[^\n\r]*)",
        r"(?i)(paquete\s+nuevo[^\n\r]*)",
        r"(?i)(antico[^\n\r]*)",
        r"(?i)(armtionin[^\n\r]*)",
        r"(?i)concepto[:\s]*([^\n\r]+)",
        r"(?i)tipo[:\s]*([^\n\r]+)",
        r"(?i)pago[:\s]*([^\n\r]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid concept pattern"))
    .collect();

    static ref FOLIO_PATTERNS: Vec<Regex> = [
        r"(?i)folio:\s*([A-Za-z0-9-]+)",
        r"(?i)(q22-\d+)",
        r"(?i)folio\s*([A-Za-z0-9-]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid folio pattern"))
    .collect();
}

/// Words that appear after a truncated name but are never surnames
const NON_SURNAME_WORDS: &[&str] = &[
    "cantidad", "pesos", "fecha", "quinientos", "anticipo", "paquete", "nuevo", "concepto", "efectivo",
    "forma", "pago", "coria", "la", "el", "de", "por",
];

/// Vocabulary that marks a "Recibí de" hit as boilerplate rather than a client
const NOT_A_CLIENT: &[&str] = &["facturacion", "global", "empresa", "copia", "importante", "contrario"];

/// First capture group, trimmed; `None` when absent or blank
pub(crate) fn capture(text: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Literal matcher for names the operator knows OCR reads reliably
pub(crate) fn known_client_strategy(known_clients: Arc<Vec<String>>) -> Strategy<String> {
    let patterns: Vec<Regex> = known_clients
        .iter()
        .filter_map(|name| {
            let words: Vec<String> = name.split_whitespace().map(regex::escape).collect();
            if words.is_empty() {
                return None;
            }
            Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+"))).ok()
        })
        .collect();

    Strategy::finder("known client", move |text| {
        patterns
            .iter()
            .find_map(|p| p.find(text))
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase())
    })
}

fn looks_truncated(candidate: &str) -> bool {
    TRAILING_INITIAL.is_match(candidate)
        || candidate
            .split_whitespace()
            .any(|w| w.chars().count() == 1 && w.chars().all(char::is_uppercase))
}

fn is_plausible_client(candidate: &str) -> bool {
    let lowered = candidate.to_lowercase();
    candidate.chars().count() > 5
        && candidate.split_whitespace().count() >= 2
        && !NOT_A_CLIENT.iter().any(|w| lowered.contains(w))
}

fn contains_non_surname(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered
        .split_whitespace()
        .any(|w| NON_SURNAME_WORDS.contains(&w))
}

/// Surnames on a following line that complete a truncated name
fn surnames_on_line(line: &str) -> Option<String> {
    if let Some(surnames) = capture(line, &CORIA_SURNAMES) {
        return Some(surnames);
    }
    if let Some(surnames) = capture(line, &LEADING_SURNAMES) {
        if !contains_non_surname(&surnames) {
            return Some(surnames);
        }
    }
    SURNAME_RUN
        .find_iter(line)
        .map(|m| m.as_str())
        .find(|run| run.len() > 8 && !contains_non_surname(run))
        .map(str::to_string)
}

/// "MARIA C" + "ORTES LOPEZ" on the next line -> "MARIA CORTES LOPEZ"
fn reconstruct_truncated(candidate: &str, following: &[&str]) -> Option<String> {
    for line in following {
        let Some(surnames) = surnames_on_line(line.trim()) else {
            continue;
        };
        if surnames.chars().count() <= 5 {
            continue;
        }
        let (base, initial) = match TRAILING_INITIAL.captures(candidate) {
            Some(caps) => (TRAILING_INITIAL.replace(candidate, "").into_owned(), caps[1].to_string()),
            None => (candidate.to_string(), String::new()),
        };
        let rebuilt = format!("{} {}{}", base, initial, surnames);
        let words = rebuilt.split_whitespace().count();
        return (words >= 3 && rebuilt.chars().count() > 10).then_some(rebuilt);
    }
    None
}

/// First usable name on any "Recibí de" line, rebuilding names cut at a line break
fn scan_recibi_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if !RECIBI_LINE.is_match(line) {
            continue;
        }
        let Some(candidate) = RECIBI_LINE_NAMES.iter().find_map(|p| capture(line, p)) else {
            continue;
        };

        if looks_truncated(&candidate) {
            let end = (i + 4).min(lines.len());
            if let Some(rebuilt) = reconstruct_truncated(&candidate, &lines[i + 1..end]) {
                return Some(rebuilt);
            }
        }
        if is_plausible_client(&candidate) {
            return Some(candidate);
        }
    }
    None
}

/// A name split over several lines, with surnames leading the following lines
fn join_recibi_fragments(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let Some(mut name) = capture(line.trim(), &RECIBI_PARTIAL) else {
            continue;
        };
        for next in lines.iter().skip(i + 1).take(3) {
            let next = next.trim();
            let lowered = next.to_lowercase();
            if ["cantidad", "pesos", "fecha"].iter().any(|w| lowered.contains(w)) {
                continue;
            }
            if let Some(m) = FRAGMENT_SURNAMES.find(next) {
                if m.as_str().len() > 3 {
                    name.push(' ');
                    name.push_str(m.as_str());
                }
            }
        }
        if name.split_whitespace().count() >= 2 && name.chars().count() > 8 {
            return Some(name);
        }
    }
    None
}

/// Letterhead words that make a bare line a header rather than a name
const HEADER_WORDS: &[&str] = &["europiel", "sinergia", "laser", "center", "recibo", "pago", "contrato", "sucursal"];

fn standalone_name_line(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let name = capture(line, &STANDALONE_NAME)?;
        let lowered = name.to_lowercase();
        let is_header = lowered.split_whitespace().any(|w| HEADER_WORDS.contains(&w));
        (!is_header && name.split_whitespace().count() >= 2 && name.chars().count() > 8).then_some(name)
    })
}

fn name_before_amount(text: &str) -> Option<String> {
    let words: Vec<String> = capture(text, &BEFORE_AMOUNT)?
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if words.len() < 2 {
        return None;
    }
    Some(words[words.len().saturating_sub(4)..].join(" "))
}

fn client_strategies(known_clients: Arc<Vec<String>>) -> Vec<Strategy<String>> {
    let mut strategies = vec![
        known_client_strategy(known_clients),
        Strategy::finder("recibi line", scan_recibi_lines),
        Strategy::finder("recibi fragments", join_recibi_fragments),
    ];
    strategies.extend(
        RECIBI_FALLBACKS
            .iter()
            .map(|pattern| Strategy::finder("recibi fallback", move |text| capture(text, pattern))),
    );
    strategies.extend([
        Strategy::finder("cliente label", |text| capture(text, &CLIENTE_LABEL)),
        Strategy::finder("standalone line", standalone_name_line),
        Strategy::finder("nombre label", |text| capture(text, &NOMBRE_LABEL)),
        Strategy::finder("pago de", |text| {
            capture(text, &PAGO_DE).filter(|name| name.chars().count() > 10)
        }),
        Strategy::finder("before amount", name_before_amount),
    ]);
    strategies
}

fn date_strategies() -> Vec<Strategy<NaiveDate>> {
    let mut strategies: Vec<Strategy<NaiveDate>> = DATE_CAPTURES
        .iter()
        .map(|(name, pattern)| {
            Strategy::new(*name, move |text| capture(text, pattern).map(|raw| parse_receipt_date(&raw)))
        })
        .collect();

    strategies.push(Strategy::new("any separator", |text| {
        let caps = ANY_SEPARATOR_DATE.captures(text)?;
        let year = caps[3].parse::<i32>().map(|y| if caps[3].len() == 2 { 2000 + y } else { y });
        let parsed = (year, caps[2].parse::<u32>(), caps[1].parse::<u32>());
        Some(match parsed {
            (Ok(year), Ok(month), Ok(day)) => build_date(year, month, day),
            _ => Err(ValidationRejected::new(&caps[0], "unreadable date digits")),
        })
    }));
    strategies.push(Strategy::new("year first", |text| {
        let caps = YEAR_FIRST_DATE.captures(text)?;
        let parsed = (caps[1].parse::<i32>(), caps[2].parse::<u32>(), caps[3].parse::<u32>());
        Some(match parsed {
            (Ok(year), Ok(month), Ok(day)) => build_date(year, month, day),
            _ => Err(ValidationRejected::new(&caps[0], "unreadable date digits")),
        })
    }));
    strategies
}

/// Raw amount digits plus the text around them, validated after the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct AmountCandidate {
    pub raw: String,
    pub context: String,
}

impl AmountCandidate {
    fn new(raw: &str, context: &str) -> Self {
        Self {
            raw: SPACED_COMMA.replace_all(raw.trim(), ",").into_owned(),
            context: context.to_string(),
        }
    }

    /// Cross-check the digits against the spelled amount
    pub fn validate(&self, full_text: &str) -> NormalizeResult<ValidatedAmount> {
        validate_amount(&self.raw, &self.context, full_text)
    }
}

fn amount_on_cantidad_lines(text: &str) -> Option<AmountCandidate> {
    let lines: Vec<&str> = text.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim();
        if !CANTIDAD_LINE.is_match(line) {
            continue;
        }
        if let Some(raw) = capture(line, &CANTIDAD_LINE_AMOUNT) {
            return Some(AmountCandidate::new(&raw, line));
        }
        // Amount pushed to the next lines
        let widened = lines[i..(i + 3).min(lines.len())].join(" ");
        if let Some(raw) = capture(&widened, &DOLLAR_NEAR) {
            return Some(AmountCandidate::new(&raw, &widened));
        }
    }
    None
}

/// Amount locators. The first hit is final: a rejected amount is omitted
/// rather than replaced by a weaker match elsewhere in the text.
fn amount_strategies() -> Vec<Strategy<AmountCandidate>> {
    vec![
        Strategy::finder("la cantidad de", |text| {
            let caps = CANTIDAD_AMOUNT.captures(text)?;
            Some(AmountCandidate::new(&caps[1], &caps[0]))
        }),
        Strategy::finder("cantidad line", amount_on_cantidad_lines),
        Strategy::finder("dollar with separators", |text| {
            let caps = DOLLAR_AMOUNT.captures(text)?;
            let raw = &caps[1];
            (raw.contains(',') || raw.contains('.')).then(|| AmountCandidate::new(raw, &caps[0]))
        }),
        Strategy::finder("dollar loose", |text| {
            let caps = DOLLAR_LOOSE.captures(text)?;
            let context = format!("$ {}{}", &caps[1], &caps[2]);
            Some(AmountCandidate::new(&caps[1], &context))
        }),
    ]
}

fn payment_strategies() -> Vec<Strategy<PaymentType>> {
    let mut strategies = vec![Strategy::finder("por concepto de", |text| {
        capture(text, &POR_CONCEPTO).map(|concept| classify_payment_type(&concept))
    })];
    strategies.extend(CONCEPT_FALLBACKS.iter().map(|pattern| {
        Strategy::finder("concept fallback", move |text| {
            capture(text, pattern).map(|concept| classify_payment_type(&concept))
        })
    }));
    strategies.push(Strategy::finder("default", |_| Some(PaymentType::PagoParcial)));
    strategies
}

/// Folios carry at least one digit; "Folio Factura" is a label, not a folio
fn clean_folio(raw: &str) -> NormalizeResult<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .to_uppercase();
    if cleaned.chars().count() <= 2 {
        return Err(ValidationRejected::new(raw, "folio too short"));
    }
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return Err(ValidationRejected::new(raw, "folio without digits"));
    }
    Ok(cleaned)
}

fn folio_strategies() -> Vec<Strategy<String>> {
    FOLIO_PATTERNS
        .iter()
        .map(|pattern| Strategy::new("folio", move |text| capture(text, pattern).map(|raw| clean_folio(&raw))))
        .collect()
}

/// Strategy lists for receipts, built once per extractor
#[derive(Debug)]
pub struct ReceiptStrategies {
    client: Vec<Strategy<String>>,
    date: Vec<Strategy<NaiveDate>>,
    amount: Vec<Strategy<AmountCandidate>>,
    payment: Vec<Strategy<PaymentType>>,
    folio: Vec<Strategy<String>>,
}

impl ReceiptStrategies {
    pub fn new(known_clients: Arc<Vec<String>>) -> Self {
        Self {
            client: client_strategies(known_clients),
            date: date_strategies(),
            amount: amount_strategies(),
            payment: payment_strategies(),
            folio: folio_strategies(),
        }
    }

    pub fn client(&self) -> &[Strategy<String>] {
        &self.client
    }

    pub fn date(&self) -> &[Strategy<NaiveDate>] {
        &self.date
    }

    pub fn amount(&self) -> &[Strategy<AmountCandidate>] {
        &self.amount
    }

    pub fn payment(&self) -> &[Strategy<PaymentType>] {
        &self.payment
    }

    pub fn folio(&self) -> &[Strategy<String>] {
        &self.folio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{run_cascade, Cascade, DocumentKind, FieldExtractor};

    const RECEIPT: &str = "EUROPIEL SINERGIA LASER CENTER\n\
        RECIBO DE PAGO\n\
        Folio: Q22-10456\n\
        Fecha: 25/05/2025 11:48:05\n\
        Recibí de MARIA LUISA HERNANDEZ LANDEROS la cantidad de $ 1,500.00 (UN MIL QUINIENTOS PESOS 00/100 MN)\n\
        por concepto de ANTICIPO A PAQUETE NUEVO\n";

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
    }

    fn found<T>(cascade: Cascade<T>) -> T {
        match cascade {
            Cascade::Found { value, .. } => value,
            _ => panic!("expected a value"),
        }
    }

    #[test]
    fn test_full_receipt_extraction() {
        let extraction = FieldExtractor::default().extract(RECEIPT, DocumentKind::Recibo);
        let fields = extraction.fields;
        assert_eq!(fields.tipo, DocumentKind::Recibo);
        assert_eq!(fields.cliente.as_deref(), Some("MARIA LUISA HERNANDEZ LANDEROS"));
        assert_eq!(fields.fecha_contrato, Some(ymd(2025, 5, 25)));
        assert_eq!(fields.monto, Some(1500.0));
        assert_eq!(fields.t_pago, Some(PaymentType::AnticipoPaqueteNuevo));
        assert_eq!(fields.folio.as_deref(), Some("Q22-10456"));
    }

    #[test]
    fn test_truncated_name_rebuilt_from_next_line() {
        let text = "Recibí de MARIA C\nORTES VILLANUEVA\nla cantidad de $ 800.00";
        let strategies = ReceiptStrategies::new(Arc::default());
        assert_eq!(found(run_cascade(text, strategies.client())), "MARIA CORTES VILLANUEVA");
    }

    #[test]
    fn test_boilerplate_recibi_line_skipped() {
        let text = "Recibí de FACTURACION GLOBAL\nRecibí de LAURA VEGA MORALES, la cantidad de $ 300.00";
        let strategies = ReceiptStrategies::new(Arc::default());
        assert_eq!(found(run_cascade(text, strategies.client())), "LAURA VEGA MORALES");
    }

    #[test]
    fn test_known_client_wins() {
        let strategies = ReceiptStrategies::new(Arc::new(vec!["Ana Myryha Olvera Pinela".to_string()]));
        let text = "Recibí de ANA MYRYHA\nOLVERA PINELA la cantidad de $ 900.00";
        assert_eq!(found(run_cascade(text, strategies.client())), "ANA MYRYHA OLVERA PINELA");
    }

    #[test]
    fn test_receipt_date_variants() {
        let strategies = ReceiptStrategies::new(Arc::default());
        assert_eq!(found(run_cascade("Fecha: 1 3/06/2025", strategies.date())), ymd(2025, 6, 13));
        assert_eq!(found(run_cascade("Fech4: 02/07/2025", strategies.date())), ymd(2025, 7, 2));
        assert_eq!(found(run_cascade("hoy 3105/2025 ok", strategies.date())), ymd(2025, 5, 31));
        assert_eq!(found(run_cascade("El 5 de mayo de 2025", strategies.date())), ymd(2025, 5, 5));
        assert_eq!(found(run_cascade("impreso 2025-04-09", strategies.date())), ymd(2025, 4, 9));
    }

    #[test]
    fn test_two_digit_year_fallback() {
        let strategies = ReceiptStrategies::new(Arc::default());
        let cascade = run_cascade("pagado 7-03-25 en caja", strategies.date());
        assert!(matches!(cascade, Cascade::Found { strategy: "any separator", .. }));
        assert_eq!(found(cascade), ymd(2025, 3, 7));
        // 19 -> 2019, outside the accepted years
        assert!(matches!(run_cascade("pagado 7-03-19", strategies.date()), Cascade::Rejected(_)));
    }

    #[test]
    fn test_invalid_date_is_rejected_not_corrected() {
        let strategies = ReceiptStrategies::new(Arc::default());
        assert!(matches!(run_cascade("Fecha: 31/02/2025", strategies.date()), Cascade::Rejected(_)));
        assert_eq!(run_cascade("sin fecha", strategies.date()), Cascade::Missing);
    }

    #[test]
    fn test_ambiguous_amount_omitted() {
        let text = "Recibí de LAURA VEGA MORALES la cantidad de $ 12 45000 por tratamiento";
        let extraction = FieldExtractor::default().extract(text, DocumentKind::Recibo);
        assert_eq!(extraction.fields.monto, None);
        assert!(extraction.issues.iter().any(|issue| issue.field == "monto"));
    }

    #[test]
    fn test_stray_prefix_amount_confirmed_by_words() {
        let text = "la cantidad de $ 1 1000.00 (UN MIL PESOS 00/100 MN)";
        let strategies = ReceiptStrategies::new(Arc::default());
        let candidate = found(run_cascade(text, strategies.amount()));
        assert_eq!(candidate.raw, "1 1000.00");
        assert_eq!(candidate.validate(text).map(|a| a.value), Ok(1000.0));
    }

    #[test]
    fn test_amount_on_damaged_cantidad_line() {
        let text = "a cantdad de $ 2 , 500.00\nFecha: 01/06/2025";
        let strategies = ReceiptStrategies::new(Arc::default());
        let candidate = found(run_cascade(text, strategies.amount()));
        assert_eq!(candidate.raw, "2,500.00");
        assert_eq!(candidate.validate(text).map(|a| a.value), Ok(2500.0));
    }

    #[test]
    fn test_payment_type_defaults_to_partial() {
        let strategies = ReceiptStrategies::new(Arc::default());
        assert_eq!(found(run_cascade("sin datos", strategies.payment())), PaymentType::PagoParcial);
        assert_eq!(
            found(run_cascade("armtionin a paq", strategies.payment())),
            PaymentType::AnticipoPaqueteNuevo
        );
    }

    #[test]
    fn test_folio_requires_digits() {
        let strategies = ReceiptStrategies::new(Arc::default());
        assert!(matches!(run_cascade("Folio Factura", strategies.folio()), Cascade::Rejected(_)));
        assert_eq!(found(run_cascade("folio: abc-123", strategies.folio())), "ABC-123");
    }
}
