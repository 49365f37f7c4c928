//! Contract strategies: the first client ("Nombre del Cliente 1") and the
//! signing date.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use super::receipt::{capture, known_client_strategy};
use super::Strategy;
use crate::normalizer::find_contract_date;

lazy_static! {
    static ref CLIENTE_ONE_LINE: Regex =
        Regex::new(r"(?i)client[eo]\s+1[:\-\s]*(\p{L}[\w ]+)").expect("valid contract client pattern");

    static ref CLIENTE_ONE_PATTERNS: Vec<Regex> = [
        r"(?i)nombre\s+d[eo][lt]?\s+cliente\s+1[:\s]*([^\n\r]+)",
        r"(?i)nombre\s+cliente\s+1[:\s]*([^\n\r]+)",
        r"(?i)nom[bv]r[eo]\s+[dl]?[eo][lt]?\s*client[eo]\s+1[:\s]*([^\n\r]+)",
        r"(?i)client[eo]\s+1[:\s]*(\p{L}[\p{L} ]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid contract client pattern"))
    .collect();

    static ref FECHA_FRAGMENT: Regex =
        Regex::new(r"(?i)(?:fecha\s+del\s+contrato|fecha|date)[:\s]*([^\n\r,]+)").expect("valid contract date pattern");
}

/// Treatment lines also mention "Cliente 1" ("Axila Cliente 1: 10 sesiones")
const TREATMENT_WORDS: &[&str] = &["axila", "sesiones", "tratamiento"];

fn scan_client_one_lines(text: &str) -> Option<String> {
    text.lines()
        .filter(|line| {
            let lowered = line.to_lowercase();
            lowered.contains("cliente 1:") && !TREATMENT_WORDS.iter().any(|w| lowered.contains(w))
        })
        .find_map(|line| capture(line, &CLIENTE_ONE_LINE))
}

fn client_strategies(known_clients: Arc<Vec<String>>) -> Vec<Strategy<String>> {
    let mut strategies = vec![
        known_client_strategy(known_clients),
        Strategy::finder("cliente 1 line", scan_client_one_lines),
    ];
    strategies.extend(
        CLIENTE_ONE_PATTERNS
            .iter()
            .map(|pattern| Strategy::finder("nombre del cliente 1", move |text| capture(text, pattern))),
    );
    strategies
}

fn date_strategies() -> Vec<Strategy<NaiveDate>> {
    vec![
        Strategy::new("contract date phrase", find_contract_date),
        Strategy::new("fecha fragment", |text| {
            capture(text, &FECHA_FRAGMENT).and_then(|fragment| find_contract_date(&fragment))
        }),
    ]
}

/// Strategy lists for contracts, built once per extractor
#[derive(Debug)]
pub struct ContractStrategies {
    client: Vec<Strategy<String>>,
    date: Vec<Strategy<NaiveDate>>,
}

impl ContractStrategies {
    pub fn new(known_clients: Arc<Vec<String>>) -> Self {
        Self {
            client: client_strategies(known_clients),
            date: date_strategies(),
        }
    }

    pub fn client(&self) -> &[Strategy<String>] {
        &self.client
    }

    pub fn date(&self) -> &[Strategy<NaiveDate>] {
        &self.date
    }
}
