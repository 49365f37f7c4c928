//! # Name Repair
//!
//! Corrects OCR damage in Spanish personal names: spaces inserted inside a
//! word ("GUAD ALUPE"), surnames glued together ("SOSAASCENCIO"), letters
//! dropped at the end ("CARRILL") and digit/letter confusions.
//!
//! The name tables live in [`NameDictionary`]; the default one carries common
//! Mexican given names and surnames and can be replaced for other regions.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// Repair passes run until the name stops changing; this bounds pathological input
const MAX_PASSES: usize = 8;
/// Unrecognized tokens at least this long are split on a syllable boundary
const MIN_HEURISTIC_SPLIT_LEN: usize = 14;
const MIN_SPLIT_CONFIDENCE: f64 = 0.5;
/// Shortest final word accepted without further evidence
const MIN_LAST_WORD_LEN: usize = 4;

/// Connectors inside compound names; never merged with a neighbour
const PARTICLES: &[&str] = &["DE", "DEL", "LA", "LAS", "LOS", "Y", "E"];

const VOWELS: &str = "AEIOUÁÉÍÓÚÜ";

const DEFAULT_GIVEN_NAMES: &[&str] = &[
    "MARIA", "JOSE", "JUAN", "ANA", "ROSA", "LUIS", "CARLOS", "MIGUEL", "ANGEL", "GUADALUPE",
    "PATRICIA", "ALEJANDRA", "ALEJANDRO", "DANIEL", "GABRIEL", "EDUARDO", "FERNANDO", "RICARDO",
    "ROBERTO", "ANTONIO", "FRANCISCO", "ELIZABETH", "TERESA", "CARMEN", "MARTHA", "LETICIA",
    "SANDRA", "LORENA", "MONICA", "CLAUDIA", "ANDREA", "DIANA", "LAURA", "SILVIA", "VERONICA",
    "ADRIANA", "ELENA", "GLORIA", "YANET", "YANETH", "JANET", "FLOR", "FLORA", "NICOLE",
    "CRISTINA", "IRASEMA", "JESUS", "MARTIN", "MARIANA", "ELOY", "ALBINO", "NATALIA", "ALEXIA",
    "LUZ", "PAZ", "GABRIELA", "VALERIA",
];

const DEFAULT_SURNAMES: &[&str] = &[
    "GARCIA", "RODRIGUEZ", "MARTINEZ", "LOPEZ", "GONZALEZ", "HERNANDEZ", "PEREZ", "SANCHEZ",
    "RAMIREZ", "FLORES", "GOMEZ", "DIAZ", "MORALES", "JIMENEZ", "RUIZ", "GUTIERREZ", "MENDEZ",
    "CASTILLO", "ORTIZ", "MORENO", "TORRES", "SILVA", "VARGAS", "HERRERA", "CONTRERAS", "RAMOS",
    "GUERRERO", "MEDINA", "CASTRO", "ROMERO", "AGUILAR", "JUAREZ", "OTERO", "VEGA", "SOTO",
    "REYES", "NAVARRO", "CAMPOS", "CRUZ", "SALINAS", "LARA", "CABRERA", "VALENCIA", "MALDONADO",
    "ESPINOZA", "SANDOVAL", "PIMENTEL", "CARRILLO", "DOMINGUEZ", "VALDEZ", "ALVARADO",
    "CERVANTES", "AYALA", "RIOS", "ISLAS", "ROJAS", "PENA", "PEÑA", "SASTRE", "CESIN",
    "MANDUJANO", "CARMONA", "ROQUE", "MENDOZA", "TINOCO", "POMPA",
];

/// Surnames that OCR commonly glues to a neighbour
const DEFAULT_JOINABLE_SURNAMES: &[&str] = &[
    "GARCIA", "LOPEZ", "MARTINEZ", "GONZALEZ", "RODRIGUEZ", "HERNANDEZ", "PEREZ", "SANCHEZ",
    "RAMIREZ", "CRUZ", "FLORES", "GOMEZ", "DIAZ", "MORALES", "JIMENEZ", "RUIZ", "GUTIERREZ",
    "CHAVEZ", "TORRES", "VARGAS", "MENDOZA", "CASTILLO", "MORENO", "ORTIZ", "RIVERA", "SILVA",
    "RAMOS", "HERRERA", "MEDINA", "CASTRO", "VELASCO", "SEBA", "ROJAS", "CAMPOS", "GUERRERO",
    "LUNA", "SOTO", "DELGADO", "AGUILAR", "VEGA", "SALAZAR", "CONTRERAS", "VALENCIA", "ESPINOZA",
    "SANDOVAL", "CARRILLO", "DOMINGUEZ", "VAZQUEZ", "AVILA", "SAUCEDO", "LOURDES", "MUÑOZ",
    "MENDEZ", "REYES", "ROMERO", "SOSA", "ASCENCIO",
];

/// Prefixes of long names; a merged fragment starting with one is plausible
const DEFAULT_NAME_PREFIXES: &[&str] = &[
    "MARIA", "JOSE", "JUAN", "ANA", "ROSA", "LUIS", "CARLOS", "MIGUEL", "GUADALUPE", "PATRICIA",
    "ALEJAND", "DANIEL", "GABRIEL", "EDUARD", "FERNANDO", "RICARDO", "ROBERTO", "ANTONIO",
    "FRANCISC", "ELIZAB", "GARCIA", "RODRIGUEZ", "MARTINEZ", "LOPEZ", "GONZALEZ", "HERNANDEZ",
    "PEREZ", "SANCHEZ", "RAMIREZ", "FLORES", "GOMEZ", "DIAZ", "MORALES", "JIMENEZ", "RUIZ",
    "GUTIERREZ", "MENDEZ", "CASTILLO", "ORTIZ", "MORENO", "TORRES", "SILVA", "VARGAS", "HERRERA",
    "CONTRERAS", "RAMOS", "GUERRERO", "MEDINA", "CASTRO", "ROMERO", "AGUILAR",
];

/// Word endings left behind when OCR drops the final letters
const DEFAULT_TRUNCATIONS: &[(&str, &str)] = &[
    ("CARRILL", "CARRILLO"),
    ("CASTILL", "CASTILLO"),
    ("MORILL", "MORILLO"),
    ("GUILLERM", "GUILLERMO"),
    ("ROBERT", "ROBERTO"),
    ("ALBERT", "ALBERTO"),
    ("HUMBERT", "HUMBERTO"),
    ("RODRIGE", "RODRIGUEZ"),
    ("HERNANDR", "HERNANDEZ"),
    ("GONZALE", "GONZALEZ"),
    ("MARTINE", "MARTINEZ"),
    ("RAMIRE", "RAMIREZ"),
    ("SANCHE", "SANCHEZ"),
    ("FERNANDE", "FERNANDEZ"),
];

lazy_static! {
    /// Ordered literal corrections for recurring OCR misreads
    static ref OCR_CORRECTIONS: Vec<(Regex, &'static str)> = [
        (r"^CCI\s*\d*$", "CLIENTE NO IDENTIFICADO"),
        (r"\bMARIAN\s+ACESIN\b", "MARIANA CESIN"),
        (r"\bACESIN\b", "CESIN"),
        (r"\bMARI\s+ANA\b", "MARIANA"),
        (r"\bMARIA\s+NA\b", "MARIANA"),
        (r"\bGUADAL\s+UPE\b", "GUADALUPE"),
        (r"\bGUAD\s+ALUPE\b", "GUADALUPE"),
        (r"\bELIZA\s+BETH\b", "ELIZABETH"),
        (r"\bALEJAN\s+DRA\b", "ALEJANDRA"),
        (r"\bPATRI\s+CIA\b", "PATRICIA"),
        (r"\bGABRI\s+ELA\b", "GABRIELA"),
        (r"\bVALE\s+RIA\b", "VALERIA"),
        (r"\bHERNAN\s+DEZ\b", "HERNANDEZ"),
        (r"\bRODRI\s+GUEZ\b", "RODRIGUEZ"),
        (r"\bGON\s+ZALEZ\b", "GONZALEZ"),
        (r"\bMARTI\s+NEZ\b", "MARTINEZ"),
        (r"\bSANCHE\s+Z\b", "SANCHEZ"),
        (r"\bRAMIR\s+EZ\b", "RAMIREZ"),
        (r"\bMEND\s+OZA\b", "MENDOZA"),
        (r"\bOSCARG\b", "OSCAR"),
        (r"\bDELANGEL\b", "DEL ANGEL"),
        (r"\bELOR\b", "FLOR"),
        (r"\bELORA\b", "FLORA"),
        (r"\bPENA\b", "PEÑA"),
        (r"\b([A-ZÁÉÍÓÚÑ]{4,6})\s+(DEZ|EZ|LEZ|NEZ|REZ)\b", "$1$2"),
    ]
    .iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid name correction pattern"), *replacement))
    .collect();

    /// "MARIAYJOSE", "ANAEISABEL", "MARIADELUZ"
    static ref CONJUNCTION_SPLITS: Vec<(Regex, &'static str)> = [
        (r"^([A-ZÁÉÍÓÚÑ]{4,})Y([A-ZÁÉÍÓÚÑ]{4,})$", "Y"),
        (r"^([A-ZÁÉÍÓÚÑ]{3,})E([A-ZÁÉÍÓÚÑ]{4,})$", "E"),
        (r"^([A-ZÁÉÍÓÚÑ]{4,})DE([A-ZÁÉÍÓÚÑ]{4,})$", "DE"),
    ]
    .iter()
    .map(|(pattern, connector)| (Regex::new(pattern).expect("valid conjunction pattern"), *connector))
    .collect();

    static ref DEFAULT_REPAIRER: NameRepairer = NameRepairer::default();
}

/// Swappable name tables used by [`NameRepairer`]
#[derive(Debug, Clone)]
pub struct NameDictionary {
    known_words: HashSet<String>,
    name_prefixes: Vec<String>,
    joinable_surnames: Vec<String>,
    truncations: Vec<(String, String)>,
}

impl NameDictionary {
    /// Build a dictionary from custom tables. Entries are uppercased.
    pub fn new<S: AsRef<str>>(
        known_words: &[S],
        name_prefixes: &[S],
        joinable_surnames: &[S],
        truncations: &[(S, S)],
    ) -> Self {
        let upper = |s: &S| s.as_ref().trim().to_uppercase();
        let joinable: Vec<String> = joinable_surnames.iter().map(upper).collect();
        // Glued surnames are also complete words once separated
        let known_words = known_words.iter().map(upper).chain(joinable.iter().cloned()).collect();

        Self {
            known_words,
            name_prefixes: name_prefixes.iter().map(upper).collect(),
            joinable_surnames: joinable,
            truncations: truncations.iter().map(|(t, full)| (upper(t), upper(full))).collect(),
        }
    }

    /// A complete given name or surname
    pub fn is_known_word(&self, word: &str) -> bool {
        word.chars().count() >= 3 && self.known_words.contains(word)
    }

    /// Starts like a known name, e.g. "ALEJAND..."
    pub fn has_known_prefix(&self, word: &str) -> bool {
        word.chars().count() >= 4 && self.name_prefixes.iter().any(|p| word.starts_with(p.as_str()))
    }

    /// Split a token made of two glued surnames
    pub fn split_joined_surnames(&self, word: &str) -> Option<(String, String)> {
        self.joinable_surnames.iter().find_map(|first| {
            let rest = word.strip_prefix(first.as_str())?;
            self.joinable_surnames
                .iter()
                .any(|second| second == rest)
                .then(|| (first.clone(), rest.to_string()))
        })
    }

    /// Complete a word whose final letters were dropped
    pub fn complete_truncated(&self, word: &str) -> Option<String> {
        self.truncations.iter().find_map(|(truncated, full)| {
            word.strip_suffix(truncated.as_str())
                .map(|head| format!("{}{}", head, full))
        })
    }

    pub fn known_word_count(&self) -> usize {
        self.known_words.len()
    }
}

impl Default for NameDictionary {
    fn default() -> Self {
        let known: Vec<&str> = DEFAULT_GIVEN_NAMES.iter().chain(DEFAULT_SURNAMES).copied().collect();
        let truncations: Vec<(&str, &str)> = DEFAULT_TRUNCATIONS.to_vec();
        Self::new(&known, DEFAULT_NAME_PREFIXES, DEFAULT_JOINABLE_SURNAMES, &truncations)
    }
}

/// Applies the repair passes until the name is stable
#[derive(Debug, Clone, Default)]
pub struct NameRepairer {
    dictionary: NameDictionary,
}

impl NameRepairer {
    pub fn new(dictionary: NameDictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &NameDictionary {
        &self.dictionary
    }

    /// Repair an extracted name. The result is uppercase with single spaces,
    /// and repairing it again returns it unchanged.
    pub fn repair(&self, name: &str) -> String {
        let mut current = normalize_spacing(&name.to_uppercase());

        for _ in 0..MAX_PASSES {
            let next = self.repair_pass(&current);
            if next == current {
                break;
            }
            current = next;
        }

        if current != normalize_spacing(&name.to_uppercase()) {
            debug!(original = %name, repaired = %current, "Repaired OCR name");
        }
        current
    }

    fn repair_pass(&self, name: &str) -> String {
        let corrected = apply_ocr_corrections(name);
        let merged = self.merge_split_words(&corrected);
        let separated = self.split_glued_words(&merged);
        self.validate_ending(&separated)
    }

    /// Remove spaces OCR inserted inside a single word
    fn merge_split_words(&self, name: &str) -> String {
        let words: Vec<&str> = name.split_whitespace().collect();
        let mut out: Vec<String> = Vec::with_capacity(words.len());
        let mut i = 0;

        while i < words.len() {
            match words.get(i + 1) {
                Some(next) if self.should_merge(words[i], next) => {
                    out.push(format!("{}{}", words[i], next));
                    i += 2;
                }
                _ => {
                    out.push(words[i].to_string());
                    i += 1;
                }
            }
        }
        out.join(" ")
    }

    fn should_merge(&self, left: &str, right: &str) -> bool {
        if PARTICLES.contains(&left) || PARTICLES.contains(&right) {
            return false;
        }
        if !is_alphabetic(left) || !is_alphabetic(right) {
            return false;
        }

        let dict = &self.dictionary;
        let (left_known, right_known) = (dict.is_known_word(left), dict.is_known_word(right));
        if left_known && right_known {
            return false;
        }
        if dict.is_known_word(&format!("{}{}", left, right)) {
            return true;
        }
        if left_known || right_known {
            return false;
        }

        let (left_len, right_len) = (left.chars().count(), right.chars().count());
        if left_len <= 3 && right_len <= 8 {
            return true;
        }

        // "HERNAN DEZ" style: consonant then vowel across a short fragment
        let ends_consonant = left.chars().last().is_some_and(|c| !is_vowel(c));
        let starts_vowel = right.chars().next().is_some_and(is_vowel);
        ends_consonant
            && starts_vowel
            && (left_len <= 4 || right_len <= 4)
            && left_len <= 6
            && right_len <= 6
    }

    /// Insert spaces OCR dropped between words
    fn split_glued_words(&self, name: &str) -> String {
        name.split_whitespace()
            .map(|word| self.split_word(word))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn split_word(&self, word: &str) -> String {
        let dict = &self.dictionary;
        if dict.is_known_word(word) {
            return word.to_string();
        }

        if let Some((first, second)) = dict.split_joined_surnames(word) {
            return format!("{} {}", first, second);
        }

        if word.chars().count() <= 8 {
            return word.to_string();
        }

        for (pattern, connector) in CONJUNCTION_SPLITS.iter() {
            if let Some(caps) = pattern.captures(word) {
                let (first, second) = (&caps[1], &caps[2]);
                if self.is_name_part(first) && self.is_name_part(second) {
                    return format!("{} {} {}", first, connector, second);
                }
            }
        }

        if word.chars().count() >= MIN_HEURISTIC_SPLIT_LEN {
            if let Some(split) = split_on_syllable_boundary(word) {
                return split;
            }
        }
        word.to_string()
    }

    fn is_name_part(&self, part: &str) -> bool {
        self.dictionary.is_known_word(part) || self.dictionary.has_known_prefix(part)
    }

    /// Trim trailing tokens that cannot end a name and complete truncated surnames
    fn validate_ending(&self, name: &str) -> String {
        let mut words: Vec<String> = name.split_whitespace().map(str::to_string).collect();

        while words.len() > 1 {
            let last = words[words.len() - 1].as_str();
            if last == "X" || self.dictionary.is_known_word(last) {
                break;
            }
            let numeric = last.chars().all(|c| c.is_ascii_digit());
            if numeric || last.chars().count() < MIN_LAST_WORD_LEN {
                words.pop();
            } else {
                break;
            }
        }

        for word in words.iter_mut() {
            if let Some(full) = self.dictionary.complete_truncated(word) {
                *word = full;
            }
        }
        words.join(" ")
    }
}

/// Repair with the default Mexican name tables
pub fn repair_name(name: &str) -> String {
    DEFAULT_REPAIRER.repair(name)
}

fn apply_ocr_corrections(name: &str) -> String {
    let mut current = name.to_string();
    for (pattern, replacement) in OCR_CORRECTIONS.iter() {
        if pattern.is_match(&current) {
            current = pattern.replace_all(&current, *replacement).into_owned();
        }
    }
    let collapsed = collapse_repeated_final_vowel(&current);
    fix_digits_between_letters(&collapsed)
}

/// "GARCIAA" -> "GARCIA" when the stem has at least four letters
fn collapse_repeated_final_vowel(name: &str) -> String {
    name.split(' ')
        .map(|word| {
            let chars: Vec<char> = word.chars().collect();
            let Some(&last) = chars.last() else {
                return word.to_string();
            };
            if !is_vowel(last) {
                return word.to_string();
            }
            let run = chars.iter().rev().take_while(|&&c| c == last).count();
            let stem = chars.len() - run;
            if run >= 2 && stem >= 4 && chars[..stem].iter().all(|c| c.is_alphabetic()) {
                chars[..=stem].iter().collect()
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// "R0SA" -> "ROSA", "LU1S" -> "LUIS"
fn fix_digits_between_letters(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let is_upper = |c: Option<&char>| c.is_some_and(|c| c.is_uppercase());

    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let flanked = i > 0 && is_upper(chars.get(i - 1)) && is_upper(chars.get(i + 1));
            match (c, flanked) {
                ('0', true) => 'O',
                ('1', true) => 'I',
                _ => c,
            }
        })
        .collect()
}

/// Best vowel/consonant transition, scored by how balanced the halves are.
/// Later candidates win ties.
fn split_on_syllable_boundary(word: &str) -> Option<String> {
    let chars: Vec<char> = word.chars().collect();
    let len = chars.len();
    let mut best: Option<(usize, f64)> = None;

    for i in 4..=len.saturating_sub(4) {
        let (prev, cur) = (chars[i - 1], chars[i]);
        let mut confidence = 0.0;
        if is_vowel(prev) && !is_vowel(cur) {
            confidence += 0.3;
        }
        if !is_vowel(prev) && is_vowel(cur) {
            confidence += 0.4;
        }
        let balance = i.min(len - i) as f64 / i.max(len - i) as f64;
        confidence += balance * 0.3;

        if confidence >= MIN_SPLIT_CONFIDENCE && best.map_or(true, |(_, c)| confidence >= c) {
            best = Some((i, confidence));
        }
    }

    best.map(|(i, _)| {
        let head: String = chars[..i].iter().collect();
        let tail: String = chars[i..].iter().collect();
        format!("{} {}", head, tail)
    })
}

fn is_vowel(c: char) -> bool {
    VOWELS.contains(c)
}

fn is_alphabetic(word: &str) -> bool {
    word.chars().all(char::is_alphabetic)
}

fn normalize_spacing(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}
