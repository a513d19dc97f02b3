//! Language detection (spec §4.8)
//!
//! Two stages: a Unicode-script-family heuristic narrows non-Latin text to
//! its language directly; Latin-script text is then disambiguated with a
//! small bundled trigram frequency table. No external dependency — the
//! teacher's `once_cell::Lazy` static-table idiom, generalized from
//! `content_utils`'s text-stats helpers to a classifier.

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const UNKNOWN_LANGUAGE: &str = "und";
const CONFIDENCE_FLOOR: f32 = 0.5;

const SUPPORTED_LANGUAGES: &[&str] = &["en", "es", "fr", "de", "pt", "ru", "ja", "ko", "zh", "ar", "he", "el", "hi"];

pub fn supported_languages() -> &'static [&'static str] {
    SUPPORTED_LANGUAGES
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub language_code: &'static str,
    pub confidence: f32,
}

/// Script family a character belongs to, used to short-circuit detection
/// for non-Latin text.
fn script_language(c: char) -> Option<&'static str> {
    match c as u32 {
        0x3040..=0x309F | 0x30A0..=0x30FF => Some("ja"),
        0x4E00..=0x9FFF => Some("zh"),
        0xAC00..=0xD7A3 => Some("ko"),
        0x0400..=0x04FF => Some("ru"),
        0x0600..=0x06FF => Some("ar"),
        0x0590..=0x05FF => Some("he"),
        0x0370..=0x03FF => Some("el"),
        0x0900..=0x097F => Some("hi"),
        _ => None,
    }
}

static TRIGRAM_TABLES: Lazy<HashMap<&'static str, HashMap<&'static str, f32>>> = Lazy::new(|| {
    let mut tables = HashMap::new();
    tables.insert("en", freq_table(&["the", "and", "ing", "ion", "ent", "for", "tha", "you"]));
    tables.insert("es", freq_table(&["que", "de ", "ion", "ent", "nte", "ado", "para", "los "]));
    tables.insert("fr", freq_table(&["les", "que", "ent", "ion", "des", "pou", "eur", "ais"]));
    tables.insert("de", freq_table(&["der", "die", "und", "ich", "ein", "sch", "cht", "den "]));
    tables.insert("pt", freq_table(&["que", "ent", "ado", "com", "ara", "nto", "ção", "dos "]));
    tables
});

fn freq_table(top_trigrams: &[&'static str]) -> HashMap<&'static str, f32> {
    top_trigrams
        .iter()
        .enumerate()
        .map(|(rank, trigram)| (*trigram, 1.0 / (rank as f32 + 1.0)))
        .collect()
}

fn trigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.len() < 3 {
        return vec![];
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

fn score_latin_language(text: &str) -> Detection {
    let grams = trigrams(text);
    if grams.is_empty() {
        return Detection {
            language_code: UNKNOWN_LANGUAGE,
            confidence: 0.0,
        };
    }

    let mut best: Option<(&'static str, f32)> = None;
    let mut total_score = 0.0_f32;
    let mut scores: Vec<(&'static str, f32)> = Vec::new();

    for (&lang, table) in TRIGRAM_TABLES.iter() {
        let score: f32 = grams
            .iter()
            .filter_map(|gram| table.get(gram.as_str()))
            .sum();
        total_score += score;
        scores.push((lang, score));
        if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
            best = Some((lang, score));
        }
    }

    match best {
        Some((lang, score)) if total_score > 0.0 => Detection {
            language_code: lang,
            confidence: (score / total_score).clamp(0.0, 1.0),
        },
        _ => Detection {
            // Latin script with no trigram signal (e.g. all numbers/symbols)
            // still defaults to English rather than "und" — ASCII prose
            // with no recognizable trigrams is the common empty-signal case.
            language_code: "en",
            confidence: CONFIDENCE_FLOOR,
        },
    }
}

pub struct LanguageDetector;

impl LanguageDetector {
    pub fn new() -> Self {
        LanguageDetector
    }

    pub fn detect(&self, text: &str) -> Detection {
        if text.trim().is_empty() {
            return Detection {
                language_code: UNKNOWN_LANGUAGE,
                confidence: 0.0,
            };
        }

        if let Some(lang) = text.chars().find_map(script_language) {
            return Detection {
                language_code: lang,
                confidence: 0.95,
            };
        }

        let detection = score_latin_language(text);
        if detection.confidence < CONFIDENCE_FLOOR {
            Detection {
                language_code: UNKNOWN_LANGUAGE,
                confidence: detection.confidence,
            }
        } else {
            detection
        }
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_japanese_by_script() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("これはテストです");
        assert_eq!(detection.language_code, "ja");
    }

    #[test]
    fn detects_russian_by_script() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("Привет, как дела");
        assert_eq!(detection.language_code, "ru");
    }

    #[test]
    fn empty_text_is_unknown() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("   ");
        assert_eq!(detection.language_code, UNKNOWN_LANGUAGE);
    }

    #[test]
    fn english_prose_detected_with_confidence_above_floor() {
        let detector = LanguageDetector::new();
        let detection = detector.detect("the quick brown fox jumps over the lazy dog for the entire afternoon");
        assert_eq!(detection.language_code, "en");
        assert!(detection.confidence >= CONFIDENCE_FLOOR);
    }
}
