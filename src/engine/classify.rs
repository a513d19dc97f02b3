//! Auto-categorization: keyword-pattern classifier (spec §4.3)
//!
//! First-match-wins over an ordered rule table per axis (type, concept).
//! Mirrors the teacher's regex-driven tag suggestion (`auto_tagging.rs`),
//! generalized from free-form tags to the closed `MemoryType`/`MemoryConcept`
//! enums this engine classifies into.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{MemoryConcept, MemoryType};

pub struct TypeRule {
    pub pattern: Regex,
    pub memory_type: MemoryType,
}

pub struct ConceptRule {
    pub pattern: Regex,
    pub memory_concept: MemoryConcept,
}

fn rx(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in classifier pattern must compile")
}

static TYPE_RULES: Lazy<Vec<TypeRule>> = Lazy::new(|| {
    vec![
        TypeRule {
            pattern: rx(r"(?i)\b(fix(ed|es)?|bug|crash|error|regression)\b"),
            memory_type: MemoryType::Bugfix,
        },
        TypeRule {
            pattern: rx(r"(?i)\b(decid(ed|e)|chose|chosen|decision|picked)\b"),
            memory_type: MemoryType::Decision,
        },
        TypeRule {
            pattern: rx(r"(?i)\b(refactor(ed|ing)?|clean(ed)? up|restructur)\b"),
            memory_type: MemoryType::Refactor,
        },
        TypeRule {
            pattern: rx(r"(?i)\b(discover(ed|y)|found that|turns out|realized)\b"),
            memory_type: MemoryType::Discovery,
        },
        TypeRule {
            pattern: rx(r"(?i)\b(implement(ed)?|add(ed)? support|new feature|built)\b"),
            memory_type: MemoryType::Feature,
        },
    ]
});

static CONCEPT_RULES: Lazy<Vec<ConceptRule>> = Lazy::new(|| {
    vec![
        ConceptRule {
            pattern: rx(r"(?i)\b(gotcha|careful|watch out|trap|footgun)\b"),
            memory_concept: MemoryConcept::Gotcha,
        },
        ConceptRule {
            pattern: rx(r"(?i)\b(trade-?off|pros and cons|at the cost of)\b"),
            memory_concept: MemoryConcept::TradeOff,
        },
        ConceptRule {
            pattern: rx(r"(?i)\b(pattern|idiom|convention|approach (is|was) to)\b"),
            memory_concept: MemoryConcept::Pattern,
        },
        ConceptRule {
            pattern: rx(r"(?i)\b(works by|how .* works|under the hood|internally)\b"),
            memory_concept: MemoryConcept::HowItWorks,
        },
    ]
});

/// First matching rule wins; falls back to the `Default` variant.
pub fn classify_type(text: &str) -> MemoryType {
    TYPE_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(text))
        .map(|rule| rule.memory_type)
        .unwrap_or_default()
}

pub fn classify_concept(text: &str) -> MemoryConcept {
    CONCEPT_RULES
        .iter()
        .find(|rule| rule.pattern.is_match(text))
        .map(|rule| rule.memory_concept)
        .unwrap_or_default()
}

static FILE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    rx(r"(?x)
        \b
        ([A-Za-z0-9_\-./]+ / )*
        [A-Za-z0-9_\-]+
        \. (rs|py|ts|tsx|js|jsx|go|java|rb|toml|json|yaml|yml|md|sql|sh)
        \b
    ")
});

/// Extracts path-like substrings (spec §4.3 step 3).
pub fn extract_files(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    FILE_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|f| seen.insert(f.clone()))
        .collect()
}

/// Splits on sentence boundaries, capped at 10 (spec §4.3 step 3).
pub fn extract_facts(text: &str) -> Vec<String> {
    const MAX_FACTS: usize = 10;
    text.split(|c| c == '.' || c == '\n')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(MAX_FACTS)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bugfix_from_keyword() {
        assert_eq!(classify_type("Fixed a crash in the parser"), MemoryType::Bugfix);
    }

    #[test]
    fn classifies_decision_from_keyword() {
        assert_eq!(
            classify_type("The team picked PostgreSQL for prod"),
            MemoryType::Decision
        );
    }

    #[test]
    fn unmatched_text_falls_back_to_general() {
        assert_eq!(classify_type("The sky is blue today"), MemoryType::General);
    }

    #[test]
    fn extracts_file_paths() {
        let files = extract_files("Updated src/engine/mod.rs and config.toml today");
        assert!(files.contains(&"src/engine/mod.rs".to_string()));
        assert!(files.contains(&"config.toml".to_string()));
    }

    #[test]
    fn facts_are_capped_at_ten() {
        let text = (0..15).map(|i| format!("fact {}", i)).collect::<Vec<_>>().join(". ");
        assert_eq!(extract_facts(&text).len(), 10);
    }
}
