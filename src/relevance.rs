//! Relevance scoring for company search results.
//!
//! A name is scored against the search term in tiers: whole-term matches
//! first, then overlap of significant words. Common fund and legal words
//! ("capital", "partners", "ltd") carry no signal and are ignored.

use crate::util::normalize_name;

/// Name equals the term after normalisation.
pub const EXACT_SCORE: u32 = 100;
/// Name starts with the term.
pub const PREFIX_SCORE: u32 = 80;
/// Name contains the term.
pub const CONTAINS_SCORE: u32 = 60;
/// Every significant word of the term appears in the name.
pub const ALL_WORDS_SCORE: u32 = 50;
/// At least 70% of the significant words appear.
pub const MOST_WORDS_SCORE: u32 = 30;
/// At least one significant word appears.
pub const ANY_WORD_SCORE: u32 = 20;
/// Nothing matched.
pub const BASE_SCORE: u32 = 10;

/// Scores at or above this are worth showing.
pub const RELEVANCE_THRESHOLD: u32 = ANY_WORD_SCORE;

const MIN_SIGNIFICANT_LEN: usize = 3;

const COMMON_WORDS: &[&str] = &[
    "fund",
    "funds",
    "funding",
    "growth",
    "capital",
    "venture",
    "private",
    "equity",
    "management",
    "managers",
    "group",
    "partners",
    "partnership",
    "limited",
    "ltd",
    "inc",
    "incorporated",
    "llc",
    "investment",
    "investments",
    "investors",
    "the",
    "a",
    "an",
    "and",
    "or",
    "of",
    "for",
    "in",
    "on",
    "at",
    "to",
    "with",
];

/// Lowercased words of the term that are long enough and not common words.
pub fn significant_words(term: &str) -> Vec<String> {
    term.to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_SIGNIFICANT_LEN)
        .filter(|w| !COMMON_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Score how well `name` matches `term`.
pub fn calculate_relevance(name: &str, term: &str) -> u32 {
    let name = normalize_name(name);
    let term_norm = normalize_name(term);

    if name == term_norm {
        return EXACT_SCORE;
    }
    if name.starts_with(&term_norm) {
        return PREFIX_SCORE;
    }
    if name.contains(&term_norm) {
        return CONTAINS_SCORE;
    }

    let significant = significant_words(term);
    if significant.is_empty() {
        return BASE_SCORE;
    }

    let name_words: Vec<&str> = name.split_whitespace().collect();
    let matching = significant
        .iter()
        .filter(|sw| {
            name_words
                .iter()
                .any(|nw| nw.contains(sw.as_str()) || sw.contains(nw))
        })
        .count();
    word_overlap_score(matching, significant.len())
}

fn word_overlap_score(matching: usize, total: usize) -> u32 {
    if total >= 2 && matching == total {
        return ALL_WORDS_SCORE;
    }
    // ceil(total * 0.7) without floats
    let most = (total * 7).div_ceil(10);
    if total >= 2 && matching >= most {
        return MOST_WORDS_SCORE;
    }
    if matching > 0 {
        return ANY_WORD_SCORE;
    }
    BASE_SCORE
}

/// True when the name clears the display threshold.
pub fn is_relevant(name: &str, term: &str) -> bool {
    calculate_relevance(name, term) >= RELEVANCE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_term_tiers() {
        assert_eq!(calculate_relevance("Acme Capital", " acme   capital "), EXACT_SCORE);
        assert_eq!(calculate_relevance("Acme Capital Partners", "acme cap"), PREFIX_SCORE);
        assert_eq!(calculate_relevance("The Acme Fund", "acme"), CONTAINS_SCORE);
    }

    #[test]
    fn test_significant_words_skip_common_and_short() {
        assert_eq!(
            significant_words("The Savannah Growth Fund of Kenya"),
            vec!["savannah".to_string(), "kenya".to_string()]
        );
        assert!(significant_words("Capital Partners Ltd").is_empty());
    }

    #[test]
    fn test_word_overlap_tiers() {
        // Words present but not as a contiguous substring.
        assert_eq!(
            calculate_relevance("Kenya Savannah Ventures", "savannah kenya"),
            ALL_WORDS_SCORE
        );
        // 3 of 4 significant words: ceil(4 * 0.7) = 3.
        assert_eq!(
            calculate_relevance("Nile Delta Basin Partners", "basin delta nile zambezi"),
            MOST_WORDS_SCORE
        );
        assert_eq!(
            calculate_relevance("Savannah Holdings", "kenya savannah lagos"),
            ANY_WORD_SCORE
        );
        assert_eq!(calculate_relevance("Beta Holdings", "savannah"), BASE_SCORE);
    }

    #[test]
    fn test_common_words_alone_are_not_relevant() {
        assert!(!is_relevant("Beta Growth", "capital fund"));
        assert!(is_relevant("Savannah Holdings", "savannah fund"));
    }
}
