//! Frequency-based fallback keyword extraction.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Default number of keywords pulled from a text.
pub const DEFAULT_KEYWORD_LIMIT: usize = 10;

/// Words carrying no topical signal. Only words longer than three characters
/// can ever be keywords, so short function words are not listed.
const STOP_WORDS: &[&str] = &[
    "about", "above", "across", "after", "again", "against", "almost", "along", "already",
    "also", "although", "always", "among", "another", "anything", "approach", "based",
    "because", "been", "before", "being", "below", "between", "both", "could", "does",
    "doing", "down", "during", "each", "either", "even", "every", "first", "found", "from",
    "further", "given", "have", "having", "here", "however", "into", "itself", "just",
    "less", "like", "made", "make", "many", "more", "most", "much", "must", "neither",
    "never", "next", "none", "only", "onto", "other", "others", "otherwise", "over", "paper",
    "perhaps", "present", "propose", "proposed", "rather", "results", "same",
    "several", "shall", "show", "shows", "should", "since", "some", "such", "than", "that",
    "their", "theirs", "them", "themselves", "then", "there", "therefore", "these", "they",
    "this", "those", "though", "through", "thus", "together", "toward", "towards", "under",
    "until", "upon", "used", "using", "very", "well", "were", "what", "when", "where",
    "whether", "which", "while", "whose", "will", "with", "within", "without", "would",
    "your", "study", "studies", "article", "abstract",
];

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Up to `limit` most frequent non-stopword tokens longer than three
/// characters, lower-cased. Ties keep first-occurrence order.
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    static TOKEN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z'\-]*[A-Za-z]|[A-Za-z]").unwrap());

    // word -> (count, first position)
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    for (pos, m) in TOKEN.find_iter(text).enumerate() {
        let word = m.as_str().to_lowercase();
        if word.chars().count() <= 3 || is_stop_word(&word) {
            continue;
        }
        counts.entry(word).or_insert((0, pos)).0 += 1;
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(limit).map(|(w, _, _)| w).collect()
}
