//! Lexical similarity between two responses.

use std::collections::HashSet;

/// Lower-cased, whitespace-separated word set of a text.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Jaccard overlap of the word sets of `a` and `b`, in [0, 1].
///
/// Two texts with no words at all are considered identical (1.0).
pub fn similarity(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    intersection as f64 / union as f64
}
