//! Token-sort fuzzy ratio on a 0-100 scale.
//!
//! Strings are normalised (non-alphanumerics become spaces, lowercased), their
//! whitespace tokens sorted and re-joined, and the two results compared with
//! rapidfuzz's indel ratio.

use rapidfuzz::fuzz;

/// Lowercase, replace everything but letters, digits and `_` with spaces, trim.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn sorted_tokens(input: &str) -> String {
    let normalized = normalize(input);
    let mut tokens = normalized.split_whitespace().collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Indel similarity of two already-processed strings on a 0-100 scale,
/// rounded half-to-even.
pub fn ratio(a: &str, b: &str) -> u8 {
    let score = fuzz::ratio(a.chars(), b.chars()) * 100.0;
    score.round_ties_even().clamp(0.0, 100.0) as u8
}

/// Word-order insensitive similarity; empty input on either side scores 0.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    ratio(&a, &b)
}

/// Index and score of the best-scoring choice; ties keep the first maximum.
pub fn best_match<'a, I>(query: &str, choices: I) -> Option<(usize, u8)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, u8)> = None;
    for (i, choice) in choices.into_iter().enumerate() {
        let score = token_sort_ratio(query, choice);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best
}
