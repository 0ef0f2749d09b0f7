use std::collections::HashSet;

/// Candidates scoring below this are dropped from results entirely.
pub const RELEVANCE_THRESHOLD: f32 = 0.17;

/// Upper bound for token-overlap scores. 1.0 is reserved for substrings.
pub const TOKEN_COVERAGE_CAP: f32 = 0.95;

pub const SEMANTIC_WEIGHT: f32 = 0.75;

const MIN_TOKEN_CHARS: usize = 2;

pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Case-folded alphanumeric runs of at least two characters.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(|token| token.to_lowercase())
        .collect()
}

pub fn lexical_score(query: &str, candidate: &str) -> f32 {
    if candidate.contains(query) {
        return 1.0;
    }
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let candidate_tokens = tokenize(candidate);
    let shared = query_tokens.intersection(&candidate_tokens).count();
    let coverage = shared as f32 / query_tokens.len() as f32;
    coverage.min(TOKEN_COVERAGE_CAP)
}

/// Cosine similarity; zero-norm or mismatched vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON || !denom.is_finite() {
        return 0.0;
    }
    let sim = dot / denom;
    if sim.is_finite() { sim } else { 0.0 }
}

pub fn semantic_score(query: Option<&[f32]>, candidate: Option<&[f32]>) -> f32 {
    match (query, candidate) {
        (Some(q), Some(c)) => cosine_similarity(q, c).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

pub fn combined_score(lexical: f32, semantic: f32) -> f32 {
    if lexical >= TOKEN_COVERAGE_CAP {
        return lexical;
    }
    let blended = SEMANTIC_WEIGHT * semantic + (1.0 - SEMANTIC_WEIGHT) * lexical;
    lexical.max(blended)
}

pub fn score(
    query: &str,
    candidate: &str,
    query_vector: Option<&[f32]>,
    candidate_vector: Option<&[f32]>,
) -> f32 {
    let lexical = lexical_score(&normalize(query), &normalize(candidate));
    combined_score(lexical, semantic_score(query_vector, candidate_vector))
}

pub fn is_relevant(score: f32) -> bool {
    score >= RELEVANCE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Hello\n\tWORLD   again "), "hello world again");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_tokenize_drops_short_runs() {
        let tokens = tokenize("A quick-brown fox, x 42!");
        let expected: HashSet<String> =
            ["quick", "brown", "fox", "42"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_substring_scores_one() {
        assert_eq!(lexical_score("brown fox", "the quick brown fox"), 1.0);
        assert_eq!(score("Brown   FOX", "the quick brown fox", None, None), 1.0);
    }

    #[test]
    fn test_full_token_coverage_capped_below_substring() {
        let s = lexical_score("quick fox", "the quick brown fox");
        assert_eq!(s, TOKEN_COVERAGE_CAP);
    }

    #[test]
    fn test_partial_coverage() {
        let s = lexical_score("quick zebra", "the quick brown fox");
        assert!((s - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        assert_eq!(lexical_score("quick fox", "completely unrelated content"), 0.0);
        assert!(!is_relevant(score("quick fox", "completely unrelated content", None, None)));
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_basic() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_negative_similarity_clamped() {
        let s = semantic_score(Some(&[1.0, 0.0]), Some(&[-1.0, 0.0]));
        assert_eq!(s, 0.0);
    }

    #[test]
    fn test_missing_vector_means_no_semantic_signal() {
        assert_eq!(semantic_score(None, Some(&[1.0])), 0.0);
        assert_eq!(semantic_score(Some(&[1.0]), None), 0.0);
    }

    #[test]
    fn test_semantic_surfaces_zero_lexical_match() {
        let s = score("car", "automobile repair", Some(&[1.0, 0.0]), Some(&[0.9, 0.1]));
        assert!(s > 0.7);
        assert!(is_relevant(s));
    }

    #[test]
    fn test_weak_semantic_never_suppresses_lexical() {
        assert!((combined_score(0.5, 0.0) - 0.5).abs() < 1e-6);
        assert!((combined_score(0.5, 1.0) - 0.875).abs() < 1e-6);
    }

    #[test]
    fn test_strong_lexical_skips_blending() {
        assert_eq!(combined_score(0.95, 0.0), 0.95);
        assert_eq!(combined_score(1.0, 0.2), 1.0);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(is_relevant(RELEVANCE_THRESHOLD));
        assert!(!is_relevant(RELEVANCE_THRESHOLD - 0.001));
    }
}
