//! Text relevance scoring for catalog search
//!
//! Scores a video against a query over its title and description with
//! equal field weights. For every distinct query term found in a field:
//!
//! ```text
//! weight * freq * (0.5 + 0.5 * count / field_tokens)
//! freq = 1 + 1/2 + 1/4 + ...   (one addend per occurrence)
//! ```
//!
//! A single-word title that equals the query therefore scores exactly 1.0,
//! while a lone mention inside a long description scores a little over 0.5.

use std::collections::{HashMap, HashSet};

use crate::schemas::{Page, Video};

/// Results scoring below this are dropped
pub const MIN_RELEVANCE: f64 = 1.0;

const TITLE_WEIGHT: f64 = 1.0;
const DESCRIPTION_WEIGHT: f64 = 1.0;

/// Splits text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Distinct query terms in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn field_score(terms: &[String], field: &str, weight: f64) -> f64 {
    let tokens = tokenize(field);
    if tokens.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<&str, u32> = HashMap::new();
    for token in &tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let total = tokens.len() as f64;
    terms
        .iter()
        .filter_map(|term| counts.get(term.as_str()))
        .map(|&count| {
            let freq: f64 = (0..count).map(|i| 0.5f64.powi(i as i32)).sum();
            let coeff = 0.5 + 0.5 * count as f64 / total;
            weight * freq * coeff
        })
        .sum()
}

/// Relevance of one video for already-tokenized query terms.
pub fn score_terms(terms: &[String], video: &Video) -> f64 {
    field_score(terms, &video.title, TITLE_WEIGHT)
        + field_score(terms, &video.description, DESCRIPTION_WEIGHT)
}

/// Relevance of one video for a raw query string.
pub fn score(query: &str, video: &Video) -> f64 {
    score_terms(&query_terms(query), video)
}

/// Scores `candidates` (given in insertion order), keeps those at or above
/// [`MIN_RELEVANCE`], orders them by descending score and returns `page`.
///
/// The sort is stable, so equal scores keep insertion order.
pub fn rank(query: &str, candidates: Vec<Video>, page: Page) -> Vec<Video> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, Video)> = candidates
        .into_iter()
        .map(|video| (score_terms(&terms, &video), video))
        .filter(|(score, _)| *score >= MIN_RELEVANCE)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    page.slice(scored.into_iter().map(|(_, video)| video).collect())
}
