use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::embedding::{Embedder, EmbeddingCache};
use crate::scoring::{self, TOKEN_COVERAGE_CAP};
use crate::storage::models::{Item, ItemId};

/// Scores closer than this are ordered by recency instead.
pub const TIE_TOLERANCE: f32 = 0.001;

#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: Item,
    pub score: f32,
}

pub struct RankingIndex {
    cache: EmbeddingCache,
}

impl RankingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            cache: EmbeddingCache::new(embedder),
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Items relevant to `query`, best first. An empty query returns the
    /// history unchanged.
    pub fn rank(&mut self, items: &[Item], query: &str) -> Vec<Item> {
        if scoring::normalize(query).is_empty() {
            return items.to_vec();
        }
        self.score(items, query)
            .into_iter()
            .map(|scored| scored.item)
            .collect()
    }

    pub fn score(&mut self, items: &[Item], query: &str) -> Vec<ScoredItem> {
        let normalized_query = scoring::normalize(query);
        if normalized_query.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<(&Item, String)> = items
            .iter()
            .filter_map(|item| {
                let text = scoring::normalize(item.text_content()?);
                (!text.is_empty()).then_some((item, text))
            })
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let live: HashSet<ItemId> = candidates.iter().map(|(item, _)| item.id).collect();
        let pruned = self.cache.prune(&live);

        let query_vector = self.cache.vector_for(&normalized_query, None);

        let mut kept = Vec::new();
        for (item, text) in candidates {
            let lexical = scoring::lexical_score(&normalized_query, &text);
            let semantic = match &query_vector {
                // Blending is skipped for strong lexical matches anyway.
                Some(q) if lexical < TOKEN_COVERAGE_CAP => {
                    let candidate_vector = self.cache.vector_for(&text, Some(item.id));
                    scoring::semantic_score(Some(q), candidate_vector.as_deref())
                }
                _ => 0.0,
            };
            let score = scoring::combined_score(lexical, semantic);
            if scoring::is_relevant(score) {
                kept.push(ScoredItem {
                    item: item.clone(),
                    score,
                });
            }
        }

        debug!(
            query = %normalized_query,
            kept = kept.len(),
            pruned,
            cached = self.cache.len(),
            "ranked history"
        );
        order_by_relevance(kept)
    }
}

/// Score descending. Scores within [`TIE_TOLERANCE`] of the first score of
/// their group are ordered newest first, so a group never spans more than
/// the tolerance.
pub fn order_by_relevance(mut scored: Vec<ScoredItem>) -> Vec<ScoredItem> {
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.item.timestamp.cmp(&a.item.timestamp))
    });

    let mut start = 0;
    while start < scored.len() {
        let head = scored[start].score;
        let end = scored[start..]
            .iter()
            .position(|s| head - s.score >= TIE_TOLERANCE)
            .map_or(scored.len(), |offset| start + offset);
        if end - start > 1 {
            scored[start..end].sort_by(|a, b| {
                b.item
                    .timestamp
                    .cmp(&a.item.timestamp)
                    .then_with(|| b.score.total_cmp(&a.score))
            });
        }
        start = end;
    }
    scored
}
