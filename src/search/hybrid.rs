use std::collections::HashMap;

use super::store::{Chunk, SearchResult};

/// Reciprocal Rank Fusion: combines multiple ranked result lists into one. `k` is
/// typically 60, the default from the original RRF paper.
pub fn reciprocal_rank_fusion(k: f32, limit: usize, result_lists: Vec<Vec<SearchResult>>) -> Vec<SearchResult> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut chunk_map: HashMap<String, Chunk> = HashMap::new();

    for list in result_lists {
        for (rank, result) in list.iter().enumerate() {
            let id = &result.chunk.id;
            *scores.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
            chunk_map.entry(id.clone()).or_insert_with(|| result.chunk.clone());
        }
    }

    let mut results: Vec<SearchResult> = scores
        .into_iter()
        .map(|(id, score)| SearchResult::new(chunk_map.remove(&id).expect("chunk must exist in map"), score))
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

/// Lexical fallback for hybrid mode: scores chunks by whitespace-token match ratio,
/// plus a bonus for containing the whole query as a substring.
pub fn text_search(chunks: &[Chunk], query: &str, limit: usize) -> Vec<SearchResult> {
    let query_lower = query.to_lowercase();
    let words: Vec<String> = query_lower
        .split_whitespace()
        .filter(|w| w.len() >= 2)
        .map(|s| s.to_string())
        .collect();

    if words.is_empty() {
        return Vec::new();
    }

    let mut results: Vec<SearchResult> = chunks
        .iter()
        .filter_map(|chunk| {
            let content_lower = chunk.content.to_lowercase();

            let phrase_bonus = if content_lower.contains(&query_lower) { 0.5 } else { 0.0 };

            let match_count = words.iter().filter(|w| content_lower.contains(w.as_str())).count();

            if match_count > 0 {
                let base_score = match_count as f32 / words.len() as f32;
                Some(SearchResult::new(chunk.clone(), base_score + phrase_bonus))
            } else {
                None
            }
        })
        .collect();

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: "test.rs".to_string(),
            start_line: 1,
            end_line: 10,
            content: content.to_string(),
            vector: vec![0.1, 0.2, 0.3],
            hash: "abc123".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn rrf_single_list_preserves_rank_order() {
        let list = vec![
            SearchResult::new(make_chunk("a", "content a"), 0.9),
            SearchResult::new(make_chunk("b", "content b"), 0.8),
        ];

        let results = reciprocal_rank_fusion(60.0, 10, vec![list]);
        assert_eq!(results.len(), 2);
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn rrf_rewards_appearing_in_multiple_lists() {
        let list1 = vec![
            SearchResult::new(make_chunk("a", "a"), 0.9),
            SearchResult::new(make_chunk("b", "b"), 0.8),
        ];
        let list2 = vec![
            SearchResult::new(make_chunk("b", "b"), 0.9),
            SearchResult::new(make_chunk("c", "c"), 0.8),
        ];

        let results = reciprocal_rank_fusion(60.0, 10, vec![list1, list2]);
        assert_eq!(results[0].chunk.id, "b");
    }

    #[test]
    fn rrf_matches_documented_scenario_order() {
        // semantic=[A,B,C], lexical=[C,A,B], k=60 -> fused order A,C,B.
        let semantic = vec![
            SearchResult::new(make_chunk("A", "a"), 0.9),
            SearchResult::new(make_chunk("B", "b"), 0.8),
            SearchResult::new(make_chunk("C", "c"), 0.7),
        ];
        let lexical = vec![
            SearchResult::new(make_chunk("C", "c"), 0.9),
            SearchResult::new(make_chunk("A", "a"), 0.8),
            SearchResult::new(make_chunk("B", "b"), 0.7),
        ];

        let results = reciprocal_rank_fusion(60.0, 3, vec![semantic, lexical]);
        let order: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(order, vec!["A", "C", "B"]);
    }

    #[test]
    fn text_search_finds_word_matches() {
        let chunks = vec![
            make_chunk("1", "This is authentication code"),
            make_chunk("2", "Database connection handler"),
            make_chunk("3", "User login authentication flow"),
        ];

        let results = text_search(&chunks, "authentication", 10);
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.chunk.id == "1"));
        assert!(results.iter().any(|r| r.chunk.id == "3"));
    }

    #[test]
    fn text_search_ranks_exact_phrase_above_partial_match() {
        let chunks = vec![
            make_chunk("1", "user authentication"),
            make_chunk("2", "authentication for user accounts"),
        ];

        let results = text_search(&chunks, "user authentication", 10);
        assert_eq!(results[0].chunk.id, "1");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn text_search_returns_nothing_for_no_matches() {
        let chunks = vec![make_chunk("1", "hello world")];
        assert!(text_search(&chunks, "foobar", 10).is_empty());
    }
}
