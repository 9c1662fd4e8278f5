use expert_rag_core::{cosine_similarity, rank_top_k, ChunkingConfig, Scored, TextChunker};
use proptest::prelude::*;

fn window() -> impl Strategy<Value = (usize, usize)> {
    (2usize..120).prop_flat_map(|size| (Just(size), 0..size))
}

fn text() -> impl Strategy<Value = String> {
    // words, sentence ends, blank lines and some multibyte characters
    proptest::collection::vec(
        prop_oneof![
            "[a-z]{1,12}",
            Just(" ".to_string()),
            Just(". ".to_string()),
            Just("\n".to_string()),
            Just("\n\n".to_string()),
            Just("é".to_string()),
            Just("日本".to_string()),
        ],
        0..200,
    )
    .prop_map(|parts| parts.concat())
}

fn chunker(size: usize, overlap: usize) -> TextChunker {
    TextChunker::new(ChunkingConfig::new(size, overlap).unwrap()).unwrap()
}

proptest! {
    #[test]
    fn dropping_overlaps_reconstructs_the_text((size, overlap) in window(), text in text()) {
        let chunks = chunker(size, overlap).split(&text);

        let mut rebuilt = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let skip = if index == 0 { 0 } else { overlap };
            rebuilt.extend(chunk.chars().skip(skip));
        }
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunks_respect_size_and_share_exact_overlap((size, overlap) in window(), text in text()) {
        let chunks = chunker(size, overlap).split(&text);

        for chunk in &chunks {
            let len = chunk.chars().count();
            prop_assert!(len >= 1 && len <= size);
        }
        for pair in chunks.windows(2) {
            let previous: Vec<char> = pair[0].chars().collect();
            let tail: String = previous[previous.len() - overlap..].iter().collect();
            let head: String = pair[1].chars().take(overlap).collect();
            prop_assert_eq!(tail, head);
        }
    }

    #[test]
    fn short_text_is_one_identical_chunk(text in "[a-z .\n]{1,40}") {
        let chunks = chunker(40, 10).split(&text);
        prop_assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn ranking_is_sorted_and_bounded(
        scores in proptest::collection::vec(-1.0f32..=1.0, 0..50),
        limit in 0usize..20,
    ) {
        let candidates: Vec<Scored<usize>> = scores
            .iter()
            .enumerate()
            .map(|(index, score)| Scored { sequence: index as u64, score: *score, item: index })
            .collect();

        let ranked = rank_top_k(candidates, limit);
        prop_assert_eq!(ranked.len(), limit.min(scores.len()));
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score.total_cmp(&pair[1].score).is_eq() {
                prop_assert!(pair[0].sequence < pair[1].sequence);
            }
        }
    }

    #[test]
    fn cosine_stays_in_range(
        pair in (1usize..32).prop_flat_map(|len| (
            proptest::collection::vec(-100.0f32..100.0, len),
            proptest::collection::vec(-100.0f32..100.0, len),
        )),
    ) {
        let (a, b) = pair;
        let similarity = cosine_similarity(&a, &b).unwrap();
        prop_assert!((-1.0..=1.0).contains(&similarity));
    }
}
