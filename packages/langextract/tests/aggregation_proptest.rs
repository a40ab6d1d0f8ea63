//! Property-based tests for deduplication and overlap resolution.

use proptest::prelude::*;

use langextract::{deduplicate, filter_by_confidence, resolve_overlaps, Extraction, OverlapStrategy};

const SOURCE: &str = "The quick brown fox jumps over the lazy dog while the cat watches from afar.";

fn extraction() -> impl Strategy<Value = Extraction> {
    (
        prop::sample::select(vec!["PERSON", "ORG", "PLACE"]),
        prop::sample::select(vec!["fox", "dog", "cat", "the lazy dog"]),
        prop::option::of(0.0f64..=1.0),
        prop::option::of((0usize..60, 1usize..15)),
    )
        .prop_map(|(class, text, confidence, span)| {
            let mut e = Extraction::new(class, text);
            e.confidence = confidence;
            if let Some((start, len)) = span {
                e = e.with_interval(start, start + len);
            }
            e
        })
}

fn strategy() -> impl Strategy<Value = OverlapStrategy> {
    prop::sample::select(vec![
        OverlapStrategy::KeepHighestConfidence,
        OverlapStrategy::KeepLongest,
        OverlapStrategy::KeepFirst,
        OverlapStrategy::MergeOverlapping,
    ])
}

proptest! {
    #[test]
    fn deduplicate_is_idempotent(input in prop::collection::vec(extraction(), 0..30)) {
        let once = deduplicate(input);
        let twice = deduplicate(once.clone());
        prop_assert_eq!(&once, &twice);

        let mut keys: Vec<_> = once.iter().map(|e| e.dedup_key()).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);
    }

    #[test]
    fn resolved_intervals_never_overlap(
        input in prop::collection::vec(extraction(), 0..30),
        strategy in strategy(),
    ) {
        let ungrounded = input.iter().filter(|e| e.char_interval.is_none()).count();
        let total = input.len();
        let output = resolve_overlaps(input, strategy, SOURCE);

        prop_assert!(output.len() <= total);
        prop_assert_eq!(
            output.iter().filter(|e| e.char_interval.is_none()).count(),
            ungrounded
        );

        let intervals: Vec<_> = output.iter().filter_map(|e| e.char_interval).collect();
        for (i, a) in intervals.iter().enumerate() {
            for b in &intervals[i + 1..] {
                prop_assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
    }

    #[test]
    fn filter_keeps_unscored_and_confident(
        input in prop::collection::vec(extraction(), 0..30),
        threshold in 0.0f64..=1.0,
    ) {
        let unscored = input.iter().filter(|e| e.confidence.is_none()).count();
        let output = filter_by_confidence(input, threshold);

        prop_assert!(output.iter().all(|e| e.confidence.map_or(true, |c| c >= threshold)));
        prop_assert_eq!(output.iter().filter(|e| e.confidence.is_none()).count(), unscored);
    }
}
