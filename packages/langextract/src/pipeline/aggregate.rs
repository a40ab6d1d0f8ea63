//! Aggregation: deduplication, overlap resolution and confidence filtering.
//!
//! None of these steps can fail; they only drop or merge extractions.

use indexmap::IndexMap;
use serde_json::Value;
use std::cmp::Ordering;

use crate::types::{
    config::OverlapStrategy,
    document::CharInterval,
    extraction::Extraction,
};

/// Collapse extractions sharing `(class, text)`.
///
/// Each group keeps its highest-confidence member (missing confidence ranks
/// as 0, ties keep the first seen). Groups stay in first-seen order.
pub fn deduplicate(extractions: Vec<Extraction>) -> Vec<Extraction> {
    let mut groups: IndexMap<(String, String), Extraction> = IndexMap::new();

    for extraction in extractions {
        let key = (extraction.class.clone(), extraction.text.clone());
        match groups.get_mut(&key) {
            Some(kept) => {
                if extraction.confidence_or_zero() > kept.confidence_or_zero() {
                    *kept = extraction;
                }
            }
            None => {
                groups.insert(key, extraction);
            }
        }
    }

    groups.into_values().collect()
}

/// Settle grounded extractions whose intervals overlap.
///
/// Ungrounded extractions pass through. Output keeps input order; a merged
/// extraction takes the place of its earliest input member.
pub fn resolve_overlaps(
    extractions: Vec<Extraction>,
    strategy: OverlapStrategy,
    source: &str,
) -> Vec<Extraction> {
    match strategy {
        OverlapStrategy::MergeOverlapping => merge_overlapping(extractions, source),
        _ => keep_greedy(extractions, strategy),
    }
}

/// Drop extractions whose confidence is present and below `threshold`.
pub fn filter_by_confidence(extractions: Vec<Extraction>, threshold: f64) -> Vec<Extraction> {
    extractions
        .into_iter()
        .filter(|e| e.confidence.map_or(true, |c| c >= threshold))
        .collect()
}

/// Accept grounded extractions in priority order, rejecting any that
/// overlap an accepted one.
fn keep_greedy(extractions: Vec<Extraction>, strategy: OverlapStrategy) -> Vec<Extraction> {
    let mut grounded: Vec<(usize, CharInterval)> = extractions
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.char_interval.map(|interval| (i, interval)))
        .collect();

    grounded.sort_by(|(ia, a), (ib, b)| {
        let primary = match strategy {
            OverlapStrategy::KeepHighestConfidence => extractions[*ib]
                .confidence_or_zero()
                .total_cmp(&extractions[*ia].confidence_or_zero()),
            OverlapStrategy::KeepLongest => b.len().cmp(&a.len()),
            _ => Ordering::Equal,
        };
        primary.then(a.start.cmp(&b.start)).then(ia.cmp(ib))
    });

    let mut accepted: Vec<CharInterval> = Vec::with_capacity(grounded.len());
    let mut keep = vec![true; extractions.len()];

    for (i, interval) in grounded {
        if accepted.iter().any(|a| a.overlaps(&interval)) {
            keep[i] = false;
        } else {
            accepted.push(interval);
        }
    }

    extractions
        .into_iter()
        .zip(keep)
        .filter_map(|(e, keep)| keep.then_some(e))
        .collect()
}

/// Union every connected overlap component into one extraction.
fn merge_overlapping(extractions: Vec<Extraction>, source: &str) -> Vec<Extraction> {
    let mut grounded: Vec<(usize, CharInterval)> = extractions
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.char_interval.map(|interval| (i, interval)))
        .collect();
    grounded.sort_by(|(ia, a), (ib, b)| a.start.cmp(&b.start).then(ia.cmp(ib)));

    // Sorted by start, a member joins the current component iff it starts
    // before the component's furthest end.
    let mut components: Vec<Vec<usize>> = Vec::new();
    let mut reach = 0usize;
    for (i, interval) in grounded {
        match components.last_mut() {
            Some(component) if interval.start < reach => {
                component.push(i);
                reach = reach.max(interval.end);
            }
            _ => {
                components.push(vec![i]);
                reach = interval.end;
            }
        }
    }

    let mut slots: Vec<Option<Extraction>> = extractions.into_iter().map(Some).collect();
    let mut output: Vec<(usize, Extraction)> = Vec::with_capacity(slots.len());

    for component in components {
        let position = component.iter().copied().min().unwrap_or_default();
        let members: Vec<Extraction> = component.iter().filter_map(|&i| slots[i].take()).collect();

        let merged = if members.len() == 1 {
            members.into_iter().next()
        } else {
            merge_component(members, source)
        };

        if let Some(extraction) = merged {
            output.push((position, extraction));
        }
    }

    // Ungrounded extractions are still in their slots
    output.extend(
        slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|e| (i, e))),
    );
    output.sort_by_key(|(position, _)| *position);
    output.into_iter().map(|(_, e)| e).collect()
}

/// Merge members of one component; members arrive sorted by start.
fn merge_component(members: Vec<Extraction>, source: &str) -> Option<Extraction> {
    let union = members
        .iter()
        .filter_map(|e| e.char_interval)
        .reduce(|a, b| a.union(&b))?;

    // First member wins confidence ties
    let best = members.iter().fold(None::<&Extraction>, |best, e| match best {
        Some(b) if b.confidence_or_zero() >= e.confidence_or_zero() => Some(b),
        _ => Some(e),
    })?;

    let weakest = members.iter().fold(None::<&Extraction>, |weakest, e| match weakest {
        Some(w) if w.alignment_quality.unwrap_or(0.0) <= e.alignment_quality.unwrap_or(0.0) => {
            Some(w)
        }
        _ => Some(e),
    })?;

    let confidence = members
        .iter()
        .filter_map(|e| e.confidence)
        .reduce(f64::max);

    let mut values: IndexMap<String, Vec<Value>> = IndexMap::new();
    for member in &members {
        for (key, value) in &member.attributes {
            let distinct = values.entry(key.clone()).or_default();
            if !distinct.contains(value) {
                distinct.push(value.clone());
            }
        }
    }

    let mut merged = Extraction::new(
        best.class.clone(),
        union
            .slice(source)
            .map(str::to_string)
            .unwrap_or_else(|| best.text.clone()),
    );
    merged.char_interval = Some(union);
    merged.alignment_status = weakest.alignment_status;
    merged.alignment_quality = weakest.alignment_quality;
    merged.confidence = confidence;
    merged.index = best.index;
    merged.group_index = best.group_index;
    merged.attributes = values
        .into_iter()
        .map(|(key, mut distinct)| {
            let value = if distinct.len() == 1 {
                distinct.remove(0)
            } else {
                Value::Array(distinct)
            };
            (key, value)
        })
        .collect();

    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::extraction::AlignmentStatus;
    use serde_json::json;

    fn grounded(class: &str, text: &str, start: usize, end: usize, confidence: f64) -> Extraction {
        let mut e = Extraction::new(class, text)
            .with_interval(start, end)
            .with_confidence(confidence);
        e.alignment_status = Some(AlignmentStatus::Exact);
        e.alignment_quality = Some(100.0);
        e
    }

    #[test]
    fn test_dedup_keeps_highest_confidence() {
        let extractions = vec![
            Extraction::new("PERSON", "John Smith").with_confidence(0.6),
            Extraction::new("ORG", "Google"),
            Extraction::new("PERSON", "John Smith").with_confidence(0.9),
        ];

        let deduped = deduplicate(extractions);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].text, "John Smith");
        assert_eq!(deduped[0].confidence, Some(0.9));
        assert_eq!(deduped[1].text, "Google");
    }

    #[test]
    fn test_dedup_ties_keep_first() {
        let first = Extraction::new("PERSON", "Ada").with_attribute("n", 1);
        let second = Extraction::new("PERSON", "Ada").with_attribute("n", 2);

        let deduped = deduplicate(vec![first.clone(), second]);
        assert_eq!(deduped, vec![first]);
    }

    #[test]
    fn test_dedup_class_matters() {
        let deduped = deduplicate(vec![
            Extraction::new("PERSON", "Jordan"),
            Extraction::new("COUNTRY", "Jordan"),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_keep_highest_confidence() {
        let extractions = vec![
            grounded("ORG", "Google", 20, 26, 0.6),
            grounded("ORG", "Google Inc.", 20, 31, 0.8),
            grounded("PERSON", "John Smith", 0, 10, 0.9),
        ];

        let resolved = resolve_overlaps(extractions, OverlapStrategy::KeepHighestConfidence, "");
        let texts: Vec<_> = resolved.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Google Inc.", "John Smith"]);
    }

    #[test]
    fn test_keep_highest_confidence_is_transitive() {
        // b beats a and c, so both go even though a and c don't overlap
        let extractions = vec![
            grounded("X", "a", 0, 5, 0.5),
            grounded("X", "b", 4, 9, 0.9),
            grounded("X", "c", 8, 12, 0.4),
        ];
        let resolved = resolve_overlaps(extractions, OverlapStrategy::KeepHighestConfidence, "");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].text, "b");
    }

    #[test]
    fn test_keep_longest() {
        let extractions = vec![
            grounded("ORG", "Google Inc.", 20, 31, 0.5),
            grounded("ORG", "Google", 20, 26, 0.9),
        ];
        let resolved = resolve_overlaps(extractions, OverlapStrategy::KeepLongest, "");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].text, "Google Inc.");
    }

    #[test]
    fn test_keep_first() {
        let extractions = vec![
            grounded("X", "later", 5, 15, 0.9),
            grounded("X", "earlier", 0, 8, 0.1),
        ];
        let resolved = resolve_overlaps(extractions, OverlapStrategy::KeepFirst, "");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].text, "earlier");
    }

    #[test]
    fn test_ungrounded_pass_through() {
        let extractions = vec![
            Extraction::new("X", "floating"),
            grounded("X", "a", 0, 5, 0.5),
            grounded("X", "b", 2, 6, 0.9),
        ];
        let resolved = resolve_overlaps(extractions, OverlapStrategy::KeepFirst, "");
        let texts: Vec<_> = resolved.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["floating", "a"]);
    }

    #[test]
    fn test_merge_overlapping() {
        let source = "John Smith works at Google Inc. in Mountain View.";
        let mut weak = grounded("COMPANY", "Google Inc", 20, 30, 0.9)
            .with_attribute("kind", "tech")
            .with_attribute("public", true);
        weak.alignment_status = Some(AlignmentStatus::FuzzyCase);
        weak.alignment_quality = Some(85.0);

        let extractions = vec![
            grounded("PERSON", "John Smith", 0, 10, 0.8),
            grounded("ORG", "Google", 20, 26, 0.6).with_attribute("kind", "search"),
            weak,
            grounded("ORG", "Inc. in", 27, 34, 0.5).with_attribute("public", true),
        ];

        let merged = resolve_overlaps(extractions, OverlapStrategy::MergeOverlapping, source);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].text, "John Smith");

        let org = &merged[1];
        assert_eq!(org.char_interval, Some(CharInterval::new(20, 34)));
        assert_eq!(org.text, "Google Inc. in");
        assert_eq!(org.class, "COMPANY");
        assert_eq!(org.confidence, Some(0.9));
        assert_eq!(org.alignment_status, Some(AlignmentStatus::FuzzyCase));
        assert_eq!(org.attributes["kind"], json!(["search", "tech"]));
        assert_eq!(org.attributes["public"], json!(true));
    }

    #[test]
    fn test_adjacent_intervals_do_not_merge() {
        let source = "abcdef";
        let extractions = vec![grounded("X", "abc", 0, 3, 0.5), grounded("X", "def", 3, 6, 0.5)];
        let merged = resolve_overlaps(extractions, OverlapStrategy::MergeOverlapping, source);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_confidence_filter() {
        let extractions = vec![
            Extraction::new("X", "low").with_confidence(0.3),
            Extraction::new("X", "none"),
            Extraction::new("X", "edge").with_confidence(0.5),
        ];

        let kept = filter_by_confidence(extractions, 0.5);
        let texts: Vec<_> = kept.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["none", "edge"]);
    }
}
