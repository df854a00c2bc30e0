//! Builds the bounded context package handed to the generator.
//!
//! Selection runs in three passes over the routed hits:
//! 1. Near-duplicate removal in global score order, so the higher-scoring
//!    copy always survives.
//! 2. Per-collection quotas: `round(cap * weight / max_weight)`.
//! 3. A character budget (`max_context_tokens * CHARS_PER_TOKEN`), filled in
//!    output order; chunks that do not fit are skipped, not truncated.
//!
//! Output order is collection priority (weight descending, then id), then
//! score descending, then chunk id. Nothing here is random.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use crate::{
    collection::{Collection, CollectionRole, RetrievalHit},
    config::SectionSettings,
    router::{Degradation, RoutedHits},
    text_util::{CHARS_PER_TOKEN, jaccard, word_set},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackagedHit {
    pub role: CollectionRole,
    #[serde(flatten)]
    pub hit: RetrievalHit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextPackage {
    pub hits: Vec<PackagedHit>,
    pub total_chars: usize,
    pub budget_chars: usize,
    pub degraded: Vec<Degradation>,
    pub dropped_duplicates: usize,
    pub dropped_over_cap: usize,
    pub dropped_over_budget: usize,
}

impl ContextPackage {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Hits grouped by role, preserving package order within each role.
    pub fn by_role(&self) -> BTreeMap<CollectionRole, Vec<&RetrievalHit>> {
        let mut grouped: BTreeMap<CollectionRole, Vec<&RetrievalHit>> = BTreeMap::new();
        for packaged in &self.hits {
            grouped.entry(packaged.role).or_default().push(&packaged.hit);
        }
        grouped
    }
}

struct Candidate<'a> {
    hit: &'a RetrievalHit,
    role: CollectionRole,
    priority: usize,
    words: BTreeSet<String>,
}

/// Collections ordered by effective weight descending, then id.
pub fn priority_order<'a>(
    collections: &'a [Collection],
    section: &SectionSettings,
) -> Vec<(&'a Collection, f32)> {
    let mut ordered: Vec<(&Collection, f32)> = collections
        .iter()
        .map(|c| (c, section.weight_for(c)))
        .collect();
    ordered.sort_by(|(a, wa), (b, wb)| {
        wb.total_cmp(wa).then_with(|| a.id.cmp(&b.id))
    });
    ordered
}

/// Number of chunks `weight` entitles a collection to.
pub fn quota(cap: usize, weight: f32, max_weight: f32) -> usize {
    if max_weight <= 0.0 || weight <= 0.0 {
        return 0;
    }
    let share = (cap as f32 * weight / max_weight).round() as usize;
    share.min(cap)
}

pub fn assemble(
    routed: &RoutedHits,
    collections: &[Collection],
    section: &SectionSettings,
) -> ContextPackage {
    let budget_chars = section.max_context_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut package = ContextPackage {
        budget_chars,
        degraded: routed.degraded.clone(),
        ..ContextPackage::default()
    };

    let ordered = priority_order(collections, section);
    let max_weight = ordered.first().map(|(_, w)| *w).unwrap_or(0.0);

    let mut candidates: Vec<Candidate> = Vec::new();
    for (priority, (collection, _)) in ordered.iter().enumerate() {
        let Some(hits) = routed.hits.get(&collection.id) else {
            continue;
        };
        for hit in hits {
            candidates.push(Candidate {
                hit,
                role: collection.role,
                priority,
                words: word_set(&hit.chunk.text),
            });
        }
    }

    // Pass 1: dedup in global score order.
    candidates.sort_by(|a, b| {
        b.hit
            .score
            .total_cmp(&a.hit.score)
            .then(a.priority.cmp(&b.priority))
            .then(a.hit.chunk.id.cmp(&b.hit.chunk.id))
    });
    let mut seen_ids = HashSet::new();
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let duplicate = !seen_ids.insert(candidate.hit.chunk.id)
            || kept.iter().any(|k| {
                jaccard(&k.words, &candidate.words) >= section.dedup_threshold
            });
        if duplicate {
            package.dropped_duplicates += 1;
        } else {
            kept.push(candidate);
        }
    }

    // Into output order.
    kept.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(b.hit.score.total_cmp(&a.hit.score))
            .then(a.hit.chunk.id.cmp(&b.hit.chunk.id))
    });

    // Passes 2 and 3: quotas, then budget.
    let mut taken: BTreeMap<usize, usize> = BTreeMap::new();
    for candidate in kept {
        let (_, weight) = ordered[candidate.priority];
        let allowed = quota(section.per_collection_cap, weight, max_weight);
        let count = taken.entry(candidate.priority).or_default();
        if *count >= allowed {
            package.dropped_over_cap += 1;
            continue;
        }

        let size = candidate.hit.chunk.text.chars().count();
        if package.total_chars + size > budget_chars {
            package.dropped_over_budget += 1;
            continue;
        }

        *count += 1;
        package.total_chars += size;
        package.hits.push(PackagedHit {
            role: candidate.role,
            hit: candidate.hit.clone(),
        });
    }

    package
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::{chunk_id::ChunkId, collection::Chunk};

    fn collections() -> Vec<Collection> {
        vec![
            Collection::new("full", CollectionRole::FullContent, 1.0, 5),
            Collection::new("data", CollectionRole::DataMetric, 0.5, 5),
            Collection::new("voice", CollectionRole::VoicePhrase, 0.5, 5),
        ]
    }

    fn hit(collection: &str, key: &str, text: &str, score: f32) -> RetrievalHit {
        RetrievalHit {
            chunk: Chunk {
                id: ChunkId::new(collection, key),
                collection: collection.into(),
                text: text.into(),
                source: "s".into(),
                tags: vec![],
                metadata: BTreeMap::new(),
            },
            score,
            collection: collection.into(),
        }
    }

    fn routed(hits: Vec<RetrievalHit>) -> RoutedHits {
        let mut routed = RoutedHits::default();
        for h in hits {
            routed.hits.entry(h.collection.clone()).or_default().push(h);
        }
        routed
    }

    fn section(cap: usize, tokens: usize) -> SectionSettings {
        SectionSettings {
            per_collection_cap: cap,
            max_context_tokens: tokens,
            ..SectionSettings::fallback("Test")
        }
    }

    fn keys(package: &ContextPackage) -> Vec<String> {
        package
            .hits
            .iter()
            .map(|p| format!("{}:{}", p.hit.collection, p.hit.chunk.text))
            .collect()
    }

    #[test]
    fn quota_scales_with_weight() {
        assert_eq!(quota(4, 1.0, 1.0), 4);
        assert_eq!(quota(4, 0.5, 1.0), 2);
        assert_eq!(quota(5, 0.5, 1.0), 3);
        assert_eq!(quota(4, 0.0, 1.0), 0);
        assert_eq!(quota(4, 1.0, 0.0), 0);
    }

    #[test]
    fn orders_by_priority_then_score() {
        let package = assemble(
            &routed(vec![
                hit("data", "d1", "ninety five percent", 0.99),
                hit("full", "f1", "alpha beta", 0.40),
                hit("full", "f2", "gamma delta", 0.80),
                hit("voice", "v1", "our own words", 0.70),
            ]),
            &collections(),
            &section(4, 1000),
        );

        assert_eq!(
            keys(&package),
            vec![
                "full:gamma delta",
                "full:alpha beta",
                "data:ninety five percent",
                "voice:our own words",
            ]
        );
    }

    #[test]
    fn near_duplicates_keep_higher_score() {
        let package = assemble(
            &routed(vec![
                hit("full", "f1", "sixty residents signed up in the first week", 0.5),
                hit("data", "d1", "Sixty residents signed up in the first week!", 0.9),
            ]),
            &collections(),
            &section(4, 1000),
        );

        assert_eq!(keys(&package), vec!["data:Sixty residents signed up in the first week!"]);
        assert_eq!(package.dropped_duplicates, 1);
    }

    #[test]
    fn per_collection_quota_is_enforced() {
        let package = assemble(
            &routed(vec![
                hit("full", "f1", "one", 0.9),
                hit("full", "f2", "two", 0.8),
                hit("data", "d1", "three", 0.9),
                hit("data", "d2", "four", 0.8),
                hit("data", "d3", "five", 0.7),
            ]),
            &collections(),
            &section(2, 1000),
        );

        // data weight 0.5 of 1.0 with cap 2 -> 1 chunk.
        assert_eq!(keys(&package), vec!["full:one", "full:two", "data:three"]);
        assert_eq!(package.dropped_over_cap, 2);
    }

    #[test]
    fn budget_skips_chunks_that_do_not_fit() {
        let long = "x".repeat(30);
        let package = assemble(
            &routed(vec![
                hit("full", "f1", &long, 0.9),
                hit("full", "f2", "short text", 0.8),
            ]),
            &collections(),
            // 5 tokens -> 20 chars
            &section(4, 5),
        );

        assert_eq!(keys(&package), vec!["full:short text"]);
        assert_eq!(package.dropped_over_budget, 1);
        assert!(package.total_chars <= package.budget_chars);
    }

    #[test]
    fn nan_scores_still_order_deterministically() {
        let input = routed(vec![
            hit("full", "f1", "alpha beta", f32::NAN),
            hit("full", "f2", "gamma delta", 0.80),
            hit("full", "f3", "epsilon zeta", f32::NAN),
            hit("data", "d1", "ninety five percent", 0.99),
        ]);

        let first = assemble(&input, &collections(), &section(4, 1000));
        let second = assemble(&input, &collections(), &section(4, 1000));
        assert_eq!(keys(&first), keys(&second));
        assert_eq!(first.hits.len(), 4);
        assert_eq!(keys(&first)[3], "data:ninety five percent");
    }

    #[test]
    fn empty_input_yields_empty_package() {
        let mut input = RoutedHits::default();
        input.degraded.push(Degradation {
            collection: "voice".into(),
            reason: "timeout".into(),
        });
        let package = assemble(&input, &collections(), &section(4, 100));

        assert!(package.is_empty());
        assert!(package.is_degraded());
        assert_eq!(package.total_chars, 0);
    }

    #[test]
    fn section_weights_change_priority() {
        let mut s = section(4, 1000);
        s.weights.insert("voice".into(), 2.0);
        let package = assemble(
            &routed(vec![
                hit("full", "f1", "alpha", 0.9),
                hit("voice", "v1", "bravo", 0.1),
            ]),
            &collections(),
            &s,
        );
        assert_eq!(keys(&package), vec!["voice:bravo", "full:alpha"]);
    }

    #[test]
    fn by_role_groups_hits() {
        let package = assemble(
            &routed(vec![
                hit("full", "f1", "alpha", 0.9),
                hit("data", "d1", "50%", 0.9),
            ]),
            &collections(),
            &section(4, 1000),
        );
        let grouped = package.by_role();
        assert_eq!(grouped[&CollectionRole::FullContent].len(), 1);
        assert_eq!(grouped[&CollectionRole::DataMetric].len(), 1);
    }

    fn arb_hits() -> impl Strategy<Value = Vec<RetrievalHit>> {
        let words = prop::sample::select(vec![
            "youth", "housing", "solar", "pitch", "cohort", "mentor", "data", "grant",
        ]);
        prop::collection::vec(
            (
                prop::sample::select(vec!["full", "data", "voice"]),
                0u8..20,
                prop::collection::vec(words, 1..8),
                0.0f32..1.0,
            ),
            0..30,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .map(|(c, key, words, score)| {
                    hit(c, &key.to_string(), &words.join(" "), score)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn package_invariants(hits in arb_hits(), cap in 1usize..6, tokens in 1usize..60) {
            let input = routed(hits);
            let s = section(cap, tokens);
            let cols = collections();
            let package = assemble(&input, &cols, &s);

            // Deterministic.
            prop_assert_eq!(&package, &assemble(&input, &cols, &s));

            // Within budget.
            let total: usize = package.hits.iter().map(|p| p.hit.chunk.text.chars().count()).sum();
            prop_assert_eq!(total, package.total_chars);
            prop_assert!(total <= package.budget_chars);

            // No duplicate ids.
            let ids: HashSet<_> = package.hits.iter().map(|p| p.hit.chunk.id).collect();
            prop_assert_eq!(ids.len(), package.hits.len());

            // Priority-major, score-minor.
            let order = priority_order(&cols, &s);
            let rank = |c: &str| order.iter().position(|(col, _)| col.id == c).unwrap();
            for pair in package.hits.windows(2) {
                let (a, b) = (&pair[0].hit, &pair[1].hit);
                let (ra, rb) = (rank(&a.collection), rank(&b.collection));
                prop_assert!(ra < rb || (ra == rb && a.score >= b.score));
            }
        }
    }
}
