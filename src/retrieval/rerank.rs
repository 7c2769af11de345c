//! Entity-aware reranking.
//!
//! Pure vector similarity surfaces passages that merely *mention* a target
//! company (cross-reference noise), worst for tables because of their dense
//! named-entity content. This pass classifies the query's intent, extracts
//! the companies it targets via an alias registry, and then filters or
//! rescores candidates so factoid queries never leak another company's
//! facts while comparative queries keep their cross-company context.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::PipelineConfig;

use super::types::{ChunkType, Passage};

/// Rule-based query intent. Deterministic: same query, same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Comparison/analysis: cross-company context is useful.
    Analytical,
    /// Single-entity fact lookup: foreign-company passages are poison.
    Factoid,
}

const ANALYTICAL_KEYWORDS: &[&str] = &[
    "비교", "대비", "경쟁", "경쟁사", "분석", "swot", "전망", "추세", "점유율",
    "순위", "성장률", "동향", "전략", "산업", "업계",
];

const FACTOID_KEYWORDS: &[&str] = &[
    "설립", "설립일", "주소", "본사", "대표", "대표이사", "ceo", "임원", "전화",
    "연락처", "주주", "지분", "개요", "소개", "연혁",
];

/// Classify a query. Analytical keywords win over factoid keywords, and an
/// unrecognized query defaults to analytical, the looser class, so nothing
/// is dropped on a guess.
pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();

    if ANALYTICAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return QueryIntent::Analytical;
    }
    if FACTOID_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return QueryIntent::Factoid;
    }
    QueryIntent::Analytical
}

/// Canonical company name → alias set.
///
/// BTree containers keep iteration deterministic, which keeps retrieval
/// deterministic for a fixed store snapshot.
#[derive(Debug, Clone, Default)]
pub struct AliasRegistry {
    canonical_to_aliases: BTreeMap<String, BTreeSet<String>>,
}

impl AliasRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-seeded with the common KRX abbreviation/synonym pairs.
    pub fn with_common_synonyms() -> Self {
        let mut registry = Self::new();
        registry.register("삼성전자", &["삼전", "samsung"]);
        registry.register("SK하이닉스", &["하이닉스", "sk hynix", "hynix"]);
        registry.register("현대자동차", &["현차", "현대차"]);
        registry.register("기아", &["기아차"]);
        registry.register("LG전자", &["엘지전자", "엘전"]);
        registry.register("LG화학", &["엘지화학"]);
        registry.register("LG에너지솔루션", &["엔솔", "lg energy", "lgensol"]);
        registry.register("POSCO홀딩스", &["포스코"]);
        registry.register("한국전력", &["한전"]);
        registry.register("NAVER", &["네이버", "naver"]);
        registry.register("카카오", &["kakao"]);
        registry.register("KB금융", &["국민은행"]);
        registry.register("신한지주", &["신한은행"]);
        registry.register("우리금융지주", &["우리은행"]);
        registry
    }

    /// Register a canonical name. The canonical itself always counts as an
    /// alias; repeated calls extend the alias set.
    pub fn register(&mut self, canonical: &str, aliases: &[&str]) {
        let entry = self
            .canonical_to_aliases
            .entry(canonical.to_string())
            .or_default();
        entry.insert(canonical.to_lowercase());
        for alias in aliases {
            entry.insert(alias.to_lowercase());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.canonical_to_aliases.is_empty()
    }

    /// All aliases of every canonical whose alias set intersects the query.
    pub fn targets_for_query(&self, query: &str) -> BTreeSet<String> {
        let lower = query.to_lowercase();
        let mut targets = BTreeSet::new();

        for aliases in self.canonical_to_aliases.values() {
            if aliases.iter().any(|alias| lower.contains(alias.as_str())) {
                targets.extend(aliases.iter().cloned());
            }
        }
        targets
    }

    /// Canonical names matched by the query, for web-query refinement.
    pub fn canonicals_for_query(&self, query: &str) -> Vec<String> {
        let lower = query.to_lowercase();
        self.canonical_to_aliases
            .iter()
            .filter(|(_, aliases)| aliases.iter().any(|a| lower.contains(a.as_str())))
            .map(|(canonical, _)| canonical.clone())
            .collect()
    }
}

/// Rerank candidates for one query.
///
/// Matched passages get the boost; unmatched passages are dropped on
/// factoid queries, dropped when they are tables on analytical queries,
/// and otherwise penalized. A query that targets no registered company
/// passes candidates through untouched.
///
/// Matching uses the passage's JOIN-resolved company identity, not a
/// content substring: foreign-company chunks routinely *mention* the
/// target (cross-reference noise), and own-company chunks routinely call
/// their subject "당사" without naming it. Content matching is only the
/// fallback for passages that carry no provenance.
pub fn rerank_by_entity(
    query: &str,
    mut passages: Vec<Passage>,
    registry: &AliasRegistry,
    config: &PipelineConfig,
) -> Vec<Passage> {
    let targets = registry.targets_for_query(query);
    if targets.is_empty() {
        return passages;
    }

    let intent = classify_intent(query);
    let before = passages.len();

    passages.retain_mut(|passage| {
        let matched = match passage.provenance.as_ref() {
            Some(provenance) => targets.contains(&provenance.company_name.to_lowercase()),
            None => {
                let haystack = passage.matchable_text().to_lowercase();
                targets.iter().any(|alias| haystack.contains(alias.as_str()))
            }
        };

        if matched {
            passage.score *= config.boost_multiplier;
            return true;
        }

        match (intent, passage.chunk_type()) {
            (QueryIntent::Factoid, _) => false,
            (QueryIntent::Analytical, Some(ChunkType::Table)) => !config.drop_unmatched_tables,
            (QueryIntent::Analytical, _) => {
                passage.score *= config.penalty_multiplier;
                true
            }
        }
    });

    if passages.len() < before {
        tracing::debug!(
            query,
            intent = ?intent,
            dropped = before - passages.len(),
            "entity reranking dropped unmatched passages"
        );
    }

    passages.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    passages
}
