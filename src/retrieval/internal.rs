//! Internal corpus retriever.
//!
//! Pipeline per query: embed → over-fetched vector search → relevance floor
//! → sliding-window context assembly for tables → section-intent boost →
//! entity-aware reranking → source tagging → text/table diversity → top-k.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::embedding::{check_dimension, Embedder};

use super::rerank::{rerank_by_entity, AliasRegistry};
use super::tagging::apply_source_tags;
use super::types::{dedupe_by_url, ChunkType, KnowledgeStore, Passage, Provenance, Retriever, StoreRow};
use super::RetrievalError;

const MERGED_META_NOTE: &str =
    "[Note: merged meta info — consult adjacent context for units/base-dates.]";

/// Section categories that earn a boost when the query names them.
const SECTION_BOOST_KEYWORDS: &[(&str, &[&str])] = &[
    ("overview", &["개요", "overview", "소개", "introduction"]),
    ("business", &["사업", "business", "주요 사업"]),
    ("financial", &["재무", "financial", "매출", "손익", "재무제표"]),
    ("history", &["연혁", "history", "설립", "역사"]),
];

const SECTION_BOOST_SCORE: f32 = 0.3;

pub struct InternalRetriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    registry: AliasRegistry,
    config: PipelineConfig,
    query_count: AtomicU64,
}

impl InternalRetriever {
    /// Build a retriever, asserting the embedding-dimension contract.
    ///
    /// The corpus was embedded once at ingestion; a model with a different
    /// dimension cannot be compared against it, so this refuses to start
    /// rather than serving garbage similarities.
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: Arc<dyn Embedder>,
        registry: AliasRegistry,
        config: PipelineConfig,
    ) -> Result<Self, RetrievalError> {
        let store_dim = store.embedding_dimension()?;
        check_dimension(embedder.as_ref(), store_dim)?;

        Ok(Self {
            store,
            embedder,
            registry,
            config,
            query_count: AtomicU64::new(0),
        })
    }

    pub fn registry(&self) -> &AliasRegistry {
        &self.registry
    }

    fn retrieve_one(
        &self,
        query: &str,
        exclude_urls: &HashSet<String>,
        k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let embedding = self.embedder.embed(query)?;
        let k_prime = k.max(1) * self.config.window_expand_factor.max(1);

        let rows = self.store.vector_search(&embedding, k_prime, exclude_urls)?;
        let total = rows.len();

        let mut passages: Vec<Passage> = Vec::with_capacity(rows.len());
        for row in rows {
            if row.similarity < self.config.min_relevance_score {
                continue;
            }
            passages.push(self.passage_from_row(row)?);
        }

        if passages.len() < total {
            tracing::debug!(
                query,
                before = total,
                after = passages.len(),
                threshold = self.config.min_relevance_score,
                "filtered low-relevance chunks"
            );
        }

        apply_section_boost(query, &mut passages);
        let mut passages = rerank_by_entity(query, passages, &self.registry, &self.config);
        apply_source_tags(&mut passages);
        let passages = enforce_diversity(passages, k, self.config.min_text_ratio);

        Ok(passages)
    }

    fn passage_from_row(&self, row: StoreRow) -> Result<Passage, RetrievalError> {
        let url = row.url();
        let has_merged_meta = row.has_merged_meta();
        let content = match row.chunk_type {
            ChunkType::Table => self.compose_table_context(&row)?,
            _ => row.raw_content.clone(),
        };

        Ok(Passage {
            url,
            title: row.section_path.clone(),
            snippets: vec![content],
            description: String::new(),
            score: row.similarity,
            source_tag: row.company_name.clone(),
            provenance: Some(Provenance {
                chunk_id: row.chunk_id,
                report_id: row.report_id,
                company_name: row.company_name,
                chunk_type: row.chunk_type,
                sequence_order: row.sequence_order,
                has_merged_meta,
            }),
        })
    }

    /// Restore the prose around a table chunk. Tables lose their units,
    /// base dates and legends when chunked in isolation; the immediately
    /// adjacent chunks carry them.
    fn compose_table_context(&self, row: &StoreRow) -> Result<String, RetrievalError> {
        let neighbors =
            self.store
                .fetch_adjacent(row.report_id, row.sequence_order, self.config.window_size)?;

        let prev = neighbors
            .iter()
            .filter(|n| n.sequence_order < row.sequence_order)
            .last();
        let next = neighbors
            .iter()
            .find(|n| n.sequence_order > row.sequence_order);

        let mut parts: Vec<String> = Vec::with_capacity(4);
        if row.has_merged_meta() {
            parts.push(MERGED_META_NOTE.to_string());
        }
        if let Some(prev) = prev {
            parts.push(format!("[Previous context] {}", prev.raw_content));
        }
        parts.push(format!("[Table] {}", row.raw_content));
        if let Some(next) = next {
            parts.push(format!("[Next context] {}", next.raw_content));
        }

        Ok(parts.join("\n"))
    }
}

fn apply_section_boost(query: &str, passages: &mut [Passage]) {
    let query_lower = query.to_lowercase();
    let intents: Vec<&str> = SECTION_BOOST_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| query_lower.contains(kw)))
        .map(|(category, _)| *category)
        .collect();

    if intents.is_empty() {
        return;
    }

    for passage in passages.iter_mut() {
        let title_lower = passage.title.to_lowercase();
        let hit = SECTION_BOOST_KEYWORDS
            .iter()
            .filter(|(category, _)| intents.contains(category))
            .any(|(_, keywords)| keywords.iter().any(|kw| title_lower.contains(kw)));
        if hit {
            passage.score += SECTION_BOOST_SCORE;
        }
    }
}

/// Select the final top-k while guaranteeing a minimum share of text
/// chunks. Vector similarity over-selects dense tables; without the floor
/// a numeric query returns nothing but markdown grids.
fn enforce_diversity(passages: Vec<Passage>, k: usize, min_text_ratio: f32) -> Vec<Passage> {
    if passages.len() <= k {
        return passages;
    }

    let min_text = ((k as f32 * min_text_ratio).floor() as usize).max(1);

    let mut selected: Vec<Passage> = Vec::with_capacity(k);
    let mut remaining: Vec<Passage> = Vec::new();

    let mut text_taken = 0;
    for passage in passages {
        let is_text = passage.chunk_type() != Some(ChunkType::Table);
        if is_text && text_taken < min_text {
            text_taken += 1;
            selected.push(passage);
        } else {
            remaining.push(passage);
        }
    }

    for passage in remaining {
        if selected.len() == k {
            break;
        }
        selected.push(passage);
    }

    selected.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    selected.truncate(k);
    selected
}

impl Retriever for InternalRetriever {
    fn retrieve(&self, queries: &[String], exclude_urls: &HashSet<String>, k: usize) -> Vec<Passage> {
        self.query_count
            .fetch_add(queries.len() as u64, Ordering::SeqCst);

        let mut all = Vec::new();
        for query in queries {
            match self.retrieve_one(query, exclude_urls, k) {
                Ok(passages) => all.extend(passages),
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "internal retrieval failed");
                }
            }
        }

        let mut merged = dedupe_by_url(all);
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged
    }

    fn query_count_and_reset(&self) -> u64 {
        self.query_count.swap(0, Ordering::SeqCst)
    }
}
