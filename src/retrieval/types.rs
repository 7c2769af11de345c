use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::RetrievalError;

/// Chunk classification assigned at ingestion time.
///
/// `noise_merged` marks fragments that were folded into a neighbor during
/// chunking; they carry no standalone meaning and are never retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Table,
    NoiseMerged,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::NoiseMerged => "noise_merged",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "table" => Self::Table,
            "noise_merged" => Self::NoiseMerged,
            _ => Self::Text,
        }
    }
}

/// One row from the corpus store, as returned by vector search or
/// adjacency fetch. `company_name` is resolved through the report/company
/// JOIN, never read from chunk metadata (absent for bulk-ingested data).
#[derive(Debug, Clone)]
pub struct StoreRow {
    pub chunk_id: i64,
    pub report_id: i64,
    pub sequence_order: i32,
    pub chunk_type: ChunkType,
    pub section_path: String,
    pub raw_content: String,
    pub metadata: serde_json::Value,
    pub company_name: String,
    pub similarity: f32,
}

impl StoreRow {
    /// Stable wire URL for this chunk. Two retrievals of the same chunk
    /// always produce the same URL.
    pub fn url(&self) -> String {
        format!("dart_report_{}_chunk_{}", self.report_id, self.chunk_id)
    }

    pub fn has_merged_meta(&self) -> bool {
        self.metadata
            .get("has_merged_meta")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Provenance carried by internal passages for reranking and tagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub chunk_id: i64,
    pub report_id: i64,
    pub company_name: String,
    pub chunk_type: ChunkType,
    pub sequence_order: i32,
    pub has_merged_meta: bool,
}

/// A retrieved evidence unit with a globally unique, stable URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Passage {
    pub url: String,
    pub title: String,
    pub snippets: Vec<String>,
    pub description: String,
    pub score: f32,
    pub source_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

impl Passage {
    /// Everything the reranker matches aliases against.
    pub fn matchable_text(&self) -> String {
        let mut text = self.title.clone();
        for snippet in &self.snippets {
            text.push('\n');
            text.push_str(snippet);
        }
        text
    }

    pub fn chunk_type(&self) -> Option<ChunkType> {
        self.provenance.as_ref().map(|p| p.chunk_type)
    }
}

/// Read-only access to the ingested corpus.
pub trait KnowledgeStore: Send + Sync {
    /// Top-k rows by vector similarity, `noise_merged` excluded.
    fn vector_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<StoreRow>, RetrievalError>;

    /// Rows of the same report within `window` positions of `sequence_order`
    /// (the anchor row itself excluded), in document order.
    fn fetch_adjacent(
        &self,
        report_id: i64,
        sequence_order: i32,
        window: i32,
    ) -> Result<Vec<StoreRow>, RetrievalError>;

    /// Dimension of the stored embedding column.
    fn embedding_dimension(&self) -> Result<usize, RetrievalError>;
}

/// External web search backend.
pub trait WebSearch: Send + Sync {
    fn search(
        &self,
        query: &str,
        top_k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<Passage>, RetrievalError>;
}

/// Public retrieval surface used by the pipeline stages.
///
/// Infallible by contract: backend failures degrade to fewer (possibly
/// zero) results, never to an error. Empty results are valid and must be
/// handled downstream.
pub trait Retriever: Send + Sync {
    fn retrieve(&self, queries: &[String], exclude_urls: &HashSet<String>, k: usize) -> Vec<Passage>;

    /// Number of queries served since the last reset.
    fn query_count_and_reset(&self) -> u64;
}

/// Merge passages from several queries, keeping one entry per URL.
/// On duplicates the higher-scored passage wins.
pub fn dedupe_by_url(passages: Vec<Passage>) -> Vec<Passage> {
    let mut seen: Vec<Passage> = Vec::with_capacity(passages.len());
    for passage in passages {
        match seen.iter_mut().find(|p| p.url == passage.url) {
            Some(existing) => {
                if passage.score > existing.score {
                    *existing = passage;
                }
            }
            None => seen.push(passage),
        }
    }
    seen
}

#[cfg(test)]
pub(crate) fn test_passage(url: &str, score: f32) -> Passage {
    Passage {
        url: url.to_string(),
        title: format!("title for {url}"),
        snippets: vec![format!("snippet for {url}")],
        description: String::new(),
        score,
        source_tag: String::new(),
        provenance: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_type_parse_round_trip() {
        for ct in [ChunkType::Text, ChunkType::Table, ChunkType::NoiseMerged] {
            assert_eq!(ChunkType::parse(ct.as_str()), ct);
        }
        // Unknown strings fall back to text.
        assert_eq!(ChunkType::parse("figure"), ChunkType::Text);
    }

    #[test]
    fn store_row_url_is_stable() {
        let row = StoreRow {
            chunk_id: 17,
            report_id: 4,
            sequence_order: 9,
            chunk_type: ChunkType::Text,
            section_path: "1. 회사의 개요".into(),
            raw_content: "본문".into(),
            metadata: serde_json::json!({}),
            company_name: "SK하이닉스".into(),
            similarity: 0.8,
        };
        assert_eq!(row.url(), "dart_report_4_chunk_17");
        assert_eq!(row.url(), row.url());
    }

    #[test]
    fn merged_meta_flag_read_from_metadata() {
        let mut row = StoreRow {
            chunk_id: 1,
            report_id: 1,
            sequence_order: 1,
            chunk_type: ChunkType::Table,
            section_path: String::new(),
            raw_content: String::new(),
            metadata: serde_json::json!({"has_merged_meta": true}),
            company_name: String::new(),
            similarity: 0.0,
        };
        assert!(row.has_merged_meta());

        row.metadata = serde_json::json!({});
        assert!(!row.has_merged_meta());
    }

    #[test]
    fn dedupe_keeps_higher_score() {
        let merged = dedupe_by_url(vec![
            test_passage("u1", 0.4),
            test_passage("u2", 0.9),
            test_passage("u1", 0.7),
        ]);
        assert_eq!(merged.len(), 2);
        let u1 = merged.iter().find(|p| p.url == "u1").unwrap();
        assert!((u1.score - 0.7).abs() < f32::EPSILON);
    }
}
