//! Corpus store backends.
//!
//! Production runs against PostgreSQL with pgvector; tests use the
//! in-memory store, which implements the same contract including the
//! `noise_merged` exclusion and URL filtering.

use std::collections::HashSet;
use std::sync::Mutex;

use postgres::{Client, NoTls};

use super::types::{ChunkType, KnowledgeStore, StoreRow};
use super::RetrievalError;
use crate::config::StoreConfig;
use crate::embedding::cosine_similarity;

const SEARCH_SQL: &str = "
    SELECT sm.id::int8 AS id, sm.report_id::int8 AS report_id,
           sm.sequence_order::int4 AS sequence_order, sm.chunk_type, sm.section_path,
           sm.raw_content, sm.meta_info, c.name AS company_name,
           (1 - (sm.embedding <=> $1::vector))::float4 AS similarity
    FROM source_materials sm
    JOIN analysis_reports ar ON ar.id = sm.report_id
    JOIN companies c ON c.id = ar.company_id
    WHERE sm.chunk_type <> 'noise_merged'
      AND sm.embedding IS NOT NULL
    ORDER BY sm.embedding <=> $1::vector
    LIMIT $2";

const ADJACENT_SQL: &str = "
    SELECT sm.id::int8 AS id, sm.report_id::int8 AS report_id,
           sm.sequence_order::int4 AS sequence_order, sm.chunk_type, sm.section_path,
           sm.raw_content, sm.meta_info, c.name AS company_name,
           0.0::float4 AS similarity
    FROM source_materials sm
    JOIN analysis_reports ar ON ar.id = sm.report_id
    JOIN companies c ON c.id = ar.company_id
    WHERE sm.report_id = $1
      AND sm.sequence_order BETWEEN $2 AND $3
      AND sm.sequence_order <> $4
    ORDER BY sm.sequence_order";

/// pgvector declares the dimension in the column's type modifier.
const DIMENSION_SQL: &str = "
    SELECT atttypmod
    FROM pg_attribute
    WHERE attrelid = 'source_materials'::regclass AND attname = 'embedding'";

/// PostgreSQL/pgvector-backed corpus store.
///
/// The sync driver is intentional: retrieval runs on worker threads and the
/// connection is shared behind a mutex, the same shape the rest of the
/// blocking stack uses.
pub struct PostgresKnowledgeStore {
    client: Mutex<Client>,
}

impl PostgresKnowledgeStore {
    pub fn connect(config: &StoreConfig) -> Result<Self, RetrievalError> {
        let client = Client::connect(&config.connection_string(), NoTls)?;
        tracing::info!(database = %config.database, "connected to corpus store");
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn row_from_pg(row: &postgres::Row) -> StoreRow {
        let chunk_type: String = row.get("chunk_type");
        let meta_raw: Option<serde_json::Value> = row
            .try_get::<_, Option<serde_json::Value>>("meta_info")
            .unwrap_or(None);

        StoreRow {
            chunk_id: row.get::<_, i64>("id"),
            report_id: row.get::<_, i64>("report_id"),
            sequence_order: row.get::<_, i32>("sequence_order"),
            chunk_type: ChunkType::parse(&chunk_type),
            section_path: row.get("section_path"),
            raw_content: row.get("raw_content"),
            metadata: meta_raw.unwrap_or(serde_json::Value::Null),
            company_name: row.get("company_name"),
            similarity: row.get::<_, f32>("similarity"),
        }
    }
}

/// pgvector accepts the literal `[x1,x2,...]` form with a `::vector` cast.
fn embedding_literal(embedding: &[f32]) -> String {
    let mut out = String::with_capacity(embedding.len() * 10 + 2);
    out.push('[');
    for (i, value) in embedding.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&value.to_string());
    }
    out.push(']');
    out
}

impl KnowledgeStore for PostgresKnowledgeStore {
    fn vector_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<StoreRow>, RetrievalError> {
        let literal = embedding_literal(query_embedding);
        // URL exclusion happens client-side; over-fetch so exclusions
        // cannot starve the result set.
        let fetch = (k + exclude_urls.len()) as i64;

        let mut client = self.client.lock().expect("store connection poisoned");
        let rows = client.query(SEARCH_SQL, &[&literal, &fetch])?;

        let mut out = Vec::with_capacity(k);
        for row in &rows {
            let store_row = Self::row_from_pg(row);
            if exclude_urls.contains(&store_row.url()) {
                continue;
            }
            out.push(store_row);
            if out.len() == k {
                break;
            }
        }
        Ok(out)
    }

    fn fetch_adjacent(
        &self,
        report_id: i64,
        sequence_order: i32,
        window: i32,
    ) -> Result<Vec<StoreRow>, RetrievalError> {
        let low = sequence_order - window;
        let high = sequence_order + window;

        let mut client = self.client.lock().expect("store connection poisoned");
        let rows = client.query(ADJACENT_SQL, &[&report_id, &low, &high, &sequence_order])?;
        Ok(rows.iter().map(Self::row_from_pg).collect())
    }

    fn embedding_dimension(&self) -> Result<usize, RetrievalError> {
        let mut client = self.client.lock().expect("store connection poisoned");
        let row = client.query_one(DIMENSION_SQL, &[])?;
        let typmod: i32 = row.get(0);
        if typmod <= 0 {
            return Err(RetrievalError::Store(
                "embedding column has no declared dimension".into(),
            ));
        }
        Ok(typmod as usize)
    }
}

/// In-memory store for tests. Cosine similarity over stored embeddings,
/// same exclusion rules as the Postgres backend.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    rows: Vec<(Vec<f32>, StoreRow)>,
    dimension: usize,
}

impl InMemoryKnowledgeStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            rows: Vec::new(),
            dimension,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_chunk(
        &mut self,
        chunk_id: i64,
        report_id: i64,
        sequence_order: i32,
        chunk_type: ChunkType,
        section_path: &str,
        raw_content: &str,
        company_name: &str,
        metadata: serde_json::Value,
        embedding: Vec<f32>,
    ) {
        self.rows.push((
            embedding,
            StoreRow {
                chunk_id,
                report_id,
                sequence_order,
                chunk_type,
                section_path: section_path.to_string(),
                raw_content: raw_content.to_string(),
                metadata,
                company_name: company_name.to_string(),
                similarity: 0.0,
            },
        ));
    }
}

impl KnowledgeStore for InMemoryKnowledgeStore {
    fn vector_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<StoreRow>, RetrievalError> {
        let mut scored: Vec<StoreRow> = self
            .rows
            .iter()
            .filter(|(_, row)| row.chunk_type != ChunkType::NoiseMerged)
            .filter(|(_, row)| !exclude_urls.contains(&row.url()))
            .map(|(embedding, row)| {
                let mut row = row.clone();
                row.similarity = cosine_similarity(query_embedding, embedding);
                row
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    fn fetch_adjacent(
        &self,
        report_id: i64,
        sequence_order: i32,
        window: i32,
    ) -> Result<Vec<StoreRow>, RetrievalError> {
        let mut out: Vec<StoreRow> = self
            .rows
            .iter()
            .map(|(_, row)| row)
            .filter(|row| {
                row.report_id == report_id
                    && row.sequence_order != sequence_order
                    && (row.sequence_order - sequence_order).abs() <= window
            })
            .cloned()
            .collect();
        out.sort_by_key(|row| row.sequence_order);
        Ok(out)
    }

    fn embedding_dimension(&self) -> Result<usize, RetrievalError> {
        Ok(self.dimension)
    }
}
