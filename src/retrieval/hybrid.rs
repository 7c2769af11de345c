//! Hybrid retrieval: internal corpus + web search, fused by URL.
//!
//! The two backends run concurrently. The internal store is authoritative:
//! when it answers confidently (top score at or above the admission
//! threshold) web results stay out entirely; when it comes back weak or
//! empty, web results fill in. A failing backend degrades the call to the
//! surviving one; the caller never sees an error, only fewer passages.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::PipelineConfig;

use super::internal::InternalRetriever;
use super::types::{Passage, Retriever, WebSearch};

pub struct HybridRetriever {
    internal: Arc<InternalRetriever>,
    web: Option<Arc<dyn WebSearch>>,
    config: PipelineConfig,
    query_count: AtomicU64,
}

impl HybridRetriever {
    pub fn new(
        internal: Arc<InternalRetriever>,
        web: Option<Arc<dyn WebSearch>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            internal,
            web,
            config,
            query_count: AtomicU64::new(0),
        }
    }

    /// Append resolved canonical company names to the web query so the
    /// search engine sees the full entity even when the user typed an
    /// abbreviation.
    fn refine_web_query(&self, query: &str) -> String {
        let canonicals = self.internal.registry().canonicals_for_query(query);
        let missing: Vec<&str> = canonicals
            .iter()
            .map(String::as_str)
            .filter(|name| !query.contains(*name))
            .collect();

        if missing.is_empty() {
            query.to_string()
        } else {
            format!("{query} {}", missing.join(" "))
        }
    }

    fn retrieve_one(&self, query: &str, exclude_urls: &HashSet<String>, k: usize) -> Vec<Passage> {
        let Some(web) = self.web.as_ref() else {
            return self
                .internal
                .retrieve(std::slice::from_ref(&query.to_string()), exclude_urls, k);
        };

        let refined = self.refine_web_query(query);

        let (internal_results, web_results) = std::thread::scope(|scope| {
            let internal_handle = scope.spawn(|| {
                self.internal
                    .retrieve(std::slice::from_ref(&query.to_string()), exclude_urls, k)
            });
            let web_handle = scope.spawn(|| match web.search(&refined, k, exclude_urls) {
                Ok(passages) => passages,
                Err(e) => {
                    tracing::warn!(query = %refined, error = %e, "web search failed, downgrading to internal only");
                    Vec::new()
                }
            });

            (
                internal_handle.join().unwrap_or_default(),
                web_handle.join().unwrap_or_default(),
            )
        });

        let internal_top = internal_results
            .first()
            .map(|p| p.score)
            .unwrap_or(0.0);

        let mut merged = internal_results;
        if internal_top < self.config.internal_min_score {
            // Weak internal evidence: admit web results, but the internal
            // passage wins any URL collision wholesale.
            let known: HashSet<&str> = merged.iter().map(|p| p.url.as_str()).collect();
            let fresh: Vec<Passage> = web_results
                .into_iter()
                .filter(|p| !known.contains(p.url.as_str()))
                .collect();
            merged.extend(fresh);
            merged.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        merged.truncate(k);
        merged
    }
}

impl Retriever for HybridRetriever {
    fn retrieve(&self, queries: &[String], exclude_urls: &HashSet<String>, k: usize) -> Vec<Passage> {
        self.query_count
            .fetch_add(queries.len() as u64, Ordering::SeqCst);

        let mut all: Vec<Passage> = Vec::new();
        for query in queries {
            for passage in self.retrieve_one(query, exclude_urls, k) {
                match all.iter_mut().find(|p| p.url == passage.url) {
                    Some(existing) => {
                        // Internal beats web; otherwise higher score wins.
                        let existing_internal = existing.provenance.is_some();
                        let candidate_internal = passage.provenance.is_some();
                        if (candidate_internal && !existing_internal)
                            || (candidate_internal == existing_internal
                                && passage.score > existing.score)
                        {
                            *existing = passage;
                        }
                    }
                    None => all.push(passage),
                }
            }
        }

        all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        all
    }

    fn query_count_and_reset(&self) -> u64 {
        self.query_count.swap(0, Ordering::SeqCst)
            + self.internal.query_count_and_reset()
    }
}
