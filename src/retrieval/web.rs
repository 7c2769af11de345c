//! External web search backend (Serper-style JSON API).

use std::collections::HashSet;
use std::sync::Mutex;

use serde::Deserialize;

use super::types::{Passage, WebSearch};
use super::RetrievalError;

const SERPER_ENDPOINT: &str = "https://google.serper.dev/search";

/// Web results carry no comparable similarity score; rank position maps to
/// a score below the internal-admission threshold so they only outrank
/// internal passages when the internal side came up weak.
fn position_score(rank: usize) -> f32 {
    (0.5 - rank as f32 * 0.02).max(0.05)
}

pub struct SerperWebRetriever {
    api_key: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl SerperWebRetriever {
    pub fn new(api_key: &str) -> Result<Self, RetrievalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .map_err(|e| RetrievalError::Web(e.to_string()))?;

        Ok(Self {
            api_key: api_key.to_string(),
            endpoint: SERPER_ENDPOINT.to_string(),
            client,
        })
    }

    pub fn with_endpoint(api_key: &str, endpoint: &str) -> Result<Self, RetrievalError> {
        let mut retriever = Self::new(api_key)?;
        retriever.endpoint = endpoint.trim_end_matches('/').to_string();
        Ok(retriever)
    }
}

#[derive(Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperOrganic>,
}

#[derive(Deserialize)]
struct SerperOrganic {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl WebSearch for SerperWebRetriever {
    fn search(
        &self,
        query: &str,
        top_k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<Passage>, RetrievalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query, "num": top_k + exclude_urls.len() }))
            .send()
            .map_err(|e| RetrievalError::Web(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RetrievalError::Web(format!("HTTP {}: {body}", status.as_u16())));
        }

        let parsed: SerperResponse = response
            .json()
            .map_err(|e| RetrievalError::Web(format!("parse failure: {e}")))?;

        let passages = parsed
            .organic
            .into_iter()
            .filter(|item| !exclude_urls.contains(&item.link))
            .take(top_k)
            .enumerate()
            .map(|(rank, item)| Passage {
                url: item.link,
                title: item.title,
                snippets: vec![item.snippet.clone()],
                description: item.snippet,
                score: position_score(rank),
                source_tag: "web".to_string(),
                provenance: None,
            })
            .collect();

        Ok(passages)
    }
}

/// Scripted web backend for tests.
#[derive(Default)]
pub struct MockWebSearch {
    results: Vec<Passage>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl MockWebSearch {
    pub fn with_results(results: Vec<Passage>) -> Self {
        Self {
            results,
            fail: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl WebSearch for MockWebSearch {
    fn search(
        &self,
        query: &str,
        top_k: usize,
        exclude_urls: &HashSet<String>,
    ) -> Result<Vec<Passage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(RetrievalError::Web("search backend down".into()));
        }
        Ok(self
            .results
            .iter()
            .filter(|p| !exclude_urls.contains(&p.url))
            .take(top_k)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::test_passage;

    #[test]
    fn position_score_decays_with_rank() {
        assert!(position_score(0) > position_score(1));
        assert!(position_score(1) > position_score(5));
        // Never negative, even deep in the tail.
        assert!(position_score(100) > 0.0);
    }

    #[test]
    fn position_score_stays_below_internal_threshold() {
        assert!(position_score(0) < 0.6);
    }

    #[test]
    fn mock_excludes_and_truncates() {
        let mock = MockWebSearch::with_results(vec![
            test_passage("https://a", 0.5),
            test_passage("https://b", 0.4),
            test_passage("https://c", 0.3),
        ]);

        let mut exclude = HashSet::new();
        exclude.insert("https://a".to_string());

        let out = mock.search("q", 1, &exclude).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].url, "https://b");
        assert_eq!(mock.queries(), vec!["q"]);
    }
}
